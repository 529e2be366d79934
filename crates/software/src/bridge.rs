//! The functional API used by application code to exchange MIDI with the USB host.

use crate::codec::CodecError;
use crate::configuration::{BridgeConfig, ConfigError, Direction, JackId};
use crate::message::Message;
use crate::mux::{Jack, Multiplexer};
use crate::queue::{QueueError, Timeout};
use core::cell::Cell;
use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use thiserror::Error;

/// Reasons a bridge operation could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeError {
    /// No jack has the given id.
    #[error("no jack with id {0}")]
    UnknownJack(u8),
    /// The jack carries MIDI the other way.
    #[error("jack {0} does not carry MIDI in that direction")]
    WrongDirection(u8),
    /// The host hasn't configured the device, so nothing would read the data.
    #[error("USB host is not connected")]
    Disconnected,
    /// The bytes aren't valid MIDI.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The jack's queue could not be accessed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The jacks don't match the configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Connects application code to the jacks, and through them to the USB host.
pub struct Bridge<'a, M: RawMutex, const N: usize> {
    config: BridgeConfig<'a>,
    mux: Multiplexer<'a, M, N>,
    connected: BlockingMutex<M, Cell<bool>>,
}

impl<'a, M: RawMutex, const N: usize> Bridge<'a, M, N> {
    /// Validates `config` and checks that `jacks` are exactly the jacks it describes.
    pub fn new(config: BridgeConfig<'a>, jacks: &'a [Jack<M, N>]) -> Result<Self, ConfigError> {
        config.validate()?;
        let described = |jack: &Jack<M, N>| config.jacks.contains(jack.descriptor());
        if jacks.len() != config.jacks.len() || !jacks.iter().all(described) {
            return Err(ConfigError::JackMismatch);
        }
        debug!("Bridge configured with {} jacks", jacks.len());
        Ok(Self {
            config,
            mux: Multiplexer::new(jacks)?,
            connected: BlockingMutex::new(Cell::new(false)),
        })
    }

    /// The configuration the bridge was built from.
    pub fn config(&self) -> &BridgeConfig<'a> {
        &self.config
    }

    /// The routing tables, for the transfer schedulers.
    pub fn mux(&self) -> &Multiplexer<'a, M, N> {
        &self.mux
    }

    /// Returns `true` while the host has the device configured.
    pub fn is_connected(&self) -> bool {
        self.connected.lock(|c| c.get())
    }

    /// Records whether the host has the device configured.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.lock(|c| c.replace(connected));
        if was != connected {
            info!("USB host {}", if connected { "connected" } else { "disconnected" });
        }
    }

    fn jack(&self, id: JackId, direction: Direction) -> Result<&'a Jack<M, N>, BridgeError> {
        let jack = self.mux.jack(id).ok_or(BridgeError::UnknownJack(id.0))?;
        if jack.descriptor().direction != direction {
            return Err(BridgeError::WrongDirection(id.0));
        }
        Ok(jack)
    }

    /// Queues raw MIDI bytes for the host on a to-host jack, returning how many were accepted.
    ///
    /// Bytes are accepted until the jack's queue can't hold the next packet, so a short count signals backpressure; the
    /// remaining bytes may be offered again later. Bytes which only extend an incomplete message are accepted without
    /// queueing anything. A byte that isn't valid MIDI is reported as an error when it's the first byte offered;
    /// otherwise the count stops just short of it.
    pub async fn write_midi(&self, id: JackId, bytes: &[u8]) -> Result<usize, BridgeError> {
        let jack = self.jack(id, Direction::ToHost)?;
        if !self.is_connected() {
            return Err(BridgeError::Disconnected);
        }

        let mut assembler = jack.assembler.lock().await;
        let mut accepted = 0;
        for &byte in bytes {
            // the new state is only kept once the resulting packet has been queued
            let mut next = *assembler;
            match next.push(byte) {
                Ok(Some(packet)) => match jack.queue.write_all(packet.as_bytes()).await {
                    Ok(()) => self.mux.notify_to_host(),
                    Err(QueueError::Full) => {
                        debug!("{} is full after {} bytes", jack.descriptor().name, accepted);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                },
                Ok(None) => {}
                Err(e) if accepted == 0 => return Err(e.into()),
                Err(_) => break,
            }
            *assembler = next;
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Queues a complete message for the host. Returns the number of bytes accepted, as
    /// [`write_midi`](Self::write_midi) does.
    pub async fn write_message(&self, id: JackId, message: &Message<'_>) -> Result<usize, BridgeError> {
        match message {
            Message::SysEx(bytes) => self.write_midi(id, bytes).await,
            _ => {
                let mut buf = [0; 3];
                let len = message.copy_to_slice(&mut buf)?;
                self.write_midi(id, &buf[..len]).await
            }
        }
    }

    /// Reads MIDI bytes received from the host on a from-host jack, waiting for them per `timeout`.
    ///
    /// Returns [`QueueError::Timeout`] (wrapped) if nothing arrived in time; the jack is left untouched in that case.
    pub async fn read_midi(
        &self,
        id: JackId,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> Result<usize, BridgeError> {
        let jack = self.jack(id, Direction::FromHost)?;
        if buf.is_empty() {
            return Ok(0);
        }
        jack.queue.wait_readable(timeout).await?;

        let mut read = 0;
        while read < buf.len() {
            let grant = jack.queue.claim_read(buf.len() - read).await;
            let len = grant.len();
            if len == 0 {
                break;
            }
            buf[read..read + len].copy_from_slice(&grant);
            grant.commit(len);
            read += len;
        }
        Ok(read)
    }
}
