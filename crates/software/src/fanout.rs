//! Mirrors MIDI generated by the device to the DIN port and the USB host, as selected by the [`OutputRoute`].

use crate::bridge::{Bridge, BridgeError};
use crate::configuration::{JackId, OutputRoute};
use crate::message::Message;
use embassy_sync::blocking_mutex::raw::RawMutex;
use thiserror::Error;

/// A raw MIDI output, such as a UART wired to a DIN socket.
#[allow(async_fn_in_trait)]
pub trait ByteSink {
    /// Error reported by the underlying transport.
    type Error;

    /// Writes every byte, in order.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Reasons a message didn't reach every selected output. An error on one output never keeps the message from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError<E> {
    /// The DIN sink failed.
    #[error("DIN output failed")]
    Din(E),
    /// The bridge refused the message.
    #[error("USB output failed: {0}")]
    Usb(BridgeError),
    /// The jack's queue filled up partway through the message.
    #[error("USB output accepted only {accepted} bytes")]
    Incomplete {
        /// Bytes the bridge accepted.
        accepted: usize,
    },
}

/// Sends application MIDI to a DIN sink and a to-host jack.
pub struct MidiOut<'b, 'a, M: RawMutex, const N: usize, S: ByteSink> {
    din: S,
    bridge: &'b Bridge<'a, M, N>,
    jack: JackId,
    route: OutputRoute,
}

impl<'b, 'a, M: RawMutex, const N: usize, S: ByteSink> MidiOut<'b, 'a, M, N, S> {
    /// Constructs a [`MidiOut`] which sends to both outputs.
    pub fn new(din: S, bridge: &'b Bridge<'a, M, N>, jack: JackId) -> Self {
        Self {
            din,
            bridge,
            jack,
            route: OutputRoute::default(),
        }
    }

    /// The outputs currently selected.
    pub fn route(&self) -> OutputRoute {
        self.route
    }

    /// Selects the outputs for subsequent messages.
    pub fn set_route(&mut self, route: OutputRoute) {
        debug!("Output route is now {}", route);
        self.route = route;
    }

    /// Sends `message` to every output the route selects.
    pub async fn send(&mut self, message: &Message<'_>) -> Result<(), SendError<S::Error>> {
        let din = if self.route.includes_din() {
            let mut buf = [0; 3];
            match message {
                Message::SysEx(bytes) => self.din.write(bytes).await,
                _ => match message.copy_to_slice(&mut buf) {
                    Ok(len) => self.din.write(&buf[..len]).await,
                    Err(e) => return Err(SendError::Usb(e.into())),
                },
            }
        } else {
            Ok(())
        };

        let usb = if self.route.includes_usb() {
            match self.bridge.write_message(self.jack, message).await {
                Ok(accepted) if accepted < message.wire_len() => Err(SendError::Incomplete { accepted }),
                Ok(_) => Ok(()),
                Err(e) => Err(SendError::Usb(e)),
            }
        } else {
            Ok(())
        };

        din.map_err(SendError::Din)?;
        usb
    }
}
