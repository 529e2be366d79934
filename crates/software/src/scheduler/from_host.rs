use super::{EndpointState, OutEndpoint, TransferError};
use crate::bridge::Bridge;
use crate::codec::{EventPacket, decode_packet};
use crate::configuration::ConfigError;
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Fills the from-host jacks with MIDI received on the OUT endpoint, using a receive buffer of `B` bytes.
pub struct OutScheduler<'b, 'a, M: RawMutex, const N: usize, E: OutEndpoint, const B: usize> {
    bridge: &'b Bridge<'a, M, N>,
    endpoint: E,
    state: EndpointState,
    buf: [u8; B],
}

impl<'b, 'a, M: RawMutex, const N: usize, E: OutEndpoint, const B: usize>
    OutScheduler<'b, 'a, M, N, E, B>
{
    /// Constructs an idle [`OutScheduler`] which owns `endpoint`.
    ///
    /// Fails if `B` can't hold the largest packet the host may send, since every such transfer would overflow.
    pub fn new(bridge: &'b Bridge<'a, M, N>, endpoint: E) -> Result<Self, ConfigError> {
        let configured = usize::from(bridge.config().from_host.max_packet_size);
        let required = configured.min(endpoint.max_packet_size());
        if B < required {
            return Err(ConfigError::ReceiveBuffer { size: B, required });
        }
        Ok(Self {
            bridge,
            endpoint,
            state: EndpointState::Idle,
            buf: [0; B],
        })
    }

    /// Whether a transfer is in flight.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Receives one transfer and routes every packet in it, returning the number of packets delivered to a jack.
    ///
    /// Packets that can't be decoded or have nowhere to go are dropped without affecting the rest of the transfer.
    pub async fn receive_once(&mut self) -> Result<usize, TransferError> {
        self.state = EndpointState::TransferPending;
        let result = self.endpoint.submit(&mut self.buf).await;
        self.state = EndpointState::Idle;
        let len = result?;

        let received = &self.buf[..len];
        if len % EventPacket::SIZE != 0 {
            warn!("Ignoring {} trailing bytes of a short packet", len % EventPacket::SIZE);
        }

        let mut delivered = 0;
        for chunk in received.chunks_exact(EventPacket::SIZE) {
            let mut bytes = [0; EventPacket::SIZE];
            bytes.copy_from_slice(chunk);
            match decode_packet(&bytes) {
                Ok(packet) => {
                    if self.bridge.mux().dispatch(&packet) {
                        delivered += 1;
                    }
                }
                Err(e) => warn!("Dropping malformed packet {=[u8]:x}: {}", &bytes[..], e),
            }
        }
        Ok(delivered)
    }

    /// Listens to the host for as long as the device is powered.
    pub async fn run(&mut self) -> ! {
        loop {
            self.endpoint.wait_connection().await;
            self.bridge.set_connected(true);

            loop {
                match self.receive_once().await {
                    Ok(_) => {}
                    Err(TransferError::Disabled) => break,
                    Err(e) => error!("Transfer from host failed: {}", e),
                }
            }
            self.bridge.set_connected(false);
        }
    }
}
