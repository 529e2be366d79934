//! State machines which move Event Packets between the jacks and the two physical bulk endpoints.
//!
//! Each endpoint is owned by exactly one scheduler. The USB driver's interrupt merely wakes the scheduler's task when a
//! transfer completes; decoding, dispatch and resubmission all happen in the task.

mod from_host;
pub use from_host::*;

mod to_host;
pub use to_host::*;

use thiserror::Error;

/// Reasons a USB transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// The host deconfigured the device or the cable was pulled.
    #[error("endpoint is disabled")]
    Disabled,
    /// The transfer didn't fit the buffer supplied.
    #[error("buffer overflow")]
    BufferOverflow,
}

/// Whether a scheduler has a transfer in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointState {
    /// Ready to submit the next transfer.
    Idle,
    /// Waiting for the submitted transfer to complete.
    TransferPending,
}

/// A bulk endpoint carrying data to the host.
#[allow(async_fn_in_trait)]
pub trait InEndpoint {
    /// Largest transfer the endpoint accepts.
    fn max_packet_size(&self) -> usize;

    /// Waits until the host has configured the device.
    async fn wait_connection(&mut self);

    /// Transfers `data` to the host, completing once the host has taken it.
    async fn submit(&mut self, data: &[u8]) -> Result<(), TransferError>;
}

/// A bulk endpoint carrying data from the host.
#[allow(async_fn_in_trait)]
pub trait OutEndpoint {
    /// Largest transfer the endpoint delivers.
    fn max_packet_size(&self) -> usize;

    /// Waits until the host has configured the device.
    async fn wait_connection(&mut self);

    /// Receives one transfer from the host into `buf`, returning its length.
    async fn submit(&mut self, buf: &mut [u8]) -> Result<usize, TransferError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use core::cell::Cell;
    use embassy_futures::yield_now;
    use std::{collections::VecDeque, rc::Rc, vec::Vec};

    /// Waits until the test plugs the endpoint back in.
    async fn wait_plugged(unplugged: &Cell<bool>) {
        while unplugged.get() {
            yield_now().await;
        }
    }

    /// Records transfers, failing the ones queued up in `failures`. A [`TransferError::Disabled`] failure unplugs the
    /// endpoint until the test clears `unplugged`.
    #[derive(Default)]
    pub(crate) struct MockIn {
        pub(crate) max_packet_size: usize,
        pub(crate) sent: Vec<Vec<u8>>,
        pub(crate) failures: VecDeque<TransferError>,
        pub(crate) unplugged: Rc<Cell<bool>>,
    }

    impl InEndpoint for MockIn {
        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }

        async fn wait_connection(&mut self) {
            wait_plugged(&self.unplugged).await
        }

        async fn submit(&mut self, data: &[u8]) -> Result<(), TransferError> {
            if let Some(e) = self.failures.pop_front() {
                if e == TransferError::Disabled {
                    self.unplugged.set(true);
                }
                return Err(e);
            }
            self.sent.push(data.to_vec());
            Ok(())
        }
    }

    /// Plays back scripted transfers from the host. Once the script runs out, or on a scripted
    /// [`TransferError::Disabled`], the endpoint is unplugged until the test clears `unplugged`.
    #[derive(Default)]
    pub(crate) struct MockOut {
        pub(crate) max_packet_size: usize,
        pub(crate) incoming: VecDeque<Result<Vec<u8>, TransferError>>,
        pub(crate) unplugged: Rc<Cell<bool>>,
    }

    impl OutEndpoint for MockOut {
        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }

        async fn wait_connection(&mut self) {
            wait_plugged(&self.unplugged).await
        }

        async fn submit(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
            let next = self.incoming.pop_front().unwrap_or(Err(TransferError::Disabled));
            if next == Err(TransferError::Disabled) {
                self.unplugged.set(true);
            }
            let data = next?;
            if data.len() > buf.len() {
                return Err(TransferError::BufferOverflow);
            }
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        }
    }
}
