use super::{EndpointState, InEndpoint, TransferError};
use crate::bridge::Bridge;
use crate::codec::EventPacket;
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Drains the to-host jacks into the IN endpoint.
pub struct InScheduler<'b, 'a, M: RawMutex, const N: usize, E: InEndpoint> {
    bridge: &'b Bridge<'a, M, N>,
    endpoint: E,
    state: EndpointState,
}

impl<'b, 'a, M: RawMutex, const N: usize, E: InEndpoint> InScheduler<'b, 'a, M, N, E> {
    /// Constructs an idle [`InScheduler`] which owns `endpoint`.
    pub fn new(bridge: &'b Bridge<'a, M, N>, endpoint: E) -> Self {
        Self {
            bridge,
            endpoint,
            state: EndpointState::Idle,
        }
    }

    /// Whether a transfer is in flight.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Largest transfer to submit: whole packets only, within both the configured and the actual packet size.
    fn transfer_limit(&self) -> usize {
        let configured = usize::from(self.bridge.config().to_host.max_packet_size);
        let limit = configured.min(self.endpoint.max_packet_size());
        limit - limit % EventPacket::SIZE
    }

    /// Transfers data from the next jack that has some, returning `false` if there was none.
    ///
    /// The data is only released from the jack's queue once the host has taken it; after a failed transfer it stays
    /// queued for the next attempt.
    pub async fn service(&mut self) -> Result<bool, TransferError> {
        let Some(jack) = self.bridge.mux().next_ready_to_host() else {
            return Ok(false);
        };
        let grant = jack.queue.claim_read(self.transfer_limit()).await;
        let len = grant.len();
        if len == 0 {
            return Ok(false);
        }

        trace!("Sending {} bytes from {}", len, jack.descriptor().name);
        self.state = EndpointState::TransferPending;
        let result = self.endpoint.submit(&grant).await;
        self.state = EndpointState::Idle;

        match result {
            Ok(()) => {
                grant.commit(len);
                Ok(true)
            }
            Err(e) => {
                error!("Transfer to host failed: {}", e);
                drop(grant);
                Err(e)
            }
        }
    }

    /// Services the jacks for as long as the device is powered.
    pub async fn run(&mut self) -> ! {
        loop {
            self.endpoint.wait_connection().await;
            self.bridge.set_connected(true);

            loop {
                match self.service().await {
                    Ok(true) => {}
                    Ok(false) => self.bridge.mux().wait_to_host().await,
                    Err(TransferError::Disabled) => break,
                    Err(TransferError::BufferOverflow) => {}
                }
            }
            self.bridge.set_connected(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::{DIN_IN, SENSOR, config, connected_bridge, jacks};
    use crate::scheduler::mock::MockIn;
    use embassy_futures::{block_on, select::select, yield_now};
    use std::{vec, vec::Vec};

    fn endpoint(max_packet_size: usize) -> MockIn {
        MockIn {
            max_packet_size,
            ..Default::default()
        }
    }

    #[test]
    fn idle_when_nothing_is_queued() {
        let jacks = jacks();
        let bridge = connected_bridge(&jacks);
        let mut scheduler = InScheduler::new(&bridge, endpoint(64));
        assert_eq!(Ok(false), block_on(scheduler.service()));
        assert_eq!(EndpointState::Idle, scheduler.state());
        assert!(scheduler.endpoint.sent.is_empty());
    }

    #[test]
    fn transfers_are_whole_packets_within_the_limit() {
        let jacks = jacks();
        let bridge = connected_bridge(&jacks);
        // the configured packet size of 8 is smaller than the endpoint's
        let mut scheduler = InScheduler::new(&bridge, endpoint(64));
        block_on(async {
            bridge
                .write_midi(SENSOR, &[0x90, 0x40, 0x7F, 0x80, 0x40, 0x00, 0xF8])
                .await
                .unwrap();
            assert_eq!(Ok(true), scheduler.service().await);
            assert_eq!(Ok(true), scheduler.service().await);
            assert_eq!(Ok(false), scheduler.service().await);
        });
        assert_eq!(
            vec![
                vec![0x09, 0x90, 0x40, 0x7F, 0x08, 0x80, 0x40, 0x00],
                vec![0x05, 0xF8, 0x00, 0x00],
            ],
            scheduler.endpoint.sent
        );
        assert_eq!(0, jacks[0].pending());
    }

    #[test]
    fn jacks_take_turns() {
        let jacks = jacks();
        let bridge = connected_bridge(&jacks);
        let mut scheduler = InScheduler::new(&bridge, endpoint(4));
        block_on(async {
            bridge.write_midi(SENSOR, &[0xF8, 0xF8]).await.unwrap();
            bridge.write_midi(DIN_IN, &[0xFA, 0xFC]).await.unwrap();
            while scheduler.service().await.unwrap() {}
        });
        let cables: Vec<u8> = scheduler.endpoint.sent.iter().map(|t| t[0] >> 4).collect();
        assert_eq!(vec![0, 1, 0, 1], cables);
    }

    #[test]
    fn failed_transfer_is_retried() {
        let jacks = jacks();
        let bridge = connected_bridge(&jacks);
        let mut scheduler = InScheduler::new(&bridge, endpoint(8));
        scheduler.endpoint.failures.push_back(TransferError::Disabled);
        block_on(async {
            bridge.write_midi(DIN_IN, &[0xC3, 0x05]).await.unwrap();
            assert_eq!(Err(TransferError::Disabled), scheduler.service().await);
            assert_eq!(EndpointState::Idle, scheduler.state());
            assert_eq!(4, jacks[1].pending(), "Failed transfer should leave data queued");
            assert_eq!(Ok(true), scheduler.service().await);
        });
        assert_eq!(vec![vec![0x1C, 0xC3, 0x05, 0x00]], scheduler.endpoint.sent);
    }

    #[test]
    fn run_wakes_for_new_data() {
        let jacks = jacks();
        let bridge = connected_bridge(&jacks);
        let mut scheduler = InScheduler::new(&bridge, endpoint(8));

        block_on(select(scheduler.run(), async {
            // nothing is queued, so the scheduler goes to sleep
            yield_now().await;
            bridge.write_midi(SENSOR, &[0xF8]).await.unwrap();
            yield_now().await;
            assert_eq!(0, jacks[0].pending(), "Queued data should be sent without prompting");

            bridge.write_midi(DIN_IN, &[0xC3, 0x05]).await.unwrap();
            yield_now().await;
            assert_eq!(0, jacks[1].pending());
        }));

        assert_eq!(
            vec![vec![0x05, 0xF8, 0x00, 0x00], vec![0x1C, 0xC3, 0x05, 0x00]],
            scheduler.endpoint.sent
        );
    }

    #[test]
    fn run_tracks_the_connection() {
        let jacks = jacks();
        let bridge = Bridge::new(config(), &jacks).unwrap();
        let mut sender = endpoint(8);
        sender.unplugged.set(true);
        sender.failures.push_back(TransferError::Disabled);
        let unplugged = sender.unplugged.clone();
        let mut scheduler = InScheduler::new(&bridge, sender);

        block_on(select(scheduler.run(), async {
            yield_now().await;
            assert!(!bridge.is_connected(), "Bridge should wait for the host");

            unplugged.set(false);
            yield_now().await;
            assert!(bridge.is_connected());

            // the transfer fails because the host went away
            bridge.write_midi(SENSOR, &[0xF8]).await.unwrap();
            yield_now().await;
            assert!(!bridge.is_connected());
            assert_eq!(4, jacks[0].pending(), "Data should be kept for the next connection");

            unplugged.set(false);
            yield_now().await;
            assert!(bridge.is_connected());
            assert_eq!(0, jacks[0].pending());
        }));

        assert_eq!(vec![vec![0x05, 0xF8, 0x00, 0x00]], scheduler.endpoint.sent);
    }
}
