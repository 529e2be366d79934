//! Jacks and the tables which route Event Packets between them and the two physical endpoints.
//!
//! Toward the host, every jack fills its own queue with whole Event Packets and the IN endpoint drains the queues one
//! at a time, round-robin by cable number. From the host, each decoded packet's cable number selects the jack whose
//! queue receives the packet's MIDI bytes.

use crate::assembler::SysExAssembler;
use crate::codec::{CableNumber, DecodedPacket};
use crate::configuration::{ConfigError, Direction, JackDescriptor, JackId};
use crate::queue::FlowQueue;
use core::cell::Cell;
use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;

/// A logical, unidirectional MIDI port with its own queue of `N` bytes.
///
/// To-host jacks hold Event Packets ready for the IN endpoint; from-host jacks hold the raw MIDI bytes unpacked from
/// the OUT endpoint.
pub struct Jack<M: RawMutex, const N: usize> {
    descriptor: JackDescriptor,
    pub(crate) queue: FlowQueue<M, N>,
    pub(crate) assembler: Mutex<M, SysExAssembler>,
}

impl<M: RawMutex, const N: usize> Jack<M, N> {
    /// Constructs a [`Jack`] with an empty queue.
    pub const fn new(descriptor: JackDescriptor) -> Self {
        Self {
            descriptor,
            queue: FlowQueue::new(),
            assembler: Mutex::new(SysExAssembler::new(descriptor.cable)),
        }
    }

    /// The jack's static description.
    pub fn descriptor(&self) -> &JackDescriptor {
        &self.descriptor
    }

    /// Bytes waiting in the jack's queue.
    pub fn pending(&self) -> usize {
        self.queue.occupied()
    }
}

/// Routing tables for one set of jacks.
pub struct Multiplexer<'a, M: RawMutex, const N: usize> {
    jacks: &'a [Jack<M, N>],
    to_host: [Option<usize>; CableNumber::COUNT],
    from_host: [Option<usize>; CableNumber::COUNT],
    /// Cable at which the next search for to-host data begins.
    next_to_host: BlockingMutex<M, Cell<CableNumber>>,
    to_host_ready: Signal<M, ()>,
}

impl<'a, M: RawMutex, const N: usize> Multiplexer<'a, M, N> {
    /// Builds the routing tables, rejecting jacks which share a cable number within a direction.
    pub fn new(jacks: &'a [Jack<M, N>]) -> Result<Self, ConfigError> {
        let mut to_host = [None; CableNumber::COUNT];
        let mut from_host = [None; CableNumber::COUNT];
        for (i, jack) in jacks.iter().enumerate() {
            let descriptor = jack.descriptor();
            let table = match descriptor.direction {
                Direction::ToHost => &mut to_host,
                Direction::FromHost => &mut from_host,
            };
            let slot = &mut table[descriptor.cable.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateCable(descriptor.cable.into()));
            }
            *slot = Some(i);
        }
        Ok(Self {
            jacks,
            to_host,
            from_host,
            next_to_host: BlockingMutex::new(Cell::new(CableNumber::default())),
            to_host_ready: Signal::new(),
        })
    }

    /// All jacks, in configuration order.
    pub fn jacks(&self) -> &'a [Jack<M, N>] {
        self.jacks
    }

    /// Looks up a jack by id.
    pub fn jack(&self, id: JackId) -> Option<&'a Jack<M, N>> {
        self.jacks.iter().find(|j| j.descriptor().id == id)
    }

    /// Looks up the jack assigned to `cable` in `direction`.
    pub fn by_cable(&self, direction: Direction, cable: CableNumber) -> Option<&'a Jack<M, N>> {
        let table = match direction {
            Direction::ToHost => &self.to_host,
            Direction::FromHost => &self.from_host,
        };
        table[cable.index()].map(|i| &self.jacks[i])
    }

    /// Finds the next to-host jack with data, searching from the cable after the one last returned.
    pub fn next_ready_to_host(&self) -> Option<&'a Jack<M, N>> {
        let start = self.next_to_host.lock(|c| c.get());
        let mut cable = start;
        for _ in 0..CableNumber::COUNT {
            if let Some(jack) = self.by_cable(Direction::ToHost, cable) {
                if !jack.queue.is_empty() {
                    self.next_to_host.lock(|c| c.set(cable.next()));
                    return Some(jack);
                }
            }
            cable = cable.next();
        }
        None
    }

    /// Wakes the IN endpoint's scheduler after data was queued for the host.
    pub fn notify_to_host(&self) {
        self.to_host_ready.signal(());
    }

    /// Waits until [`notify_to_host`](Self::notify_to_host) has been called. Wake-ups may be stale, so callers should
    /// recheck for data.
    pub async fn wait_to_host(&self) {
        self.to_host_ready.wait().await;
    }

    /// Delivers a packet from the host to the jack assigned to its cable.
    ///
    /// Returns `false` if the packet was dropped, either because no jack is assigned to its cable or because that jack's
    /// queue can't hold it. Neither condition affects other jacks.
    pub fn dispatch(&self, packet: &DecodedPacket) -> bool {
        let Some(jack) = self.by_cable(Direction::FromHost, packet.cable) else {
            warn!("Dropping packet for unassigned cable {}", packet.cable);
            return false;
        };
        match jack.queue.try_write_all(packet.payload()) {
            Ok(()) => {
                trace!("Routed {} bytes to {}", packet.payload().len(), jack.descriptor().name);
                true
            }
            Err(e) => {
                warn!("Dropping packet for {}: {}", jack.descriptor().name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_packet;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::{vec, vec::Vec};

    type TestJack = Jack<NoopRawMutex, 16>;

    fn descriptor(id: u8, direction: Direction, cable: u8) -> JackDescriptor {
        JackDescriptor {
            id: JackId(id),
            direction,
            cable: CableNumber::new(cable).unwrap(),
            name: "test",
        }
    }

    fn four_jacks() -> [TestJack; 4] {
        [
            Jack::new(descriptor(0, Direction::ToHost, 0)),
            Jack::new(descriptor(1, Direction::ToHost, 3)),
            Jack::new(descriptor(2, Direction::FromHost, 0)),
            Jack::new(descriptor(3, Direction::FromHost, 1)),
        ]
    }

    #[test]
    fn lookup() {
        let jacks = four_jacks();
        let mux = Multiplexer::new(&jacks).unwrap();
        let cable = |n| CableNumber::new(n).unwrap();

        assert_eq!(
            Some(JackId(1)),
            mux.by_cable(Direction::ToHost, cable(3)).map(|j| j.descriptor().id)
        );
        assert_eq!(
            Some(JackId(2)),
            mux.by_cable(Direction::FromHost, cable(0)).map(|j| j.descriptor().id)
        );
        assert!(mux.by_cable(Direction::FromHost, cable(3)).is_none());
        assert_eq!(Some(JackId(3)), mux.jack(JackId(3)).map(|j| j.descriptor().id));
        assert!(mux.jack(JackId(9)).is_none());
    }

    #[test]
    fn rejects_shared_cable() {
        let jacks: [TestJack; 2] = [
            Jack::new(descriptor(0, Direction::FromHost, 5)),
            Jack::new(descriptor(1, Direction::FromHost, 5)),
        ];
        assert!(matches!(
            Multiplexer::new(&jacks),
            Err(ConfigError::DuplicateCable(5))
        ));
    }

    #[test]
    fn unassigned_cable_is_dropped() {
        let jacks = four_jacks();
        let mux = Multiplexer::new(&jacks).unwrap();

        let stray = decode_packet(&[0x99, 0x90, 0x40, 0x7F]).unwrap();
        assert!(!mux.dispatch(&stray), "Packet for cable 9 should be dropped");

        // other jacks keep working
        let packet = decode_packet(&[0x19, 0x90, 0x40, 0x7F]).unwrap();
        assert!(mux.dispatch(&packet));
        assert_eq!(3, jacks[3].pending());
        assert!(jacks.iter().enumerate().all(|(i, j)| i == 3 || j.pending() == 0));
    }

    #[test]
    fn full_jack_drops_whole_packet() {
        let jacks = four_jacks();
        let mux = Multiplexer::new(&jacks).unwrap();
        jacks[2].queue.try_write_all(&[0; 14]).unwrap();

        let packet = decode_packet(&[0x09, 0x90, 0x40, 0x7F]).unwrap();
        assert!(!mux.dispatch(&packet));
        assert_eq!(14, jacks[2].pending(), "Partial packet must not be queued");
    }

    #[test]
    fn to_host_is_round_robin() {
        let jacks = four_jacks();
        let mux = Multiplexer::new(&jacks).unwrap();
        assert!(mux.next_ready_to_host().is_none());

        jacks[0].queue.try_write_all(&[0x09, 0x90, 0x40, 0x7F]).unwrap();
        jacks[1].queue.try_write_all(&[0x39, 0x90, 0x40, 0x7F]).unwrap();

        // both jacks keep data queued, yet neither is serviced twice in a row
        let order: Vec<_> = (0..4)
            .filter_map(|_| mux.next_ready_to_host())
            .map(|j| j.descriptor().id.0)
            .collect();
        assert_eq!(vec![0, 1, 0, 1], order);
    }
}
