//! The device's MIDI topology, fixed at build time and validated by the bridge at startup.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kinesta_midi_lib::{
    Bridge, BridgeConfig, CableNumber, Direction, EndpointConfig, Jack, JackDescriptor, JackId,
};

/// Size of each jack's queue; room for 64 Event Packets.
pub const QUEUE_SIZE: usize = 256;

/// Largest transfer on either bulk endpoint. Full-speed USB caps bulk packets at 64 bytes.
pub const MAX_PACKET_SIZE: u16 = 64;

pub type MidiJack = Jack<CriticalSectionRawMutex, QUEUE_SIZE>;
pub type MidiBridge = Bridge<'static, CriticalSectionRawMutex, QUEUE_SIZE>;

/// MIDI generated by the device itself.
pub const SENSOR: JackId = JackId(0);
/// MIDI arriving at the DIN socket, forwarded to the host.
pub const DIN_IN: JackId = JackId(1);
/// MIDI from the host, forwarded to the DIN socket.
pub const DIN_OUT: JackId = JackId(2);

const fn cable(n: u8) -> CableNumber {
    match CableNumber::new(n) {
        Ok(cable) => cable,
        Err(_) => core::panic!("cable numbers occupy four bits"),
    }
}

pub const JACK_DESCRIPTORS: [JackDescriptor; 3] = [
    JackDescriptor {
        id: SENSOR,
        direction: Direction::ToHost,
        cable: cable(0),
        name: "Kinesta Sensors",
    },
    JackDescriptor {
        id: DIN_IN,
        direction: Direction::ToHost,
        cable: cable(1),
        name: "Kinesta DIN In",
    },
    JackDescriptor {
        id: DIN_OUT,
        direction: Direction::FromHost,
        cable: cable(0),
        name: "Kinesta DIN Out",
    },
];

pub static JACKS: [MidiJack; 3] = [
    Jack::new(JACK_DESCRIPTORS[0]),
    Jack::new(JACK_DESCRIPTORS[1]),
    Jack::new(JACK_DESCRIPTORS[2]),
];

/// embassy-usb allocates the MIDI class's OUT endpoint before its IN endpoint, so both land on endpoint 1.
pub const BRIDGE_CONFIG: BridgeConfig<'static> = BridgeConfig {
    jacks: &JACK_DESCRIPTORS,
    to_host: EndpointConfig {
        address: 0x81,
        max_packet_size: MAX_PACKET_SIZE,
    },
    from_host: EndpointConfig {
        address: 0x01,
        max_packet_size: MAX_PACKET_SIZE,
    },
};

/// Number of jacks carrying MIDI in `direction`.
pub fn jack_count(direction: Direction) -> u8 {
    BRIDGE_CONFIG.jacks_toward(direction).count() as u8
}
