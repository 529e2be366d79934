//! This crate contains architecture-agnostic logic for Kinesta, a family of MIDI controllers which exchange
//! [MIDI](https://midi.org/midi-1-0) with a computer over USB and with other instruments over a DIN socket.
//!
//! At its core is a bridge implementing the [USB MIDI class 1.0](https://www.usb.org/sites/default/files/midi10.pdf):
//! raw MIDI byte streams are packed into 32-bit Event Packets, several logical ports ("jacks") are multiplexed over a
//! pair of bulk endpoints, and transfers are flow-controlled so that a slow host never loses or reorders a jack's data.

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

// must come first so the logging macros are visible to every other module
mod fmt;

pub mod assembler;
pub mod bridge;
pub mod codec;
pub mod configuration;
pub mod fanout;
pub mod message;
pub mod mux;
pub mod queue;
pub mod scheduler;

pub use bridge::{Bridge, BridgeError};
pub use codec::{CableNumber, CodecError, EventPacket};
pub use configuration::{BridgeConfig, Direction, EndpointConfig, JackDescriptor, JackId};
pub use message::Message;
pub use mux::Jack;
pub use queue::Timeout;
