//! Tables and conversions between raw MIDI bytes and USB-MIDI Event Packets, as described in section 4 of the
//! [USB Device Class Definition for MIDI Devices 1.0](https://www.usb.org/document-library/usb-midi-devices-10).
//!
//! Every Event Packet is exactly 32 bits long: a header byte carrying the [`CableNumber`] in its high nibble and the
//! [`CodeIndex`] in its low nibble, followed by up to three bytes of MIDI payload. Payload bytes beyond the length
//! implied by the [`CodeIndex`] are padding.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use thiserror::Error;

/// Opens a System Exclusive message.
pub const SYSEX_START: u8 = 0xF0;
/// Closes a System Exclusive message (End of Exclusive).
pub const SYSEX_END: u8 = 0xF7;

/// Reasons a byte or packet can't be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// A data byte (high bit clear) was supplied where a status byte was required.
    #[error("{0:#04x} is not a status byte")]
    NotAStatusByte(u8),
    /// The status byte is undefined by MIDI 1.0 (e.g., 0xF4) and has no USB-MIDI classification.
    #[error("status byte {0:#04x} is not supported")]
    UnsupportedStatus(u8),
    /// A status byte (high bit set) was found where a data byte was required.
    #[error("status byte {0:#04x} found in place of a data byte")]
    UnexpectedStatus(u8),
    /// Code Index Numbers 0x0 and 0x1 are reserved and carry no MIDI payload.
    #[error("code index number {0:#03x} is reserved")]
    ReservedCodeIndex(u8),
    /// The message is longer or shorter than its status byte allows.
    #[error("expected {expected} bytes but got {actual}")]
    LengthMismatch {
        /// Length implied by the status byte, including the status byte itself.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// Cable numbers occupy four bits.
    #[error("cable number {0} is out of range")]
    InvalidCable(u8),
    /// System Exclusive messages are variable length and must go through the
    /// [`SysExAssembler`][crate::assembler::SysExAssembler].
    #[error("system exclusive messages must be segmented")]
    SysEx,
}

/// A 4-bit tag identifying which logical jack an Event Packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CableNumber(u8);

impl CableNumber {
    /// Number of distinct cables addressable by a packet header.
    pub const COUNT: usize = 16;

    /// Constructs a [`CableNumber`], rejecting values that don't fit in four bits.
    pub const fn new(cable: u8) -> Result<Self, CodecError> {
        if cable < Self::COUNT as u8 {
            Ok(Self(cable))
        } else {
            Err(CodecError::InvalidCable(cable))
        }
    }

    /// Extracts the cable number from a packet header byte.
    pub const fn from_header(header: u8) -> Self {
        Self(header >> 4)
    }

    /// Returns the cable number as a table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the cable that follows this one, wrapping from 15 back to 0.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % Self::COUNT as u8)
    }
}

impl From<CableNumber> for u8 {
    fn from(cable: CableNumber) -> Self {
        cable.0
    }
}

/// Code Index Number: classifies the payload of an Event Packet (USB-MIDI 1.0, table 4-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CodeIndex {
    /// Reserved for future extensions.
    Misc = 0x0,
    /// Reserved for future expansion.
    CableEvent = 0x1,
    /// Two-byte System Common message, e.g. MTC Quarter Frame or Song Select.
    SystemCommon2 = 0x2,
    /// Three-byte System Common message, e.g. Song Position Pointer.
    SystemCommon3 = 0x3,
    /// SysEx starts or continues; all three payload bytes are significant.
    SysExStart = 0x4,
    /// Single-byte System Common or Real-Time message, or SysEx ending with one byte.
    SystemCommon1 = 0x5,
    /// SysEx ends with the following two bytes.
    SysExEnd2 = 0x6,
    /// SysEx ends with the following three bytes.
    SysExEnd3 = 0x7,
    /// Note Off.
    NoteOff = 0x8,
    /// Note On.
    NoteOn = 0x9,
    /// Polyphonic Key Pressure.
    PolyPressure = 0xA,
    /// Control Change.
    ControlChange = 0xB,
    /// Program Change.
    ProgramChange = 0xC,
    /// Channel Pressure.
    ChannelPressure = 0xD,
    /// Pitch Bend Change.
    PitchBend = 0xE,
    /// A single unparsed byte.
    SingleByte = 0xF,
}

impl CodeIndex {
    /// SysEx ending with a single byte shares its number with single-byte System Common messages.
    pub const SYSEX_END_1: Self = Self::SystemCommon1;

    /// Extracts the Code Index Number from a packet header byte.
    pub fn from_header(header: u8) -> Self {
        // every 4-bit value is a variant, so this can't fail
        Self::from_u8(header & 0x0F).unwrap_or(Self::Misc)
    }

    /// Number of significant payload bytes, or [`CodecError::ReservedCodeIndex`] for 0x0 and 0x1.
    pub fn payload_len(self) -> Result<usize, CodecError> {
        const PAYLOAD_LEN: [usize; 16] = [0, 0, 2, 3, 3, 1, 2, 3, 3, 3, 3, 3, 2, 2, 3, 1];
        match self {
            Self::Misc | Self::CableEvent => Err(CodecError::ReservedCodeIndex(self as u8)),
            _ => Ok(PAYLOAD_LEN[self as usize]),
        }
    }

    /// The Code Index Number which terminates a SysEx message whose final chunk holds `len` bytes.
    pub(crate) fn sysex_end(len: usize) -> Self {
        match len {
            1 => Self::SYSEX_END_1,
            2 => Self::SysExEnd2,
            _ => Self::SysExEnd3,
        }
    }
}

/// How many data bytes follow a status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataLength {
    /// The message is complete after this many data bytes (0 to 2).
    Fixed(usize),
    /// System Exclusive: data continues until [`SYSEX_END`].
    Variable,
}

/// Returns the number of data bytes which follow `status`.
pub fn data_length(status: u8) -> Result<DataLength, CodecError> {
    if status & 0x80 == 0 {
        return Err(CodecError::NotAStatusByte(status));
    }
    match status & 0xF0 {
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => Ok(DataLength::Fixed(2)),
        0xC0 | 0xD0 => Ok(DataLength::Fixed(1)),
        _ => match status {
            SYSEX_START => Ok(DataLength::Variable),
            // MTC Quarter Frame, Song Select
            0xF1 | 0xF3 => Ok(DataLength::Fixed(1)),
            // Song Position Pointer
            0xF2 => Ok(DataLength::Fixed(2)),
            // Tune Request, End of Exclusive, and the Real-Time messages
            0xF6 | SYSEX_END | 0xF8 | 0xFA | 0xFB | 0xFC | 0xFE | 0xFF => Ok(DataLength::Fixed(0)),
            _ => Err(CodecError::UnsupportedStatus(status)),
        },
    }
}

/// Returns the [`CodeIndex`] for a complete, non-segmented message beginning with `status`.
///
/// Channel Voice messages map to the high nibble of their status byte. Unrecognized status bytes are rejected
/// rather than tagged with a default.
pub fn cin_for_status(status: u8) -> Result<CodeIndex, CodecError> {
    match status {
        0x80..=0xEF => Ok(CodeIndex::from_header(status >> 4)),
        SYSEX_START => Ok(CodeIndex::SysExStart),
        0xF1 | 0xF3 => Ok(CodeIndex::SystemCommon2),
        0xF2 => Ok(CodeIndex::SystemCommon3),
        0xF6 | SYSEX_END | 0xF8 | 0xFA | 0xFB | 0xFC | 0xFE | 0xFF => Ok(CodeIndex::SystemCommon1),
        0x00..=0x7F => Err(CodecError::NotAStatusByte(status)),
        _ => Err(CodecError::UnsupportedStatus(status)),
    }
}

/// Returns `true` for System Real-Time status bytes, which may appear anywhere in a stream, even between the
/// bytes of another message.
pub fn is_realtime(byte: u8) -> bool {
    byte >= 0xF8
}

/// A 32-bit USB-MIDI Event Packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventPacket([u8; 4]);

impl EventPacket {
    /// Every Event Packet is four bytes long.
    pub const SIZE: usize = 4;

    /// Builds a packet from its parts; `payload` holds at most three bytes and is zero-padded.
    pub(crate) fn new(cable: CableNumber, cin: CodeIndex, payload: &[u8]) -> Self {
        let mut bytes = [u8::from(cable) << 4 | cin as u8, 0, 0, 0];
        let len = payload.len().min(3);
        bytes[1..1 + len].copy_from_slice(&payload[..len]);
        Self(bytes)
    }

    /// Packs a complete Channel Voice or System Common message (status byte included) into a packet.
    pub fn encode(cable: CableNumber, message: &[u8]) -> Result<Self, CodecError> {
        let status = *message.first().ok_or(CodecError::LengthMismatch {
            expected: 1,
            actual: 0,
        })?;
        let expected = match data_length(status)? {
            DataLength::Fixed(n) => n + 1,
            DataLength::Variable => return Err(CodecError::SysEx),
        };
        if message.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected,
                actual: message.len(),
            });
        }
        Ok(Self::new(cable, cin_for_status(status)?, message))
    }

    /// The cable this packet is addressed to.
    pub fn cable(&self) -> CableNumber {
        CableNumber::from_header(self.0[0])
    }

    /// The packet's Code Index Number.
    pub fn code_index(&self) -> CodeIndex {
        CodeIndex::from_header(self.0[0])
    }

    /// The raw wire bytes.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for EventPacket {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventPacket {
    fn format(&self, fmt: defmt::Formatter) {
        // only the bytes the code index declares significant are shown
        let len = self.code_index().payload_len().unwrap_or(3);
        defmt::write!(fmt, "{=u8:X} | {=[u8]:X}", self.0[0], &self.0[1..1 + len]);
    }
}

/// The MIDI content of a decoded Event Packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodedPacket {
    /// Cable the packet was addressed to.
    pub cable: CableNumber,
    /// Classification of the payload.
    pub cin: CodeIndex,
    payload: [u8; 3],
    len: usize,
}

impl DecodedPacket {
    /// The significant payload bytes; padding is excluded.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

/// Unpacks an Event Packet, discarding padding. Packets with a reserved [`CodeIndex`] are rejected.
pub fn decode_packet(bytes: &[u8; 4]) -> Result<DecodedPacket, CodecError> {
    let packet = EventPacket::from(*bytes);
    let cin = packet.code_index();
    let len = cin.payload_len()?;
    let mut payload = [0; 3];
    payload[..len].copy_from_slice(&bytes[1..1 + len]);
    Ok(DecodedPacket {
        cable: packet.cable(),
        cin,
        payload,
        len,
    })
}
