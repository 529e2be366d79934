//! A small, borrowed representation of complete MIDI 1.0 messages, used by the upstream API.

use crate::codec::{CodecError, DataLength, SYSEX_END, SYSEX_START, data_length};
use tinyvec::{ArrayVec, array_vec};
use wmidi::{Channel, ControlFunction, Note, U7};

/// A complete MIDI message. Every message carries its own status byte; running status is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    /// Note On/Off, Poly Pressure, Control Change, Program Change, Channel Pressure or Pitch Bend.
    ChannelVoice {
        /// Command in the high nibble, channel in the low nibble.
        status: u8,
        /// One or two data bytes, as determined by `status`.
        data: ArrayVec<[u8; 2]>,
    },
    /// System Common and System Real-Time messages other than SysEx.
    SystemCommon {
        /// 0xF1 through 0xFF, excluding 0xF0.
        status: u8,
        /// Zero to two data bytes, as determined by `status`.
        data: ArrayVec<[u8; 2]>,
    },
    /// A System Exclusive message, from [`SYSEX_START`] through [`SYSEX_END`] inclusive.
    SysEx(&'a [u8]),
}

impl<'a> Message<'a> {
    /// Classifies a complete message, validating its length against its status byte.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let (&status, data) = bytes.split_first().ok_or(CodecError::LengthMismatch {
            expected: 1,
            actual: 0,
        })?;
        match data_length(status)? {
            DataLength::Variable => {
                let Some((&SYSEX_END, body)) = data.split_last() else {
                    return Err(CodecError::SysEx);
                };
                if body.iter().all(|&b| b & 0x80 == 0) {
                    Ok(Self::SysEx(bytes))
                } else {
                    Err(CodecError::SysEx)
                }
            }
            DataLength::Fixed(n) if n == data.len() => {
                if let Some(&b) = data.iter().find(|&&b| b & 0x80 != 0) {
                    return Err(CodecError::UnexpectedStatus(b));
                }
                let mut payload = array_vec!([u8; 2]);
                payload.extend_from_slice(data);
                if status < SYSEX_START {
                    Ok(Self::ChannelVoice {
                        status,
                        data: payload,
                    })
                } else {
                    Ok(Self::SystemCommon {
                        status,
                        data: payload,
                    })
                }
            }
            DataLength::Fixed(n) => Err(CodecError::LengthMismatch {
                expected: n + 1,
                actual: bytes.len(),
            }),
        }
    }

    /// Note On.
    pub fn note_on(channel: Channel, note: Note, velocity: U7) -> Self {
        Self::channel_voice(0x90, channel, &[note as u8, u8::from(velocity)])
    }

    /// Note Off.
    pub fn note_off(channel: Channel, note: Note, velocity: U7) -> Self {
        Self::channel_voice(0x80, channel, &[note as u8, u8::from(velocity)])
    }

    /// Control Change.
    pub fn control_change(channel: Channel, function: ControlFunction, value: U7) -> Self {
        Self::channel_voice(0xB0, channel, &[u8::from(function), u8::from(value)])
    }

    /// Program Change.
    pub fn program_change(channel: Channel, program: U7) -> Self {
        Self::channel_voice(0xC0, channel, &[u8::from(program)])
    }

    fn channel_voice(command: u8, channel: Channel, data: &[u8]) -> Self {
        let mut payload = array_vec!([u8; 2]);
        payload.extend_from_slice(data);
        Self::ChannelVoice {
            status: command | channel.index(),
            data: payload,
        }
    }

    /// Number of bytes the message occupies on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::ChannelVoice { data, .. } | Self::SystemCommon { data, .. } => 1 + data.len(),
            Self::SysEx(bytes) => bytes.len(),
        }
    }

    /// Writes the message's bytes into `buf`, returning the number written.
    pub fn copy_to_slice(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CodecError::LengthMismatch {
                expected: len,
                actual: buf.len(),
            });
        }
        match self {
            Self::ChannelVoice { status, data } | Self::SystemCommon { status, data } => {
                buf[0] = *status;
                buf[1..len].copy_from_slice(data);
            }
            Self::SysEx(bytes) => buf[..len].copy_from_slice(bytes),
        }
        Ok(len)
    }
}
