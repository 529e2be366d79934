//! Segmentation of a raw MIDI byte stream into USB-MIDI Event Packets.
//!
//! Bytes are consumed one at a time, so an arbitrarily long System Exclusive message can be streamed through fixed
//! four-byte packets without ever being buffered whole. The last packet of a SysEx message is always tagged with one of
//! the "SysEx ends" code indexes, which lets a receiver find message boundaries without look-ahead.

use crate::codec::{
    CableNumber, CodeIndex, CodecError, DataLength, EventPacket, SYSEX_END, cin_for_status,
    data_length, is_realtime,
};

/// Where the assembler is within the message it is currently collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssemblerState {
    /// Waiting for a status byte.
    Idle,
    /// One more data byte completes the message.
    Need1,
    /// Two more data bytes complete the message.
    Need2,
    /// A Channel Voice or System Common message is ready to be flushed.
    Complete,
    /// Collecting System Exclusive data.
    InSysEx,
    /// End of Exclusive has arrived; the final chunk is ready to be flushed.
    CompleteSysEx,
}

/// Per-source state machine turning raw MIDI bytes into [`EventPacket`]s for one cable.
///
/// The assembler is `Copy` so callers can try a byte against a scratch copy and only keep the new state once the
/// resulting packet has somewhere to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysExAssembler {
    cable: CableNumber,
    state: AssemblerState,
    pending: [u8; 3],
    len: usize,
}

impl SysExAssembler {
    /// Constructs an idle [`SysExAssembler`] tagging its packets with `cable`.
    pub const fn new(cable: CableNumber) -> Self {
        Self {
            cable,
            state: AssemblerState::Idle,
            pending: [0; 3],
            len: 0,
        }
    }

    /// Current state. Between calls to [`push`](Self::push) this is never one of the `Complete` states, as completed
    /// messages are flushed immediately.
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Consumes one byte, returning a packet whenever one is complete.
    ///
    /// Data bytes that don't follow a status byte are discarded, since running status isn't supported. Status bytes
    /// which have no USB-MIDI classification are rejected and leave the state untouched.
    pub fn push(&mut self, byte: u8) -> Result<Option<EventPacket>, CodecError> {
        // real-time messages may be interleaved anywhere and don't disturb the message in progress
        if is_realtime(byte) {
            let cin = cin_for_status(byte)?;
            return Ok(Some(EventPacket::new(self.cable, cin, &[byte])));
        }

        let is_status = byte & 0x80 != 0;
        match self.state {
            AssemblerState::Idle | AssemblerState::Complete | AssemblerState::CompleteSysEx => {
                if !is_status {
                    trace!("Discarding data byte {=u8:x} received without a status byte", byte);
                    return Ok(None);
                }
                self.start(byte)?;
            }
            AssemblerState::InSysEx if byte == SYSEX_END => {
                self.append(byte);
                self.state = AssemblerState::CompleteSysEx;
            }
            _ if is_status => {
                // validate before abandoning the message in progress
                data_length(byte)?;
                warn!(
                    "Status byte {=u8:x} interrupted an incomplete message; dropping {} pending bytes",
                    byte,
                    self.len
                );
                self.start(byte)?;
            }
            AssemblerState::Need2 => {
                self.append(byte);
                self.state = AssemblerState::Need1;
            }
            AssemblerState::Need1 => {
                self.append(byte);
                self.state = AssemblerState::Complete;
            }
            AssemblerState::InSysEx => self.append(byte),
        }

        Ok(match self.state {
            AssemblerState::InSysEx if self.len == self.pending.len() => {
                Some(self.flush(CodeIndex::SysExStart))
            }
            AssemblerState::Complete => {
                let cin = cin_for_status(self.pending[0])?;
                let packet = self.flush(cin);
                self.state = AssemblerState::Idle;
                Some(packet)
            }
            AssemblerState::CompleteSysEx => {
                let packet = self.flush(CodeIndex::sysex_end(self.len));
                self.state = AssemblerState::Idle;
                Some(packet)
            }
            _ => None,
        })
    }

    fn start(&mut self, status: u8) -> Result<(), CodecError> {
        let next = match data_length(status)? {
            DataLength::Variable => AssemblerState::InSysEx,
            DataLength::Fixed(2) => AssemblerState::Need2,
            DataLength::Fixed(1) => AssemblerState::Need1,
            DataLength::Fixed(_) => AssemblerState::Complete,
        };
        self.pending[0] = status;
        self.len = 1;
        self.state = next;
        Ok(())
    }

    fn append(&mut self, byte: u8) {
        self.pending[self.len] = byte;
        self.len += 1;
    }

    fn flush(&mut self, cin: CodeIndex) -> EventPacket {
        let packet = EventPacket::new(self.cable, cin, &self.pending[..self.len]);
        trace!("Assembled packet {}", packet);
        self.len = 0;
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_packet;
    use std::{vec, vec::Vec};

    fn assembler(cable: u8) -> SysExAssembler {
        SysExAssembler::new(CableNumber::new(cable).unwrap())
    }

    fn feed(assembler: &mut SysExAssembler, bytes: &[u8]) -> Vec<[u8; 4]> {
        bytes
            .iter()
            .filter_map(|&b| assembler.push(b).unwrap())
            .map(|p| *p.as_bytes())
            .collect()
    }

    #[test]
    fn note_on() {
        let mut asm = assembler(2);
        assert_eq!(vec![[0x29, 0x91, 0x40, 0x7F]], feed(&mut asm, &[0x91, 0x40, 0x7F]));
        assert_eq!(AssemblerState::Idle, asm.state());
    }

    #[test]
    fn short_sysex() {
        let mut asm = assembler(3);
        assert_eq!(
            vec![[0x34, 0xF0, 0x01, 0x02], [0x36, 0x03, 0xF7, 0x00]],
            feed(&mut asm, &[0xF0, 0x01, 0x02, 0x03, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn empty_sysex() {
        let mut asm = assembler(0);
        assert_eq!(vec![[0x06, 0xF0, 0xF7, 0x00]], feed(&mut asm, &[0xF0, 0xF7]));
    }

    #[test]
    fn sysex_of_any_length_is_reconstructed() {
        for len in 2..48_usize {
            let mut message = Vec::with_capacity(len);
            message.push(0xF0);
            message.extend((0..len.saturating_sub(2)).map(|i| (i % 0x80) as u8));
            message.push(0xF7);

            let mut asm = assembler(5);
            let packets = feed(&mut asm, &message);
            let (last, init) = packets.split_last().unwrap();

            for packet in init {
                assert_eq!(0x54, packet[0], "Expected SysEx start/continue for length {len}");
            }
            assert!(
                matches!(last[0], 0x55 | 0x56 | 0x57),
                "Expected SysEx end for length {len}"
            );

            let reconstructed: Vec<u8> = packets
                .iter()
                .flat_map(|p| decode_packet(p).unwrap().payload().to_vec())
                .collect();
            assert_eq!(message, reconstructed, "Expected left but got right");
        }
    }

    #[test]
    fn data_without_status_is_discarded() {
        let mut asm = assembler(0);
        // the second note relies on running status, which isn't supported
        assert_eq!(
            vec![[0x09, 0x90, 0x40, 0x7F]],
            feed(&mut asm, &[0x41, 0x90, 0x40, 0x7F, 0x41, 0x7F])
        );
    }

    #[test]
    fn realtime_is_interleaved() {
        let mut asm = assembler(1);
        assert_eq!(
            vec![
                [0x15, 0xF8, 0x00, 0x00],
                [0x14, 0xF0, 0x01, 0x02],
                [0x15, 0xF7, 0x00, 0x00],
            ],
            feed(&mut asm, &[0xF0, 0x01, 0xF8, 0x02, 0xF7])
        );

        let mut asm = assembler(1);
        assert_eq!(
            vec![[0x15, 0xFE, 0x00, 0x00], [0x1B, 0xB0, 0x07, 0x64]],
            feed(&mut asm, &[0xB0, 0x07, 0xFE, 0x64])
        );
    }

    #[test]
    fn status_interrupts_incomplete_message() {
        let mut asm = assembler(0);
        assert_eq!(
            vec![[0x0B, 0xB0, 0x07, 0x64]],
            feed(&mut asm, &[0x90, 0x40, 0xB0, 0x07, 0x64])
        );

        let mut asm = assembler(0);
        assert_eq!(
            vec![[0x0C, 0xC1, 0x05, 0x00]],
            feed(&mut asm, &[0xF0, 0x01, 0xC1, 0x05])
        );
    }

    #[test]
    fn system_common() {
        let mut asm = assembler(4);
        assert_eq!(vec![[0x42, 0xF3, 0x04, 0x00]], feed(&mut asm, &[0xF3, 0x04]));
        assert_eq!(vec![[0x43, 0xF2, 0x10, 0x02]], feed(&mut asm, &[0xF2, 0x10, 0x02]));
        assert_eq!(vec![[0x45, 0xF6, 0x00, 0x00]], feed(&mut asm, &[0xF6]));
        assert_eq!(vec![[0x45, 0xF7, 0x00, 0x00]], feed(&mut asm, &[0xF7]));
    }

    #[test]
    fn unsupported_status_is_rejected() {
        let mut asm = assembler(0);
        assert_eq!(Err(CodecError::UnsupportedStatus(0xF4)), asm.push(0xF4));
        assert_eq!(AssemblerState::Idle, asm.state());
        assert_eq!(Err(CodecError::UnsupportedStatus(0xFD)), asm.push(0xFD));

        // a bad status byte doesn't derail the message in progress
        asm.push(0x90).unwrap();
        assert_eq!(Err(CodecError::UnsupportedStatus(0xF5)), asm.push(0xF5));
        assert_eq!(AssemblerState::Need2, asm.state());
        asm.push(0x40).unwrap();
        assert_eq!(
            Some([0x09, 0x90, 0x40, 0x7F]),
            asm.push(0x7F).unwrap().map(|p| *p.as_bytes())
        );
    }
}
