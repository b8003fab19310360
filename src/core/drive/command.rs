// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command opcodes and their protocol metadata
//!
//! Per-command behavior (parameter length, which responses carry a status
//! byte, whether a background completion follows, whether the parameter is
//! really a preceding seek) is data, not code: one static table indexed by
//! opcode drives the protocol engine. Branching on individual commands at
//! call sites is deliberately avoided.

use bitflags::bitflags;

bitflags! {
    /// Static protocol metadata bits for one command.
    ///
    /// The low two bits are not flags but a 2-bit field holding the required
    /// parameter length (0-3 bytes); use [`Opcode::param_len`] to read it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        /// First byte of the acknowledge response is the drive status.
        const STATUS = 1 << 2;
        /// First byte of the completion response is the drive status.
        const COMPLETE_STATUS = 1 << 3;
        /// Command triggers a background completion interrupt.
        const BLOCKING = 1 << 4;
        /// The parameter may be omitted.
        const OPTIONAL_PARAM = 1 << 5;
        /// The parameter shall be sent as a separate preceding SetLoc.
        const SETLOC = 1 << 6;
    }
}

const P1: u8 = 1;
const P2: u8 = 2;
const P3: u8 = 3;
const ST: u8 = CommandFlags::STATUS.bits();
const CS: u8 = CommandFlags::COMPLETE_STATUS.bits();
const BL: u8 = CommandFlags::BLOCKING.bits();
const OPT: u8 = CommandFlags::OPTIONAL_PARAM.bits();
const SL: u8 = CommandFlags::SETLOC.bits();

// Indexed by opcode byte; 0x00, 0x17 and 0x18 are unassigned.
const COMMAND_FLAGS: [u8; 31] = [
    0,
    ST,                // Nop
    ST | P3,           // SetLoc
    ST | OPT | P1,     // Play
    ST,                // Forward
    ST,                // Backward
    ST | SL,           // ReadN
    ST | CS | BL,      // Standby
    ST | CS | BL,      // Stop
    ST | CS | BL,      // Pause
    ST | CS | BL,      // Init
    ST,                // Mute
    ST,                // Demute
    ST | P2,           // SetFilter
    ST | P1,           // SetMode
    ST,                // GetParam
    0,                 // GetLocL
    0,                 // GetLocP
    ST | CS | BL | P1, // SetSession
    ST,                // GetTN
    ST | P1,           // GetTD
    ST | CS | BL | SL, // SeekL
    ST | CS | BL | SL, // SeekP
    0,
    0,
    P1,           // Test
    ST | CS | BL, // GetId
    ST | SL,      // ReadS
    ST,           // Reset
    ST | BL | P2, // GetQ
    ST | CS | BL, // ReadToc
];

/// Drive command opcodes (bit-exact wire values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// No operation; refreshes the cached drive status.
    Nop = 0x01,
    /// Set the seek target position (3 BCD parameter bytes).
    SetLoc = 0x02,
    /// Start audio playback, optionally from a given track.
    Play = 0x03,
    /// Fast-forward audio playback.
    Forward = 0x04,
    /// Rewind audio playback.
    Backward = 0x05,
    /// Start reading data sectors with hardware retry.
    ReadN = 0x06,
    /// Spin up and enter standby.
    Standby = 0x07,
    /// Stop the spindle motor.
    Stop = 0x08,
    /// Pause reading or playback at the current position.
    Pause = 0x09,
    /// Initialize the drive.
    Init = 0x0A,
    /// Mute audio output.
    Mute = 0x0B,
    /// Restore audio output.
    Demute = 0x0C,
    /// Set the XA ADPCM file/channel filter (2 parameter bytes).
    SetFilter = 0x0D,
    /// Set the drive mode byte.
    SetMode = 0x0E,
    /// Read back mode and filter settings.
    GetParam = 0x0F,
    /// Read the logical position from the most recent data sector header.
    GetLocL = 0x10,
    /// Read the physical position from subchannel Q.
    GetLocP = 0x11,
    /// Switch to another session on multi-session media.
    SetSession = 0x12,
    /// Get the first and last track numbers.
    GetTN = 0x13,
    /// Get the start position of a track.
    GetTD = 0x14,
    /// Seek to the set position in data mode.
    SeekL = 0x15,
    /// Seek to the set position in audio mode.
    SeekP = 0x16,
    /// Diagnostics; the subfunction byte selects the probe.
    Test = 0x19,
    /// Identify the disc and region.
    GetId = 0x1A,
    /// Start streaming sectors without hardware retry.
    ReadS = 0x1B,
    /// Reset the controller.
    Reset = 0x1C,
    /// Read raw subchannel Q data.
    GetQ = 0x1D,
    /// Re-read the table of contents.
    ReadToc = 0x1E,
}

impl Opcode {
    /// Decode a raw command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::Nop,
            0x02 => Self::SetLoc,
            0x03 => Self::Play,
            0x04 => Self::Forward,
            0x05 => Self::Backward,
            0x06 => Self::ReadN,
            0x07 => Self::Standby,
            0x08 => Self::Stop,
            0x09 => Self::Pause,
            0x0A => Self::Init,
            0x0B => Self::Mute,
            0x0C => Self::Demute,
            0x0D => Self::SetFilter,
            0x0E => Self::SetMode,
            0x0F => Self::GetParam,
            0x10 => Self::GetLocL,
            0x11 => Self::GetLocP,
            0x12 => Self::SetSession,
            0x13 => Self::GetTN,
            0x14 => Self::GetTD,
            0x15 => Self::SeekL,
            0x16 => Self::SeekP,
            0x19 => Self::Test,
            0x1A => Self::GetId,
            0x1B => Self::ReadS,
            0x1C => Self::Reset,
            0x1D => Self::GetQ,
            0x1E => Self::ReadToc,
            _ => return None,
        })
    }

    /// Protocol metadata for this command.
    pub fn flags(self) -> CommandFlags {
        CommandFlags::from_bits_retain(COMMAND_FLAGS[self as usize])
    }

    /// Required parameter length in bytes (0-3).
    pub fn param_len(self) -> usize {
        (COMMAND_FLAGS[self as usize] & 0b11) as usize
    }
}

bitflags! {
    /// Drive status byte, as carried in the first response byte of most
    /// commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveStatus: u8 {
        /// A command error occurred.
        const ERROR = 0x01;
        /// Spindle motor is on.
        const STANDBY = 0x02;
        /// The last seek failed.
        const SEEK_ERROR = 0x04;
        /// Disc identification failed.
        const ID_ERROR = 0x08;
        /// The lid is (or has been) open.
        const SHELL_OPEN = 0x10;
        /// A data read is in progress.
        const READING = 0x20;
        /// A seek is in progress.
        const SEEKING = 0x40;
        /// Audio playback is in progress.
        const PLAYING = 0x80;
    }
}

bitflags! {
    /// Drive mode byte, set via the set-mode command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveMode: u8 {
        /// Allow CD-DA sectors to play.
        const CDDA = 0x01;
        /// Pause automatically at the end of a track.
        const AUTO_PAUSE = 0x02;
        /// Generate position reports during playback.
        const REPORT = 0x04;
        /// Apply the XA file/channel filter.
        const SUBFILTER = 0x08;
        /// Ignore sector size and set-location position.
        const IGNORE = 0x10;
        /// Transfer 2340-byte whole sectors instead of 2048-byte data.
        const WHOLE_SECTOR = 0x20;
        /// Decode XA ADPCM audio sectors.
        const XA_ADPCM = 0x40;
        /// Read at double speed.
        const DOUBLE_SPEED = 0x80;
    }
}

/// User-data transfer size for a drive mode.
pub fn sector_size_for(mode: DriveMode) -> usize {
    if mode.contains(DriveMode::WHOLE_SECTOR) {
        crate::core::drive::WHOLE_SECTOR_SIZE
    } else {
        crate::core::drive::DATA_SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_wire_values_are_bit_exact() {
        assert_eq!(Opcode::Nop as u8, 0x01);
        assert_eq!(Opcode::SetLoc as u8, 0x02);
        assert_eq!(Opcode::ReadN as u8, 0x06);
        assert_eq!(Opcode::Pause as u8, 0x09);
        assert_eq!(Opcode::Init as u8, 0x0A);
        assert_eq!(Opcode::SetMode as u8, 0x0E);
        assert_eq!(Opcode::GetLocL as u8, 0x10);
        assert_eq!(Opcode::SetSession as u8, 0x12);
        assert_eq!(Opcode::SeekL as u8, 0x15);
        assert_eq!(Opcode::Test as u8, 0x19);
        assert_eq!(Opcode::GetId as u8, 0x1A);
        assert_eq!(Opcode::ReadS as u8, 0x1B);
        assert_eq!(Opcode::ReadToc as u8, 0x1E);
    }

    #[test]
    fn test_from_byte_round_trips_and_rejects_gaps() {
        for byte in 0x01..=0x1Eu8 {
            match Opcode::from_byte(byte) {
                Some(op) => assert_eq!(op as u8, byte),
                None => assert!(byte == 0x17 || byte == 0x18),
            }
        }
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x1F), None);
    }

    #[test]
    fn test_param_lengths() {
        assert_eq!(Opcode::Nop.param_len(), 0);
        assert_eq!(Opcode::SetLoc.param_len(), 3);
        assert_eq!(Opcode::SetFilter.param_len(), 2);
        assert_eq!(Opcode::SetMode.param_len(), 1);
        assert_eq!(Opcode::SetSession.param_len(), 1);
        assert_eq!(Opcode::GetTD.param_len(), 1);
        assert_eq!(Opcode::Test.param_len(), 1);
        assert_eq!(Opcode::GetQ.param_len(), 2);
    }

    #[test]
    fn test_blocking_command_set() {
        let blocking = [
            Opcode::Standby,
            Opcode::Stop,
            Opcode::Pause,
            Opcode::Init,
            Opcode::SetSession,
            Opcode::SeekL,
            Opcode::SeekP,
            Opcode::GetId,
            Opcode::GetQ,
            Opcode::ReadToc,
        ];
        for op in blocking {
            assert!(op.flags().contains(CommandFlags::BLOCKING), "{:?}", op);
        }
        for op in [Opcode::Nop, Opcode::ReadN, Opcode::SetMode, Opcode::GetTN] {
            assert!(!op.flags().contains(CommandFlags::BLOCKING), "{:?}", op);
        }
    }

    #[test]
    fn test_setloc_routed_commands() {
        for op in [Opcode::ReadN, Opcode::ReadS, Opcode::SeekL, Opcode::SeekP] {
            assert!(op.flags().contains(CommandFlags::SETLOC), "{:?}", op);
        }
        assert!(!Opcode::SetLoc.flags().contains(CommandFlags::SETLOC));
    }

    #[test]
    fn test_position_readback_carries_no_status() {
        assert!(!Opcode::GetLocL.flags().contains(CommandFlags::STATUS));
        assert!(!Opcode::GetLocP.flags().contains(CommandFlags::STATUS));
    }

    #[test]
    fn test_sector_size_follows_mode() {
        assert_eq!(sector_size_for(DriveMode::DOUBLE_SPEED), 2048);
        assert_eq!(
            sector_size_for(DriveMode::DOUBLE_SPEED | DriveMode::WHOLE_SECTOR),
            2340
        );
    }
}
