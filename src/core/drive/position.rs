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

//! MSF positions and BCD/LBA conversions
//!
//! Drive commands address the disc in MSF (Minute:Second:Frame) form with
//! BCD-encoded fields, while the filesystem layer works in linear sector
//! indices (LBA). The two round-trip through a fixed 150-sector lead-in
//! offset: LBA 0 corresponds to MSF 00:02:00. Indices are signed so the
//! 150 lead-in positions below that stay addressable; they map to -150
//! through -1.

/// Convert a BCD-encoded byte to decimal.
pub fn bcd_to_dec(bcd: u8) -> u8 {
    ((bcd >> 4) * 10) + (bcd & 0x0F)
}

/// Convert a decimal value (0-99) to BCD encoding.
pub fn dec_to_bcd(dec: u8) -> u8 {
    ((dec / 10) << 4) | (dec % 10)
}

/// Sectors hidden in the lead-in before LBA 0.
pub const LEAD_IN_SECTORS: i32 = 150;

/// Sectors per second of playback time.
pub const SECTORS_PER_SECOND: i32 = 75;

/// Disc position in MSF form.
///
/// `minute`, `second` and `sector` are BCD-encoded, exactly as they travel
/// in command parameters and responses. `track` is only populated by track
/// readback (`toc()`); position commands ignore it.
///
/// # Example
///
/// ```
/// use cdrx::core::drive::position::Msf;
///
/// let pos = Msf::from_lba(16);
/// assert_eq!((pos.minute, pos.second, pos.sector), (0x00, 0x02, 0x16));
/// assert_eq!(pos.to_lba(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Msf {
    /// Minute (BCD, 0x00-0x99).
    pub minute: u8,
    /// Second (BCD, 0x00-0x59).
    pub second: u8,
    /// Sector/frame within the second (BCD, 0x00-0x74).
    pub sector: u8,
    /// Track number (BCD) when produced by track readback, else 0.
    pub track: u8,
}

impl Msf {
    /// Build a position from BCD fields.
    pub fn new(minute: u8, second: u8, sector: u8) -> Self {
        Self {
            minute,
            second,
            sector,
            track: 0,
        }
    }

    /// Convert a linear sector index to MSF, applying the lead-in offset.
    ///
    /// Negative indices down to -150 address the lead-in itself;
    /// `from_lba(-150)` is 00:00:00.
    pub fn from_lba(lba: i32) -> Self {
        let abs = lba + LEAD_IN_SECTORS;
        let minute = abs / (SECTORS_PER_SECOND * 60);
        let second = (abs / SECTORS_PER_SECOND) % 60;
        let sector = abs % SECTORS_PER_SECOND;

        Self {
            minute: dec_to_bcd(minute as u8),
            second: dec_to_bcd(second as u8),
            sector: dec_to_bcd(sector as u8),
            track: 0,
        }
    }

    /// Convert back to a linear sector index, removing the lead-in offset.
    ///
    /// Positions before 00:02:00 yield negative indices.
    pub fn to_lba(self) -> i32 {
        let minute = bcd_to_dec(self.minute) as i32;
        let second = bcd_to_dec(self.second) as i32;
        let sector = bcd_to_dec(self.sector) as i32;

        (minute * 60 + second) * SECTORS_PER_SECOND + sector - LEAD_IN_SECTORS
    }

    /// The three parameter bytes of a set-location command.
    pub fn param_bytes(self) -> [u8; 3] {
        [self.minute, self.second, self.sector]
    }
}

impl std::fmt::Display for Msf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            bcd_to_dec(self.minute),
            bcd_to_dec(self.second),
            bcd_to_dec(self.sector)
        )
    }
}
