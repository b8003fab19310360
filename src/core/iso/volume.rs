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

//! ISO9660 primary volume descriptor
//!
//! The descriptor occupies one full sector. Only the fields the driver
//! needs are pulled out: the volume label, the type-L (little-endian) path
//! table location and size, and the embedded root directory record.
//!
//! | Offset | Size | Field                               |
//! |--------|------|-------------------------------------|
//! | 1      | 5    | Magic, always `CD001`               |
//! | 40     | 32   | Volume identifier (label)           |
//! | 132    | 4    | Path table size in bytes (LE copy)  |
//! | 140    | 4    | Type-L path table LBA               |
//! | 156    | 34   | Root directory record               |

use crate::core::error::IsoError;
use crate::core::iso::{read_u32_le, DESCRIPTOR_MAGIC};

/// Fields extracted from the primary volume descriptor.
#[derive(Debug, Clone)]
pub(crate) struct VolumeDescriptor {
    pub volume_id: [u8; 32],
    pub path_table_size: u32,
    pub path_table_lba: u32,
    pub root_lba: u32,
    pub root_size: u32,
}

impl VolumeDescriptor {
    /// Parse a descriptor sector, validating the magic string.
    pub fn parse(sector: &[u8]) -> Result<Self, IsoError> {
        if sector.len() < 190 || &sector[1..6] != DESCRIPTOR_MAGIC {
            return Err(IsoError::InvalidFilesystem);
        }

        let path_table_size = read_u32_le(sector, 132).ok_or(IsoError::InvalidFilesystem)?;
        let path_table_lba = read_u32_le(sector, 140).ok_or(IsoError::InvalidFilesystem)?;
        let root_lba = read_u32_le(sector, 158).ok_or(IsoError::InvalidFilesystem)?;
        let root_size = read_u32_le(sector, 166).ok_or(IsoError::InvalidFilesystem)?;

        if path_table_size == 0 {
            return Err(IsoError::InvalidFilesystem);
        }

        let mut volume_id = [0u8; 32];
        volume_id.copy_from_slice(&sector[40..72]);

        Ok(Self {
            volume_id,
            path_table_size,
            path_table_lba,
            root_lba,
            root_size,
        })
    }

    /// Volume label with trailing padding removed.
    pub fn label(&self) -> String {
        let end = self
            .volume_id
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.volume_id[..end]).into_owned()
    }
}
