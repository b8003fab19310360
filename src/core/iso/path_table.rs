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

//! ISO9660 path table
//!
//! The path table lists every directory on the volume with only a link to
//! its parent, no child lists. Entries are numbered from 1; the root is
//! entry 1 and is its own parent. Resolving a directory path therefore
//! means scanning all entries and reconstructing each candidate's absolute
//! path by walking parent links up to the root.
//!
//! On-disc entry layout:
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 1    | Name length (1 for the root)           |
//! | 1      | 1    | Extended attribute record length       |
//! | 2      | 4    | Directory start LBA                    |
//! | 6      | 2    | Parent entry number (1-based)          |
//! | 8      | n    | Name, plus a pad byte if n is odd      |

use crate::core::error::IsoError;
use crate::core::iso::{read_u16_le, read_u32_le};

/// One directory known to the volume.
#[derive(Debug, Clone)]
pub(crate) struct PathTableEntry {
    pub name: String,
    pub lba: u32,
    /// 1-based entry number of the parent; the root points at itself.
    pub parent: u16,
}

/// The parsed type-L path table.
#[derive(Debug, Clone)]
pub(crate) struct PathTable {
    entries: Vec<PathTableEntry>,
}

impl PathTable {
    /// Parse `size` bytes of raw path table data.
    pub fn parse(buf: &[u8], size: usize) -> Result<Self, IsoError> {
        let size = size.min(buf.len());
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos + 8 <= size {
            let name_len = buf[pos] as usize;
            if name_len == 0 {
                break;
            }
            let lba = read_u32_le(buf, pos + 2).ok_or(IsoError::InvalidFilesystem)?;
            let parent = read_u16_le(buf, pos + 6).ok_or(IsoError::InvalidFilesystem)?;

            let name_end = pos + 8 + name_len;
            if name_end > size {
                return Err(IsoError::InvalidFilesystem);
            }
            let raw = &buf[pos + 8..name_end];
            // The root's name is a single control byte.
            let name = if raw == [0x00] || raw == [0x01] {
                String::new()
            } else {
                String::from_utf8_lossy(raw).into_owned()
            };

            entries.push(PathTableEntry { name, lba, parent });
            pos = name_end + (name_len & 1);
        }

        if entries.is_empty() {
            return Err(IsoError::InvalidFilesystem);
        }
        Ok(Self { entries })
    }

    /// Number of directories on the volume.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry by its 1-based number.
    pub fn entry(&self, number: usize) -> Option<&PathTableEntry> {
        number.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Absolute path of an entry, reconstructed by walking parent links.
    ///
    /// The root resolves to `\`; nested entries to `\A\B`. Returns `None`
    /// for an unknown number or a malformed table whose parent links
    /// never reach the root.
    pub fn resolve_path(&self, number: usize) -> Option<String> {
        let mut segments: Vec<&str> = Vec::new();
        let mut current = number;

        for _ in 0..=self.entries.len() {
            if current <= 1 {
                let mut path = String::from("\\");
                for (i, segment) in segments.iter().rev().enumerate() {
                    if i > 0 {
                        path.push('\\');
                    }
                    path.push_str(segment);
                }
                return Some(path);
            }
            let entry = self.entry(current)?;
            segments.push(&entry.name);
            current = entry.parent as usize;
        }
        None
    }

    /// 1-based entry number of the directory at `path` (normalized,
    /// backslash-separated, leading separator). Case-insensitive.
    pub fn find_dir(&self, path: &str) -> Option<usize> {
        for number in 1..=self.entries.len() {
            if let Some(candidate) = self.resolve_path(number) {
                if candidate.eq_ignore_ascii_case(path) {
                    return Some(number);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_entry(buf: &mut Vec<u8>, name: &[u8], lba: u32, parent: u16) {
        buf.push(name.len() as u8);
        buf.push(0);
        buf.extend_from_slice(&lba.to_le_bytes());
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(name);
        if name.len() % 2 == 1 {
            buf.push(0);
        }
    }

    fn sample_table() -> PathTable {
        // \ (root), \DATA, \DATA\MAPS, \SOUND
        let mut buf = Vec::new();
        push_entry(&mut buf, &[0x00], 22, 1);
        push_entry(&mut buf, b"DATA", 25, 1);
        push_entry(&mut buf, b"SOUND", 30, 1);
        push_entry(&mut buf, b"MAPS", 40, 2);
        let size = buf.len();
        PathTable::parse(&buf, size).unwrap()
    }

    #[test]
    fn test_parse_counts_entries() {
        let table = sample_table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.entry(1).unwrap().lba, 22);
        assert_eq!(table.entry(4).unwrap().parent, 2);
        assert!(table.entry(5).is_none());
        assert!(table.entry(0).is_none());
    }

    #[test]
    fn test_resolve_walks_parents_to_root() {
        let table = sample_table();
        assert_eq!(table.resolve_path(1).unwrap(), "\\");
        assert_eq!(table.resolve_path(2).unwrap(), "\\DATA");
        assert_eq!(table.resolve_path(4).unwrap(), "\\DATA\\MAPS");
    }

    #[test]
    fn test_find_dir_is_case_insensitive() {
        let table = sample_table();
        assert_eq!(table.find_dir("\\data\\maps"), Some(4));
        assert_eq!(table.find_dir("\\DATA\\MAPS"), Some(4));
        assert_eq!(table.find_dir("\\MAPS"), None);
    }

    #[test]
    fn test_cyclic_parent_links_do_not_hang() {
        let mut buf = Vec::new();
        push_entry(&mut buf, &[0x00], 22, 1);
        push_entry(&mut buf, b"A", 25, 3);
        push_entry(&mut buf, b"B", 26, 2);
        let size = buf.len();
        let table = PathTable::parse(&buf, size).unwrap();
        assert_eq!(table.resolve_path(2), None);
        assert_eq!(table.find_dir("\\A"), None);
    }

    #[test]
    fn test_empty_table_is_invalid() {
        assert!(PathTable::parse(&[0u8; 64], 64).is_err());
    }
}
