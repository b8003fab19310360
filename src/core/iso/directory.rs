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

//! ISO9660 directory records
//!
//! A directory's listing is a packed run of variable-length records. A
//! record never straddles a sector boundary; the mastering tool pads the
//! sector tail with zeroes instead, so a zero length byte means "skip to
//! the next sector boundary", not "end of listing". True end is the
//! directory's declared total length, carried by the very first record
//! (the directory's own `.` entry).
//!
//! Record layout (name at offset 33):
//!
//! | Offset | Size | Field                                 |
//! |--------|------|---------------------------------------|
//! | 0      | 1    | Record length                         |
//! | 2      | 8    | Extent LBA (LE copy, then BE copy)    |
//! | 10     | 8    | Extent size (LE copy, then BE copy)   |
//! | 18     | 7    | Recording date                        |
//! | 25     | 1    | Flags, bit 1 marks a directory        |
//! | 32     | 1    | Identifier length                     |
//! | 33     | n    | Identifier                            |

use crate::core::iso::read_u32_le;

/// Byte offset of the identifier within a record.
const NAME_OFFSET: usize = 33;
/// Flag bit marking a record as a directory.
pub(crate) const FLAG_DIRECTORY: u8 = 0x02;

/// A directory record viewed in place.
pub(crate) struct RawRecord<'a> {
    pub length: usize,
    pub lba: u32,
    pub size: u32,
    pub flags: u8,
    pub name: &'a [u8],
}

/// Parse the record at `pos`, if one is there.
///
/// Returns `None` at a zero pad byte or any truncated record; callers
/// treat that as "skip or stop" per the padding rule above.
pub(crate) fn record_at(buf: &[u8], pos: usize) -> Option<RawRecord<'_>> {
    let length = *buf.get(pos)? as usize;
    if length < NAME_OFFSET {
        return None;
    }
    let lba = read_u32_le(buf, pos + 2)?;
    let size = read_u32_le(buf, pos + 10)?;
    let flags = *buf.get(pos + 25)?;
    let name_len = *buf.get(pos + 32)? as usize;
    let name = buf.get(pos + NAME_OFFSET..pos + NAME_OFFSET + name_len)?;
    Some(RawRecord {
        length,
        lba,
        size,
        flags,
        name,
    })
}

/// Skip sector-tail padding: while the cursor sits on a zero byte, snap it
/// to the next sector boundary.
pub(crate) fn skip_padding(buf: &[u8], len: usize, mut pos: usize) -> usize {
    while pos < len && buf.get(pos).copied() == Some(0) {
        pos = (pos & !0x7FF) + 0x800;
    }
    pos
}

/// Find a file record by exact (case-insensitive) name.
///
/// Directory records are skipped; only files carry version suffixes and
/// only files are searchable by this path.
pub(crate) fn find_file(data: &[u8], len: usize, name: &str) -> Option<(u32, u32)> {
    let wanted = name.as_bytes();
    let len = len.min(data.len());
    let mut pos = 0;

    loop {
        pos = skip_padding(data, len, pos);
        if pos >= len {
            return None;
        }
        let record = record_at(data, pos)?;
        if record.flags & FLAG_DIRECTORY == 0 && record.name.eq_ignore_ascii_case(wanted) {
            return Some((record.lba, record.size));
        }
        pos += record.length;
    }
}

/// One entry yielded while iterating a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Identifier; files carry a `;version` suffix, directories never do.
    /// The `.`/`..` control entries are synthesized as text.
    pub name: String,
    /// First sector of the entry's extent.
    pub lba: u32,
    /// Extent size in bytes.
    pub size: u32,
    pub is_dir: bool,
}

/// Iterator over a snapshot of one directory's listing.
///
/// The snapshot is taken at [`open_dir`](crate::core::iso::IsoFs::open_dir)
/// time, so later lookups in other directories (which evict the single
/// cache slot) leave an open reader intact. Root listings omit the
/// `.`/`..` control entries; all other listings start with them.
pub struct DirReader {
    data: Vec<u8>,
    len: usize,
    pos: usize,
}

impl DirReader {
    pub(crate) fn new(data: Vec<u8>, len: usize, skip_dot_entries: bool) -> Self {
        let len = len.min(data.len());
        let mut reader = Self { data, len, pos: 0 };
        if skip_dot_entries {
            reader.next_entry();
            reader.next_entry();
        }
        reader
    }

    /// Advance to the next entry, or `None` at the end of the listing.
    pub fn next_entry(&mut self) -> Option<DirEntry> {
        self.pos = skip_padding(&self.data, self.len, self.pos);
        if self.pos >= self.len {
            return None;
        }
        let record = record_at(&self.data, self.pos)?;
        self.pos += record.length;

        let name = match record.name {
            [0x00] => ".".to_string(),
            [0x01] => "..".to_string(),
            raw => String::from_utf8_lossy(raw).into_owned(),
        };
        Some(DirEntry {
            name,
            lba: record.lba,
            size: record.size,
            is_dir: record.flags & FLAG_DIRECTORY != 0,
        })
    }

    /// Release the snapshot. Equivalent to dropping the reader.
    pub fn close(self) {}
}

impl Iterator for DirReader {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.next_entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(buf: &mut Vec<u8>, name: &[u8], lba: u32, size: u32, flags: u8) {
        let length = NAME_OFFSET + name.len() + (1 - name.len() % 2);
        let start = buf.len();
        buf.resize(start + length, 0);
        buf[start] = length as u8;
        buf[start + 2..start + 6].copy_from_slice(&lba.to_le_bytes());
        buf[start + 6..start + 10].copy_from_slice(&lba.to_be_bytes());
        buf[start + 10..start + 14].copy_from_slice(&size.to_le_bytes());
        buf[start + 14..start + 18].copy_from_slice(&size.to_be_bytes());
        buf[start + 25] = flags;
        buf[start + 32] = name.len() as u8;
        buf[start + NAME_OFFSET..start + NAME_OFFSET + name.len()].copy_from_slice(name);
    }

    fn listing() -> Vec<u8> {
        let mut buf = Vec::new();
        push_record(&mut buf, &[0x00], 25, 4096, FLAG_DIRECTORY);
        push_record(&mut buf, &[0x01], 22, 2048, FLAG_DIRECTORY);
        push_record(&mut buf, b"DATA.BIN;1", 100, 1024, 0);
        push_record(&mut buf, b"NESTED", 130, 2048, FLAG_DIRECTORY);
        buf.resize(4096, 0);
        buf
    }

    #[test]
    fn test_iteration_yields_dot_entries_first() {
        let names: Vec<String> = DirReader::new(listing(), 4096, false)
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", "..", "DATA.BIN;1", "NESTED"]);
    }

    #[test]
    fn test_root_listing_skips_dot_entries() {
        let mut reader = DirReader::new(listing(), 4096, true);
        assert_eq!(reader.next_entry().unwrap().name, "DATA.BIN;1");
    }

    #[test]
    fn test_entries_carry_location_size_and_kind() {
        let entries: Vec<DirEntry> = DirReader::new(listing(), 4096, true).collect();
        assert_eq!(entries[0].lba, 100);
        assert_eq!(entries[0].size, 1024);
        assert!(!entries[0].is_dir);
        assert!(entries[1].is_dir);
    }

    #[test]
    fn test_zero_byte_skips_to_next_sector_boundary() {
        let mut buf = Vec::new();
        push_record(&mut buf, b"FIRST.DAT;1", 10, 1, 0);
        // Pad the rest of the sector; the next record starts at 2048.
        buf.resize(2048, 0);
        push_record(&mut buf, b"SECOND.DAT;1", 11, 1, 0);
        buf.resize(4096, 0);

        let names: Vec<String> = DirReader::new(buf, 4096, false).map(|e| e.name).collect();
        assert_eq!(names, vec!["FIRST.DAT;1", "SECOND.DAT;1"]);
    }

    #[test]
    fn test_padding_skip_advances_from_aligned_positions() {
        // A whole sector of padding must not wedge the cursor at its own
        // boundary.
        let mut buf = Vec::new();
        push_record(&mut buf, b"A.DAT;1", 10, 1, 0);
        buf.resize(4096, 0);
        push_record(&mut buf, b"B.DAT;1", 11, 1, 0);
        buf.resize(6144, 0);

        let names: Vec<String> = DirReader::new(buf, 6144, false).map(|e| e.name).collect();
        assert_eq!(names, vec!["A.DAT;1", "B.DAT;1"]);
    }

    #[test]
    fn test_find_file_matches_case_insensitively() {
        let buf = listing();
        assert_eq!(find_file(&buf, 4096, "data.bin;1"), Some((100, 1024)));
        assert_eq!(find_file(&buf, 4096, "DATA.BIN;1"), Some((100, 1024)));
        assert_eq!(find_file(&buf, 4096, "MISSING.BIN;1"), None);
    }

    #[test]
    fn test_find_file_never_matches_directories() {
        let buf = listing();
        assert_eq!(find_file(&buf, 4096, "NESTED"), None);
    }
}
