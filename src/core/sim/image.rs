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

//! Disc image storage for the simulated drive
//!
//! [`DiscImage`] loads `.iso` (2048-byte user sectors), `.bin` (2352-byte
//! raw frames) and `.cue` files (resolved to their `.bin`), and serves the
//! two transfer sizes the controller supports. The free functions at the
//! bottom serialize ISO9660 structures sector by sector, so tests and
//! tooling can assemble a valid volume without a mastering step.

use std::fs;
use std::io;
use std::path::Path;

use crate::core::drive::position::Msf;
use crate::core::drive::{DATA_SECTOR_SIZE, WHOLE_SECTOR_SIZE};

/// Bytes per raw frame in a `.bin` image (sync + header + data + ECC).
const RAW_FRAME_SIZE: usize = 2352;
/// Sync pattern length at the start of each raw frame.
const RAW_SYNC_SIZE: usize = 12;
/// The sync bytes opening every raw frame.
const RAW_SYNC_PATTERN: [u8; RAW_SYNC_SIZE] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFormat {
    /// 2048-byte user sectors (`.iso`).
    User,
    /// 2352-byte raw frames (`.bin`).
    Raw,
}

/// In-memory disc image backing a [`crate::core::sim::SimPort`].
#[derive(Debug, Clone)]
pub struct DiscImage {
    data: Vec<u8>,
    format: ImageFormat,
}

impl DiscImage {
    /// Load an image file, deducing the layout from the extension.
    ///
    /// # Arguments
    ///
    /// * `path` - Image file; `.cue` is resolved to the `.bin` it names,
    ///   `.bin` is treated as raw frames, anything else as plain user
    ///   sectors
    ///
    /// # Returns
    ///
    /// - `Ok(DiscImage)` if the file loaded
    /// - `Err(io::Error)` on read failure, a frame-misaligned `.bin`, or a
    ///   `.bin` without the leading sync pattern
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("cue") => {
                let bin = cue_binary_file(path)?;
                Self::open_raw(&bin)
            }
            Some("bin") => Self::open_raw(path),
            _ => Ok(Self::from_user_data(fs::read(path)?)),
        }
    }

    fn open_raw(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        if data.len() % RAW_FRAME_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: not a multiple of the {} byte frame size",
                    path.display(),
                    RAW_FRAME_SIZE
                ),
            ));
        }
        if data.len() < RAW_FRAME_SIZE || data[..RAW_SYNC_SIZE] != RAW_SYNC_PATTERN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: missing the frame sync pattern", path.display()),
            ));
        }
        Ok(Self {
            data,
            format: ImageFormat::Raw,
        })
    }

    /// Wrap plain user-sector data, padding the tail to a sector boundary.
    pub fn from_user_data(mut data: Vec<u8>) -> Self {
        let rem = data.len() % DATA_SECTOR_SIZE;
        if rem != 0 {
            data.resize(data.len() + DATA_SECTOR_SIZE - rem, 0);
        }
        Self {
            data,
            format: ImageFormat::User,
        }
    }

    /// Zero-filled user-sector image.
    pub fn blank(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * DATA_SECTOR_SIZE],
            format: ImageFormat::User,
        }
    }

    /// Number of addressable sectors.
    pub fn sector_count(&self) -> u32 {
        let per = match self.format {
            ImageFormat::User => DATA_SECTOR_SIZE,
            ImageFormat::Raw => RAW_FRAME_SIZE,
        };
        (self.data.len() / per) as u32
    }

    /// The 2048 user-data bytes of one sector, or `None` past the end.
    pub fn sector_data(&self, lba: u32) -> Option<Vec<u8>> {
        if lba >= self.sector_count() {
            return None;
        }
        let lba = lba as usize;
        match self.format {
            ImageFormat::User => {
                let start = lba * DATA_SECTOR_SIZE;
                Some(self.data[start..start + DATA_SECTOR_SIZE].to_vec())
            }
            ImageFormat::Raw => {
                let frame = lba * RAW_FRAME_SIZE;
                // Mode 2 frames carry an 8-byte subheader before the data.
                let offset = match self.data[frame + 15] {
                    2 => 24,
                    _ => 16,
                };
                let start = frame + offset;
                Some(self.data[start..start + DATA_SECTOR_SIZE].to_vec())
            }
        }
    }

    /// The 2340 whole-sector bytes (header through ECC) of one sector.
    ///
    /// For user-sector images the header and subheader are synthesized,
    /// with zeroed checksum fields.
    pub fn whole_sector(&self, lba: u32) -> Option<Vec<u8>> {
        if lba >= self.sector_count() {
            return None;
        }
        match self.format {
            ImageFormat::Raw => {
                let frame = lba as usize * RAW_FRAME_SIZE;
                Some(self.data[frame + RAW_SYNC_SIZE..frame + RAW_FRAME_SIZE].to_vec())
            }
            ImageFormat::User => {
                let mut sector = Vec::with_capacity(WHOLE_SECTOR_SIZE);
                let pos = Msf::from_lba(lba as i32);
                sector.extend_from_slice(&[pos.minute, pos.second, pos.sector, 0x02]);
                sector.extend_from_slice(&[0; 8]);
                sector.extend_from_slice(&self.sector_data(lba)?);
                sector.resize(WHOLE_SECTOR_SIZE, 0);
                Some(sector)
            }
        }
    }
}

/// Pull the binary file name out of a cue sheet and resolve it next to the
/// sheet itself.
fn cue_binary_file(path: &Path) -> io::Result<std::path::PathBuf> {
    let sheet = fs::read_to_string(path)?;
    for line in sheet.lines() {
        let line = line.trim();
        if !line.to_ascii_uppercase().starts_with("FILE") {
            continue;
        }
        let mut quoted = line.split('"');
        if let Some(name) = quoted.nth(1) {
            return Ok(match path.parent() {
                Some(dir) => dir.join(name),
                None => std::path::PathBuf::from(name),
            });
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: cue sheet names no binary file", path.display()),
    ))
}

/// Incrementally assembled user-sector image.
///
/// Used together with [`descriptor_sector`], [`path_table_bytes`] and
/// [`dir_record`] to lay out a synthetic ISO9660 volume at exact sector
/// positions.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    /// Start from `sectors` zeroed sectors.
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * DATA_SECTOR_SIZE],
        }
    }

    /// Copy `bytes` into the image at `lba` plus a byte offset. Grows the
    /// image if the write lands past the current end.
    pub fn write(&mut self, lba: u32, offset: usize, bytes: &[u8]) -> &mut Self {
        let start = lba as usize * DATA_SECTOR_SIZE + offset;
        let end = start + bytes.len();
        if end > self.data.len() {
            let sectors = end.div_ceil(DATA_SECTOR_SIZE);
            self.data.resize(sectors * DATA_SECTOR_SIZE, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        self
    }

    pub fn build(&self) -> DiscImage {
        DiscImage::from_user_data(self.data.clone())
    }
}

/// Serialize a primary volume descriptor sector.
///
/// `root_lba`/`root_size` fill the embedded root directory record;
/// `table_size` is the path table's byte length at `table_lba`.
pub fn descriptor_sector(
    label: &str,
    table_size: u32,
    table_lba: u32,
    root_lba: u32,
    root_size: u32,
) -> Vec<u8> {
    let mut sector = vec![0u8; DATA_SECTOR_SIZE];
    sector[0] = 0x01;
    sector[1..6].copy_from_slice(b"CD001");
    sector[6] = 0x01;

    let mut id = [b' '; 32];
    let n = label.len().min(32);
    id[..n].copy_from_slice(&label.as_bytes()[..n]);
    sector[40..72].copy_from_slice(&id);

    sector[132..136].copy_from_slice(&table_size.to_le_bytes());
    sector[140..144].copy_from_slice(&table_lba.to_le_bytes());

    // Embedded root directory record at offset 156.
    let root = dir_record(&[0x00], root_lba, root_size, true);
    sector[156..156 + root.len()].copy_from_slice(&root);
    sector
}

/// Serialize path table entries in the little-endian layout.
///
/// Entries are `(identifier, lba, parent_number)`; the root goes first as
/// `([0x00], root_lba, 1)`.
pub fn path_table_bytes(entries: &[(&[u8], u32, u16)]) -> Vec<u8> {
    let mut table = Vec::new();
    for &(identifier, lba, parent) in entries {
        table.push(identifier.len() as u8);
        table.push(0);
        table.extend_from_slice(&lba.to_le_bytes());
        table.extend_from_slice(&parent.to_le_bytes());
        table.extend_from_slice(identifier);
        if identifier.len() % 2 != 0 {
            table.push(0);
        }
    }
    table
}

/// Serialize one directory record.
///
/// `identifier` is the raw name field: file names like `b"DATA.BIN;1"`,
/// or the special `&[0x00]` / `&[0x01]` self and parent entries.
pub fn dir_record(identifier: &[u8], lba: u32, size: u32, is_dir: bool) -> Vec<u8> {
    let mut length = 33 + identifier.len();
    if length % 2 != 0 {
        length += 1;
    }

    let mut record = vec![0u8; length];
    record[0] = length as u8;
    record[2..6].copy_from_slice(&lba.to_le_bytes());
    record[6..10].copy_from_slice(&lba.to_be_bytes());
    record[10..14].copy_from_slice(&size.to_le_bytes());
    record[14..18].copy_from_slice(&size.to_be_bytes());
    if is_dir {
        record[25] = 0x02;
    }
    record[32] = identifier.len() as u8;
    record[33..33 + identifier.len()].copy_from_slice(identifier);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    /// One raw frame with a valid sync pattern and the given mode byte.
    fn raw_frame(mode: u8) -> Vec<u8> {
        let mut frame = vec![0u8; RAW_FRAME_SIZE];
        frame[..RAW_SYNC_SIZE].copy_from_slice(&RAW_SYNC_PATTERN);
        frame[15] = mode;
        frame
    }

    #[test]
    fn test_user_image_pads_to_sector_boundary() {
        let image = DiscImage::from_user_data(vec![0xAA; 3000]);
        assert_eq!(image.sector_count(), 2);
        assert_eq!(image.sector_data(1).unwrap()[0..952], [0xAA; 952]);
        assert_eq!(image.sector_data(1).unwrap()[952..], [0x00; 1096]);
        assert_eq!(image.sector_data(2), None);
    }

    #[test]
    fn test_whole_sector_synthesizes_header_for_user_images() {
        let image = DiscImage::blank(20);
        let sector = image.whole_sector(16).unwrap();
        assert_eq!(sector.len(), 2340);
        // LBA 16 = MSF 00:02:16, mode 2.
        assert_eq!(&sector[..4], &[0x00, 0x02, 0x16, 0x02]);
    }

    #[test]
    fn test_raw_image_strips_frame_header() {
        // One mode 1 frame: data starts at byte 16.
        let mut frame = raw_frame(1);
        frame[16] = 0xBE;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.bin");
        fs::write(&path, &frame).unwrap();

        let image = DiscImage::open(&path).unwrap();
        assert_eq!(image.sector_count(), 1);
        assert_eq!(image.sector_data(0).unwrap()[0], 0xBE);
        assert_eq!(image.whole_sector(0).unwrap().len(), 2340);
    }

    #[test]
    fn test_raw_image_mode2_data_offset() {
        let mut frame = raw_frame(2);
        frame[24] = 0xCD;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.bin");
        fs::write(&path, &frame).unwrap();

        let image = DiscImage::open(&path).unwrap();
        assert_eq!(image.sector_data(0).unwrap()[0], 0xCD);
    }

    #[test]
    fn test_cue_sheet_resolves_sibling_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("game.bin"), raw_frame(2)).unwrap();
        let cue = dir.path().join("game.cue");
        let mut sheet = fs::File::create(&cue).unwrap();
        writeln!(sheet, "FILE \"game.bin\" BINARY").unwrap();
        writeln!(sheet, "  TRACK 01 MODE2/2352").unwrap();
        writeln!(sheet, "    INDEX 01 00:00:00").unwrap();
        drop(sheet);

        let image = DiscImage::open(&cue).unwrap();
        assert_eq!(image.sector_count(), 1);
    }

    #[test]
    fn test_truncated_bin_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.bin");
        fs::write(&path, vec![0u8; 2351]).unwrap();
        assert!(DiscImage::open(&path).is_err());
    }

    #[test]
    fn test_bin_without_sync_pattern_is_rejected() {
        // Right length, but not frame data.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.bin");
        fs::write(&path, vec![0xAB; RAW_FRAME_SIZE]).unwrap();

        let err = DiscImage::open(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_builder_grows_on_out_of_range_write() {
        let mut builder = ImageBuilder::new(2);
        builder.write(5, 4, &[1, 2, 3]);
        let image = builder.build();
        assert_eq!(image.sector_count(), 6);
        assert_eq!(&image.sector_data(5).unwrap()[4..7], &[1, 2, 3]);
    }

    #[test]
    fn test_dir_record_layout() {
        let record = dir_record(b"DATA.BIN;1", 25, 1024, false);
        // 33 + 10 name bytes, padded to even length.
        assert_eq!(record.len(), 44);
        assert_eq!(record[0], 44);
        assert_eq!(&record[2..6], &25u32.to_le_bytes());
        assert_eq!(&record[10..14], &1024u32.to_le_bytes());
        assert_eq!(record[25], 0);
        assert_eq!(record[32], 10);
        assert_eq!(&record[33..43], b"DATA.BIN;1");
    }

    #[test]
    fn test_descriptor_sector_fields() {
        let sector = descriptor_sector("GAME", 20, 20, 23, 2048);
        assert_eq!(sector[0], 0x01);
        assert_eq!(&sector[1..6], b"CD001");
        assert_eq!(&sector[40..44], b"GAME");
        assert_eq!(sector[44], b' ');
        assert_eq!(&sector[132..136], &20u32.to_le_bytes());
        assert_eq!(&sector[140..144], &20u32.to_le_bytes());
        assert_eq!(&sector[158..162], &23u32.to_le_bytes());
        assert_eq!(&sector[166..170], &2048u32.to_le_bytes());
    }
}
