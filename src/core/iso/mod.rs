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

//! ISO9660 filesystem layer
//!
//! [`IsoFs`] owns the drive and turns raw sector reads into path, directory
//! and file lookups:
//!
//! ```text
//!  +-----------------------------------------------+
//!  |                    IsoFs                      |
//!  |  volume descriptor + path table  (per medium) |
//!  |  directory listing cache         (one slot)   |
//!  +-----------------------+-----------------------+
//!                          |  blocking sector reads
//!  +-----------------------v-----------------------+
//!  |                   CdDrive                     |
//!  +-----------------------------------------------+
//! ```
//!
//! The descriptor and path table are read once per medium; a shell-open
//! (observed via an interrupt, or by probing the drive status on entry)
//! discards them and the directory cache, and the next operation re-reads
//! everything. The directory cache holds exactly one directory's raw
//! listing; looking up a different directory evicts it, which is why
//! [`IsoFs::open_dir`] hands out a snapshot instead of a borrow.
//!
//! Paths are absolute, case-insensitive, and accept `/` or `\` as
//! separators. Files are addressed with an ISO9660 `;version` suffix;
//! lookups without one get `;1` appended.

mod directory;
mod path_table;
mod volume;

pub use directory::{DirEntry, DirReader};

use crate::core::clock::TickSource;
use crate::core::drive::{CdDrive, DriveMode, DriveStatus, Msf, Opcode, ReadStatus, SyncMode};
use crate::core::drive::DATA_SECTOR_SIZE;
use crate::core::error::IsoError;
use crate::core::port::DrivePort;
use path_table::PathTable;
use volume::VolumeDescriptor;

/// Magic string at offset 1 of every volume descriptor.
pub(crate) const DESCRIPTOR_MAGIC: &[u8; 5] = b"CD001";

/// Drive mode for filesystem reads: double speed, 2048-byte sectors.
const ISO_MODE: DriveMode = DriveMode::DOUBLE_SPEED;

/// Sectors examined before a session scan gives up.
const SESSION_SCAN_LIMIT: u32 = 512;

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Location and size of a file found on the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdFile {
    /// Name as matched, including the version suffix.
    pub name: String,
    /// First sector of the file's extent.
    pub lba: u32,
    /// File size in bytes.
    pub size: u32,
}

impl CdFile {
    /// Position of the file's first sector.
    pub fn position(&self) -> Msf {
        Msf::from_lba(self.lba as i32)
    }
}

/// Parsed per-medium state: descriptor fields plus the whole path table.
struct Volume {
    descriptor: VolumeDescriptor,
    path_table: PathTable,
}

/// Single-slot cache of one directory's raw listing.
struct CachedDirectory {
    lba: u32,
    /// Declared total listing length in bytes.
    len: usize,
    data: Vec<u8>,
}

/// ISO9660 filesystem reader over a [`CdDrive`].
///
/// # Example
///
/// ```no_run
/// use cdrx::core::clock::SharedTicks;
/// use cdrx::core::drive::CdDrive;
/// use cdrx::core::iso::IsoFs;
/// use cdrx::core::sim::{DiscImage, SimPort};
///
/// let port = SimPort::new(DiscImage::open("game.iso")?);
/// let mut drive = CdDrive::new(port, SharedTicks::new());
/// drive.init()?;
///
/// let mut fs = IsoFs::new(drive);
/// let file = fs.search_file("\\SYSTEM.CNF")?;
/// println!("{} at LBA {}, {} bytes", file.name, file.lba, file.size);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct IsoFs<P: DrivePort, C: TickSource> {
    drive: CdDrive<P, C>,
    /// LBA offset of the active session's descriptor area.
    session_base: u32,
    volume: Option<Volume>,
    directory: Option<CachedDirectory>,
    last_error: Option<IsoError>,
}

impl<P: DrivePort, C: TickSource> IsoFs<P, C> {
    /// Take ownership of an initialized drive.
    pub fn new(drive: CdDrive<P, C>) -> Self {
        Self {
            drive,
            session_base: 0,
            volume: None,
            directory: None,
            last_error: None,
        }
    }

    /// Borrow the underlying drive (status, table of contents, region).
    pub fn drive(&self) -> &CdDrive<P, C> {
        &self.drive
    }

    /// Mutably borrow the underlying drive.
    ///
    /// Raw reads through the drive are fine; they do not disturb the
    /// filesystem caches.
    pub fn drive_mut(&mut self) -> &mut CdDrive<P, C> {
        &mut self.drive
    }

    /// Give the drive back, dropping all cached filesystem state.
    pub fn into_drive(self) -> CdDrive<P, C> {
        self.drive
    }

    /// Error recorded by the most recent filesystem operation, if it
    /// failed. Cleared by the next successful one.
    pub fn iso_error(&self) -> Option<IsoError> {
        self.last_error.clone()
    }

    /// Locate a file by absolute path.
    ///
    /// The parent directory is resolved through the path table, then its
    /// listing is scanned for the leaf name. Matching is case-insensitive
    /// throughout.
    ///
    /// # Arguments
    ///
    /// * `path` - Absolute path with `\` or `/` separators; a missing
    ///   `;version` suffix defaults to `;1`
    ///
    /// # Returns
    ///
    /// - `Ok(CdFile)` with the file's location and size
    /// - `Err(IsoError::NotFound)` if no record matches
    /// - `Err(IsoError::InvalidPath)` if `path` has no leaf name
    pub fn search_file(&mut self, path: &str) -> Result<CdFile, IsoError> {
        let result = self.search_file_inner(path);
        self.finish(result)
    }

    /// Open a directory for iteration.
    ///
    /// The returned [`DirReader`] iterates a snapshot, so it stays valid
    /// however many other lookups run afterwards. Non-root listings start
    /// with `.` and `..`; the root listing has neither.
    pub fn open_dir(&mut self, path: &str) -> Result<DirReader, IsoError> {
        let result = self.open_dir_inner(path);
        self.finish(result)
    }

    /// Volume label from the descriptor, trailing padding trimmed.
    pub fn volume_label(&mut self) -> Result<String, IsoError> {
        let result = self.volume_label_inner();
        self.finish(result)
    }

    /// Read a located file's whole extent.
    pub fn read_file(&mut self, file: &CdFile) -> Result<Vec<u8>, IsoError> {
        let result = self.read_file_inner(file);
        self.finish(result)
    }

    /// Switch to another session on a multi-session disc and parse the
    /// filesystem it carries.
    ///
    /// Seeks the drive to the session, scans forward for its volume
    /// descriptor to fix the session's LBA base, then re-reads descriptor
    /// and path table.
    ///
    /// # Arguments
    ///
    /// * `session` - 1-based session number
    ///
    /// # Returns
    ///
    /// - `Ok(())` with the session's filesystem parsed and cached
    /// - `Err(IsoError::SeekError)` if the session does not exist; the
    ///   drive is restarted so it recovers to a usable state
    /// - `Err(IsoError::InvalidFilesystem)` if no descriptor turns up in
    ///   the scan window
    pub fn load_session(&mut self, session: u8) -> Result<(), IsoError> {
        let result = self.load_session_inner(session);
        self.finish(result)
    }

    fn finish<T>(&mut self, result: Result<T, IsoError>) -> Result<T, IsoError> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.clone()),
        }
        result
    }

    fn search_file_inner(&mut self, path: &str) -> Result<CdFile, IsoError> {
        self.ensure_volume()?;

        let (dir_path, leaf) = split_path(path);
        if leaf.is_empty() {
            return Err(IsoError::InvalidPath {
                path: path.to_string(),
            });
        }
        let mut name = leaf.to_string();
        if !name.contains(';') {
            name.push_str(";1");
        }

        let (_, dir_lba) = self.dir_entry_for(&dir_path).ok_or_else(|| IsoError::NotFound {
            path: path.to_string(),
        })?;
        self.ensure_directory(dir_lba)?;

        let dir = self.directory.as_ref().ok_or(IsoError::InvalidFilesystem)?;
        let (lba, size) =
            directory::find_file(&dir.data, dir.len, &name).ok_or_else(|| IsoError::NotFound {
                path: path.to_string(),
            })?;

        log::debug!("CD-ROM: located {} at LBA {} ({} bytes)", name, lba, size);
        Ok(CdFile { name, lba, size })
    }

    fn open_dir_inner(&mut self, path: &str) -> Result<DirReader, IsoError> {
        self.ensure_volume()?;

        let dir_path = normalize_dir_path(path);
        let (number, lba) = self.dir_entry_for(&dir_path).ok_or_else(|| IsoError::NotFound {
            path: path.to_string(),
        })?;
        self.ensure_directory(lba)?;

        let dir = self.directory.as_ref().ok_or(IsoError::InvalidFilesystem)?;
        Ok(DirReader::new(dir.data.clone(), dir.len, number == 1))
    }

    fn volume_label_inner(&mut self) -> Result<String, IsoError> {
        self.ensure_volume()?;
        self.volume
            .as_ref()
            .map(|v| v.descriptor.label())
            .ok_or(IsoError::InvalidFilesystem)
    }

    fn read_file_inner(&mut self, file: &CdFile) -> Result<Vec<u8>, IsoError> {
        self.ensure_volume()?;
        if file.size == 0 {
            return Ok(Vec::new());
        }
        let sectors = (file.size as usize).div_ceil(DATA_SECTOR_SIZE);
        let mut data = self.fetch(file.lba, sectors)?;
        data.truncate(file.size as usize);
        Ok(data)
    }

    fn load_session_inner(&mut self, session: u8) -> Result<(), IsoError> {
        log::info!("CD-ROM: seeking to session {}", session);
        if self
            .drive
            .control_blocking(Opcode::SetSession, Some(&[session]))
            .is_err()
        {
            log::warn!("CD-ROM: session {} does not exist, restarting drive", session);
            let _ = self.drive.control(Opcode::Nop, None);
            let _ = self.drive.control(Opcode::Init, None);
            let _ = self.drive.sync(SyncMode::Blocking);
            return Err(IsoError::SeekError);
        }

        // The drive is parked somewhere inside the new session; read
        // forward until an ISO9660 descriptor shows up.
        let mut found = false;
        for _ in 0..SESSION_SCAN_LIMIT {
            if self.drive.read(1, ISO_MODE).is_err() {
                break;
            }
            let sector = match self.drive.read_sync(SyncMode::Blocking) {
                ReadStatus::Complete(data) => data,
                _ => break,
            };
            if sector[0] == 0x01 && sector[1..6] == *DESCRIPTOR_MAGIC {
                found = true;
                break;
            }
        }
        if !found {
            log::warn!("CD-ROM: no volume descriptor in session {}", session);
            return Err(IsoError::InvalidFilesystem);
        }

        // The descriptor was the last sector read; its header position
        // anchors the session's base offset.
        self.drive
            .control(Opcode::GetLocL, None)
            .map_err(|_| IsoError::SeekError)?;
        let response = self.drive.last_response();
        if response.len() < 3 {
            return Err(IsoError::InvalidFilesystem);
        }
        let descriptor_lba = Msf::new(response[0], response[1], response[2]).to_lba();
        self.session_base = (descriptor_lba - 16).max(0) as u32;
        log::info!(
            "CD-ROM: session {} starts at LBA {}",
            session,
            self.session_base
        );

        self.drive.mark_media_changed();
        self.volume = None;
        self.directory = None;
        self.ensure_volume()
    }

    /// Make sure the descriptor and path table reflect the disc in the
    /// drive, re-reading them after any media change.
    fn ensure_volume(&mut self) -> Result<(), IsoError> {
        if self.volume.is_some() && !self.drive.media_changed() {
            // The engine only learns of a lid open from a status response,
            // so probe. The shell bit is latched; it clears on a second
            // probe once the lid is closed again.
            let status = self
                .drive
                .command(Opcode::Nop, &[])
                .map_err(|_| IsoError::ReadError)?;
            if status.contains(DriveStatus::SHELL_OPEN) {
                let status = self
                    .drive
                    .command(Opcode::Nop, &[])
                    .map_err(|_| IsoError::ReadError)?;
                if status.contains(DriveStatus::SHELL_OPEN) {
                    log::warn!("CD-ROM: lid is open");
                    return Err(IsoError::LidOpen);
                }
                self.drive.mark_media_changed();
            }
        }
        if self.volume.is_some() && !self.drive.media_changed() {
            return Ok(());
        }

        log::info!("CD-ROM: parsing ISO9660 file system");
        self.volume = None;
        self.directory = None;

        let sector = self.fetch(16 + self.session_base, 1)?;
        let descriptor = VolumeDescriptor::parse(&sector)?;

        let table_sectors = (descriptor.path_table_size as usize).div_ceil(DATA_SECTOR_SIZE);
        let table = self.fetch(descriptor.path_table_lba, table_sectors)?;
        let path_table = PathTable::parse(&table, descriptor.path_table_size as usize)?;
        log::debug!(
            "CD-ROM: volume \"{}\", {} directories in path table",
            descriptor.label(),
            path_table.len()
        );

        self.volume = Some(Volume {
            descriptor,
            path_table,
        });
        self.drive.clear_media_changed();
        Ok(())
    }

    /// Load a directory's full listing into the single cache slot.
    fn ensure_directory(&mut self, lba: u32) -> Result<(), IsoError> {
        if self.directory.as_ref().is_some_and(|d| d.lba == lba) {
            return Ok(());
        }

        let first = self.fetch(lba, 1)?;
        // The directory's own "." record declares the listing's total
        // length.
        let len = directory::record_at(&first, 0)
            .map(|r| r.size as usize)
            .filter(|&n| n > 0)
            .ok_or(IsoError::InvalidFilesystem)?;
        log::trace!("CD-ROM: directory at LBA {} spans {} bytes", lba, len);

        let data = if len > DATA_SECTOR_SIZE {
            self.fetch(lba, len.div_ceil(DATA_SECTOR_SIZE))?
        } else {
            first
        };
        self.directory = Some(CachedDirectory { lba, len, data });
        Ok(())
    }

    /// 1-based path table number and LBA of a directory path.
    fn dir_entry_for(&self, dir_path: &str) -> Option<(usize, u32)> {
        let volume = self.volume.as_ref()?;
        let number = volume.path_table.find_dir(dir_path)?;
        let lba = volume.path_table.entry(number)?.lba;
        Some((number, lba))
    }

    /// Seek and read `sectors` sectors, mapping drive failures to the
    /// filesystem error domain.
    fn fetch(&mut self, lba: u32, sectors: usize) -> Result<Vec<u8>, IsoError> {
        let pos = Msf::from_lba(lba as i32);
        self.drive
            .control(Opcode::SetLoc, Some(&pos.param_bytes()))
            .map_err(|_| IsoError::SeekError)?;
        self.drive
            .read(sectors, ISO_MODE)
            .map_err(|_| IsoError::ReadError)?;
        match self.drive.read_sync(SyncMode::Blocking) {
            ReadStatus::Complete(data) => Ok(data),
            _ => Err(IsoError::ReadError),
        }
    }
}

/// Normalize a directory path: backslash separators, leading separator,
/// no trailing one (the root is just `\`).
fn normalize_dir_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('\\');
    for part in path.split(['/', '\\']).filter(|p| !p.is_empty()) {
        if out.len() > 1 {
            out.push('\\');
        }
        out.push_str(part);
    }
    out
}

/// Split a file path into its normalized parent directory and leaf name.
fn split_path(path: &str) -> (String, &str) {
    match path.rfind(['/', '\\']) {
        Some(i) => (normalize_dir_path(&path[..i]), &path[i + 1..]),
        None => ("\\".to_string(), path),
    }
}

#[cfg(test)]
mod path_tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_both_separators() {
        assert_eq!(normalize_dir_path("\\DATA\\MAPS"), "\\DATA\\MAPS");
        assert_eq!(normalize_dir_path("/DATA/MAPS"), "\\DATA\\MAPS");
        assert_eq!(normalize_dir_path("DATA"), "\\DATA");
    }

    #[test]
    fn test_normalize_root_forms() {
        assert_eq!(normalize_dir_path(""), "\\");
        assert_eq!(normalize_dir_path("\\"), "\\");
        assert_eq!(normalize_dir_path("/"), "\\");
    }

    #[test]
    fn test_split_separates_parent_and_leaf() {
        assert_eq!(split_path("\\A\\B\\F.DAT"), ("\\A\\B".to_string(), "F.DAT"));
        assert_eq!(split_path("\\F.DAT"), ("\\".to_string(), "F.DAT"));
        assert_eq!(split_path("F.DAT"), ("\\".to_string(), "F.DAT"));
        assert_eq!(split_path("\\A\\"), ("\\A".to_string(), ""));
    }
}

#[cfg(test)]
mod tests;
