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

//! Filesystem-layer tests against the scripted drive simulator.
//!
//! Fixtures are serialized with the sim's ISO9660 builders; the layouts
//! are small but structurally faithful (path table, dot entries,
//! sector-tail padding, multi-sector listings).

use super::*;
use crate::core::clock::SharedTicks;
use crate::core::sim::{
    descriptor_sector, dir_record, path_table_bytes, DiscImage, ImageBuilder, SimPort,
};

fn file_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Volume used by most tests:
///
/// ```text
/// \                      LBA 23
///   BIG\                 LBA 27, two sectors
///     DEEP.BIN;1         LBA 34, 16 bytes
///   DATA\                LBA 24
///     LEVEL1.DAT;1       LBA 31, 2048 bytes
///     MAPS\              LBA 26
///       WORLD.MAP;1      LBA 32, 3000 bytes
///   README.TXT;1         LBA 30, 100 bytes
/// ```
fn test_volume() -> DiscImage {
    let table = path_table_bytes(&[
        (&[0x00], 23, 1),
        (b"BIG", 27, 1),
        (b"DATA", 24, 1),
        (b"MAPS", 26, 3),
    ]);

    let root = [
        dir_record(&[0x00], 23, 2048, true),
        dir_record(&[0x01], 23, 2048, true),
        dir_record(b"BIG", 27, 4096, true),
        dir_record(b"DATA", 24, 2048, true),
        dir_record(b"README.TXT;1", 30, 100, false),
    ]
    .concat();
    let data_dir = [
        dir_record(&[0x00], 24, 2048, true),
        dir_record(&[0x01], 23, 2048, true),
        dir_record(b"LEVEL1.DAT;1", 31, 2048, false),
        dir_record(b"MAPS", 26, 2048, true),
    ]
    .concat();
    let maps_dir = [
        dir_record(&[0x00], 26, 2048, true),
        dir_record(&[0x01], 24, 2048, true),
        dir_record(b"WORLD.MAP;1", 32, 3000, false),
    ]
    .concat();
    // BIG spans two sectors; its last record sits past the tail padding
    // of the first one.
    let big_dir = [
        dir_record(&[0x00], 27, 4096, true),
        dir_record(&[0x01], 23, 2048, true),
    ]
    .concat();

    let mut image = ImageBuilder::new(36);
    image
        .write(
            16,
            0,
            &descriptor_sector("TESTDISC", table.len() as u32, 20, 23, 2048),
        )
        .write(20, 0, &table)
        .write(23, 0, &root)
        .write(24, 0, &data_dir)
        .write(26, 0, &maps_dir)
        .write(27, 0, &big_dir)
        .write(28, 0, &dir_record(b"DEEP.BIN;1", 34, 16, false))
        .write(30, 0, &file_bytes(100))
        .write(31, 0, &[0x4C; 2048])
        .write(32, 0, &file_bytes(3000))
        .write(34, 0, &[0xDE; 16]);
    image.build()
}

/// Minimal mastering some burners produce: the descriptor declares a
/// 20-byte path table though only a 10-byte root entry exists, and the
/// root directory carries no dot entries at all. The first record's size
/// then doubles as the listing length.
fn minimal_volume() -> DiscImage {
    let table = path_table_bytes(&[(&[0x00], 25, 1)]);
    let mut image = ImageBuilder::new(30);
    image
        .write(16, 0, &descriptor_sector("EXAMPLE", 20, 20, 25, 2048))
        .write(20, 0, &table)
        .write(25, 0, &dir_record(b"DATA.BIN;1", 25, 1024, false));
    image.build()
}

fn two_session_volume() -> DiscImage {
    let first_table = path_table_bytes(&[(&[0x00], 23, 1)]);
    let first_root = [
        dir_record(&[0x00], 23, 2048, true),
        dir_record(&[0x01], 23, 2048, true),
        dir_record(b"ONE.BIN;1", 30, 4, false),
    ]
    .concat();
    let second_table = path_table_bytes(&[(&[0x00], 1023, 1)]);
    let second_root = [
        dir_record(&[0x00], 1023, 2048, true),
        dir_record(&[0x01], 1023, 2048, true),
        dir_record(b"TWO.BIN;1", 1030, 8, false),
    ]
    .concat();

    let mut image = ImageBuilder::new(1040);
    image
        .write(
            16,
            0,
            &descriptor_sector("SESSION1", first_table.len() as u32, 20, 23, 2048),
        )
        .write(20, 0, &first_table)
        .write(23, 0, &first_root)
        .write(30, 0, &[0x11; 4])
        .write(
            1016,
            0,
            &descriptor_sector("SESSION2", second_table.len() as u32, 1020, 1023, 2048),
        )
        .write(1020, 0, &second_table)
        .write(1023, 0, &second_root)
        .write(1030, 0, &[0x5A; 8]);
    image.build()
}

fn iso_with(image: DiscImage) -> (IsoFs<SimPort, SharedTicks>, SimPort) {
    let port = SimPort::new(image);
    let script = port.clone();
    let mut drive = CdDrive::new(port, script.clock());
    drive.init().unwrap();
    (IsoFs::new(drive), script)
}

fn seeks_to(script: &SimPort, lba: u32) -> usize {
    script.seek_history().iter().filter(|&&l| l == lba).count()
}

#[test]
fn test_minimal_volume_resolves_file_without_dot_entries() {
    let (mut iso, _script) = iso_with(minimal_volume());

    let file = iso.search_file("\\DATA.BIN").unwrap();
    assert_eq!(file.name, "DATA.BIN;1");
    assert_eq!((file.lba, file.size), (25, 1024));
    assert_eq!(file.position().to_lba(), 25);
}

#[test]
fn test_search_file_matches_directory_walk() {
    let (mut iso, _script) = iso_with(test_volume());

    let found = iso.search_file("\\DATA\\MAPS\\WORLD.MAP").unwrap();
    let walked = iso
        .open_dir("\\DATA\\MAPS")
        .unwrap()
        .find(|e| e.name == "WORLD.MAP;1")
        .unwrap();
    assert_eq!((found.lba, found.size), (walked.lba, walked.size));
}

#[test]
fn test_lookups_are_case_insensitive() {
    let (mut iso, _script) = iso_with(test_volume());

    let upper = iso.search_file("\\DATA\\MAPS\\WORLD.MAP").unwrap();
    let lower = iso.search_file("/data/maps/world.map").unwrap();
    assert_eq!((upper.lba, upper.size), (lower.lba, lower.size));
}

#[test]
fn test_version_suffix_defaults_to_one() {
    let (mut iso, _script) = iso_with(test_volume());

    let plain = iso.search_file("\\README.TXT").unwrap();
    assert_eq!(plain.name, "README.TXT;1");

    let explicit = iso.search_file("\\README.TXT;1").unwrap();
    assert_eq!(plain.lba, explicit.lba);
}

#[test]
fn test_root_listing_skips_dot_entries() {
    let (mut iso, _script) = iso_with(test_volume());

    let entries: Vec<DirEntry> = iso.open_dir("\\").unwrap().collect();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["BIG", "DATA", "README.TXT;1"]);
    assert!(entries[0].is_dir);
    assert!(entries[1].is_dir);
    assert!(!entries[2].is_dir);
    assert_eq!((entries[2].lba, entries[2].size), (30, 100));
}

#[test]
fn test_subdirectory_listing_keeps_dot_entries_first() {
    let (mut iso, _script) = iso_with(test_volume());

    let entries: Vec<DirEntry> = iso.open_dir("/data").unwrap().collect();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, [".", "..", "LEVEL1.DAT;1", "MAPS"]);
    assert_eq!(entries[0].lba, 24);
    assert_eq!(entries[1].lba, 23);
}

#[test]
fn test_multi_sector_directory_is_fetched_whole() {
    let (mut iso, script) = iso_with(test_volume());

    let entries: Vec<DirEntry> = iso.open_dir("\\BIG").unwrap().collect();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, [".", "..", "DEEP.BIN;1"]);
    assert_eq!((entries[2].lba, entries[2].size), (34, 16));
    // One probing read of the first sector, then the full two-sector
    // span.
    assert_eq!(seeks_to(&script, 27), 2);

    let file = iso.search_file("\\BIG\\DEEP.BIN").unwrap();
    assert_eq!((file.lba, file.size), (34, 16));
}

#[test]
fn test_directory_cache_holds_one_listing() {
    let (mut iso, script) = iso_with(test_volume());

    iso.search_file("\\README.TXT").unwrap();
    iso.search_file("\\README.TXT").unwrap();
    assert_eq!(seeks_to(&script, 23), 1);

    iso.search_file("\\DATA\\LEVEL1.DAT").unwrap();
    iso.search_file("\\README.TXT").unwrap();
    assert_eq!(seeks_to(&script, 24), 1);
    assert_eq!(seeks_to(&script, 23), 2);
}

#[test]
fn test_dir_reader_survives_cache_eviction() {
    let (mut iso, _script) = iso_with(test_volume());

    let reader = iso.open_dir("\\").unwrap();
    iso.search_file("\\DATA\\LEVEL1.DAT").unwrap();

    let names: Vec<String> = reader.map(|e| e.name).collect();
    assert_eq!(names, ["BIG", "DATA", "README.TXT;1"]);
}

#[test]
fn test_descriptor_and_path_table_read_once_per_medium() {
    let (mut iso, script) = iso_with(test_volume());

    iso.search_file("\\README.TXT").unwrap();
    iso.open_dir("\\DATA").unwrap();
    iso.volume_label().unwrap();
    assert_eq!(seeks_to(&script, 16), 1);
    assert_eq!(seeks_to(&script, 20), 1);
}

#[test]
fn test_volume_label_trims_padding() {
    let (mut iso, _script) = iso_with(test_volume());
    assert_eq!(iso.volume_label().unwrap(), "TESTDISC");
}

#[test]
fn test_missing_file_reports_not_found() {
    let (mut iso, _script) = iso_with(test_volume());

    let err = iso.search_file("\\NOPE.BIN").unwrap_err();
    assert_eq!(
        err,
        IsoError::NotFound {
            path: "\\NOPE.BIN".into()
        }
    );
    assert_eq!(iso.iso_error(), Some(err));

    // A later success clears the recorded error.
    iso.volume_label().unwrap();
    assert_eq!(iso.iso_error(), None);
}

#[test]
fn test_open_dir_on_missing_path_reports_not_found() {
    let (mut iso, _script) = iso_with(test_volume());
    assert!(matches!(
        iso.open_dir("\\SAVES"),
        Err(IsoError::NotFound { .. })
    ));
}

#[test]
fn test_paths_without_a_leaf_are_invalid() {
    let (mut iso, _script) = iso_with(test_volume());

    assert!(matches!(
        iso.search_file("\\DATA\\"),
        Err(IsoError::InvalidPath { .. })
    ));
    assert!(matches!(
        iso.search_file(""),
        Err(IsoError::InvalidPath { .. })
    ));
}

#[test]
fn test_blank_disc_has_no_filesystem() {
    let (mut iso, _script) = iso_with(DiscImage::blank(32));
    assert_eq!(iso.volume_label(), Err(IsoError::InvalidFilesystem));
}

#[test]
fn test_read_file_returns_exact_byte_count() {
    let (mut iso, _script) = iso_with(test_volume());

    let readme = iso.search_file("\\README.TXT").unwrap();
    assert_eq!(iso.read_file(&readme).unwrap(), file_bytes(100));

    let map = iso.search_file("\\DATA\\MAPS\\WORLD.MAP").unwrap();
    let data = iso.read_file(&map).unwrap();
    assert_eq!(data.len(), 3000);
    assert_eq!(data, file_bytes(3000));
}

#[test]
fn test_read_file_of_zero_size_transfers_nothing() {
    let (mut iso, script) = iso_with(test_volume());
    iso.volume_label().unwrap();
    let seeks_before = script.seek_history().len();

    let empty = CdFile {
        name: "EMPTY.DAT;1".into(),
        lba: 35,
        size: 0,
    };
    assert_eq!(iso.read_file(&empty).unwrap(), Vec::<u8>::new());
    assert_eq!(script.seek_history().len(), seeks_before);
}

#[test]
fn test_open_lid_reports_and_recovers() {
    let (mut iso, script) = iso_with(test_volume());
    iso.search_file("\\README.TXT").unwrap();
    assert_eq!(seeks_to(&script, 16), 1);

    script.open_lid();
    assert_eq!(iso.search_file("\\README.TXT"), Err(IsoError::LidOpen));
    assert_eq!(iso.iso_error(), Some(IsoError::LidOpen));

    script.close_lid();
    let file = iso.search_file("\\README.TXT").unwrap();
    assert_eq!((file.lba, file.size), (30, 100));
    // Media change: descriptor, path table and root listing re-read.
    assert_eq!(seeks_to(&script, 16), 2);
    assert_eq!(seeks_to(&script, 23), 2);
}

#[test]
fn test_lid_open_before_first_read_fails_the_fetch() {
    let (mut iso, script) = iso_with(test_volume());

    script.open_lid();
    assert_eq!(iso.volume_label(), Err(IsoError::ReadError));
}

#[test]
fn test_load_session_finds_later_volume() {
    let (mut iso, script) = iso_with(two_session_volume());
    script.set_sessions(&[0, 1000]);

    assert_eq!(iso.volume_label().unwrap(), "SESSION1");

    iso.load_session(2).unwrap();
    assert_eq!(iso.volume_label().unwrap(), "SESSION2");

    let file = iso.search_file("\\TWO.BIN").unwrap();
    assert_eq!((file.lba, file.size), (1030, 8));
    assert_eq!(iso.read_file(&file).unwrap(), vec![0x5A; 8]);

    // The descriptor was located by scanning forward from the session
    // start; afterwards it is fetched through the rebased offset.
    assert_eq!(seeks_to(&script, 1016), 1);
}

#[test]
fn test_load_session_missing_session_restarts_drive() {
    let (mut iso, script) = iso_with(test_volume());
    assert_eq!(iso.volume_label().unwrap(), "TESTDISC");

    assert_eq!(iso.load_session(5), Err(IsoError::SeekError));
    assert_eq!(iso.iso_error(), Some(IsoError::SeekError));
    // Init ran once at startup and once more for the restart.
    assert_eq!(script.submitted_count(Opcode::Init), 2);

    // The first session's volume is still served afterwards.
    assert_eq!(iso.volume_label().unwrap(), "TESTDISC");
    assert_eq!(iso.iso_error(), None);
}
