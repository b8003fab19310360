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

//! Disc image inspector
//!
//! Command-line front end over the filesystem layer, driving a disc image
//! through the simulated drive port. Useful for checking what a built
//! image actually contains before burning it.

use std::env;
use std::fs;

use cdrx::core::drive::CdDrive;
use cdrx::core::iso::IsoFs;
use cdrx::core::sim::{DiscImage, SimPort};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <IMAGE> <COMMAND> [ARGS]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  label                 print the volume label");
    eprintln!("  ls [PATH]             list a directory (default: root)");
    eprintln!("  find <PATH>           resolve a file to its sector and size");
    eprintln!("  extract <PATH> <OUT>  copy a file out of the image");
    eprintln!();
    eprintln!("Example: {} game.iso ls \\\\DATA", program);
    std::process::exit(1);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let image = DiscImage::open(&args[1])?;
    log::info!("CD-ROM: image {} ({} sectors)", args[1], image.sector_count());

    let port = SimPort::new(image);
    let clock = port.clock();
    let mut drive = CdDrive::new(port, clock);
    drive.init()?;
    let mut iso = IsoFs::new(drive);

    match args[2].as_str() {
        "label" => {
            println!("{}", iso.volume_label()?);
        }
        "ls" => {
            let path = args.get(3).map(String::as_str).unwrap_or("\\");
            for entry in iso.open_dir(path)? {
                let kind = if entry.is_dir { 'd' } else { '-' };
                println!("{} {:>10} {:>8}  {}", kind, entry.lba, entry.size, entry.name);
            }
        }
        "find" => {
            let path = args.get(3).map(String::as_str).unwrap_or_else(|| usage(&args[0]));
            let file = iso.search_file(path)?;
            println!(
                "{}  LBA {} ({})  {} bytes",
                file.name,
                file.lba,
                file.position(),
                file.size
            );
        }
        "extract" => {
            if args.len() < 5 {
                usage(&args[0]);
            }
            let file = iso.search_file(&args[3])?;
            let data = iso.read_file(&file)?;
            fs::write(&args[4], &data)?;
            println!("{} -> {} ({} bytes)", file.name, args[4], data.len());
        }
        _ => usage(&args[0]),
    }

    Ok(())
}
