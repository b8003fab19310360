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

//! cdrx: An interrupt-driven CD-ROM access layer
//!
//! This crate provides the three layers between an application and a
//! PSX-style disc drive controller:
//!
//! - [`core::drive`]: the command protocol engine and the retrying block
//!   reader, driven entirely by controller interrupts
//! - [`core::iso`]: an ISO9660 filesystem reader with per-medium descriptor
//!   and directory caching
//! - [`core::sim`]: a simulated controller over disc image files, used by
//!   the tests and the bundled tooling
//!
//! # Example
//!
//! ```no_run
//! use cdrx::core::clock::SharedTicks;
//! use cdrx::core::drive::CdDrive;
//! use cdrx::core::iso::IsoFs;
//! use cdrx::core::sim::{DiscImage, SimPort};
//!
//! let port = SimPort::new(DiscImage::open("game.iso")?);
//! let mut drive = CdDrive::new(port, SharedTicks::new());
//! drive.init()?;
//!
//! let mut fs = IsoFs::new(drive);
//! let file = fs.search_file("\\SYSTEM.CNF")?;
//! let data = fs.read_file(&file)?;
//! println!("{}: {} bytes", file.name, data.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Getting Started
//!
//! 1. Implement [`core::port::DrivePort`] over your controller registers
//!    (or use [`core::sim::SimPort`] with a disc image)
//! 2. Create a [`core::drive::CdDrive`] and call its `init`
//! 3. Wrap it in [`core::iso::IsoFs`] for file access, or issue commands
//!    and block reads against the drive directly
//!
//! # Error Handling
//!
//! Drive-level operations return [`core::error::Result<T>`], an alias for
//! `Result<T, CdError>`; filesystem operations fail with
//! [`core::error::IsoError`], and the most recent failure stays inspectable
//! via [`core::iso::IsoFs::iso_error`].

pub mod core;

// Re-export commonly used types
pub use core::error::{CdError, IsoError, Result};
