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

//! Core CD-ROM access components
//!
//! # Architecture
//!
//! - [`drive`]: Command protocol engine and retrying block reader
//! - [`iso`]: ISO9660 filesystem reader and caches
//! - [`port`]: Hardware port abstraction ([`port::DrivePort`])
//! - [`clock`]: Coarse tick source for stall deadlines and cooldowns
//! - [`sim`]: Simulated controller over disc images
//! - [`error`]: Error types for both layers

pub mod clock;
pub mod drive;
pub mod error;
pub mod iso;
pub mod port;
pub mod sim;
