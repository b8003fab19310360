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

//! Error types for the disc access layer
//!
//! Two error domains exist, matching the layering of the crate:
//!
//! - [`CdError`]: protocol-engine and block-reader failures (timeouts,
//!   controller faults, retry exhaustion, cancellation).
//! - [`IsoError`]: filesystem-layer failures (seek/read mapped at the layer
//!   boundary, volume validation, lid state, lookup misses).
//!
//! The engine additionally keeps a last-status/last-error pair readable via
//! accessors, and the filesystem layer records its last error for the
//! `iso_error()` style of inspection the driver API traditionally offers.

use thiserror::Error;

/// Crate-wide result alias; defaults to the engine error domain.
pub type Result<T, E = CdError> = std::result::Result<T, E>;

/// Protocol-engine and block-reader errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CdError {
    /// The drive never acknowledged a command within the wait window.
    ///
    /// Non-fatal: the controller may simply be busy. The caller may retry.
    #[error("no acknowledge from drive (busy or disconnected)")]
    AcknowledgeTimeout,

    /// A blocking-class command never reported completion.
    #[error("command did not complete within the wait window")]
    SyncTimeout,

    /// The controller reported a disc error, with its sub-code.
    #[error("drive reported disc error (code 0x{code:02X})")]
    DiskError { code: u8 },

    /// A block read failed more times than the attempt budget allowed.
    #[error("read failed after exhausting all retry attempts")]
    RetryExhausted,

    /// The read was cancelled via `read_break`.
    #[error("read aborted")]
    Aborted,

    /// A new read was requested while another one is still pending.
    #[error("another read is already in progress")]
    ReadBusy,

    /// The parameter slice does not match the command's required length.
    #[error("command 0x{opcode:02X} expects {expected} parameter bytes, got {got}")]
    BadParameter {
        opcode: u8,
        expected: usize,
        got: usize,
    },
}

/// ISO9660 filesystem-layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsoError {
    /// Positioning the drive for a filesystem read failed.
    #[error("drive seek failed")]
    SeekError,

    /// A filesystem sector read failed.
    #[error("sector read failed")]
    ReadError,

    /// No valid ISO9660 volume descriptor was found on the disc.
    #[error("disc has no valid ISO9660 volume descriptor")]
    InvalidFilesystem,

    /// The drive lid is open; no medium can be accessed.
    #[error("drive lid is open")]
    LidOpen,

    /// The path does not name an existing directory or file.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// The path is malformed (empty, or missing a leaf component).
    #[error("malformed path: {path}")]
    InvalidPath { path: String },
}
