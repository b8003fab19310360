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

//! Hardware port abstraction for the CD-ROM controller
//!
//! All register-level traffic between the protocol engine and the drive
//! controller goes through the [`DrivePort`] trait: command/parameter
//! submission, interrupt cause handling, the response FIFO and sector data
//! transfer. Embedders implement it over their register window; the crate
//! ships a scripted implementation in [`crate::core::sim`] for tests and
//! tooling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  IsoFs (filesystem cache)    │
//! ├──────────────────────────────┤
//! │  CdDrive (engine + reader)   │
//! ├──────────────────────────────┤
//! │  DrivePort (this trait)      │
//! ├──────────────────────────────┤
//! │  controller registers / sim  │
//! └──────────────────────────────┘
//! ```
//!
//! # Interrupt causes
//!
//! The controller signals five interrupt causes, delivered strictly in FIFO
//! order:
//!
//! | Code | Kind        | Meaning                                  |
//! |------|-------------|------------------------------------------|
//! | 1    | DataReady   | A sector is available for transfer       |
//! | 2    | Complete    | A background command finished            |
//! | 3    | Acknowledge | A command was accepted (first response)  |
//! | 4    | DataEnd     | End of data / end of track reached       |
//! | 5    | DiskError   | The controller reported a fault          |

/// Interrupt cause reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrqKind {
    /// A sector is available for transfer (recurs while streaming).
    DataReady = 1,
    /// A background (blocking-class) command finished.
    Complete = 2,
    /// A command was accepted; first response is in the FIFO.
    Acknowledge = 3,
    /// End of data or end of track.
    DataEnd = 4,
    /// Controller-reported fault; response carries status and an error code.
    DiskError = 5,
}

impl IrqKind {
    /// Decode a raw interrupt cause code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::DataReady),
            2 => Some(Self::Complete),
            3 => Some(Self::Acknowledge),
            4 => Some(Self::DataEnd),
            5 => Some(Self::DiskError),
            _ => None,
        }
    }

    /// Raw cause code as latched in the interrupt flag register.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Register-level access to the drive controller.
///
/// Methods mirror the controller's host-visible port: they are cheap,
/// non-blocking register operations. The engine guarantees it only calls
/// [`DrivePort::pop_response`] after [`DrivePort::has_response`] reported
/// `true` and only calls [`DrivePort::read_data`] in response to a
/// [`IrqKind::DataReady`] cause.
pub trait DrivePort {
    /// Reset the controller: clear FIFOs and any latched interrupt causes.
    fn reset(&mut self);

    /// Unmask all interrupt causes so they reach the host.
    fn enable_interrupts(&mut self);

    /// Oldest undelivered interrupt cause, if any, without clearing it.
    fn pending_irq(&mut self) -> Option<IrqKind>;

    /// Clear the given cause at the controller level.
    fn acknowledge(&mut self, irq: IrqKind);

    /// Raise the sector-request strobe so the sector payload becomes
    /// readable via [`DrivePort::read_data`].
    fn request_data(&mut self);

    /// `true` while the response FIFO holds at least one byte.
    fn has_response(&mut self) -> bool;

    /// Pop one byte from the response FIFO.
    fn pop_response(&mut self) -> u8;

    /// `true` while the controller is busy accepting a command.
    fn busy(&mut self) -> bool;

    /// Write the parameter bytes, then the command byte.
    fn submit(&mut self, opcode: u8, params: &[u8]);

    /// Copy one sector payload into `dest`; `dest.len()` selects the
    /// transfer size (2048-byte data or 2340-byte whole-sector).
    fn read_data(&mut self, dest: &mut [u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_kind_round_trips_codes() {
        for code in 1..=5u8 {
            let kind = IrqKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn test_irq_kind_rejects_unknown_codes() {
        assert_eq!(IrqKind::from_code(0), None);
        assert_eq!(IrqKind::from_code(6), None);
        assert_eq!(IrqKind::from_code(0xFF), None);
    }
}
