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

//! CD-ROM command protocol engine
//!
//! [`CdDrive`] drives the disc controller asynchronously under interrupts:
//! commands go out through the port, responses and interrupt causes come
//! back through [`CdDrive::service_irq`], and the engine keeps the cached
//! drive status, last command, last mode and last seek position that the
//! layers above build on.
//!
//! # Commands
//!
//! Commands are issued by opcode; per-command protocol behavior lives in the
//! static flags table (see [`command`]):
//!
//! | Command | Name    | Description                              |
//! |---------|---------|------------------------------------------|
//! | 0x01    | Nop     | Refresh the cached drive status          |
//! | 0x02    | SetLoc  | Set seek target position (MSF, BCD)      |
//! | 0x06    | ReadN   | Start reading data sectors               |
//! | 0x09    | Pause   | Pause reading or playback                |
//! | 0x0A    | Init    | Initialize the drive                     |
//! | 0x0E    | SetMode | Set drive mode (speed, sector size, ...) |
//! | 0x15    | SeekL   | Seek to target position (data)           |
//! | 0x19    | Test    | Diagnostics / region probe               |
//! | 0x1A    | GetId   | Identify disc and region                 |
//! | 0x1B    | ReadS   | Start streaming without hardware retry   |
//! | 0x1E    | ReadToc | Re-read the table of contents            |
//!
//! # Interrupt handling
//!
//! The embedder registers [`CdDrive::service_irq`] with its interrupt
//! delivery mechanism (or pumps it from a polling loop). Each invocation
//! consumes at most one pending cause: it acknowledges the controller,
//! requests sector data on data-ready, copies up to 8 response bytes,
//! updates the cached status where the command's table entry says the
//! response carries one, and dispatches exactly one callback.
//!
//! Blocking calls (`command`, `control`, `control_blocking`,
//! `sync(Blocking)`) busy-wait with a bounded iteration budget, pumping
//! `service_irq` as they spin. They must never be called from inside a
//! callback.

pub mod command;
pub mod position;
mod read;

pub use command::{sector_size_for, CommandFlags, DriveMode, DriveStatus, Opcode};
pub use position::{bcd_to_dec, dec_to_bcd, Msf};
pub use read::ReadStatus;

use crate::core::clock::{TickCount, TickSource};
use crate::core::error::{CdError, Result};
use crate::core::port::{DrivePort, IrqKind};
use read::PendingRead;

/// User-data transfer size in the default mode.
pub const DATA_SECTOR_SIZE: usize = 2048;
/// Transfer size with [`DriveMode::WHOLE_SECTOR`] set (header through ECC).
pub const WHOLE_SECTOR_SIZE: usize = 2340;

/// Iteration budget for acknowledge busy-waits.
const ACK_TIMEOUT: u32 = 0x0010_0000;
/// Iteration budget for completion busy-waits.
const SYNC_TIMEOUT: u32 = 0x0010_0000;
/// Iteration budget for the pre-submit controller busy flag.
const BUSY_TIMEOUT: u32 = 0x0010_0000;

/// Notification hook invoked from `service_irq` with the interrupt kind and
/// the response bytes. Hooks observe; they cannot re-enter the engine.
pub type CdCallback = Box<dyn FnMut(IrqKind, &[u8])>;

/// Who currently receives data-ready events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyOwner {
    /// The user-registered ready callback (if any).
    Application,
    /// The block reader, for the duration of a streaming read.
    Reader,
}

/// Wait behavior for `sync` and `read_sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Evaluate once and return immediately.
    Poll,
    /// Busy-wait (pumping `service_irq`) until a terminal state.
    Blocking,
}

/// Completion state of the most recent blocking-class command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Still waiting for the background completion.
    Busy,
    /// Completed (or the command had no background phase).
    Complete,
    /// The controller reported a disc error; carries the sub-code.
    Error(u8),
}

/// Drive region reported by the diagnostics probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveRegion {
    Japan,
    NorthAmerica,
    Europe,
    /// Network units sold worldwide.
    Worldwide,
    Debug,
    Unknown,
}

/// Command protocol engine for one disc drive.
///
/// Generic over the hardware port and the tick source so embedders bring
/// their own register access and frame counter; see [`crate::core::sim`]
/// for the scripted port used by tests and tooling.
///
/// # Example
///
/// ```no_run
/// use cdrx::core::clock::SharedTicks;
/// use cdrx::core::drive::CdDrive;
/// use cdrx::core::sim::{DiscImage, SimPort};
///
/// let port = SimPort::new(DiscImage::blank(100));
/// let mut drive = CdDrive::new(port, SharedTicks::new());
/// drive.init()?;
/// assert!(!drive.status().is_empty());
/// # Ok::<(), cdrx::core::error::CdError>(())
/// ```
pub struct CdDrive<P: DrivePort, C: TickSource> {
    port: P,
    clock: C,

    status: DriveStatus,
    last_command: Option<Opcode>,
    last_mode: DriveMode,
    last_pos: Msf,
    last_response: [u8; 8],
    response_len: usize,
    last_irq: Option<IrqKind>,
    last_error: u8,
    media_changed: bool,

    ack_pending: bool,
    sync_pending: bool,

    ready_owner: ReadyOwner,
    ready_callback: Option<CdCallback>,
    sync_callback: Option<CdCallback>,
    autopause_callback: Option<CdCallback>,
    read_callback: Option<CdCallback>,

    read: Option<PendingRead>,
    /// No read command should be issued before this stamp; the controller
    /// needs settling time after a pause.
    settle_until: TickCount,
}

impl<P: DrivePort, C: TickSource> CdDrive<P, C> {
    /// Wrap a port and tick source. The drive is not usable until
    /// [`CdDrive::init`] has run.
    pub fn new(port: P, clock: C) -> Self {
        Self {
            port,
            clock,
            status: DriveStatus::empty(),
            last_command: None,
            last_mode: DriveMode::empty(),
            last_pos: Msf::default(),
            last_response: [0; 8],
            response_len: 0,
            last_irq: None,
            last_error: 0,
            media_changed: false,
            ack_pending: false,
            sync_pending: false,
            ready_owner: ReadyOwner::Application,
            ready_callback: None,
            sync_callback: None,
            autopause_callback: None,
            read_callback: None,
            read: None,
            settle_until: 0,
        }
    }

    /// Initialize the drive.
    ///
    /// Resets the controller, enables interrupt delivery, issues a no-op
    /// followed by the init command, waits for its completion and finally
    /// demutes audio. Fails with [`CdError::DiskError`] if the drive
    /// reports a fault during setup (bad disc, or no disc inserted).
    pub fn init(&mut self) -> Result<DriveStatus> {
        self.port.reset();
        self.port.enable_interrupts();

        self.last_mode = DriveMode::empty();
        self.ack_pending = false;
        self.sync_pending = false;
        self.ready_owner = ReadyOwner::Application;
        self.read = None;
        self.settle_until = 0;
        self.media_changed = true;

        self.command(Opcode::Nop, &[])?;
        self.command(Opcode::Init, &[])?;

        if let SyncState::Error(code) = self.sync(SyncMode::Blocking)? {
            log::error!("CD-ROM: setup error, bad disc/drive or no disc inserted");
            return Err(CdError::DiskError { code });
        }

        self.command(Opcode::Demute, &[])?;
        log::info!("CD-ROM: setup done");
        Ok(self.status)
    }

    /// Service one pending controller interrupt, if any.
    ///
    /// This is the interrupt handler: the embedder calls it from its
    /// interrupt dispatch (or a polling loop). It never blocks and never
    /// waits for another interrupt.
    pub fn service_irq(&mut self) {
        let Some(irq) = self.port.pending_irq() else {
            return;
        };

        if irq == IrqKind::DataReady {
            self.port.request_data();
        }
        self.port.acknowledge(irq);

        let mut resp = [0u8; 8];
        let mut len = 0;
        while len < resp.len() && self.port.has_response() {
            resp[len] = self.port.pop_response();
            len += 1;
        }
        self.last_response = resp;
        self.response_len = len;

        log::trace!("CD-ROM: irq {:?}, {} response bytes", irq, len);

        let flags = self
            .last_command
            .map(Opcode::flags)
            .unwrap_or(CommandFlags::empty());

        match irq {
            IrqKind::DataReady => {
                if len > 0 {
                    self.update_status(resp[0]);
                }
                match self.ready_owner {
                    ReadyOwner::Reader => self.reader_on_sector(irq, &resp[..len]),
                    ReadyOwner::Application => {
                        if let Some(cb) = self.ready_callback.as_mut() {
                            cb(irq, &resp[..len]);
                        }
                    }
                }
            }
            IrqKind::Complete => {
                self.sync_pending = false;
                if flags.contains(CommandFlags::COMPLETE_STATUS) && len > 0 {
                    self.update_status(resp[0]);
                }
                if let Some(cb) = self.sync_callback.as_mut() {
                    cb(irq, &resp[..len]);
                }
            }
            IrqKind::Acknowledge => {
                self.ack_pending = false;
                if flags.contains(CommandFlags::STATUS) && len > 0 {
                    self.update_status(resp[0]);
                }
            }
            IrqKind::DataEnd => {
                if len > 0 {
                    self.update_status(resp[0]);
                }
                if let Some(cb) = self.autopause_callback.as_mut() {
                    cb(irq, &resp[..len]);
                }
            }
            IrqKind::DiskError => {
                if len > 1 {
                    self.last_error = resp[1];
                }
                // Wake any blocking waiter so it never hangs on a fault.
                if self.ack_pending || self.sync_pending {
                    if let Some(cb) = self.sync_callback.as_mut() {
                        cb(irq, &resp[..len]);
                    }
                    self.ack_pending = false;
                    self.sync_pending = false;
                }
                if len > 0 {
                    self.update_status(resp[0]);
                }
                if let Some(cb) = self.ready_callback.as_mut() {
                    cb(irq, &resp[..len]);
                }
            }
        }

        self.last_irq = Some(irq);
    }

    /// Drain every currently pending interrupt.
    fn pump(&mut self) {
        while self.port.pending_irq().is_some() {
            self.service_irq();
        }
    }

    fn update_status(&mut self, byte: u8) {
        let last = self.status;
        let status = DriveStatus::from_bits_retain(byte);
        self.status = status;

        if !last.contains(DriveStatus::ERROR) && status.contains(DriveStatus::ERROR) {
            log::warn!(
                "CD-ROM: drive error, status=0x{:02X}, code=0x{:02X}",
                byte,
                self.last_error
            );
        }
        if !last.contains(DriveStatus::SHELL_OPEN) && status.contains(DriveStatus::SHELL_OPEN) {
            log::debug!("CD-ROM: shell opened, invalidating cache");
            self.media_changed = true;
        }
    }

    /// Push a command with caller-supplied parameter bytes, without waiting.
    ///
    /// This is the arbitrary-length escape hatch: the parameter slice is
    /// sent as-is, bypassing the table-driven routing of [`CdDrive::control_async`].
    pub fn command_async(&mut self, op: Opcode, params: &[u8]) {
        self.last_command = Some(op);
        self.ack_pending = true;
        self.sync_pending = op.flags().contains(CommandFlags::BLOCKING);

        // Track the last mode and seek location set, so read retries can
        // restart from the right place.
        if op == Opcode::SetLoc && params.len() >= 3 {
            self.last_pos = Msf::new(params[0], params[1], params[2]);
        } else if op == Opcode::SetMode && !params.is_empty() {
            self.last_mode = DriveMode::from_bits_retain(params[0]);
        }

        let mut spins = 0;
        while self.port.busy() {
            spins += 1;
            if spins >= BUSY_TIMEOUT {
                log::warn!("CD-ROM: controller stuck busy before {:?}", op);
                break;
            }
        }

        log::debug!("CD-ROM: command {:?} (0x{:02X})", op, op as u8);
        self.port.submit(op as u8, params);
    }

    /// Push a command and busy-wait for its acknowledge.
    ///
    /// Returns the refreshed drive status, or [`CdError::AcknowledgeTimeout`]
    /// if the controller never answered. A timeout is non-fatal; the caller
    /// may retry.
    pub fn command(&mut self, op: Opcode, params: &[u8]) -> Result<DriveStatus> {
        self.command_async(op, params);
        self.wait_ack(op)
    }

    fn wait_ack(&mut self, op: Opcode) -> Result<DriveStatus> {
        for _ in 0..ACK_TIMEOUT {
            self.service_irq();
            if !self.ack_pending {
                return Ok(self.status);
            }
        }
        log::warn!("CD-ROM: {:?} failed, acknowledge timeout", op);
        Err(CdError::AcknowledgeTimeout)
    }

    /// Issue a command with table-driven parameter routing, without waiting.
    ///
    /// The flags table decides what happens to `param`: sent as the
    /// command's own parameter bytes, sent as a separate preceding SetLoc
    /// (for the seek/read family), or required to be absent. Commands with
    /// an optional parameter accept `None`.
    pub fn control_async(&mut self, op: Opcode, param: Option<&[u8]>) -> Result<()> {
        let flags = op.flags();
        let wanted = op.param_len();

        if flags.contains(CommandFlags::OPTIONAL_PARAM) {
            match param {
                None => self.command_async(op, &[]),
                Some(p) if p.len() >= wanted => self.command_async(op, &p[..wanted]),
                Some(p) => {
                    return Err(CdError::BadParameter {
                        opcode: op as u8,
                        expected: wanted,
                        got: p.len(),
                    })
                }
            }
        } else if flags.contains(CommandFlags::SETLOC) {
            // The command itself takes no parameter; a supplied position is
            // sent to the drive as a separate SetLoc first.
            if let Some(p) = param {
                if p.len() < 3 {
                    return Err(CdError::BadParameter {
                        opcode: Opcode::SetLoc as u8,
                        expected: 3,
                        got: p.len(),
                    });
                }
                self.command_async(Opcode::SetLoc, &p[..3]);
            }
            self.command_async(op, &[]);
        } else {
            match (wanted, param) {
                (0, _) => self.command_async(op, &[]),
                (n, Some(p)) if p.len() >= n => self.command_async(op, &p[..n]),
                (n, got) => {
                    return Err(CdError::BadParameter {
                        opcode: op as u8,
                        expected: n,
                        got: got.map_or(0, <[u8]>::len),
                    })
                }
            }
        }
        Ok(())
    }

    /// Issue a command with table-driven routing and wait for its
    /// acknowledge.
    ///
    /// # Arguments
    ///
    /// * `op` - Command to issue
    /// * `param` - Parameter bytes; the flags table decides whether they
    ///   go out as command parameters or as a preceding SetLoc
    ///
    /// # Returns
    ///
    /// - `Ok(DriveStatus)` refreshed by the acknowledge
    /// - `Err(CdError::BadParameter)` if `param` does not fit the table
    /// - `Err(CdError::AcknowledgeTimeout)` if the controller stays quiet
    pub fn control(&mut self, op: Opcode, param: Option<&[u8]>) -> Result<DriveStatus> {
        self.control_async(op, param)?;
        self.wait_ack(op)
    }

    /// Issue a command and wait for its background completion.
    ///
    /// Equivalent to [`CdDrive::control`] followed by a blocking
    /// [`CdDrive::sync`]; a controller fault surfaces as
    /// [`CdError::DiskError`].
    pub fn control_blocking(&mut self, op: Opcode, param: Option<&[u8]>) -> Result<DriveStatus> {
        self.control(op, param)?;
        match self.sync(SyncMode::Blocking)? {
            SyncState::Error(code) => Err(CdError::DiskError { code }),
            _ => Ok(self.status),
        }
    }

    /// Completion state of the most recent blocking-class command.
    ///
    /// `Poll` evaluates once (after draining pending interrupts);
    /// `Blocking` busy-waits within a bounded budget and fails with
    /// [`CdError::SyncTimeout`] if the completion never arrives.
    pub fn sync(&mut self, mode: SyncMode) -> Result<SyncState> {
        match mode {
            SyncMode::Poll => {
                self.pump();
                Ok(self.sync_state())
            }
            SyncMode::Blocking => {
                for _ in 0..SYNC_TIMEOUT {
                    self.service_irq();
                    if !self.sync_pending {
                        return Ok(self.sync_state());
                    }
                }
                log::warn!("CD-ROM: sync timeout");
                Err(CdError::SyncTimeout)
            }
        }
    }

    fn sync_state(&self) -> SyncState {
        if self.sync_pending {
            return SyncState::Busy;
        }
        match self.last_irq {
            Some(IrqKind::DiskError) => SyncState::Error(self.last_error),
            _ => SyncState::Complete,
        }
    }

    /// Replace the user ready callback, returning the previous one.
    ///
    /// The hook observes data-ready events not claimed by an active block
    /// read, and every disk-error event.
    pub fn set_ready_callback(&mut self, cb: Option<CdCallback>) -> Option<CdCallback> {
        std::mem::replace(&mut self.ready_callback, cb)
    }

    /// Replace the completion callback, returning the previous one.
    pub fn set_sync_callback(&mut self, cb: Option<CdCallback>) -> Option<CdCallback> {
        std::mem::replace(&mut self.sync_callback, cb)
    }

    /// Replace the autopause (data-end) callback, returning the previous
    /// one.
    pub fn set_autopause_callback(&mut self, cb: Option<CdCallback>) -> Option<CdCallback> {
        std::mem::replace(&mut self.autopause_callback, cb)
    }

    /// Cached drive status from the most recent status-bearing response.
    pub fn status(&self) -> DriveStatus {
        self.status
    }

    /// Opcode of the most recently submitted command.
    pub fn last_command(&self) -> Option<Opcode> {
        self.last_command
    }

    /// Mode set by the most recent SetMode.
    pub fn last_mode(&self) -> DriveMode {
        self.last_mode
    }

    /// Seek target set by the most recent SetLoc.
    pub fn last_position(&self) -> Msf {
        self.last_pos
    }

    /// Response bytes captured by the most recent interrupt.
    pub fn last_response(&self) -> &[u8] {
        &self.last_response[..self.response_len]
    }

    /// Kind of the most recent interrupt.
    pub fn last_irq(&self) -> Option<IrqKind> {
        self.last_irq
    }

    /// Error sub-code from the most recent disk-error interrupt.
    pub fn last_error(&self) -> u8 {
        self.last_error
    }

    /// Whether a media change (shell open) has been observed since the flag
    /// was last cleared.
    pub fn media_changed(&self) -> bool {
        self.media_changed
    }

    pub(crate) fn clear_media_changed(&mut self) {
        self.media_changed = false;
    }

    pub(crate) fn mark_media_changed(&mut self) {
        self.media_changed = true;
    }

    /// Borrow the underlying port (e.g. for embedder-side data transfers).
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Read the table of contents: the starting position of every track.
    ///
    /// Issues GetTN, then GetTD per track.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Msf>)` with one entry per track, its number in
    ///   [`Msf::track`]
    /// - `Err(CdError::DiskError)` if the drive rejects a track query
    pub fn toc(&mut self) -> Result<Vec<Msf>> {
        self.command(Opcode::GetTN, &[])?;
        if self.last_irq == Some(IrqKind::DiskError) {
            return Err(CdError::DiskError {
                code: self.last_error,
            });
        }

        let first = bcd_to_dec(self.last_response[1]);
        let last = bcd_to_dec(self.last_response[2]);

        let mut toc = Vec::new();
        for track in first..=last {
            self.command(Opcode::GetTD, &[dec_to_bcd(track)])?;
            if self.last_irq == Some(IrqKind::DiskError) {
                return Err(CdError::DiskError {
                    code: self.last_error,
                });
            }
            toc.push(Msf {
                minute: self.last_response[1],
                second: self.last_response[2],
                sector: 0,
                track: dec_to_bcd(track),
            });
        }
        Ok(toc)
    }

    /// Probe the drive's region via the diagnostics command.
    pub fn region(&mut self) -> Result<DriveRegion> {
        match self.command(Opcode::Test, &[0x22]) {
            Ok(_) => {}
            Err(CdError::AcknowledgeTimeout) => {
                // The probe subfunction is missing from the earliest
                // Japanese firmware, so a dead probe still identifies it.
                log::warn!("CD-ROM: failed to probe drive region");
                return Ok(if self.last_response[1] == 0x10 {
                    DriveRegion::Japan
                } else {
                    DriveRegion::Unknown
                });
            }
            Err(err) => return Err(err),
        }

        if self.last_irq == Some(IrqKind::DiskError) {
            return Ok(if self.last_error == 0x10 {
                DriveRegion::Japan
            } else {
                DriveRegion::Unknown
            });
        }

        let resp = &self.last_response[..self.response_len];
        let text = match resp.iter().position(|&b| b == 0) {
            Some(n) => &resp[..n],
            None => resp,
        };
        log::debug!("CD-ROM: drive region string {:?}", text);

        // The response FIFO only yields the first 8 bytes, so match on the
        // unique prefixes of the known region strings.
        Ok(if text.starts_with(b"for Japa") {
            DriveRegion::Japan
        } else if text.starts_with(b"for US/A") {
            DriveRegion::Debug
        } else if text.starts_with(b"for U/C") {
            DriveRegion::NorthAmerica
        } else if text.starts_with(b"for Euro") {
            DriveRegion::Europe
        } else if text.starts_with(b"for NET") {
            DriveRegion::Worldwide
        } else {
            DriveRegion::Unknown
        })
    }
}
