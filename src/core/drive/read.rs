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

//! Retrying block reader
//!
//! Streams N sectors into an owned buffer, one sector per data-ready
//! interrupt, and recovers from stalls by pausing the drive, waiting out a
//! cooldown and re-issuing the read from the first sector that has not
//! been transferred yet.
//!
//! # Read lifecycle
//!
//! ```text
//!  read_retry()
//!      |
//!      v
//!  [Streaming] --data-ready--> copy sector, refresh deadline
//!      |   \
//!      |    `--last sector--> pause drive --> [Done]
//!      |
//!      +--deadline lapsed, attempts left--> pause --> [Cooldown]
//!      |                                                  |
//!      |                 <-- SetLoc(first untransferred) -+
//!      |
//!      +--deadline lapsed, no attempts left--> Failed(RetryExhausted)
//!      +--disk error----------------------> Failed(DiskError)
//!      +--read_break() sentinel-----------> pause --> [Aborted]
//! ```
//!
//! Stall detection is passive: deadlines are only examined when the caller
//! polls or blocks on [`CdDrive::read_sync`], never from the interrupt
//! handler itself.

use crate::core::clock::{TickCount, TickSource};
use crate::core::drive::command::sector_size_for;
use crate::core::drive::{CdCallback, CdDrive, DriveMode, Msf, Opcode, ReadyOwner, SyncMode, SyncState};
use crate::core::error::{CdError, Result};
use crate::core::port::{DrivePort, IrqKind};

/// Ticks without a data-ready interrupt before a read counts as stalled.
const READ_TIMEOUT_TICKS: TickCount = 180;
/// Ticks the controller is left alone after a reader-issued pause.
const COOLDOWN_TICKS: TickCount = 60;

/// Signed wrapping comparison: has `now` passed `stamp`?
fn ticks_past(now: TickCount, stamp: TickCount) -> bool {
    now.wrapping_sub(stamp) as i32 > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadPhase {
    /// The drive is streaming; a deadline is armed.
    Streaming,
    /// Paused after a stall (or deferred at start); the read re-issues once
    /// `resume_at` has passed.
    Cooldown { resume_at: TickCount },
    /// All sectors landed; drive pause already issued.
    Done,
    /// A break sentinel consumed the final data-ready event.
    Aborted,
}

/// An in-flight block read owned by the engine.
pub(super) struct PendingRead {
    /// Sector count of the current read window (rebased on each retry).
    total: i32,
    /// Sectors still expected. Negative values are the break sentinel: -1
    /// requests an abort, -2 marks the post-abort sector as landed.
    remaining: i32,
    attempts_left: u32,
    deadline: TickCount,
    phase: ReadPhase,
    mode: DriveMode,
    sector_size: usize,
    /// Write offset into `buf`, in bytes.
    cursor: usize,
    /// Whether a read command has gone to the drive yet; retries need a
    /// SetLoc first, the initial issue needs a SetMode.
    issued: bool,
    buf: Vec<u8>,
}

/// Progress of the current (or most recent) block read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// No read has been started since the last one was consumed.
    Idle,
    /// Streaming or waiting out a retry cooldown.
    Pending { remaining: u32 },
    /// All sectors transferred; the buffer is handed over exactly once.
    Complete(Vec<u8>),
    /// Stopped by [`CdDrive::read_break`]; carries the sectors that landed
    /// before the break.
    Aborted(Vec<u8>),
    /// The read failed; any partial data is discarded.
    Failed(CdError),
}

enum PollAction {
    Idle,
    Wait(i32),
    Finish,
    Abort { pause: bool },
    Resume,
    Retry(i32),
    Exhausted,
    Fault(u8),
}

impl<P: DrivePort, C: TickSource> CdDrive<P, C> {
    /// Start reading `sectors` data sectors at the current seek target,
    /// with a single attempt. See [`CdDrive::read_retry`].
    pub fn read(&mut self, sectors: usize, mode: DriveMode) -> Result<()> {
        self.read_retry(sectors, mode, 1)
    }

    /// Start reading `sectors` sectors at the current seek target,
    /// retrying up to `attempts - 1` times on stall.
    ///
    /// The read proceeds in the background; its buffer is handed over by
    /// [`CdDrive::read_sync`]. While a read is in flight the engine owns
    /// all data-ready events.
    ///
    /// If the drive was paused moments ago the initial read command is
    /// deferred until the controller has settled; the deferred issue
    /// happens on a later `read_sync` call.
    ///
    /// # Arguments
    ///
    /// * `sectors` - Number of sectors to transfer
    /// * `mode` - Drive mode for the transfer; [`DriveMode::WHOLE_SECTOR`]
    ///   selects 2340-byte sectors, 2048-byte data sectors otherwise
    /// * `attempts` - Total tries, counting the first
    ///
    /// # Returns
    ///
    /// - `Ok(())` once the read is underway (or deferred)
    /// - `Err(CdError::ReadBusy)` if another read is still in flight
    pub fn read_retry(&mut self, sectors: usize, mode: DriveMode, attempts: u32) -> Result<()> {
        debug_assert!(sectors > 0 && attempts > 0);
        if sectors == 0 {
            return Ok(());
        }
        if let ReadStatus::Pending { remaining } = self.read_sync(SyncMode::Poll) {
            log::warn!(
                "CD-ROM: read rejected, {} sectors already in flight",
                remaining
            );
            return Err(CdError::ReadBusy);
        }

        let now = self.clock.ticks();
        let sector_size = sector_size_for(mode);
        let resume_at = if self.settle_until != 0 && !ticks_past(now, self.settle_until) {
            log::debug!("CD-ROM: read deferred, controller settling after pause");
            self.settle_until
        } else {
            now
        };

        self.read = Some(PendingRead {
            total: sectors as i32,
            remaining: sectors as i32,
            attempts_left: attempts.saturating_sub(1),
            deadline: 0,
            phase: ReadPhase::Cooldown { resume_at },
            mode,
            sector_size,
            cursor: 0,
            issued: false,
            buf: vec![0; sectors * sector_size],
        });

        if resume_at == now {
            if let Err(err) = self.resume_read() {
                self.read = None;
                self.ready_owner = ReadyOwner::Application;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Ask the in-flight read to stop at the next sector boundary.
    ///
    /// Advisory: the sector already in flight still lands, after which the
    /// drive is paused and `read_sync` reports [`ReadStatus::Aborted`]
    /// with the data transferred so far. No effect when nothing is
    /// pending.
    pub fn read_break(&mut self) {
        if let Some(read) = self.read.as_mut() {
            if read.remaining > 0 {
                log::debug!("CD-ROM: read break, {} sectors unread", read.remaining);
                read.remaining = -1;
            }
        }
    }

    /// Progress of the current read.
    ///
    /// `Poll` drains pending interrupts, runs stall/cooldown bookkeeping
    /// once and returns. `Blocking` loops until the read reaches a
    /// terminal state, then waits for the trailing drive pause to finish;
    /// it needs interrupt delivery and an advancing tick source to make
    /// progress.
    ///
    /// Terminal states are consumed: the call after the one that returned
    /// `Complete`, `Aborted` or `Failed` reports `Idle`.
    pub fn read_sync(&mut self, mode: SyncMode) -> ReadStatus {
        match mode {
            SyncMode::Poll => {
                self.pump();
                self.read_poll()
            }
            SyncMode::Blocking => loop {
                self.service_irq();
                match self.read_poll() {
                    ReadStatus::Pending { .. } => continue,
                    ReadStatus::Complete(buf) => {
                        // Let the trailing pause finish before handing the
                        // buffer over.
                        return match self.sync(SyncMode::Blocking) {
                            Ok(SyncState::Error(code)) => {
                                ReadStatus::Failed(CdError::DiskError { code })
                            }
                            Err(err) => ReadStatus::Failed(err),
                            Ok(_) => ReadStatus::Complete(buf),
                        };
                    }
                    status => {
                        let _ = self.sync(SyncMode::Blocking);
                        return status;
                    }
                }
            },
        }
    }

    /// Replace the read-completion callback, returning the previous one.
    ///
    /// Invoked from the interrupt handler when the final sector of a read
    /// lands, and when a read gives up with no attempts left.
    pub fn set_read_callback(&mut self, cb: Option<CdCallback>) -> Option<CdCallback> {
        std::mem::replace(&mut self.read_callback, cb)
    }

    /// Seek to `lba` and read `count` sectors, blocking until the data is
    /// in hand.
    ///
    /// Convenience wrapper over SetLoc, [`CdDrive::read`] and a blocking
    /// [`CdDrive::read_sync`].
    pub fn read_sectors(&mut self, lba: u32, count: usize, mode: DriveMode) -> Result<Vec<u8>> {
        let pos = Msf::from_lba(lba as i32);
        self.control(Opcode::SetLoc, Some(&pos.param_bytes()))?;
        self.read(count, mode)?;
        match self.read_sync(SyncMode::Blocking) {
            ReadStatus::Complete(buf) => Ok(buf),
            ReadStatus::Aborted(_) => Err(CdError::Aborted),
            ReadStatus::Failed(err) => Err(err),
            ReadStatus::Pending { .. } | ReadStatus::Idle => Err(CdError::SyncTimeout),
        }
    }

    /// Data-ready handler while a block read owns the drive.
    pub(super) fn reader_on_sector(&mut self, irq: IrqKind, resp: &[u8]) {
        let now = self.clock.ticks();
        let fire;
        {
            let Some(read) = self.read.as_mut() else {
                // Stray event with no read in flight; hand events back.
                self.ready_owner = ReadyOwner::Application;
                return;
            };

            let n = read.sector_size;
            if read.cursor + n <= read.buf.len() {
                self.port.read_data(&mut read.buf[read.cursor..read.cursor + n]);
                read.cursor += n;
            }
            read.remaining -= 1;

            if read.remaining > 0 {
                read.deadline = now.wrapping_add(READ_TIMEOUT_TICKS);
                return;
            }

            // Last requested sector landed, or the sector in flight at the
            // time of a break did. Stop the drive either way.
            read.phase = if read.remaining < 0 {
                ReadPhase::Aborted
            } else {
                ReadPhase::Done
            };
            fire = read.remaining == 0 || read.attempts_left == 0;
        }

        self.stop_reader(now);
        if fire {
            if let Some(cb) = self.read_callback.as_mut() {
                cb(irq, resp);
            }
        }
    }

    /// Pause the drive on the reader's behalf and stamp the settling
    /// window.
    fn stop_reader(&mut self, now: TickCount) {
        self.command_async(Opcode::Pause, &[]);
        self.ready_owner = ReadyOwner::Application;
        self.settle_until = now.wrapping_add(COOLDOWN_TICKS).max(1);
    }

    /// Issue (or re-issue) the read command for the pending read.
    fn resume_read(&mut self) -> Result<()> {
        let (mode, setloc) = {
            let Some(read) = self.read.as_mut() else {
                return Ok(());
            };
            let setloc = if read.issued {
                // Restart from the first sector the drive never delivered,
                // and rebase the window so a later retry lands right too.
                let transferred = read.total - read.remaining;
                read.total = read.remaining;
                Some(Msf::from_lba(self.last_pos.to_lba() + transferred))
            } else {
                None
            };
            read.issued = true;
            read.phase = ReadPhase::Streaming;
            read.deadline = self.clock.ticks().wrapping_add(READ_TIMEOUT_TICKS);
            (read.mode, setloc)
        };

        self.ready_owner = ReadyOwner::Reader;
        match setloc {
            Some(pos) => {
                log::debug!("CD-ROM: retrying read at {}", pos);
                self.command(Opcode::SetLoc, &pos.param_bytes())?;
            }
            None => {
                self.command(Opcode::SetMode, &[mode.bits()])?;
            }
        }
        self.command(Opcode::ReadN, &[])?;
        Ok(())
    }

    /// One round of reader bookkeeping; never drains interrupts itself.
    fn read_poll(&mut self) -> ReadStatus {
        let now = self.clock.ticks();

        let action = match self.read.as_mut() {
            None => PollAction::Idle,
            Some(read) => match read.phase {
                ReadPhase::Done => PollAction::Finish,
                ReadPhase::Aborted => PollAction::Abort { pause: false },
                ReadPhase::Cooldown { resume_at } => {
                    if read.remaining < 0 {
                        // Break requested while paused; nothing to stop.
                        PollAction::Abort { pause: false }
                    } else if ticks_past(now, resume_at) {
                        PollAction::Resume
                    } else {
                        PollAction::Wait(read.remaining)
                    }
                }
                ReadPhase::Streaming => {
                    if read.remaining < 0 {
                        PollAction::Abort { pause: true }
                    } else if ticks_past(now, read.deadline) {
                        if read.attempts_left == 0 {
                            PollAction::Exhausted
                        } else {
                            read.attempts_left -= 1;
                            read.phase = ReadPhase::Cooldown {
                                resume_at: now.wrapping_add(COOLDOWN_TICKS),
                            };
                            PollAction::Retry(read.remaining)
                        }
                    } else if self.last_irq == Some(IrqKind::DiskError) {
                        PollAction::Fault(self.last_error)
                    } else {
                        PollAction::Wait(read.remaining)
                    }
                }
            },
        };

        match action {
            PollAction::Idle => ReadStatus::Idle,
            PollAction::Wait(n) => ReadStatus::Pending {
                remaining: n.max(0) as u32,
            },
            PollAction::Finish => ReadStatus::Complete(self.take_read_buffer()),
            PollAction::Abort { pause } => {
                if pause {
                    self.stop_reader(now);
                }
                ReadStatus::Aborted(self.take_read_buffer())
            }
            PollAction::Resume => match self.resume_read() {
                Ok(()) => {
                    let remaining = self.read.as_ref().map_or(0, |r| r.remaining.max(0) as u32);
                    ReadStatus::Pending { remaining }
                }
                Err(err) => {
                    self.read = None;
                    self.ready_owner = ReadyOwner::Application;
                    ReadStatus::Failed(err)
                }
            },
            PollAction::Retry(n) => {
                log::warn!(
                    "CD-ROM: read stalled with {} sectors outstanding, pausing for retry",
                    n
                );
                self.stop_reader(now);
                ReadStatus::Pending {
                    remaining: n.max(0) as u32,
                }
            }
            PollAction::Exhausted => {
                log::warn!("CD-ROM: read failed, too many attempts");
                self.stop_reader(now);
                self.read = None;
                ReadStatus::Failed(CdError::RetryExhausted)
            }
            PollAction::Fault(code) => {
                log::warn!("CD-ROM: read failed, drive error 0x{:02X}", code);
                self.stop_reader(now);
                self.read = None;
                ReadStatus::Failed(CdError::DiskError { code })
            }
        }
    }

    /// Consume the pending read, keeping only the bytes that landed.
    fn take_read_buffer(&mut self) -> Vec<u8> {
        match self.read.take() {
            Some(read) => {
                let mut buf = read.buf;
                buf.truncate(read.cursor);
                buf
            }
            None => Vec::new(),
        }
    }
}
