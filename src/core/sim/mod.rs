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

//! Simulated drive controller
//!
//! [`SimPort`] implements [`DrivePort`] over an in-memory [`DiscImage`],
//! decoding submitted commands into the interrupt/response traffic a real
//! controller would produce. Handles are cheap clones over shared state, so
//! a test (or the bundled tooling) keeps one handle for scripting while the
//! engine drives the other.
//!
//! Two automatic behaviors make blocking calls work without an external
//! event loop:
//!
//! * while a read command is active, each [`DrivePort::pending_irq`] poll
//!   produces the next data-ready event (`set_auto_stream`);
//! * each poll also advances the attached [`SharedTicks`] clock by one, so
//!   deadline and cooldown windows pass under a busy-wait
//!   (`set_auto_tick`).
//!
//! Fault injection covers the interesting failure shapes: per-LBA error
//! ranges, stalls after N sectors (with optional recovery when the read is
//! re-issued), an openable lid and a missing disc.

mod image;

pub use image::{descriptor_sector, dir_record, path_table_bytes, DiscImage, ImageBuilder};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::core::clock::SharedTicks;
use crate::core::drive::position::Msf;
use crate::core::drive::{bcd_to_dec, dec_to_bcd, CommandFlags, DriveMode, DriveStatus, Opcode};
use crate::core::port::{DrivePort, IrqKind};

/// Controller error sub-code: seek failed.
const ERR_SEEK_FAILED: u8 = 0x04;
/// Controller error sub-code: invalid sub-function or track.
const ERR_INVALID: u8 = 0x10;
/// Controller error sub-code: unknown command.
const ERR_INVALID_COMMAND: u8 = 0x40;
/// Controller error sub-code: lid open or no disc.
const ERR_LID_OPEN: u8 = 0x80;

#[derive(Debug)]
struct SimEvent {
    irq: IrqKind,
    response: Vec<u8>,
    data: Option<Vec<u8>>,
}

#[derive(Debug)]
struct SimState {
    image: Option<DiscImage>,
    clock: SharedTicks,
    auto_tick: bool,
    auto_stream: bool,
    stalled: bool,
    stall_after: Option<u32>,
    /// Swallow commands without producing any events.
    silent: bool,
    recover_on_restart: bool,
    lid_open: bool,
    /// Shell bit stays set for one status probe after the lid closes.
    shell_latched: bool,
    motor_on: bool,
    reading: bool,
    mode: DriveMode,
    /// Read head position (next sector to deliver).
    position: u32,
    /// Sector whose header was most recently seen by the pickup.
    last_header: u32,
    /// Seek target latched by the set-location command.
    pending_target: Option<u32>,
    /// Half-open LBA ranges that error out when read.
    faults: Vec<(u32, u32)>,
    /// Start LBA per session, index 0 = session 1.
    sessions: Vec<u32>,
    /// Start position per track, BCD (minute, second).
    tracks: Vec<(u8, u8)>,
    region_reply: Vec<u8>,
    region_fault: bool,
    events: VecDeque<SimEvent>,
    response: VecDeque<u8>,
    data_latch: Option<Vec<u8>>,
    seek_history: Vec<u32>,
    submitted: Vec<u8>,
}

impl SimState {
    fn new(image: Option<DiscImage>) -> Self {
        Self {
            image,
            clock: SharedTicks::new(),
            auto_tick: true,
            auto_stream: true,
            stalled: false,
            stall_after: None,
            silent: false,
            recover_on_restart: false,
            lid_open: false,
            shell_latched: false,
            motor_on: false,
            reading: false,
            mode: DriveMode::empty(),
            position: 0,
            last_header: 0,
            pending_target: None,
            faults: Vec::new(),
            sessions: vec![0],
            tracks: vec![(0x00, 0x02)],
            region_reply: b"for Europe".to_vec(),
            region_fault: false,
            events: VecDeque::new(),
            response: VecDeque::new(),
            data_latch: None,
            seek_history: Vec::new(),
            submitted: Vec::new(),
        }
    }

    fn status_byte(&self) -> u8 {
        let mut status = DriveStatus::empty();
        if self.motor_on {
            status |= DriveStatus::STANDBY;
        }
        if self.reading {
            status |= DriveStatus::READING;
        }
        if self.lid_open || self.shell_latched {
            status |= DriveStatus::SHELL_OPEN;
        }
        status.bits()
    }

    fn push(&mut self, irq: IrqKind, response: Vec<u8>) {
        self.events.push_back(SimEvent {
            irq,
            response,
            data: None,
        });
    }

    fn push_error(&mut self, code: u8) {
        let status = self.status_byte() | DriveStatus::ERROR.bits();
        self.push(IrqKind::DiskError, vec![status, code]);
    }

    fn faulted(&self, lba: u32) -> bool {
        self.faults.iter().any(|&(start, end)| lba >= start && lba < end)
    }

    /// Runs on every poll: advance the clock, stream the next sector.
    fn service(&mut self) {
        if self.auto_tick {
            self.clock.advance(1);
        }
        if self.auto_stream && !self.stalled && self.events.is_empty() {
            self.produce_sector();
        }
    }

    /// Deliver the next sector of an active read, or the fault it runs
    /// into. Returns whether an event was produced.
    fn produce_sector(&mut self) -> bool {
        if !self.reading {
            return false;
        }
        if self.lid_open {
            self.reading = false;
            self.push_error(ERR_LID_OPEN);
            return true;
        }
        if self.faulted(self.position) {
            self.reading = false;
            self.push_error(ERR_SEEK_FAILED);
            return true;
        }

        let whole = self.mode.contains(DriveMode::WHOLE_SECTOR);
        let data = self.image.as_ref().and_then(|img| {
            if whole {
                img.whole_sector(self.position)
            } else {
                img.sector_data(self.position)
            }
        });
        let Some(data) = data else {
            // Ran off the end of the disc.
            self.reading = false;
            let status = self.status_byte();
            self.push(IrqKind::DataEnd, vec![status]);
            return true;
        };

        self.last_header = self.position;
        self.position += 1;
        let response = vec![self.status_byte()];
        self.events.push_back(SimEvent {
            irq: IrqKind::DataReady,
            response,
            data: Some(data),
        });

        if let Some(left) = self.stall_after.as_mut() {
            *left -= 1;
            if *left == 0 {
                self.stall_after = None;
                self.stalled = true;
            }
        }
        true
    }

    fn submit(&mut self, opcode: u8, params: &[u8]) {
        self.submitted.push(opcode);
        if self.silent {
            return;
        }
        let Some(op) = Opcode::from_byte(opcode) else {
            self.push_error(ERR_INVALID_COMMAND);
            return;
        };

        match op {
            Opcode::Nop => {
                let status = self.status_byte();
                self.push(IrqKind::Acknowledge, vec![status]);
                if !self.lid_open {
                    self.shell_latched = false;
                }
            }
            Opcode::SetLoc => {
                let lba = params_to_lba(params);
                self.seek_history.push(lba);
                self.pending_target = Some(lba);
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
            }
            Opcode::SetMode => {
                if let Some(&bits) = params.first() {
                    self.mode = DriveMode::from_bits_retain(bits);
                }
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
            }
            Opcode::ReadN | Opcode::ReadS => {
                if let Some(target) = self.pending_target.take() {
                    self.position = target;
                }
                if self.stalled && self.recover_on_restart {
                    self.stalled = false;
                }
                self.reading = true;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
            }
            Opcode::Pause => {
                self.reading = false;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                self.push(IrqKind::Complete, vec![self.status_byte()]);
            }
            Opcode::Init => {
                self.mode = DriveMode::empty();
                self.reading = false;
                self.pending_target = None;
                self.motor_on = true;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                if self.image.is_some() && !self.lid_open {
                    self.push(IrqKind::Complete, vec![self.status_byte()]);
                } else {
                    self.push_error(ERR_LID_OPEN);
                }
            }
            Opcode::Stop => {
                self.motor_on = false;
                self.reading = false;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                self.push(IrqKind::Complete, vec![self.status_byte()]);
            }
            Opcode::SeekL | Opcode::SeekP => {
                if let Some(target) = self.pending_target.take() {
                    self.position = target;
                    self.last_header = target;
                }
                self.reading = false;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                self.push(IrqKind::Complete, vec![self.status_byte()]);
            }
            Opcode::SetSession => {
                let session = params.first().copied().unwrap_or(0) as usize;
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                let start = session
                    .checked_sub(1)
                    .and_then(|i| self.sessions.get(i).copied());
                match start {
                    Some(start) => {
                        self.position = start;
                        self.last_header = start;
                        self.push(IrqKind::Complete, vec![self.status_byte()]);
                    }
                    None => self.push_error(ERR_SEEK_FAILED),
                }
            }
            Opcode::GetTN => {
                let status = self.status_byte();
                let last = dec_to_bcd(self.tracks.len() as u8);
                self.push(IrqKind::Acknowledge, vec![status, 0x01, last]);
            }
            Opcode::GetTD => {
                let track = bcd_to_dec(params.first().copied().unwrap_or(0));
                let status = self.status_byte();
                let start = track
                    .checked_sub(1)
                    .and_then(|i| self.tracks.get(i as usize).copied());
                match start {
                    Some((minute, second)) => {
                        self.push(IrqKind::Acknowledge, vec![status, minute, second]);
                    }
                    None => self.push_error(ERR_INVALID),
                }
            }
            Opcode::GetLocL => {
                let pos = Msf::from_lba(self.last_header as i32);
                self.push(
                    IrqKind::Acknowledge,
                    vec![pos.minute, pos.second, pos.sector, 0x02, 0, 0, 0, 0],
                );
            }
            Opcode::GetLocP => {
                let pos = Msf::from_lba(self.position as i32);
                self.push(
                    IrqKind::Acknowledge,
                    vec![
                        0x01, 0x01, pos.minute, pos.second, pos.sector, pos.minute, pos.second,
                        pos.sector,
                    ],
                );
            }
            Opcode::Test => {
                if params.first() == Some(&0x22) && !self.region_fault {
                    let reply = self.region_reply.clone();
                    self.push(IrqKind::Acknowledge, reply);
                } else {
                    self.push_error(ERR_INVALID);
                }
            }
            Opcode::GetId => {
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                if self.image.is_some() && !self.lid_open {
                    let status = self.status_byte();
                    self.push(
                        IrqKind::Complete,
                        vec![status, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A'],
                    );
                } else {
                    let status =
                        self.status_byte() | DriveStatus::ID_ERROR.bits() | DriveStatus::ERROR.bits();
                    self.push(IrqKind::DiskError, vec![status, ERR_LID_OPEN]);
                }
            }
            other => {
                // Audio and diagnostics commands the access layer does not
                // depend on: acknowledge, complete if background-class.
                self.push(IrqKind::Acknowledge, vec![self.status_byte()]);
                if other.flags().contains(CommandFlags::BLOCKING) {
                    self.push(IrqKind::Complete, vec![self.status_byte()]);
                }
            }
        }
    }
}

/// Decode 3 BCD MSF parameter bytes into an LBA.
fn params_to_lba(params: &[u8]) -> u32 {
    if params.len() < 3 {
        return 0;
    }
    let minute = bcd_to_dec(params[0]) as u32;
    let second = bcd_to_dec(params[1]) as u32;
    let frame = bcd_to_dec(params[2]) as u32;
    ((minute * 60 + second) * 75 + frame).saturating_sub(150)
}

/// Scripted [`DrivePort`] over an in-memory disc image.
///
/// Cloning yields another handle onto the same simulated controller.
///
/// # Example
///
/// ```
/// use cdrx::core::drive::CdDrive;
/// use cdrx::core::sim::{DiscImage, SimPort};
///
/// let port = SimPort::new(DiscImage::blank(100));
/// let script = port.clone();
/// let mut drive = CdDrive::new(port, script.clock());
/// drive.init().unwrap();
/// assert!(script.submitted().contains(&0x0A));
/// ```
#[derive(Debug, Clone)]
pub struct SimPort {
    state: Rc<RefCell<SimState>>,
}

impl SimPort {
    /// A controller with `image` inserted.
    pub fn new(image: DiscImage) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(Some(image)))),
        }
    }

    /// A controller with an empty tray.
    pub fn without_disc() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(None))),
        }
    }

    /// Handle on the clock this controller advances while auto-tick is on.
    /// Pass it (or a clone) to [`crate::core::drive::CdDrive::new`].
    pub fn clock(&self) -> SharedTicks {
        self.state.borrow().clock.clone()
    }

    /// Advance the clock by one per poll (default on).
    pub fn set_auto_tick(&self, on: bool) {
        self.state.borrow_mut().auto_tick = on;
    }

    /// Produce data-ready events on demand while reading (default on).
    /// With this off, sectors only arrive via [`SimPort::emit_sectors`].
    pub fn set_auto_stream(&self, on: bool) {
        self.state.borrow_mut().auto_stream = on;
    }

    /// Suppress sector delivery without stopping the read.
    pub fn set_stalled(&self, on: bool) {
        self.state.borrow_mut().stalled = on;
    }

    /// Swallow every subsequent command without responding, as a dead
    /// controller would.
    pub fn set_silent(&self, on: bool) {
        self.state.borrow_mut().silent = on;
    }

    /// Deliver `sectors` more sectors, then stall.
    pub fn stall_after(&self, sectors: u32) {
        let mut state = self.state.borrow_mut();
        if sectors == 0 {
            state.stalled = true;
        } else {
            state.stall_after = Some(sectors);
        }
    }

    /// Clear a stall when the next read command arrives, as a drive that
    /// recovers after being re-seeked would.
    pub fn set_recover_on_restart(&self, on: bool) {
        self.state.borrow_mut().recover_on_restart = on;
    }

    /// Make the half-open LBA range `[start, end)` fail with a disk error.
    pub fn fail_lba_range(&self, start: u32, end: u32) {
        self.state.borrow_mut().faults.push((start, end));
    }

    /// Remove all injected LBA faults.
    pub fn clear_faults(&self) {
        self.state.borrow_mut().faults.clear();
    }

    /// Open the lid. Active reads fail; the shell bit is reported until
    /// one status probe after [`SimPort::close_lid`].
    pub fn open_lid(&self) {
        let mut state = self.state.borrow_mut();
        state.lid_open = true;
        state.shell_latched = true;
        state.reading = false;
    }

    pub fn close_lid(&self) {
        self.state.borrow_mut().lid_open = false;
    }

    /// Replace the inserted disc.
    pub fn swap_disc(&self, image: DiscImage) {
        self.state.borrow_mut().image = Some(image);
    }

    /// Manually deliver up to `count` sectors of an active read.
    pub fn emit_sectors(&self, count: u32) {
        let mut state = self.state.borrow_mut();
        for _ in 0..count {
            if !state.produce_sector() {
                break;
            }
        }
    }

    /// Inject an arbitrary interrupt event.
    pub fn emit(&self, irq: IrqKind, response: Vec<u8>) {
        self.state.borrow_mut().push(irq, response);
    }

    /// Every set-location target the controller has seen, in order.
    pub fn seek_history(&self) -> Vec<u32> {
        self.state.borrow().seek_history.clone()
    }

    /// Every submitted command byte, in order.
    pub fn submitted(&self) -> Vec<u8> {
        self.state.borrow().submitted.clone()
    }

    /// How many times `op` has been submitted.
    pub fn submitted_count(&self, op: Opcode) -> usize {
        self.state
            .borrow()
            .submitted
            .iter()
            .filter(|&&b| b == op as u8)
            .count()
    }

    /// Current read head position.
    pub fn position(&self) -> u32 {
        self.state.borrow().position
    }

    /// Replace the region string returned by the diagnostics probe.
    pub fn set_region_reply(&self, text: &[u8]) {
        self.state.borrow_mut().region_reply = text.to_vec();
    }

    /// Make the region probe fail the way the earliest Japanese firmware
    /// does.
    pub fn set_region_fault(&self, on: bool) {
        self.state.borrow_mut().region_fault = on;
    }

    /// Define the session layout: start LBA per session.
    pub fn set_sessions(&self, starts: &[u32]) {
        self.state.borrow_mut().sessions = starts.to_vec();
    }

    /// Define the track layout: BCD (minute, second) start per track.
    pub fn set_tracks(&self, starts: &[(u8, u8)]) {
        self.state.borrow_mut().tracks = starts.to_vec();
    }
}

impl DrivePort for SimPort {
    fn reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.response.clear();
        state.data_latch = None;
        state.reading = false;
        state.pending_target = None;
    }

    fn enable_interrupts(&mut self) {}

    fn pending_irq(&mut self) -> Option<IrqKind> {
        let mut state = self.state.borrow_mut();
        state.service();
        state.events.front().map(|e| e.irq)
    }

    fn acknowledge(&mut self, irq: IrqKind) {
        let mut state = self.state.borrow_mut();
        if state.events.front().map(|e| e.irq) != Some(irq) {
            return;
        }
        if let Some(event) = state.events.pop_front() {
            state.response.clear();
            state.response.extend(event.response);
        }
    }

    fn request_data(&mut self) {
        let mut state = self.state.borrow_mut();
        let data = state.events.front().and_then(|e| e.data.clone());
        if data.is_some() {
            state.data_latch = data;
        }
    }

    fn has_response(&mut self) -> bool {
        !self.state.borrow().response.is_empty()
    }

    fn pop_response(&mut self) -> u8 {
        self.state.borrow_mut().response.pop_front().unwrap_or(0)
    }

    fn busy(&mut self) -> bool {
        false
    }

    fn submit(&mut self, opcode: u8, params: &[u8]) {
        self.state.borrow_mut().submit(opcode, params);
    }

    fn read_data(&mut self, dest: &mut [u8]) {
        let mut state = self.state.borrow_mut();
        if let Some(src) = state.data_latch.take() {
            let n = dest.len().min(src.len());
            dest[..n].copy_from_slice(&src[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acked(port: &mut SimPort) -> Vec<u8> {
        let irq = port.pending_irq().unwrap();
        port.acknowledge(irq);
        let mut resp = Vec::new();
        while port.has_response() {
            resp.push(port.pop_response());
        }
        resp
    }

    #[test]
    fn test_shell_bit_latches_for_one_probe() {
        let mut port = SimPort::new(DiscImage::blank(10));
        let script = port.clone();

        script.open_lid();
        script.close_lid();

        port.submit(Opcode::Nop as u8, &[]);
        let first = acked(&mut port);
        assert_ne!(first[0] & DriveStatus::SHELL_OPEN.bits(), 0);

        port.submit(Opcode::Nop as u8, &[]);
        let second = acked(&mut port);
        assert_eq!(second[0] & DriveStatus::SHELL_OPEN.bits(), 0);
    }

    #[test]
    fn test_read_produces_data_ready_with_sector_payload() {
        let mut image = ImageBuilder::new(10);
        image.write(3, 0, &[0x5A; 4]);
        let mut port = SimPort::new(image.build());

        port.submit(Opcode::SetLoc as u8, &Msf::from_lba(3).param_bytes());
        acked(&mut port);
        port.submit(Opcode::ReadN as u8, &[]);
        acked(&mut port);

        assert_eq!(port.pending_irq(), Some(IrqKind::DataReady));
        port.request_data();
        port.acknowledge(IrqKind::DataReady);
        let mut sector = vec![0u8; 2048];
        port.read_data(&mut sector);
        assert_eq!(&sector[..4], &[0x5A; 4]);
    }

    #[test]
    fn test_faulted_range_errors_instead_of_streaming() {
        let mut port = SimPort::new(DiscImage::blank(10));
        let script = port.clone();
        script.fail_lba_range(2, 4);

        port.submit(Opcode::SetLoc as u8, &Msf::from_lba(2).param_bytes());
        acked(&mut port);
        port.submit(Opcode::ReadN as u8, &[]);
        acked(&mut port);

        assert_eq!(port.pending_irq(), Some(IrqKind::DiskError));
        port.acknowledge(IrqKind::DiskError);
        let mut resp = Vec::new();
        while port.has_response() {
            resp.push(port.pop_response());
        }
        assert_eq!(resp[1], ERR_SEEK_FAILED);
    }

    #[test]
    fn test_missing_session_reports_seek_failure() {
        let mut port = SimPort::new(DiscImage::blank(10));
        port.submit(Opcode::SetSession as u8, &[2]);
        assert_eq!(port.pending_irq(), Some(IrqKind::Acknowledge));
        port.acknowledge(IrqKind::Acknowledge);
        assert_eq!(port.pending_irq(), Some(IrqKind::DiskError));
    }

    #[test]
    fn test_stall_after_suppresses_further_sectors() {
        let mut port = SimPort::new(DiscImage::blank(10));
        let script = port.clone();
        script.stall_after(1);

        port.submit(Opcode::ReadN as u8, &[]);
        acked(&mut port);
        assert_eq!(port.pending_irq(), Some(IrqKind::DataReady));
        port.request_data();
        port.acknowledge(IrqKind::DataReady);

        // Stalled now; polls tick the clock but deliver nothing.
        assert_eq!(port.pending_irq(), None);
        assert_eq!(port.pending_irq(), None);
    }
}
