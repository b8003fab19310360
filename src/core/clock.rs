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

//! Tick source abstraction for timeout bookkeeping
//!
//! The block reader measures its stall deadline and retry cooldown against a
//! coarse monotonic counter, one unit per display frame on the original
//! hardware. The counter is only ever compared, never slept on, so any
//! monotonically increasing source works as long as the "deadline = N ticks"
//! contract keeps its observable behavior.

use std::cell::Cell;
use std::rc::Rc;

/// Tick counter unit (roughly one display frame).
pub type TickCount = u32;

/// Monotonically increasing coarse time source.
///
/// Embedders supply their frame or vblank counter. The engine never assumes
/// an absolute duration per tick; deadlines are expressed as tick deltas.
pub trait TickSource {
    /// Current counter value.
    fn ticks(&self) -> TickCount;
}

/// Shared, manually advanced tick counter.
///
/// Handles are cheap clones over the same cell, so a test (or the simulated
/// controller) can advance time while the drive holds its own handle.
///
/// # Example
///
/// ```
/// use cdrx::core::clock::{SharedTicks, TickSource};
///
/// let clock = SharedTicks::new();
/// let handle = clock.clone();
/// clock.advance(3);
/// assert_eq!(handle.ticks(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedTicks(Rc<Cell<TickCount>>);

impl SharedTicks {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter by `delta` ticks.
    pub fn advance(&self, delta: TickCount) {
        self.0.set(self.0.get().wrapping_add(delta));
    }

    /// Set the counter to an absolute value.
    pub fn set(&self, value: TickCount) {
        self.0.set(value);
    }
}

impl TickSource for SharedTicks {
    fn ticks(&self) -> TickCount {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_ticks_handles_share_state() {
        let clock = SharedTicks::new();
        let handle = clock.clone();

        assert_eq!(handle.ticks(), 0);
        clock.advance(180);
        assert_eq!(handle.ticks(), 180);
        handle.advance(60);
        assert_eq!(clock.ticks(), 240);
    }

    #[test]
    fn test_shared_ticks_set_overrides_counter() {
        let clock = SharedTicks::new();
        clock.advance(42);
        clock.set(7);
        assert_eq!(clock.ticks(), 7);
    }
}
