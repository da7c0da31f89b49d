//! # Control Vector
//!
//! The twelve stick/switch values every protocol reads each step.
//!
//! ## Channel Assignments
//!
//! | Index | Channel | Notes |
//! |-------|---------|-------|
//! | 0 | Throttle | starts at full low (-500) |
//! | 1 | Rudder | |
//! | 2 | Elevator | |
//! | 3 | Aileron | |
//! | 4..=11 | AUX1..AUX8 | switches, flags |
//!
//! ## Value Range
//!
//! All values are signed and nominally within `-500..=500`. Writers are not
//! trusted to respect that range, so every protocol clamps when it encodes.
//!
//! ## Concurrency
//!
//! The input side (a receiver decoder, a host link, the bench sweep) writes
//! through a [`ControlHandle`] while the protocol engine reads. Each channel is
//! an `AtomicI16`, so a single value can never be observed half-written.
//!
//! ```
//! use multirf_tx::controls::{channels, ControlVector};
//!
//! let controls = ControlVector::new();
//! let handle = controls.handle();
//! handle.set(channels::AILERON, 250);
//!
//! // transmission order puts aileron first
//! assert_eq!(controls.by_order(0), 250);
//! ```

use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;

/// Upper bound of a control value.
pub const CHAN_MAX_VALUE: i16 = 500;
/// Lower bound of a control value.
pub const CHAN_MIN_VALUE: i16 = -500;
/// Number of control channels.
pub const NUM_CHANNELS: usize = 12;

/// Channel indices for semantic access.
pub mod channels {
    pub const THROTTLE: usize = 0;
    pub const RUDDER: usize = 1;
    pub const ELEVATOR: usize = 2;
    pub const AILERON: usize = 3;
    pub const AUX1: usize = 4;
    pub const AUX2: usize = 5;
    pub const AUX3: usize = 6;
    pub const AUX4: usize = 7;
    pub const AUX5: usize = 8;
    pub const AUX6: usize = 9;
    pub const AUX7: usize = 10;
    pub const AUX8: usize = 11;
}

/// A E T R transmission order used by most receivers.
const TRANSMIT_ORDER: [usize; 4] = [
    channels::AILERON,
    channels::ELEVATOR,
    channels::THROTTLE,
    channels::RUDDER,
];

/// Shared, lock-free store of the latest control values.
#[derive(Debug)]
pub struct ControlVector {
    values: [AtomicI16; NUM_CHANNELS],
}

impl Default for ControlVector {
    fn default() -> Self {
        let vector = Self {
            values: std::array::from_fn(|_| AtomicI16::new(0)),
        };
        vector.values[channels::THROTTLE].store(CHAN_MIN_VALUE, Ordering::Relaxed);
        vector
    }
}

impl ControlVector {
    /// Creates a vector with every channel centred and throttle at minimum.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channel value by logical index (T R E A order). Out-of-range reads 0.
    #[must_use]
    pub fn get(&self, ch: usize) -> i16 {
        self.values
            .get(ch)
            .map_or(0, |value| value.load(Ordering::Relaxed))
    }

    /// Channel value by transmission order: the first four slots are
    /// aileron, elevator, throttle, rudder; the rest map straight through.
    #[must_use]
    pub fn by_order(&self, slot: usize) -> i16 {
        let ch = TRANSMIT_ORDER.get(slot).copied().unwrap_or(slot);
        self.get(ch)
    }

    /// Copies every channel out at once.
    #[must_use]
    pub fn snapshot(&self) -> [i16; NUM_CHANNELS] {
        std::array::from_fn(|ch| self.get(ch))
    }

    /// Hands out a write handle sharing this vector.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> ControlHandle {
        ControlHandle {
            vector: Arc::clone(self),
        }
    }

    fn store(&self, ch: usize, value: i16) {
        if let Some(slot) = self.values.get(ch) {
            slot.store(value, Ordering::Relaxed);
        }
    }
}

/// Narrow write handle given to the input side.
///
/// Last write wins per channel; there is no handshake with the reader.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    vector: Arc<ControlVector>,
}

impl ControlHandle {
    pub fn set(&self, ch: usize, value: i16) {
        self.vector.store(ch, value);
    }

    /// Writes `values` starting at channel 0; extra entries are ignored.
    pub fn set_all(&self, values: &[i16]) {
        for (ch, &value) in values.iter().take(NUM_CHANNELS).enumerate() {
            self.vector.store(ch, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_values() {
        let controls = ControlVector::new();
        assert_eq!(controls.get(channels::THROTTLE), CHAN_MIN_VALUE);
        for ch in 1..NUM_CHANNELS {
            assert_eq!(controls.get(ch), 0, "channel {} should start centred", ch);
        }
    }

    #[test]
    fn test_transmit_order_view() {
        let controls = ControlVector::new();
        let handle = controls.handle();
        handle.set_all(&[10, 20, 30, 40, 50, 60]);

        assert_eq!(controls.by_order(0), 40, "slot 0 is aileron");
        assert_eq!(controls.by_order(1), 30, "slot 1 is elevator");
        assert_eq!(controls.by_order(2), 10, "slot 2 is throttle");
        assert_eq!(controls.by_order(3), 20, "slot 3 is rudder");
        assert_eq!(controls.by_order(4), 50);
        assert_eq!(controls.by_order(5), 60);
    }

    #[test]
    fn test_out_of_range_channel() {
        let controls = ControlVector::new();
        controls.handle().set(42, 100);
        assert_eq!(controls.get(42), 0);
        assert_eq!(controls.by_order(42), 0);
    }

    #[test]
    fn test_handle_writes_visible_across_threads() {
        let controls = ControlVector::new();
        let handle = controls.handle();
        let writer = std::thread::spawn(move || {
            for v in -500..=500 {
                handle.set(channels::AUX1, v);
            }
        });
        writer.join().unwrap();
        assert_eq!(controls.get(channels::AUX1), 500);
    }

    #[test]
    fn test_snapshot() {
        let controls = ControlVector::new();
        controls.handle().set(channels::AUX8, -123);
        let snap = controls.snapshot();
        assert_eq!(snap[channels::AUX8], -123);
        assert_eq!(snap[channels::THROTTLE], -500);
    }
}
