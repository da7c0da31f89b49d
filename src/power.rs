//! # RF Power
//!
//! Eight output levels shared by all three chips. Each driver maps the level
//! onto its own register encoding.

use serde::Deserialize;
use std::fmt;

/// Transmit power level, 3 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum TxPower {
    #[serde(rename = "100uW")]
    P100uW = 0,
    #[serde(rename = "300uW")]
    P300uW = 1,
    #[serde(rename = "1mW")]
    P1mW = 2,
    #[serde(rename = "3mW")]
    P3mW = 3,
    #[serde(rename = "10mW")]
    P10mW = 4,
    #[serde(rename = "30mW")]
    P30mW = 5,
    #[serde(rename = "100mW")]
    P100mW = 6,
    #[serde(rename = "150mW")]
    P150mW = 7,
}

impl Default for TxPower {
    fn default() -> Self {
        TxPower::P10mW
    }
}

impl TxPower {
    /// Level from the low three bits of `raw`.
    pub const fn from_bits(raw: u8) -> Self {
        match raw & 0x07 {
            0 => TxPower::P100uW,
            1 => TxPower::P300uW,
            2 => TxPower::P1mW,
            3 => TxPower::P3mW,
            4 => TxPower::P10mW,
            5 => TxPower::P30mW,
            6 => TxPower::P100mW,
            _ => TxPower::P150mW,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TxPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxPower::P100uW => "100uW",
            TxPower::P300uW => "300uW",
            TxPower::P1mW => "1mW",
            TxPower::P3mW => "3mW",
            TxPower::P10mW => "10mW",
            TxPower::P30mW => "30mW",
            TxPower::P100mW => "100mW",
            TxPower::P150mW => "150mW",
        };
        f.write_str(label)
    }
}

/// Requested power plus a pending-update flag.
///
/// The level may be changed at any time; protocols pick it up with
/// [`PowerSetting::take_update`] at a point where no packet is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerSetting {
    level: TxPower,
    dirty: bool,
}

impl Default for PowerSetting {
    fn default() -> Self {
        Self::new(TxPower::default())
    }
}

impl PowerSetting {
    pub const fn new(level: TxPower) -> Self {
        Self { level, dirty: false }
    }

    pub fn set(&mut self, level: TxPower) {
        self.level = level;
        self.dirty = true;
    }

    pub const fn level(&self) -> TxPower {
        self.level
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the level if it changed since the last call, clearing the flag.
    pub fn take_update(&mut self) -> Option<TxPower> {
        if self.dirty {
            self.dirty = false;
            Some(self.level)
        } else {
            None
        }
    }

    /// Level with bit 7 set while an update is pending.
    pub const fn raw(&self) -> u8 {
        self.level.bits() | if self.dirty { 0x80 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_10mw_and_clean() {
        let setting = PowerSetting::default();
        assert_eq!(setting.level(), TxPower::P10mW);
        assert!(!setting.is_dirty());
        assert_eq!(setting.raw(), 4);
    }

    #[test]
    fn test_dirty_flag_cleared_once() {
        let mut setting = PowerSetting::default();
        setting.set(TxPower::P100mW);
        assert_eq!(setting.raw(), 0x86);
        assert_eq!(setting.take_update(), Some(TxPower::P100mW));
        assert_eq!(setting.take_update(), None, "second take should see no change");
        assert_eq!(setting.level(), TxPower::P100mW);
    }

    #[test]
    fn test_from_bits_masks() {
        assert_eq!(TxPower::from_bits(0x0F), TxPower::P150mW);
        assert_eq!(TxPower::from_bits(0x80), TxPower::P100uW);
    }

    #[test]
    fn test_deserialize_label() {
        #[derive(Deserialize)]
        struct Wrap {
            power: TxPower,
        }
        let w: Wrap = toml::from_str("power = \"30mW\"").unwrap();
        assert_eq!(w.power, TxPower::P30mW);
        assert_eq!(w.power.to_string(), "30mW");
    }
}
