//! # Packet Codec Helpers
//!
//! The small formulas every vendor packet is built from:
//!
//! - [`Scale`]: `clamp(control * scale / 500 + center, low, high)`
//! - [`map_range`]: linear re-mapping between two integer ranges
//! - [`Checksum`]: additive (optionally offset) or XOR-fold over every byte
//!   except the last
//! - [`scramble`]: `buf[i] ^= key[i % key.len()]`, its own inverse
//!
//! Byte layouts stay with each protocol; only the arithmetic lives here.

use crate::controls::CHAN_MAX_VALUE;

/// Protocol-specific control scaling constants.
///
/// # Examples
///
/// ```
/// use multirf_tx::codec::Scale;
///
/// let scale = Scale::new(500, 1500, 1000, 2000);
/// assert_eq!(scale.encode(-500), 1000);
/// assert_eq!(scale.encode(0), 1500);
/// assert_eq!(scale.encode(500), 2000);
/// assert_eq!(scale.encode(i16::MAX), 2000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub scale: i32,
    pub center: i32,
    pub low: i32,
    pub high: i32,
}

impl Scale {
    pub const fn new(scale: i32, center: i32, low: i32, high: i32) -> Self {
        Self {
            scale,
            center,
            low,
            high,
        }
    }

    /// Encodes a control value, clamping the result to `[low, high]`.
    pub fn encode(&self, control: i16) -> i32 {
        let raw = i32::from(control) * self.scale / i32::from(CHAN_MAX_VALUE) + self.center;
        raw.clamp(self.low, self.high)
    }

    /// Same as [`encode`](Self::encode) with the control range reversed.
    pub fn encode_reversed(&self, control: i16) -> i32 {
        self.encode(control.saturating_neg())
    }
}

/// Linear map of `x` from `[in_min, in_max]` onto `[out_min, out_max]`,
/// truncating toward zero. Values outside the input range extrapolate.
pub fn map_range(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Checksum scheme used by a packet's trailing byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Sum of the covered bytes plus `offset`, truncated to 8 bits.
    Additive { offset: u8 },
    /// Running XOR of the covered bytes plus `offset`.
    XorFold { offset: u8 },
}

impl Checksum {
    /// Checksum over every byte of `buf` except the last.
    pub fn compute(&self, buf: &[u8]) -> u8 {
        let covered = &buf[..buf.len().saturating_sub(1)];
        match *self {
            Checksum::Additive { offset } => sum8(covered).wrapping_add(offset),
            Checksum::XorFold { offset } => xor8(covered).wrapping_add(offset),
        }
    }

    /// Writes the checksum into the last byte of `buf`.
    pub fn apply(&self, buf: &mut [u8]) {
        let value = self.compute(buf);
        if let Some(last) = buf.last_mut() {
            *last = value;
        }
    }

    /// Returns `true` if the last byte of `buf` matches.
    pub fn verify(&self, buf: &[u8]) -> bool {
        buf.last().is_some_and(|&last| last == self.compute(buf))
    }
}

/// 8-bit wrapping sum.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// 8-bit running XOR.
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// XORs `buf` against `key`, repeating the key. Applying it twice with the
/// same key restores the input. An empty key leaves `buf` unchanged.
pub fn scramble(buf: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in buf.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}
