//! # Channel Hopping
//!
//! Deterministic generators shared by several protocols:
//!
//! - [`rand32_r`]: the 32-bit LFSR (Xilinx polynomial x^32 + x^22 + x^2 + x + 1)
//!   that turns a controller ID into addresses and seeds
//! - [`HopTableSpec::generate`]: the LCG hop-table generator with parity and
//!   per-band occupancy rules
//! - [`pick_quiet_channels`]: greedy selection over an RSSI scan with an
//!   exclusion zone around every pick
//!
//! All of them are pure functions of their inputs. Real receivers derive the
//! same tables from the same IDs, so the output must never change.

const LFSR_FEEDBACK: u32 = 0x8020_0003;
const LFSR_INTAP: u32 = 32 - 1;

/// Feeds the eight bits of `update` into the LFSR at `seed` and returns the
/// new state.
///
/// # Examples
///
/// ```
/// use multirf_tx::hopping::rand32_r;
///
/// let mut a = 0x1234_5678;
/// let mut b = 0x1234_5678;
/// assert_eq!(rand32_r(&mut a, 7), rand32_r(&mut b, 7));
/// ```
pub fn rand32_r(seed: &mut u32, update: u8) -> u32 {
    let mut b = update;
    for _ in 0..8 {
        let feedback = (*seed & 1).wrapping_neg() & LFSR_FEEDBACK;
        *seed = (*seed >> 1) ^ feedback ^ !(u32::from(b & 1) << LFSR_INTAP);
        b >>= 1;
    }
    *seed
}

/// Runs `rounds` zero bytes through the LFSR so nearby IDs diverge.
pub fn pump_lfsr(seed: &mut u32, rounds: usize) {
    for _ in 0..rounds {
        rand32_r(seed, 0);
    }
}

/// Occupancy limit for one frequency band of a hop table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Highest channel (inclusive) that belongs to this band
    pub last: u8,
    /// Maximum number of table entries inside the band
    pub cap: usize,
}

/// Parameters of the LCG hop-table generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopTableSpec<'a> {
    pub count: usize,
    pub modulus: u32,
    pub offset: u8,
    /// Bands in ascending order; the last one should end at 255.
    pub bands: &'a [Band],
}

impl HopTableSpec<'_> {
    /// Builds the hop table for `seed`.
    ///
    /// Each round advances `seed * 0x0019660D + 0x3C6EF35F`, takes
    /// `((state >> 8) % modulus) + offset` as a candidate, and accepts it only
    /// if its low bit differs from the seed's, it is not already present,
    /// and its band still has room.
    ///
    /// The band caps must sum to at least `count`, otherwise this never
    /// returns.
    pub fn generate(&self, seed: u32) -> Vec<u8> {
        let mut table: Vec<u8> = Vec::with_capacity(self.count);
        let mut state = seed;

        while table.len() < self.count {
            state = state.wrapping_mul(0x0019_660D).wrapping_add(0x3C6E_F35F);
            let candidate = ((state >> 8) % self.modulus) as u8 + self.offset;

            if (u32::from(candidate) ^ seed) & 0x01 == 0 {
                continue;
            }
            if table.contains(&candidate) {
                continue;
            }

            let band = self.band_of(candidate);
            let used = table
                .iter()
                .filter(|&&ch| self.band_of(ch) == band)
                .count();
            if used < self.bands[band].cap {
                table.push(candidate);
            }
        }
        table
    }

    fn band_of(&self, ch: u8) -> usize {
        self.bands
            .iter()
            .position(|band| ch <= band.last)
            .unwrap_or(self.bands.len() - 1)
    }
}

/// Greedily picks `count` channels with the lowest readings in `min..max`.
///
/// After every pick the channels in `[pick - min_space, pick + min_space)`
/// are marked unusable. Ties go to the lowest channel number. If fewer
/// usable channels remain than requested, the remaining picks fall back to
/// `min`. That includes a band lying entirely beyond `rssi`.
pub fn pick_quiet_channels(rssi: &[u8], count: usize, min_space: u8, min: u8, max: u8) -> Vec<u8> {
    let mut scores = rssi.to_vec();
    let max = usize::from(max).min(scores.len());
    let min = usize::from(min);
    let mut picked = Vec::with_capacity(count);

    for _ in 0..count {
        let mut best = min;
        for ch in min..max {
            if scores[ch] < scores.get(best).copied().unwrap_or(u8::MAX) {
                best = ch;
            }
        }
        picked.push(best as u8);

        let lo = best.saturating_sub(usize::from(min_space));
        let hi = (best + usize::from(min_space)).min(scores.len());
        // a band past the end of the scan has nothing to blank
        if let Some(zone) = scores.get_mut(lo..hi) {
            zone.fill(0xFF);
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANDS: [Band; 3] = [
        Band { last: 26, cap: 8 },
        Band { last: 50, cap: 8 },
        Band { last: 255, cap: 8 },
    ];

    fn spec() -> HopTableSpec<'static> {
        HopTableSpec {
            count: 20,
            modulus: 73,
            offset: 2,
            bands: &BANDS,
        }
    }

    #[test]
    fn test_lfsr_is_deterministic() {
        let mut a = 0xDEAD_BEEF;
        let mut b = 0xDEAD_BEEF;
        for i in 0..32u8 {
            assert_eq!(rand32_r(&mut a, i), rand32_r(&mut b, i));
        }
        assert_ne!(a, 0xDEAD_BEEF);
    }

    #[test]
    fn test_lfsr_depends_on_input() {
        let mut a = 0xb2c5_4a2f;
        let mut b = 0xb2c5_4a2f;
        rand32_r(&mut a, 0);
        rand32_r(&mut b, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_lfsr_zero_input_step() {
        // a zero input bit xors in !0 on every round
        let mut seed = 0u32;
        rand32_r(&mut seed, 0);
        let mut expect = 0u32;
        for _ in 0..8 {
            let fb = (expect & 1).wrapping_neg() & LFSR_FEEDBACK;
            expect = (expect >> 1) ^ fb ^ u32::MAX;
        }
        assert_eq!(seed, expect);
    }

    #[test]
    fn test_hop_table_distinct_in_range() {
        for seed in [0u32, 1, 0x1234_5678, 0xFFFF_FFFF, 0xA5A5_0F0F] {
            let table = spec().generate(seed);
            assert_eq!(table.len(), 20);
            for (i, &ch) in table.iter().enumerate() {
                assert!((2..=74).contains(&ch), "channel {} out of range", ch);
                assert!(!table[..i].contains(&ch), "channel {} repeated", ch);
                assert_ne!((u32::from(ch) ^ seed) & 1, 0, "parity must differ from seed");
            }
        }
    }

    #[test]
    fn test_hop_table_spacing_and_caps() {
        let table = spec().generate(0x0BAD_F00D);
        let mut sorted = table.clone();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            assert!(pair[1] - pair[0] >= 2, "same-parity channels are at least 2 apart");
        }
        let low = table.iter().filter(|&&c| c <= 26).count();
        let mid = table.iter().filter(|&&c| (27..=50).contains(&c)).count();
        let high = table.iter().filter(|&&c| c >= 51).count();
        assert!(low <= 8 && mid <= 8 && high <= 8);
    }

    #[test]
    fn test_hop_table_is_pure() {
        assert_eq!(spec().generate(42), spec().generate(42));
        assert_ne!(spec().generate(42), spec().generate(43));
    }

    #[test]
    fn test_quiet_channels_known_minima() {
        let mut rssi = [10u8; 80];
        rssi[10] = 1;
        rssi[11] = 2; // inside exclusion zone of 10
        rssi[30] = 3;
        rssi[70] = 4;

        let picked = pick_quiet_channels(&rssi, 3, 5, 4, 80);
        assert_eq!(picked, vec![10, 30, 70]);
    }

    #[test]
    fn test_quiet_channels_respects_band() {
        let mut rssi = [10u8; 80];
        rssi[2] = 0;
        rssi[79] = 0;
        let picked = pick_quiet_channels(&rssi, 1, 4, 4, 79);
        assert_ne!(picked[0], 2, "below min");
        assert_ne!(picked[0], 79, "max is exclusive");
    }

    #[test]
    fn test_quiet_channels_exclusion_zone_is_half_open() {
        let mut rssi = [10u8; 80];
        rssi[20] = 0;
        rssi[24] = 1;
        rssi[16] = 1;
        let picked = pick_quiet_channels(&rssi, 2, 4, 4, 80);
        // 16..24 is blocked after picking 20; 24 remains eligible
        assert_eq!(picked, vec![20, 24]);
    }

    #[test]
    fn test_quiet_channels_band_past_scan_end() {
        let picked = pick_quiet_channels(&[5; 10], 2, 2, 20, 30);
        assert_eq!(picked, vec![20, 20], "band beyond the scan should fall back to min");
    }
}
