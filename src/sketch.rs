use rand::Rng;

use crate::utils::num::{next_pow2, u64_to_usize_saturating};

/// Number of independent counter rows.
const DEPTH: usize = 4;

/// Count-min sketch over 4-bit saturating counters, two per byte.
///
/// Each row is indexed by a seeded mix of the key hash; `estimate` takes the
/// minimum over rows. `reset` halves every counter, which ages old activity
/// out within one observation window.
pub(crate) struct CmSketch {
    rows: [CmRow; DEPTH],
    seeds: [u64; DEPTH],
    mask: u64,
}

impl CmSketch {
    pub fn new(num_counters: u64) -> Self {
        let width = next_pow2(num_counters.max(1));
        let mut rng = rand::rng();
        Self {
            rows: std::array::from_fn(|_| CmRow::new(width)),
            seeds: std::array::from_fn(|_| rng.random()),
            mask: width - 1,
        }
    }

    pub fn increment(&mut self, hash: u64) {
        for (row, seed) in self.rows.iter_mut().zip(self.seeds) {
            row.increment((hash ^ seed) & self.mask);
        }
    }

    /// Minimum counter value across rows, in `[0, 15]`.
    pub fn estimate(&self, hash: u64) -> i64 {
        let mut min = u8::MAX;
        for (row, seed) in self.rows.iter().zip(self.seeds) {
            min = min.min(row.get((hash ^ seed) & self.mask));
        }
        i64::from(min)
    }

    /// Halves every counter.
    pub fn reset(&mut self) {
        for row in &mut self.rows {
            row.reset();
        }
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.clear();
        }
    }
}

/// One row of packed 4-bit counters.
struct CmRow(Vec<u8>);

impl CmRow {
    fn new(width: u64) -> Self {
        Self(vec![0; u64_to_usize_saturating(width / 2).max(1)])
    }

    fn get(&self, n: u64) -> u8 {
        let i = u64_to_usize_saturating(n / 2);
        let shift = (n & 1) * 4;
        (self.0[i] >> shift) & 0x0f
    }

    fn increment(&mut self, n: u64) {
        let i = u64_to_usize_saturating(n / 2);
        let shift = (n & 1) * 4;
        // Saturate at 15.
        if (self.0[i] >> shift) & 0x0f < 15 {
            self.0[i] += 1 << shift;
        }
    }

    fn reset(&mut self) {
        for byte in &mut self.0 {
            // Halve both nibbles at once.
            *byte = (*byte >> 1) & 0x77;
        }
    }

    fn clear(&mut self) {
        self.0.fill(0);
    }
}
