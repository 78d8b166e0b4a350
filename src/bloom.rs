use crate::utils::num::{next_pow2, u64_to_usize_saturating};

/// Bloom filter that absorbs first sightings before they reach the frequency
/// sketch (the "doorkeeper"). Sized for a target capacity at a fixed false
/// positive rate; cleared whenever the sketch ages.
pub(crate) struct Doorkeeper {
    bits: Vec<u64>,
    mask: u64,
    hashes: u32,
}

impl Doorkeeper {
    pub fn new(capacity: u64, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let ln2 = std::f64::consts::LN_2;
        // m = -n ln p / (ln 2)^2 bits, rounded up to a power of two so probes
        // can be mask-indexed.
        let bits_needed = (-(capacity as f64) * fp_rate.ln() / (ln2 * ln2)).ceil();
        let num_bits = next_pow2(bits_needed as u64).max(64);
        let hashes = ((num_bits as f64 / capacity as f64) * ln2).round();
        Self {
            bits: vec![0; u64_to_usize_saturating(num_bits / 64)],
            mask: num_bits - 1,
            hashes: (hashes as u32).clamp(1, 16),
        }
    }

    fn probe(&self, hash: u64, round: u32) -> u64 {
        // Double hashing: an odd stride derived from the upper half walks the
        // whole power-of-two table.
        let stride = (hash >> 32) | 1;
        hash.wrapping_add(stride.wrapping_mul(u64::from(round))) & self.mask
    }

    /// Marks `hash` as seen. Returns true when it was not present before.
    pub fn add(&mut self, hash: u64) -> bool {
        let mut was_missing = false;
        for round in 0..self.hashes {
            let bit = self.probe(hash, round);
            let word = u64_to_usize_saturating(bit / 64);
            let mask = 1u64 << (bit % 64);
            if self.bits[word] & mask == 0 {
                was_missing = true;
                self.bits[word] |= mask;
            }
        }
        was_missing
    }

    pub fn contains(&self, hash: u64) -> bool {
        (0..self.hashes).all(|round| {
            let bit = self.probe(hash, round);
            self.bits[u64_to_usize_saturating(bit / 64)] & (1u64 << (bit % 64)) != 0
        })
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_first_sighting() {
        let mut door = Doorkeeper::new(100, 0.01);
        assert!(door.add(42));
        assert!(!door.add(42));
        assert!(door.contains(42));
    }

    #[test]
    fn absent_keys_mostly_miss() {
        let mut door = Doorkeeper::new(1000, 0.01);
        for key in 0..100u64 {
            door.add(key);
        }
        let false_positives = (10_000..11_000u64).filter(|k| door.contains(*k)).count();
        // 1% target rate with a wide margin for the power-of-two rounding.
        assert!(false_positives < 100, "too many false positives: {false_positives}");
    }

    #[test]
    fn clear_forgets_everything() {
        let mut door = Doorkeeper::new(100, 0.01);
        for key in 0..50u64 {
            door.add(key);
        }
        door.clear();
        for key in 0..50u64 {
            assert!(!door.contains(key));
        }
    }
}
