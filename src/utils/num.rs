//! Numeric utilities: centralized integer conversions and sizing helpers.
//!
//! Guidelines
//! - Prefer saturating conversions when best-effort is acceptable and clamping
//!   is safer than panicking or truncating (e.g., converting a cost to u64 for
//!   metrics).
//! - Prefer lossless widening with explicit helpers to keep call sites
//!   consistent and searchable.

/// Smallest power of two greater than or equal to `v` (1 for `v == 0`).
#[inline]
#[must_use]
pub fn next_pow2(v: u64) -> u64 {
    if v <= 1 {
        return 1;
    }
    let mut n = v - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n |= n >> 32;
    n + 1
}

#[inline]
#[must_use]
pub fn u64_to_usize_saturating(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    v as u64
}

#[inline]
#[must_use]
pub fn i64_to_u64_saturating_nonnegative(v: i64) -> u64 {
    if v <= 0 {
        0
    } else {
        v as u64
    }
}
