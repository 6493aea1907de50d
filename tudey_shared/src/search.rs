//! Interpolation search over ordered timestamps.
//!
//! Snapshots usually arrive at a steady rate, so the fractional position of a
//! target between the ends of the bracket is a good guess for its index. The
//! search probes there instead of the midpoint and narrows until the bracket
//! spans two adjacent entries.

/// Finds the adjacent pair `(lo, lo + 1)` with `key(lo) <= target < key(lo + 1)`.
///
/// Requires `len >= 2`, `key` non-decreasing and
/// `key(0) < target < key(len - 1)`.
pub fn bracket_by<F>(len: usize, target: i64, key: F) -> (usize, usize)
where
    F: Fn(usize) -> i64,
{
    debug_assert!(len >= 2, "bracket needs two entries");
    let mut lo = 0;
    let mut hi = len - 1;
    while hi - lo > 1 {
        let dist = hi - lo;
        let probe = if dist == 2 {
            lo + 1
        } else {
            let lo_ts = key(lo);
            let hi_ts = key(hi);
            let frac = (target - lo_ts) as f64 / (hi_ts - lo_ts) as f64;
            let offset = (frac * dist as f64).round() as usize;
            lo + offset.clamp(1, dist - 1)
        };
        if key(probe) <= target {
            lo = probe;
        } else {
            hi = probe;
        }
    }
    (lo, hi)
}

/// `bracket_by` over a slice of timestamps.
pub fn bracket(timestamps: &[i64], target: i64) -> (usize, usize) {
    bracket_by(timestamps.len(), target, |i| timestamps[i])
}
