//! Morton (Z-order) keys for integer grid cells.
//!
//! Signed cell coordinates are biased into the unsigned range and their
//! bits interleaved, so cells close in space tend to be close in key order.

/// Interleave the low `64 / coords.len()` bits of each biased coordinate.
pub fn encode(coords: &[i32]) -> u64 {
    let dims = coords.len();
    debug_assert!(dims > 0 && dims <= 3);
    let bits = 64 / dims;
    let bias = 1i64 << (bits.min(32) - 1);

    let mut key = 0u64;
    for (d, &c) in coords.iter().enumerate() {
        let biased = (c as i64 + bias) as u64;
        for bit in 0..bits {
            key |= ((biased >> bit) & 1) << (bit * dims + d);
        }
    }
    key
}
