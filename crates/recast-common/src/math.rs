//! Scalar math utilities

use std::f32::consts::PI;

#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Converts degrees to radians
#[inline]
pub fn deg_to_rad(deg: f32) -> f32 {
    deg * PI / 180.0
}

/// Next index in a cyclic sequence of length `n`
#[inline]
pub fn next_idx(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

/// Previous index in a cyclic sequence of length `n`
#[inline]
pub fn prev_idx(i: usize, n: usize) -> usize {
    if i >= 1 {
        i - 1
    } else {
        n - 1
    }
}

/// Rounds up to the next power of two. Zero stays zero.
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    x.next_power_of_two()
}

/// Integer base-2 logarithm, rounded down. `ilog2(0)` is zero.
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 {
        0
    } else {
        31 - x.leading_zeros()
    }
}

/// Rounds up to a multiple of four
#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

/// Hashes a polygon reference into a bucket index. The bucket count must be
/// a power of two.
#[inline]
pub fn hash_ref(a: u32) -> u32 {
    let mut a = a;
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_indices() {
        assert_eq!(next_idx(2, 3), 0);
        assert_eq!(prev_idx(0, 3), 2);
        assert_eq!(next_idx(0, 3), 1);
    }

    #[test]
    fn test_pow2_helpers() {
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(8), 8);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(1024), 10);
        assert_eq!(ilog2(1025), 10);
        assert_eq!(align4(5), 8);
    }
}
