//! Wrap-around sequence-number arithmetic.
//!
//! Sequence numbers are `u32` counters that wrap modulo 2^32.  Two numbers
//! are compared by the sign of their wrapping difference, which is correct as
//! long as they are less than `u32::MAX / 2` apart (windows are at most
//! [`crate::config::MAX_WINDOW`] wide, so this always holds).

/// `true` when `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= u32::MAX / 2
}

/// `true` when `a` is strictly before `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

/// `true` when `seq` lies in `[base, base + size)`.
#[inline]
pub fn in_window(seq: u32, base: u32, size: usize) -> bool {
    (seq.wrapping_sub(base) as usize) < size
}

/// Number of sequence numbers from `from` up to (not including) `to`.
#[inline]
pub fn distance(from: u32, to: u32) -> usize {
    to.wrapping_sub(from) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        assert!(seq_lt(1, 2));
        assert!(seq_le(2, 2));
        assert!(!seq_lt(2, 2));
        assert!(!seq_le(3, 2));
    }

    #[test]
    fn ordering_across_wrap() {
        assert!(seq_lt(u32::MAX, 0));
        assert!(seq_lt(u32::MAX - 3, 2));
        assert!(!seq_lt(2, u32::MAX - 3));
    }

    #[test]
    fn window_membership_across_wrap() {
        let base = u32::MAX - 1;
        assert!(in_window(base, base, 4));
        assert!(in_window(1, base, 4));
        assert!(!in_window(2, base, 4));
        assert!(!in_window(base - 1, base, 4));
        assert_eq!(distance(base, 2), 4);
    }
}
