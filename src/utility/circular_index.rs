//! `CircularIndex`: a modular counter for fixed-capacity rings.
//!
//! Ring buffers address their slots through a pair of these: the head (next
//! write position) and the tail (oldest occupied slot). Arithmetic wraps at
//! the modulus fixed at construction, so `index + 1` on the last slot lands
//! back on slot zero.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Index into `0..modulus` that wraps on increment and decrement.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CircularIndex {
    value: usize,
    modulus: usize,
}

impl CircularIndex {
    /// Creates an index positioned at slot zero.
    ///
    /// # Panics
    ///
    /// Panics if `modulus == 0`; an empty ring has no addressable slot.
    #[inline]
    pub fn new(modulus: usize) -> Self {
        Self::with_value(0, modulus)
    }

    /// Creates an index positioned at `value % modulus`.
    #[inline]
    pub fn with_value(value: usize, modulus: usize) -> Self {
        assert!(modulus > 0, "CircularIndex modulus must be non-zero");
        Self {
            value: value % modulus,
            modulus,
        }
    }

    /// Current slot.
    #[inline]
    pub const fn get(self) -> usize {
        self.value
    }

    #[inline]
    pub const fn modulus(self) -> usize {
        self.modulus
    }

    /// Number of forward steps needed to move from `self` to `other`.
    #[inline]
    pub fn distance_to(self, other: CircularIndex) -> usize {
        debug_assert_eq!(self.modulus, other.modulus);
        (other.value + self.modulus - self.value) % self.modulus
    }
}

impl Add<usize> for CircularIndex {
    type Output = CircularIndex;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self {
            value: (self.value + rhs % self.modulus) % self.modulus,
            modulus: self.modulus,
        }
    }
}

impl AddAssign<usize> for CircularIndex {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl Sub<usize> for CircularIndex {
    type Output = CircularIndex;

    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self {
            value: (self.value + self.modulus - rhs % self.modulus) % self.modulus,
            modulus: self.modulus,
        }
    }
}

impl SubAssign<usize> for CircularIndex {
    #[inline]
    fn sub_assign(&mut self, rhs: usize) {
        *self = *self - rhs;
    }
}

impl From<CircularIndex> for usize {
    #[inline]
    fn from(idx: CircularIndex) -> usize {
        idx.value
    }
}

impl fmt::Debug for CircularIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CircularIndex({}/{})", self.value, self.modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_forward() {
        let idx = CircularIndex::new(4) + 5;
        assert_eq!(idx.get(), 1);
    }

    #[test]
    fn wraps_backward() {
        let mut idx = CircularIndex::new(4);
        idx -= 1;
        assert_eq!(idx.get(), 3);
        idx -= 9;
        assert_eq!(idx.get(), 2);
    }

    #[test]
    fn distance_wraps() {
        let a = CircularIndex::with_value(3, 5);
        let b = CircularIndex::with_value(1, 5);
        assert_eq!(a.distance_to(b), 3);
        assert_eq!(b.distance_to(a), 2);
        assert_eq!(a.distance_to(a), 0);
    }

    #[test]
    fn zero_modulus_panics() {
        assert!(std::panic::catch_unwind(|| CircularIndex::new(0)).is_err());
    }
}
