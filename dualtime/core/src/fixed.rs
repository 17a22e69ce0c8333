//! Signed 64-bit fixed-point numbers with 32 fractional bits.
//!
//! Floating point is not available at interrupt priority on the targets this
//! crate is written for, so every rate coefficient in the clock pipeline is a
//! [`Fixed32`]. Multiplication and division never need a 128-bit type: the
//! 64-bit operand is split into two 32-bit halves and the partial products are
//! combined with 64-bit arithmetic, which is what the Cortex-M `UMULL`
//! instruction provides natively.

use core::fmt;
use core::ops::{Add, Neg, Sub};

const FRAC_BITS: u32 = 32;
const FRAC_MASK: u64 = 0xFFFF_FFFF;
const HALF: u64 = 1 << 31;

/// Rounding applied to the discarded fractional bits of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Round to nearest, ties away from zero.
    Nearest,
    /// Round toward negative infinity.
    Floor,
    /// Round toward positive infinity.
    Ceil,
}

impl Rounding {
    /// Rounding to apply to the magnitude of a negative result.
    const fn for_magnitude(self, negative: bool) -> Self {
        match (self, negative) {
            (Self::Floor, true) => Self::Ceil,
            (Self::Ceil, true) => Self::Floor,
            (mode, _) => mode,
        }
    }
}

/// Multiplies `a` by `bi + bf / 2^32`, rounding to nearest.
///
/// The wrapping fast path behind [`Fixed32::mul_int`], and through it every
/// tick conversion and affine transform. The result wraps if it does not fit
/// in 64 bits.
pub const fn mul64x32d32(a: u64, bi: u32, bf: u32) -> u64 {
    a.wrapping_mul(bi as u64)
        .wrapping_add(mul_frac(a, bf, Rounding::Nearest))
}

/// Computes `a * bf / 2^32` with the requested rounding.
const fn mul_frac(a: u64, bf: u32, rounding: Rounding) -> u64 {
    let bf = bf as u64;
    let high = (a >> FRAC_BITS) * bf;
    let low = (a & FRAC_MASK) * bf;
    let remainder = low & FRAC_MASK;
    let adjust = match rounding {
        Rounding::Nearest => (remainder >= HALF) as u64,
        Rounding::Ceil => (remainder != 0) as u64,
        Rounding::Floor => 0,
    };
    high + (low >> FRAC_BITS) + adjust
}

/// Computes `num * 2^32 / den` by restoring long division.
///
/// Returns `None` on division by zero or when the quotient needs more than
/// 64 bits.
const fn div_q32(num: u64, den: u64, rounding: Rounding) -> Option<u64> {
    if den == 0 {
        return None;
    }
    let whole = num / den;
    if whole > FRAC_MASK {
        return None;
    }
    let mut rem = num % den;
    let mut frac = 0u64;
    let mut bit = 0;
    while bit < FRAC_BITS {
        let carry = rem >> 63;
        rem <<= 1;
        frac <<= 1;
        if carry == 1 || rem >= den {
            rem = rem.wrapping_sub(den);
            frac |= 1;
        }
        bit += 1;
    }
    let adjust = match rounding {
        Rounding::Nearest => {
            // Compare 2 * rem against den without overflowing.
            (rem >> 63 == 1 || (rem << 1) >= den) as u64
        }
        Rounding::Ceil => (rem != 0) as u64,
        Rounding::Floor => 0,
    };
    ((whole << FRAC_BITS) | frac).checked_add(adjust)
}

/// Applies a sign to an unsigned magnitude, failing if it leaves `i64`.
const fn signed(magnitude: u64, negative: bool) -> Option<i64> {
    if negative {
        if magnitude > 1 << 63 {
            None
        } else {
            Some((magnitude as i64).wrapping_neg())
        }
    } else if magnitude > i64::MAX as u64 {
        None
    } else {
        Some(magnitude as i64)
    }
}

/// Computes `num * 2^32 / den` for signed operands.
const fn ratio_raw(num: i64, den: i64, rounding: Rounding) -> Option<i64> {
    let negative = (num < 0) != (den < 0);
    let rounding = rounding.for_magnitude(negative);
    match div_q32(num.unsigned_abs(), den.unsigned_abs(), rounding) {
        Some(magnitude) => signed(magnitude, negative),
        None => None,
    }
}

/// Q31.32 signed fixed-point number.
///
/// The integer part spans `±2^31`; the fractional resolution is `2^-32`
/// (about 0.23 parts per billion), well below any crystal skew worth
/// correcting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed32(i64);

impl Fixed32 {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// One.
    pub const ONE: Self = Self(1 << FRAC_BITS);

    /// Largest representable value.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a value from its raw Q31.32 representation.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw Q31.32 representation.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Creates a value from an integer.
    pub const fn from_int(value: i32) -> Self {
        Self((value as i64) << FRAC_BITS)
    }

    /// Creates `int + frac / 2^32`.
    pub const fn from_parts(int: i32, frac: u32) -> Self {
        Self(((int as i64) << FRAC_BITS) + frac as i64)
    }

    /// Creates `num / den`, rounded to nearest.
    pub const fn from_ratio(num: i64, den: i64) -> Option<Self> {
        match ratio_raw(num, den, Rounding::Nearest) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Integer part, rounded toward negative infinity.
    pub const fn floor(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    /// Fractional part in `[0, 1)` as a numerator over `2^32`.
    pub const fn frac(self) -> u32 {
        (self.0 as u64 & FRAC_MASK) as u32
    }

    /// Rounds to the nearest integer, ties away from zero.
    pub const fn round(self) -> i64 {
        let magnitude = self.0.unsigned_abs();
        let rounded = (magnitude + HALF) >> FRAC_BITS;
        if self.0 < 0 {
            -(rounded as i64)
        } else {
            rounded as i64
        }
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn abs(self) -> Self {
        Self(self.0.wrapping_abs())
    }

    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Multiplies an integer by this value with the given rounding.
    ///
    /// Returns `None` if the product does not fit in an `i64`.
    pub const fn checked_mul_int_rounded(self, x: i64, rounding: Rounding) -> Option<i64> {
        let negative = (x < 0) != (self.0 < 0);
        let rounding = rounding.for_magnitude(negative);
        let ux = x.unsigned_abs();
        let ua = self.0.unsigned_abs();
        let whole = match ux.checked_mul(ua >> FRAC_BITS) {
            Some(whole) => whole,
            None => return None,
        };
        let magnitude = match whole.checked_add(mul_frac(ux, (ua & FRAC_MASK) as u32, rounding)) {
            Some(magnitude) => magnitude,
            None => return None,
        };
        signed(magnitude, negative)
    }

    /// Multiplies an integer by this value, rounding to nearest.
    pub const fn checked_mul_int(self, x: i64) -> Option<i64> {
        self.checked_mul_int_rounded(x, Rounding::Nearest)
    }

    /// Multiplies an integer by this value, rounding to nearest.
    ///
    /// This is the interrupt-context fast path: it never branches on overflow
    /// and wraps instead. Callers keep their operands inside the range where
    /// the product fits, which holds for any realistic uptime in nanoseconds
    /// multiplied by a rate near one.
    pub const fn mul_int(self, x: i64) -> i64 {
        let negative = (x < 0) != (self.0 < 0);
        let ua = self.0.unsigned_abs();
        let magnitude = mul64x32d32(
            x.unsigned_abs(),
            (ua >> FRAC_BITS) as u32,
            (ua & FRAC_MASK) as u32,
        );
        if negative {
            (magnitude as i64).wrapping_neg()
        } else {
            magnitude as i64
        }
    }

    /// Divides an integer by this value with the given rounding.
    pub const fn checked_div_int_rounded(self, x: i64, rounding: Rounding) -> Option<i64> {
        ratio_raw(x, self.0, rounding)
    }

    /// Divides an integer by this value, rounding to nearest.
    pub const fn checked_div_int(self, x: i64) -> Option<i64> {
        self.checked_div_int_rounded(x, Rounding::Nearest)
    }

    /// Product of two fixed-point values.
    pub const fn checked_mul(self, rhs: Self) -> Option<Self> {
        match self.checked_mul_int(rhs.0) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Quotient of two fixed-point values.
    pub const fn checked_div(self, rhs: Self) -> Option<Self> {
        match ratio_raw(self.0, rhs.0, Rounding::Nearest) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// `1 / self`, or `None` for zero and for values too small to invert.
    pub const fn reciprocal(self) -> Option<Self> {
        Self::ONE.checked_div(self)
    }
}

impl Add for Fixed32 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Fixed32 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Neg for Fixed32 {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl From<i32> for Fixed32 {
    fn from(value: i32) -> Self {
        Self::from_int(value)
    }
}

/// Nine decimal digits of the fractional part, rounded.
fn decimal_frac(magnitude: u64) -> (u64, u64) {
    let whole = magnitude >> FRAC_BITS;
    let frac = ((magnitude & FRAC_MASK) * 1_000_000_000 + HALF) >> FRAC_BITS;
    if frac == 1_000_000_000 {
        (whole + 1, 0)
    } else {
        (whole, frac)
    }
}

impl fmt::Display for Fixed32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (whole, frac) = decimal_frac(self.0.unsigned_abs());
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{whole}.{frac:09}")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Fixed32 {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Fixed32({=i64})", self.0);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::format;

    fn reference_mul(x: i64, a: Fixed32) -> i64 {
        let product = x as i128 * a.raw() as i128;
        let half = 1i128 << 31;
        let magnitude = (product.abs() + half) >> 32;
        (if product < 0 { -magnitude } else { magnitude }) as i64
    }

    #[test]
    fn mul64x32d32_matches_wide_product() {
        let cases = [
            (0u64, 1u32, 0u32),
            (1_000_000_007, 20, 0xD555_5555),
            (u32::MAX as u64, 1464, 3_623_878_656),
            (0x0123_4567_89AB_CDEF, 0, 0x8000_0000),
            (123_456_789_012_345, 1, 1),
        ];
        for (a, bi, bf) in cases {
            let wide = a as u128 * ((bi as u128) << 32 | bf as u128);
            let expected = ((wide + (1 << 31)) >> 32) as u64;
            assert_eq!(mul64x32d32(a, bi, bf), expected, "a={a} bi={bi} bf={bf}");
        }
    }

    #[test]
    fn mul_int_rounds_to_nearest_symmetrically() {
        let a = Fixed32::from_ratio(15, 100).unwrap();
        for x in [-1_000_000_000i64, -50, -1, 0, 1, 50, 7_777_777, 1 << 40] {
            assert_eq!(a.mul_int(x), reference_mul(x, a), "x={x}");
            assert_eq!((-a).mul_int(x), reference_mul(x, -a), "x={x}");
        }
    }

    #[test]
    fn checked_mul_int_detects_overflow() {
        let two = Fixed32::from_int(2);
        assert_eq!(two.checked_mul_int(i64::MAX / 2), Some(i64::MAX - 1));
        assert_eq!(two.checked_mul_int(i64::MAX), None);
        assert_eq!(two.checked_mul_int(i64::MIN / 2), Some(i64::MIN));
    }

    #[test]
    fn from_ratio_is_exact_for_dyadic_values() {
        assert_eq!(Fixed32::from_ratio(1, 2), Some(Fixed32::from_raw(1 << 31)));
        assert_eq!(Fixed32::from_ratio(-3, 4), Some(Fixed32::from_raw(-(3 << 30))));
        assert_eq!(
            Fixed32::from_ratio(48_000_000, 32_768),
            Some(Fixed32::from_parts(1464, 3_623_878_656))
        );
        assert_eq!(Fixed32::from_ratio(1, 0), None);
        assert_eq!(Fixed32::from_ratio(1 << 40, 1), None);
    }

    #[test]
    fn directed_rounding_brackets_the_exact_quotient() {
        let three = Fixed32::from_int(3);
        assert_eq!(three.checked_div_int_rounded(10, Rounding::Floor), Some(3));
        assert_eq!(three.checked_div_int_rounded(10, Rounding::Ceil), Some(4));
        assert_eq!(three.checked_div_int_rounded(-10, Rounding::Floor), Some(-4));
        assert_eq!(three.checked_div_int_rounded(-10, Rounding::Ceil), Some(-3));
        assert_eq!(three.checked_div_int(-10), Some(-3));
        assert_eq!(three.checked_div_int(11), Some(4));
    }

    #[test]
    fn reciprocal_of_rate_near_one() {
        let period = 9_609_375;
        let a = Fixed32::from_ratio(period, period + 8).unwrap();
        let inv = a.reciprocal().unwrap();
        let product = a.checked_mul(inv).unwrap();
        assert!((product.raw() - Fixed32::ONE.raw()).abs() <= 2);
        assert_eq!(Fixed32::ZERO.reciprocal(), None);
    }

    #[test]
    fn rounding_helpers() {
        let x = Fixed32::from_ratio(15, 2).unwrap();
        assert_eq!(x.floor(), 7);
        assert_eq!(x.round(), 8);
        assert_eq!((-x).round(), -8);
        assert_eq!((-x).floor(), -8);
        assert_eq!(x.frac(), 1 << 31);
    }

    #[test]
    fn display_prints_nine_decimals() {
        assert_eq!(format!("{}", Fixed32::from_ratio(15, 100).unwrap()), "0.150000000");
        assert_eq!(format!("{}", Fixed32::from_int(-2)), "-2.000000000");
        assert_eq!(format!("{}", Fixed32::from_parts(1464, 3_623_878_656)), "1464.843750000");
    }
}
