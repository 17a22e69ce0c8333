//! Affine time transforms `y = a * x + b`.

use core::fmt;

use crate::error::{ClockError, ClockResult};
use crate::fixed::Fixed32;

/// Rate and offset of one clock correction.
///
/// `a` is the relative rate (near one), `b` an offset in the unit of the
/// transformed time, usually nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinePair {
    pub a: Fixed32,
    pub b: i64,
}

impl AffinePair {
    /// The transform that leaves time untouched.
    pub const IDENTITY: Self = Self {
        a: Fixed32::ONE,
        b: 0,
    };

    /// Creates a pair, rejecting rates that cannot be inverted.
    pub fn new(a: Fixed32, b: i64) -> ClockResult<Self> {
        if !a.is_positive() {
            return Err(ClockError::NegativeRate);
        }
        Ok(Self { a, b })
    }

    /// Applies the transform.
    pub fn apply(&self, x: i64) -> i64 {
        self.a.mul_int(x).wrapping_add(self.b)
    }

    /// The transform equivalent to applying `self` and then `next`.
    ///
    /// `next(self(x)) = a2 * (a1 * x + b1) + b2`, so the rates multiply and the
    /// earlier offset is scaled by the later rate.
    pub fn then(&self, next: &AffinePair) -> ClockResult<Self> {
        let a = self.a.checked_mul(next.a).ok_or(ClockError::Overflow)?;
        let b = next
            .a
            .checked_mul_int(self.b)
            .and_then(|scaled| scaled.checked_add(next.b))
            .ok_or(ClockError::Overflow)?;
        Ok(Self { a, b })
    }

    /// Composes a sequence of pairs left to right.
    ///
    /// The result has `a = Π aᵢ` and `b = Σ bᵢ · Π_{j>i} aⱼ`; an empty sequence
    /// yields the identity.
    pub fn compose<'a, I>(pairs: I) -> ClockResult<Self>
    where
        I: IntoIterator<Item = &'a AffinePair>,
    {
        pairs
            .into_iter()
            .try_fold(Self::IDENTITY, |acc, pair| acc.then(pair))
    }
}

impl Default for AffinePair {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for AffinePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a={} b={}", self.a, self.b)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AffinePair {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "a={} b={=i64}", self.a, self.b);
    }
}

/// An [`AffinePair`] together with its precomputed inverse rate.
///
/// The reciprocal is computed once when the pair changes so that both
/// directions stay multiply-only and can run in interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineTransform {
    pair: AffinePair,
    reciprocal: Fixed32,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        pair: AffinePair::IDENTITY,
        reciprocal: Fixed32::ONE,
    };

    pub fn new(pair: AffinePair) -> ClockResult<Self> {
        if !pair.a.is_positive() {
            return Err(ClockError::NegativeRate);
        }
        let reciprocal = pair.a.reciprocal().ok_or(ClockError::Overflow)?;
        Ok(Self { pair, reciprocal })
    }

    pub fn pair(&self) -> AffinePair {
        self.pair
    }

    pub fn reciprocal(&self) -> Fixed32 {
        self.reciprocal
    }

    /// `a * x + b`.
    pub fn forward(&self, x: i64) -> i64 {
        self.pair.apply(x)
    }

    /// `(y - b) / a`.
    ///
    /// The reciprocal alone loses `|y| * 2^-32` to rounding, which for a day
    /// of nanoseconds is tens of microseconds. One refinement step with the
    /// residual of the forward transform brings the result back to within one
    /// unit of the exact inverse.
    pub fn inverse(&self, y: i64) -> i64 {
        let delta = y.wrapping_sub(self.pair.b);
        let estimate = self.reciprocal.mul_int(delta);
        let residual = delta.wrapping_sub(self.pair.a.mul_int(estimate));
        estimate.wrapping_add(self.reciprocal.mul_int(residual))
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(num: i64, den: i64) -> Fixed32 {
        Fixed32::from_ratio(num, den).unwrap()
    }

    #[test]
    fn negative_and_zero_rates_are_rejected() {
        assert_eq!(
            AffinePair::new(-Fixed32::ONE, 0),
            Err(ClockError::NegativeRate)
        );
        assert_eq!(AffinePair::new(Fixed32::ZERO, 0), Err(ClockError::NegativeRate));
        assert!(AffinePair::new(rate(999, 1000), -5).is_ok());
    }

    #[test]
    fn composition_order_matters() {
        let p1 = AffinePair::new(rate(2, 1), 10).unwrap();
        let p2 = AffinePair::new(rate(3, 1), 7).unwrap();

        let forward = p1.then(&p2).unwrap();
        assert_eq!(forward.a, rate(6, 1));
        assert_eq!(forward.b, 10 * 3 + 7);

        let backward = p2.then(&p1).unwrap();
        assert_eq!(backward.a, rate(6, 1));
        assert_eq!(backward.b, 7 * 2 + 10);

        for x in [-100, 0, 1, 12345] {
            assert_eq!(forward.apply(x), p2.apply(p1.apply(x)));
            assert_eq!(backward.apply(x), p1.apply(p2.apply(x)));
        }
    }

    #[test]
    fn empty_composition_is_identity() {
        let empty: [AffinePair; 0] = [];
        assert_eq!(AffinePair::compose(empty.iter()), Ok(AffinePair::IDENTITY));
    }

    #[test]
    fn inverse_undoes_forward_over_a_day_of_nanoseconds() {
        let pairs = [
            AffinePair::new(rate(9_609_375, 9_609_383), 1_234).unwrap(),
            AffinePair::new(rate(1_000_300, 1_000_000), -987_654).unwrap(),
            AffinePair::IDENTITY,
        ];
        let day_ns = 86_400_000_000_000i64;
        for pair in pairs {
            let transform = AffineTransform::new(pair).unwrap();
            for t in [0, 1, 999_999_937, day_ns, day_ns * 30 + 17] {
                let roundtrip = transform.inverse(transform.forward(t));
                assert!((roundtrip - t).abs() <= 1, "pair {pair} t={t} got {roundtrip}");
            }
        }
    }
}
