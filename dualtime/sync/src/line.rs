//! Bookkeeping shared by the feedback-driven stages.
//!
//! Both the cross-domain resynchronizer and the network stage keep a line of
//! slope `period / (period + correction)` through the point where the next
//! sample is expected and the time it should read there.

use dualtime_core::{ClockError, ClockResult, Fixed32};

/// Expected position of the next sample, with the fractional part of the
/// accumulated corrections carried along.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Expected {
    whole: i64,
    frac: Fixed32,
}

impl Expected {
    pub(crate) fn at(whole: i64) -> Self {
        Self {
            whole,
            frac: Fixed32::ZERO,
        }
    }

    /// Moves forward by `period + correction`. Left unchanged on overflow.
    pub(crate) fn advance(&mut self, period: i64, correction: Fixed32) -> ClockResult<()> {
        let sum = self.frac.checked_add(correction).ok_or(ClockError::Overflow)?;
        self.whole = self
            .whole
            .checked_add(period)
            .and_then(|whole| whole.checked_add(sum.floor()))
            .ok_or(ClockError::Overflow)?;
        self.frac = Fixed32::from_raw(sum.frac() as i64);
        Ok(())
    }

    pub(crate) fn shift(&mut self, ticks: i64) {
        self.whole += ticks;
    }

    pub(crate) fn rounded(&self) -> i64 {
        self.whole
            .saturating_add((self.frac.raw() >= Fixed32::ONE.raw() / 2) as i64)
    }

    pub(crate) fn whole(&self) -> i64 {
        self.whole
    }
}

/// `period / (period + correction)`, rounded to nearest.
pub(crate) fn rate_for(period: i64, correction: Fixed32) -> ClockResult<Fixed32> {
    let num = (period as i128) << 64;
    let den = ((period as i128) << 32) + correction.raw() as i128;
    if period <= 0 || den <= 0 {
        return Err(ClockError::NegativeRate);
    }
    let raw = (num + den / 2) / den;
    i64::try_from(raw)
        .map(Fixed32::from_raw)
        .map_err(|_| ClockError::Overflow)
}

/// Offset of the line with slope `a` through `(expected, target)`.
pub(crate) fn offset_through(a: Fixed32, expected: &Expected, target: i64) -> ClockResult<i64> {
    let whole = a.checked_mul_int(expected.whole).ok_or(ClockError::Overflow)?;
    let frac = a.checked_mul(expected.frac).ok_or(ClockError::Overflow)?.round();
    target
        .checked_sub(whole)
        .and_then(|b| b.checked_sub(frac))
        .ok_or(ClockError::Overflow)
}
