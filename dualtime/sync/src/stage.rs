//! The correction stage abstraction.

use dualtime_core::AffineTransform;

/// One step of time correction.
///
/// `correct` maps time from the stage's input domain to its output domain and
/// `uncorrect` maps it back; the two are inverses up to fixed-point rounding.
/// Both are called from interrupt context and must not block.
pub trait CorrectionStage {
    fn correct(&self, ns: i64) -> i64;

    fn uncorrect(&self, ns: i64) -> i64;
}

/// The stage that leaves time untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl CorrectionStage for Identity {
    fn correct(&self, ns: i64) -> i64 {
        ns
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        ns
    }
}

impl CorrectionStage for AffineTransform {
    fn correct(&self, ns: i64) -> i64 {
        self.forward(ns)
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        self.inverse(ns)
    }
}

impl<S: CorrectionStage + ?Sized> CorrectionStage for &S {
    fn correct(&self, ns: i64) -> i64 {
        (**self).correct(ns)
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        (**self).uncorrect(ns)
    }
}
