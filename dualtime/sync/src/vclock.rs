//! A virtual clock composed of positioned correction stages.

use dualtime_core::{AffinePair, AffineTransform, ClockError, ClockResult};

use crate::stage::CorrectionStage;

/// Chain of `N` affine correction pairs applied in position order.
///
/// Every stage owns one position and replaces its pair through
/// [`update_correction_pair`](Self::update_correction_pair). The combined
/// pair and its reciprocal are recomputed there, so [`correct`] and
/// [`uncorrect`] cost one multiply-add each.
///
/// [`correct`]: CorrectionStage::correct
/// [`uncorrect`]: CorrectionStage::uncorrect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualClock<const N: usize> {
    pairs: [AffinePair; N],
    combined: AffineTransform,
}

impl<const N: usize> VirtualClock<N> {
    pub const fn new() -> Self {
        Self {
            pairs: [AffinePair::IDENTITY; N],
            combined: AffineTransform::IDENTITY,
        }
    }

    pub const fn stages(&self) -> usize {
        N
    }

    /// Replaces the pair at `position` and recomputes the combined pair.
    pub fn update_correction_pair(&mut self, pair: AffinePair, position: usize) -> ClockResult<()> {
        if position >= N {
            return Err(ClockError::InvalidStage {
                position,
                stages: N,
            });
        }
        if !pair.a.is_positive() {
            log::warn!("rejecting correction pair {} for stage {}", pair, position);
            return Err(ClockError::NegativeRate);
        }
        let mut pairs = self.pairs;
        pairs[position] = pair;
        self.combined = AffineTransform::new(AffinePair::compose(pairs.iter())?)?;
        self.pairs = pairs;
        Ok(())
    }

    /// Puts the stage at `position` back to the identity.
    pub fn reset_stage(&mut self, position: usize) -> ClockResult<()> {
        self.update_correction_pair(AffinePair::IDENTITY, position)
    }

    pub fn pair(&self, position: usize) -> Option<AffinePair> {
        self.pairs.get(position).copied()
    }

    pub fn combined(&self) -> AffinePair {
        self.combined.pair()
    }

    /// The composition of the stages from `position` on.
    ///
    /// Maps the output of stage `position - 1` to fully corrected time.
    pub fn suffix(&self, position: usize) -> ClockResult<AffineTransform> {
        let pairs = self.pairs.get(position..).unwrap_or(&[]);
        AffineTransform::new(AffinePair::compose(pairs.iter())?)
    }
}

impl<const N: usize> Default for VirtualClock<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CorrectionStage for VirtualClock<N> {
    fn correct(&self, ns: i64) -> i64 {
        self.combined.forward(ns)
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        self.combined.inverse(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualtime_core::Fixed32;

    fn pair(num: i64, den: i64, b: i64) -> AffinePair {
        AffinePair::new(Fixed32::from_ratio(num, den).unwrap(), b).unwrap()
    }

    #[test]
    fn test_zero_stages_pass_through() {
        let clock = VirtualClock::<0>::new();
        for t in [-5, 0, 123_456_789_012] {
            assert_eq!(clock.correct(t), t);
            assert_eq!(clock.uncorrect(t), t);
        }
    }

    #[test]
    fn test_rejects_bad_updates_without_side_effects() {
        let mut clock = VirtualClock::<2>::new();
        clock.update_correction_pair(pair(2, 1, 5), 0).unwrap();
        let before = clock;

        let negative = AffinePair {
            a: Fixed32::from_int(-1),
            b: 0,
        };
        assert_eq!(
            clock.update_correction_pair(negative, 1),
            Err(ClockError::NegativeRate)
        );
        assert_eq!(
            clock.update_correction_pair(AffinePair::IDENTITY, 2),
            Err(ClockError::InvalidStage {
                position: 2,
                stages: 2
            })
        );
        assert_eq!(clock, before);
    }

    #[test]
    fn test_two_stages_compose_in_position_order() {
        let p1 = pair(2, 1, 10);
        let p2 = pair(3, 1, 7);

        let mut clock = VirtualClock::<2>::new();
        clock.update_correction_pair(p1, 0).unwrap();
        clock.update_correction_pair(p2, 1).unwrap();
        assert_eq!(clock.combined().a, Fixed32::from_int(6));
        assert_eq!(clock.combined().b, 10 * 3 + 7);

        let mut swapped = VirtualClock::<2>::new();
        swapped.update_correction_pair(p2, 0).unwrap();
        swapped.update_correction_pair(p1, 1).unwrap();
        assert_eq!(swapped.combined().b, 7 * 2 + 10);

        assert_eq!(clock.suffix(1).unwrap().pair(), p2);
        assert_eq!(clock.suffix(2).unwrap().pair(), AffinePair::IDENTITY);
    }

    #[test]
    fn test_uncorrect_inverts_correct() {
        let mut clock = VirtualClock::<2>::new();
        clock
            .update_correction_pair(pair(9_609_375, 9_609_382, -1_500), 0)
            .unwrap();
        clock
            .update_correction_pair(pair(1_000_000_020, 1_000_000_000, 250_000), 1)
            .unwrap();
        for t in [0, 1_000, 3_600_000_000_000, 604_800_000_000_000] {
            assert!((clock.uncorrect(clock.correct(t)) - t).abs() <= 1);
        }
    }
}
