//! Skew controllers and the network synchronization stage.

use dualtime_core::{AffinePair, AffineTransform, ClockError, ClockResult, Fixed32};

use crate::line::{offset_through, rate_for, Expected};
use crate::stage::CorrectionStage;

/// Default proportional gain, 0.15.
pub const DEFAULT_GAIN: Fixed32 = Fixed32::from_raw(644_245_094);

/// Sync packets a network stage may miss before it drops its rate estimate
/// and re-acquires the master offset.
pub const MAX_MISSED_SYNCS: i64 = 16;

/// Maps clock error samples to corrections.
///
/// The correction returned for a sample is the number of extra ticks the
/// clock is expected to count over the next period.
pub trait SkewController {
    fn compute_correction(&mut self, error: i64) -> Fixed32;

    /// Zeroes the history and restores the default parameters.
    fn reset(&mut self);

    fn history(&self) -> ControllerHistory;
}

/// The last three error samples and the last two corrections, newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerHistory {
    pub errors: [i64; 3],
    pub corrections: [Fixed32; 2],
}

impl ControllerHistory {
    fn push(&mut self, error: i64, correction: Fixed32) {
        self.errors = [error, self.errors[0], self.errors[1]];
        self.corrections = [correction, self.corrections[0]];
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ControllerHistory {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "e={=[i64]} u=[{}, {}]",
            &self.errors[..],
            self.corrections[0],
            self.corrections[1]
        );
    }
}

fn scale(gain: Fixed32, error: i64) -> Fixed32 {
    let raw = gain.raw() as i128 * error as i128;
    Fixed32::from_raw(raw.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

fn clamp(value: Fixed32, limit: Fixed32) -> Fixed32 {
    value.clamp(-limit, limit)
}

/// Proportional controller: `u = gain * e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flopsync {
    gain: Fixed32,
    default_gain: Fixed32,
    limit: Fixed32,
    history: ControllerHistory,
}

impl Flopsync {
    pub const fn new(gain: Fixed32) -> Self {
        Self {
            gain,
            default_gain: gain,
            limit: Fixed32::MAX,
            history: ControllerHistory {
                errors: [0; 3],
                corrections: [Fixed32::ZERO; 2],
            },
        }
    }

    /// Clamps every correction to `±limit`.
    pub fn with_limit(mut self, limit: Fixed32) -> Self {
        self.limit = limit.abs();
        self
    }

    pub fn gain(&self) -> Fixed32 {
        self.gain
    }

    /// Changes the gain until the next [`reset`](SkewController::reset).
    pub fn set_gain(&mut self, gain: Fixed32) {
        self.gain = gain;
    }
}

impl Default for Flopsync {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

impl SkewController for Flopsync {
    fn compute_correction(&mut self, error: i64) -> Fixed32 {
        let correction = clamp(scale(self.gain, error), self.limit);
        self.history.push(error, correction);
        correction
    }

    fn reset(&mut self) {
        self.gain = self.default_gain;
        self.history = ControllerHistory::default();
    }

    fn history(&self) -> ControllerHistory {
        self.history
    }
}

/// Incremental PI controller: `u = u₋₁ + 1.375 e − e₋₁`.
///
/// Removes a constant skew completely where the proportional controller
/// leaves a residual error. The integral state is clamped to the limit.
///
/// Without a limit the output is bounded only over a finite horizon: `n`
/// samples after a reset, `|u| <= (1.375 + 0.375 (n - 1)) * max|e|`. Use
/// [`with_limit`](Self::with_limit) for a bound that holds forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flopsync2 {
    limit: Fixed32,
    history: ControllerHistory,
}

impl Flopsync2 {
    const KP: Fixed32 = Fixed32::from_parts(1, 1 << 30 | 1 << 29);

    pub fn new() -> Self {
        Self {
            limit: Fixed32::MAX,
            history: ControllerHistory::default(),
        }
    }

    pub fn with_limit(mut self, limit: Fixed32) -> Self {
        self.limit = limit.abs();
        self
    }
}

impl Default for Flopsync2 {
    fn default() -> Self {
        Self::new()
    }
}

impl SkewController for Flopsync2 {
    fn compute_correction(&mut self, error: i64) -> Fixed32 {
        let previous = self.history.corrections[0];
        let unclamped = previous
            .checked_add(scale(Self::KP, error))
            .and_then(|u| u.checked_sub(scale(Fixed32::ONE, self.history.errors[0])))
            .unwrap_or(if error > 0 { self.limit } else { -self.limit });
        let correction = clamp(unclamped, self.limit);
        self.history.push(error, correction);
        correction
    }

    fn reset(&mut self) {
        self.history = ControllerHistory::default();
    }

    fn history(&self) -> ControllerHistory {
        self.history
    }
}

#[derive(Debug, Clone, Copy)]
struct NetworkAnchor {
    master_ns: i64,
    expected: Expected,
    correction: Fixed32,
}

/// Correction stage driven by network time synchronization.
///
/// The network layer reports, for every sync packet, the local time at which
/// it arrived and the master time it carries. The first packet sets the
/// offset; later ones feed the controller, which adjusts the rate so that
/// the local clock converges on the master.
#[derive(Debug, Clone)]
pub struct FlopsyncStage<C> {
    controller: C,
    period_ns: i64,
    transform: AffineTransform,
    anchor: Option<NetworkAnchor>,
}

impl<C: SkewController> FlopsyncStage<C> {
    /// Creates a stage expecting one sync packet every `period_ns` of master
    /// time.
    pub fn new(controller: C, period_ns: i64) -> ClockResult<Self> {
        if period_ns <= 0 {
            return Err(ClockError::InvalidConfig("sync period must be positive"));
        }
        Ok(Self {
            controller,
            period_ns,
            transform: AffineTransform::IDENTITY,
            anchor: None,
        })
    }

    pub fn is_synchronized(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn pair(&self) -> AffinePair {
        self.transform.pair()
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Processes one sync packet and returns the new pair of this stage.
    ///
    /// `local_ns` is the arrival time in this stage's input domain.
    ///
    /// After more than [`MAX_MISSED_SYNCS`] periods without a packet the
    /// stage starts over from the new packet's offset.
    pub fn on_sync(&mut self, local_ns: i64, master_ns: i64) -> ClockResult<AffinePair> {
        let update = match self.anchor {
            None => Self::acquire(local_ns, master_ns)?,
            Some(mut anchor) => {
                let elapsed = master_ns
                    .checked_sub(anchor.master_ns)
                    .ok_or(ClockError::Overflow)?;
                if elapsed <= 0 {
                    return Err(ClockError::NonMonotonicTime {
                        current: anchor.master_ns,
                        requested: master_ns,
                    });
                }
                let rounds_up = elapsed % self.period_ns >= (self.period_ns + 1) / 2;
                let periods = (elapsed / self.period_ns + rounds_up as i64).max(1);
                if periods > MAX_MISSED_SYNCS {
                    log::warn!("network sync lost for {} periods, re-acquiring", periods);
                    let acquired = Self::acquire(local_ns, master_ns)?;
                    self.controller.reset();
                    return self.install(acquired);
                }
                for _ in 0..periods {
                    anchor.expected.advance(self.period_ns, anchor.correction)?;
                }
                let error = local_ns
                    .checked_sub(anchor.expected.rounded())
                    .ok_or(ClockError::Overflow)?;
                anchor.correction = self.controller.compute_correction(error);
                anchor.master_ns = master_ns;
                let a = rate_for(self.period_ns, anchor.correction)?;
                let b = offset_through(a, &anchor.expected, master_ns)?;
                log::debug!(
                    "network sync: error {} ns, correction {}",
                    error,
                    anchor.correction
                );
                (AffinePair::new(a, b)?, anchor)
            }
        };
        self.install(update)
    }

    fn install(&mut self, (pair, anchor): (AffinePair, NetworkAnchor)) -> ClockResult<AffinePair> {
        self.transform = AffineTransform::new(pair)?;
        self.anchor = Some(anchor);
        Ok(pair)
    }

    fn acquire(local_ns: i64, master_ns: i64) -> ClockResult<(AffinePair, NetworkAnchor)> {
        let offset = master_ns.checked_sub(local_ns).ok_or(ClockError::Overflow)?;
        let pair = AffinePair::new(Fixed32::ONE, offset)?;
        log::info!("network sync acquired, offset {} ns", pair.b);
        let anchor = NetworkAnchor {
            master_ns,
            expected: Expected::at(local_ns),
            correction: Fixed32::ZERO,
        };
        Ok((pair, anchor))
    }

    /// Drops synchronization; the stage becomes the identity.
    pub fn reset(&mut self) {
        self.controller.reset();
        self.transform = AffineTransform::IDENTITY;
        self.anchor = None;
    }
}

impl<C> CorrectionStage for FlopsyncStage<C> {
    fn correct(&self, ns: i64) -> i64 {
        self.transform.forward(ns)
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        self.transform.inverse(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gain_is_fifteen_percent() {
        let reference = Fixed32::from_ratio(15, 100).unwrap();
        assert!((DEFAULT_GAIN.raw() - reference.raw()).abs() <= 1);
        assert_eq!(Flopsync2::KP, Fixed32::from_ratio(11, 8).unwrap());
    }

    #[test]
    fn test_proportional_correction_and_history() {
        let mut controller = Flopsync::default();
        let u = controller.compute_correction(50);
        assert!((u - Fixed32::from_ratio(15, 2).unwrap()).abs().raw() <= 50);

        controller.compute_correction(-20);
        controller.compute_correction(4);
        let history = controller.history();
        assert_eq!(history.errors, [4, -20, 50]);
        assert_eq!(history.corrections[1], scale(controller.gain(), -20));
    }

    #[test]
    fn test_reset_restores_gain_and_clears_history() {
        let mut controller = Flopsync::default();
        controller.set_gain(Fixed32::ONE);
        controller.compute_correction(100);
        controller.reset();
        assert_eq!(controller.gain(), DEFAULT_GAIN);
        assert_eq!(controller.history(), ControllerHistory::default());
    }

    #[test]
    fn test_output_is_bounded() {
        let limit = Fixed32::from_int(1_000);
        let mut p = Flopsync::default().with_limit(limit);
        let mut pi = Flopsync2::new().with_limit(limit);
        let mut error = 1i64;
        for i in 0..200 {
            error = error.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            let sample = if i % 7 == 0 { i64::MAX - i } else { error >> 20 };
            assert!(p.compute_correction(sample).abs() <= limit);
            assert!(pi.compute_correction(sample).abs() <= limit);
        }
    }

    fn samples(count: usize, span: i64) -> impl Iterator<Item = i64> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..count).map(move |_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let magnitude = (state >> 33) as i64 % (span + 1);
            if (state >> 32) & 1 == 0 {
                magnitude
            } else {
                -magnitude
            }
        })
    }

    #[test]
    fn test_proportional_output_scales_with_largest_error() {
        let mut controller = Flopsync::default();
        let mut largest = 0i64;
        for error in samples(500, 1_000_000) {
            largest = largest.max(error.abs());
            let u = controller.compute_correction(error);
            let bound = DEFAULT_GAIN.raw() as i128 * largest as i128;
            assert!((u.raw() as i128).abs() <= bound, "e={error} u={u}");
        }
        assert!(largest > 0);
    }

    #[test]
    fn test_pi_output_bounded_over_horizon() {
        let mut controller = Flopsync2::new();
        let mut largest = 0i64;
        for (n, error) in samples(500, 1_000_000).enumerate() {
            largest = largest.max(error.abs());
            let u = controller.compute_correction(error);
            let kp = Flopsync2::KP.raw() as i128;
            let growth = kp - Fixed32::ONE.raw() as i128;
            let bound = (kp + growth * n as i128) * largest as i128;
            assert!((u.raw() as i128).abs() <= bound, "n={n} u={u}");
        }
    }

    #[test]
    fn test_pi_controller_cancels_constant_skew() {
        // A clock gaining 40 ticks per period, corrected by the controller.
        let mut controller = Flopsync2::new();
        let mut error = 0i64;
        let mut correction = Fixed32::ZERO;
        for _ in 0..60 {
            error += 40 - correction.round();
            correction = controller.compute_correction(error);
        }
        assert!(error.abs() <= 1, "residual error {error}");
        assert_eq!(correction.round(), 40);
    }

    #[test]
    fn test_network_stage_follows_master() {
        let period = 1_000_000_000;
        let mut stage = FlopsyncStage::new(Flopsync2::new(), period).unwrap();
        assert_eq!(stage.correct(12_345), 12_345);

        // Local clock starts 5 ms behind the master and runs 20 ppm fast.
        let local = |master: i64| master - 5_000_000 + (master - 1_000_000_000) / 50_000;
        let first = stage.on_sync(local(1_000_000_000), 1_000_000_000).unwrap();
        assert_eq!(first.b, 5_000_000);

        let mut last_error = i64::MAX;
        for k in 2..40 {
            let master = k * period;
            stage.on_sync(local(master), master).unwrap();
            last_error = (stage.correct(local(master + period)) - (master + period)).abs();
        }
        assert!(last_error < 4_000, "still {last_error} ns off");
        assert!(stage.pair().a < Fixed32::ONE);
    }

    #[test]
    fn test_network_stage_rejects_unrepresentable_master_times() {
        let mut stage = FlopsyncStage::new(Flopsync2::new(), 1_000_000_000).unwrap();
        let first = stage.on_sync(0, i64::MIN + 10).unwrap();
        assert_eq!(first.b, i64::MIN + 10);

        assert_eq!(stage.on_sync(1_000, i64::MAX - 10), Err(ClockError::Overflow));
        assert_eq!(stage.pair(), first);
        assert!(matches!(
            stage.on_sync(2_000, i64::MIN + 5),
            Err(ClockError::NonMonotonicTime { .. })
        ));

        let mut fresh = FlopsyncStage::new(Flopsync2::new(), 1_000_000_000).unwrap();
        assert_eq!(fresh.on_sync(i64::MIN, i64::MAX), Err(ClockError::Overflow));
        assert!(!fresh.is_synchronized());
    }

    #[test]
    fn test_network_stage_reacquires_after_long_gap() {
        let period = 1_000_000_000;
        let mut stage = FlopsyncStage::new(Flopsync2::new(), period).unwrap();
        stage.on_sync(0, 0).unwrap();
        stage.on_sync(period + 10_000, period).unwrap();
        assert_ne!(stage.controller().history(), ControllerHistory::default());

        // Billions of missed periods are not replayed one by one.
        let pair = stage
            .on_sync(5_000_000_000_000_000_000, 4_000_000_000_000_000_000)
            .unwrap();
        assert_eq!(pair, AffinePair::new(Fixed32::ONE, -1_000_000_000_000_000_000).unwrap());
        assert_eq!(stage.controller().history(), ControllerHistory::default());
        assert!(stage.is_synchronized());
    }

    #[test]
    fn test_network_stage_bridges_a_few_missed_packets() {
        let period = 1_000_000_000;
        let mut stage = FlopsyncStage::new(Flopsync2::new(), period).unwrap();
        stage.on_sync(0, 0).unwrap();
        let pair = stage.on_sync(3 * period, 3 * period).unwrap();
        assert_eq!(pair, AffinePair::IDENTITY);
        assert_eq!(stage.controller().history().errors[0], 0);
    }
}
