//! Cross-domain resynchronization of the high-frequency clock.
//!
//! Once per sync period the low-power timer produces a compare edge that
//! latches the high-frequency counter. Since both crystals are fixed, the
//! high-frequency count at low-power tick `lp` should read
//! `offset + lp * ratio`; the difference to the count it actually reads is
//! the skew accumulated by the high-frequency crystal. A skew controller
//! turns that error into a rate correction, published as the affine pair of
//! the first virtual clock stage.
//!
//! All bookkeeping is done in high-frequency ticks. Published pairs map raw
//! high-frequency nanoseconds to corrected nanoseconds.

use heapless::HistoryBuffer;

use dualtime_core::{
    AffinePair, AffineTransform, ClockError, ClockResult, Fixed32, Rounding, TimeConversion,
};

use crate::config::VhtConfig;
use crate::flopsync::{Flopsync, SkewController};
use crate::line::{offset_through, rate_for, Expected};
use crate::stage::CorrectionStage;

/// Number of resync records kept for diagnostics.
pub const RESYNC_HISTORY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncKind {
    Initial,
    Periodic,
    Soft,
    Divergence,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResyncKind {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ResyncKind::Initial => defmt::write!(fmt, "Initial"),
            ResyncKind::Periodic => defmt::write!(fmt, "Periodic"),
            ResyncKind::Soft => defmt::write!(fmt, "Soft"),
            ResyncKind::Divergence => defmt::write!(fmt, "Divergence"),
        }
    }
}

/// One resynchronization, in high-frequency ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncRecord {
    pub kind: ResyncKind,
    pub lp_tick: u64,
    pub theoretical: i64,
    pub expected: i64,
    pub actual: i64,
    pub error: i64,
    pub correction: Fixed32,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResyncRecord {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "{} lp={=u64} T={=i64} E={=i64} A={=i64} e={=i64} u={}",
            self.kind,
            self.lp_tick,
            self.theoretical,
            self.expected,
            self.actual,
            self.error,
            self.correction
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncState {
    offset: i64,
    next_lp: u64,
    theoretical: i64,
    expected: Expected,
    correction: Fixed32,
    transform: AffineTransform,
}

/// The cross-domain resynchronizer.
///
/// Starts uninitialized; [`initialize`](Self::initialize) moves it to
/// running, where it stays. Methods that publish a pair return `None` while
/// correction is disabled and hold the pair back until it is enabled again.
#[derive(Debug)]
pub struct Vht<C = Flopsync> {
    config: VhtConfig,
    conversion: TimeConversion,
    controller: C,
    bound: i64,
    state: Option<SyncState>,
    correction_enabled: bool,
    held: Option<AffinePair>,
    history: HistoryBuffer<ResyncRecord, RESYNC_HISTORY>,
}

impl Vht<Flopsync> {
    /// A resynchronizer with the proportional controller at the configured
    /// gain.
    pub fn with_flopsync(config: VhtConfig, conversion: TimeConversion) -> ClockResult<Self> {
        Self::new(config, conversion, Flopsync::new(config.gain))
    }
}

impl<C: SkewController> Vht<C> {
    /// `conversion` is the tick conversion of the high-frequency timer.
    pub fn new(config: VhtConfig, conversion: TimeConversion, controller: C) -> ClockResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            conversion,
            controller,
            bound: config.max_theoretical_error(),
            state: None,
            correction_enabled: true,
            held: None,
            history: HistoryBuffer::new(),
        })
    }

    pub fn config(&self) -> &VhtConfig {
        &self.config
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// Largest tolerated error in high-frequency ticks.
    pub fn max_error(&self) -> i64 {
        self.bound
    }

    /// The pair computed last, published or not.
    pub fn pair(&self) -> AffinePair {
        self.state
            .map_or(AffinePair::IDENTITY, |state| state.transform.pair())
    }

    /// Low-power tick of the next scheduled sync edge.
    pub fn next_sync_lp(&self) -> Option<u64> {
        self.state.map(|state| state.next_lp)
    }

    /// Resync records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ResyncRecord> + '_ {
        self.history.oldest_ordered()
    }

    pub fn last_record(&self) -> Option<&ResyncRecord> {
        self.history.recent()
    }

    /// Starts resynchronization from a first capture.
    ///
    /// `hf_capture` is the extended high-frequency count latched at
    /// low-power tick `lp_edge`. Fixes the cross-domain offset and publishes
    /// the identity pair.
    pub fn initialize(&mut self, hf_capture: u64, lp_edge: u64) -> ClockResult<Option<AffinePair>> {
        let actual = hf_capture as i64;
        let offset = actual
            .checked_sub(self.lp_to_hf(lp_edge)?)
            .ok_or(ClockError::Overflow)?;
        self.controller.reset();
        self.state = Some(SyncState {
            offset,
            next_lp: lp_edge + self.config.sync_period_lp as u64,
            theoretical: actual,
            expected: Expected::at(actual),
            correction: Fixed32::ZERO,
            transform: AffineTransform::IDENTITY,
        });
        self.history.write(ResyncRecord {
            kind: ResyncKind::Initial,
            lp_tick: lp_edge,
            theoretical: actual,
            expected: actual,
            actual,
            error: 0,
            correction: Fixed32::ZERO,
        });
        log::info!(
            "resync started: offset {} ticks, period {} ticks, bound {} ticks",
            offset,
            self.config.sync_period_hf(),
            self.bound
        );
        Ok(self.publish(AffinePair::IDENTITY))
    }

    /// Processes the capture of the scheduled sync edge.
    ///
    /// Fails with [`ClockError::Divergence`] when the error exceeds what the
    /// crystal tolerance allows; the pair is then left unchanged and the
    /// history logged. Bookkeeping still moves on to the next period.
    pub fn on_sync_point(&mut self, hf_capture: u64) -> ClockResult<Option<AffinePair>> {
        let mut state = self.state.ok_or(ClockError::NotInitialized)?;

        let lp_tick = state.next_lp;
        let theoretical = state.offset + self.lp_to_hf(lp_tick)?;
        let period = theoretical - state.theoretical;
        state.expected.advance(period, state.correction)?;
        state.theoretical = theoretical;
        state.next_lp = lp_tick + self.config.sync_period_lp as u64;

        let actual = hf_capture as i64;
        let expected = state.expected.rounded();
        let error = actual - expected;
        let mut record = ResyncRecord {
            kind: ResyncKind::Periodic,
            lp_tick,
            theoretical,
            expected,
            actual,
            error,
            correction: state.correction,
        };

        if error.abs() > self.bound {
            record.kind = ResyncKind::Divergence;
            self.history.write(record);
            self.state = Some(state);
            log::error!(
                "clock divergence: error {} ticks exceeds bound {}",
                error,
                self.bound
            );
            self.dump_history();
            return Err(ClockError::Divergence {
                error,
                bound: self.bound,
            });
        }

        state.correction = self.controller.compute_correction(error);
        let a = rate_for(period, state.correction)?;
        let b = offset_through(a, &state.expected, theoretical)?;
        let pair = AffinePair::new(a, self.conversion.tick_to_ns(b))?;
        state.transform = AffineTransform::new(pair)?;
        self.state = Some(state);

        record.correction = state.correction;
        self.history.write(record);
        log::debug!(
            "resync: error {} ticks, correction {}, pair {}",
            error,
            state.correction,
            pair
        );
        Ok(self.publish(pair))
    }

    /// Re-anchors on a fresh capture outside the schedule.
    ///
    /// Used after the high-frequency counter was stopped or reloaded. The
    /// corrected clock is moved to the theoretical time of `lp_edge` at
    /// `hf_capture`, keeping the current rate; the controller is not fed.
    pub fn soft_resync(&mut self, hf_capture: u64, lp_edge: u64) -> ClockResult<Option<AffinePair>> {
        let mut state = self.state.ok_or(ClockError::NotInitialized)?;

        let actual = hf_capture as i64;
        let theoretical = state.offset + self.lp_to_hf(lp_edge)?;
        let previous = state.expected.rounded();
        state.expected = Expected::at(actual);
        state.theoretical = theoretical;
        state.next_lp = lp_edge + self.config.sync_period_lp as u64;

        let a = state.transform.pair().a;
        let b = offset_through(a, &state.expected, theoretical)?;
        let pair = AffinePair::new(a, self.conversion.tick_to_ns(b))?;
        state.transform = AffineTransform::new(pair)?;
        self.state = Some(state);

        self.history.write(ResyncRecord {
            kind: ResyncKind::Soft,
            lp_tick: lp_edge,
            theoretical,
            expected: previous,
            actual,
            error: actual - theoretical,
            correction: state.correction,
        });
        log::info!("soft resync at lp tick {}, pair {}", lp_edge, pair);
        Ok(self.publish(pair))
    }

    /// Moves the cross-domain offset by `ticks` after the high-frequency
    /// counter was set forward by that much.
    pub fn shift(&mut self, ticks: i64) {
        if let Some(state) = self.state.as_mut() {
            state.offset += ticks;
            state.theoretical += ticks;
            state.expected.shift(ticks);
        }
    }

    pub fn correction_enabled(&self) -> bool {
        self.correction_enabled
    }

    /// Enables or disables publishing of new pairs.
    ///
    /// Enabling returns the newest pair held back in the meantime.
    pub fn set_correction_enabled(&mut self, enabled: bool) -> Option<AffinePair> {
        self.correction_enabled = enabled;
        if enabled {
            self.held.take()
        } else {
            None
        }
    }

    fn publish(&mut self, pair: AffinePair) -> Option<AffinePair> {
        if self.correction_enabled {
            Some(pair)
        } else {
            self.held = Some(pair);
            None
        }
    }

    fn lp_to_hf(&self, lp_tick: u64) -> ClockResult<i64> {
        self.config
            .ratio
            .checked_mul_int(lp_tick as i64)
            .ok_or(ClockError::Overflow)
    }

    /// Corrected time, in the output domain of this stage, at low-power tick
    /// `lp_tick`.
    pub fn lp_to_corrected_ns(&self, lp_tick: u64) -> ClockResult<i64> {
        let state = self.state.ok_or(ClockError::NotInitialized)?;
        Ok(self.conversion.tick_to_ns(state.offset + self.lp_to_hf(lp_tick)?))
    }

    /// Low-power tick at corrected time `ns`.
    ///
    /// `Rounding::Ceil` gives the first tick whose corrected time is not
    /// before `ns`, `Rounding::Floor` the last one not after it.
    pub fn corrected_ns_to_lp(&self, ns: i64, rounding: Rounding) -> ClockResult<u64> {
        let state = self.state.ok_or(ClockError::NotInitialized)?;
        let hf_ticks = self.conversion.ns_to_tick(ns) - state.offset;
        let estimate = self
            .config
            .ratio
            .checked_div_int(hf_ticks)
            .ok_or(ClockError::Overflow)?
            .max(0);
        let at = |lp: i64| -> ClockResult<i64> { self.lp_to_corrected_ns(lp.max(0) as u64) };
        let lp = match rounding {
            Rounding::Nearest => estimate,
            Rounding::Ceil => {
                if at(estimate)? < ns {
                    estimate + 1
                } else if estimate > 0 && at(estimate - 1)? >= ns {
                    estimate - 1
                } else {
                    estimate
                }
            }
            Rounding::Floor => {
                if at(estimate)? > ns {
                    estimate - 1
                } else if at(estimate + 1)? <= ns {
                    estimate + 1
                } else {
                    estimate
                }
            }
        };
        Ok(lp.max(0) as u64)
    }

    /// Logs every resync record at error level.
    pub fn dump_history(&self) {
        for record in self.history.oldest_ordered() {
            log::error!(
                "  {:?} lp={} T={} E={} A={} e={} u={}",
                record.kind,
                record.lp_tick,
                record.theoretical,
                record.expected,
                record.actual,
                record.error,
                record.correction
            );
        }
    }
}

impl<C> CorrectionStage for Vht<C> {
    fn correct(&self, ns: i64) -> i64 {
        self.state
            .map_or(ns, |state| state.transform.forward(ns))
    }

    fn uncorrect(&self, ns: i64) -> i64 {
        self.state
            .map_or(ns, |state| state.transform.inverse(ns))
    }
}
