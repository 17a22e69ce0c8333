//! The corrected kernel clock.
//!
//! Raw high-frequency time goes through a two-stage virtual clock: the
//! cross-domain resynchronizer first, network synchronization second.
//! The resynchronizer is started lazily on first use.

use core::convert::Infallible;

use dualtime_core::{ClockError, ClockResult};
use dualtime_sync::{
    CorrectionStage, Flopsync, Flopsync2, FlopsyncStage, SkewController, VirtualClock, Vht,
    NETWORK_STAGE, VHT_STAGE,
};
use dualtime_timer::{CaptureCounter, HighFrequencyTimer, LowPowerTimer, Platform, WakeCounter};

use crate::config::ClockConfig;

/// Correction stages of the kernel clock.
pub const STAGES: usize = 2;

/// The kernel's view of time.
///
/// Every method expects to run with interrupts disabled; see
/// [`GlobalClock`](crate::GlobalClock) for the shared instance.
pub struct Clock<H, L, P, C = Flopsync> {
    pub(crate) config: ClockConfig,
    pub(crate) hf: HighFrequencyTimer<H>,
    pub(crate) lp: LowPowerTimer<L>,
    pub(crate) platform: P,
    pub(crate) vht: Vht<C>,
    pub(crate) network: FlopsyncStage<Flopsync2>,
    pub(crate) vclock: VirtualClock<STAGES>,
    interrupt_at: Option<i64>,
    fired: Option<i64>,
}

impl<H, L, P> Clock<H, L, P, Flopsync>
where
    H: CaptureCounter,
    L: WakeCounter,
    P: Platform,
{
    /// Creates a clock resynchronized by the proportional controller.
    pub fn new(config: ClockConfig, hf: H, lp: L, platform: P) -> ClockResult<Self> {
        let controller = Flopsync::new(config.vht.gain);
        Self::with_controller(config, hf, lp, platform, controller)
    }
}

impl<H, L, P, C> Clock<H, L, P, C>
where
    H: CaptureCounter,
    L: WakeCounter,
    P: Platform,
    C: SkewController,
{
    pub fn with_controller(
        config: ClockConfig,
        hf: H,
        lp: L,
        platform: P,
        controller: C,
    ) -> ClockResult<Self> {
        config.validate()?;
        let hf = HighFrequencyTimer::new(hf)?;
        let lp = LowPowerTimer::new(lp)?;
        config.check_frequencies(hf.conversion().hz(), lp.conversion().hz())?;
        let vht = Vht::new(config.vht, *hf.conversion(), controller)?;
        let network = FlopsyncStage::new(Flopsync2::new(), config.network_period_ns)?;
        Ok(Self {
            config,
            hf,
            lp,
            platform,
            vht,
            network,
            vclock: VirtualClock::new(),
            interrupt_at: None,
            fired: None,
        })
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn high_frequency(&self) -> &HighFrequencyTimer<H> {
        &self.hf
    }

    pub fn low_power(&self) -> &LowPowerTimer<L> {
        &self.lp
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn vht(&self) -> &Vht<C> {
        &self.vht
    }

    pub fn virtual_clock(&self) -> &VirtualClock<STAGES> {
        &self.vclock
    }

    pub fn is_started(&self) -> bool {
        self.vht.is_running()
    }

    /// Starts resynchronization if it is not running yet.
    pub fn start(&mut self) -> ClockResult<()> {
        if self.vht.is_running() {
            return Ok(());
        }
        let (capture, edge) = self.capture_fresh_edge();
        if let Some(pair) = self.vht.initialize(capture, edge)? {
            self.apply_vht_pair(pair)?;
        }
        self.arm_sync();
        Ok(())
    }

    fn start_lazily(&mut self) {
        if let Err(err) = self.start() {
            log::error!("clock start failed: {}", err);
        }
    }

    /// Corrected monotonic time in nanoseconds.
    pub fn now(&mut self) -> i64 {
        self.start_lazily();
        self.vclock.correct(self.hf.current_time_ns())
    }

    /// Arms the time interrupt for corrected time `at_ns`.
    ///
    /// Returns `false` if that time has already passed; the interrupt then
    /// fires as soon as interrupts are enabled.
    pub fn set_interrupt(&mut self, at_ns: i64) -> bool {
        self.start_lazily();
        self.interrupt_at = Some(at_ns);
        self.hf.schedule_interrupt_ns(self.vclock.uncorrect(at_ns))
    }

    pub fn interrupt_at(&self) -> Option<i64> {
        self.interrupt_at
    }

    /// Moves the clock forward to corrected time `ns`.
    ///
    /// Drops network synchronization, whose master time the new time
    /// overrides.
    pub fn set_time(&mut self, ns: i64) -> ClockResult<()> {
        let current = self.now();
        if ns < current {
            log::warn!("refusing to set time back from {} to {}", current, ns);
            return Err(ClockError::NonMonotonicTime {
                current,
                requested: ns,
            });
        }
        if self.network.is_synchronized() {
            log::info!("network sync dropped by set_time");
            self.network.reset();
            self.vclock.reset_stage(NETWORK_STAGE)?;
        }
        let shift = (ns - self.now()).max(0);
        let ticks = self.hf.conversion().ns_to_tick(shift);
        let before = self.hf.current_tick();
        self.hf.set_tick(before + ticks as u64)?;
        self.vht.shift(ticks);
        self.request_resync()
    }

    /// Resynchronizes on a fresh low-power edge right away.
    pub fn request_resync(&mut self) -> ClockResult<()> {
        if !self.vht.is_running() {
            return self.start();
        }
        let (capture, edge) = self.capture_fresh_edge();
        if let Some(pair) = self.vht.soft_resync(capture, edge)? {
            self.apply_vht_pair(pair)?;
        }
        self.arm_sync();
        Ok(())
    }

    /// Stops applying new resync pairs; resynchronization keeps running.
    pub fn disable_correction(&mut self) {
        self.vht.set_correction_enabled(false);
    }

    /// Applies the newest pair computed while correction was disabled.
    pub fn enable_correction(&mut self) -> ClockResult<()> {
        match self.vht.set_correction_enabled(true) {
            Some(pair) => self.apply_vht_pair(pair),
            None => Ok(()),
        }
    }

    /// Feeds a network sync packet that arrived at corrected time
    /// `arrival_ns` carrying master time `master_ns`.
    pub fn network_sync(&mut self, arrival_ns: i64, master_ns: i64) -> ClockResult<()> {
        let local = self.vclock.suffix(NETWORK_STAGE)?.inverse(arrival_ns);
        let pair = self.network.on_sync(local, master_ns)?;
        self.vclock.update_correction_pair(pair, NETWORK_STAGE)?;
        self.rearm_interrupt();
        Ok(())
    }

    /// High-frequency interrupt entry.
    ///
    /// Returns the corrected time if the time interrupt fired.
    pub fn handle_hf_interrupt(&mut self) -> Option<i64> {
        self.hf.handle_interrupt().fired?;
        self.interrupt_at.take()?;
        let now = self.vclock.correct(self.hf.current_time_ns());
        self.fired = Some(now);
        Some(now)
    }

    /// Time of the last fired interrupt not yet reported to the callback.
    pub fn take_fired(&mut self) -> Option<i64> {
        self.fired.take()
    }

    /// Low-power interrupt entry: periodic resynchronization.
    pub fn handle_lp_interrupt(&mut self) {
        let Some(edge) = self.lp.handle_interrupt().fired else {
            return;
        };
        if self.vht.next_sync_lp() != Some(edge) {
            return;
        }
        match self.hf.take_capture() {
            Some(capture) => self.process_sync(capture),
            None => {
                log::warn!("no capture at resync edge {}", edge);
                if let Err(err) = self.request_resync() {
                    log::error!("resync failed: {}", err);
                }
                return;
            }
        }
        self.arm_sync();
    }

    pub(crate) fn service_interrupts(&mut self) {
        if self.hf.interrupt_pending() {
            self.handle_hf_interrupt();
        }
        if self.lp.interrupt_pending() {
            self.handle_lp_interrupt();
        }
    }

    fn process_sync(&mut self, capture: u64) {
        match self.vht.on_sync_point(capture) {
            Ok(Some(pair)) => {
                if let Err(err) = self.apply_vht_pair(pair) {
                    log::error!("resync pair rejected: {}", err);
                }
            }
            Ok(None) => {}
            Err(ClockError::Divergence { .. }) => {
                log::error!("clock diverged, rebooting");
                self.platform.reboot();
            }
            Err(err) => log::error!("resync failed: {}", err),
        }
    }

    fn apply_vht_pair(&mut self, pair: dualtime_core::AffinePair) -> ClockResult<()> {
        self.vclock.update_correction_pair(pair, VHT_STAGE)?;
        self.rearm_interrupt();
        Ok(())
    }

    fn rearm_interrupt(&mut self) {
        if let Some(at) = self.interrupt_at {
            self.hf.schedule_interrupt_ns(self.vclock.uncorrect(at));
        }
    }

    fn arm_sync(&mut self) {
        if let Some(next) = self.vht.next_sync_lp() {
            if !self.lp.schedule_interrupt(next) {
                log::warn!("resync edge {} already passed", next);
            }
        }
    }

    /// Arms a low-power edge a few ticks ahead and waits for the
    /// high-frequency capture it latches.
    pub(crate) fn capture_fresh_edge(&mut self) -> (u64, u64) {
        let lead = self.config.vht.arm_lead_lp as u64;
        loop {
            let edge = self.lp.current_tick() + lead;
            self.hf.discard_capture();
            if !self.lp.schedule_interrupt(edge) {
                continue;
            }
            match nb::block!(self.poll_capture()) {
                Ok(capture) => return (capture, edge),
                Err(never) => match never {},
            }
        }
    }

    fn poll_capture(&mut self) -> nb::Result<u64, Infallible> {
        match self.hf.take_capture() {
            Some(capture) => Ok(capture),
            None => {
                self.platform.wait_for_interrupt();
                Err(nb::Error::WouldBlock)
            }
        }
    }
}
