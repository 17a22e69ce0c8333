//! Deep sleep and the idle policy.
//!
//! In deep sleep the high-frequency oscillator is off and only the
//! low-power timer runs. On wake the high-frequency time is rebuilt from the
//! low-power count through the resynchronizer's line, then re-anchored on a
//! fresh edge.

use dualtime_core::{AffineTransform, ClockResult, Rounding};
use dualtime_sync::{SkewController, NETWORK_STAGE, VHT_STAGE};
use dualtime_timer::{CaptureCounter, Platform, WakeCounter};

use crate::clock::Clock;

impl<H, L, P, C> Clock<H, L, P, C>
where
    H: CaptureCounter,
    L: WakeCounter,
    P: Platform,
    C: SkewController,
{
    /// Sleeps until corrected time `ns` with only the low-power clock
    /// running.
    pub fn deep_sleep_until(&mut self, ns: i64) -> ClockResult<()> {
        self.start()?;
        let uncorrected = self.vclock.suffix(NETWORK_STAGE)?.inverse(ns);
        let tick = self.vht.corrected_ns_to_lp(uncorrected, Rounding::Ceil)?;
        self.deep_sleep_until_tick(tick)
    }

    /// Sleeps until the low-power counter reaches `tick`.
    pub fn deep_sleep_until_tick(&mut self, tick: u64) -> ClockResult<()> {
        self.start()?;
        self.drain_interrupts();
        if !self.lp.set_wake(tick) {
            self.lp.clear_wake();
            return Ok(());
        }

        self.platform.stop_high_frequency();
        loop {
            self.platform.enter_deep_sleep();
            // Resync edges passing now have no capture; they are re-armed
            // after wake.
            self.lp.handle_interrupt();
            self.lp.acknowledge_wake();
            if self.lp.wake_reached() {
                break;
            }
        }
        self.lp.clear_wake();

        self.platform.start_high_frequency();
        let lp_now = self.lp.current_tick();
        let resynced = self.vht.lp_to_corrected_ns(lp_now)?;
        let stage = AffineTransform::new(self.vclock.pair(VHT_STAGE).unwrap_or_default())?;
        let raw = stage.inverse(resynced);
        match nb::block!(self.platform.poll_high_frequency_ready()) {
            Ok(()) => {}
            Err(never) => match never {},
        }
        if let Err(err) = self.hf.set_time_ns(raw) {
            log::warn!("high-frequency time not restored after sleep: {}", err);
        }
        log::info!("woke from deep sleep at lp tick {}", lp_now);
        self.request_resync()
    }

    /// Idles until corrected time `ns`.
    ///
    /// Uses deep sleep when the wait exceeds the configured threshold and
    /// otherwise arms the time interrupt for `ns`, replacing any armed one,
    /// and waits for it with the high-frequency clock running.
    pub fn sleep_until(&mut self, ns: i64) -> ClockResult<()> {
        let now = self.now();
        if ns <= now {
            return Ok(());
        }
        if ns - now > self.config.deep_sleep_threshold_ns {
            return self.deep_sleep_until(ns);
        }
        self.set_interrupt(ns);
        while self.interrupt_at().is_some() {
            self.platform.wait_for_interrupt();
            self.service_interrupts();
        }
        Ok(())
    }

    /// Services every pending timer interrupt.
    pub(crate) fn drain_interrupts(&mut self) {
        while self.hf.interrupt_pending() || self.lp.interrupt_pending() {
            self.service_interrupts();
        }
    }
}
