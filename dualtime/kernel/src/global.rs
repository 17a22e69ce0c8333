//! The process-wide clock instance.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use dualtime_core::{ClockError, ClockResult};
use dualtime_sync::{Flopsync, SkewController};
use dualtime_timer::{CaptureCounter, Platform, WakeCounter};

use crate::clock::Clock;

/// A [`Clock`] shared between thread code and interrupt handlers.
///
/// Meant to live in a `static`. Every access runs inside a critical
/// section; the time interrupt callback is invoked after it is left, so the
/// callback may use the clock again.
pub struct GlobalClock<H, L, P, C = Flopsync> {
    clock: Mutex<RefCell<Option<Clock<H, L, P, C>>>>,
}

impl<H, L, P, C> GlobalClock<H, L, P, C> {
    pub const fn new() -> Self {
        Self {
            clock: Mutex::new(RefCell::new(None)),
        }
    }
}

impl<H, L, P, C> Default for GlobalClock<H, L, P, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, L, P, C> GlobalClock<H, L, P, C>
where
    H: CaptureCounter,
    L: WakeCounter,
    P: Platform,
    C: SkewController,
{
    /// Installs the clock. Fails if one is installed already.
    pub fn install(&self, clock: Clock<H, L, P, C>) -> ClockResult<()> {
        critical_section::with(|cs| {
            let mut slot = self.clock.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(ClockError::InvalidConfig("clock already installed"));
            }
            *slot = Some(clock);
            Ok(())
        })
    }

    /// Removes the installed clock.
    pub fn uninstall(&self) -> Option<Clock<H, L, P, C>> {
        critical_section::with(|cs| self.clock.borrow_ref_mut(cs).take())
    }

    pub fn is_installed(&self) -> bool {
        critical_section::with(|cs| self.clock.borrow_ref(cs).is_some())
    }

    /// Runs `f` on the clock inside a critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut Clock<H, L, P, C>) -> R) -> ClockResult<R> {
        let (result, fired) = critical_section::with(|cs| self.locked(cs, f))?;
        Self::notify(fired);
        Ok(result)
    }

    /// Runs `f` on the clock in a critical section the caller already holds.
    ///
    /// The time interrupt callback is not invoked from here; fired interrupts
    /// are reported by the next call to [`with`](Self::with).
    pub fn with_in<R>(
        &self,
        cs: CriticalSection<'_>,
        f: impl FnOnce(&mut Clock<H, L, P, C>) -> R,
    ) -> ClockResult<R> {
        let mut slot = self.clock.borrow_ref_mut(cs);
        let clock = slot.as_mut().ok_or(ClockError::NotInitialized)?;
        Ok(f(clock))
    }

    fn locked<R>(
        &self,
        cs: CriticalSection<'_>,
        f: impl FnOnce(&mut Clock<H, L, P, C>) -> R,
    ) -> ClockResult<(R, Option<(fn(i64), i64)>)> {
        self.with_in(cs, |clock| {
            let result = f(clock);
            let fired = clock
                .config()
                .time_interrupt
                .zip(clock.take_fired());
            (result, fired)
        })
    }

    fn notify(fired: Option<(fn(i64), i64)>) {
        if let Some((callback, at)) = fired {
            callback(at);
        }
    }

    /// Corrected time.
    pub fn now(&self) -> ClockResult<i64> {
        self.with(|clock| clock.now())
    }

    /// Corrected time, from code already inside a critical section such as
    /// an interrupt handler.
    pub fn now_in(&self, cs: CriticalSection<'_>) -> ClockResult<i64> {
        self.with_in(cs, |clock| clock.now())
    }

    /// Arms the time interrupt; callable from interrupt context.
    pub fn set_interrupt(&self, at_ns: i64) -> ClockResult<bool> {
        self.with(|clock| clock.set_interrupt(at_ns))
    }

    pub fn set_time(&self, ns: i64) -> ClockResult<()> {
        self.with(|clock| clock.set_time(ns))?
    }

    pub fn deep_sleep_until(&self, ns: i64) -> ClockResult<()> {
        self.with(|clock| clock.deep_sleep_until(ns))?
    }

    pub fn deep_sleep_until_tick(&self, tick: u64) -> ClockResult<()> {
        self.with(|clock| clock.deep_sleep_until_tick(tick))?
    }

    pub fn sleep_until(&self, ns: i64) -> ClockResult<()> {
        self.with(|clock| clock.sleep_until(ns))?
    }

    pub fn request_resync(&self) -> ClockResult<()> {
        self.with(|clock| clock.request_resync())?
    }

    pub fn disable_correction(&self) -> ClockResult<()> {
        self.with(|clock| clock.disable_correction())
    }

    pub fn enable_correction(&self) -> ClockResult<()> {
        self.with(|clock| clock.enable_correction())?
    }

    pub fn network_sync(&self, arrival_ns: i64, master_ns: i64) -> ClockResult<()> {
        self.with(|clock| clock.network_sync(arrival_ns, master_ns))?
    }

    /// Entry point for the high-frequency timer interrupt.
    pub fn on_hf_interrupt(&self) {
        if self.with(|clock| clock.handle_hf_interrupt()).is_err() {
            log::warn!("high-frequency interrupt without an installed clock");
        }
    }

    /// Entry point for the low-power timer interrupt.
    pub fn on_lp_interrupt(&self) {
        if self.with(|clock| clock.handle_lp_interrupt()).is_err() {
            log::warn!("low-power interrupt without an installed clock");
        }
    }
}
