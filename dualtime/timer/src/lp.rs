//! The low-power timer: coarse, keeps counting in deep sleep.

use dualtime_core::{ClockResult, Rounding, TimeConversion};

use crate::adapter::{CounterAdapter, IrqEvents};
use crate::hf::clamp_tick;
use crate::hw::WakeCounter;

/// Extended low-power counter with nanosecond conversion and a wake-up
/// compare register.
#[derive(Debug)]
pub struct LowPowerTimer<L> {
    counter: CounterAdapter<L>,
    conversion: TimeConversion,
    wake: Option<u64>,
}

impl<L: WakeCounter> LowPowerTimer<L> {
    pub fn new(hw: L) -> ClockResult<Self> {
        let conversion = TimeConversion::new(hw.frequency())?;
        let counter = CounterAdapter::new(hw)?;
        log::debug!("low-power timer: {} Hz", conversion.hz());
        Ok(Self {
            counter,
            conversion,
            wake: None,
        })
    }

    pub fn conversion(&self) -> &TimeConversion {
        &self.conversion
    }

    pub fn counter(&self) -> &CounterAdapter<L> {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut CounterAdapter<L> {
        &mut self.counter
    }

    pub fn current_tick(&self) -> u64 {
        self.counter.current_tick()
    }

    pub fn current_time_ns(&self) -> i64 {
        self.conversion.tick_to_ns(self.current_tick() as i64)
    }

    pub fn tick_to_ns(&self, tick: u64) -> i64 {
        self.conversion.tick_to_ns(tick as i64)
    }

    /// First tick whose time is not before `ns`.
    pub fn ns_to_tick_ceil(&self, ns: i64) -> u64 {
        clamp_tick(self.conversion.ns_to_tick_rounded(ns, Rounding::Ceil))
    }

    pub fn set_tick(&mut self, tick: u64) -> ClockResult<()> {
        self.counter.set_tick(tick)
    }

    /// Arms the compare interrupt, whose edge also latches the
    /// high-frequency capture.
    pub fn schedule_interrupt(&mut self, tick: u64) -> bool {
        self.counter.schedule(tick)
    }

    pub fn interrupt_pending(&self) -> bool {
        self.counter.interrupt_pending() || self.counter.hardware().wake_pending()
    }

    pub fn handle_interrupt(&mut self) -> IrqEvents {
        self.counter.handle_interrupt()
    }

    /// Arms the deep-sleep wake-up for `tick`.
    ///
    /// Returns `false` if the tick has already been reached. The hardware
    /// compares the lower bits only, so the wake event can fire on earlier
    /// wraps; check [`wake_reached`](Self::wake_reached) after every wake.
    pub fn set_wake(&mut self, tick: u64) -> bool {
        let mask = self.counter.increment() - 1;
        let hw = self.counter.hardware_mut();
        hw.clear_wake();
        hw.set_wake((tick & mask) as u32);
        self.wake = Some(tick);
        self.current_tick() < tick
    }

    pub fn wake_tick(&self) -> Option<u64> {
        self.wake
    }

    pub fn wake_reached(&self) -> bool {
        self.wake.map_or(true, |tick| self.current_tick() >= tick)
    }

    /// Clears a wake event flag, leaving the wake-up armed.
    pub fn acknowledge_wake(&mut self) {
        self.counter.hardware_mut().clear_wake();
    }

    pub fn clear_wake(&mut self) {
        let hw = self.counter.hardware_mut();
        hw.clear_wake();
        hw.disable_wake();
        self.wake = None;
    }
}
