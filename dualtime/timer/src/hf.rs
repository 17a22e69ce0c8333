//! The high-frequency timer: fine resolution, stops in deep sleep.

use dualtime_core::{ClockResult, Rounding, TimeConversion};

use crate::adapter::{CounterAdapter, IrqEvents};
use crate::hw::CaptureCounter;

pub(crate) fn clamp_tick(tick: i64) -> u64 {
    tick.max(0) as u64
}

/// Extended high-frequency counter with nanosecond conversion.
#[derive(Debug)]
pub struct HighFrequencyTimer<H> {
    counter: CounterAdapter<H>,
    conversion: TimeConversion,
}

impl<H: CaptureCounter> HighFrequencyTimer<H> {
    pub fn new(hw: H) -> ClockResult<Self> {
        let conversion = TimeConversion::new(hw.frequency())?;
        let counter = CounterAdapter::new(hw)?;
        log::debug!(
            "high-frequency timer: {} Hz, {} ns/tick",
            conversion.hz(),
            conversion.ns_per_tick()
        );
        Ok(Self {
            counter,
            conversion,
        })
    }

    pub fn conversion(&self) -> &TimeConversion {
        &self.conversion
    }

    pub fn counter(&self) -> &CounterAdapter<H> {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut CounterAdapter<H> {
        &mut self.counter
    }

    pub fn current_tick(&self) -> u64 {
        self.counter.current_tick()
    }

    /// Uncorrected time in nanoseconds.
    pub fn current_time_ns(&self) -> i64 {
        self.conversion.tick_to_ns(self.current_tick() as i64)
    }

    pub fn tick_to_ns(&self, tick: u64) -> i64 {
        self.conversion.tick_to_ns(tick as i64)
    }

    /// Moves the counter forward to `tick`.
    pub fn set_tick(&mut self, tick: u64) -> ClockResult<()> {
        self.counter.set_tick(tick)
    }

    /// Moves the counter forward to uncorrected time `ns`.
    pub fn set_time_ns(&mut self, ns: i64) -> ClockResult<()> {
        self.counter.set_tick(clamp_tick(self.conversion.ns_to_tick(ns)))
    }

    /// Arms the interrupt for the first tick not before uncorrected `ns`.
    pub fn schedule_interrupt_ns(&mut self, ns: i64) -> bool {
        let tick = self.conversion.ns_to_tick_rounded(ns, Rounding::Ceil);
        self.counter.schedule(clamp_tick(tick))
    }

    pub fn schedule_interrupt(&mut self, tick: u64) -> bool {
        self.counter.schedule(tick)
    }

    pub fn interrupt_pending(&self) -> bool {
        self.counter.interrupt_pending()
    }

    pub fn handle_interrupt(&mut self) -> IrqEvents {
        self.counter.handle_interrupt()
    }

    /// The extended count latched at the last low-power edge, consuming it.
    pub fn take_capture(&mut self) -> Option<u64> {
        let hw = self.counter.hardware_mut();
        if !hw.capture_pending() {
            return None;
        }
        let lower = hw.read_capture();
        hw.clear_capture();
        Some(self.counter.extend(lower))
    }

    /// Drops a stale capture.
    pub fn discard_capture(&mut self) {
        self.counter.hardware_mut().clear_capture();
    }
}
