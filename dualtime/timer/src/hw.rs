//! Register-level view of the hardware the clock is built on.
//!
//! Implementations wrap memory-mapped peripherals on the target and the
//! simulated board on the host. Every method is called with interrupts
//! disabled, so implementations need no locking of their own.

/// A narrow free-running up-counter with a compare register.
pub trait Counter {
    /// Width of the counter register, between 1 and 32 bits.
    fn bits(&self) -> u32;

    /// Nominal counting frequency in hertz.
    fn frequency(&self) -> u32;

    /// Current value of the counter register.
    fn read(&self) -> u32;

    /// Loads a new value into the counter register.
    fn write(&mut self, value: u32);

    /// Whether the counter wrapped since the flag was last cleared.
    fn overflow_pending(&self) -> bool;

    fn clear_overflow(&mut self);

    /// Value of the compare register.
    fn match_value(&self) -> u32;

    fn set_match(&mut self, value: u32);

    /// Whether the counter reached the compare register since the flag was
    /// last cleared.
    fn match_pending(&self) -> bool;

    fn clear_match(&mut self);

    /// Sets the counter's interrupt pending without a hardware event.
    fn force_interrupt(&mut self);

    /// Drops a forced pending request; called on interrupt entry.
    fn acknowledge_interrupt(&mut self);

    /// Whether any interrupt source of this counter is pending.
    fn interrupt_pending(&self) -> bool;
}

/// A counter that latches its value when the low-power clock ticks.
///
/// On the reference board the low-power compare event is routed to an input
/// capture channel of the high-frequency timer, so the capture register holds
/// the high-frequency count at the exact low-power edge.
pub trait CaptureCounter: Counter {
    fn capture_pending(&self) -> bool;

    /// Lower bits of the high-frequency count at the last low-power edge.
    fn read_capture(&self) -> u32;

    fn clear_capture(&mut self);
}

/// A counter with an additional compare register able to wake the core from
/// deep sleep.
pub trait WakeCounter: Counter {
    fn set_wake(&mut self, value: u32);

    fn wake_pending(&self) -> bool;

    fn clear_wake(&mut self);

    fn disable_wake(&mut self);
}

/// Core-level services outside the two counters.
pub trait Platform {
    /// Halts the core until an interrupt is pending. Returns immediately if
    /// one already is.
    fn wait_for_interrupt(&mut self);

    /// Enters the deep-sleep mode in which only the low-power clock runs.
    fn enter_deep_sleep(&mut self) {
        self.wait_for_interrupt();
    }

    /// Powers the high-frequency oscillator down.
    fn stop_high_frequency(&mut self);

    /// Starts the high-frequency oscillator without waiting for it.
    fn start_high_frequency(&mut self);

    /// Polls whether the high-frequency oscillator has stabilized.
    fn poll_high_frequency_ready(&mut self) -> nb::Result<(), core::convert::Infallible>;

    /// Resets the system. Target implementations never return.
    fn reboot(&mut self);
}
