//! Host simulation of the reference board.
//!
//! One simulated clock in nanoseconds drives a capture-capable
//! high-frequency counter and a low-power counter with a wake register.
//! Every compare edge of the low-power counter latches the high-frequency
//! count into the capture register, as the board's event routing does.
//! Register accesses can be given a cost so that read sequences race
//! against the counters the way they do on silicon.

use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hw::{CaptureCounter, Counter, Platform, WakeCounter};

const SCALE: u128 = 1_000_000_000 * 1_000_000_000;

/// Parameters of a simulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub hf_hz: u32,
    pub hf_bits: u32,
    /// Error of the high-frequency oscillator in parts per billion.
    pub hf_skew_ppb: i64,
    pub lp_hz: u32,
    pub lp_bits: u32,
    pub lp_skew_ppb: i64,
    /// Simulated time consumed by every register access.
    pub access_cost_ns: u64,
    /// Time from starting the high-frequency oscillator until it reports
    /// ready.
    pub hf_startup_ns: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hf_hz: 48_000_000,
            hf_bits: 32,
            hf_skew_ppb: 0,
            lp_hz: 32_768,
            lp_bits: 24,
            lp_skew_ppb: 0,
            access_cost_ns: 0,
            hf_startup_ns: 2_000,
        }
    }
}

#[derive(Debug)]
struct SimCounter {
    hz: u32,
    bits: u32,
    skew_ppb: i64,
    running: bool,
    anchor_ns: u64,
    anchor_value: u64,
    value: u64,
    overflow: bool,
    match_reg: u32,
    match_flag: bool,
    forced: bool,
    wake_reg: Option<u32>,
    wake_flag: bool,
    capture: u32,
    capture_flag: bool,
}

impl SimCounter {
    fn new(hz: u32, bits: u32, skew_ppb: i64) -> Self {
        Self {
            hz,
            bits,
            skew_ppb,
            running: true,
            anchor_ns: 0,
            anchor_value: 0,
            value: 0,
            overflow: false,
            match_reg: 0,
            match_flag: false,
            forced: false,
            wake_reg: None,
            wake_flag: false,
            capture: 0,
            capture_flag: false,
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits.min(63)) - 1
    }

    fn low(&self) -> u32 {
        (self.value & self.mask()) as u32
    }

    fn rate(&self) -> u128 {
        self.hz as u128 * (1_000_000_000i64 + self.skew_ppb).max(1) as u128
    }

    fn value_at(&self, t: u64) -> u64 {
        if !self.running {
            return self.value;
        }
        let elapsed = t.saturating_sub(self.anchor_ns) as u128;
        self.anchor_value + (elapsed * self.rate() / SCALE) as u64
    }

    /// First instant at which the counter reaches `target`.
    fn time_of(&self, target: u64) -> Option<u64> {
        if !self.running {
            return None;
        }
        let ticks = target.saturating_sub(self.anchor_value) as u128;
        let ns = (ticks * SCALE).div_ceil(self.rate());
        Some(self.anchor_ns + ns as u64)
    }

    fn next_with_low(&self, low: u32) -> u64 {
        let candidate = (self.value & !self.mask()) | (low as u64 & self.mask());
        if candidate > self.value {
            candidate
        } else {
            candidate + self.mask() + 1
        }
    }

    fn next_event_ns(&self) -> Option<u64> {
        let wrap = self.time_of((self.value | self.mask()) + 1);
        let compare = self.time_of(self.next_with_low(self.match_reg));
        let wake = self
            .wake_reg
            .and_then(|low| self.time_of(self.next_with_low(low)));
        [wrap, compare, wake].into_iter().flatten().min()
    }

    fn jump_to(&mut self, new: u64) {
        if new <= self.value {
            return;
        }
        if new >> self.bits > self.value >> self.bits {
            self.overflow = true;
        }
        if self.next_with_low(self.match_reg) <= new {
            self.match_flag = true;
        }
        if let Some(low) = self.wake_reg {
            if self.next_with_low(low) <= new {
                self.wake_flag = true;
            }
        }
        self.value = new;
    }

    fn step_to(&mut self, t: u64) {
        let new = self.value_at(t);
        self.jump_to(new);
    }

    fn reanchor(&mut self, now: u64) {
        self.anchor_ns = now;
        self.anchor_value = self.value;
    }

    fn write(&mut self, low: u32, now: u64) {
        self.value = (self.value & !self.mask()) | (low as u64 & self.mask());
        self.reanchor(now);
    }

    fn pending(&self) -> bool {
        self.overflow || self.match_flag || self.forced || self.wake_flag
    }
}

#[derive(Debug)]
struct SimWorld {
    now_ns: u64,
    access_cost_ns: u64,
    hf_startup_ns: u64,
    hf_ready_at: u64,
    hf: SimCounter,
    lp: SimCounter,
    reboots: usize,
    deep_sleeps: usize,
}

impl SimWorld {
    fn step_to(&mut self, t: u64) {
        self.hf.step_to(t);
        self.lp.step_to(t);
        self.now_ns = t;
    }

    fn advance_to(&mut self, target: u64) {
        while self.now_ns < target {
            let edge = self.lp.time_of(self.lp.next_with_low(self.lp.match_reg));
            match edge {
                Some(t) if t <= target => {
                    self.step_to(t);
                    if self.hf.running {
                        self.hf.capture = self.hf.low();
                        self.hf.capture_flag = true;
                    }
                }
                _ => self.step_to(target),
            }
        }
    }

    fn access(&mut self) {
        if self.access_cost_ns > 0 {
            let t = self.now_ns + self.access_cost_ns;
            self.advance_to(t);
        }
    }

    fn pending(&self) -> bool {
        self.hf.pending() || self.lp.pending()
    }

    fn wait_for_interrupt(&mut self) {
        if self.pending() {
            let t = self.now_ns + self.access_cost_ns.max(1);
            self.advance_to(t);
            return;
        }
        if let Some(t) = self.next_event_ns() {
            self.advance_to(t);
        }
    }

    fn next_event_ns(&self) -> Option<u64> {
        [self.hf.next_event_ns(), self.lp.next_event_ns()]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Handle to a simulated board. Clones share the same board.
#[derive(Debug, Clone)]
pub struct SimBoard {
    world: Arc<Mutex<SimWorld>>,
}

impl SimBoard {
    pub fn new(config: SimConfig) -> Self {
        let world = SimWorld {
            now_ns: 0,
            access_cost_ns: config.access_cost_ns,
            hf_startup_ns: config.hf_startup_ns,
            hf_ready_at: 0,
            hf: SimCounter::new(config.hf_hz, config.hf_bits, config.hf_skew_ppb),
            lp: SimCounter::new(config.lp_hz, config.lp_bits, config.lp_skew_ppb),
            reboots: 0,
            deep_sleeps: 0,
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    pub fn high_frequency(&self) -> SimHighFrequency {
        SimHighFrequency {
            world: Arc::clone(&self.world),
        }
    }

    pub fn low_power(&self) -> SimLowPower {
        SimLowPower {
            world: Arc::clone(&self.world),
        }
    }

    pub fn platform(&self) -> SimPlatform {
        SimPlatform {
            world: Arc::clone(&self.world),
        }
    }

    /// True simulated time.
    pub fn now_ns(&self) -> u64 {
        self.world.lock().now_ns
    }

    pub fn advance_ns(&self, ns: u64) {
        let mut world = self.world.lock();
        let target = world.now_ns + ns;
        world.advance_to(target);
    }

    pub fn advance_to_ns(&self, t: u64) {
        self.world.lock().advance_to(t);
    }

    /// Runs until the next hardware event, or by one nanosecond if an
    /// interrupt is already pending.
    pub fn advance_to_next_event(&self) {
        self.world.lock().wait_for_interrupt();
    }

    /// Time of the next counter event, if any counter is running.
    pub fn next_event_ns(&self) -> Option<u64> {
        self.world.lock().next_event_ns()
    }

    /// Total high-frequency ticks counted, wraps included.
    pub fn hf_ticks(&self) -> u64 {
        self.world.lock().hf.value
    }

    /// Total low-power ticks counted, wraps included.
    pub fn lp_ticks(&self) -> u64 {
        self.world.lock().lp.value
    }

    pub fn hf_running(&self) -> bool {
        self.world.lock().hf.running
    }

    /// Changes the high-frequency oscillator error from now on.
    pub fn set_hf_skew_ppb(&self, ppb: i64) {
        let mut world = self.world.lock();
        let now = world.now_ns;
        world.hf.step_to(now);
        world.hf.reanchor(now);
        world.hf.skew_ppb = ppb;
    }

    /// Jumps the high-frequency counter forward by `ticks`.
    pub fn glitch_hf(&self, ticks: u64) {
        let mut world = self.world.lock();
        let now = world.now_ns;
        let target = world.hf.value + ticks;
        world.hf.jump_to(target);
        world.hf.reanchor(now);
    }

    pub fn interrupt_pending(&self) -> bool {
        self.world.lock().pending()
    }

    pub fn reboot_count(&self) -> usize {
        self.world.lock().reboots
    }

    pub fn deep_sleep_count(&self) -> usize {
        self.world.lock().deep_sleeps
    }
}

/// The simulated high-frequency counter.
#[derive(Debug, Clone)]
pub struct SimHighFrequency {
    world: Arc<Mutex<SimWorld>>,
}

/// The simulated low-power counter.
#[derive(Debug, Clone)]
pub struct SimLowPower {
    world: Arc<Mutex<SimWorld>>,
}

macro_rules! sim_counter {
    ($ty:ty, $field:ident) => {
        impl Counter for $ty {
            fn bits(&self) -> u32 {
                self.world.lock().$field.bits
            }

            fn frequency(&self) -> u32 {
                self.world.lock().$field.hz
            }

            fn read(&self) -> u32 {
                let mut world = self.world.lock();
                world.access();
                world.$field.low()
            }

            fn write(&mut self, value: u32) {
                let mut world = self.world.lock();
                world.access();
                let now = world.now_ns;
                world.$field.write(value, now);
            }

            fn overflow_pending(&self) -> bool {
                let mut world = self.world.lock();
                world.access();
                world.$field.overflow
            }

            fn clear_overflow(&mut self) {
                let mut world = self.world.lock();
                world.access();
                world.$field.overflow = false;
            }

            fn match_value(&self) -> u32 {
                self.world.lock().$field.match_reg
            }

            fn set_match(&mut self, value: u32) {
                let mut world = self.world.lock();
                world.access();
                let mask = world.$field.mask();
                world.$field.match_reg = (value as u64 & mask) as u32;
            }

            fn match_pending(&self) -> bool {
                let mut world = self.world.lock();
                world.access();
                world.$field.match_flag
            }

            fn clear_match(&mut self) {
                let mut world = self.world.lock();
                world.access();
                world.$field.match_flag = false;
            }

            fn force_interrupt(&mut self) {
                self.world.lock().$field.forced = true;
            }

            fn acknowledge_interrupt(&mut self) {
                self.world.lock().$field.forced = false;
            }

            fn interrupt_pending(&self) -> bool {
                self.world.lock().$field.pending()
            }
        }
    };
}

sim_counter!(SimHighFrequency, hf);
sim_counter!(SimLowPower, lp);

impl CaptureCounter for SimHighFrequency {
    fn capture_pending(&self) -> bool {
        let mut world = self.world.lock();
        world.access();
        world.hf.capture_flag
    }

    fn read_capture(&self) -> u32 {
        let mut world = self.world.lock();
        world.access();
        world.hf.capture
    }

    fn clear_capture(&mut self) {
        self.world.lock().hf.capture_flag = false;
    }
}

impl WakeCounter for SimLowPower {
    fn set_wake(&mut self, value: u32) {
        let mut world = self.world.lock();
        world.access();
        let mask = world.lp.mask();
        world.lp.wake_reg = Some((value as u64 & mask) as u32);
    }

    fn wake_pending(&self) -> bool {
        self.world.lock().lp.wake_flag
    }

    fn clear_wake(&mut self) {
        self.world.lock().lp.wake_flag = false;
    }

    fn disable_wake(&mut self) {
        self.world.lock().lp.wake_reg = None;
    }
}

/// Core services of the simulated board. Reboots are only counted.
#[derive(Debug, Clone)]
pub struct SimPlatform {
    world: Arc<Mutex<SimWorld>>,
}

impl Platform for SimPlatform {
    fn wait_for_interrupt(&mut self) {
        self.world.lock().wait_for_interrupt();
    }

    fn enter_deep_sleep(&mut self) {
        let mut world = self.world.lock();
        world.deep_sleeps += 1;
        world.wait_for_interrupt();
    }

    fn stop_high_frequency(&mut self) {
        let mut world = self.world.lock();
        let now = world.now_ns;
        world.hf.step_to(now);
        world.hf.running = false;
    }

    fn start_high_frequency(&mut self) {
        let mut world = self.world.lock();
        if world.hf.running {
            return;
        }
        let now = world.now_ns;
        world.hf.running = true;
        world.hf.reanchor(now);
        world.hf_ready_at = now + world.hf_startup_ns;
    }

    fn poll_high_frequency_ready(&mut self) -> nb::Result<(), Infallible> {
        let mut world = self.world.lock();
        if world.now_ns >= world.hf_ready_at {
            return Ok(());
        }
        let t = (world.now_ns + 1_000).min(world.hf_ready_at);
        world.advance_to(t);
        Err(nb::Error::WouldBlock)
    }

    fn reboot(&mut self) {
        let mut world = self.world.lock();
        log::warn!("simulated reboot at {} ns", world.now_ns);
        world.reboots += 1;
    }
}
