//! Extension of a narrow hardware counter to 64 bits.
//!
//! The hardware counter supplies the lower bits and software keeps the upper
//! bits, advanced from the overflow interrupt. Reads between the wrap and
//! the overflow handler are fixed up with the pending flag: if the flag is
//! set and a second read shows the counter has not wrapped again, the value
//! belongs to the next epoch.

use dualtime_core::{ClockError, ClockResult};

use crate::hw::Counter;

/// What an interrupt of the extended counter did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqEvents {
    /// The scheduled tick, if the scheduled interrupt fired.
    pub fired: Option<u64>,
    /// Whether the hardware counter wrapped.
    pub overflow: bool,
}

/// A hardware counter extended to a monotonic 64-bit tick count.
///
/// All methods expect interrupts to be disabled by the caller.
#[derive(Debug)]
pub struct CounterAdapter<H> {
    hw: H,
    upper: u64,
    increment: u64,
    lower_mask: u64,
    irq_upper: u64,
    armed: bool,
    late: bool,
}

impl<H: Counter> CounterAdapter<H> {
    pub fn new(hw: H) -> ClockResult<Self> {
        let bits = hw.bits();
        if bits == 0 || bits > 32 {
            return Err(ClockError::InvalidConfig("counter width must be 1 to 32 bits"));
        }
        let increment = 1u64 << bits;
        Ok(Self {
            hw,
            upper: 0,
            increment,
            lower_mask: increment - 1,
            irq_upper: 0,
            armed: false,
            late: false,
        })
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn frequency(&self) -> u32 {
        self.hw.frequency()
    }

    /// Ticks per wrap of the hardware counter.
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// The current extended tick count.
    ///
    /// Tolerates at most one wrap that the overflow handler has not yet
    /// serviced.
    pub fn current_tick(&self) -> u64 {
        let counter = self.hw.read();
        if self.hw.overflow_pending() && self.hw.read() >= counter {
            (self.upper | counter as u64) + self.increment
        } else {
            self.upper | counter as u64
        }
    }

    /// Extends a lower-bits value latched less than one wrap ago.
    pub fn extend(&self, lower: u32) -> u64 {
        let now = self.current_tick();
        let candidate = (now & !self.lower_mask) | (lower as u64 & self.lower_mask);
        if candidate > now {
            candidate.saturating_sub(self.increment)
        } else {
            candidate
        }
    }

    /// Moves the counter forward to `tick`.
    ///
    /// An interrupt scheduled at or before the new tick becomes pending
    /// immediately.
    pub fn set_tick(&mut self, tick: u64) -> ClockResult<()> {
        let current = self.current_tick();
        if tick < current {
            log::warn!("refusing to move counter back from {} to {}", current, tick);
            return Err(ClockError::NonMonotonicTime {
                current: current as i64,
                requested: tick as i64,
            });
        }
        // A wrap pending from before the write belongs to the discarded time.
        self.hw.clear_overflow();
        self.upper = tick & !self.lower_mask;
        self.hw.write((tick & self.lower_mask) as u32);
        if self.armed && !self.late && self.scheduled_tick() <= tick {
            self.hw.force_interrupt();
            self.late = true;
        }
        Ok(())
    }

    /// Arms the interrupt for `tick`.
    ///
    /// Returns `false` if the tick has already passed; the interrupt is then
    /// made pending right away and fires as soon as interrupts are enabled.
    pub fn schedule(&mut self, tick: u64) -> bool {
        self.hw.clear_match();
        self.irq_upper = tick & !self.lower_mask;
        self.hw.set_match((tick & self.lower_mask) as u32);
        self.armed = true;
        if self.current_tick() >= tick {
            self.hw.force_interrupt();
            self.late = true;
            false
        } else {
            self.late = false;
            true
        }
    }

    /// The armed interrupt tick, if any.
    pub fn scheduled(&self) -> Option<u64> {
        self.armed.then(|| self.scheduled_tick())
    }

    fn scheduled_tick(&self) -> u64 {
        self.irq_upper | self.hw.match_value() as u64
    }

    /// Whether the counter has an interrupt waiting to be serviced.
    pub fn interrupt_pending(&self) -> bool {
        self.late || self.hw.interrupt_pending()
    }

    /// Services the counter interrupt.
    ///
    /// A match only counts when the full 64-bit tick has been reached, since
    /// the hardware compares the lower bits alone and matches once per wrap.
    pub fn handle_interrupt(&mut self) -> IrqEvents {
        self.hw.acknowledge_interrupt();
        let mut events = IrqEvents::default();

        if self.hw.match_pending() || self.late {
            self.hw.clear_match();
            let target = self.scheduled_tick();
            if self.armed && (self.late || self.current_tick() >= target) {
                self.armed = false;
                self.late = false;
                events.fired = Some(target);
            }
        }

        if self.hw.overflow_pending() {
            self.hw.clear_overflow();
            self.upper += self.increment;
            events.overflow = true;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBoard, SimConfig};

    fn narrow_board(access_cost_ns: u64) -> SimBoard {
        SimBoard::new(SimConfig {
            hf_bits: 16,
            access_cost_ns,
            ..SimConfig::default()
        })
    }

    #[test]
    fn test_rejects_invalid_width() {
        let board = SimBoard::new(SimConfig {
            hf_bits: 33,
            ..SimConfig::default()
        });
        assert!(CounterAdapter::new(board.high_frequency()).is_err());
    }

    #[test]
    fn test_pending_overflow_is_counted_before_the_handler_runs() {
        let board = narrow_board(0);
        let adapter = CounterAdapter::new(board.high_frequency()).unwrap();

        // 70000 ticks at 48 MHz: one wrap of a 16-bit counter, not serviced.
        board.advance_ns(1_458_334);
        assert!(adapter.hardware().overflow_pending());
        assert_eq!(adapter.current_tick(), board.hf_ticks());
    }

    #[test]
    fn test_monotonic_across_many_wraps_with_racing_reads() {
        let board = narrow_board(7);
        let mut adapter = CounterAdapter::new(board.high_frequency()).unwrap();

        let mut last = adapter.current_tick();
        for step in 0..200_000u64 {
            board.advance_ns(97 + step % 13);
            if step % 50 == 0 && adapter.interrupt_pending() {
                adapter.handle_interrupt();
            }
            let now = adapter.current_tick();
            assert!(now >= last, "went back from {last} to {now} at step {step}");
            last = now;
        }
        assert!(last > 10 * adapter.increment());
    }

    #[test]
    fn test_scheduled_interrupt_fires_only_at_full_tick() {
        let board = narrow_board(0);
        let mut adapter = CounterAdapter::new(board.high_frequency()).unwrap();

        let target = 3 * adapter.increment() + 1_000;
        assert!(adapter.schedule(target));

        let mut fired = None;
        while fired.is_none() {
            board.advance_to_next_event();
            let events = adapter.handle_interrupt();
            fired = events.fired;
        }
        assert_eq!(fired, Some(target));
        assert_eq!(adapter.current_tick(), target);
        assert_eq!(adapter.scheduled(), None);
    }

    #[test]
    fn test_past_schedule_is_made_pending() {
        let board = narrow_board(0);
        let mut adapter = CounterAdapter::new(board.high_frequency()).unwrap();
        board.advance_ns(1_000_000);

        let now = adapter.current_tick();
        assert!(!adapter.schedule(now - 10));
        assert!(adapter.interrupt_pending());
        assert_eq!(adapter.handle_interrupt().fired, Some(now - 10));
    }

    #[test]
    fn test_set_tick_is_forward_only_and_rearms() {
        let board = narrow_board(0);
        let mut adapter = CounterAdapter::new(board.high_frequency()).unwrap();
        board.advance_ns(10_000);

        let now = adapter.current_tick();
        assert_eq!(
            adapter.set_tick(now - 1),
            Err(ClockError::NonMonotonicTime {
                current: now as i64,
                requested: now as i64 - 1
            })
        );

        assert!(adapter.schedule(now + 5_000_000));
        adapter.set_tick(now + 6_000_000).unwrap();
        assert!(adapter.current_tick() >= now + 6_000_000);
        assert!(adapter.interrupt_pending());
        assert_eq!(adapter.handle_interrupt().fired, Some(now + 5_000_000));
    }

    #[test]
    fn test_extend_recovers_recent_values() {
        let board = narrow_board(0);
        let mut adapter = CounterAdapter::new(board.high_frequency()).unwrap();
        for _ in 0..5 {
            board.advance_ns(1_000_000);
            adapter.handle_interrupt();
        }

        let now = adapter.current_tick();
        let past = now - 40_000;
        assert_eq!(adapter.extend((past & 0xffff) as u32), past);
        assert_eq!(adapter.extend((now & 0xffff) as u32), now);
    }
}
