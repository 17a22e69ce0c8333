//! Conversion between hardware ticks and nanoseconds.

use crate::affine::{AffinePair, AffineTransform};
use crate::error::{ClockError, ClockResult};
use crate::fixed::{Fixed32, Rounding};

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Tick/nanosecond conversion for a counter running at a fixed frequency.
///
/// Both directions share one quantized factor, so converting ticks to
/// nanoseconds and back always lands on the original tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeConversion {
    hz: u32,
    ns_per_tick: AffineTransform,
}

impl TimeConversion {
    /// Creates a conversion for a counter clocked at `hz`.
    ///
    /// Frequencies above 1 GHz are rejected: a tick must span at least one
    /// nanosecond for the rounding guarantees to hold.
    pub fn new(hz: u32) -> ClockResult<Self> {
        if hz == 0 || hz as i64 > NSEC_PER_SEC {
            return Err(ClockError::InvalidConfig("counter frequency out of range"));
        }
        let factor = Fixed32::from_ratio(NSEC_PER_SEC, hz as i64).ok_or(ClockError::Overflow)?;
        let ns_per_tick = AffineTransform::new(AffinePair::new(factor, 0)?)?;
        Ok(Self { hz, ns_per_tick })
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// Length of one tick in nanoseconds.
    pub fn ns_per_tick(&self) -> Fixed32 {
        self.ns_per_tick.pair().a
    }

    /// Converts ticks to nanoseconds, rounding to nearest.
    pub fn tick_to_ns(&self, tick: i64) -> i64 {
        self.ns_per_tick.forward(tick)
    }

    /// Converts nanoseconds to the nearest tick.
    pub fn ns_to_tick(&self, ns: i64) -> i64 {
        self.ns_per_tick.inverse(ns)
    }

    /// Converts nanoseconds to ticks with explicit rounding.
    ///
    /// `Ceil` returns the first tick whose time is not before `ns`; `Floor`
    /// the last tick whose time is not after it.
    pub fn ns_to_tick_rounded(&self, ns: i64, rounding: Rounding) -> i64 {
        let nearest = self.ns_to_tick(ns);
        match rounding {
            Rounding::Nearest => nearest,
            Rounding::Ceil => {
                if self.tick_to_ns(nearest) < ns {
                    nearest + 1
                } else if self.tick_to_ns(nearest - 1) >= ns {
                    nearest - 1
                } else {
                    nearest
                }
            }
            Rounding::Floor => {
                if self.tick_to_ns(nearest) > ns {
                    nearest - 1
                } else if self.tick_to_ns(nearest + 1) <= ns {
                    nearest + 1
                } else {
                    nearest
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_frequencies() {
        assert!(TimeConversion::new(0).is_err());
        assert!(TimeConversion::new(2_000_000_000).is_err());
        assert!(TimeConversion::new(1_000_000_000).is_ok());
    }

    #[test]
    fn low_power_tick_is_exact() {
        let tc = TimeConversion::new(32_768).unwrap();
        assert_eq!(tc.ns_per_tick(), Fixed32::from_ratio(1_953_125, 64).unwrap());
        assert_eq!(tc.tick_to_ns(32_768), NSEC_PER_SEC);
        assert_eq!(tc.ns_to_tick(NSEC_PER_SEC), 32_768);
        assert_eq!(tc.tick_to_ns(1), 30_518);
    }

    #[test]
    fn high_frequency_roundtrip_over_long_uptime() {
        let tc = TimeConversion::new(48_000_000).unwrap();
        let week_ticks = 48_000_000i64 * 86_400 * 7;
        for tick in [0, 1, 47, 48_000_000, week_ticks, week_ticks + 13] {
            assert_eq!(tc.ns_to_tick(tc.tick_to_ns(tick)), tick, "tick {tick}");
        }
    }

    #[test]
    fn directed_rounding_brackets_the_time() {
        let tc = TimeConversion::new(32_768).unwrap();
        let ns = 1_000_000;
        let up = tc.ns_to_tick_rounded(ns, Rounding::Ceil);
        let down = tc.ns_to_tick_rounded(ns, Rounding::Floor);
        assert_eq!(up, down + 1);
        assert!(tc.tick_to_ns(up) >= ns);
        assert!(tc.tick_to_ns(up - 1) < ns);
        assert!(tc.tick_to_ns(down) <= ns);

        let exact = tc.tick_to_ns(100);
        assert_eq!(tc.ns_to_tick_rounded(exact, Rounding::Ceil), 100);
        assert_eq!(tc.ns_to_tick_rounded(exact, Rounding::Floor), 100);
    }
}
