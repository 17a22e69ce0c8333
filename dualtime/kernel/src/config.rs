//! Clock configuration.

use dualtime_core::{ClockError, ClockResult, Fixed32};
use dualtime_sync::VhtConfig;

/// Remaining time above which idle sleeps use deep sleep.
pub const DEFAULT_DEEP_SLEEP_THRESHOLD_NS: i64 = 5_000_000;

/// Default interval between network sync packets.
pub const DEFAULT_NETWORK_PERIOD_NS: i64 = 10_000_000_000;

/// Configuration of the kernel clock.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    pub vht: VhtConfig,
    pub deep_sleep_threshold_ns: i64,
    pub network_period_ns: i64,
    /// Called from the high-frequency interrupt with the corrected time at
    /// which the scheduled interrupt fired.
    pub time_interrupt: Option<fn(i64)>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            vht: VhtConfig::reference(),
            deep_sleep_threshold_ns: DEFAULT_DEEP_SLEEP_THRESHOLD_NS,
            network_period_ns: DEFAULT_NETWORK_PERIOD_NS,
            time_interrupt: None,
        }
    }
}

impl ClockConfig {
    /// Creates a new clock configuration builder.
    pub fn builder() -> ClockConfigBuilder {
        ClockConfigBuilder::default()
    }

    pub fn validate(&self) -> ClockResult<()> {
        self.vht.validate()?;
        if self.deep_sleep_threshold_ns < 0 {
            return Err(ClockError::InvalidConfig("deep sleep threshold must not be negative"));
        }
        if self.network_period_ns <= 0 {
            return Err(ClockError::InvalidConfig("network period must be positive"));
        }
        Ok(())
    }

    /// Checks that the configured ratio matches the timers within the
    /// crystal tolerance.
    pub fn check_frequencies(&self, hf_hz: u32, lp_hz: u32) -> ClockResult<()> {
        let nominal = VhtConfig::for_frequencies(hf_hz, lp_hz)?.ratio;
        let diff = (nominal.raw() - self.vht.ratio.raw()).unsigned_abs() as u128;
        if diff * 1_000_000 > nominal.raw() as u128 * self.vht.tolerance_ppm as u128 {
            return Err(ClockError::InvalidConfig(
                "clock ratio does not match the timer frequencies",
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClockConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClockConfigBuilder {
    config: ClockConfig,
    frequencies: Option<(u32, u32)>,
}

impl ClockConfigBuilder {
    /// Derives the clock ratio from the crystal frequencies.
    pub fn frequencies(mut self, hf_hz: u32, lp_hz: u32) -> Self {
        self.frequencies = Some((hf_hz, lp_hz));
        self
    }

    /// Sets the high-frequency ticks per low-power tick explicitly.
    pub fn ratio(mut self, ratio: Fixed32) -> Self {
        self.config.vht.ratio = ratio;
        self.frequencies = None;
        self
    }

    /// Sets the resync period in low-power ticks.
    pub fn sync_period_lp(mut self, ticks: u32) -> Self {
        self.config.vht.sync_period_lp = ticks;
        self
    }

    /// Sets the combined crystal tolerance.
    pub fn tolerance_ppm(mut self, ppm: u32) -> Self {
        self.config.vht.tolerance_ppm = ppm;
        self
    }

    /// Sets the resynchronizer's controller gain.
    pub fn gain(mut self, gain: Fixed32) -> Self {
        self.config.vht.gain = gain;
        self
    }

    /// Sets how many low-power ticks ahead a fresh resync edge is armed.
    pub fn arm_lead_lp(mut self, ticks: u32) -> Self {
        self.config.vht.arm_lead_lp = ticks;
        self
    }

    pub fn deep_sleep_threshold_ns(mut self, ns: i64) -> Self {
        self.config.deep_sleep_threshold_ns = ns;
        self
    }

    pub fn network_period_ns(mut self, ns: i64) -> Self {
        self.config.network_period_ns = ns;
        self
    }

    /// Sets the time interrupt callback.
    pub fn time_interrupt(mut self, callback: fn(i64)) -> Self {
        self.config.time_interrupt = Some(callback);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ClockResult<ClockConfig> {
        let mut config = self.config;
        if let Some((hf_hz, lp_hz)) = self.frequencies {
            config.vht.ratio = VhtConfig::for_frequencies(hf_hz, lp_hz)?.ratio;
        }
        config.validate()?;
        Ok(config)
    }
}
