//! Resynchronizer parameters.

use dualtime_core::{ClockError, ClockResult, Fixed32};

use crate::flopsync::DEFAULT_GAIN;

/// High-frequency ticks per low-power tick on the reference board:
/// 48 MHz over 32768 Hz, `1464 + 3623878656 / 2^32`.
pub const HF_LP_RATIO: Fixed32 = Fixed32::from_parts(1464, 3_623_878_656);

/// Low-power ticks between resynchronizations, about 200 ms.
pub const SYNC_PERIOD_LP: u32 = 6560;

/// Combined crystal tolerance in parts per million.
pub const DEFAULT_TOLERANCE_PPM: u32 = 300;

/// The low-power match is armed this many ticks ahead when a fresh edge is
/// needed.
pub const DEFAULT_ARM_LEAD_LP: u32 = 2;

/// Parameters of the cross-domain resynchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VhtConfig {
    pub sync_period_lp: u32,
    pub ratio: Fixed32,
    pub tolerance_ppm: u32,
    pub gain: Fixed32,
    pub arm_lead_lp: u32,
}

impl VhtConfig {
    /// The reference board: 48 MHz and 32768 Hz crystals.
    pub const fn reference() -> Self {
        Self {
            sync_period_lp: SYNC_PERIOD_LP,
            ratio: HF_LP_RATIO,
            tolerance_ppm: DEFAULT_TOLERANCE_PPM,
            gain: DEFAULT_GAIN,
            arm_lead_lp: DEFAULT_ARM_LEAD_LP,
        }
    }

    /// A configuration for arbitrary crystal frequencies.
    pub fn for_frequencies(hf_hz: u32, lp_hz: u32) -> ClockResult<Self> {
        if hf_hz == 0 || lp_hz == 0 {
            return Err(ClockError::InvalidConfig("frequencies must be non-zero"));
        }
        let ratio = Fixed32::from_ratio(hf_hz as i64, lp_hz as i64).ok_or(ClockError::Overflow)?;
        Ok(Self {
            ratio,
            ..Self::reference()
        })
    }

    pub fn validate(&self) -> ClockResult<()> {
        if self.sync_period_lp == 0 {
            return Err(ClockError::InvalidConfig("sync period must be non-zero"));
        }
        if !self.ratio.is_positive() {
            return Err(ClockError::InvalidConfig("clock ratio must be positive"));
        }
        if self.tolerance_ppm == 0 || self.tolerance_ppm >= 1_000_000 {
            return Err(ClockError::InvalidConfig("tolerance out of range"));
        }
        if self.arm_lead_lp == 0 || self.arm_lead_lp >= self.sync_period_lp {
            return Err(ClockError::InvalidConfig("arm lead must be within the sync period"));
        }
        if self.gain.is_negative() {
            return Err(ClockError::InvalidConfig("controller gain must not be negative"));
        }
        self.ratio
            .checked_mul_int(self.sync_period_lp as i64)
            .filter(|period| *period > 0 && *period <= i32::MAX as i64)
            .map(|_| ())
            .ok_or(ClockError::InvalidConfig("sync period too long"))
    }

    /// Sync period in high-frequency ticks.
    pub fn sync_period_hf(&self) -> i64 {
        self.ratio.mul_int(self.sync_period_lp as i64)
    }

    /// Largest error a sample can show while both crystals are within
    /// tolerance.
    pub fn max_theoretical_error(&self) -> i64 {
        let product = self.sync_period_hf() * self.tolerance_ppm as i64;
        (product + 999_999) / 1_000_000
    }
}

impl Default for VhtConfig {
    fn default() -> Self {
        Self::reference()
    }
}
