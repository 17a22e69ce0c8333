//! # dualtime-sync
//!
//! Time correction on top of the raw high-frequency clock:
//!
//! - [`CorrectionStage`]: the `correct` / `uncorrect` abstraction
//! - [`VirtualClock`]: positioned stages composed into one affine transform
//! - [`Vht`]: cross-domain resynchronization against the low-power clock
//! - [`Flopsync`], [`Flopsync2`]: skew controllers
//! - [`FlopsyncStage`]: a stage driven by network time synchronization

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]

pub mod config;
pub mod flopsync;
mod line;
pub mod stage;
pub mod vclock;
pub mod vht;

pub use config::{
    VhtConfig, DEFAULT_ARM_LEAD_LP, DEFAULT_TOLERANCE_PPM, HF_LP_RATIO, SYNC_PERIOD_LP,
};
pub use flopsync::{
    ControllerHistory, Flopsync, Flopsync2, FlopsyncStage, SkewController, DEFAULT_GAIN,
    MAX_MISSED_SYNCS,
};
pub use stage::{CorrectionStage, Identity};
pub use vclock::VirtualClock;
pub use vht::{ResyncKind, ResyncRecord, Vht, RESYNC_HISTORY};

/// Position of the resynchronizer in the kernel's virtual clock.
pub const VHT_STAGE: usize = 0;

/// Position of the network synchronization stage.
pub const NETWORK_STAGE: usize = 1;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
