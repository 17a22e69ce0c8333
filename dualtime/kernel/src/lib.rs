//! # dualtime-kernel
//!
//! The timekeeping core of the kernel: one corrected, monotonic nanosecond
//! clock built from a high-frequency timer that stops in deep sleep and a
//! low-power timer that does not.
//!
//! ## Example
//!
//! ```ignore
//! use dualtime_kernel::{Clock, ClockConfig, GlobalClock};
//!
//! static CLOCK: GlobalClock<Tim2, Rtc, CortexMPlatform<Hse>> = GlobalClock::new();
//!
//! let config = ClockConfig::builder()
//!     .frequencies(48_000_000, 32_768)
//!     .time_interrupt(scheduler::on_timer)
//!     .build()?;
//! CLOCK.install(Clock::new(config, tim2, rtc, platform)?)?;
//! let now = CLOCK.now()?;
//! ```

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod global;
pub mod platform;
mod sleep;

pub use clock::{Clock, STAGES};
pub use config::{ClockConfig, ClockConfigBuilder};
pub use global::GlobalClock;
pub use platform::Platform;

pub use dualtime_core::{ClockError, ClockResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
