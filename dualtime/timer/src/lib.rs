//! # dualtime-timer
//!
//! Hardware counters of the dual-clock design, extended to 64 bits.
//!
//! The high-frequency timer provides fine resolution while the core is
//! awake; the low-power timer keeps counting through deep sleep and acts as
//! the long-term reference. Both wrap a narrow hardware counter in a
//! [`CounterAdapter`] that keeps the upper bits in software.
//!
//! With the `sim` feature the crate also provides a simulated board for
//! host testing.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]

pub mod adapter;
pub mod hf;
pub mod hw;
pub mod lp;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use adapter::{CounterAdapter, IrqEvents};
pub use hf::HighFrequencyTimer;
pub use hw::{CaptureCounter, Counter, Platform, WakeCounter};
pub use lp::LowPowerTimer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
