#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

//! # dualtime core
//!
//! Arithmetic shared by the dualtime clock pipeline:
//!
//! - [`fixed`] – Q31.32 fixed-point numbers with 64×32-bit multiply and
//!   long-division helpers, usable at interrupt priority.
//! - [`affine`] – `a * x + b` correction pairs, their composition and the
//!   precomputed inverse used on the hot path.
//! - [`conversion`] – tick/nanosecond conversion for a fixed-frequency counter.
//! - [`error`] – the [`ClockError`] type every crate returns.

pub mod affine;
pub mod conversion;
pub mod error;
pub mod fixed;

pub use affine::{AffinePair, AffineTransform};
pub use conversion::{TimeConversion, NSEC_PER_SEC};
pub use error::{ClockError, ClockResult};
pub use fixed::{mul64x32d32, Fixed32, Rounding};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
