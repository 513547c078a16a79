//! Per-scale phase timings for merge runs.
//!
//! When the `timing` feature is enabled, merge steps record how long they
//! spent loading children, reconciling and writing the parent. When disabled,
//! all types become zero-sized and all methods compile away.

#[cfg(feature = "timing")]
mod real;
#[cfg(not(feature = "timing"))]
mod stub;

#[cfg(feature = "timing")]
pub use real::*;
#[cfg(not(feature = "timing"))]
pub use stub::*;
