//! Chart pattern detectors
//!
//! Every detector reads a [`PriceSeries`](crate::PriceSeries) plus the shared
//! [`TechnicalMetrics`](crate::metrics::TechnicalMetrics) and returns one
//! [`Candidate`](crate::Candidate). Detectors never call each other.
//!
//! # Pattern Categories
//!
//! - **Bases (4)**: VCP, Cup & Handle, Flat Base, 52-week-high Breakout
//! - **Geometry (4)**: Rising/Falling Wedge, Ascending/Symmetrical Triangle
//! - **Reversal (2)**: Head & Shoulders and its inverse
//! - **Pullback (2)**: 21-EMA and 50-SMA pullbacks

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod bases;
pub mod geometry;
pub mod pullback;
pub mod reversal;

// Re-export all detectors for convenience
pub use bases::*;
pub use geometry::*;
pub use pullback::*;
pub use reversal::*;
