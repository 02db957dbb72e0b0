//! Discrimination, calibration and comparison statistics for held-out
//! predictions.

pub mod bootstrap;
pub mod calibration;
pub mod compare;
pub mod delong;
pub mod metrics;
