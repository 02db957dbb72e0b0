//! triage-classifiers: in-hospital mortality risk models from admission data.
//!
//! The crate trains bagged trees, boosted trees and a kernel machine on a
//! fixed clinical schema, with every preprocessing step fitted on training
//! partitions only. Fitted workflows are compared on a held-out test set
//! (bootstrap intervals, DeLong tests, calibration) and explained with
//! Shapley attributions, a cross-model consensus ranking and a bootstrap
//! stability analysis.
//!
//! All randomness flows from one study seed through [`rng`], so a study is
//! reproducible regardless of how rayon schedules its work.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod explain;
pub mod feature_selection;
pub mod io;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod preprocessing;
pub mod rng;
pub mod stats;
pub mod synthetic;
pub mod threshold;
pub mod tuning;
pub mod workflow;
