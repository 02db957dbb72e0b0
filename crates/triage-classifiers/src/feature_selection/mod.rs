//! Feature selection utilities.
//!
//! Unsupervised filters (pairwise correlation, near-zero variance) used by the
//! recipe to prune redundant or uninformative design columns.
pub mod filters;
