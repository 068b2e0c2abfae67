//! Cross-crate integration scenarios.

pub mod lifecycle;
pub mod scenarios;
pub mod stacking;
