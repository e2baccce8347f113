//! Data models for usage statistics

mod stats;
mod trace;

pub use stats::*;
pub use trace::*;
