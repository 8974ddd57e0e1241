//! Stale series jobs and the runner that drives them

pub mod runner;
pub mod stale_series;
