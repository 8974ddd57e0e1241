//! series-reaper library exports

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod sets;
pub mod tasks;

#[cfg(test)]
mod testing;
