//! Pump Radar Library
//!
//! Pump likelihood scanning for futures-listed tokens: data collection,
//! nine-signal analysis, composite scoring, trade levels, and simulated
//! trade monitoring.

pub mod alerts;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod levels;
pub mod market;
pub mod monitor;
pub mod normalize;
pub mod scanner;
pub mod scoring;
pub mod signals;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
