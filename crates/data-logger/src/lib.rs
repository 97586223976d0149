//! Data Logger
//!
//! Writes periodic poll snapshots to a CSV file from a background thread,
//! so the caller thread never blocks on disk I/O.

mod logger;
mod row;

pub use logger::DataLogger;
pub use row::{ColumnValue, LogColumn, PeriodicRow};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logger errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("No columns to log")]
    NoColumns,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Which columns a log file carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Leading wall-clock timestamp column
    pub include_timestamp: bool,
    /// Raw bytes column per register
    pub log_raw: bool,
    /// Decoded value column per register
    pub log_parsed: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            include_timestamp: true,
            log_raw: true,
            log_parsed: true,
        }
    }
}
