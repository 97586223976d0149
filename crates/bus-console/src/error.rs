//! Console Error Types

use bus_scheduler::SchedulerError;
use data_logger::LogError;
use thiserror::Error;

/// Errors raised by console actions before anything reaches the bus
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Device not connected")]
    NotConnected,

    /// A bulk action of the same kind is still running
    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("{list} has no entry {index}")]
    NoSuchEntry { list: &'static str, index: usize },

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("Cannot remove the last command group")]
    LastGroup,

    #[error("Invalid hex input: {0:?}")]
    InvalidHex(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Log(#[from] LogError),
}
