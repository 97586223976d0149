//! Bus Command Scheduler
//!
//! Serializes every transport call onto one worker thread and arbitrates
//! between three kinds of traffic: priority single operations, queued
//! batch operations, and a periodic polling cycle. Results come back as
//! [`SchedulerEvent`]s that the caller drains on its own thread with
//! [`CommandScheduler::process_callbacks`].

mod dispatcher;
mod event;
mod periodic;
mod queue;
mod scheduler;
mod task;
mod worker;

pub use dispatcher::CallbackQueue;
pub use event::{DisconnectReason, ResponsePacket, SchedulerEvent, SchedulerObserver};
pub use periodic::PeriodicPlan;
pub use queue::TaskQueues;
pub use scheduler::{CommandScheduler, SchedulerConfig};
pub use task::{Batch, BatchEntry, CommandKind, Target, Task};

pub use bus_transport::ErrorKind;

use thiserror::Error;

/// Control-class ids used by the console windows
pub mod control {
    /// Single operations from the simple console
    pub const SIMPLE: u32 = 0;
    /// Register table bulk reads
    pub const REGISTER_TABLE: u32 = 1;
    /// Single-trigger command list
    pub const SINGLE_TRIGGER: u32 = 2;
    /// Periodic polling list
    pub const PERIODIC: u32 = 3;
}

/// Submission errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid slave address 0x{0:02X}")]
    InvalidAddress(u8),
    #[error("Invalid scan range 0x{first:02X}..=0x{last:02X}")]
    InvalidScanRange { first: u8, last: u8 },
    #[error("Scheduler is stopped")]
    Stopped,
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
