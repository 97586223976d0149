//! Bus Console
//!
//! The caller side of the bus scheduler: a simple single-operation
//! console, a command-table session over named device groups, and the
//! [`Workbench`] observer that applies scheduler results to both and
//! feeds periodic snapshots to the data logger.

mod error;
pub mod hex;
mod model;
mod simple;
mod table;
mod workbench;

pub use error::ConsoleError;
pub use model::{
    ByteOrder, CommandGroup, DataLogSettings, Decoding, EntryStatus, PeriodicEntry,
    RegisterEntry, SingleEntry,
};
pub use simple::{command, Operation, ScannedSlave, SimpleConsole};
pub use table::TableSession;
pub use workbench::Workbench;
