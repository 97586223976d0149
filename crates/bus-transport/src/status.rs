//! Status Code Classification
//!
//! The bridge driver reports every transfer as a signed integer:
//! non-negative values are byte counts, `-1` means the slave did not
//! acknowledge, `-2` means the link is down, anything else is an
//! unclassified failure.

use crate::error::BusError;
use crate::status_code::{DEVICE_NOT_CONNECTED, SLAVE_NOT_RESPONDING};
use serde::{Deserialize, Serialize};

/// Error classification carried in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transaction succeeded
    #[default]
    None,
    /// Recoverable NAK; counted, the bus keeps running
    SlaveNotResponding,
    /// Link lost; the session is over
    DeviceDisconnected,
    /// Any other failure; reported but not fatal
    Unknown,
}

impl ErrorKind {
    /// Classify a transport error
    pub fn of(err: &BusError) -> Self {
        match err {
            BusError::NoAcknowledge { .. } => Self::SlaveNotResponding,
            BusError::NotConnected | BusError::NotOpen => Self::DeviceDisconnected,
            _ => Self::Unknown,
        }
    }

    /// Classify the outcome of a transport call
    pub fn from_result<T>(result: &Result<T, BusError>) -> Self {
        match result {
            Ok(_) => Self::None,
            Err(e) => Self::of(e),
        }
    }

    /// Short label used for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "ok",
            Self::SlaveNotResponding => "nak",
            Self::DeviceDisconnected => "disconnected",
            Self::Unknown => "unknown",
        }
    }
}

impl BusError {
    /// Map a raw negative driver status to an error
    pub fn from_status(code: i32, slave: u8) -> Self {
        match code {
            SLAVE_NOT_RESPONDING => Self::NoAcknowledge { slave },
            DEVICE_NOT_CONNECTED => Self::NotConnected,
            other => Self::Status(other),
        }
    }
}

/// Turn a raw driver status into a byte count or an error
pub fn check_status(code: i32, slave: u8) -> Result<usize, BusError> {
    if code >= 0 {
        Ok(code as usize)
    } else {
        Err(BusError::from_status(code, slave))
    }
}
