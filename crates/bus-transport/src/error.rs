//! Bus Error Types

use thiserror::Error;

/// Errors that can occur during a bus transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Slave did not acknowledge its address or data
    #[error("Slave 0x{slave:02X} not responding (NAK)")]
    NoAcknowledge { slave: u8 },

    /// Bridge unplugged or link lost
    #[error("Device not connected")]
    NotConnected,

    /// Address outside the 7-bit range
    #[error("Invalid slave address 0x{0:02X}")]
    InvalidAddress(u8),

    /// Transaction attempted on a closed handle
    #[error("Device not open")]
    NotOpen,

    /// Bridge could not be opened
    #[error("Open failed: {0}")]
    OpenFailed(String),

    /// Bridge rejected its configuration
    #[error("Configure failed: {0}")]
    ConfigureFailed(String),

    /// Unclassified negative status from the driver
    #[error("Transfer failed with status {0}")]
    Status(i32),
}

impl BusError {
    /// Whether this error means the link itself is gone
    pub fn is_link_lost(&self) -> bool {
        matches!(self, BusError::NotConnected | BusError::NotOpen)
    }
}
