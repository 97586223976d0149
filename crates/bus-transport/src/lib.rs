//! I2C/SMBus Transport Boundary
//!
//! This crate defines the blocking transport that the command scheduler
//! drives from its worker thread, the signed status contract of the
//! USB-to-bus bridge, and a simulated bus used for tests and demos.

mod error;
mod simulator;
mod status;
mod transport;

pub use error::BusError;
pub use simulator::{BusOp, SimulatedTransport, SimulatorHandle, DEFAULT_HISTORY_LIMIT};
pub use status::{check_status, ErrorKind};
pub use transport::Transport;

/// Highest valid 7-bit slave address
pub const MAX_SLAVE_ADDRESS: u8 = 0x7F;

/// First address probed by a bus scan (0x00/0x01 are reserved)
pub const SCAN_FIRST_ADDRESS: u8 = 0x02;

/// Bus clock presets
pub mod bitrate {
    /// Standard mode (100 kHz)
    pub const STANDARD: u32 = 100_000;
    /// Fast mode (400 kHz)
    pub const FAST: u32 = 400_000;
}

/// Reserved negative status codes returned by the bridge driver
pub mod status_code {
    /// The addressed slave did not acknowledge
    pub const SLAVE_NOT_RESPONDING: i32 = -1;
    /// The bridge is unplugged or the link is down
    pub const DEVICE_NOT_CONNECTED: i32 = -2;
}

/// Check that an address fits in 7 bits
pub fn validate_address(slave: u8) -> Result<u8, BusError> {
    if slave > MAX_SLAVE_ADDRESS {
        Err(BusError::InvalidAddress(slave))
    } else {
        Ok(slave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert_eq!(validate_address(0x50).unwrap(), 0x50);
        assert_eq!(validate_address(0x7F).unwrap(), 0x7F);
        assert!(matches!(
            validate_address(0x80),
            Err(BusError::InvalidAddress(0x80))
        ));
    }
}
