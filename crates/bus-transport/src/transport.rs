//! Transport Trait

use crate::error::BusError;

/// A blocking bus bridge.
///
/// Every call runs to completion on the calling thread, bounded only by
/// the bridge's own timeouts. Implementations are driven from a single
/// worker thread, so they need `Send` but not `Sync`.
pub trait Transport: Send {
    /// Open the bridge and return its device label
    fn open(&mut self) -> Result<String, BusError>;

    /// Close the bridge; closing a closed handle is a no-op
    fn close(&mut self);

    /// Set the bus clock in Hz
    fn configure(&mut self, bitrate: u32) -> Result<(), BusError>;

    /// Write the register address, then read `length` bytes back
    fn read(&mut self, slave: u8, register: u8, length: u16) -> Result<Vec<u8>, BusError>;

    /// Write the register address followed by `data`
    fn write(&mut self, slave: u8, register: u8, data: &[u8]) -> Result<usize, BusError>;

    /// Send a single command byte
    fn send_byte(&mut self, slave: u8, value: u8) -> Result<usize, BusError>;

    /// Probe `first..=last` and return the addresses that acknowledged
    fn scan(&mut self, first: u8, last: u8) -> Result<Vec<u8>, BusError>;

    /// Driver-level description of the most recent failure
    fn last_error(&self) -> Option<String>;

    /// Whether the handle is currently open
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<String, BusError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn configure(&mut self, bitrate: u32) -> Result<(), BusError> {
        (**self).configure(bitrate)
    }

    fn read(&mut self, slave: u8, register: u8, length: u16) -> Result<Vec<u8>, BusError> {
        (**self).read(slave, register, length)
    }

    fn write(&mut self, slave: u8, register: u8, data: &[u8]) -> Result<usize, BusError> {
        (**self).write(slave, register, data)
    }

    fn send_byte(&mut self, slave: u8, value: u8) -> Result<usize, BusError> {
        (**self).send_byte(slave, value)
    }

    fn scan(&mut self, first: u8, last: u8) -> Result<Vec<u8>, BusError> {
        (**self).scan(first, last)
    }

    fn last_error(&self) -> Option<String> {
        (**self).last_error()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
