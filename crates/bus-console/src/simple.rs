//! Simple Console
//!
//! One slave, one register, one operation at a time. Operations go
//! through the priority queue so they are not stuck behind bulk work.

use crate::error::ConsoleError;
use crate::hex::{parse_hex_byte, parse_hex_bytes};
use bus_scheduler::{control, CommandScheduler, ResponsePacket};
use bus_transport::bitrate;
use std::sync::Arc;
use tracing::debug;

/// Command ids the simple console tags its operations with
pub mod command {
    pub const READ: u32 = 0;
    pub const WRITE: u32 = 1;
    pub const SEND: u32 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { length: u16 },
    Write { data: Vec<u8> },
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedSlave {
    pub address: u8,
    pub selected: bool,
}

/// Single-target console state, updated from drained scheduler events
pub struct SimpleConsole {
    scheduler: Arc<CommandScheduler>,
    /// Clock used by the next connect
    pub bitrate: u32,
    /// Target slave address
    pub slave: u8,
    /// Target register, or the command byte for `Operation::Command`
    pub register: u8,
    connected: bool,
    device_label: String,
    is_scanning: bool,
    is_operating: bool,
    scanned: Vec<ScannedSlave>,
    read_data: Vec<u8>,
    last_success: bool,
    last_error: Option<String>,
}

impl SimpleConsole {
    pub fn new(scheduler: Arc<CommandScheduler>) -> Self {
        Self {
            scheduler,
            bitrate: bitrate::STANDARD,
            slave: 0x50,
            register: 0x00,
            connected: false,
            device_label: String::new(),
            is_scanning: false,
            is_operating: false,
            scanned: Vec::new(),
            read_data: Vec::new(),
            last_success: true,
            last_error: None,
        }
    }

    /// Connect when disconnected, disconnect otherwise
    pub fn toggle_connection(&mut self) -> Result<(), ConsoleError> {
        if self.connected {
            self.scheduler.disconnect()?;
        } else {
            self.scheduler.connect(self.bitrate)?;
        }
        Ok(())
    }

    /// Probe the bus for responding slaves
    pub fn scan(&mut self) -> Result<(), ConsoleError> {
        self.require_connected()?;
        self.scheduler.scan_bus()?;
        self.is_scanning = true;
        self.last_error = None;
        Ok(())
    }

    /// Make a scanned address the target slave
    pub fn select_slave(&mut self, index: usize) -> Result<(), ConsoleError> {
        if index >= self.scanned.len() {
            return Err(ConsoleError::NoSuchEntry {
                list: "scan results",
                index,
            });
        }
        for (i, slave) in self.scanned.iter_mut().enumerate() {
            slave.selected = i == index;
        }
        self.slave = self.scanned[index].address;
        Ok(())
    }

    /// Set slave and register from hex text such as `0x50`
    pub fn set_target(&mut self, slave: &str, register: &str) -> Result<(), ConsoleError> {
        let parse = |text: &str| {
            parse_hex_byte(text).ok_or_else(|| ConsoleError::InvalidHex(text.to_string()))
        };
        let (slave, register) = (parse(slave)?, parse(register)?);
        self.slave = slave;
        self.register = register;
        Ok(())
    }

    /// Write hex text such as `AB 0xCD` to the current target
    pub fn write_hex(&mut self, text: &str) -> Result<(), ConsoleError> {
        let data = parse_hex_bytes(text);
        if data.is_empty() {
            return Err(ConsoleError::InvalidHex(text.to_string()));
        }
        self.execute(Operation::Write { data })
    }

    /// Run `operation` on the current target ahead of queued work
    pub fn execute(&mut self, operation: Operation) -> Result<(), ConsoleError> {
        self.require_connected()?;
        let (slave, register) = (self.slave, self.register);
        debug!("Simple console {:?} on 0x{:02X}/0x{:02X}", operation, slave, register);

        match operation {
            Operation::Read { length } => self.scheduler.insert_single_read(
                slave,
                register,
                length.max(1),
                control::SIMPLE,
                command::READ,
            )?,
            Operation::Write { data } => self.scheduler.insert_single_write(
                slave,
                register,
                data,
                control::SIMPLE,
                command::WRITE,
            )?,
            Operation::Command => self.scheduler.insert_single_command(
                slave,
                register,
                control::SIMPLE,
                command::SEND,
            )?,
        }
        self.is_operating = true;
        self.last_error = None;
        Ok(())
    }

    fn require_connected(&mut self) -> Result<(), ConsoleError> {
        if self.connected {
            return Ok(());
        }
        let err = ConsoleError::NotConnected;
        self.last_success = false;
        self.last_error = Some(err.to_string());
        Err(err)
    }

    pub(crate) fn on_connect(&mut self, success: bool, device_label: &str, error: Option<&str>) {
        self.connected = success;
        self.device_label = device_label.to_string();
        self.last_success = success;
        self.last_error = error.map(str::to_string);
    }

    pub(crate) fn on_disconnect(&mut self) {
        self.connected = false;
        self.device_label.clear();
        self.is_scanning = false;
        self.is_operating = false;
        self.last_success = false;
        self.last_error = Some("Device disconnected".to_string());
    }

    pub(crate) fn on_scan_complete(&mut self, success: bool, addresses: &[u8], error: Option<&str>) {
        self.is_scanning = false;
        self.scanned = addresses
            .iter()
            .map(|&address| ScannedSlave {
                address,
                selected: false,
            })
            .collect();
        self.last_success = success;
        self.last_error = if success {
            None
        } else {
            Some(error.unwrap_or("Scan failed").to_string())
        };
    }

    pub(crate) fn on_result(&mut self, packet: &ResponsePacket) {
        self.is_operating = false;
        self.last_success = packet.success;
        if packet.success {
            if packet.command_id == command::READ {
                self.read_data = packet.data.clone();
            }
            self.last_error = None;
        } else {
            self.last_error = packet.error_message.clone();
        }
    }

    /// Connection state as of the last drained event
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Bridge label reported by the last successful connect
    pub fn device_label(&self) -> &str {
        &self.device_label
    }

    /// A scan was requested and has not reported yet
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// An operation was requested and has not reported yet
    pub fn is_operating(&self) -> bool {
        self.is_operating
    }

    /// Addresses found by the last scan
    pub fn scanned(&self) -> &[ScannedSlave] {
        &self.scanned
    }

    /// Bytes from the last successful read
    pub fn read_data(&self) -> &[u8] {
        &self.read_data
    }

    /// Outcome of the last action
    pub fn last_success(&self) -> bool {
        self.last_success
    }

    /// Message of the last failure, cleared on success
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
