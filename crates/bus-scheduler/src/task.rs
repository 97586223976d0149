//! Task Definitions

use serde::{Deserialize, Serialize};

/// Operation performed by one sub-entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandKind {
    /// Register read
    #[default]
    Read,
    /// Register write
    Write,
    /// Single command byte (the register field is the byte sent)
    SendCommand,
}

/// One step of a bulk task or of the periodic cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Disabled entries are skipped and produce no result
    pub enabled: bool,
    pub kind: CommandKind,
    /// Register address, or the command byte for `SendCommand`
    pub register: u8,
    /// Bytes to read
    pub length: u16,
    /// Payload for writes
    pub data: Vec<u8>,
    /// Pause after this entry, in milliseconds
    pub delay_ms: u32,
    /// Slave address used instead of the batch default
    pub slave_override: Option<u8>,
}

impl BatchEntry {
    /// Read `length` bytes from `register`
    pub fn read(register: u8, length: u16) -> Self {
        Self {
            enabled: true,
            kind: CommandKind::Read,
            register,
            length,
            data: Vec::new(),
            delay_ms: 0,
            slave_override: None,
        }
    }

    /// Write `data` starting at `register`
    pub fn write(register: u8, data: Vec<u8>) -> Self {
        Self {
            kind: CommandKind::Write,
            data,
            ..Self::read(register, 0)
        }
    }

    /// Send `command` as a single byte
    pub fn command(command: u8) -> Self {
        Self {
            kind: CommandKind::SendCommand,
            ..Self::read(command, 0)
        }
    }

    /// Pause `delay_ms` after this entry runs
    pub fn with_delay(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Address `slave` instead of the batch default
    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave_override = Some(slave);
        self
    }

    /// Keep the entry in the list but skip it
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Effective slave address given the batch default
    pub fn slave_for(&self, default_slave: u8) -> u8 {
        self.slave_override.unwrap_or(default_slave)
    }
}

/// Addressing and correlation ids of a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub slave: u8,
    pub register: u8,
    /// Echoed back so the caller can route the result
    pub control_id: u32,
    /// Caller-chosen id, or the entry index for bulk work
    pub command_id: u32,
}

/// A list of entries run as one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub control_id: u32,
    pub default_slave: u8,
    pub entries: Vec<BatchEntry>,
}

impl Batch {
    /// Every slave address this batch can touch
    pub(crate) fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        std::iter::once(self.default_slave)
            .chain(self.entries.iter().filter_map(|e| e.slave_override))
    }
}

/// Unit of work consumed exactly once by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Connect { bitrate: u32 },
    Disconnect,
    ScanBus,
    ReadRegister { target: Target, length: u16 },
    WriteRegister { target: Target, data: Vec<u8> },
    SendCommand { target: Target },
    /// Every enabled entry is read, whatever its kind
    ReadAllRegisters(Batch),
    ExecuteAllSingle(Batch),
}

impl Task {
    /// Tasks that manage the link rather than use it
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Task::Connect { .. } | Task::Disconnect)
    }

    /// Short label for logs
    pub fn name(&self) -> &'static str {
        match self {
            Task::Connect { .. } => "connect",
            Task::Disconnect => "disconnect",
            Task::ScanBus => "scan",
            Task::ReadRegister { .. } => "read",
            Task::WriteRegister { .. } => "write",
            Task::SendCommand { .. } => "command",
            Task::ReadAllRegisters(_) => "read-all",
            Task::ExecuteAllSingle(_) => "execute-all",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builders() {
        let entry = BatchEntry::write(0x10, vec![0xAB]).with_delay(5).with_slave(0x51);
        assert_eq!(entry.kind, CommandKind::Write);
        assert_eq!(entry.data, vec![0xAB]);
        assert_eq!(entry.delay_ms, 5);
        assert_eq!(entry.slave_for(0x50), 0x51);
        assert_eq!(BatchEntry::command(0x03).slave_for(0x50), 0x50);
        assert!(!BatchEntry::read(0, 1).disabled().enabled);
    }

    #[test]
    fn test_batch_addresses() {
        let batch = Batch {
            control_id: 1,
            default_slave: 0x50,
            entries: vec![BatchEntry::read(0, 1), BatchEntry::read(1, 1).with_slave(0x90)],
        };
        assert_eq!(batch.addresses().collect::<Vec<_>>(), vec![0x50, 0x90]);
    }
}
