//! Command Table Model
//!
//! Configured fields are serialisable; results applied at runtime are
//! skipped so a saved group never carries stale bus data.

use bus_scheduler::{BatchEntry, CommandKind, ResponsePacket};
use bus_transport::ErrorKind;
use data_logger::LogConfig;
use serde::{Deserialize, Serialize};

/// Outcome of the last result applied to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    pub last_success: bool,
    pub last_error_kind: ErrorKind,
    pub last_error: Option<String>,
}

impl Default for EntryStatus {
    fn default() -> Self {
        Self {
            last_success: true,
            last_error_kind: ErrorKind::None,
            last_error: None,
        }
    }
}

impl EntryStatus {
    fn record(&mut self, packet: &ResponsePacket) {
        self.last_success = packet.success;
        self.last_error_kind = packet.error_kind;
        self.last_error = if packet.success {
            None
        } else {
            Some(
                packet
                    .error_message
                    .clone()
                    .unwrap_or_else(|| packet.error_kind.as_str().to_string()),
            )
        };
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Linear decode of raw bytes: `uint(raw) * factor + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Decoding {
    /// Column header in data logs
    pub alias: Option<String>,
    pub factor: f64,
    pub offset: f64,
    pub byte_order: ByteOrder,
}

impl Default for Decoding {
    fn default() -> Self {
        Self {
            alias: None,
            factor: 1.0,
            offset: 0.0,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl Decoding {
    /// `None` for empty input or more than eight bytes
    pub fn decode(&self, raw: &[u8]) -> Option<f64> {
        if raw.is_empty() || raw.len() > 8 {
            return None;
        }
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        let value = match self.byte_order {
            ByteOrder::BigEndian => raw.iter().fold(0, fold),
            ByteOrder::LittleEndian => raw.iter().rev().fold(0, fold),
        };
        Some(value as f64 * self.factor + self.offset)
    }
}

/// Row of the register table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterEntry {
    pub register: u8,
    pub length: u16,
    pub description: String,
    pub slave_override: Option<u8>,

    #[serde(skip)]
    pub data: Vec<u8>,
    #[serde(skip)]
    pub status: EntryStatus,
}

impl Default for RegisterEntry {
    fn default() -> Self {
        Self {
            register: 0,
            length: 1,
            description: String::new(),
            slave_override: None,
            data: Vec::new(),
            status: EntryStatus::default(),
        }
    }
}

impl RegisterEntry {
    pub fn new(register: u8, length: u16) -> Self {
        Self {
            register,
            length,
            ..Self::default()
        }
    }

    pub(crate) fn batch_entry(&self) -> BatchEntry {
        BatchEntry {
            slave_override: self.slave_override,
            ..BatchEntry::read(self.register, self.length)
        }
    }

    /// Success stores the data; failure keeps the old data
    pub(crate) fn apply(&mut self, packet: &ResponsePacket) {
        self.status.record(packet);
        if packet.success {
            self.data = packet.data.clone();
        }
    }
}

/// Row of the single-trigger list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleEntry {
    pub enabled: bool,
    pub kind: CommandKind,
    pub register: u8,
    pub length: u16,
    /// Payload for writes
    pub data: Vec<u8>,
    pub delay_ms: u32,
    pub label: String,
    pub slave_override: Option<u8>,

    /// Bytes from the last successful read
    #[serde(skip)]
    pub response: Vec<u8>,
    #[serde(skip)]
    pub status: EntryStatus,
}

impl Default for SingleEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: CommandKind::Read,
            register: 0,
            length: 1,
            data: Vec::new(),
            delay_ms: 0,
            label: "Execute".to_string(),
            slave_override: None,
            response: Vec::new(),
            status: EntryStatus::default(),
        }
    }
}

impl SingleEntry {
    pub(crate) fn batch_entry(&self) -> BatchEntry {
        BatchEntry {
            enabled: self.enabled,
            kind: self.kind,
            register: self.register,
            length: self.length,
            data: self.data.clone(),
            delay_ms: self.delay_ms,
            slave_override: self.slave_override,
        }
    }

    /// Writes and commands return no bytes and leave the last read intact
    pub(crate) fn apply(&mut self, packet: &ResponsePacket) {
        self.status.record(packet);
        if packet.success && !packet.data.is_empty() {
            self.response = packet.data.clone();
        }
    }
}

/// Row of the periodic poll list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicEntry {
    pub enabled: bool,
    pub kind: CommandKind,
    pub register: u8,
    pub length: u16,
    pub data: Vec<u8>,
    pub delay_ms: u32,
    pub slave_override: Option<u8>,
    pub decoding: Option<Decoding>,

    #[serde(skip)]
    pub response: Vec<u8>,
    #[serde(skip)]
    pub decoded: Option<f64>,
    /// NAKs seen since the last reset
    #[serde(skip)]
    pub error_count: u32,
    #[serde(skip)]
    pub status: EntryStatus,
}

impl Default for PeriodicEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: CommandKind::Read,
            register: 0,
            length: 1,
            data: Vec::new(),
            delay_ms: 0,
            slave_override: None,
            decoding: None,
            response: Vec::new(),
            decoded: None,
            error_count: 0,
            status: EntryStatus::default(),
        }
    }
}

impl PeriodicEntry {
    pub fn read(register: u8, length: u16) -> Self {
        Self {
            register,
            length,
            ..Self::default()
        }
    }

    pub fn with_decoding(mut self, decoding: Decoding) -> Self {
        self.decoding = Some(decoding);
        self
    }

    /// Whether the entry contributes a data-log column
    pub fn is_logged(&self) -> bool {
        self.enabled && self.kind == CommandKind::Read
    }

    pub(crate) fn batch_entry(&self) -> BatchEntry {
        BatchEntry {
            enabled: self.enabled,
            kind: self.kind,
            register: self.register,
            length: self.length,
            data: self.data.clone(),
            delay_ms: self.delay_ms,
            slave_override: self.slave_override,
        }
    }

    pub(crate) fn apply(&mut self, packet: &ResponsePacket) {
        self.status.record(packet);
        if packet.success {
            if !packet.data.is_empty() {
                self.response = packet.data.clone();
                self.decoded = self
                    .decoding
                    .as_ref()
                    .and_then(|d| d.decode(&self.response));
            }
        } else if packet.error_kind == ErrorKind::SlaveNotResponding {
            self.error_count = self.error_count.saturating_add(1);
        }
    }
}

/// Where and how a group's periodic data is logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogSettings {
    /// Start the log together with periodic polling
    pub enabled: bool,
    pub path: String,
    pub format: LogConfig,
}

impl Default for DataLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "periodic_log.csv".to_string(),
            format: LogConfig::default(),
        }
    }
}

/// A named device profile with its three command lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandGroup {
    pub name: String,
    pub slave_address: u8,
    /// Periodic cycle period
    pub interval_ms: u32,
    pub register_entries: Vec<RegisterEntry>,
    pub single_entries: Vec<SingleEntry>,
    pub periodic_entries: Vec<PeriodicEntry>,
    pub log: DataLogSettings,
}

impl Default for CommandGroup {
    fn default() -> Self {
        Self {
            name: "New Group".to_string(),
            slave_address: 0x50,
            interval_ms: 100,
            register_entries: Vec::new(),
            single_entries: Vec::new(),
            periodic_entries: Vec::new(),
            log: DataLogSettings::default(),
        }
    }
}

impl CommandGroup {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(success: bool, kind: ErrorKind, data: Vec<u8>) -> ResponsePacket {
        ResponsePacket {
            control_id: 3,
            command_id: 0,
            timestamp_ms: 0,
            success,
            error_kind: kind,
            data,
            error_message: (!success).then(|| "bus error".to_string()),
        }
    }

    #[test]
    fn test_decoding_byte_order() {
        let big = Decoding {
            factor: 0.5,
            offset: -1.0,
            ..Decoding::default()
        };
        assert_eq!(big.decode(&[0x01, 0x00]), Some(127.0));

        let little = Decoding {
            byte_order: ByteOrder::LittleEndian,
            ..Decoding::default()
        };
        assert_eq!(little.decode(&[0x01, 0x00]), Some(1.0));
        assert_eq!(little.decode(&[]), None);
        assert_eq!(little.decode(&[0; 9]), None);
    }

    #[test]
    fn test_periodic_counts_only_naks() {
        let mut entry = PeriodicEntry::read(0x8B, 2);
        entry.apply(&packet(false, ErrorKind::SlaveNotResponding, vec![]));
        entry.apply(&packet(false, ErrorKind::Unknown, vec![]));
        entry.apply(&packet(false, ErrorKind::SlaveNotResponding, vec![]));
        assert_eq!(entry.error_count, 2);
        assert_eq!(entry.status.last_error.as_deref(), Some("bus error"));

        entry.apply(&packet(true, ErrorKind::None, vec![0x12, 0x34]));
        assert_eq!(entry.error_count, 2);
        assert_eq!(entry.response, vec![0x12, 0x34]);
        assert!(entry.status.last_success);
        assert!(entry.status.last_error.is_none());
    }

    #[test]
    fn test_nak_count_saturates() {
        let mut entry = PeriodicEntry::read(0x8B, 2);
        entry.error_count = u32::MAX - 1;
        entry.apply(&packet(false, ErrorKind::SlaveNotResponding, vec![]));
        entry.apply(&packet(false, ErrorKind::SlaveNotResponding, vec![]));
        assert_eq!(entry.error_count, u32::MAX);
    }

    #[test]
    fn test_periodic_decodes_on_success() {
        let mut entry = PeriodicEntry::read(0x8B, 2).with_decoding(Decoding {
            factor: 0.01,
            ..Decoding::default()
        });
        entry.apply(&packet(true, ErrorKind::None, vec![0x01, 0xF4]));
        let decoded = entry.decoded.unwrap();
        assert!((decoded - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_write_keeps_last_read() {
        let mut entry = SingleEntry::default();
        entry.apply(&packet(true, ErrorKind::None, vec![0xAA]));
        entry.apply(&packet(true, ErrorKind::None, vec![]));
        assert_eq!(entry.response, vec![0xAA]);
    }

    #[test]
    fn test_register_failure_keeps_data() {
        let mut entry = RegisterEntry::new(0x10, 1);
        entry.apply(&packet(true, ErrorKind::None, vec![0x42]));
        entry.apply(&packet(false, ErrorKind::SlaveNotResponding, vec![]));
        assert_eq!(entry.data, vec![0x42]);
        assert!(!entry.status.last_success);
        assert_eq!(entry.status.last_error_kind, ErrorKind::SlaveNotResponding);
    }
}
