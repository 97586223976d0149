//! Row and Header Layout

use crate::LogConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One logged register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogColumn {
    pub register: u8,
    /// Header of the parsed column; `Parse` when absent
    pub alias: Option<String>,
}

impl LogColumn {
    pub fn new(register: u8, alias: Option<String>) -> Self {
        Self { register, alias }
    }
}

/// Latest value of one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub raw: Vec<u8>,
    /// `None` when decoding failed or is not configured
    pub parsed: Option<f64>,
}

/// Snapshot queued for the writer thread
#[derive(Debug, Clone)]
pub struct PeriodicRow {
    pub timestamp: DateTime<Local>,
    pub values: Vec<ColumnValue>,
}

impl PeriodicRow {
    pub fn now(values: Vec<ColumnValue>) -> Self {
        Self {
            timestamp: Local::now(),
            values,
        }
    }
}

pub(crate) fn header(columns: &[LogColumn], config: &LogConfig) -> Vec<String> {
    let mut fields = Vec::with_capacity(1 + columns.len() * 2);
    if config.include_timestamp {
        fields.push("Timestamp".to_string());
    }
    for column in columns {
        if config.log_raw {
            fields.push(format!("0x{:02X}", column.register));
        }
        if config.log_parsed {
            fields.push(column.alias.clone().unwrap_or_else(|| "Parse".to_string()));
        }
    }
    fields
}

/// Render a row; values beyond the snapshot are written as missing
pub(crate) fn record(row: &PeriodicRow, columns: usize, config: &LogConfig) -> Vec<String> {
    let mut fields = Vec::with_capacity(1 + columns * 2);
    if config.include_timestamp {
        fields.push(format_timestamp(&row.timestamp));
    }
    for index in 0..columns {
        let value = row.values.get(index);
        if config.log_raw {
            fields.push(value.map(|v| format_raw(&v.raw)).unwrap_or_default());
        }
        if config.log_parsed {
            fields.push(match value.and_then(|v| v.parsed) {
                Some(parsed) if parsed.is_finite() => format!("{:.6}", parsed),
                _ => "ERR".to_string(),
            });
        }
    }
    fields
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn format_raw(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn columns() -> Vec<LogColumn> {
        vec![
            LogColumn::new(0x8B, Some("Vout".to_string())),
            LogColumn::new(0x8C, None),
        ]
    }

    #[test]
    fn test_header_layout() {
        let config = LogConfig::default();
        assert_eq!(
            header(&columns(), &config),
            vec!["Timestamp", "0x8B", "Vout", "0x8C", "Parse"]
        );

        let raw_only = LogConfig {
            include_timestamp: false,
            log_raw: true,
            log_parsed: false,
        };
        assert_eq!(header(&columns(), &raw_only), vec!["0x8B", "0x8C"]);
    }

    #[test]
    fn test_record_formats_values() {
        let timestamp = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        let row = PeriodicRow {
            timestamp,
            values: vec![ColumnValue {
                raw: vec![0x0A, 0xff],
                parsed: Some(12.5),
            }],
        };

        let fields = record(&row, 2, &LogConfig::default());
        assert_eq!(
            fields,
            vec!["2024-03-09 14:05:07.042", "0A FF", "12.500000", "", "ERR"]
        );
    }

    #[test]
    fn test_non_finite_parsed_is_error() {
        let row = PeriodicRow::now(vec![ColumnValue {
            raw: vec![],
            parsed: Some(f64::NAN),
        }]);
        let config = LogConfig {
            include_timestamp: false,
            ..LogConfig::default()
        };
        assert_eq!(record(&row, 1, &config), vec!["", "ERR"]);
    }
}
