//! Command Table Session
//!
//! Drives the register table, the single-trigger list and the periodic
//! list of the selected command group, and applies their results.

use crate::error::ConsoleError;
use crate::model::{CommandGroup, PeriodicEntry};
use bus_scheduler::{control, CommandKind, CommandScheduler, PeriodicPlan, ResponsePacket};
use data_logger::{ColumnValue, LogColumn};
use std::sync::Arc;
use tracing::{debug, info};

/// Command-group tables and the bulk state of each traffic class
pub struct TableSession {
    scheduler: Arc<CommandScheduler>,
    groups: Vec<CommandGroup>,
    current: usize,
    connected: bool,
    device_label: String,
    periodic_running: bool,
    reading_all: bool,
    executing_all: bool,
}

impl TableSession {
    /// Start with `groups`, or one default group when empty
    pub fn new(scheduler: Arc<CommandScheduler>, mut groups: Vec<CommandGroup>) -> Self {
        if groups.is_empty() {
            groups.push(CommandGroup::default());
        }
        Self {
            scheduler,
            groups,
            current: 0,
            connected: false,
            device_label: String::new(),
            periodic_running: false,
            reading_all: false,
            executing_all: false,
        }
    }

    /// Every configured group
    pub fn groups(&self) -> &[CommandGroup] {
        &self.groups
    }

    /// Index of the selected group
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The selected group
    pub fn group(&self) -> &CommandGroup {
        &self.groups[self.current]
    }

    pub fn group_mut(&mut self) -> &mut CommandGroup {
        &mut self.groups[self.current]
    }

    /// Append a group and select it
    pub fn add_group(&mut self, group: CommandGroup) -> usize {
        self.groups.push(group);
        self.current = self.groups.len() - 1;
        self.current
    }

    /// Make `index` the selected group
    pub fn select_group(&mut self, index: usize) -> Result<(), ConsoleError> {
        if index >= self.groups.len() {
            return Err(ConsoleError::NoSuchEntry {
                list: "command groups",
                index,
            });
        }
        self.current = index;
        Ok(())
    }

    /// Remove the selected group; at least one group always remains
    pub fn remove_group(&mut self) -> Result<CommandGroup, ConsoleError> {
        if self.groups.len() <= 1 {
            return Err(ConsoleError::LastGroup);
        }
        let removed = self.groups.remove(self.current);
        self.current = self.current.min(self.groups.len() - 1);
        Ok(removed)
    }

    pub fn rename_group(&mut self, name: impl Into<String>) {
        self.group_mut().name = name.into();
    }

    /// Read every register-table row as one bulk task
    pub fn read_all_registers(&mut self) -> Result<(), ConsoleError> {
        self.require_connected()?;
        if self.reading_all {
            return Err(ConsoleError::Busy("register read"));
        }
        let group = self.group();
        if group.register_entries.is_empty() {
            return Err(ConsoleError::Empty("register table"));
        }
        let entries = group.register_entries.iter().map(|e| e.batch_entry()).collect();
        self.scheduler
            .read_all_registers(control::REGISTER_TABLE, group.slave_address, entries)?;
        self.reading_all = true;
        Ok(())
    }

    /// Run one single-trigger row ahead of queued work
    pub fn execute_single(&mut self, index: usize) -> Result<(), ConsoleError> {
        self.require_connected()?;
        let group = self.group();
        let entry = group
            .single_entries
            .get(index)
            .ok_or(ConsoleError::NoSuchEntry {
                list: "single-trigger list",
                index,
            })?;
        let slave = entry.slave_override.unwrap_or(group.slave_address);
        self.insert(
            entry.kind,
            slave,
            entry.register,
            entry.length,
            &entry.data,
            control::SINGLE_TRIGGER,
            index,
        )
    }

    /// Run every enabled single-trigger row in order, with their delays
    pub fn execute_all_single(&mut self) -> Result<(), ConsoleError> {
        self.require_connected()?;
        if self.executing_all {
            return Err(ConsoleError::Busy("single-trigger run"));
        }
        let group = self.group();
        if !group.single_entries.iter().any(|e| e.enabled) {
            return Err(ConsoleError::Empty("single-trigger list"));
        }
        let entries = group.single_entries.iter().map(|e| e.batch_entry()).collect();
        self.scheduler
            .execute_all_single(control::SINGLE_TRIGGER, group.slave_address, entries)?;
        self.executing_all = true;
        Ok(())
    }

    /// Run one periodic row once, outside the cycle
    pub fn execute_periodic(&mut self, index: usize) -> Result<(), ConsoleError> {
        self.require_connected()?;
        let group = self.group();
        let entry = group
            .periodic_entries
            .get(index)
            .ok_or(ConsoleError::NoSuchEntry {
                list: "periodic list",
                index,
            })?;
        let slave = entry.slave_override.unwrap_or(group.slave_address);
        self.insert(
            entry.kind,
            slave,
            entry.register,
            entry.length,
            &entry.data,
            control::PERIODIC,
            index,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        kind: CommandKind,
        slave: u8,
        register: u8,
        length: u16,
        data: &[u8],
        control_id: u32,
        index: usize,
    ) -> Result<(), ConsoleError> {
        let command_id = index as u32;
        match kind {
            CommandKind::Read => self
                .scheduler
                .insert_single_read(slave, register, length, control_id, command_id)?,
            CommandKind::Write => self.scheduler.insert_single_write(
                slave,
                register,
                data.to_vec(),
                control_id,
                command_id,
            )?,
            CommandKind::SendCommand => self
                .scheduler
                .insert_single_command(slave, register, control_id, command_id)?,
        }
        Ok(())
    }

    /// Install the selected group's periodic list as the poll cycle
    pub fn start_periodic(&mut self) -> Result<(), ConsoleError> {
        self.require_connected()?;
        let group = self.group();
        let plan = PeriodicPlan {
            control_id: control::PERIODIC,
            default_slave: group.slave_address,
            entries: group.periodic_entries.iter().map(|e| e.batch_entry()).collect(),
            interval_ms: group.interval_ms,
        };
        info!(
            "Polling group '{}' every {} ms",
            group.name, group.interval_ms
        );
        self.scheduler.start_periodic(plan)?;
        self.periodic_running = true;
        Ok(())
    }

    /// Stop polling; a cycle already running finishes
    pub fn stop_periodic(&mut self) {
        self.periodic_running = false;
        self.scheduler.stop_periodic();
    }

    /// Enable or disable every single-trigger row
    pub fn set_all_single_enabled(&mut self, enabled: bool) {
        for entry in &mut self.group_mut().single_entries {
            entry.enabled = enabled;
        }
    }

    /// Takes effect at the next `start_periodic`
    pub fn set_all_periodic_enabled(&mut self, enabled: bool) {
        for entry in &mut self.group_mut().periodic_entries {
            entry.enabled = enabled;
        }
    }

    /// Zero NAK counters; enable flags and data are left alone
    pub fn reset_periodic_error_counts(&mut self) {
        for entry in &mut self.group_mut().periodic_entries {
            entry.error_count = 0;
        }
    }

    /// Apply a result for one of the table's control ids to the selected group
    pub fn apply_result(&mut self, packet: &ResponsePacket) {
        let index = packet.command_id as usize;
        let group = &mut self.groups[self.current];

        match packet.control_id {
            control::REGISTER_TABLE => {
                if let Some(entry) = group.register_entries.get_mut(index) {
                    entry.apply(packet);
                }
                if !packet.success || index + 1 >= group.register_entries.len() {
                    self.reading_all = false;
                }
            }
            control::SINGLE_TRIGGER => {
                if let Some(entry) = group.single_entries.get_mut(index) {
                    entry.apply(packet);
                }
                let last = group.single_entries.iter().rposition(|e| e.enabled);
                if !packet.success || last.map_or(true, |last| index >= last) {
                    self.executing_all = false;
                }
            }
            control::PERIODIC => {
                if let Some(entry) = group.periodic_entries.get_mut(index) {
                    entry.apply(packet);
                }
            }
            other => debug!("Ignoring result for control id {}", other),
        }
    }

    /// One column per enabled periodic read
    pub fn log_columns(&self) -> Vec<LogColumn> {
        self.logged_entries()
            .map(|e| {
                LogColumn::new(e.register, e.decoding.as_ref().and_then(|d| d.alias.clone()))
            })
            .collect()
    }

    /// Latest values for [`log_columns`](Self::log_columns), same order
    pub fn snapshot_row(&self) -> Vec<ColumnValue> {
        self.logged_entries()
            .map(|e| ColumnValue {
                raw: e.response.clone(),
                parsed: e.decoded,
            })
            .collect()
    }

    fn logged_entries(&self) -> impl Iterator<Item = &PeriodicEntry> {
        self.group().periodic_entries.iter().filter(|e| e.is_logged())
    }

    fn require_connected(&self) -> Result<(), ConsoleError> {
        if self.connected {
            Ok(())
        } else {
            Err(ConsoleError::NotConnected)
        }
    }

    pub(crate) fn on_connect(&mut self, success: bool, device_label: &str) {
        self.connected = success;
        self.device_label = device_label.to_string();
    }

    pub(crate) fn on_disconnect(&mut self) {
        self.connected = false;
        self.device_label.clear();
        self.periodic_running = false;
        self.reading_all = false;
        self.executing_all = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn device_label(&self) -> &str {
        &self.device_label
    }

    /// Polling was started and no disconnect has been seen since
    pub fn is_periodic_running(&self) -> bool {
        self.periodic_running
    }

    /// A register-table read is still reporting
    pub fn is_reading_all(&self) -> bool {
        self.reading_all
    }

    /// A single-trigger run is still reporting
    pub fn is_executing_all(&self) -> bool {
        self.executing_all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Decoding, RegisterEntry, SingleEntry};
    use bus_scheduler::SchedulerConfig;
    use bus_transport::{ErrorKind, SimulatedTransport};

    fn session(group: CommandGroup) -> TableSession {
        let scheduler =
            CommandScheduler::start(SimulatedTransport::new(&[0x50]), SchedulerConfig::default())
                .unwrap();
        TableSession::new(Arc::new(scheduler), vec![group])
    }

    fn packet(control_id: u32, command_id: u32, kind: ErrorKind, data: Vec<u8>) -> ResponsePacket {
        let success = kind == ErrorKind::None;
        ResponsePacket {
            control_id,
            command_id,
            timestamp_ms: 0,
            success,
            error_kind: kind,
            data,
            error_message: (!success).then(|| kind.as_str().to_string()),
        }
    }

    fn periodic_group() -> CommandGroup {
        let mut group = CommandGroup::named("psu");
        group.periodic_entries = vec![
            PeriodicEntry::read(0x8B, 2).with_decoding(Decoding {
                alias: Some("Vout".to_string()),
                ..Decoding::default()
            }),
            PeriodicEntry::read(0x8C, 2),
            PeriodicEntry {
                enabled: false,
                ..PeriodicEntry::read(0x8D, 1)
            },
        ];
        group
    }

    #[test]
    fn test_actions_require_connection() {
        let mut session = session(periodic_group());
        assert!(matches!(session.start_periodic(), Err(ConsoleError::NotConnected)));
        assert!(matches!(session.read_all_registers(), Err(ConsoleError::NotConnected)));
        assert!(!session.is_periodic_running());
    }

    #[test]
    fn test_nak_counter_and_reset() {
        let mut session = session(periodic_group());
        session.on_connect(true, "SIM");

        session.apply_result(&packet(control::PERIODIC, 0, ErrorKind::None, vec![0x01, 0x02]));
        for _ in 0..3 {
            session.apply_result(&packet(
                control::PERIODIC,
                0,
                ErrorKind::SlaveNotResponding,
                vec![],
            ));
        }
        session.apply_result(&packet(control::PERIODIC, 1, ErrorKind::Unknown, vec![]));

        let entries = &session.group().periodic_entries;
        assert_eq!(entries[0].error_count, 3);
        assert_eq!(entries[1].error_count, 0);
        assert_eq!(entries[0].status.last_error_kind, ErrorKind::SlaveNotResponding);

        session.reset_periodic_error_counts();
        let entries = &session.group().periodic_entries;
        assert_eq!(entries[0].error_count, 0);
        assert_eq!(entries[0].response, vec![0x01, 0x02]);
        assert!(entries[0].enabled);
        assert!(!entries[2].enabled);
    }

    #[test]
    fn test_register_read_flag_clears_on_last_or_failure() {
        let mut group = CommandGroup::named("regs");
        group.register_entries = vec![RegisterEntry::new(0, 1), RegisterEntry::new(1, 1)];
        let mut session = session(group);
        session.on_connect(true, "SIM");

        session.read_all_registers().unwrap();
        assert!(session.is_reading_all());
        assert!(matches!(session.read_all_registers(), Err(ConsoleError::Busy(_))));

        session.apply_result(&packet(control::REGISTER_TABLE, 0, ErrorKind::None, vec![7]));
        assert!(session.is_reading_all());
        session.apply_result(&packet(control::REGISTER_TABLE, 1, ErrorKind::None, vec![8]));
        assert!(!session.is_reading_all());
        assert_eq!(session.group().register_entries[1].data, vec![8]);

        session.read_all_registers().unwrap();
        session.apply_result(&packet(
            control::REGISTER_TABLE,
            0,
            ErrorKind::SlaveNotResponding,
            vec![],
        ));
        assert!(!session.is_reading_all());
    }

    #[test]
    fn test_single_run_ends_at_last_enabled_entry() {
        let mut group = CommandGroup::named("single");
        group.single_entries = vec![
            SingleEntry::default(),
            SingleEntry::default(),
            SingleEntry {
                enabled: false,
                ..SingleEntry::default()
            },
        ];
        let mut session = session(group);
        session.on_connect(true, "SIM");

        session.execute_all_single().unwrap();
        session.apply_result(&packet(control::SINGLE_TRIGGER, 1, ErrorKind::None, vec![1]));
        assert!(!session.is_executing_all());
    }

    #[test]
    fn test_log_columns_match_snapshot() {
        let mut session = session(periodic_group());
        session.apply_result(&packet(control::PERIODIC, 0, ErrorKind::None, vec![0x00, 0x0A]));

        let columns = session.log_columns();
        assert_eq!(
            columns,
            vec![
                LogColumn::new(0x8B, Some("Vout".to_string())),
                LogColumn::new(0x8C, None),
            ]
        );
        let row = session.snapshot_row();
        assert_eq!(row.len(), columns.len());
        assert_eq!(row[0].raw, vec![0x00, 0x0A]);
        assert_eq!(row[0].parsed, Some(10.0));
        assert_eq!(row[1], ColumnValue::default());
    }

    #[test]
    fn test_group_management() {
        let mut session = session(CommandGroup::named("a"));
        assert!(matches!(session.remove_group(), Err(ConsoleError::LastGroup)));
        assert_eq!(session.add_group(CommandGroup::named("b")), 1);
        session.rename_group("c");
        session.select_group(0).unwrap();
        assert_eq!(session.group().name, "a");
        assert!(session.select_group(5).is_err());

        session.select_group(1).unwrap();
        assert_eq!(session.remove_group().unwrap().name, "c");
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn test_disconnect_resets_flags() {
        let mut session = session(periodic_group());
        session.on_connect(true, "SIM");
        session.start_periodic().unwrap();
        assert!(session.is_periodic_running());
        session.on_disconnect();
        assert!(!session.is_periodic_running());
        assert!(!session.is_connected());
    }
}
