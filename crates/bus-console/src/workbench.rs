//! Workbench
//!
//! Owns both consoles and the data logger, and routes scheduler events
//! to them on the thread that calls [`Workbench::tick`].

use crate::error::ConsoleError;
use crate::model::CommandGroup;
use crate::simple::SimpleConsole;
use crate::table::TableSession;
use bus_scheduler::{control, CommandScheduler, DisconnectReason, ResponsePacket, SchedulerObserver};
use data_logger::DataLogger;
use std::sync::Arc;
use tracing::{info, warn};

/// Both consoles plus the data logger, fed from one scheduler
pub struct Workbench {
    scheduler: Arc<CommandScheduler>,
    simple: SimpleConsole,
    table: TableSession,
    logger: DataLogger,
}

impl Workbench {
    pub fn new(scheduler: Arc<CommandScheduler>, groups: Vec<CommandGroup>) -> Self {
        Self {
            simple: SimpleConsole::new(Arc::clone(&scheduler)),
            table: TableSession::new(Arc::clone(&scheduler), groups),
            logger: DataLogger::new(),
            scheduler,
        }
    }

    /// Apply every pending scheduler event; returns how many were applied
    pub fn tick(&mut self) -> usize {
        let scheduler = Arc::clone(&self.scheduler);
        scheduler.process_callbacks(self)
    }

    /// Start logging the selected group's periodic reads
    pub fn start_data_log(&mut self) -> Result<(), ConsoleError> {
        let settings = self.table.group().log.clone();
        self.logger
            .start(&settings.path, self.table.log_columns(), settings.format)?;
        Ok(())
    }

    /// Flush queued rows and close the log file
    pub fn stop_data_log(&mut self) {
        self.logger.stop();
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    pub fn simple(&self) -> &SimpleConsole {
        &self.simple
    }

    pub fn simple_mut(&mut self) -> &mut SimpleConsole {
        &mut self.simple
    }

    pub fn table(&self) -> &TableSession {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut TableSession {
        &mut self.table
    }

    pub fn logger(&self) -> &DataLogger {
        &self.logger
    }
}

impl SchedulerObserver for Workbench {
    fn on_connect(&mut self, success: bool, device_label: &str, error: Option<&str>) {
        if success {
            info!("Workbench connected to {}", device_label);
        } else {
            warn!("Workbench connect failed: {}", error.unwrap_or("unknown error"));
        }
        self.simple.on_connect(success, device_label, error);
        self.table.on_connect(success, device_label);
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::Requested => info!("Workbench disconnected"),
            DisconnectReason::LinkLost => warn!("Workbench lost the device"),
        }
        self.simple.on_disconnect();
        self.table.on_disconnect();
    }

    fn on_scan_complete(&mut self, success: bool, addresses: &[u8], error: Option<&str>) {
        self.simple.on_scan_complete(success, addresses, error);
    }

    fn on_result(&mut self, packet: &ResponsePacket) {
        if packet.control_id == control::SIMPLE {
            self.simple.on_result(packet);
        } else {
            self.table.apply_result(packet);
        }
    }

    fn on_periodic_cycle(&mut self, control_id: u32) {
        if control_id == control::PERIODIC && self.logger.is_active() {
            self.logger.log_row(self.table.snapshot_row());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Decoding, PeriodicEntry, RegisterEntry};
    use crate::simple::Operation;
    use bus_scheduler::SchedulerConfig;
    use bus_transport::{bitrate, ErrorKind, SimulatedTransport, SimulatorHandle};
    use std::time::{Duration, Instant};

    fn workbench(group: CommandGroup) -> (Workbench, SimulatorHandle) {
        let transport = SimulatedTransport::new(&[0x50]);
        let handle = transport.handle();
        let scheduler = CommandScheduler::start(transport, SchedulerConfig::default()).unwrap();
        (Workbench::new(Arc::new(scheduler), vec![group]), handle)
    }

    fn tick_until(workbench: &mut Workbench, done: impl Fn(&Workbench) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            workbench.tick();
            if done(workbench) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn connect(workbench: &mut Workbench) {
        workbench.scheduler().connect(bitrate::STANDARD).unwrap();
        assert!(tick_until(workbench, |w| w.table().is_connected()));
    }

    #[test]
    fn test_simple_round_trip() {
        let (mut workbench, handle) = workbench(CommandGroup::default());
        handle.poke(0x50, 0x20, &[0x5A]);
        connect(&mut workbench);
        assert!(workbench.simple().is_connected());

        let simple = workbench.simple_mut();
        simple.set_target("0x50", "0x20").unwrap();
        simple.execute(Operation::Read { length: 1 }).unwrap();
        assert!(tick_until(&mut workbench, |w| !w.simple().is_operating()));
        assert_eq!(workbench.simple().read_data(), &[0x5A]);
    }

    #[test]
    fn test_register_table_fills_from_bus() {
        let mut group = CommandGroup::default();
        group.register_entries = vec![RegisterEntry::new(0x01, 1), RegisterEntry::new(0x02, 2)];
        let (mut workbench, _handle) = workbench(group);
        connect(&mut workbench);

        workbench.table_mut().read_all_registers().unwrap();
        assert!(tick_until(&mut workbench, |w| !w.table().is_reading_all()));
        let entries = &workbench.table().group().register_entries;
        assert_eq!(entries[0].data, vec![0x01]);
        assert_eq!(entries[1].data, vec![0x02, 0x03]);
    }

    #[test]
    fn test_periodic_nak_counts_while_polling() {
        let mut group = CommandGroup::default();
        group.interval_ms = 5;
        group.periodic_entries = vec![PeriodicEntry::read(0x00, 1)];
        let (mut workbench, handle) = workbench(group);
        connect(&mut workbench);

        handle.set_nak(0x50, true);
        workbench.table_mut().start_periodic().unwrap();
        assert!(tick_until(&mut workbench, |w| {
            w.table().group().periodic_entries[0].error_count >= 3
        }));
        let entry = &workbench.table().group().periodic_entries[0];
        assert_eq!(entry.status.last_error_kind, ErrorKind::SlaveNotResponding);
        assert!(workbench.table().is_periodic_running());
        workbench.table_mut().stop_periodic();
    }

    #[test]
    fn test_periodic_rows_reach_data_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = CommandGroup::default();
        group.interval_ms = 10;
        group.log.path = dir.path().join("poll.csv").to_string_lossy().into_owned();
        group.periodic_entries = vec![PeriodicEntry::read(0x10, 1).with_decoding(Decoding {
            alias: Some("Temp".to_string()),
            ..Decoding::default()
        })];
        let (mut workbench, _handle) = workbench(group);
        connect(&mut workbench);

        workbench.start_data_log().unwrap();
        workbench.table_mut().start_periodic().unwrap();
        assert!(tick_until(&mut workbench, |w| w.logger().logged_count() >= 3));
        workbench.table_mut().stop_periodic();
        workbench.stop_data_log();

        let text = std::fs::read_to_string(dir.path().join("poll.csv")).unwrap();
        let mut lines = text.trim_start_matches('\u{feff}').lines();
        assert_eq!(lines.next(), Some("Timestamp,0x10,Temp"));
        assert!(lines.all(|line| line.ends_with(",10,16.000000")));
    }

    #[test]
    fn test_link_loss_resets_consoles() {
        let mut group = CommandGroup::default();
        group.interval_ms = 5;
        group.periodic_entries = vec![PeriodicEntry::read(0x00, 1)];
        let (mut workbench, handle) = workbench(group);
        connect(&mut workbench);

        workbench.table_mut().start_periodic().unwrap();
        handle.sever_link();
        assert!(tick_until(&mut workbench, |w| !w.table().is_connected()));
        assert!(!workbench.table().is_periodic_running());
        assert!(!workbench.simple().is_connected());
        assert!(!workbench.scheduler().is_periodic_running());
    }
}
