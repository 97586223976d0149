//! Bus Workbench
//!
//! Configuration, logging setup and the session loop that wires a
//! simulated bus, the command scheduler and the consoles together.

use bus_console::{CommandGroup, ConsoleError, Workbench};
use bus_scheduler::{CommandScheduler, SchedulerConfig, SchedulerError};
use bus_transport::{bitrate, SimulatedTransport, DEFAULT_HISTORY_LIMIT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "WORKBENCH";

/// Longest wait for a connect or scan answer during startup
const STARTUP_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to install logger: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Console(#[from] ConsoleError),
    #[error("Device did not connect: {0}")]
    ConnectFailed(String),
}

/// Simulated bus contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Addresses that acknowledge
    pub devices: Vec<u8>,
    /// Added to every transaction
    pub latency_ms: u64,
    /// Transactions kept for inspection; 0 records none
    pub history_limit: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: vec![0x50],
            latency_ms: 1,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SimulatorConfig {
    pub fn build(&self) -> SimulatedTransport {
        let transport = SimulatedTransport::new(&self.devices);
        let handle = transport.handle();
        handle.set_latency(Duration::from_millis(self.latency_ms));
        handle.set_history_limit(self.history_limit);
        transport
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub bitrate: u32,
    /// Callback drain period
    pub tick_ms: u64,
    /// Session length; 0 runs until Ctrl-C
    pub run_seconds: u64,
    pub scheduler: SchedulerConfig,
    pub simulator: SimulatorConfig,
    pub group: CommandGroup,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bitrate: bitrate::STANDARD,
            tick_ms: 16,
            run_seconds: 0,
            scheduler: SchedulerConfig::default(),
            simulator: SimulatorConfig::default(),
            group: CommandGroup::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` (optional) with `WORKBENCH__*` environment overrides on top
    pub fn load(path: &str) -> Result<Self, WorkbenchError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Initialize logging
pub fn init_logging(level: &str) -> Result<(), WorkbenchError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Tick until `done` holds or `limit` elapses
async fn tick_until(
    workbench: &mut Workbench,
    tick: Duration,
    limit: Duration,
    done: impl Fn(&Workbench) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        workbench.tick();
        if done(workbench) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(tick).await;
    }
}

/// Run one workbench session
pub async fn run(config: AppConfig) -> Result<(), WorkbenchError> {
    let tick = Duration::from_millis(config.tick_ms.max(1));
    let scheduler = Arc::new(CommandScheduler::start(
        config.simulator.build(),
        config.scheduler.clone(),
    )?);
    let mut workbench = Workbench::new(Arc::clone(&scheduler), vec![config.group.clone()]);

    scheduler.connect(config.bitrate)?;
    let connected = tick_until(&mut workbench, tick, STARTUP_WAIT, |w| {
        w.table().is_connected() || w.simple().last_error().is_some()
    })
    .await;
    if !connected || !workbench.table().is_connected() {
        let reason = workbench
            .simple()
            .last_error()
            .unwrap_or("timed out")
            .to_string();
        scheduler.stop();
        return Err(WorkbenchError::ConnectFailed(reason));
    }

    workbench.simple_mut().scan()?;
    tick_until(&mut workbench, tick, STARTUP_WAIT, |w| !w.simple().is_scanning()).await;
    info!("Devices on bus: {:02X?}", workbench.simple().scanned());

    let group = workbench.table().group().clone();
    if !group.register_entries.is_empty() {
        workbench.table_mut().read_all_registers()?;
    }
    if group.log.enabled {
        workbench.start_data_log()?;
    }
    if !group.periodic_entries.is_empty() {
        workbench.table_mut().start_periodic()?;
    }

    let mut ticker = tokio::time::interval(tick);
    let session = async {
        if config.run_seconds == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(config.run_seconds)).await;
        }
    };
    tokio::pin!(session);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                workbench.tick();
            }
            _ = &mut session => {
                info!("Session time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    workbench.table_mut().stop_periodic();
    workbench.stop_data_log();
    scheduler.disconnect()?;
    tick_until(&mut workbench, tick, STARTUP_WAIT, |w| !w.table().is_connected()).await;
    scheduler.stop();

    report(&workbench);
    Ok(())
}

fn report(workbench: &Workbench) {
    let table = workbench.table();
    for entry in &table.group().register_entries {
        info!(
            "Register 0x{:02X}: {:02X?} ({})",
            entry.register,
            entry.data,
            if entry.status.last_success { "ok" } else { "failed" }
        );
    }
    for entry in &table.group().periodic_entries {
        if entry.error_count > 0 {
            warn!(
                "Periodic 0x{:02X}: {} NAKs, last value {:?}",
                entry.register, entry.error_count, entry.decoded
            );
        } else {
            info!(
                "Periodic 0x{:02X}: {:02X?} value {:?}",
                entry.register, entry.response, entry.decoded
            );
        }
    }
    if workbench.logger().logged_count() > 0 {
        info!("Data log holds {} rows", workbench.logger().logged_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_console::PeriodicEntry;
    use bus_transport::Transport;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bitrate, bitrate::STANDARD);
        assert_eq!(config.scheduler.idle_wait_ms, 10);
        assert_eq!(config.simulator.devices, vec![0x50]);
        assert_eq!(config.simulator.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_simulator_history_is_capped() {
        let config = SimulatorConfig {
            history_limit: 2,
            ..SimulatorConfig::default()
        };
        let mut transport = config.build();
        let handle = transport.handle();
        transport.open().unwrap();
        for _ in 0..5 {
            transport.send_byte(0x50, 0x03).unwrap();
        }
        assert_eq!(handle.history().len(), 2);
        assert_eq!(handle.op_count(), 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.tick_ms, 16);
        assert!(config.group.periodic_entries.is_empty());
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
bitrate = 400000
run_seconds = 1

[simulator]
devices = [32, 80]

[group]
name = "psu"
slave_address = 32
interval_ms = 50

[[group.periodic_entries]]
register = 139
length = 2
"#
        )
        .unwrap();

        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.bitrate, bitrate::FAST);
        assert_eq!(config.simulator.devices, vec![0x20, 0x50]);
        assert_eq!(config.group.name, "psu");
        assert_eq!(
            config.group.periodic_entries,
            vec![PeriodicEntry::read(0x8B, 2)]
        );
        assert_eq!(config.scheduler.scan_last, 0x7F);
    }

    #[tokio::test]
    async fn test_session_runs_to_completion() {
        let mut config = AppConfig::default();
        config.run_seconds = 1;
        config.group.interval_ms = 20;
        config.group.periodic_entries = vec![PeriodicEntry::read(0x00, 1)];
        run(config).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_on_empty_bus() {
        let mut config = AppConfig::default();
        config.simulator.devices = Vec::new();
        config.run_seconds = 1;
        config.group.periodic_entries = vec![PeriodicEntry::read(0x00, 1)];
        // The bridge opens with no slaves present; polling only NAKs
        run(config).await.unwrap();
    }
}
