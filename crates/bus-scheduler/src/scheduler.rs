//! Command Scheduler Implementation

use crate::dispatcher::CallbackQueue;
use crate::event::SchedulerObserver;
use crate::periodic::{PeriodicPlan, PeriodicSlot};
use crate::queue::TaskQueues;
use crate::task::{Batch, BatchEntry, Target, Task};
use crate::worker;
use crate::SchedulerError;
use bus_transport::{validate_address, Transport, MAX_SLAVE_ADDRESS, SCAN_FIRST_ADDRESS};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for the command scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest idle wait before the worker re-checks its state
    pub idle_wait_ms: u64,
    /// First address probed by a scan
    pub scan_first: u8,
    /// Last address probed by a scan
    pub scan_last: u8,
    /// Name of the worker thread
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: 10,
            scan_first: SCAN_FIRST_ADDRESS,
            scan_last: MAX_SLAVE_ADDRESS,
            thread_name: "bus-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Both scan bounds must be 7-bit addresses, in order
    pub fn validate(&self) -> Result<(), SchedulerError> {
        check_address(self.scan_first)?;
        check_address(self.scan_last)?;
        if self.scan_first > self.scan_last {
            return Err(SchedulerError::InvalidScanRange {
                first: self.scan_first,
                last: self.scan_last,
            });
        }
        Ok(())
    }
}

/// Which task queue a submission goes to
#[derive(Debug, Clone, Copy)]
enum Lane {
    Batch,
    Priority,
}

/// State shared between the owner and the worker thread
pub(crate) struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    periodic_running: AtomicBool,
    pub tasks: Mutex<TaskQueues>,
    pub wake: Condvar,
    pub periodic: Mutex<PeriodicSlot>,
    pub callbacks: CallbackQueue,
    /// Separate from the queue lock so status queries never wait on I/O
    pub device: Mutex<Box<dyn Transport>>,
    pub config: SchedulerConfig,
    epoch: Instant,
}

impl Shared {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the previous value
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::SeqCst)
    }

    pub fn clear_periodic(&self) {
        self.periodic_running.store(false, Ordering::SeqCst);
        self.periodic.lock().plan = None;
    }

    pub fn due_periodic(&self) -> Option<Arc<PeriodicPlan>> {
        if !self.periodic_running.load(Ordering::SeqCst) || !self.is_connected() {
            return None;
        }
        self.periodic.lock().due(Instant::now())
    }

    /// Idle wait, shortened so a pending periodic cycle starts on time
    pub fn idle_wait(&self) -> Duration {
        let idle = Duration::from_millis(self.config.idle_wait_ms.max(1));
        if !self.periodic_running.load(Ordering::SeqCst) || !self.is_connected() {
            return idle;
        }
        let slot = self.periodic.lock();
        match slot.plan {
            Some(_) => idle.min(slot.next_due.saturating_duration_since(Instant::now())),
            None => idle,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Wake the worker; taking the lock first means it cannot miss the signal
    pub fn notify(&self) {
        let _tasks = self.tasks.lock();
        self.wake.notify_all();
    }
}

/// Owner of the bus worker thread.
///
/// Every submission returns immediately; results arrive as events on the
/// thread that calls [`process_callbacks`](Self::process_callbacks).
pub struct CommandScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandScheduler {
    /// Spawn the worker thread around `transport`
    pub fn start<T: Transport + 'static>(
        transport: T,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        info!("Starting command scheduler with config: {:?}", config);
        config.validate()?;

        let thread_name = config.thread_name.clone();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            periodic_running: AtomicBool::new(false),
            tasks: Mutex::new(TaskQueues::new()),
            wake: Condvar::new(),
            periodic: Mutex::new(PeriodicSlot::empty()),
            callbacks: CallbackQueue::new(),
            device: Mutex::new(Box::new(transport)),
            config,
            epoch: Instant::now(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker::run(worker_shared))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Stop the worker, drop queued work and close the transport.
    ///
    /// No transport call is in flight once this returns.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        info!("Stopping command scheduler");
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.clear_periodic();
        self.shared.notify();

        if handle.join().is_err() {
            warn!("Scheduler worker panicked");
        }

        self.shared.device.lock().close();
        self.shared.set_connected(false);
        let dropped = self.shared.tasks.lock().clear();
        if dropped > 0 {
            debug!("Dropped {} queued tasks on stop", dropped);
        }
    }

    fn submit(&self, task: Task, lane: Lane) -> Result<(), SchedulerError> {
        if !self.shared.is_running() {
            return Err(SchedulerError::Stopped);
        }
        debug!("Queueing {} task ({:?})", task.name(), lane);
        {
            let mut tasks = self.shared.tasks.lock();
            match lane {
                Lane::Batch => tasks.push_batch(task),
                Lane::Priority => tasks.push_priority(task),
            }
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    fn target(
        slave: u8,
        register: u8,
        control_id: u32,
        command_id: u32,
    ) -> Result<Target, SchedulerError> {
        check_address(slave)?;
        Ok(Target {
            slave,
            register,
            control_id,
            command_id,
        })
    }

    fn batch(
        control_id: u32,
        default_slave: u8,
        entries: Vec<BatchEntry>,
    ) -> Result<Batch, SchedulerError> {
        let batch = Batch {
            control_id,
            default_slave,
            entries,
        };
        batch.addresses().try_for_each(check_address)?;
        Ok(batch)
    }

    /// Open and configure the bridge
    pub fn connect(&self, bitrate: u32) -> Result<(), SchedulerError> {
        self.submit(Task::Connect { bitrate }, Lane::Batch)
    }

    /// Close the bridge and stop periodic polling
    pub fn disconnect(&self) -> Result<(), SchedulerError> {
        self.submit(Task::Disconnect, Lane::Batch)
    }

    /// Probe the configured address range
    pub fn scan_bus(&self) -> Result<(), SchedulerError> {
        self.submit(Task::ScanBus, Lane::Batch)
    }

    /// Queue a read of `length` bytes behind earlier batch work
    pub fn read_register(
        &self,
        slave: u8,
        register: u8,
        length: u16,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, register, control_id, command_id)?;
        self.submit(Task::ReadRegister { target, length }, Lane::Batch)
    }

    /// Queue a write behind earlier batch work
    pub fn write_register(
        &self,
        slave: u8,
        register: u8,
        data: Vec<u8>,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, register, control_id, command_id)?;
        self.submit(Task::WriteRegister { target, data }, Lane::Batch)
    }

    /// Queue a single command byte behind earlier batch work
    pub fn send_command(
        &self,
        slave: u8,
        command: u8,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, command, control_id, command_id)?;
        self.submit(Task::SendCommand { target }, Lane::Batch)
    }

    /// Read every enabled entry; results carry the entry index as command id
    pub fn read_all_registers(
        &self,
        control_id: u32,
        default_slave: u8,
        entries: Vec<BatchEntry>,
    ) -> Result<(), SchedulerError> {
        let batch = Self::batch(control_id, default_slave, entries)?;
        self.submit(Task::ReadAllRegisters(batch), Lane::Batch)
    }

    /// Run every enabled entry with its own kind and delay
    pub fn execute_all_single(
        &self,
        control_id: u32,
        default_slave: u8,
        entries: Vec<BatchEntry>,
    ) -> Result<(), SchedulerError> {
        let batch = Self::batch(control_id, default_slave, entries)?;
        self.submit(Task::ExecuteAllSingle(batch), Lane::Batch)
    }

    /// Read ahead of all batch and periodic work
    pub fn insert_single_read(
        &self,
        slave: u8,
        register: u8,
        length: u16,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, register, control_id, command_id)?;
        self.submit(Task::ReadRegister { target, length }, Lane::Priority)
    }

    /// Write ahead of all batch and periodic work
    pub fn insert_single_write(
        &self,
        slave: u8,
        register: u8,
        data: Vec<u8>,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, register, control_id, command_id)?;
        self.submit(Task::WriteRegister { target, data }, Lane::Priority)
    }

    /// Send a command byte ahead of all batch and periodic work
    pub fn insert_single_command(
        &self,
        slave: u8,
        command: u8,
        control_id: u32,
        command_id: u32,
    ) -> Result<(), SchedulerError> {
        let target = Self::target(slave, command, control_id, command_id)?;
        self.submit(Task::SendCommand { target }, Lane::Priority)
    }

    /// Install a poll cycle; it runs whenever the device is connected
    pub fn start_periodic(&self, plan: PeriodicPlan) -> Result<(), SchedulerError> {
        if !self.shared.is_running() {
            return Err(SchedulerError::Stopped);
        }
        let batch = Self::batch(plan.control_id, plan.default_slave, plan.entries)?;
        let plan = PeriodicPlan {
            control_id: batch.control_id,
            default_slave: batch.default_slave,
            entries: batch.entries,
            interval_ms: plan.interval_ms,
        };

        info!(
            "Starting periodic execution: {} entries every {} ms",
            plan.entries.len(),
            plan.interval_ms
        );
        self.shared.periodic.lock().install(plan);
        self.shared.periodic_running.store(true, Ordering::SeqCst);
        self.shared.notify();
        Ok(())
    }

    /// Stop future cycles; a cycle already running finishes
    pub fn stop_periodic(&self) {
        if self.shared.periodic_running.load(Ordering::SeqCst) {
            info!("Stopping periodic execution");
            self.shared.clear_periodic();
        }
    }

    /// Dispatch every queued event to `observer`, in completion order.
    ///
    /// Call from the thread that owns the observer's state. Returns the
    /// number of events dispatched.
    pub fn process_callbacks<O: SchedulerObserver + ?Sized>(&self, observer: &mut O) -> usize {
        let events = self.shared.callbacks.drain();
        let count = events.len();
        for event in events {
            event.dispatch(observer);
        }
        count
    }

    /// Whether the last connect succeeded and the link has not dropped since
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Whether a poll plan is installed
    pub fn is_periodic_running(&self) -> bool {
        self.shared.periodic_running.load(Ordering::SeqCst)
    }

    /// (priority, batch) queue lengths
    pub fn pending_tasks(&self) -> (usize, usize) {
        self.shared.tasks.lock().lens()
    }
}

impl Drop for CommandScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_address(slave: u8) -> Result<(), SchedulerError> {
    validate_address(slave)
        .map(|_| ())
        .map_err(|_| SchedulerError::InvalidAddress(slave))
}
