//! Worker Loop
//!
//! The only code that touches the transport. Each iteration runs one
//! priority task, else one batch task, else one due periodic cycle, else
//! waits briefly on the task condition variable. Bulk tasks and periodic
//! cycles drain the priority queue before every sub-entry.

use crate::event::{DisconnectReason, ResponsePacket, SchedulerEvent};
use crate::periodic::PeriodicPlan;
use crate::scheduler::Shared;
use crate::task::{Batch, BatchEntry, CommandKind, Target, Task};
use bus_transport::{BusError, ErrorKind, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A single bus operation
enum Op<'a> {
    Read(u16),
    Write(&'a [u8]),
    Command,
}

/// Whether a sub-entry loop may continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    LinkLost,
}

pub(crate) fn run(shared: Arc<Shared>) {
    info!("Scheduler worker started");

    while shared.is_running() {
        let task = shared.tasks.lock().next(shared.is_connected());
        if let Some(task) = task {
            execute(&shared, task);
            continue;
        }

        if let Some(plan) = shared.due_periodic() {
            run_cycle(&shared, &plan);
            continue;
        }

        let wait = shared.idle_wait();
        let mut tasks = shared.tasks.lock();
        if shared.is_running() && !tasks.has_runnable(shared.is_connected()) {
            shared.wake.wait_for(&mut tasks, wait);
        }
    }

    info!("Scheduler worker stopped");
}

fn execute(shared: &Shared, task: Task) {
    debug!("Executing {} task", task.name());
    match task {
        Task::Connect { bitrate } => connect(shared, bitrate),
        Task::Disconnect => disconnect(shared),
        Task::ScanBus => scan(shared),
        Task::ReadRegister { target, length } => {
            transact(shared, target, Op::Read(length));
        }
        Task::WriteRegister { target, data } => {
            transact(shared, target, Op::Write(&data));
        }
        Task::SendCommand { target } => {
            transact(shared, target, Op::Command);
        }
        Task::ReadAllRegisters(batch) => run_batch(shared, &batch, true),
        Task::ExecuteAllSingle(batch) => run_batch(shared, &batch, false),
    }
}

fn connect(shared: &Shared, bitrate: u32) {
    let (success, device_label, error) = {
        let mut device = shared.device.lock();
        match device.open() {
            Ok(label) => match device.configure(bitrate) {
                Ok(()) => (true, label, None),
                Err(e) => {
                    let message = failure_message(&**device, &e);
                    device.close();
                    (false, label, Some(message))
                }
            },
            Err(e) => (false, String::new(), Some(failure_message(&**device, &e))),
        }
    };

    shared.set_connected(success);
    if success {
        info!("Connected to {} at {} Hz", device_label, bitrate);
    } else {
        warn!("Connect failed: {}", error.as_deref().unwrap_or("unknown error"));
    }
    shared.callbacks.push(SchedulerEvent::Connected {
        success,
        device_label,
        error,
    });
}

/// A redundant request still reports once but leaves any installed plan alone
fn disconnect(shared: &Shared) {
    shared.device.lock().close();
    if shared.set_connected(false) {
        shared.clear_periodic();
    }
    info!("Disconnected on request");
    shared.callbacks.push(SchedulerEvent::Disconnected {
        reason: DisconnectReason::Requested,
    });
}

fn scan(shared: &Shared) {
    let (first, last) = (shared.config.scan_first, shared.config.scan_last);
    let (result, message) = {
        let mut device = shared.device.lock();
        let result = device.scan(first, last);
        let message = result
            .as_ref()
            .err()
            .map(|e| failure_message(&**device, e));
        (result, message)
    };

    let link_lost = matches!(&result, Err(e) if e.is_link_lost());
    let event = match result {
        Ok(addresses) => {
            info!("Scan found {} devices", addresses.len());
            SchedulerEvent::ScanComplete {
                success: true,
                addresses,
                error: None,
            }
        }
        Err(_) => SchedulerEvent::ScanComplete {
            success: false,
            addresses: Vec::new(),
            error: message,
        },
    };
    shared.callbacks.push(event);

    if link_lost {
        handle_link_lost(shared);
    }
}

/// Run one operation, queue its result, recover if the link died
fn transact(shared: &Shared, target: Target, op: Op<'_>) -> Flow {
    let timestamp_ms = shared.timestamp_ms();
    let (result, message) = {
        let mut device = shared.device.lock();
        let result = match op {
            Op::Read(length) => device.read(target.slave, target.register, length),
            Op::Write(data) => device
                .write(target.slave, target.register, data)
                .map(|_| Vec::new()),
            Op::Command => device
                .send_byte(target.slave, target.register)
                .map(|_| Vec::new()),
        };
        let message = result
            .as_ref()
            .err()
            .map(|e| failure_message(&**device, e));
        (result, message)
    };

    let packet = ResponsePacket::from_result(
        target.control_id,
        target.command_id,
        timestamp_ms,
        result,
        message,
    );
    metrics::counter!("bus_transactions_total", "outcome" => packet.error_kind.as_str())
        .increment(1);

    if !packet.success {
        warn!(
            "Transaction on 0x{:02X}/0x{:02X} failed: {}",
            target.slave,
            target.register,
            packet.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    let link_lost = packet.error_kind == ErrorKind::DeviceDisconnected;
    shared.callbacks.push(SchedulerEvent::Result(packet));

    if link_lost {
        handle_link_lost(shared);
        Flow::LinkLost
    } else {
        Flow::Continue
    }
}

/// Run every queued priority task, stopping early if the link drops
fn drain_priority(shared: &Shared) {
    while shared.is_connected() {
        let Some(task) = shared.tasks.lock().pop_priority() else {
            break;
        };
        execute(shared, task);
    }
}

/// Drain priority work, then run one entry. `None` means the loop must stop.
fn step(
    shared: &Shared,
    default_slave: u8,
    control_id: u32,
    index: usize,
    entry: &BatchEntry,
    reads_only: bool,
) -> Option<Flow> {
    drain_priority(shared);
    if !shared.is_connected() || !shared.is_running() {
        return None;
    }
    if !entry.enabled {
        return Some(Flow::Continue);
    }

    let target = Target {
        slave: entry.slave_for(default_slave),
        register: entry.register,
        control_id,
        command_id: index as u32,
    };
    let op = match (reads_only, entry.kind) {
        (true, _) | (false, CommandKind::Read) => Op::Read(entry.length),
        (false, CommandKind::Write) => Op::Write(&entry.data),
        (false, CommandKind::SendCommand) => Op::Command,
    };

    let flow = transact(shared, target, op);
    if flow == Flow::Continue && entry.delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(u64::from(entry.delay_ms)));
    }
    Some(flow)
}

fn run_batch(shared: &Shared, batch: &Batch, reads_only: bool) {
    for (index, entry) in batch.entries.iter().enumerate() {
        match step(shared, batch.default_slave, batch.control_id, index, entry, reads_only) {
            Some(Flow::Continue) => {}
            Some(Flow::LinkLost) | None => {
                debug!("Batch {} aborted at entry {}", batch.control_id, index);
                return;
            }
        }
    }
}

fn run_cycle(shared: &Shared, plan: &Arc<PeriodicPlan>) {
    let started = Instant::now();

    for (index, entry) in plan.entries.iter().enumerate() {
        match step(shared, plan.default_slave, plan.control_id, index, entry, false) {
            Some(Flow::Continue) => {}
            Some(Flow::LinkLost) | None => {
                debug!("Periodic cycle aborted at entry {}", index);
                return;
            }
        }
    }

    shared.periodic.lock().finish_cycle(plan, started);
    shared.callbacks.push(SchedulerEvent::PeriodicCycleComplete {
        control_id: plan.control_id,
    });
}

/// Close the handle, leave periodic mode and drop all queued work.
///
/// Safe to call repeatedly; only the first call after a connected
/// session reports the loss.
pub(crate) fn handle_link_lost(shared: &Shared) {
    shared.device.lock().close();
    let was_connected = shared.set_connected(false);
    shared.clear_periodic();
    let dropped = shared.tasks.lock().clear();

    if was_connected {
        warn!("Device disconnected, dropped {} queued tasks", dropped);
        metrics::counter!("bus_link_lost_total").increment(1);
        shared.callbacks.push(SchedulerEvent::Disconnected {
            reason: DisconnectReason::LinkLost,
        });
    }
}

fn failure_message(device: &dyn Transport, err: &BusError) -> String {
    device.last_error().unwrap_or_else(|| err.to_string())
}
