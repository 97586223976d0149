//! Results and Events
//!
//! Everything the worker reports travels as a [`SchedulerEvent`] value.
//! Observers only ever see events on the thread that calls
//! `process_callbacks`, never on the worker.

use bus_transport::{BusError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Outcome of one bus transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePacket {
    pub control_id: u32,
    pub command_id: u32,
    /// Milliseconds since the scheduler started (monotonic)
    pub timestamp_ms: u64,
    pub success: bool,
    pub error_kind: ErrorKind,
    /// Bytes read; empty for writes and commands
    pub data: Vec<u8>,
    pub error_message: Option<String>,
}

impl ResponsePacket {
    /// Build a packet from a transport result
    pub fn from_result(
        control_id: u32,
        command_id: u32,
        timestamp_ms: u64,
        result: Result<Vec<u8>, BusError>,
        error_message: Option<String>,
    ) -> Self {
        let error_kind = ErrorKind::from_result(&result);
        let (success, data) = match result {
            Ok(data) => (true, data),
            Err(_) => (false, Vec::new()),
        };
        Self {
            control_id,
            command_id,
            timestamp_ms,
            success,
            error_kind,
            data,
            error_message,
        }
    }
}

/// Why the link went down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// An explicit disconnect request
    Requested,
    /// A transaction reported the device as gone
    LinkLost,
}

/// One queued notification for the caller thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Connected {
        success: bool,
        device_label: String,
        error: Option<String>,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    ScanComplete {
        success: bool,
        addresses: Vec<u8>,
        error: Option<String>,
    },
    Result(ResponsePacket),
    /// A periodic cycle ran every enabled entry
    PeriodicCycleComplete {
        control_id: u32,
    },
}

impl SchedulerEvent {
    /// Invoke the matching observer method
    pub fn dispatch<O: SchedulerObserver + ?Sized>(self, observer: &mut O) {
        match self {
            SchedulerEvent::Connected {
                success,
                device_label,
                error,
            } => observer.on_connect(success, &device_label, error.as_deref()),
            SchedulerEvent::Disconnected { reason } => observer.on_disconnect(reason),
            SchedulerEvent::ScanComplete {
                success,
                addresses,
                error,
            } => observer.on_scan_complete(success, &addresses, error.as_deref()),
            SchedulerEvent::Result(packet) => observer.on_result(&packet),
            SchedulerEvent::PeriodicCycleComplete { control_id } => {
                observer.on_periodic_cycle(control_id)
            }
        }
    }
}

/// Receiver of scheduler notifications, called on the draining thread
pub trait SchedulerObserver {
    fn on_connect(&mut self, success: bool, device_label: &str, error: Option<&str>);

    fn on_disconnect(&mut self, reason: DisconnectReason);

    fn on_scan_complete(&mut self, success: bool, addresses: &[u8], error: Option<&str>);

    /// Fires once per transaction, including each sub-entry of bulk and periodic work
    fn on_result(&mut self, packet: &ResponsePacket);

    fn on_periodic_cycle(&mut self, _control_id: u32) {}
}

/// Collects events verbatim
impl SchedulerObserver for Vec<SchedulerEvent> {
    fn on_connect(&mut self, success: bool, device_label: &str, error: Option<&str>) {
        self.push(SchedulerEvent::Connected {
            success,
            device_label: device_label.to_string(),
            error: error.map(str::to_string),
        });
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.push(SchedulerEvent::Disconnected { reason });
    }

    fn on_scan_complete(&mut self, success: bool, addresses: &[u8], error: Option<&str>) {
        self.push(SchedulerEvent::ScanComplete {
            success,
            addresses: addresses.to_vec(),
            error: error.map(str::to_string),
        });
    }

    fn on_result(&mut self, packet: &ResponsePacket) {
        self.push(SchedulerEvent::Result(packet.clone()));
    }

    fn on_periodic_cycle(&mut self, control_id: u32) {
        self.push(SchedulerEvent::PeriodicCycleComplete { control_id });
    }
}
