//! Simulated Bus
//!
//! An in-memory bus with a 256-byte register file per device. The
//! transport half is moved into the scheduler's worker thread; the
//! [`SimulatorHandle`] half stays with the test or demo and can unplug
//! the link, force NAKs, inject raw driver faults, add latency, or hold
//! every transaction until released.

use crate::error::BusError;
use crate::transport::Transport;
use crate::validate_address;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const REGISTER_FILE_SIZE: usize = 256;
const HOLD_POLL: Duration = Duration::from_millis(1);

/// Transactions kept in the history ring unless changed
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// One transaction as seen by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Read { slave: u8, register: u8, length: u16 },
    Write { slave: u8, register: u8, data: Vec<u8> },
    SendByte { slave: u8, value: u8 },
    Scan { first: u8, last: u8 },
}

/// Registers power up holding their own address
fn fresh_register_file() -> Vec<u8> {
    (0..REGISTER_FILE_SIZE).map(|r| r as u8).collect()
}

struct BusState {
    devices: BTreeMap<u8, Vec<u8>>,
    nak: BTreeSet<u8>,
    faults: BTreeMap<u8, i32>,
    link_up: bool,
    open_fails: bool,
    latency: Duration,
    history: VecDeque<(Instant, BusOp)>,
    history_limit: usize,
    op_count: usize,
}

impl BusState {
    fn new(devices: &[u8]) -> Self {
        let devices = devices
            .iter()
            .map(|&addr| (addr, fresh_register_file()))
            .collect();
        Self {
            devices,
            nak: BTreeSet::new(),
            faults: BTreeMap::new(),
            link_up: true,
            open_fails: false,
            latency: Duration::ZERO,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            op_count: 0,
        }
    }

    /// Append to the history ring, evicting the oldest entries past the limit
    fn record(&mut self, op: BusOp) {
        self.op_count += 1;
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back((Instant::now(), op));
    }

    fn responds(&self, slave: u8) -> bool {
        self.devices.contains_key(&slave) && !self.nak.contains(&slave)
    }

    /// Link and fault checks shared by every addressed transaction
    fn addressed(&mut self, slave: u8) -> Result<&mut Vec<u8>, BusError> {
        if !self.link_up {
            return Err(BusError::NotConnected);
        }
        if let Some(&code) = self.faults.get(&slave) {
            return Err(BusError::from_status(code, slave));
        }
        if !self.responds(slave) {
            return Err(BusError::NoAcknowledge { slave });
        }
        self.devices
            .get_mut(&slave)
            .ok_or(BusError::NoAcknowledge { slave })
    }
}

/// Control side of a simulated bus
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<BusState>>,
    held: Arc<AtomicBool>,
}

impl SimulatorHandle {
    /// Attach a device with a fresh register file
    pub fn add_device(&self, slave: u8) {
        self.state
            .lock()
            .devices
            .entry(slave)
            .or_insert_with(fresh_register_file);
    }

    /// Detach a device; it will NAK from now on
    pub fn remove_device(&self, slave: u8) {
        self.state.lock().devices.remove(&slave);
    }

    /// Force a present device to NAK (or stop forcing it)
    pub fn set_nak(&self, slave: u8, nak: bool) {
        let mut state = self.state.lock();
        if nak {
            state.nak.insert(slave);
        } else {
            state.nak.remove(&slave);
        }
    }

    /// Make every transaction to `slave` fail with a raw driver status
    pub fn inject_status(&self, slave: u8, code: i32) {
        self.state.lock().faults.insert(slave, code);
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, slave: u8) {
        self.state.lock().faults.remove(&slave);
    }

    /// Unplug the bridge
    pub fn sever_link(&self) {
        info!("Simulated bus: link severed");
        self.state.lock().link_up = false;
    }

    /// Plug the bridge back in
    pub fn restore_link(&self) {
        info!("Simulated bus: link restored");
        self.state.lock().link_up = true;
    }

    /// Make `open()` fail
    pub fn set_open_fails(&self, fails: bool) {
        self.state.lock().open_fails = fails;
    }

    /// Per-transaction latency
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Block every transaction until [`release`](Self::release)
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let held transactions proceed
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    /// Current contents of one register
    pub fn register(&self, slave: u8, register: u8) -> Option<u8> {
        self.state
            .lock()
            .devices
            .get(&slave)
            .map(|regs| regs[register as usize])
    }

    /// Overwrite registers directly, bypassing the bus
    pub fn poke(&self, slave: u8, register: u8, data: &[u8]) {
        if let Some(regs) = self.state.lock().devices.get_mut(&slave) {
            for (i, byte) in data.iter().enumerate() {
                regs[register.wrapping_add(i as u8) as usize] = *byte;
            }
        }
    }

    /// Cap the history ring; 0 disables recording
    pub fn set_history_limit(&self, limit: usize) {
        let mut state = self.state.lock();
        state.history_limit = limit;
        while state.history.len() > limit {
            state.history.pop_front();
        }
    }

    /// Most recent transactions, oldest first
    pub fn history(&self) -> Vec<BusOp> {
        self.state.lock().history.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Every transaction with the instant it reached the bus
    pub fn timed_history(&self) -> Vec<(Instant, BusOp)> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Number of transactions attempted so far, recorded or not
    pub fn op_count(&self) -> usize {
        self.state.lock().op_count
    }
}

/// Transport side of a simulated bus
pub struct SimulatedTransport {
    state: Arc<Mutex<BusState>>,
    held: Arc<AtomicBool>,
    open: bool,
    label: String,
    last_error: Option<String>,
}

impl SimulatedTransport {
    /// Create a bus with the given devices present
    pub fn new(devices: &[u8]) -> Self {
        info!("Creating simulated bus with {} devices", devices.len());
        Self {
            state: Arc::new(Mutex::new(BusState::new(devices))),
            held: Arc::new(AtomicBool::new(false)),
            open: false,
            label: "SIM-CP2112/0001".to_string(),
            last_error: None,
        }
    }

    /// Get a control handle sharing this bus
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
            held: Arc::clone(&self.held),
        }
    }

    fn transact<T>(
        &mut self,
        op: BusOp,
        f: impl FnOnce(&mut BusState) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        while self.held.load(Ordering::SeqCst) {
            std::thread::sleep(HOLD_POLL);
        }
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let result = if self.open {
            let mut state = self.state.lock();
            state.record(op);
            f(&mut *state)
        } else {
            Err(BusError::NotOpen)
        };

        if let Err(e) = &result {
            debug!("Simulated transaction failed: {}", e);
            self.last_error = Some(e.to_string());
        }
        result
    }

    /// Reject an address before it reaches the bus
    fn check_address(&mut self, slave: u8) -> Result<(), BusError> {
        validate_address(slave).map(|_| ()).map_err(|e| {
            self.last_error = Some(e.to_string());
            e
        })
    }
}

impl Transport for SimulatedTransport {
    fn open(&mut self) -> Result<String, BusError> {
        if self.open {
            self.close();
        }
        let unavailable = {
            let state = self.state.lock();
            state.open_fails || !state.link_up
        };
        if unavailable {
            let err = BusError::OpenFailed("no bridge found".to_string());
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        self.open = true;
        Ok(self.label.clone())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn configure(&mut self, bitrate: u32) -> Result<(), BusError> {
        if !self.open {
            self.last_error = Some(BusError::NotOpen.to_string());
            return Err(BusError::NotOpen);
        }
        if bitrate == 0 {
            let err = BusError::ConfigureFailed("bitrate must be non-zero".to_string());
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        debug!("Simulated bus clock set to {} Hz", bitrate);
        Ok(())
    }

    fn read(&mut self, slave: u8, register: u8, length: u16) -> Result<Vec<u8>, BusError> {
        self.check_address(slave)?;
        self.transact(BusOp::Read { slave, register, length }, |state| {
            let regs = state.addressed(slave)?;
            Ok((0..length)
                .map(|i| regs[register.wrapping_add(i as u8) as usize])
                .collect())
        })
    }

    fn write(&mut self, slave: u8, register: u8, data: &[u8]) -> Result<usize, BusError> {
        self.check_address(slave)?;
        let op = BusOp::Write {
            slave,
            register,
            data: data.to_vec(),
        };
        self.transact(op, |state| {
            let regs = state.addressed(slave)?;
            for (i, byte) in data.iter().enumerate() {
                regs[register.wrapping_add(i as u8) as usize] = *byte;
            }
            Ok(data.len() + 1)
        })
    }

    fn send_byte(&mut self, slave: u8, value: u8) -> Result<usize, BusError> {
        self.check_address(slave)?;
        self.transact(BusOp::SendByte { slave, value }, |state| {
            state.addressed(slave)?;
            Ok(1)
        })
    }

    fn scan(&mut self, first: u8, last: u8) -> Result<Vec<u8>, BusError> {
        self.check_address(first)?;
        self.check_address(last)?;
        self.transact(BusOp::Scan { first, last }, |state| {
            if !state.link_up {
                return Err(BusError::NotConnected);
            }
            Ok((first..=last).filter(|&addr| state.responds(addr)).collect())
        })
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::DEVICE_NOT_CONNECTED;

    fn opened(devices: &[u8]) -> (SimulatedTransport, SimulatorHandle) {
        let mut bus = SimulatedTransport::new(devices);
        let handle = bus.handle();
        bus.open().unwrap();
        (bus, handle)
    }

    #[test]
    fn test_write_then_read() {
        let (mut bus, _) = opened(&[0x50]);
        bus.write(0x50, 0x10, &[0xAB, 0xCD]).unwrap();
        assert_eq!(bus.read(0x50, 0x10, 2).unwrap(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_register_window_wraps() {
        let (mut bus, handle) = opened(&[0x50]);
        bus.write(0x50, 0xFF, &[0x01, 0x02]).unwrap();
        assert_eq!(handle.register(0x50, 0xFF), Some(0x01));
        assert_eq!(handle.register(0x50, 0x00), Some(0x02));
    }

    #[test]
    fn test_absent_device_naks() {
        let (mut bus, _) = opened(&[0x50]);
        assert_eq!(
            bus.read(0x51, 0x00, 1),
            Err(BusError::NoAcknowledge { slave: 0x51 })
        );
        assert!(bus.last_error().unwrap().contains("0x51"));
    }

    #[test]
    fn test_forced_nak_and_fault() {
        let (mut bus, handle) = opened(&[0x50, 0x60]);
        handle.set_nak(0x50, true);
        assert!(matches!(bus.send_byte(0x50, 0x03), Err(BusError::NoAcknowledge { .. })));
        handle.inject_status(0x60, -9);
        assert_eq!(bus.send_byte(0x60, 0x03), Err(BusError::Status(-9)));
        handle.inject_status(0x60, DEVICE_NOT_CONNECTED);
        assert_eq!(bus.send_byte(0x60, 0x03), Err(BusError::NotConnected));
    }

    #[test]
    fn test_severed_link() {
        let (mut bus, handle) = opened(&[0x50]);
        handle.sever_link();
        assert_eq!(bus.read(0x50, 0, 1), Err(BusError::NotConnected));
        assert_eq!(bus.scan(0x02, 0x7F), Err(BusError::NotConnected));
        bus.close();
        assert!(bus.open().is_err());
        handle.restore_link();
        assert!(bus.open().is_ok());
    }

    #[test]
    fn test_closed_handle() {
        let mut bus = SimulatedTransport::new(&[0x50]);
        assert_eq!(bus.read(0x50, 0, 1), Err(BusError::NotOpen));
        assert_eq!(bus.configure(100_000), Err(BusError::NotOpen));
    }

    #[test]
    fn test_scan_and_history() {
        let (mut bus, handle) = opened(&[0x20, 0x50, 0x7F]);
        handle.set_nak(0x7F, true);
        assert_eq!(bus.scan(0x02, 0x7F).unwrap(), vec![0x20, 0x50]);
        assert_eq!(handle.history(), vec![BusOp::Scan { first: 0x02, last: 0x7F }]);
    }

    #[test]
    fn test_invalid_address_never_reaches_bus() {
        let (mut bus, handle) = opened(&[0x50]);
        assert_eq!(bus.read(0x80, 0, 1), Err(BusError::InvalidAddress(0x80)));
        assert_eq!(handle.op_count(), 0);
    }

    #[test]
    fn test_invalid_address_replaces_last_error() {
        let (mut bus, _) = opened(&[0x50]);
        assert!(bus.read(0x51, 0x00, 1).is_err());
        assert_eq!(bus.scan(0x02, 0x80), Err(BusError::InvalidAddress(0x80)));
        let message = bus.last_error().unwrap();
        assert_eq!(message, BusError::InvalidAddress(0x80).to_string());
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let (mut bus, handle) = opened(&[0x50]);
        handle.set_history_limit(3);
        for register in 0..10u8 {
            bus.write(0x50, register, &[register]).unwrap();
        }
        let history = handle.history();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history[0],
            BusOp::Write { slave: 0x50, register: 7, data: vec![7] }
        );
        assert_eq!(handle.op_count(), 10);

        handle.set_history_limit(0);
        bus.send_byte(0x50, 0x03).unwrap();
        assert!(handle.history().is_empty());
        assert_eq!(handle.op_count(), 11);
    }
}
