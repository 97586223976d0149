//! Periodic Polling State

use crate::task::BatchEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A repeating poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicPlan {
    pub control_id: u32,
    pub default_slave: u8,
    pub entries: Vec<BatchEntry>,
    /// Cycle-start to cycle-start period
    pub interval_ms: u32,
}

impl PeriodicPlan {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

/// Installed plan plus the instant the next cycle may start
pub(crate) struct PeriodicSlot {
    pub plan: Option<Arc<PeriodicPlan>>,
    pub next_due: Instant,
}

impl PeriodicSlot {
    pub fn empty() -> Self {
        Self {
            plan: None,
            next_due: Instant::now(),
        }
    }

    pub fn install(&mut self, plan: PeriodicPlan) {
        self.plan = Some(Arc::new(plan));
        self.next_due = Instant::now();
    }

    /// Plan to run now, if its cycle is due
    pub fn due(&self, now: Instant) -> Option<Arc<PeriodicPlan>> {
        match &self.plan {
            Some(plan) if now >= self.next_due => Some(Arc::clone(plan)),
            _ => None,
        }
    }

    /// Schedule the cycle after one that started at `started`.
    ///
    /// Overrun cycles make the next one due immediately; missed periods
    /// are never replayed.
    pub fn finish_cycle(&mut self, plan: &Arc<PeriodicPlan>, started: Instant) {
        if let Some(current) = &self.plan {
            if Arc::ptr_eq(current, plan) {
                self.next_due = started + plan.interval();
            }
        }
    }
}
