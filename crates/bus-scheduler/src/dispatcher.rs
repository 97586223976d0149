//! Result Dispatcher

use crate::event::SchedulerEvent;
use parking_lot::Mutex;

/// Worker-to-caller event queue.
///
/// The worker appends; the caller swaps the whole queue out and
/// dispatches with no lock held.
#[derive(Default)]
pub struct CallbackQueue {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: SchedulerEvent) {
        self.events.lock().push(event);
    }

    /// Take every queued event, oldest first
    pub fn drain(&self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DisconnectReason;

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let queue = CallbackQueue::new();
        queue.push(SchedulerEvent::PeriodicCycleComplete { control_id: 1 });
        queue.push(SchedulerEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], SchedulerEvent::PeriodicCycleComplete { control_id: 1 });
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }
}
