//! Task Queues
//!
//! Two FIFOs behind one lock: priority and batch. Sharing the lock lets
//! the worker pick by priority and the disconnect path clear both in one
//! step.

use crate::task::Task;
use std::collections::VecDeque;

/// Pending worker tasks, split by traffic class
#[derive(Debug, Default)]
pub struct TaskQueues {
    priority: VecDeque<Task>,
    batch: VecDeque<Task>,
}

impl TaskQueues {
    /// Create empty queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the normal FIFO
    pub fn push_batch(&mut self, task: Task) {
        self.batch.push_back(task);
    }

    /// Append to the FIFO served ahead of everything else
    pub fn push_priority(&mut self, task: Task) {
        self.priority.push_back(task);
    }

    /// Take the oldest priority task, if any
    pub fn pop_priority(&mut self) -> Option<Task> {
        self.priority.pop_front()
    }

    /// Next task the worker may run.
    ///
    /// Connected: priority first, then batch. Disconnected: only the
    /// oldest lifecycle task; bus work stays queued for the next session.
    pub fn next(&mut self, connected: bool) -> Option<Task> {
        if connected {
            self.priority
                .pop_front()
                .or_else(|| self.batch.pop_front())
        } else {
            let index = self.batch.iter().position(Task::is_lifecycle)?;
            self.batch.remove(index)
        }
    }

    /// Whether [`next`](Self::next) would return a task
    pub fn has_runnable(&self, connected: bool) -> bool {
        if connected {
            !self.priority.is_empty() || !self.batch.is_empty()
        } else {
            self.batch.iter().any(Task::is_lifecycle)
        }
    }

    /// Drop everything; returns how many tasks were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.priority.len() + self.batch.len();
        self.priority = VecDeque::new();
        self.batch = VecDeque::new();
        dropped
    }

    /// (priority, batch) lengths
    pub fn lens(&self) -> (usize, usize) {
        (self.priority.len(), self.batch.len())
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.batch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Target;
    use proptest::prelude::*;

    fn read(command_id: u32) -> Task {
        Task::ReadRegister {
            target: Target {
                slave: 0x50,
                register: 0,
                control_id: 0,
                command_id,
            },
            length: 1,
        }
    }

    fn command_id(task: &Task) -> u32 {
        match task {
            Task::ReadRegister { target, .. } => target.command_id,
            _ => u32::MAX,
        }
    }

    #[test]
    fn test_disconnected_only_yields_lifecycle() {
        let mut queues = TaskQueues::new();
        queues.push_batch(read(1));
        queues.push_priority(read(2));
        queues.push_batch(Task::Connect { bitrate: 100_000 });
        queues.push_batch(read(3));

        assert!(queues.has_runnable(false));
        assert_eq!(queues.next(false), Some(Task::Connect { bitrate: 100_000 }));
        assert!(!queues.has_runnable(false));
        assert_eq!(queues.next(false), None);

        // After connecting the parked work drains in order
        assert_eq!(queues.next(true).as_ref().map(command_id), Some(2));
        assert_eq!(queues.next(true).as_ref().map(command_id), Some(1));
        assert_eq!(queues.next(true).as_ref().map(command_id), Some(3));
        assert!(queues.is_empty());
    }

    #[test]
    fn test_clear_counts() {
        let mut queues = TaskQueues::new();
        queues.push_batch(read(1));
        queues.push_priority(read(2));
        assert_eq!(queues.lens(), (1, 1));
        assert_eq!(queues.clear(), 2);
        assert_eq!(queues.lens(), (0, 0));
    }

    proptest! {
        /// Priority work always comes out before batch work, each lane FIFO
        #[test]
        fn priority_lane_drains_first(lanes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut queues = TaskQueues::new();
            for (id, priority) in lanes.iter().enumerate() {
                if *priority {
                    queues.push_priority(read(id as u32));
                } else {
                    queues.push_batch(read(id as u32));
                }
            }

            let mut order = Vec::new();
            while let Some(task) = queues.next(true) {
                order.push(command_id(&task));
            }

            let expected: Vec<u32> = lanes.iter().enumerate()
                .filter(|(_, p)| **p).map(|(i, _)| i as u32)
                .chain(lanes.iter().enumerate().filter(|(_, p)| !**p).map(|(i, _)| i as u32))
                .collect();
            prop_assert_eq!(order, expected);
        }
    }
}
