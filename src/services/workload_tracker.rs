//! Per-agent in-flight counters.
//!
//! Counters are only ever touched under a single mutex, so reads and updates
//! are linearizable. The router is the only caller that increments; the
//! dispatcher releases the slot through [`SlotReservation`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Default)]
pub struct WorkloadTracker {
    counters: Mutex<HashMap<String, usize>>,
}

impl WorkloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current in-flight count for an agent (0 if never seen).
    pub fn load(&self, agent_id: &str) -> usize {
        self.counters.lock().get(agent_id).copied().unwrap_or(0)
    }

    /// Unconditionally add one in-flight task; returns the new count.
    pub fn increment(&self, agent_id: &str) -> usize {
        let mut counters = self.counters.lock();
        let count = counters.entry(agent_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Add one in-flight task only if the agent is below `max`.
    pub fn try_increment(&self, agent_id: &str, max: usize) -> bool {
        let mut counters = self.counters.lock();
        let count = counters.entry(agent_id.to_string()).or_insert(0);
        if *count >= max {
            return false;
        }
        *count += 1;
        true
    }

    /// Remove one in-flight task; returns the new count.
    ///
    /// A decrement at zero is a bookkeeping bug elsewhere. It panics in debug
    /// builds and is logged and clamped in release builds.
    pub fn decrement(&self, agent_id: &str) -> usize {
        let mut counters = self.counters.lock();
        match counters.get_mut(agent_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count
            }
            _ => {
                drop(counters);
                error!(agent_id, "workload decrement below zero");
                if cfg!(debug_assertions) {
                    panic!("workload decrement below zero for agent {agent_id}");
                }
                0
            }
        }
    }

    /// Copy of every counter, taken atomically.
    pub fn snapshot(&self) -> HashMap<String, usize> {
        self.counters.lock().clone()
    }

    /// Sum of all in-flight counters.
    pub fn total(&self) -> usize {
        self.counters.lock().values().sum()
    }
}

/// A reserved slot on one agent.
///
/// Dropping the reservation decrements the agent's counter exactly once, so a
/// slot is returned even when the owning dispatch panics or is aborted.
#[derive(Debug)]
pub struct SlotReservation {
    tracker: Arc<WorkloadTracker>,
    agent_id: String,
    released: bool,
}

impl SlotReservation {
    /// Reserve a slot if the agent is below `max`.
    pub fn acquire(tracker: &Arc<WorkloadTracker>, agent_id: &str, max: usize) -> Option<Self> {
        tracker.try_increment(agent_id, max).then(|| Self {
            tracker: Arc::clone(tracker),
            agent_id: agent_id.to_string(),
            released: false,
        })
    }

    /// Return the slot now rather than at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.tracker.decrement(&self.agent_id);
        }
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.release_once();
    }
}
