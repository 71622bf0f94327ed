//! Opt-in statistics for a replication adaptor.

use std::collections::HashMap;
use std::time::Duration;

/// Adaptor events that can be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatEvent {
    /// An update was submitted.
    Submit,
    /// The tentative view was read.
    TentativeView,
    /// The confirmed view was read.
    ConfirmedView,
    /// A synchronization was forced.
    SynchronizeNow,
    /// A caller waited for its submitted entries.
    ConfirmSubmittedEntries,
    /// A batch was written back to storage.
    Writeback,
}

/// Counters plus the time each committed update spent queued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationStats {
    counts: HashMap<StatEvent, u64>,
    stabilization_latencies: Vec<Duration>,
}

impl ReplicationStats {
    pub(crate) fn record(&mut self, event: StatEvent) {
        *self.counts.entry(event).or_default() += 1;
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        self.stabilization_latencies.push(latency);
    }

    /// How many times `event` happened.
    pub fn count(&self, event: StatEvent) -> u64 {
        self.counts.get(&event).copied().unwrap_or(0)
    }

    /// Submission-to-confirmation time of each committed update.
    pub fn stabilization_latencies(&self) -> &[Duration] {
        &self.stabilization_latencies
    }
}
