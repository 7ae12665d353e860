//! Event fan-out for compute jobs: one broadcast channel per job plus a bounded
//! ring buffer so late subscribers (debug panels, replay tooling) can still see
//! recent partial/final/log frames after the fact.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::limits::{EVENT_RING_CAPACITY, EVENT_RING_PER_TRACE_CAP};

pub const EVENT_COMPUTE_PARTIAL: &str = "compute-partial";
pub const EVENT_COMPUTE_FINAL: &str = "compute-final";
pub const EVENT_COMPUTE_LOG: &str = "compute-log";

#[derive(Debug, Clone, Serialize)]
pub struct BusRecord {
    pub kind: &'static str,
    pub trace_id: Option<String>,
    pub job_id: String,
    pub payload: Value,
}

struct JobChannel {
    tx: broadcast::Sender<BusRecord>,
}

/// Bounded, newest-first ring of recent events, globally capped and additionally
/// capped per trace id so one noisy job cannot starve the others out of the window.
struct Ring {
    entries: VecDeque<BusRecord>,
    per_trace: HashMap<String, usize>,
}

impl Ring {
    fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(EVENT_RING_CAPACITY),
            per_trace: HashMap::new(),
        }
    }

    fn push(&mut self, record: BusRecord) {
        if let Some(trace_id) = record.trace_id.clone() {
            let count = self.per_trace.entry(trace_id.clone()).or_insert(0);
            if *count >= EVENT_RING_PER_TRACE_CAP {
                if let Some(pos) = self
                    .entries
                    .iter()
                    .rposition(|e| e.trace_id.as_deref() == Some(trace_id.as_str()))
                {
                    self.entries.remove(pos);
                    *count -= 1;
                }
            }
            *count += 1;
        }
        self.entries.push_front(record);
        while self.entries.len() > EVENT_RING_CAPACITY {
            if let Some(dropped) = self.entries.pop_back() {
                if let Some(trace_id) = dropped.trace_id {
                    if let Some(count) = self.per_trace.get_mut(&trace_id) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
    }

    fn snapshot(&self, limit: usize) -> Vec<BusRecord> {
        self.entries.iter().take(limit).cloned().collect()
    }
}

/// Per-job broadcast registry plus the telemetry ring shared across all jobs.
pub struct EventBus {
    jobs: RwLock<HashMap<String, JobChannel>>,
    ring: RwLock<Ring>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ring: RwLock::new(Ring::new()),
        }
    }

    /// Subscribe to partial/final frames for a single job. The channel is created
    /// lazily and torn down by `retire` once the job has finished.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<BusRecord> {
        let mut jobs = self.jobs.write();
        let channel = jobs.entry(job_id.to_string()).or_insert_with(|| JobChannel {
            tx: broadcast::channel(64).0,
        });
        channel.tx.subscribe()
    }

    pub fn publish(&self, kind: &'static str, job_id: &str, trace_id: Option<String>, payload: Value) {
        let record = BusRecord {
            kind,
            trace_id,
            job_id: job_id.to_string(),
            payload,
        };
        {
            let jobs = self.jobs.read();
            if let Some(channel) = jobs.get(job_id) {
                let _ = channel.tx.send(record.clone());
            }
        }
        self.ring.write().push(record);
    }

    /// Drop the broadcast channel for a finished job. Safe to call even if no
    /// subscriber ever attached.
    pub fn retire(&self, job_id: &str) {
        self.jobs.write().remove(job_id);
    }

    /// Snapshot of the most recent events, newest first, for debug/replay surfaces.
    pub fn recent(&self, limit: usize) -> Vec<BusRecord> {
        self.ring.read().snapshot(limit)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
