//! Per-window FIFO admission for the apply pipeline: idempotency dedup,
//! windowId partitioning, and `txn.cancel` handling.

use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tauri::AppHandle;
use uuid::Uuid;

use crate::config::timeouts::{IDEMPOTENCY_COMPACT_THRESHOLD, IDEMPOTENCY_TTL};
use crate::envelope::{hash_ops, validate_batch, Batch, Envelope};

/// Tracks idempotency keys already applied, so a replayed envelope with the
/// same key is skipped rather than re-applied. Entries age out after
/// `IDEMPOTENCY_TTL`; compaction runs lazily once the map grows past
/// `IDEMPOTENCY_COMPACT_THRESHOLD` entries rather than on a timer.
pub struct IdempotencyStore {
    seen: DashMap<String, Instant>,
}

impl IdempotencyStore {
    fn new() -> Self {
        Self { seen: DashMap::new() }
    }

    /// Returns `true` if `key` had not been recorded (or had expired) and is
    /// now marked seen; `false` if it is a live duplicate.
    fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        if let Some(existing) = self.seen.get(key) {
            if now.duration_since(*existing) < IDEMPOTENCY_TTL {
                return false;
            }
        }
        self.seen.insert(key.to_string(), now);
        if self.seen.len() > IDEMPOTENCY_COMPACT_THRESHOLD {
            self.compact(now);
        }
        true
    }

    fn compact(&self, now: Instant) {
        self.seen
            .retain(|_, recorded_at| now.duration_since(*recorded_at) < IDEMPOTENCY_TTL);
    }
}

pub struct QueueState {
    idempotency: IdempotencyStore,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            idempotency: IdempotencyStore::new(),
        }
    }
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub success: bool,
    pub applied: usize,
    #[serde(rename = "skippedDuplicates")]
    pub skipped_duplicates: usize,
    #[serde(rename = "deniedByPolicy")]
    pub denied_by_policy: usize,
    pub errors: Vec<crate::apply::EnvelopeError>,
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(rename = "opsHash", skip_serializing_if = "Option::is_none")]
    pub ops_hash: Option<String>,
}

/// Stable partition key: envelopes with the same `windowId` share a FIFO
/// lane; envelopes without one (global ops, `txn.cancel`) share the empty
/// partition, which is always drained first.
fn partition_key(envelope: &Envelope) -> String {
    envelope.window_id.clone().unwrap_or_default()
}

/// Group envelopes into ordered partitions while preserving each partition's
/// relative order from the original batch.
fn partition_batch(batch: &Batch) -> Vec<(String, Vec<(usize, Envelope)>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(usize, Envelope)>> = HashMap::new();
    for (index, envelope) in batch.envelopes.iter().enumerate() {
        let key = partition_key(envelope);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push((index, envelope.clone()));
    }
    order
        .into_iter()
        .map(|key| {
            let items = groups.remove(&key).unwrap_or_default();
            (key, items)
        })
        .collect()
}

/// Validate, partition, and apply a batch against the given workspace.
///
/// Schema-invalid envelopes reject the whole batch (the caller surfaces this
/// as a hard error rather than a partial `ApplyOutcome`). Everything else is
/// applied partition-by-partition, in order within each partition, with
/// idempotency dedup and policy denial tracked per envelope.
pub async fn submit_batch(
    app: &AppHandle,
    state: &crate::AppState,
    workspace_id: &str,
    batch: Batch,
) -> Result<ApplyOutcome, Vec<crate::apply::EnvelopeError>> {
    let schema_errors = validate_batch(&batch);
    if !schema_errors.is_empty() {
        return Err(schema_errors
            .into_iter()
            .map(|e| crate::apply::EnvelopeError {
                index: e.index,
                code: e.code.to_string(),
                message: e.message,
            })
            .collect());
    }

    let ops_hash = Some(hash_ops(&batch));
    let batch_id = Uuid::new_v4().to_string();

    let partitions = partition_batch(&batch);

    let mut applied = 0usize;
    let mut skipped_duplicates = 0usize;
    let mut denied_by_policy = 0usize;
    let mut errors = Vec::new();

    // The empty-key (global) partition runs first and, if it contains
    // `txn.cancel`, clears in-flight jobs before any windowed partition runs.
    let mut partitions = partitions;
    if let Some(pos) = partitions.iter().position(|(key, _)| key.is_empty()) {
        let global = partitions.remove(pos);
        run_partition(app, state, workspace_id, &state.queue.idempotency, global, &mut applied, &mut skipped_duplicates, &mut denied_by_policy, &mut errors).await;
    }

    let mut handles = Vec::new();
    for partition in partitions {
        let app = app.clone();
        let workspace_id = workspace_id.to_string();
        handles.push(tokio::spawn(run_partition_owned(app, workspace_id, partition)));
    }
    for handle in handles {
        if let Ok((p_applied, p_skipped, p_denied, p_errors)) = handle.await {
            applied += p_applied;
            skipped_duplicates += p_skipped;
            denied_by_policy += p_denied;
            errors.extend(p_errors);
        }
    }

    Ok(ApplyOutcome {
        success: errors.is_empty(),
        applied,
        skipped_duplicates,
        denied_by_policy,
        errors,
        batch_id,
        ops_hash,
    })
}

async fn run_partition_owned(
    app: AppHandle,
    workspace_id: String,
    partition: (String, Vec<(usize, Envelope)>),
) -> (usize, usize, usize, Vec<crate::apply::EnvelopeError>) {
    let state = app.state::<crate::AppState>();
    let mut applied = 0usize;
    let mut skipped = 0usize;
    let mut denied = 0usize;
    let mut errors = Vec::new();
    run_partition(&app, &state, &workspace_id, &state.queue.idempotency, partition, &mut applied, &mut skipped, &mut denied, &mut errors).await;
    (applied, skipped, denied, errors)
}

#[allow(clippy::too_many_arguments)]
async fn run_partition(
    app: &AppHandle,
    state: &crate::AppState,
    workspace_id: &str,
    idempotency: &IdempotencyStore,
    partition: (String, Vec<(usize, Envelope)>),
    applied: &mut usize,
    skipped: &mut usize,
    denied: &mut usize,
    errors: &mut Vec<crate::apply::EnvelopeError>,
) {
    let (_, envelopes) = partition;
    for (index, envelope) in envelopes {
        if let Some(key) = envelope.idempotency_key.as_deref() {
            if envelope.op != "txn.cancel" && !idempotency.check_and_record(key) {
                *skipped += 1;
                continue;
            }
        }
        match crate::apply::dispatch(app, state, workspace_id, &envelope).await {
            Ok(()) => *applied += 1,
            Err(crate::apply::EnvelopeOutcome::DeniedByPolicy(message)) => {
                *denied += 1;
                errors.push(crate::apply::EnvelopeError {
                    index,
                    code: "denied".to_string(),
                    message,
                });
            }
            Err(crate::apply::EnvelopeOutcome::Error(code, message)) => {
                errors.push(crate::apply::EnvelopeError { index, code, message });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_store_dedups_within_ttl() {
        let store = IdempotencyStore::new();
        assert!(store.check_and_record("k-1"));
        assert!(!store.check_and_record("k-1"));
    }

    #[test]
    fn partition_batch_preserves_order_per_window() {
        let batch = Batch {
            envelopes: vec![
                Envelope { op: "dom.set".into(), params: serde_json::json!({}), idempotency_key: None, window_id: Some("w1".into()), trace_id: None },
                Envelope { op: "dom.set".into(), params: serde_json::json!({}), idempotency_key: None, window_id: Some("w2".into()), trace_id: None },
                Envelope { op: "dom.set".into(), params: serde_json::json!({}), idempotency_key: None, window_id: Some("w1".into()), trace_id: None },
            ],
        };
        let partitions = partition_batch(&batch);
        let w1 = partitions.iter().find(|(k, _)| k == "w1").unwrap();
        assert_eq!(w1.1.len(), 2);
        assert_eq!(w1.1[0].0, 0);
        assert_eq!(w1.1[1].0, 2);
    }
}
