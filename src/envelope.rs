//! Envelope/Batch model: the wire shape agents submit to the apply pipeline.
//!
//! An `Envelope` names one operation plus its parameters; a `Batch` is an
//! ordered sequence of envelopes that the queue partitions by `window_id`
//! before handing them to the apply engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::compute_cache::canonicalize_input;
use crate::config::errors::ERR_SCHEMA_INVALID;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope {
    pub op: String,
    pub params: Value,
    #[serde(default, rename = "idempotencyKey")]
    pub idempotency_key: Option<String>,
    #[serde(default, rename = "windowId")]
    pub window_id: Option<String>,
    #[serde(default, rename = "traceId")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Batch {
    pub envelopes: Vec<Envelope>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub index: usize,
    pub code: &'static str,
    pub message: String,
}

/// Parameter shapes for every operation the apply engine dispatches on.
/// Unknown fields are rejected so a malformed batch fails validation instead
/// of silently dropping data the caller expected to matter.
pub mod params {
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct WindowCreate {
        pub id: String,
        #[serde(default, rename = "titleText")]
        pub title_text: Option<String>,
        #[serde(default)]
        pub width: Option<f64>,
        #[serde(default)]
        pub height: Option<f64>,
        #[serde(default)]
        pub x: Option<f64>,
        #[serde(default)]
        pub y: Option<f64>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct WindowUpdate {
        pub id: String,
        #[serde(default, rename = "titleText")]
        pub title_text: Option<String>,
        #[serde(default)]
        pub width: Option<f64>,
        #[serde(default)]
        pub height: Option<f64>,
        #[serde(default)]
        pub x: Option<f64>,
        #[serde(default)]
        pub y: Option<f64>,
        #[serde(default, rename = "ensureExists")]
        pub ensure_exists: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct WindowClose {
        pub id: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct DomSet {
        pub target: String,
        pub html: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct DomReplace {
        pub target: String,
        pub html: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct DomAppend {
        pub target: String,
        pub html: String,
        #[serde(default, rename = "ensureWindowExists")]
        pub ensure_window_exists: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ComponentRender {
        pub id: String,
        pub target: String,
        #[serde(default)]
        pub props: Value,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ComponentUpdate {
        pub id: String,
        #[serde(default)]
        pub props: Value,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ComponentDestroy {
        pub id: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct StateSet {
        pub scope: String,
        pub key: String,
        pub value: Value,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct StateGet {
        pub scope: String,
        pub key: String,
        #[serde(default, rename = "toStatePath")]
        pub to_state_path: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ApiCall {
        pub url: String,
        #[serde(default = "default_method")]
        pub method: String,
        #[serde(default)]
        pub headers: Value,
        #[serde(default)]
        pub body: Value,
        #[serde(default, rename = "toStatePath")]
        pub to_state_path: Option<String>,
    }

    fn default_method() -> String {
        "GET".to_string()
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct TxnCancel {
        #[serde(default)]
        pub reason: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct NeedsCode {
        pub prompt: String,
        #[serde(default)]
        pub language: Option<String>,
        #[serde(default, rename = "toStatePath")]
        pub to_state_path: Option<String>,
        /// Window/selector the progress message and eventual view/install
        /// panel are written into. Both must be present to get progress UI;
        /// without them the job still runs, just silently.
        #[serde(default, rename = "progressWindowId")]
        pub progress_window_id: Option<String>,
        #[serde(default, rename = "progressSelector")]
        pub progress_selector: Option<String>,
    }
}

/// Check that every envelope's `op` is a known operation and its `params`
/// value matches that operation's shape. Returns one `BatchError` per bad
/// envelope; a clean batch returns an empty vec.
pub fn validate_batch(batch: &Batch) -> Vec<BatchError> {
    let mut errors = Vec::new();
    for (index, envelope) in batch.envelopes.iter().enumerate() {
        if let Err(message) = validate_one(envelope) {
            errors.push(BatchError {
                index,
                code: ERR_SCHEMA_INVALID,
                message,
            });
        }
    }
    errors
}

/// Ops that act on a window's content and therefore require a `windowId` on
/// the envelope itself (spec.md §4.1: "dom.*/component.* with no windowId"
/// is rejected at validation, independent of whatever `ensureWindowExists`
/// says about auto-provisioning that window later).
fn requires_window_id(op: &str) -> bool {
    op.starts_with("dom.") || op.starts_with("component.")
}

fn validate_one(envelope: &Envelope) -> Result<(), String> {
    use params::*;
    macro_rules! check {
        ($ty:ty) => {
            serde_json::from_value::<$ty>(envelope.params.clone())
                .map(|_| ())
                .map_err(|err| err.to_string())
        };
    }
    if requires_window_id(&envelope.op) && envelope.window_id.is_none() {
        return Err(format!("{} requires windowId", envelope.op));
    }
    match envelope.op.as_str() {
        "window.create" => check!(WindowCreate),
        "window.update" => check!(WindowUpdate),
        "window.close" => check!(WindowClose),
        "dom.set" => check!(DomSet),
        "dom.replace" => check!(DomReplace),
        "dom.append" => check!(DomAppend),
        "component.render" => check!(ComponentRender),
        "component.update" => check!(ComponentUpdate),
        "component.destroy" => check!(ComponentDestroy),
        "state.set" => check!(StateSet),
        "state.get" => check!(StateGet),
        "api.call" => check!(ApiCall),
        "txn.cancel" => check!(TxnCancel),
        "needs.code" => check!(NeedsCode),
        other => Err(format!("unknown op {other}")),
    }
}

/// Canonical JSON string for an envelope, reusing the compute cache's
/// deterministic writer so ordering and escaping rules stay in one place.
pub fn canonicalize(envelope: &Envelope) -> String {
    let value = serde_json::json!({
        "op": envelope.op,
        "params": envelope.params,
        "idempotencyKey": envelope.idempotency_key,
        "windowId": envelope.window_id,
    });
    canonicalize_input(&value)
}

/// SHA-256 over the canonical form of every envelope in the batch, joined by
/// newlines. Used as the `opsHash` surfaced in `ApplyOutcome`.
pub fn hash_ops(batch: &Batch) -> String {
    let mut hasher = Sha256::new();
    for envelope in &batch.envelopes {
        hasher.update(canonicalize(envelope).as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_known_ops() {
        let batch = Batch {
            envelopes: vec![Envelope {
                op: "dom.set".into(),
                params: serde_json::json!({"target": "#root", "html": "<b>hi</b>"}),
                idempotency_key: None,
                window_id: Some("w1".into()),
                trace_id: None,
            }],
        };
        assert!(validate_batch(&batch).is_empty());
    }

    #[test]
    fn rejects_dom_and_component_ops_without_window_id() {
        let batch = Batch {
            envelopes: vec![
                Envelope {
                    op: "dom.set".into(),
                    params: serde_json::json!({"target": "#root", "html": "<b>hi</b>"}),
                    idempotency_key: None,
                    window_id: None,
                    trace_id: None,
                },
                Envelope {
                    op: "component.render".into(),
                    params: serde_json::json!({"id": "c1", "target": "#root"}),
                    idempotency_key: None,
                    window_id: None,
                    trace_id: None,
                },
            ],
        };
        let errors = validate_batch(&batch);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, 0);
        assert_eq!(errors[1].index, 1);
    }

    #[test]
    fn rejects_unknown_op() {
        let batch = Batch {
            envelopes: vec![Envelope {
                op: "dom.teleport".into(),
                params: serde_json::json!({}),
                idempotency_key: None,
                window_id: None,
                trace_id: None,
            }],
        };
        let errors = validate_batch(&batch);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 0);
    }

    #[test]
    fn rejects_unknown_fields_in_params() {
        let batch = Batch {
            envelopes: vec![Envelope {
                op: "window.create".into(),
                params: serde_json::json!({"id": "w1", "bogus": true}),
                idempotency_key: None,
                window_id: None,
                trace_id: None,
            }],
        };
        assert_eq!(validate_batch(&batch).len(), 1);
    }

    #[test]
    fn hash_ops_is_order_sensitive() {
        let a = Batch {
            envelopes: vec![
                Envelope { op: "txn.cancel".into(), params: serde_json::json!({}), idempotency_key: None, window_id: None, trace_id: None },
                Envelope { op: "window.close".into(), params: serde_json::json!({"id": "w1"}), idempotency_key: None, window_id: None, trace_id: None },
            ],
        };
        let b = Batch { envelopes: vec![a.envelopes[1].clone(), a.envelopes[0].clone()] };
        assert_ne!(hash_ops(&a), hash_ops(&b));
    }
}
