//! The single Tauri command through which agents submit a batch of envelopes
//! to the apply pipeline: validate, partition by window, dedup, and apply.

use tauri::{AppHandle, State};

use crate::core::AppState;
use crate::envelope::Batch;
use crate::queue::ApplyOutcome;

#[tauri::command]
pub async fn enqueue_batch(
    app: AppHandle,
    state: State<'_, AppState>,
    workspace_id: Option<String>,
    batch: Batch,
) -> Result<ApplyOutcome, Vec<crate::apply::EnvelopeError>> {
    let workspace_id = workspace_id.unwrap_or_else(|| "default".into());
    crate::queue::submit_batch(&app, &state, &workspace_id, batch).await
}
