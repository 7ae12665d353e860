//! Module registry and compute-cache introspection commands surfaced to the
//! UI: list what is installed, verify digests/signatures, and let a user
//! clear the cache when chasing a determinism bug.

use tauri::{AppHandle, State};

use crate::core::AppState;

#[tauri::command]
pub async fn get_modules_info(app: AppHandle) -> Result<serde_json::Value, String> {
    let manifest = crate::registry::load_manifest(&app).map_err(|err| err.to_string())?;
    let modules: Vec<serde_json::Value> = manifest
        .entries
        .iter()
        .map(|entry| {
            serde_json::json!({
                "task": entry.task,
                "version": entry.version,
                "filename": entry.filename,
                "digestSha256": entry.digest_sha256,
                "signed": entry.signature.is_some(),
            })
        })
        .collect();
    Ok(serde_json::json!({ "modules": modules }))
}

#[tauri::command]
pub async fn get_modules_registry(app: AppHandle) -> Result<serde_json::Value, String> {
    get_modules_info(app).await
}

/// Verify every installed module's digest (and signature, under strict mode)
/// without touching the manifest. Returns per-module pass/fail so the caller
/// can surface exactly which module needs reinstalling.
#[tauri::command]
pub async fn verify_modules(app: AppHandle) -> Result<serde_json::Value, String> {
    let manifest = crate::registry::load_manifest(&app).map_err(|err| err.to_string())?;
    let dir = crate::registry::modules_dir(&app);
    let results: Vec<serde_json::Value> = manifest
        .entries
        .iter()
        .map(|entry| {
            let path = dir.join(&entry.filename);
            let digest_ok = crate::registry::verify_digest(&path, &entry.digest_sha256)
                .unwrap_or(false);
            serde_json::json!({
                "task": entry.task,
                "version": entry.version,
                "digestOk": digest_ok,
            })
        })
        .collect();
    Ok(serde_json::json!({ "results": results }))
}

/// Delete every cached compute result for the given workspace (or all
/// workspaces, if none is given). Used when a module upgrade invalidates
/// prior cache entries that the env-hash partitioning didn't catch.
#[tauri::command]
pub async fn clear_compute_cache(
    app: AppHandle,
    state: State<'_, AppState>,
    workspace_id: Option<String>,
) -> Result<usize, String> {
    match workspace_id {
        Some(id) => crate::compute_cache::clear(&app, &id).await.map_err(|err| err.to_string()),
        None => state
            .db_rw
            .call(move |conn| Ok(conn.execute("DELETE FROM compute_cache", [])?))
            .await
            .map_err(|err| err.to_string()),
    }
}

/// Row count and total byte size of a workspace's compute-cache namespace,
/// for the debug/telemetry surface (spec.md §4.7 `size()`).
#[tauri::command]
pub async fn get_compute_cache_size(
    app: AppHandle,
    workspace_id: String,
) -> Result<serde_json::Value, String> {
    let (rows, bytes) = crate::compute_cache::size(&app, &workspace_id)
        .await
        .map_err(|err| err.to_string())?;
    Ok(serde_json::json!({ "rows": rows, "bytes": bytes }))
}
