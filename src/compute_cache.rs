use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tauri::{AppHandle, Manager, State};

use crate::AppState;

/// Canonicalize JSON deterministically (keys sorted, stable formatting).
pub fn canonicalize_input(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::String(s) => {
                out.push('"');
                for ch in s.chars() {
                    match ch {
                        // Escape JS separators to avoid accidental script-breaking tokens.
                        '\u{2028}' => out.push_str("\\u2028"),
                        '\u{2029}' => out.push_str("\\u2029"),
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Value::Array(arr) => {
                out.push('[');
                let mut first = true;
                for v in arr {
                    if !first {
                        out.push(',');
                    } else {
                        first = false;
                    }
                    write(v, out);
                }
                out.push(']');
            }
            Value::Object(map) => {
                out.push('{');
                let mut first = true;
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                for k in keys {
                    if !first {
                        out.push(',');
                    } else {
                        first = false;
                    }
                    // key
                    write(&Value::String(k.to_string()), out);
                    out.push(':');
                    write(map.get(k).unwrap(), out);
                }
                out.push('}');
            }
        }
    }
    let mut out = String::with_capacity(256);
    write(value, &mut out);
    out
}

/// Compute a content-addressed cache key from task, canonical input, and env hash.
pub fn compute_key(task: &str, input: &Value, env_hash: &str) -> String {
    let canonical = canonicalize_input(input);
    let mut hasher = Sha256::new();
    hasher.update(b"v1|");
    hasher.update(task.as_bytes());
    hasher.update(b"|env|");
    hasher.update(env_hash.as_bytes());
    hasher.update(b"|input|");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Extended cache key (Track C / `UICP_CACHE_V2`): folds the task's module
/// digest/version, capability subset, and workspace id into the digest on top
/// of the plain `(task, input, env_hash)` key, matching spec.md §4.7's full
/// identity tuple `(task, canonical(input), capabilities, workspaceId,
/// envHash)`. `invariants` carries the module/policy fingerprint the caller
/// already assembled (digest, wit world, policy version).
pub fn compute_key_v2_plus(
    spec: &crate::policy::ComputeJobSpec,
    input: &Value,
    invariants: &str,
) -> String {
    let canonical_input = canonicalize_input(input);
    let caps = &spec.capabilities;
    let mut cap_parts: Vec<String> = Vec::new();
    cap_parts.extend(caps.fs_read.iter().map(|p| format!("fsr:{p}")));
    cap_parts.extend(caps.fs_write.iter().map(|p| format!("fsw:{p}")));
    cap_parts.extend(caps.net.iter().map(|h| format!("net:{h}")));
    cap_parts.sort();
    if caps.long_run {
        cap_parts.push("longRun".to_string());
    }
    if caps.mem_high {
        cap_parts.push("memHigh".to_string());
    }
    let canonical_caps = cap_parts.join(",");

    let mut hasher = Sha256::new();
    hasher.update(b"v2|");
    hasher.update(spec.task.as_bytes());
    hasher.update(b"|ws|");
    hasher.update(spec.workspace_id.as_bytes());
    hasher.update(b"|env|");
    hasher.update(spec.provenance.env_hash.as_bytes());
    hasher.update(b"|caps|");
    hasher.update(canonical_caps.as_bytes());
    hasher.update(b"|inv|");
    hasher.update(invariants.as_bytes());
    hasher.update(b"|input|");
    hasher.update(canonical_input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a value's canonical encoding, used as the codegen
/// determinism `outputHash` and as the golden-cache integrity check.
pub fn compute_output_hash(value: &Value) -> String {
    let canonical = canonicalize_input(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// A previously accepted codegen output, keyed by its deterministic
/// golden key (spec/language/constraints/model), independent of `jobId`.
pub struct GoldenRecord {
    pub value: Value,
    pub output_hash: String,
}

/// Look up a golden codegen record for `golden_key` in `workspace_id`.
pub async fn lookup_golden(
    app: &AppHandle,
    workspace_id: &str,
    golden_key: &str,
) -> anyhow::Result<Option<GoldenRecord>> {
    let ws = workspace_id.to_string();
    let key = golden_key.to_string();
    let state: State<'_, AppState> = app.state();
    state
        .db_ro
        .call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT value_json, output_hash FROM codegen_golden
                     WHERE workspace_id = ?1 AND golden_key = ?2",
                )
                .context("prepare golden select")?;
            let mut rows = stmt.query(params![ws, key]).context("exec golden select")?;
            if let Some(row) = rows.next()? {
                let value_json: String = row.get(0)?;
                let output_hash: String = row.get(1)?;
                let value: Value = serde_json::from_str(&value_json).context("parse golden value")?;
                Ok(Some(GoldenRecord { value, output_hash }))
            } else {
                Ok(None)
            }
        })
        .await
        .context("lookup golden record")
}

/// Persist a golden codegen record, keyed by its deterministic golden key.
/// Idempotent: resubmitting the identical plan overwrites with the same
/// bytes rather than growing the table.
pub async fn store_golden(
    app: &AppHandle,
    workspace_id: &str,
    golden_key: &str,
    output_hash: &str,
    task: &str,
    value: &Value,
) -> anyhow::Result<()> {
    let state: State<'_, AppState> = app.state();
    if *state.safe_mode.read().await {
        return Ok(());
    }
    let ws = workspace_id.to_string();
    let key = golden_key.to_string();
    let task = task.to_string();
    let output_hash = output_hash.to_string();
    let value_json = serde_json::to_string(value).context("serialize golden value")?;
    state
        .db_rw
        .call(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO codegen_golden (workspace_id, golden_key, task, output_hash, value_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(workspace_id, golden_key) DO UPDATE
                   SET output_hash = excluded.output_hash,
                       value_json = excluded.value_json,
                       task = excluded.task",
                params![ws, key, task, output_hash, value_json, now],
            )?;
            Ok(())
        })
        .await
        .context("store golden record")?;
    Ok(())
}


/// Fetch cached final event payload by key, scoped to a workspace.
pub async fn lookup(
    app: &AppHandle,
    workspace_id: &str,
    key: &str,
) -> anyhow::Result<Option<Value>> {
    let key = key.to_string();
    let ws = workspace_id.to_string();
    let state: State<'_, AppState> = app.state();
    let res = state
        .db_ro
        .call(move |conn| {
            let mut stmt = conn
                .prepare("SELECT value_json FROM compute_cache WHERE workspace_id = ?1 AND key = ?2")
                .context("prepare cache select")?;
            let mut rows = stmt.query(params![ws, key]).context("exec cache select")?;
            if let Some(row) = rows.next()? {
                let json_str: String = row.get(0)?;
                let val: Value = serde_json::from_str(&json_str).context("parse cached value")?;
                Ok(Some(val))
            } else {
                Ok(None)
            }
        })
        .await
        .context("cache lookup")?;
    Ok(res)
}

fn upsert_cache_row(
    conn: &Connection,
    workspace_id: &str,
    key: &str,
    task: &str,
    env_hash: &str,
    value_json: &str,
    created_at: i64,
) -> anyhow::Result<()> {
    // Intentionally leave created_at untouched on conflict to preserve original insertion time.
    let bytes = value_json.len() as i64;
    conn.execute(
        "INSERT INTO compute_cache (workspace_id, key, task, env_hash, value_json, bytes, replayable, created_at, last_hit_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
         ON CONFLICT(workspace_id, key) DO UPDATE
           SET task = excluded.task,
               env_hash = excluded.env_hash,
               value_json = excluded.value_json,
               bytes = excluded.bytes,
               last_hit_at = excluded.last_hit_at",
        params![workspace_id, key, task, env_hash, value_json, bytes, created_at],
    )
    .context("upsert cache value")?;
    Ok(())
}

/// Store final event payload by key (idempotent upsert), then evict least-
/// recently-hit entries for this workspace down to the configured byte budget.
pub async fn store(
    app: &AppHandle,
    workspace_id: &str,
    key: &str,
    task: &str,
    env_hash: &str,
    value: &Value,
) -> anyhow::Result<()> {
    // Freeze writes to persistence in Safe Mode
    let state: State<'_, AppState> = app.state();
    if *state.safe_mode.read().await {
        return Ok(());
    }
    let key = key.to_string();
    let ws = workspace_id.to_string();
    let task = task.to_string();
    let env_hash = env_hash.to_string();
    let json = serde_json::to_string(value).context("serialize cache value")?;
    let max_bytes = cache_max_bytes();
    state
        .db_rw
        .call(move |conn| {
            let now = Utc::now().timestamp();
            upsert_cache_row(conn, &ws, &key, &task, &env_hash, &json, now)?;
            evict_lru(conn, &ws, max_bytes)
        })
        .await
        .context("cache store")??;
    Ok(())
}

/// Byte budget for a single workspace's cache namespace. Overridable via
/// `UICP_CACHE_MAX_BYTES` for tests and operators chasing disk pressure.
fn cache_max_bytes() -> u64 {
    std::env::var("UICP_CACHE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(crate::config::limits::DEFAULT_CACHE_MAX_BYTES)
}

/// Total row count and byte size of a workspace's cache namespace.
pub async fn size(app: &AppHandle, workspace_id: &str) -> anyhow::Result<(usize, u64)> {
    let ws = workspace_id.to_string();
    let state: State<'_, AppState> = app.state();
    state
        .db_ro
        .call(move |conn| {
            let (rows, bytes): (i64, Option<i64>) = conn.query_row(
                "SELECT COUNT(*), SUM(bytes) FROM compute_cache WHERE workspace_id = ?1",
                params![ws],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((rows.max(0) as usize, bytes.unwrap_or(0).max(0) as u64))
        })
        .await
        .context("cache size")
}

/// Remove every cached entry for `workspace_id`. Leaves other workspaces'
/// namespaces untouched.
pub async fn clear(app: &AppHandle, workspace_id: &str) -> anyhow::Result<usize> {
    let ws = workspace_id.to_string();
    let state: State<'_, AppState> = app.state();
    state
        .db_rw
        .call(move |conn| Ok(conn.execute("DELETE FROM compute_cache WHERE workspace_id = ?1", params![ws])?))
        .await
        .context("cache clear")
}

/// Evict the least-recently-hit rows in `workspace_id` until its total byte
/// usage is at or under `max_bytes`. Runs inside the same write transaction
/// as the triggering `store`, so a burst of writes cannot overshoot the
/// budget before eviction catches up.
fn evict_lru(conn: &Connection, workspace_id: &str, max_bytes: u64) -> anyhow::Result<()> {
    let total: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(bytes), 0) FROM compute_cache WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )
        .context("sum cache bytes")?;
    let mut over = total - max_bytes as i64;
    if over <= 0 {
        return Ok(());
    }
    let mut stmt = conn
        .prepare(
            "SELECT key, bytes FROM compute_cache WHERE workspace_id = ?1
             ORDER BY last_hit_at ASC, created_at ASC",
        )
        .context("prepare lru scan")?;
    let mut rows = stmt.query(params![workspace_id]).context("exec lru scan")?;
    let mut victims = Vec::new();
    while over > 0 {
        match rows.next()? {
            Some(row) => {
                let key: String = row.get(0)?;
                let bytes: i64 = row.get(1)?;
                over -= bytes;
                victims.push(key);
            }
            None => break,
        }
    }
    drop(rows);
    drop(stmt);
    for key in victims {
        conn.execute(
            "DELETE FROM compute_cache WHERE workspace_id = ?1 AND key = ?2",
            params![workspace_id, key],
        )
        .context("evict lru row")?;
    }
    Ok(())
}

/// Touch `last_hit_at` for a cache hit so LRU eviction reflects read, not
/// just write, recency.
pub async fn touch(app: &AppHandle, workspace_id: &str, key: &str) -> anyhow::Result<()> {
    let ws = workspace_id.to_string();
    let key = key.to_string();
    let state: State<'_, AppState> = app.state();
    state
        .db_rw
        .call(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "UPDATE compute_cache SET last_hit_at = ?1 WHERE workspace_id = ?2 AND key = ?3",
                params![now, ws, key],
            )?;
            Ok(())
        })
        .await
        .context("cache touch")?;
    Ok(())
}

/// Remove a single cache row, used when a hit fails output-hash
/// re-validation (spec's `Nondeterministic` eviction path).
pub async fn evict_one(app: &AppHandle, workspace_id: &str, key: &str) -> anyhow::Result<()> {
    let ws = workspace_id.to_string();
    let key = key.to_string();
    let state: State<'_, AppState> = app.state();
    state
        .db_rw
        .call(move |conn| {
            conn.execute(
                "DELETE FROM compute_cache WHERE workspace_id = ?1 AND key = ?2",
                params![ws, key],
            )?;
            Ok(())
        })
        .await
        .context("cache evict_one")?;
    Ok(())
}
