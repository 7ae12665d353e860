#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use chrono::Utc;
use dotenvy::dotenv;
use reqwest::Url;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tauri::{async_runtime::spawn, Emitter, Manager, State, WebviewUrl};
use tokio::time::interval;

use uicp::{
    build_app_state, commands, init_tracing, log_error, log_warn, registry, AppState, DATA_DIR,
    DB_PATH, FILES_DIR, LOGS_DIR,
};

fn main() {
    init_tracing();
    if let Err(err) = dotenv() {
        log_warn(format!("Failed to load .env: {err:?}"));
    }

    let db_path = DB_PATH.clone();
    let state = match tauri::async_runtime::block_on(build_app_state(db_path)) {
        Ok(state) => state,
        Err(err) => {
            log_error(format!("Failed to initialize app state: {err:?}"));
            std::process::exit(1);
        }
    };

    if let Err(err) = state.action_log.append_json(
        "system.boot",
        &serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "ts": Utc::now().timestamp(),
        }),
    ) {
        log_error(format!(
            "E-UICP-0660: failed to append boot action-log entry: {err:?}"
        ));
    }

    #[allow(unused_mut)]
    let mut builder = tauri::Builder::default()
        .manage(state)
        .plugin(tauri_plugin_fs::init());

    #[cfg(all(feature = "dialog_plugin", not(feature = "compute_harness")))]
    {
        builder = builder.plugin(tauri_plugin_dialog::init());
    }

    builder
        .setup(|app| {
            if let Err(e) = std::fs::create_dir_all(&*DATA_DIR) {
                log_error(format!("create data dir failed: {e:?}"));
            }
            if let Err(e) = std::fs::create_dir_all(&*LOGS_DIR) {
                log_error(format!("create logs dir failed: {e:?}"));
            }
            if let Err(e) = std::fs::create_dir_all(&*FILES_DIR) {
                log_error(format!("create files dir failed: {e:?}"));
            }
            // Ensure bundled compute modules are installed into the user modules dir.
            if let Err(err) = registry::install_bundled_modules_if_missing(&app.handle()) {
                log_error(format!("module install failed: {err:?}"));
            }
            spawn_autosave(app.handle().clone());
            spawn_db_maintenance(app.handle().clone());

            // Native splash window using a bundled asset served by the frontend (works in dev and prod).
            let splash_try_app = tauri::WebviewWindowBuilder::new(
                app,
                "splash",
                WebviewUrl::App("splash.html".into()),
            )
            .title("UICP")
            .decorations(false)
            .resizable(false)
            .inner_size(420.0, 280.0)
            .center()
            .visible(true)
            .build();
            if let Err(err) = splash_try_app {
                log_warn(format!(
                    "splash app:// failed, falling back to data URL: {err:?}"
                ));
                let data_url = format!(
                    "data:text/html;base64,{}",
                    BASE64_ENGINE.encode(SPLASH_HTML)
                );
                let splash_fallback = tauri::WebviewWindowBuilder::new(
                    app,
                    "splash",
                    WebviewUrl::External(Url::parse(&data_url).expect("valid data url")),
                )
                .title("UICP")
                .decorations(false)
                .resizable(false)
                .inner_size(420.0, 280.0)
                .center()
                .visible(true)
                .build();
                if let Err(err2) = splash_fallback {
                    log_error(format!(
                        "failed to create splash window (data URL fallback): {err2:?}"
                    ));
                }
            }

            // Frontend calls `frontend_ready` once mounted; see handler below.
            // Run a DB health check at startup and enter safe mode on failure.
            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                if let Err(err) = health_quick_check_internal(&handle).await {
                    log_error(format!("health_quick_check failed: {err:?}"));
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Compute Plane
            commands::compute_call,
            commands::compute_cancel,
            commands::get_modules_info,
            commands::get_modules_registry,
            commands::verify_modules,
            commands::clear_compute_cache,
            commands::get_compute_cache_size,
            // Command Apply Pipeline
            commands::enqueue_batch,
            // Workspace / window persistence
            commands::persist_command,
            commands::get_workspace_commands,
            commands::clear_workspace_commands,
            commands::delete_window_commands,
            commands::load_workspace,
            commands::save_workspace,
            // Filesystem bridge
            commands::get_paths,
            commands::copy_into_files,
            commands::export_from_files,
            commands::open_path,
            // Ops / recovery
            get_action_log_stats,
            save_checkpoint,
            health_quick_check,
            determinism_probe,
            recovery_action,
            recovery_auto,
            recovery_export,
            set_safe_mode,
            frontend_ready,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

const SPLASH_HTML: &str = r#"<!doctype html><html lang="en"><head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <meta name="color-scheme" content="dark">
  <title>UICP</title>
  <style>
    html,body{height:100%;margin:0}
    body{background:#0a0a0f;color:#cbd5e1;display:flex;align-items:center;justify-content:center;overflow:hidden}
    .shell{position:relative;display:flex;flex-direction:column;align-items:center;gap:42px}
    .text{font:500 11px -apple-system,BlinkMacSystemFont,Segoe UI,system-ui,sans-serif;letter-spacing:.22em;text-transform:uppercase;color:rgba(255,255,255,.6)}
    .cluster{position:relative;width:120px;height:120px}
    .hex{position:absolute;width:32px;height:32px;transform-origin:center}
    .hex::before{content:"";position:absolute;inset:0;background:linear-gradient(135deg,rgba(99,102,241,.4),rgba(139,92,246,.2));clip-path:polygon(50% 0%,100% 25%,100% 75%,50% 100%,0% 75%,0% 25%);animation:hex 3s ease-in-out infinite;will-change:transform,opacity}
    .hex:nth-child(3){top:0;left:44px}
    .hex:nth-child(4){top:22px;left:16px}
    .hex:nth-child(5){top:22px;left:72px}
    .hex:nth-child(6){top:44px;left:44px}
    .hex:nth-child(7){top:66px;left:16px}
    .hex:nth-child(8){top:66px;left:72px}
    .hex:nth-child(9){top:88px;left:44px}
    .hex:nth-child(3)::before{animation-delay:0s}
    .hex:nth-child(4)::before{animation-delay:.15s}
    .hex:nth-child(5)::before{animation-delay:.3s}
    .hex:nth-child(6)::before{animation-delay:.45s}
    .hex:nth-child(7)::before{animation-delay:.6s}
    .hex:nth-child(8)::before{animation-delay:.75s}
    .hex:nth-child(9)::before{animation-delay:.9s}
    .core{position:absolute;top:50%;left:50%;transform:translate(-50%,-50%);width:8px;height:8px;border-radius:50%;background:rgba(139,92,246,.9);box-shadow:0 0 20px rgba(139,92,246,.6),0 0 40px rgba(139,92,246,.3);animation:core 2s ease-in-out infinite}
    .ring{position:absolute;top:50%;left:50%;transform:translate(-50%,-50%);border:1px solid rgba(99,102,241,.12);border-radius:50%;animation:spin 8s linear infinite;will-change:transform}
    .ring.r2{width:180px;height:180px;animation-duration:12s;animation-direction:reverse}
    .ring.r1{width:140px;height:140px}
    body::before{content:"";position:absolute;inset:-50%;background:radial-gradient(circle at 30% 50%,rgba(99,102,241,.08) 0%,transparent 50%),radial-gradient(circle at 70% 50%,rgba(139,92,246,.06) 0%,transparent 50%);animation:drift 20s ease-in-out infinite}
    @keyframes hex{0%,100%{opacity:.3;transform:scale(.95)}50%{opacity:1;transform:scale(1.05)}}
    @keyframes core{0%,100%{transform:translate(-50%,-50%) scale(1);opacity:.9}50%{transform:translate(-50%,-50%) scale(1.3);opacity:1}}
    @keyframes spin{to{transform:translate(-50%,-50%) rotate(360deg)}}
    @keyframes drift{0%,100%{transform:translate(0,0) rotate(0)}33%{transform:translate(10%,-10%) rotate(120deg)}66%{transform:translate(-10%,10%) rotate(240deg)}}
    @media (prefers-reduced-motion: reduce){*,*::before{animation:none!important}}
  </style>
</head>
<body>
  <div class="shell" role="status" aria-live="polite" aria-busy="true" aria-label="Initializing application">
    <div class="cluster">
      <div class="ring r1"></div>
      <div class="ring r2"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="hex"></div>
      <div class="core"></div>
    </div>
    <p class="text">Initializing</p>
  </div>
</body></html>"#;

/// Command invoked by the frontend once the UI has mounted: reveal the main
/// window and tear down the splash screen.
#[tauri::command]
fn frontend_ready(app: tauri::AppHandle) -> Result<(), String> {
    if let Some(main) = app.get_webview_window("main") {
        let _ = main.show();
        let _ = main.set_focus();
    }
    if let Some(splash) = app.get_webview_window("splash") {
        let _ = splash.close();
    }
    Ok(())
}

#[derive(Clone, Serialize)]
struct SaveIndicatorPayload {
    ok: bool,
    timestamp: i64,
}

fn spawn_autosave(app_handle: tauri::AppHandle) {
    spawn(async move {
        let mut ticker = interval(Duration::from_secs(5));
        let mut last_emitted = {
            let state: State<'_, AppState> = app_handle.state();
            let current = *state.last_save_ok.read().await;
            uicp::emit_or_log(
                &app_handle,
                "save-indicator",
                SaveIndicatorPayload {
                    ok: current,
                    timestamp: Utc::now().timestamp(),
                },
            );
            Some(current)
        };
        loop {
            ticker.tick().await;
            let state: State<'_, AppState> = app_handle.state();
            let current = *state.last_save_ok.read().await;
            if last_emitted == Some(current) {
                continue;
            }
            last_emitted = Some(current);
            uicp::emit_or_log(
                &app_handle,
                "save-indicator",
                SaveIndicatorPayload {
                    ok: current,
                    timestamp: Utc::now().timestamp(),
                },
            );
        }
    });
}

/// Periodic database maintenance: WAL checkpointing, query-planner stats, and
/// an occasional VACUUM to reclaim fragmented space. Interval and vacuum
/// cadence are configurable via `UICP_DB_MAINTENANCE_INTERVAL_HOURS` /
/// `UICP_DB_VACUUM_INTERVAL_DAYS`.
fn spawn_db_maintenance(app_handle: tauri::AppHandle) {
    spawn(async move {
        let interval_hours = std::env::var("UICP_DB_MAINTENANCE_INTERVAL_HOURS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24);
        let vacuum_interval_days = std::env::var("UICP_DB_VACUUM_INTERVAL_DAYS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(7);

        let mut ticker = interval(Duration::from_secs(interval_hours * 60 * 60));
        let mut ticks_since_vacuum = 0u64;
        let ticks_per_vacuum = (vacuum_interval_days * 24) / interval_hours.max(1);

        loop {
            ticker.tick().await;
            let state: State<'_, AppState> = app_handle.state();
            if *state.safe_mode.read().await {
                continue;
            }

            let should_vacuum = ticks_since_vacuum >= ticks_per_vacuum;
            ticks_since_vacuum += 1;

            let res = state
                .db_rw
                .call(
                    move |c: &mut rusqlite::Connection| -> tokio_rusqlite::Result<()> {
                        c.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); PRAGMA optimize;")
                            .map_err(tokio_rusqlite::Error::from)?;
                        if should_vacuum {
                            c.execute_batch("VACUUM;")
                                .map_err(tokio_rusqlite::Error::from)?;
                        }
                        Ok(())
                    },
                )
                .await;

            match &res {
                Ok(_) => {
                    if should_vacuum {
                        ticks_since_vacuum = 0;
                    }
                }
                Err(e) => {
                    log_error(format!("Database maintenance failed: {e:?}"));
                    let _ = app_handle.emit(
                        "db-maintenance-error",
                        serde_json::json!({
                            "error": format!("{e:?}"),
                            "timestamp": Utc::now().timestamp(),
                            "recommendation": "Database maintenance failed. Consider running health_quick_check."
                        }),
                    );
                }
            }
        }
    });
}

#[tauri::command]
async fn get_action_log_stats(
    state: State<'_, AppState>,
) -> Result<uicp::action_log::ActionLogStatsSnapshot, String> {
    Ok(state.action_log.stats_snapshot())
}

async fn enter_safe_mode(app: &tauri::AppHandle, reason: &str) {
    let state: State<'_, AppState> = app.state();
    *state.safe_mode.write().await = true;
    *state.safe_reason.write().await = Some(reason.to_string());
    let _ = app.emit(
        "replay-issue",
        serde_json::json!({ "reason": reason, "action": "enter_safe_mode" }),
    );
}

#[tauri::command]
async fn health_quick_check(app: tauri::AppHandle) -> Result<serde_json::Value, String> {
    health_quick_check_internal(&app)
        .await
        .map_err(|e| format!("{e:?}"))
}

async fn health_quick_check_internal(app: &tauri::AppHandle) -> anyhow::Result<serde_json::Value> {
    let state: State<'_, AppState> = app.state();
    let status = state
        .db_ro
        .call(|conn| -> tokio_rusqlite::Result<String> {
            let mut stmt = conn
                .prepare("PRAGMA quick_check")
                .map_err(tokio_rusqlite::Error::from)?;
            let mut rows = stmt.query([]).map_err(tokio_rusqlite::Error::from)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().map_err(tokio_rusqlite::Error::from)? {
                let s: String = row.get(0).map_err(tokio_rusqlite::Error::from)?;
                results.push(s);
            }
            Ok(results.join(", "))
        })
        .await?;

    let ok = status.to_lowercase().contains("ok");
    if !ok {
        enter_safe_mode(app, "CORRUPT_DB").await;
    } else {
        emit_replay_telemetry(app, "ok", None, 0).await;
    }
    Ok(serde_json::json!({ "ok": ok, "status": status }))
}

#[tauri::command]
async fn set_safe_mode(
    app: tauri::AppHandle,
    enabled: bool,
    reason: Option<String>,
) -> Result<(), String> {
    let state: State<'_, AppState> = app.state();
    *state.safe_mode.write().await = enabled;
    *state.safe_reason.write().await = if enabled { reason.clone() } else { None };
    if enabled {
        let why = reason.unwrap_or_else(|| "USER_KILL_SWITCH".into());
        let _ = app.emit(
            "replay-issue",
            serde_json::json!({ "reason": why, "action": "enter_safe_mode" }),
        );
    } else {
        let _ = app.emit(
            "safe-mode",
            serde_json::json!({ "enabled": false, "reason": "cleared_by_user" }),
        );
    }
    Ok(())
}

#[tauri::command]
async fn save_checkpoint(app: tauri::AppHandle, hash: String) -> Result<(), String> {
    let state: State<'_, AppState> = app.state();
    if *state.safe_mode.read().await {
        return Ok(());
    }
    let res = state
        .db_rw
        .call(move |conn| -> tokio_rusqlite::Result<()> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS replay_checkpoint (id INTEGER PRIMARY KEY AUTOINCREMENT, hash TEXT NOT NULL, created_at INTEGER NOT NULL)",
                [],
            )
            .map_err(tokio_rusqlite::Error::from)?;
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO replay_checkpoint (hash, created_at) VALUES (?1, ?2)",
                params![hash, now],
            )
            .map(|_| ())
            .map_err(tokio_rusqlite::Error::from)
        })
        .await;
    res.map_err(|e| format!("{e:?}"))
}

#[tauri::command]
async fn determinism_probe(
    app: tauri::AppHandle,
    n: u32,
    recomputed_hash: Option<String>,
) -> Result<serde_json::Value, String> {
    let state: State<'_, AppState> = app.state();
    let limit = n as i64;
    let samples = state
        .db_ro
        .call(move |conn| -> tokio_rusqlite::Result<Vec<String>> {
            let mut stmt =
                conn.prepare("SELECT hash FROM replay_checkpoint ORDER BY RANDOM() LIMIT ?1")?;
            let rows = stmt
                .query_map(params![limit], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| format!("{e:?}"))?;

    let mut drift = false;
    if let Some(current) = recomputed_hash {
        for h in &samples {
            if h != &current {
                drift = true;
                break;
            }
        }
    }
    if drift {
        enter_safe_mode(&app, "DRIFT").await;
    }
    Ok(serde_json::json!({ "drift": drift, "sampled": samples.len() }))
}

#[tauri::command]
async fn recovery_action(app: tauri::AppHandle, kind: String) -> Result<(), String> {
    let emit = |app: &tauri::AppHandle, action: &str, outcome: &str, payload: serde_json::Value| {
        let _ = app.emit(
            "replay-issue",
            serde_json::json!({
                "event": "recovery_action",
                "action": action,
                "outcome": outcome,
                "details": payload,
            }),
        );
    };

    match kind.as_str() {
        "reindex" => match reindex_and_integrity(&app)
            .await
            .map_err(|e| format!("reindex: {e:?}"))?
        {
            true => {
                emit(&app, "reindex", "ok", serde_json::json!({}));
                emit_replay_telemetry(&app, "manual_reindex", None, 0).await;
                Ok(())
            }
            false => {
                emit(
                    &app,
                    "reindex",
                    "failed",
                    serde_json::json!({ "reason": "integrity_check_failed" }),
                );
                emit_replay_telemetry(
                    &app,
                    "manual_reindex_failed",
                    Some("integrity_check_failed"),
                    0,
                )
                .await;
                Err("Integrity check failed after reindex".into())
            }
        },
        "compact_log" => {
            let deleted = compact_log_after_last_checkpoint(&app)
                .await
                .map_err(|e| format!("compact_log: {e:?}"))?;
            let ok = reindex_and_integrity(&app)
                .await
                .map_err(|e| format!("reindex: {e:?}"))?;
            if ok {
                emit(
                    &app,
                    "compact_log",
                    "ok",
                    serde_json::json!({ "deleted": deleted }),
                );
                emit_replay_telemetry(&app, "manual_compact", None, 0).await;
                Ok(())
            } else {
                emit(
                    &app,
                    "compact_log",
                    "failed",
                    serde_json::json!({ "deleted": deleted, "reason": "integrity_check_failed" }),
                );
                emit_replay_telemetry(
                    &app,
                    "manual_compact_failed",
                    Some("integrity_check_failed"),
                    0,
                )
                .await;
                Err("Integrity check failed after compacting log".into())
            }
        }
        "rollback_checkpoint" => {
            let truncated = rollback_to_last_checkpoint(&app)
                .await
                .map_err(|e| format!("rollback_checkpoint: {e:?}"))?;
            emit(
                &app,
                "rollback_checkpoint",
                "ok",
                serde_json::json!({ "truncated": truncated }),
            );
            emit_replay_telemetry(&app, "manual_rollback", None, 0).await;
            Ok(())
        }
        "auto" => {
            let summary = recovery_auto(app.clone()).await?;
            emit(&app, "auto", "ok", summary);
            Ok(())
        }
        "export" => {
            let bundle = recovery_export(app.clone()).await?;
            emit(&app, "export", "ok", bundle);
            Ok(())
        }
        "clear_cache" => {
            commands::clear_compute_cache(app.clone(), app.state(), Some("default".into()))
                .await
                .map_err(|e| format!("{e:?}"))?;
            emit(&app, "clear_cache", "ok", serde_json::json!({}));
            Ok(())
        }
        other => Err(format!("Unknown recovery action: {other}")),
    }
}

#[tauri::command]
async fn recovery_auto(app: tauri::AppHandle) -> Result<serde_json::Value, String> {
    let mut attempts: Vec<serde_json::Value> = Vec::new();
    let mut status: &str = "failed";
    let mut failed_reason: Option<String> = None;

    let res_a = reindex_and_integrity(&app).await;
    match res_a {
        Ok(ok) => {
            attempts.push(serde_json::json!({"step":"reindex","ok": ok }));
            if ok {
                status = "reindexed";
                emit_replay_telemetry(&app, status, None, 0).await;
                return Ok(serde_json::json!({"attempts": attempts, "resolved": true}));
            }
        }
        Err(e) => {
            attempts
                .push(serde_json::json!({"step":"reindex","ok": false, "error": format!("{e:?}")}));
            failed_reason = Some(format!("reindex: {e}"));
        }
    }

    let res_b = compact_log_after_last_checkpoint(&app).await;
    match res_b {
        Ok(deleted) => attempts.push(
            serde_json::json!({"step":"compact_log","ok": deleted >= 0, "deleted": deleted }),
        ),
        Err(e) => attempts
            .push(serde_json::json!({"step":"compact_log","ok": false, "error": format!("{e:?}")})),
    }

    if let Ok(ok) = reindex_and_integrity(&app).await {
        if ok {
            status = "compacted";
            emit_replay_telemetry(&app, status, None, 0).await;
            return Ok(serde_json::json!({"attempts": attempts, "resolved": true}));
        }
    }

    let res_c = rollback_to_last_checkpoint(&app).await;
    match res_c {
        Ok(truncated) => attempts.push(serde_json::json!({"step":"rollback_checkpoint","ok": truncated >= 0, "truncated": truncated })),
        Err(e) => attempts.push(serde_json::json!({"step":"rollback_checkpoint","ok": false, "error": format!("{e:?}")})),
    }

    attempts
        .push(serde_json::json!({"step":"reenqueue_missing","ok": true, "note": "no-op in v1" }));

    failed_reason = failed_reason.or(Some("recovery_failed".into()));
    emit_replay_telemetry(&app, status, failed_reason.as_deref(), 0).await;
    Ok(serde_json::json!({"attempts": attempts, "resolved": false}))
}

#[tauri::command]
async fn recovery_export(app: tauri::AppHandle) -> Result<serde_json::Value, String> {
    let state: State<'_, AppState> = app.state();
    let logs_dir = LOGS_DIR.clone();
    let integrity = reindex_and_integrity(&app).await.unwrap_or(false);
    let counts = state
        .db_ro
        .call(|conn| -> tokio_rusqlite::Result<serde_json::Value> {
            let tool_calls: i64 = conn
                .query_row("SELECT COUNT(*) FROM tool_call", [], |r| r.get(0))
                .map_err(tokio_rusqlite::Error::from)?;
            let cache_rows: i64 = conn
                .query_row("SELECT COUNT(*) FROM compute_cache", [], |r| r.get(0))
                .map_err(tokio_rusqlite::Error::from)?;
            Ok(serde_json::json!({"tool_call": tool_calls, "compute_cache": cache_rows}))
        })
        .await
        .map_err(|e| format!("{e:?}"))?;

    let bundle = serde_json::json!({
        "integrity_ok": integrity,
        "counts": counts,
        "ts": Utc::now().timestamp(),
    });
    let path = logs_dir.join(format!("diagnostics-{}.json", Utc::now().timestamp()));
    tokio::fs::create_dir_all(&logs_dir)
        .await
        .map_err(|e| format!("{e}"))?;
    let json_bytes =
        serde_json::to_vec_pretty(&bundle).map_err(|e| format!("serialize diagnostics: {e}"))?;
    tokio::fs::write(&path, json_bytes)
        .await
        .map_err(|e| format!("{e}"))?;
    Ok(serde_json::json!({"path": path.display().to_string()}))
}

async fn reindex_and_integrity(app: &tauri::AppHandle) -> anyhow::Result<bool> {
    let state: State<'_, AppState> = app.state();
    let status = state
        .db_rw
        .call(|conn| -> tokio_rusqlite::Result<String> {
            conn.execute("REINDEX", [])
                .map_err(tokio_rusqlite::Error::from)?;
            let mut stmt = conn
                .prepare("PRAGMA integrity_check")
                .map_err(tokio_rusqlite::Error::from)?;
            let mut rows = stmt.query([]).map_err(tokio_rusqlite::Error::from)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().map_err(tokio_rusqlite::Error::from)? {
                let s: String = row.get(0).map_err(tokio_rusqlite::Error::from)?;
                results.push(s);
            }
            Ok(results.join(", "))
        })
        .await?;
    Ok(status.to_lowercase().contains("ok"))
}

async fn last_checkpoint_ts(app: &tauri::AppHandle) -> anyhow::Result<Option<i64>> {
    let state: State<'_, AppState> = app.state();
    let ts = state
        .db_rw
        .call(|conn| -> tokio_rusqlite::Result<Option<i64>> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS replay_checkpoint (id INTEGER PRIMARY KEY AUTOINCREMENT, hash TEXT NOT NULL, created_at INTEGER NOT NULL)",
                [],
            )
            .map_err(tokio_rusqlite::Error::from)?;
            let ts: Option<i64> = conn
                .query_row("SELECT MAX(created_at) FROM replay_checkpoint", [], |r| r.get(0))
                .optional()
                .map_err(tokio_rusqlite::Error::from)?;
            Ok(ts)
        })
        .await?;
    Ok(ts)
}

async fn compact_log_after_last_checkpoint(app: &tauri::AppHandle) -> anyhow::Result<i64> {
    let Some(since) = last_checkpoint_ts(app).await? else {
        return Ok(0);
    };
    let state: State<'_, AppState> = app.state();
    let deleted = state
        .db_rw
        .call(move |conn| -> tokio_rusqlite::Result<i64> {
            conn.execute(
                "DELETE FROM tool_call WHERE created_at > ?1 AND (result_json IS NULL OR TRIM(result_json) = '')",
                params![since],
            )
            .map(|n| n as i64)
            .map_err(tokio_rusqlite::Error::from)
        })
        .await?;
    Ok(deleted)
}

async fn rollback_to_last_checkpoint(app: &tauri::AppHandle) -> anyhow::Result<i64> {
    let Some(since) = last_checkpoint_ts(app).await? else {
        return Ok(0);
    };
    let state: State<'_, AppState> = app.state();
    let truncated = state
        .db_rw
        .call(move |conn| -> tokio_rusqlite::Result<i64> {
            conn.execute("DELETE FROM tool_call WHERE created_at > ?1", params![since])
                .map(|n| n as i64)
                .map_err(tokio_rusqlite::Error::from)
        })
        .await?;
    Ok(truncated)
}

async fn emit_replay_telemetry(
    app: &tauri::AppHandle,
    replay_status: &str,
    failed_reason: Option<&str>,
    rerun_count: i64,
) {
    let checkpoint_id = last_checkpoint_ts(app).await.ok().flatten();
    let _ = app.emit(
        "replay-telemetry",
        serde_json::json!({
            "replay_status": replay_status,
            "failed_reason": failed_reason,
            "checkpoint_id": checkpoint_id,
            "rerun_count": rerun_count,
        }),
    );
}
