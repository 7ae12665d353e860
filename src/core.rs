use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use dirs::document_dir;
use once_cell::sync::Lazy;
use reqwest::Client;
use rusqlite::{params, Connection};
use tauri::{async_runtime::JoinHandle, Emitter, Manager, State};
use tokio::sync::{watch, RwLock, Semaphore};

use crate::action_log::ActionLogHandle;
use crate::bus::EventBus;
use crate::queue::QueueState;

// ----------------------------------------------------------------------------
// Constants and paths
// ----------------------------------------------------------------------------

pub static APP_NAME: &str = "UICP";

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var("UICP_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = document_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_NAME)
});

pub static LOGS_DIR: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("logs"));
pub static FILES_DIR: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("files"));
pub static MODULES_DIR: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join(crate::config::paths::MODULES_DIR));

pub fn files_dir_path() -> &'static std::path::Path {
    &FILES_DIR
}

// ----------------------------------------------------------------------------
// App state
// ----------------------------------------------------------------------------

/// Shared application state handed to every Tauri command.
///
/// `db_ro`/`db_rw` are separate async sqlite handles so cache reads never
/// queue behind a writer holding the single-writer sqlite lock.
pub struct AppState {
    pub db_path: PathBuf,
    pub db_ro: tokio_rusqlite::Connection,
    pub db_rw: tokio_rusqlite::Connection,
    pub http: Client,
    pub action_log: ActionLogHandle,
    pub last_save_ok: RwLock<bool>,
    pub debug_enabled: RwLock<bool>,
    pub ongoing: RwLock<HashMap<String, JoinHandle<()>>>,
    pub compute_ongoing: RwLock<HashMap<String, JoinHandle<()>>>,
    /// Single bounded run-queue shared by module (WASM) and non-module
    /// compute jobs alike, capped at `compute_concurrency()`.
    pub compute_sem: Arc<Semaphore>,
    pub compute_cancel: RwLock<HashMap<String, watch::Sender<bool>>>,
    pub safe_mode: RwLock<bool>,
    pub safe_reason: RwLock<Option<String>>,
    pub queue: QueueState,
    pub bus: EventBus,
    pub codegen_progress: RwLock<HashMap<String, CodegenProgressTarget>>,
}

/// Where a `needs.code` job's progress/result should be rendered, stashed at
/// submission time since `ComputeJobSpec` itself carries no UI-routing
/// fields (see spec's JobSpec shape) and read back by [`crate::codegen`]
/// when the job's final event fires.
#[derive(Debug, Clone)]
pub struct CodegenProgressTarget {
    pub workspace_id: String,
    pub window_id: String,
    pub selector: String,
}

impl AppState {
    pub fn compute_concurrency() -> usize {
        if let Ok(raw) = std::env::var("UICP_COMPUTE_CONCURRENCY") {
            if let Ok(n) = raw.parse::<usize>() {
                return n.clamp(1, 32);
            }
        }
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        hw.min(4)
    }
}

pub async fn build_app_state(db_path: PathBuf) -> anyhow::Result<AppState> {
    init_database(&db_path).context("init database")?;
    ensure_default_workspace(&db_path).context("ensure default workspace")?;

    let db_ro = tokio_rusqlite::Connection::open(&db_path)
        .await
        .context("open async sqlite (ro)")?;
    let db_rw = tokio_rusqlite::Connection::open(&db_path)
        .await
        .context("open async sqlite (rw)")?;
    db_ro
        .call(|conn| configure_sqlite(conn).map_err(tokio_rusqlite::Error::Other))
        .await
        .context("configure sqlite (ro)")?;
    db_rw
        .call(|conn| configure_sqlite(conn).map_err(tokio_rusqlite::Error::Other))
        .await
        .context("configure sqlite (rw)")?;

    let action_log: ActionLogHandle =
        crate::action_log::ActionLogService::start(&LOGS_DIR.join("action_log.sqlite3"))
            .context("start action log")?;

    Ok(AppState {
        db_path,
        db_ro,
        db_rw,
        http: Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?,
        action_log,
        last_save_ok: RwLock::new(true),
        debug_enabled: RwLock::new(false),
        ongoing: RwLock::new(HashMap::new()),
        compute_ongoing: RwLock::new(HashMap::new()),
        compute_sem: Arc::new(Semaphore::new(AppState::compute_concurrency())),
        compute_cancel: RwLock::new(HashMap::new()),
        safe_mode: RwLock::new(false),
        safe_reason: RwLock::new(None),
        queue: QueueState::new(),
        bus: EventBus::new(),
        codegen_progress: RwLock::new(HashMap::new()),
    })
}

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

pub fn configure_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.busy_timeout(Duration::from_millis(5_000))
        .context("sqlite busy_timeout 5s")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("sqlite journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("sqlite synchronous=NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("sqlite foreign_keys=ON")?;
    Ok(())
}

pub fn init_database(db_path: &PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&*DATA_DIR).context("create data dir")?;
    std::fs::create_dir_all(&*LOGS_DIR).context("create logs dir")?;
    std::fs::create_dir_all(&*FILES_DIR).context("create files dir")?;
    std::fs::create_dir_all(&*MODULES_DIR).context("create modules dir")?;
    let conn = Connection::open(db_path).context("open sqlite")?;
    configure_sqlite(&conn).context("configure sqlite init")?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workspace (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS window (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            title TEXT NOT NULL,
            size TEXT NOT NULL,
            x REAL,
            y REAL,
            width REAL,
            height REAL,
            z_index INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(workspace_id) REFERENCES workspace(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS window_content (
            window_id TEXT NOT NULL,
            target TEXT NOT NULL,
            html TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (window_id, target),
            FOREIGN KEY(window_id) REFERENCES window(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS tool_call (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            args_json TEXT NOT NULL,
            result_json TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(workspace_id) REFERENCES workspace(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS compute_cache (
            workspace_id TEXT NOT NULL,
            key TEXT NOT NULL,
            task TEXT NOT NULL,
            env_hash TEXT NOT NULL,
            value_json TEXT NOT NULL,
            bytes INTEGER NOT NULL DEFAULT 0,
            replayable INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            last_hit_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, key)
        );
        CREATE TABLE IF NOT EXISTS component (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            window_id TEXT,
            target TEXT NOT NULL,
            props_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS state_entry (
            workspace_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, scope, key)
        );
        CREATE TABLE IF NOT EXISTS codegen_golden (
            workspace_id TEXT NOT NULL,
            golden_key TEXT NOT NULL,
            task TEXT NOT NULL,
            output_hash TEXT NOT NULL,
            value_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, golden_key)
        );
        "#,
    )
    .context("apply migrations")?;

    match conn.execute("ALTER TABLE window ADD COLUMN width REAL DEFAULT 640", []) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column name") => {}
        Err(err) => return Err(err.into()),
    }
    match conn.execute("ALTER TABLE window ADD COLUMN height REAL DEFAULT 480", []) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column name") => {}
        Err(err) => return Err(err.into()),
    }
    migrate_compute_cache(&conn).context("migrate compute_cache schema")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_compute_cache_task_env ON compute_cache (workspace_id, task, env_hash)",
        [],
    )
    .context("ensure compute_cache task/env index")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_compute_cache_ws_created ON compute_cache (workspace_id, created_at)",
        [],
    )
    .context("ensure compute_cache eviction index")?;

    Ok(())
}

pub fn ensure_default_workspace(db_path: &PathBuf) -> anyhow::Result<()> {
    let conn = Connection::open(db_path).context("open sqlite for default workspace")?;
    configure_sqlite(&conn).context("configure sqlite for default workspace")?;
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO workspace (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params!["default", "Default Workspace", now],
    )
    .context("insert default workspace")?;
    Ok(())
}

fn migrate_compute_cache(conn: &Connection) -> anyhow::Result<()> {
    let mut has_workspace_column = false;
    let mut has_bytes_column = false;
    let mut has_replayable_column = false;
    let mut has_last_hit_column = false;
    {
        let mut stmt = conn
            .prepare("PRAGMA table_info('compute_cache')")
            .context("inspect compute_cache schema")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            match name.as_str() {
                "workspace_id" => has_workspace_column = true,
                "bytes" => has_bytes_column = true,
                "replayable" => has_replayable_column = true,
                "last_hit_at" => has_last_hit_column = true,
                _ => {}
            }
        }
    }
    if !has_workspace_column {
        match conn.execute(
            "ALTER TABLE compute_cache ADD COLUMN workspace_id TEXT DEFAULT 'default'",
            [],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column name") => {}
            Err(err) => return Err(err.into()),
        }
    }
    if !has_bytes_column {
        conn.execute("ALTER TABLE compute_cache ADD COLUMN bytes INTEGER NOT NULL DEFAULT 0", [])
            .context("add bytes column")?;
    }
    if !has_replayable_column {
        conn.execute(
            "ALTER TABLE compute_cache ADD COLUMN replayable INTEGER NOT NULL DEFAULT 1",
            [],
        )
        .context("add replayable column")?;
    }
    if !has_last_hit_column {
        conn.execute(
            "ALTER TABLE compute_cache ADD COLUMN last_hit_at INTEGER NOT NULL DEFAULT 0",
            [],
        )
        .context("add last_hit_at column")?;
    }

    conn.execute(
        "UPDATE compute_cache SET workspace_id = 'default' WHERE workspace_id IS NULL",
        [],
    )
    .context("backfill null workspace_id values")?;

    let mut pk_columns: Vec<String> = Vec::new();
    {
        let mut stmt = conn
            .prepare("PRAGMA table_info('compute_cache')")
            .context("inspect compute_cache primary key")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let pk_pos: i32 = row.get(5)?;
            if pk_pos > 0 {
                pk_columns.push(name);
            }
        }
    }
    pk_columns.sort();
    if pk_columns == ["key".to_string(), "workspace_id".to_string()] {
        return Ok(());
    }

    conn.execute("DROP TABLE IF EXISTS compute_cache_new", [])
        .context("drop stale compute_cache_new helper table")?;

    conn.execute_batch(
        r#"
        BEGIN IMMEDIATE;
        CREATE TABLE compute_cache_new (
            workspace_id TEXT NOT NULL,
            key TEXT NOT NULL,
            task TEXT NOT NULL,
            env_hash TEXT NOT NULL,
            value_json TEXT NOT NULL,
            bytes INTEGER NOT NULL DEFAULT 0,
            replayable INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            last_hit_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, key)
        );
        INSERT INTO compute_cache_new (workspace_id, key, task, env_hash, value_json, bytes, replayable, created_at, last_hit_at)
        SELECT workspace_id, key, task, env_hash, value_json, bytes, replayable, created_at, last_hit_at
        FROM (
            SELECT
                workspace_id,
                key,
                task,
                env_hash,
                value_json,
                bytes,
                replayable,
                created_at,
                last_hit_at,
                ROW_NUMBER() OVER (
                    PARTITION BY workspace_id, key
                    ORDER BY created_at DESC, rowid DESC
                ) AS rn
            FROM compute_cache
        )
        WHERE rn = 1;
        DROP TABLE compute_cache;
        ALTER TABLE compute_cache_new RENAME TO compute_cache;
        COMMIT;
        "#,
    )
    .context("rebuild compute_cache with composite primary key")?;

    Ok(())
}

pub fn emit_or_log<T>(app_handle: &tauri::AppHandle, event: &str, payload: T)
where
    T: serde::Serialize + Clone,
{
    if let Err(err) = app_handle.emit(event, payload) {
        eprintln!("Failed to emit {event}: {err}");
    }
}

/// Remove a compute job from the ongoing map. Used by the compute host to release state.
pub async fn remove_compute_job(app_handle: &tauri::AppHandle, job_id: &str) {
    let state: State<'_, crate::AppState> = app_handle.state();
    state.compute_ongoing.write().await.remove(job_id);
}

// ----------------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------------

/// Install the process-wide tracing subscriber. A no-op unless built with
/// `otel_spans`, in which case it reads `RUST_LOG` the usual way.
pub fn init_tracing() {
    #[cfg(feature = "otel_spans")]
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

pub fn log_info(msg: String) {
    #[cfg(feature = "otel_spans")]
    tracing::info!(target = "uicp", "{msg}");
    #[cfg(not(feature = "otel_spans"))]
    println!("[INFO] {msg}");
}

pub fn log_warn(msg: String) {
    #[cfg(feature = "otel_spans")]
    tracing::warn!(target = "uicp", "{msg}");
    #[cfg(not(feature = "otel_spans"))]
    println!("[WARN] {msg}");
}

pub fn log_error(msg: String) {
    #[cfg(feature = "otel_spans")]
    tracing::error!(target = "uicp", "{msg}");
    #[cfg(not(feature = "otel_spans"))]
    println!("[ERROR] {msg}");
}
