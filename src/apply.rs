//! Apply Engine: the operation dispatch table the queue's per-window
//! partitions run against. One [`dispatch`] call per envelope; the queue
//! handles ordering, idempotency, and partitioning upstream of this module.

use serde::Serialize;
use tauri::AppHandle;

use crate::config::errors::{
    ERR_FS_WRITE_DENIED, ERR_HOST_FAULT, ERR_HTTP_METHOD_DENIED, ERR_HTTP_SCHEME_UNKNOWN,
    ERR_HTTP_TRANSPORT, ERR_SANITIZE_REJECTED, ERR_WINDOW_NOT_FOUND,
};
use crate::envelope::{params, Envelope};
use crate::gate::{self, BaseDir, Route};
use crate::state_store::{self, Scope};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeError {
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// What stopped an envelope from applying cleanly. `Ok(())` from [`dispatch`]
/// means the operation's effects are committed; either variant here means
/// they are not.
pub enum EnvelopeOutcome {
    DeniedByPolicy(String),
    Error(String, String),
}

fn fault(message: impl Into<String>) -> EnvelopeOutcome {
    EnvelopeOutcome::Error(ERR_HOST_FAULT.to_string(), message.into())
}

/// Apply one envelope's operation against `workspace_id`. Dispatches purely on
/// `envelope.op`; the envelope's own schema was already validated by
/// [`crate::envelope::validate_batch`] before the queue got this far.
pub async fn dispatch(
    app: &AppHandle,
    state: &AppState,
    workspace_id: &str,
    envelope: &Envelope,
) -> Result<(), EnvelopeOutcome> {
    match envelope.op.as_str() {
        "window.create" => window_create(state, workspace_id, envelope).await,
        "window.update" => window_update(state, workspace_id, envelope).await,
        "window.close" => window_close(state, workspace_id, envelope).await,
        "dom.set" => dom_write(state, workspace_id, envelope, DomWrite::Set).await,
        "dom.replace" => dom_write(state, workspace_id, envelope, DomWrite::Replace).await,
        "dom.append" => dom_write(state, workspace_id, envelope, DomWrite::Append).await,
        "component.render" => component_render(state, workspace_id, envelope).await,
        "component.update" => component_update(state, workspace_id, envelope).await,
        "component.destroy" => component_destroy(state, workspace_id, envelope).await,
        "state.set" => state_set(state, workspace_id, envelope).await,
        "state.get" => state_get(state, workspace_id, envelope).await,
        "api.call" => api_call(app, state, workspace_id, envelope).await,
        "txn.cancel" => txn_cancel(app, state, envelope).await,
        "needs.code" => needs_code(app, state, workspace_id, envelope).await,
        other => Err(EnvelopeOutcome::Error(
            crate::config::errors::ERR_UNKNOWN_OP.to_string(),
            format!("unknown op {other}"),
        )),
    }
}

fn parse<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, EnvelopeOutcome> {
    serde_json::from_value(envelope.params.clone())
        .map_err(|err| EnvelopeOutcome::Error(crate::config::errors::ERR_SCHEMA_INVALID.to_string(), err.to_string()))
}

// ---------------------------------------------------------------------------
// window.* — the `window` table
// ---------------------------------------------------------------------------

/// Insert a window row, or update it in place if `id` already exists.
/// Shared by `window.create` and `window.update`'s `ensureExists` on-demand
/// creation path.
async fn upsert_window(
    state: &AppState,
    workspace_id: &str,
    id: &str,
    title_text: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
) -> anyhow::Result<()> {
    let workspace_id = workspace_id.to_string();
    let id = id.to_string();
    let now = chrono::Utc::now().timestamp();
    let width = width.unwrap_or(640.0);
    let height = height.unwrap_or(480.0);
    let x = x.unwrap_or(40.0);
    let y = y.unwrap_or(40.0);
    let title = title_text.unwrap_or_default();
    state
        .db_rw
        .call(move |conn| {
            conn.execute(
                "INSERT INTO window (id, workspace_id, title, size, x, y, width, height, z_index, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'md', ?4, ?5, ?6, ?7, 0, ?8, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    x = excluded.x, y = excluded.y,
                    width = excluded.width, height = excluded.height,
                    updated_at = excluded.updated_at",
                rusqlite::params![id, workspace_id, title, x, y, width, height, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("window upsert failed: {err}"))
}

/// Insert a bare window row with default geometry if `id` doesn't already
/// exist, leaving an existing row untouched. Backs the `ensureWindowExists`
/// auto-provision path for `dom.append` and the unconditional "ensures
/// window" behavior `component.render` is specified to have.
async fn ensure_window(state: &AppState, workspace_id: &str, window_id: &str) -> anyhow::Result<()> {
    let workspace_id = workspace_id.to_string();
    let window_id = window_id.to_string();
    let now = chrono::Utc::now().timestamp();
    state
        .db_rw
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO window (id, workspace_id, title, size, x, y, width, height, z_index, created_at, updated_at)
                 VALUES (?1, ?2, '', 'md', 40.0, 40.0, 640.0, 480.0, 0, ?3, ?3)",
                rusqlite::params![window_id, workspace_id, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("ensure_window failed: {err}"))
}

async fn window_create(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::WindowCreate = parse(envelope)?;
    upsert_window(state, workspace_id, &p.id, p.title_text, p.x, p.y, p.width, p.height)
        .await
        .map_err(|err| fault(format!("window.create failed: {err}")))
}

async fn window_update(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::WindowUpdate = parse(envelope)?;
    let ensure_exists = p.ensure_exists.unwrap_or(false);
    let workspace_id_owned = workspace_id.to_string();
    let now = chrono::Utc::now().timestamp();
    let (id, title_text, x, y, width, height) =
        (p.id.clone(), p.title_text.clone(), p.x, p.y, p.width, p.height);
    let affected = state
        .db_rw
        .call({
            let workspace_id = workspace_id_owned.clone();
            move |conn| {
                let affected = conn.execute(
                    "UPDATE window SET
                        title = COALESCE(?1, title),
                        x = COALESCE(?2, x),
                        y = COALESCE(?3, y),
                        width = COALESCE(?4, width),
                        height = COALESCE(?5, height),
                        updated_at = ?6
                     WHERE id = ?7 AND workspace_id = ?8",
                    rusqlite::params![title_text, x, y, width, height, now, id, workspace_id],
                )?;
                Ok(affected)
            }
        })
        .await
        .map_err(|err| fault(format!("window.update failed: {err}")))?;
    if affected == 0 {
        if !ensure_exists {
            return Err(EnvelopeOutcome::Error(ERR_WINDOW_NOT_FOUND.to_string(), format!("window {} not found", p.id)));
        }
        upsert_window(state, &workspace_id_owned, &p.id, p.title_text, p.x, p.y, p.width, p.height)
            .await
            .map_err(|err| fault(format!("window.update ensureExists create failed: {err}")))?;
    }
    Ok(())
}

async fn window_close(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::WindowClose = parse(envelope)?;
    let workspace_id = workspace_id.to_string();
    state
        .db_rw
        .call(move |conn| {
            conn.execute("DELETE FROM window WHERE id = ?1 AND workspace_id = ?2", rusqlite::params![p.id, workspace_id])?;
            Ok(())
        })
        .await
        .map_err(|err| fault(format!("window.close failed: {err}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// dom.* — the `window_content` table
// ---------------------------------------------------------------------------

enum DomWrite {
    Set,
    Replace,
    Append,
}

async fn dom_write(state: &AppState, workspace_id: &str, envelope: &Envelope, mode: DomWrite) -> Result<(), EnvelopeOutcome> {
    let (target, html, ensure_window_flag, window_id) = match mode {
        DomWrite::Set => {
            let p: params::DomSet = parse(envelope)?;
            (p.target, p.html, false, envelope.window_id.clone())
        }
        DomWrite::Replace => {
            let p: params::DomReplace = parse(envelope)?;
            (p.target, p.html, false, envelope.window_id.clone())
        }
        DomWrite::Append => {
            let p: params::DomAppend = parse(envelope)?;
            (p.target, p.html, p.ensure_window_exists.unwrap_or(false), envelope.window_id.clone())
        }
    };
    let window_id = window_id.ok_or_else(|| {
        EnvelopeOutcome::Error(ERR_WINDOW_NOT_FOUND.to_string(), "dom op missing windowId".to_string())
    })?;

    // HTML written to DOM is always `sanitizeHtmlStrict(input.html)` — there is
    // no caller-facing opt-out (spec.md §8 property #3 is a universal invariant).
    let clean_html = crate::sanitize::sanitize_html_strict(&html);
    if crate::sanitize::contains_disallowed_content(&clean_html) {
        return Err(EnvelopeOutcome::Error(
            ERR_SANITIZE_REJECTED.to_string(),
            "sanitized output still contains disallowed content".to_string(),
        ));
    }

    if ensure_window_flag {
        ensure_window(state, workspace_id, &window_id)
            .await
            .map_err(|err| fault(format!("dom write ensureWindowExists failed: {err}")))?;
    }

    let append = matches!(mode, DomWrite::Append);
    write_window_html(state, &window_id, &target, clean_html, append)
        .await
        .map_err(|err| fault(format!("dom write failed: {err}")))
}

/// Write already-sanitized HTML into `(window_id, target)`, optionally
/// appending to the prior value. Shared by the `dom.*` dispatch arms above
/// and by [`crate::codegen`]'s progress/result writes into a caller-supplied
/// `progressWindowId`/`progressSelector`, which bypass envelope dispatch
/// entirely (the codegen job is the one driving the write, not a queued op).
pub async fn write_window_html(state: &AppState, window_id: &str, target: &str, html: String, append: bool) -> anyhow::Result<()> {
    let window_id = window_id.to_string();
    let target = target.to_string();
    let now = chrono::Utc::now().timestamp();
    state
        .db_rw
        .call(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT html FROM window_content WHERE window_id = ?1 AND target = ?2",
                    rusqlite::params![window_id, target],
                    |row| row.get(0),
                )
                .ok();
            let merged = match (&existing, append) {
                (Some(prior), true) => format!("{prior}{html}"),
                _ => html.clone(),
            };
            conn.execute(
                "INSERT INTO window_content (window_id, target, html, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(window_id, target) DO UPDATE SET
                    html = excluded.html,
                    version = window_content.version + 1,
                    updated_at = excluded.updated_at",
                rusqlite::params![window_id, target, merged, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("window_content write failed: {err}"))
}

// ---------------------------------------------------------------------------
// component.* — the `component` table
// ---------------------------------------------------------------------------

async fn component_render(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::ComponentRender = parse(envelope)?;
    // component.render always ensures its window exists (spec.md §4.4), unlike
    // dom.append where auto-provisioning is opt-in via ensureWindowExists.
    if let Some(window_id) = envelope.window_id.as_deref() {
        ensure_window(state, workspace_id, window_id)
            .await
            .map_err(|err| fault(format!("component.render ensure window failed: {err}")))?;
    }
    install_component(state, workspace_id, envelope.window_id.clone(), &p.id, &p.target, &p.props)
        .await
        .map_err(|err| fault(format!("component.render failed: {err}")))
}

/// Insert or update a `component` row directly, bypassing envelope dispatch.
/// Shared by the `component.render` arm above and by [`crate::codegen`]'s
/// auto-install of a `script.panel` component once a `needs.code` job's
/// artifact is ready.
pub async fn install_component(state: &AppState, workspace_id: &str, window_id: Option<String>, id: &str, target: &str, props: &serde_json::Value) -> anyhow::Result<()> {
    let workspace_id = workspace_id.to_string();
    let id = id.to_string();
    let target = target.to_string();
    let props_json = serde_json::to_string(props).unwrap_or_else(|_| "null".to_string());
    let now = chrono::Utc::now().timestamp();
    state
        .db_rw
        .call(move |conn| {
            conn.execute(
                "INSERT INTO component (id, workspace_id, window_id, target, props_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    target = excluded.target,
                    props_json = excluded.props_json,
                    updated_at = excluded.updated_at",
                rusqlite::params![id, workspace_id, window_id, target, props_json, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("component write failed: {err}"))
}

async fn component_update(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::ComponentUpdate = parse(envelope)?;
    let workspace_id = workspace_id.to_string();
    let props_json = serde_json::to_string(&p.props).unwrap_or_else(|_| "null".to_string());
    let now = chrono::Utc::now().timestamp();
    let affected = state
        .db_rw
        .call(move |conn| {
            let affected = conn.execute(
                "UPDATE component SET props_json = ?1, updated_at = ?2 WHERE id = ?3 AND workspace_id = ?4",
                rusqlite::params![props_json, now, p.id, workspace_id],
            )?;
            Ok(affected)
        })
        .await
        .map_err(|err| fault(format!("component.update failed: {err}")))?;
    if affected == 0 {
        return Err(EnvelopeOutcome::Error(ERR_WINDOW_NOT_FOUND.to_string(), format!("component {} not found", p.id)));
    }
    Ok(())
}

async fn component_destroy(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::ComponentDestroy = parse(envelope)?;
    let workspace_id = workspace_id.to_string();
    state
        .db_rw
        .call(move |conn| {
            conn.execute("DELETE FROM component WHERE id = ?1 AND workspace_id = ?2", rusqlite::params![p.id, workspace_id])?;
            Ok(())
        })
        .await
        .map_err(|err| fault(format!("component.destroy failed: {err}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// state.* — delegates to state_store
// ---------------------------------------------------------------------------

async fn state_set(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::StateSet = parse(envelope)?;
    let scope = Scope::parse(&p.scope).ok_or_else(|| {
        EnvelopeOutcome::Error(crate::config::errors::ERR_SCHEMA_INVALID.to_string(), format!("unknown scope {}", p.scope))
    })?;
    state_store::set(state, workspace_id, scope, &p.key, p.value)
        .await
        .map_err(|err| fault(format!("state.set failed: {err}")))
}

async fn state_get(state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::StateGet = parse(envelope)?;
    let scope = Scope::parse(&p.scope).ok_or_else(|| {
        EnvelopeOutcome::Error(crate::config::errors::ERR_SCHEMA_INVALID.to_string(), format!("unknown scope {}", p.scope))
    })?;
    let value = state_store::get(state, workspace_id, scope, &p.key)
        .await
        .map_err(|err| fault(format!("state.get failed: {err}")))?
        .unwrap_or(serde_json::Value::Null);
    if let Some(to_state_path) = p.to_state_path {
        if let Some((dest_scope_raw, dest_key)) = to_state_path.split_once(':') {
            if let Some(dest_scope) = Scope::parse(dest_scope_raw) {
                state_store::set(state, workspace_id, dest_scope, dest_key, value)
                    .await
                    .map_err(|err| fault(format!("state.get bind failed: {err}")))?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// api.call — routed through the policy gate
// ---------------------------------------------------------------------------

async fn api_call(app: &AppHandle, state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::ApiCall = parse(envelope)?;
    match gate::route_url(&p.url) {
        Route::ComputeCall => dispatch_compute_call(app, state, workspace_id, &p).await,
        Route::Intent => dispatch_intent(app, state, envelope, &p).await,
        Route::FsWriteTextFile => fs_write_text_file(&p).await,
        Route::Http { url } => http_call(state, &p, &url).await,
        Route::Unknown => Ok(()),
    }
}

/// `uicp://intent` is either a structured clarifier (body `{type:"clarifier",
/// fields:[{key,label,...}], target?}`, rendered as a form into the envelope's
/// window) or free text, dispatched as a `uicp-intent` event for the planner
/// to pick up. The clarifier shape is not attested anywhere in the corpus
/// this crate was grounded on; `"type": "clarifier"` plus a non-empty
/// `fields` array is this crate's own, narrowly-scoped reading of "a
/// structured clarifier form" (see DESIGN.md Open Question resolutions).
async fn dispatch_intent(app: &AppHandle, state: &AppState, envelope: &Envelope, p: &params::ApiCall) -> Result<(), EnvelopeOutcome> {
    let is_clarifier = p.body.get("type").and_then(|v| v.as_str()) == Some("clarifier")
        && p.body
            .get("fields")
            .and_then(|v| v.as_array())
            .is_some_and(|fields| !fields.is_empty());

    if is_clarifier {
        if let Some(window_id) = envelope.window_id.clone() {
            let target = p
                .body
                .get("target")
                .and_then(|v| v.as_str())
                .unwrap_or("#root")
                .to_string();
            let prompt = p.body.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
            let fields = p.body["fields"].as_array().cloned().unwrap_or_default();
            let form_html = render_clarifier_form(prompt, &fields);
            let clean_html = crate::sanitize::sanitize_html_strict(&form_html);
            write_window_html(state, &window_id, &target, clean_html, false)
                .await
                .map_err(|err| fault(format!("clarifier render failed: {err}")))?;
            return Ok(());
        }
    }

    crate::emit_or_log(app, "uicp-intent", serde_json::json!({ "url": p.url, "body": p.body }));
    Ok(())
}

fn render_clarifier_form(prompt: &str, fields: &[serde_json::Value]) -> String {
    use std::fmt::Write as _;
    let mut html = String::from("<form class=\"uicp-clarifier\">");
    if !prompt.is_empty() {
        let _ = write!(html, "<p class=\"uicp-clarifier-prompt\">{prompt}</p>");
    }
    for field in fields {
        let key = field.get("key").and_then(|v| v.as_str()).unwrap_or("value");
        let label = field.get("label").and_then(|v| v.as_str()).unwrap_or(key);
        let _ = write!(
            html,
            "<label>{label}<input name=\"{key}\" type=\"text\" /></label>"
        );
    }
    html.push_str("<button type=\"submit\">Continue</button></form>");
    html
}

async fn dispatch_compute_call(app: &AppHandle, _state: &AppState, workspace_id: &str, p: &params::ApiCall) -> Result<(), EnvelopeOutcome> {
    let spec: crate::ComputeJobSpec = serde_json::from_value(p.body.clone()).map_err(|err| {
        EnvelopeOutcome::Error(crate::config::errors::ERR_SCHEMA_INVALID.to_string(), format!("invalid compute.call body: {err}"))
    })?;
    let mut spec = spec;
    if spec.workspace_id.is_empty() {
        spec.workspace_id = workspace_id.to_string();
    }
    crate::commands::compute::submit(app.clone(), spec)
        .await
        .map_err(|err| fault(format!("compute.call dispatch failed: {err}")))
}

async fn fs_write_text_file(p: &params::ApiCall) -> Result<(), EnvelopeOutcome> {
    let obj = p.body.as_object().ok_or_else(|| {
        EnvelopeOutcome::Error(ERR_FS_WRITE_DENIED.to_string(), "fs write body must be an object".to_string())
    })?;
    let base_dir_raw = obj.get("baseDir").and_then(|v| v.as_str()).unwrap_or("AppData");
    let base_dir = BaseDir::parse(base_dir_raw).ok_or_else(|| {
        EnvelopeOutcome::Error(ERR_FS_WRITE_DENIED.to_string(), format!("unknown base dir {base_dir_raw}"))
    })?;
    let path = obj.get("path").and_then(|v| v.as_str()).ok_or_else(|| {
        EnvelopeOutcome::Error(ERR_FS_WRITE_DENIED.to_string(), "missing path".to_string())
    })?;
    let contents = obj.get("contents").and_then(|v| v.as_str()).unwrap_or_default();
    let allow_desktop = std::env::var("UICP_ALLOW_DESKTOP_WRITE")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
        .unwrap_or(false);
    let resolved = gate::resolve_write_path(base_dir, path, allow_desktop)
        .map_err(|err| EnvelopeOutcome::Error(ERR_FS_WRITE_DENIED.to_string(), err))?;
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent).map_err(|err| fault(format!("create parent dir failed: {err}")))?;
    }
    std::fs::write(&resolved, contents).map_err(|err| fault(format!("write failed: {err}")))?;
    Ok(())
}

async fn http_call(state: &AppState, p: &params::ApiCall, url: &str) -> Result<(), EnvelopeOutcome> {
    gate::check_http_method(&p.method)
        .map_err(|err| EnvelopeOutcome::Error(ERR_HTTP_METHOD_DENIED.to_string(), err))?;
    let method = reqwest::Method::from_bytes(p.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| EnvelopeOutcome::Error(ERR_HTTP_SCHEME_UNKNOWN.to_string(), format!("bad method {}", p.method)))?;
    let mut builder = state.http.request(method, url);
    if let Some(headers) = p.headers.as_object() {
        for (k, v) in headers {
            if let Some(v) = v.as_str() {
                builder = builder.header(k, v);
            }
        }
    }
    if !p.body.is_null() {
        builder = builder.json(&p.body);
    }
    builder
        .send()
        .await
        .map_err(|err| EnvelopeOutcome::Error(ERR_HTTP_TRANSPORT.to_string(), err.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// txn.cancel — abort every in-flight job for the batch's trace
// ---------------------------------------------------------------------------

async fn txn_cancel(app: &AppHandle, state: &AppState, _envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let job_ids: Vec<String> = state.compute_ongoing.read().await.keys().cloned().collect();
    for job_id in job_ids {
        if let Some(tx) = state.compute_cancel.read().await.get(&job_id).cloned() {
            let _ = tx.send(true);
        }
        crate::remove_compute_job(app, &job_id).await;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// needs.code — hands off to the codegen compute provider
// ---------------------------------------------------------------------------

async fn needs_code(app: &AppHandle, state: &AppState, workspace_id: &str, envelope: &Envelope) -> Result<(), EnvelopeOutcome> {
    let p: params::NeedsCode = parse(envelope)?;
    let artifact_id = uuid::Uuid::new_v4().to_string();
    let spec = crate::ComputeJobSpec {
        job_id: uuid::Uuid::new_v4().to_string(),
        task: "codegen.run@1".to_string(),
        input: serde_json::json!({
            "spec": p.prompt,
            "language": p.language.unwrap_or_else(|| "ts".to_string()),
        }),
        timeout_ms: None,
        fuel: None,
        mem_limit_mb: None,
        bind: p
            .to_state_path
            .into_iter()
            .map(|to_state_path| crate::ComputeBindSpec { to_state_path })
            .collect(),
        cache: "readwrite".to_string(),
        capabilities: crate::ComputeCapabilitiesSpec::default(),
        replayable: true,
        workspace_id: workspace_id.to_string(),
        provenance: crate::ComputeProvenanceSpec {
            env_hash: "needs.code".to_string(),
            agent_trace_id: envelope.trace_id.clone(),
        },
        golden_key: None,
        artifact_id: Some(artifact_id.clone()),
        expect_golden: false,
    };

    if let (Some(window_id), Some(selector)) = (p.progress_window_id.clone(), p.progress_selector.clone()) {
        let progress_html = crate::sanitize::sanitize_html_strict(
            "<div class=\"codegen-progress\">Generating code&hellip;</div>",
        );
        let _ = write_window_html(state, &window_id, &selector, progress_html, false).await;
        state.codegen_progress.write().await.insert(
            spec.job_id.clone(),
            crate::core::CodegenProgressTarget {
                workspace_id: workspace_id.to_string(),
                window_id,
                selector,
            },
        );
    }

    // Same admission path as `uicp://compute.call` (policy gate, concurrency
    // permit, `compute_ongoing` bookkeeping for `txn.cancel`); `submit` itself
    // routes `codegen.run@*` tasks to `codegen::spawn_job`.
    crate::commands::compute::submit(app.clone(), spec)
        .await
        .map_err(|err| fault(format!("needs.code submission failed: {err}")))
}
