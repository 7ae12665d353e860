use serde::{Deserialize, Serialize};

/// Capability gates for compute jobs.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComputeCapabilitiesSpec {
    #[serde(default)]
    pub fs_read: Vec<String>,
    #[serde(default)]
    pub fs_write: Vec<String>,
    #[serde(default)]
    pub net: Vec<String>,
    #[serde(default)]
    pub long_run: bool,
    #[serde(default)]
    pub mem_high: bool,
    #[serde(default)]
    pub time: bool,
    #[serde(default)]
    pub random: bool,
}

/// Provenance metadata supplied with each compute job.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeProvenanceSpec {
    pub env_hash: String,
    pub agent_trace_id: Option<String>,
}

/// Target states for binding compute outputs.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeBindSpec {
    pub to_state_path: String,
}

/// Host-side specification for executing a compute job.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeJobSpec {
    pub job_id: String,
    pub task: String,
    pub input: serde_json::Value,
    pub timeout_ms: Option<u64>,
    pub fuel: Option<u64>,
    pub mem_limit_mb: Option<u64>,
    #[serde(default)]
    pub bind: Vec<ComputeBindSpec>,
    #[serde(default = "default_cache_mode")]
    pub cache: String,
    #[serde(default)]
    pub capabilities: ComputeCapabilitiesSpec,
    #[serde(default = "default_replayable")]
    pub replayable: bool,
    #[serde(default = "default_workspace_id")]
    pub workspace_id: String,
    pub provenance: ComputeProvenanceSpec,
    // Track C: Golden cache for code generation determinism
    #[serde(skip_serializing_if = "Option::is_none")]
    pub golden_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub expect_golden: bool,
}

/// Terminal error envelope emitted back to the UI.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeFinalErr {
    pub ok: bool,
    pub job_id: String,
    pub task: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

/// Terminal success envelope emitted back to the UI.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeFinalOk {
    pub ok: bool,
    pub job_id: String,
    pub task: String,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

/// Partial compute event emitted during execution.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputePartialEvent {
    pub job_id: String,
    pub task: String,
    pub seq: u64,
    pub payload_b64: String,
}

fn default_cache_mode() -> String {
    "readwrite".into()
}

fn default_replayable() -> bool {
    true
}

fn default_workspace_id() -> String {
    "default".into()
}

const CODEGEN_TASK_PREFIX: &str = "codegen.run@";
fn allowed_codegen_hosts() -> Vec<String> {
    let mut hosts = vec![
        "https://api.openai.com".to_string(),
        "https://api.anthropic.com".to_string(),
    ];
    let mut push_unique = |value: &str| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        if !hosts.iter().any(|existing| existing == trimmed) {
            hosts.push(trimmed.to_string());
        }
    };
    if let Ok(endpoint) = std::env::var("UICP_CODEGEN_OPENAI_ENDPOINT") {
        push_unique(&endpoint);
    }
    if let Ok(endpoint) = std::env::var("UICP_CODEGEN_ANTHROPIC_ENDPOINT") {
        push_unique(&endpoint);
    }
    hosts
}

fn is_codegen_task(task: &str) -> bool {
    task.starts_with(CODEGEN_TASK_PREFIX)
}

fn codegen_host_allowed(url: &str) -> bool {
    allowed_codegen_hosts()
        .iter()
        .any(|allowed| url.starts_with(allowed))
}

/// Coarse per-task allowlist, checked before the finer-grained capability
/// gates below. Reads `UICP_COMPUTE_DENYLIST`, a comma-separated list of
/// `task@majorVersion` entries an operator wants to block outright (e.g.
/// during an incident) without editing capability grants.
pub fn allow_compute(task_key: &str) -> bool {
    let denylist = std::env::var("UICP_COMPUTE_DENYLIST").unwrap_or_default();
    !denylist
        .split(',')
        .map(str::trim)
        .any(|entry| !entry.is_empty() && entry == task_key)
}

/// Enforce policy gates before dispatching a compute job.
pub fn enforce_compute_policy(spec: &ComputeJobSpec) -> Option<ComputeFinalErr> {
    let timeout = spec.timeout_ms.unwrap_or(30_000);
    if !(1_000..=120_000).contains(&timeout) {
        return Some(ComputeFinalErr {
            ok: false,
            job_id: spec.job_id.clone(),
            task: spec.task.clone(),
            code: "Compute.CapabilityDenied".into(),
            message: "timeoutMs outside allowed range (1000-120000)".into(),
            metrics: None,
        });
    }
    if timeout > 30_000 && !spec.capabilities.long_run {
        return Some(ComputeFinalErr {
            ok: false,
            job_id: spec.job_id.clone(),
            task: spec.task.clone(),
            code: "Compute.CapabilityDenied".into(),
            message: "timeoutMs>30000 requires capabilities.longRun".into(),
            metrics: None,
        });
    }

    let is_codegen = is_codegen_task(&spec.task);

    if let Some(mem) = spec.mem_limit_mb {
        if !(64..=1024).contains(&mem) {
            return Some(ComputeFinalErr {
                ok: false,
                job_id: spec.job_id.clone(),
                task: spec.task.clone(),
                code: "Compute.CapabilityDenied".into(),
                message: "memLimitMb outside allowed range (64-1024)".into(),
                metrics: None,
            });
        }
        if mem > 256 && !spec.capabilities.mem_high {
            return Some(ComputeFinalErr {
                ok: false,
                job_id: spec.job_id.clone(),
                task: spec.task.clone(),
                code: "Compute.CapabilityDenied".into(),
                message: "memLimitMb>256 requires capabilities.memHigh".into(),
                metrics: None,
            });
        }
    }

    if is_codegen {
        if spec.capabilities.net.is_empty() {
            return Some(ComputeFinalErr {
                ok: false,
                job_id: spec.job_id.clone(),
                task: spec.task.clone(),
                code: "Compute.CapabilityDenied".into(),
                message:
                    "codegen.run tasks require capabilities.net pointing at the configured codegen endpoint"
                        .into(),
                metrics: None,
            });
        }
        let all_allowed = spec
            .capabilities
            .net
            .iter()
            .all(|host| codegen_host_allowed(host));
        if !all_allowed {
            let allowed = allowed_codegen_hosts().join(", ");
            return Some(ComputeFinalErr {
                ok: false,
                job_id: spec.job_id.clone(),
                task: spec.task.clone(),
                code: "Compute.CapabilityDenied".into(),
                message: format!(
                    "codegen.run tasks may only access allowlisted hosts: {}",
                    allowed
                ),
                metrics: None,
            });
        }
    } else if !spec.capabilities.net.is_empty() {
        return Some(ComputeFinalErr {
            ok: false,
            job_id: spec.job_id.clone(),
            task: spec.task.clone(),
            code: "Compute.CapabilityDenied".into(),
            message: "Network is disabled by policy (cap.net required)".into(),
            metrics: None,
        });
    }

    // Allow time and random capabilities in v2 (Balanced/Open presets).
    // Enforcement of quotas and runtime behavior remains in the compute host.

    let fs_ok = spec
        .capabilities
        .fs_read
        .iter()
        .chain(spec.capabilities.fs_write.iter())
        .all(|p| p.starts_with("ws:/"));

    if is_codegen
        && (!spec.capabilities.fs_read.is_empty() || !spec.capabilities.fs_write.is_empty())
    {
        return Some(ComputeFinalErr {
            ok: false,
            job_id: spec.job_id.clone(),
            task: spec.task.clone(),
            code: "Compute.CapabilityDenied".into(),
            message: "codegen.run tasks may not access the filesystem".into(),
            metrics: None,
        });
    }

    if !fs_ok {
        return Some(ComputeFinalErr {
            ok: false,
            job_id: spec.job_id.clone(),
            task: spec.task.clone(),
            code: "Compute.CapabilityDenied".into(),
            message: "Filesystem paths must be workspace-scoped (ws:/...)".into(),
            metrics: None,
        });
    }

    None
}
