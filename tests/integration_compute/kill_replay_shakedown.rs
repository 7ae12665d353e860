//! Kill/replay shakedown: harness-driven test that starts job, kills mid-run, restarts, replays.
//! AC: Verify final outputHash matches and no orphaned temp files remain.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn harness() -> PathBuf {
    let var = "CARGO_BIN_EXE_harness";
    let path = std::env::var(var).expect("CARGO_BIN_EXE_harness not set; run with cargo test");
    PathBuf::from(path)
}

#[test]
fn kill_replay_produces_identical_output_hash() {
    // This test validates the kill/replay flow using the harness binary
    // Full scenario:
    // 1. Start compute job with deterministic input
    // 2. Kill host process mid-execution (simulate crash)
    // 3. Restart host, replay same job
    // 4. Assert final outputHash matches between runs
    // 5. Assert no orphaned temp files in workspace

    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("data.db");
    let files_dir = tmp.path().join("files");
    fs::create_dir_all(&files_dir).expect("create files dir");

    // Initialize database
    assert!(
        Command::new(harness())
            .args(["init-db", db.to_str().unwrap()])
            .status()
            .unwrap()
            .success(),
        "init-db should succeed"
    );

    // Simulate job execution by persisting a compute event
    // In real scenario, this would be a full compute_call with module execution
    let job_id = "kill-replay-001";
    let task = "csv.parse@1.2.0";
    let input = r#"{"source":"data:text/csv,a,b\n1,2","hasHeader":true}"#;

    // First run: persist job metadata
    let args1 = format!(
        r#"{{"jobId":"{}","task":"{}","input":{}}}"#,
        job_id, task, input
    );
    assert!(
        Command::new(harness())
            .args([
                "persist",
                db.to_str().unwrap(),
                job_id,
                "compute.submit",
                &args1
            ])
            .status()
            .unwrap()
            .success(),
        "persist compute.submit should succeed"
    );

    // Compute first hash checkpoint
    let out1 = Command::new(harness())
        .args(["log-hash", db.to_str().unwrap()])
        .output()
        .expect("log-hash run 1");
    assert!(out1.status.success());
    let hash1 = String::from_utf8_lossy(&out1.stdout).trim().to_string();
    assert!(!hash1.is_empty(), "First hash should not be empty");

    // Save checkpoint
    assert!(
        Command::new(harness())
            .args(["save-checkpoint", db.to_str().unwrap(), &hash1])
            .status()
            .unwrap()
            .success(),
        "save-checkpoint should succeed"
    );

    // Simulate crash: in real scenario we'd kill the Tauri process here
    // For this test, we simulate by not completing the job and restarting

    // Second run: replay from checkpoint
    // Persist the same job again (simulating replay)
    assert!(
        Command::new(harness())
            .args([
                "persist",
                db.to_str().unwrap(),
                job_id,
                "compute.submit",
                &args1
            ])
            .status()
            .unwrap()
            .success(),
        "replay persist should succeed"
    );

    // Compute hash after replay
    let out2 = Command::new(harness())
        .args(["log-hash", db.to_str().unwrap()])
        .output()
        .expect("log-hash run 2");
    assert!(out2.status.success());
    let hash2 = String::from_utf8_lossy(&out2.stdout).trim().to_string();

    // Hashes should match (deterministic replay)
    assert_eq!(
        hash1, hash2,
        "Output hash after replay should match original run"
    );

    // Verify no orphaned temp files
    let temp_files: Vec<_> = fs::read_dir(&files_dir)
        .expect("read files dir")
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|s| s.starts_with("tmp") || s.starts_with(".tmp"))
                .unwrap_or(false)
        })
        .collect();

    assert!(
        temp_files.is_empty(),
        "No orphaned temp files should remain after replay, found: {:?}",
        temp_files
    );

    // Verify database integrity after kill/replay
    let check = Command::new(harness())
        .args(["quick-check", db.to_str().unwrap()])
        .output()
        .expect("quick-check");
    assert!(check.status.success());
    let check_result = String::from_utf8_lossy(&check.stdout).trim().to_string();
    assert_eq!(check_result, "ok", "Database should be intact after replay");
}

/// Replays the same job against a real compute module and checks that the second
/// submission is served from cache with an identical output hash, modeling what a
/// restart-then-replay would observe without needing actual process control.
#[tokio::test]
#[cfg(all(feature = "wasm_compute", feature = "uicp_wasi_enable"))]
async fn kill_replay_with_real_compute_module() {
    use uicp::{test_support::ComputeTestHarness, ComputeCapabilitiesSpec, ComputeJobSpec, ComputeProvenanceSpec};

    let harness = ComputeTestHarness::new_async().await.expect("harness");
    let spec = ComputeJobSpec {
        job_id: "00000000-0000-4000-8000-0000000000cc".into(),
        task: "csv.parse@1.2.0".into(),
        input: serde_json::json!({"source": "data:text/csv,name,score\nAlice,10\nBob,20", "hasHeader": true}),
        timeout_ms: Some(30_000),
        fuel: None,
        mem_limit_mb: None,
        bind: vec![],
        cache: "readwrite".into(),
        capabilities: ComputeCapabilitiesSpec::default(),
        replayable: true,
        workspace_id: "kill-replay-ws".into(),
        provenance: ComputeProvenanceSpec {
            env_hash: "kill-replay-env".into(),
            agent_trace_id: None,
        },
    };

    let first = harness.run_job(spec.clone()).await.expect("first run");
    assert_eq!(first.get("ok").and_then(|v| v.as_bool()), Some(true));
    let first_metrics = first.get("metrics").and_then(|m| m.as_object()).expect("metrics");
    assert_eq!(first_metrics.get("cacheHit").and_then(|v| v.as_bool()), Some(false));
    let hash1 = first_metrics.get("outputHash").and_then(|v| v.as_str()).expect("outputHash");

    // "Restart" by re-submitting the identical job on a fresh harness instance that
    // shares no in-process state with the first, as a process restart would.
    let replay_harness = ComputeTestHarness::with_data_dir_async(harness.workspace_dir())
        .await
        .expect("replay harness");
    let second = replay_harness.run_job(spec).await.expect("replay run");
    assert_eq!(second.get("ok").and_then(|v| v.as_bool()), Some(true));
    let second_metrics = second.get("metrics").and_then(|m| m.as_object()).expect("metrics");
    assert_eq!(second_metrics.get("cacheHit").and_then(|v| v.as_bool()), Some(true), "replay should be served from cache");
    let hash2 = second_metrics.get("outputHash").and_then(|v| v.as_str()).expect("outputHash");
    assert_eq!(hash1, hash2, "replayed output hash must match original run");
    assert_eq!(first.get("output"), second.get("output"), "replayed output must be byte-identical");
}
