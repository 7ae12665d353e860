#![cfg(all(
    feature = "wasm_compute",
    feature = "uicp_wasi_enable",
    feature = "compute_harness"
))]

//! Covers the `needs.code` progress-window/artifact wiring added on top of
//! the teacher's codegen bridge (spec.md §4.4): an initial progress message,
//! then either a success panel + persisted artifact or an error message,
//! written into the caller-supplied `progressWindowId`/`progressSelector`.

use serde_json::json;
use uicp::envelope::Envelope;
use uicp::test_support::ComputeTestHarness;

fn needs_code_envelope(window_id: &str, selector: &str) -> Envelope {
    serde_json::from_value(json!({
        "op": "needs.code",
        "windowId": window_id,
        "params": {
            "prompt": "render a clock widget",
            "language": "ts",
            "progressWindowId": window_id,
            "progressSelector": selector,
        }
    }))
    .expect("decode needs.code envelope")
}

#[tokio::test]
async fn needs_code_without_api_key_reports_failure_in_progress_window() {
    let prev_key = std::env::var("OPENAI_API_KEY").ok();
    std::env::remove_var("OPENAI_API_KEY");

    let harness = ComputeTestHarness::new_async()
        .await
        .expect("compute harness");

    let window_create: Envelope = serde_json::from_value(json!({
        "op": "window.create",
        "params": { "id": "w-codegen", "titleText": "Codegen", "width": 400.0, "height": 300.0 }
    }))
    .expect("decode window.create");
    harness
        .apply_envelope("default", &window_create)
        .await
        .expect("create window");

    let envelope = needs_code_envelope("w-codegen", "#status");
    harness
        .apply_envelope("default", &envelope)
        .await
        .expect("dispatch needs.code");

    // The progress write lands synchronously inside apply::needs_code, before
    // the compute job is even spawned.
    let progress = harness
        .window_content_html("w-codegen", "#status")
        .await
        .expect("query progress html")
        .unwrap_or_default();
    assert!(
        progress.contains("Generating"),
        "expected initial progress message, got: {progress}"
    );

    // Give the spawned codegen job a moment to fail (no OPENAI_API_KEY, no
    // mockResponse reachable through needs.code) and write back the error.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let mut final_html = String::new();
    while std::time::Instant::now() < deadline {
        if let Some(html) = harness
            .window_content_html("w-codegen", "#status")
            .await
            .expect("query final html")
        {
            if html.contains("failed") {
                final_html = html;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(
        final_html.contains("failed"),
        "expected error message to replace progress text, got: {final_html:?}"
    );

    if let Some(key) = prev_key {
        std::env::set_var("OPENAI_API_KEY", key);
    }
}
