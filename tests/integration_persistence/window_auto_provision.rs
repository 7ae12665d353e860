#![cfg(feature = "compute_harness")]

//! Covers window auto-provisioning (spec.md §3, §4.4): `window.update` creates
//! its target on demand when `ensureExists` is set, `dom.append` does the same
//! when `ensureWindowExists` is set, and `component.render` always ensures its
//! window regardless of any flag.

use serde_json::json;
use uicp::envelope::Envelope;
use uicp::test_support::ComputeTestHarness;

fn envelope(value: serde_json::Value) -> Envelope {
    serde_json::from_value(value).expect("decode envelope")
}

#[tokio::test]
async fn window_update_without_ensure_exists_errors_on_missing_window() {
    let harness = ComputeTestHarness::new_async().await.expect("harness");
    let update = envelope(json!({
        "op": "window.update",
        "windowId": "ghost",
        "params": { "id": "ghost", "titleText": "nope" }
    }));
    let result = harness.apply_envelope("default", &update).await;
    assert!(result.is_err(), "window.update on a missing window without ensureExists must error");
}

#[tokio::test]
async fn window_update_with_ensure_exists_creates_window_on_demand() {
    let harness = ComputeTestHarness::new_async().await.expect("harness");
    let update = envelope(json!({
        "op": "window.update",
        "windowId": "w-new",
        "params": { "id": "w-new", "titleText": "Created on demand", "ensureExists": true }
    }));
    harness
        .apply_envelope("default", &update)
        .await
        .expect("window.update with ensureExists should create the window");

    // A second ensureExists update against the same id should update in place,
    // not fail or duplicate the row.
    let update2 = envelope(json!({
        "op": "window.update",
        "windowId": "w-new",
        "params": { "id": "w-new", "titleText": "Updated", "ensureExists": true }
    }));
    harness
        .apply_envelope("default", &update2)
        .await
        .expect("second ensureExists update should succeed against the now-existing window");
}

#[tokio::test]
async fn dom_append_ensures_window_only_when_flagged() {
    let harness = ComputeTestHarness::new_async().await.expect("harness");

    let append_no_flag = envelope(json!({
        "op": "dom.append",
        "windowId": "w-no-ensure",
        "params": { "target": "#root", "html": "<p>hi</p>" }
    }));
    let result = harness.apply_envelope("default", &append_no_flag).await;
    assert!(result.is_err(), "dom.append without ensureWindowExists must not auto-provision");

    let append_flagged = envelope(json!({
        "op": "dom.append",
        "windowId": "w-ensured",
        "params": { "target": "#root", "html": "<p>hi</p>", "ensureWindowExists": true }
    }));
    harness
        .apply_envelope("default", &append_flagged)
        .await
        .expect("dom.append with ensureWindowExists should create the window then write");

    let html = harness
        .window_content_html("w-ensured", "#root")
        .await
        .expect("query window content")
        .expect("content row present");
    assert!(html.contains("hi"));
}

#[tokio::test]
async fn component_render_always_ensures_its_window() {
    let harness = ComputeTestHarness::new_async().await.expect("harness");
    let render = envelope(json!({
        "op": "component.render",
        "windowId": "w-component",
        "params": { "id": "c-1", "target": "#root" }
    }));
    harness
        .apply_envelope("default", &render)
        .await
        .expect("component.render must auto-provision its window without any flag");
}
