//! Integration tests for compute runtime execution-level coverage.
//! These tests require wasm_compute and uicp_wasi_enable features.

#[cfg(feature = "compute_harness")]
mod codegen_e2e;
#[cfg(feature = "compute_harness")]
mod command_shims;
mod concurrency_cap;
mod determinism;
mod import_surface;
mod kill_replay_shakedown;
mod module_smoke;
#[cfg(feature = "compute_harness")]
mod needs_code_progress;
mod negative_execution;
mod policy_enforcement;
mod quickjs_applet;
mod script_world;
mod smoke_test;
