//! Path and directory configuration

/// Directory names under the data root.
pub const MODULES_DIR: &str = "modules";
pub const CACHE_DIR: &str = "cache";
pub const STATE_DIR: &str = "state";

/// Prefix used for workspace-relative file references (`ws:/files/...`).
pub const WS_SCHEME_PREFIX: &str = "ws:/";
