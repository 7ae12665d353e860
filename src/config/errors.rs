//! Error code constants, E-UICP-#### namespace.

/// Apply pipeline error detail codes (0000-0099)
pub const ERR_SCHEMA_INVALID: &str = "E-UICP-0001";
pub const ERR_UNKNOWN_OP: &str = "E-UICP-0002";
pub const ERR_SANITIZE_REJECTED: &str = "E-UICP-0003";
pub const ERR_WINDOW_NOT_FOUND: &str = "E-UICP-0004";
pub const ERR_IDEMPOTENCY_CONFLICT: &str = "E-UICP-0005";

/// Compute input error detail codes (0400-0499)
pub const DETAIL_CSV_INPUT: &str = "E-UICP-0401";
pub const DETAIL_TABLE_INPUT: &str = "E-UICP-0402";
pub const DETAIL_WS_PATH: &str = "E-UICP-0403";
pub const DETAIL_FS_CAP: &str = "E-UICP-0404";
pub const DETAIL_IO: &str = "E-UICP-0405";
pub const DETAIL_SCRIPT_INPUT: &str = "E-UICP-0406";
pub const DETAIL_CODEGEN_INPUT: &str = "E-UICP-0407";

/// Adapter / api.call error codes (0500-0599)
pub const ERR_HTTP_METHOD_DENIED: &str = "E-UICP-0501";
pub const ERR_HTTP_SCHEME_UNKNOWN: &str = "E-UICP-0502";
pub const ERR_FS_WRITE_DENIED: &str = "E-UICP-0503";
pub const ERR_HTTP_TRANSPORT: &str = "E-UICP-0504";

/// Security error codes (SEC-*)
pub const RNG_FAILURE_CODE: &str = "E-UICP-SEC-RNG";

/// Uncategorized host fault.
pub const ERR_HOST_FAULT: &str = "E-UICP-0999";
