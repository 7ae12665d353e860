//! Policy gate for the apply engine's `api.call` operation: method
//! allowlisting, URL scheme routing, and filesystem base-directory
//! confinement. Distinct from [`crate::policy`], which gates WASM compute
//! job capabilities rather than apply-engine HTTP/filesystem calls.

use std::path::{Path, PathBuf};

const ALLOWED_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

pub fn check_http_method(method: &str) -> Result<(), String> {
    let upper = method.to_ascii_uppercase();
    if ALLOWED_HTTP_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(format!("Method {upper} not allowed"))
    }
}

/// Where an `api.call` URL is routed once its scheme is known.
pub enum Route {
    ComputeCall,
    Intent,
    FsWriteTextFile,
    Http { url: String },
    /// Unknown schemes are a successful no-op per the apply engine's
    /// forward-compatibility rule: a future scheme should not fail old batches.
    Unknown,
}

pub fn route_url(url: &str) -> Route {
    if url == "uicp://compute.call" || url.starts_with("uicp://compute.call?") {
        return Route::ComputeCall;
    }
    if url == "uicp://intent" || url.starts_with("uicp://intent?") {
        return Route::Intent;
    }
    if url.starts_with("tauri://fs/writeTextFile") {
        return Route::FsWriteTextFile;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Route::Http { url: url.to_string() };
    }
    Route::Unknown
}

/// Filesystem base directories `tauri://fs/writeTextFile` may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    AppConfig,
    AppData,
    AppLocalData,
    Document,
    Desktop,
    Download,
}

impl BaseDir {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AppConfig" => Some(BaseDir::AppConfig),
            "AppData" => Some(BaseDir::AppData),
            "AppLocalData" => Some(BaseDir::AppLocalData),
            "Document" => Some(BaseDir::Document),
            "Desktop" => Some(BaseDir::Desktop),
            "Download" => Some(BaseDir::Download),
            _ => None,
        }
    }

    fn root(self) -> Option<PathBuf> {
        match self {
            BaseDir::AppConfig | BaseDir::AppData | BaseDir::AppLocalData => {
                Some(crate::core::DATA_DIR.clone())
            }
            BaseDir::Document => dirs::document_dir(),
            BaseDir::Desktop => dirs::desktop_dir(),
            BaseDir::Download => dirs::download_dir(),
        }
    }
}

/// Resolve `path` against `base_dir`, rejecting traversal outside the base
/// and refusing `Desktop` unless `allow_desktop` (the dev flag) is set.
pub fn resolve_write_path(base_dir: BaseDir, path: &str, allow_desktop: bool) -> Result<PathBuf, String> {
    if base_dir == BaseDir::Desktop && !allow_desktop {
        return Err("Desktop writes require the dev flag".to_string());
    }
    if path.contains("..") {
        return Err("path traversal rejected".to_string());
    }
    let relative = Path::new(path);
    if relative.is_absolute() {
        return Err("absolute paths are not allowed".to_string());
    }
    let root = base_dir
        .root()
        .ok_or_else(|| "base directory unavailable on this platform".to_string())?;
    Ok(root.join(relative))
}
