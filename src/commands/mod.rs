//! Tauri command handlers organized by domain: filesystem access, workspace
//! persistence, and the compute bridge. Window/DOM/state mutation itself goes
//! through the apply engine ([`crate::core`] plumbing), not a Tauri command.

pub mod apply;
pub mod compute;
pub mod files;
pub mod persistence;
pub mod registry;

pub use apply::*;
pub use compute::*;
pub use files::*;
pub use persistence::*;
pub use registry::*;
