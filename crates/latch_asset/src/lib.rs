//! Latch Content Access
//!
//! Filesystem content for scripts and the runtime:
//! - `ContentStore` with synchronous and callback-completing forms
//! - `FileContentStore` over the local filesystem
//! - `FileSystemPlugin` exposing a store through the bridge

pub mod error;
pub mod plugin;
pub mod store;

pub use error::ContentError;
pub use plugin::FileSystemPlugin;
pub use store::{Completion, ContentStore, FileContentStore, ItemKind, Metadata};

pub type Result<T, E = ContentError> = std::result::Result<T, E>;

/// Asset crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
