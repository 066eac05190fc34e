//! Latch Scripting System
//!
//! JavaScript execution via QuickJS, wired to the script bridge.
//!
//! ## Architecture
//!
//! - **Runtime:** [`QuickJsContext`] owns one QuickJS runtime and context and
//!   implements the bridge's `ScriptContext` capabilities.
//! - **FFI:** two host functions carry JSON message bodies from scripts to
//!   registered channels; sync replies come back as script expressions.
//! - **Prelude:** `LatchScripting`, the script half of the stub contract.

mod ffi;
pub mod runtime;

pub use runtime::{QuickJsContext, ScriptError};

pub use rquickjs;

/// Script-side prelude, evaluated once per context.
pub const PRELUDE: &str = include_str!("prelude.js");
