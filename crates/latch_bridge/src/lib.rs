//! Latch Script Bridge
//!
//! Exposes native objects to an embedded script runtime and routes script
//! calls back into native code:
//! - MetaObject reflection of exposed types
//! - Value serialization across the boundary
//! - Script callbacks completed from native code
//! - Channels binding a plugin to a script namespace
//! - Execution affinity for native calls
//!
//! The bridge is engine-agnostic; engines plug in through [`ScriptContext`].

pub mod affinity;
pub mod binding;
pub mod callback;
pub mod channel;
pub mod context;
pub mod error;
pub mod loopback;
pub mod message;
pub mod meta;
pub mod plugin;
pub mod serialize;
pub mod settings;
pub mod stub;
pub mod value;

pub use affinity::{ExecutionAffinity, SerialQueue, WorkerThread};
pub use binding::BindingObject;
pub use callback::ScriptCallback;
pub use channel::{load_plugin, Channel, ChannelHandle, ChannelOptions};
pub use context::{MessageHandler, ScriptContext, ScriptSource};
pub use error::BridgeError;
pub use message::{Message, ScriptMessage};
pub use meta::{MemberDescriptor, MemberKind, MetaBuilder, MetaObject};
pub use plugin::{Exported, Plugin, RawMessageHandler};
pub use settings::BridgeSettings;
pub use value::{NativeRef, ScriptValue};

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod fixtures;
