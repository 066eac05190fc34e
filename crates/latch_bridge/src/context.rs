//! Context adapter capability interface
//!
//! The Channel is engine-agnostic. Everything it needs from a script engine
//! goes through [`ScriptContext`]; an adapter delivers inbound messages back
//! through [`MessageHandler`].

use crate::error::BridgeError;
use crate::message::ScriptMessage;
use crate::serialize::{NoReferences, Serializer};
use crate::value::ScriptValue;

/// Source handed to the engine, tagged for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSource {
    pub source: String,
    /// Logical filename shown in engine stack traces.
    pub filename: String,
    /// Namespace the source installs, if any.
    pub namespace: Option<String>,
}

impl ScriptSource {
    pub fn new(source: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: filename.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Receiver of messages posted by scripts under one registered name.
pub trait MessageHandler: Send + Sync {
    /// Fire-and-forget post.
    fn did_receive(&self, message: ScriptMessage);

    /// Synchronous round trip. The reply is a script expression the caller
    /// evaluates to obtain the result.
    fn did_receive_sync(&self, message: ScriptMessage) -> String;
}

/// Capabilities a script engine adapter provides to the bridge.
pub trait ScriptContext: Send + Sync {
    /// Run `source` for its side effects.
    fn inject_source(&self, source: &ScriptSource) -> Result<(), BridgeError>;

    /// Evaluate `source` and return its structural result.
    fn evaluate(&self, source: &str) -> Result<ScriptValue, BridgeError>;

    fn register_message_handler(&self, name: &str, handler: std::sync::Arc<dyn MessageHandler>);

    fn deregister_message_handler(&self, name: &str);

    /// Literal for value kinds this engine represents natively.
    fn engine_literal(&self, _value: &ScriptValue) -> Option<String> {
        None
    }

    /// Engine literal for `value`, without reference resolution.
    fn serialize_for_engine(&self, value: &ScriptValue) -> String {
        let hook = |value: &ScriptValue| self.engine_literal(value);
        Serializer::new(&mut NoReferences)
            .with_engine(&hook)
            .serialize(value)
    }
}
