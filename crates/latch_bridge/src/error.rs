use thiserror::Error;

/// Errors raised while binding plugins or dispatching script messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("channel is already bound as '{identifier}'")]
    AlreadyBound { identifier: String },

    #[error("plugin namespace must not be empty")]
    EmptyNamespace,

    #[error("unknown member '{name}'")]
    UnknownMember { name: String },

    #[error("property '{name}' is read-only")]
    ReadOnlyProperty { name: String },

    #[error("'{name}' takes at most {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("native invocation failed: {0}")]
    NativeInvocation(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("no instance with id {0}")]
    UnknownInstance(i64),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("script context has been released")]
    ContextReleased,

    #[error("execution affinity unavailable: {0}")]
    Affinity(String),

    #[error("invalid settings: {0}")]
    Settings(String),
}

impl BridgeError {
    /// Wrap a failure raised by plugin code.
    pub fn native(err: impl std::fmt::Display) -> Self {
        BridgeError::NativeInvocation(err.to_string())
    }

    /// Protocol anomalies are dropped and logged; the channel keeps running.
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(
            self,
            BridgeError::UnknownMember { .. }
                | BridgeError::ReadOnlyProperty { .. }
                | BridgeError::MalformedMessage(_)
                | BridgeError::UnknownInstance(_)
        )
    }

    /// Failures a synchronous caller gets to observe as a thrown error.
    pub fn surfaces_to_caller(&self) -> bool {
        matches!(
            self,
            BridgeError::NativeInvocation(_)
                | BridgeError::ArityMismatch { .. }
                | BridgeError::Affinity(_)
        )
    }
}
