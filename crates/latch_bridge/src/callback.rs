//! Script functions handed to native code
//!
//! A function argument crosses the boundary as `{"$callback": <id>}`. The
//! script side keeps the function in a table; the channel turns the marker
//! into a [`ScriptCallback`] before the native member sees its arguments.
//! Completing the callback evaluates `LatchScripting.complete(id, err,
//! result)` in the context, node-style, with `err` null on success.

use crate::error::BridgeError;
use crate::value::ScriptValue;
use std::fmt;
use std::sync::Weak;

/// Key of the callback marker object.
pub const CALLBACK_KEY: &str = "$callback";

/// Completes callbacks on the script side of one channel.
pub(crate) trait CallbackSink: Send + Sync {
    fn complete(&self, id: u64, outcome: Result<ScriptValue, String>) -> Result<(), BridgeError>;
}

/// A script function a native member may complete later, from any thread.
///
/// The script side drops its function after the first completion, so
/// completing a clone again reaches nothing.
#[derive(Clone)]
pub struct ScriptCallback {
    id: u64,
    sink: Weak<dyn CallbackSink>,
}

impl ScriptCallback {
    pub(crate) fn new(id: u64, sink: Weak<dyn CallbackSink>) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Call the script function as `(err, result)`.
    ///
    /// Blocks until the context evaluates the completion. With an engine
    /// that admits one thread at a time, do not complete from the channel's
    /// affinity: a script waiting there on a sync call holds the engine.
    pub fn complete<E: fmt::Display>(self, outcome: Result<ScriptValue, E>) -> Result<(), BridgeError> {
        let sink = self.sink.upgrade().ok_or(BridgeError::ContextReleased)?;
        sink.complete(self.id, outcome.map_err(|err| err.to_string()))
    }
}

impl fmt::Debug for ScriptCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScriptCallback").field(&self.id).finish()
    }
}

impl PartialEq for ScriptCallback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.sink, &other.sink)
    }
}

/// Replace top-level callback markers in `args` with live callbacks.
pub(crate) fn attach(args: Vec<ScriptValue>, sink: &Weak<dyn CallbackSink>) -> Vec<ScriptValue> {
    args.into_iter()
        .map(|arg| match marker(&arg) {
            Some(id) => ScriptValue::Callback(ScriptCallback::new(id, sink.clone())),
            None => arg,
        })
        .collect()
}

fn marker(value: &ScriptValue) -> Option<u64> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let id = map.get(CALLBACK_KEY)?.as_i64()?;
    u64::try_from(id).ok()
}
