//! Engine-less context adapter
//!
//! Records injected and evaluated sources and lets callers post messages
//! the way a script would. Used to exercise plugins and channels without a
//! script engine.

use crate::context::{MessageHandler, ScriptContext, ScriptSource};
use crate::error::BridgeError;
use crate::message::ScriptMessage;
use crate::value::ScriptValue;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct LoopbackContext {
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
    injected: Mutex<Vec<ScriptSource>>,
    evaluated: Mutex<Vec<String>>,
    reject_injection: AtomicBool,
}

impl LoopbackContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        // Cloned out so handlers may deregister themselves.
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Fire-and-forget post. Returns false if nothing listens on `name`.
    pub fn post(&self, name: &str, body: Value) -> bool {
        match self.handler(name) {
            Some(handler) => {
                handler.did_receive(ScriptMessage::new(name, body));
                true
            }
            None => false,
        }
    }

    /// Post `undefined`.
    pub fn post_undefined(&self, name: &str) -> bool {
        match self.handler(name) {
            Some(handler) => {
                handler.did_receive(ScriptMessage::undefined(name));
                true
            }
            None => false,
        }
    }

    /// Synchronous round trip; `"undefined"` if nothing listens.
    pub fn post_sync(&self, name: &str, body: Value) -> String {
        match self.handler(name) {
            Some(handler) => handler.did_receive_sync(ScriptMessage::new(name, body)),
            None => "undefined".to_owned(),
        }
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn injected(&self) -> Vec<ScriptSource> {
        self.injected.lock().clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().clone()
    }

    /// Make every following injection fail.
    pub fn reject_injection(&self, reject: bool) {
        self.reject_injection.store(reject, Ordering::SeqCst);
    }
}

impl ScriptContext for LoopbackContext {
    fn inject_source(&self, source: &ScriptSource) -> Result<(), BridgeError> {
        if self.reject_injection.load(Ordering::SeqCst) {
            return Err(BridgeError::Evaluation(format!(
                "{}: injection rejected",
                source.filename
            )));
        }
        self.injected.lock().push(source.clone());
        Ok(())
    }

    fn evaluate(&self, source: &str) -> Result<ScriptValue, BridgeError> {
        self.evaluated.lock().push(source.to_owned());
        Ok(ScriptValue::Undefined)
    }

    fn register_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(name.to_owned(), handler);
    }

    fn deregister_message_handler(&self, name: &str) {
        self.handlers.remove(name);
    }
}
