//! Script runtime management
//!
//! One QuickJS runtime and context, prepared with the bridge host functions
//! and the `LatchScripting` prelude. Plugins are bound into it through the
//! bridge's channels.

use crate::ffi::{self, HandlerTable};
use crate::PRELUDE;
use latch_bridge::serialize::quote;
use latch_bridge::settings::EngineSettings;
use latch_bridge::{
    BridgeError, BridgeSettings, ChannelHandle, ChannelOptions, Exported, MessageHandler,
    NativeRef, ScriptContext, ScriptSource, ScriptValue,
};
use rquickjs::{CatchResultExt, Context, Runtime};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("{0}")]
    Evaluation(String),

    #[error("cannot read script: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Script execution context
pub struct QuickJsContext {
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
    context: Context,
    handlers: HandlerTable,
}

impl QuickJsContext {
    pub fn new() -> Result<Arc<Self>, ScriptError> {
        Self::with_engine_settings(&EngineSettings::default())
    }

    pub fn with_settings(settings: &BridgeSettings) -> Result<Arc<Self>, ScriptError> {
        Self::with_engine_settings(&settings.engine)
    }

    pub fn with_engine_settings(settings: &EngineSettings) -> Result<Arc<Self>, ScriptError> {
        let runtime = Runtime::new()?;
        if let Some(limit) = settings.memory_limit_bytes {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = settings.max_stack_size_bytes {
            runtime.set_max_stack_size(limit);
        }
        let context = Context::full(&runtime)?;
        let handlers = HandlerTable::default();

        context.with(|ctx| ffi::install(&ctx, &handlers))?;
        let this = Self {
            runtime,
            context,
            handlers,
        };
        this.run(PRELUDE).map_err(ScriptError::Evaluation)?;
        debug!("script context ready");

        Ok(Arc::new(this))
    }

    pub fn execute(&self, source: &str) -> Result<(), ScriptError> {
        self.run(source).map_err(ScriptError::Evaluation)
    }

    pub fn execute_file(&self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path)?;
        self.execute(&source)
            .map_err(|err| ScriptError::Evaluation(format!("{}: {}", path.display(), err)))
    }

    /// Bind `object` at `namespace` on a new channel.
    pub fn load_plugin<T: Exported>(
        self: &Arc<Self>,
        object: Arc<T>,
        namespace: &str,
        options: ChannelOptions,
    ) -> Result<ChannelHandle, BridgeError> {
        latch_bridge::load_plugin(self, NativeRef::new(object), namespace, options)
    }

    fn run(&self, source: &str) -> Result<(), String> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(source)
                .catch(&ctx)
                .map_err(|err| err.to_string())
        })
    }

    fn run_for_json(&self, source: &str) -> Result<Option<String>, String> {
        self.context.with(|ctx| {
            ctx.eval::<Option<String>, _>(source)
                .catch(&ctx)
                .map_err(|err| err.to_string())
        })
    }
}

impl ScriptContext for QuickJsContext {
    fn inject_source(&self, source: &ScriptSource) -> Result<(), BridgeError> {
        self.run(&source.source)
            .map_err(|err| BridgeError::Evaluation(format!("{}: {}", source.filename, err)))
    }

    fn evaluate(&self, source: &str) -> Result<ScriptValue, BridgeError> {
        let wrapped = format!("LatchScripting.evaluate({})", quote(source));
        match self.run_for_json(&wrapped).map_err(BridgeError::Evaluation)? {
            Some(json) => serde_json::from_str::<serde_json::Value>(&json)
                .map(ScriptValue::from)
                .map_err(|err| BridgeError::Evaluation(err.to_string())),
            None => Ok(ScriptValue::Undefined),
        }
    }

    fn register_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(name.to_owned(), handler);
    }

    fn deregister_message_handler(&self, name: &str) {
        self.handlers.remove(name);
    }

    fn engine_literal(&self, value: &ScriptValue) -> Option<String> {
        match value {
            ScriptValue::Bytes(bytes) => {
                let items: Vec<String> = bytes.iter().map(u8::to_string).collect();
                Some(format!("new Uint8Array([{}])", items.join(", ")))
            }
            _ => None,
        }
    }
}
