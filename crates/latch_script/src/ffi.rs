//! FFI layer between Rust and scripts
//!
//! Scripts reach native code through two host functions taking a channel
//! name and a JSON-encoded body. The body is `undefined` when the script
//! posted `undefined`; that arrives here as `None`.

use dashmap::DashMap;
use latch_bridge::{MessageHandler, ScriptMessage};
use rquickjs::{Ctx, Function};
use std::sync::Arc;
use tracing::{trace, warn};

pub(crate) const POST_MESSAGE: &str = "__latchPostMessage";
pub(crate) const POST_MESSAGE_SYNC: &str = "__latchPostMessageSync";

/// Registered message handlers by channel name.
pub(crate) type HandlerTable = Arc<DashMap<String, Arc<dyn MessageHandler>>>;

/// Install the host functions on the global object.
pub(crate) fn install(ctx: &Ctx<'_>, handlers: &HandlerTable) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let table = handlers.clone();
    let post = Function::new(ctx.clone(), move |name: String, body: Option<String>| {
        match lookup(&table, &name) {
            Some(handler) => handler.did_receive(decode(name, body)),
            None => trace!(channel = %name, "no handler; message dropped"),
        }
    })?;
    globals.set(POST_MESSAGE, post)?;

    let table = handlers.clone();
    let post_sync = Function::new(ctx.clone(), move |name: String, body: Option<String>| {
        match lookup(&table, &name) {
            Some(handler) => handler.did_receive_sync(decode(name, body)),
            None => {
                trace!(channel = %name, "no handler; sync message dropped");
                "undefined".to_owned()
            }
        }
    })?;
    globals.set(POST_MESSAGE_SYNC, post_sync)?;

    Ok(())
}

/// The table guard is released before the handler runs, so handlers may
/// deregister themselves.
fn lookup(table: &HandlerTable, name: &str) -> Option<Arc<dyn MessageHandler>> {
    table.get(name).map(|entry| entry.value().clone())
}

fn decode(name: String, body: Option<String>) -> ScriptMessage {
    match body.map(|text| serde_json::from_str(&text)) {
        Some(Ok(value)) => ScriptMessage::new(name, value),
        Some(Err(err)) => {
            warn!(channel = %name, "unparseable message body: {}", err);
            ScriptMessage::undefined(name)
        }
        None => ScriptMessage::undefined(name),
    }
}
