// console.rs - Script console routed to tracing

use latch_bridge::serialize;
use latch_bridge::{Exported, MetaBuilder, Plugin, ScriptValue};
use tracing::{debug, error, info, warn};

/// Namespace scripts find the console at.
pub const NAMESPACE: &str = "console";

#[derive(Default)]
pub struct Console;

impl Plugin for Console {}

impl Exported for Console {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.variadic_command("log", |_, args| {
            info!(target: "script", "{}", render(&args));
            Ok(())
        })
        .variadic_command("info", |_, args| {
            info!(target: "script", "{}", render(&args));
            Ok(())
        })
        .variadic_command("debug", |_, args| {
            debug!(target: "script", "{}", render(&args));
            Ok(())
        })
        .variadic_command("warn", |_, args| {
            warn!(target: "script", "{}", render(&args));
            Ok(())
        })
        .variadic_command("error", |_, args| {
            error!(target: "script", "{}", render(&args));
            Ok(())
        });
    }
}

/// Strings print bare, everything else as its script literal.
fn render(args: &[ScriptValue]) -> String {
    args.iter()
        .map(|arg| match arg {
            ScriptValue::String(text) => text.clone(),
            other => serialize::serialize(other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
