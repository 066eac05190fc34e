//! Native types exposed to scripts
//!
//! A plugin implements [`Plugin`] for its identity hooks and [`Exported`] to
//! declare the whitelist of members scripts may reach. Nothing outside the
//! declared surface is callable.

use crate::message::ScriptMessage;
use crate::meta::MetaBuilder;

/// Identity and customization hooks shared by every exposed object.
pub trait Plugin: Send + Sync + 'static {
    /// Self-declared channel identifier. `None` draws one from the process
    /// sequence at bind time.
    fn channel_identifier(&self) -> Option<String> {
        None
    }

    /// Rewrite a generated stub fragment.
    ///
    /// Keys are member names plus `.base`, `.local`, `.global` and
    /// `.sourceURL`. Called for every fragment, overridden or not.
    fn rewrite_generated_stub(&self, stub: String, _key: &str) -> String {
        stub
    }

    /// Name used for the injected stub's logical filename and sourceURL.
    fn description(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_owned()
    }

    /// Claim messages that do not address a bound instance.
    fn raw_message_handler(&self) -> Option<&dyn RawMessageHandler> {
        None
    }
}

/// Free-form messaging for plugins that speak their own protocol.
pub trait RawMessageHandler: Send + Sync {
    fn did_receive_raw(&self, message: &ScriptMessage);
}

/// Declares the reflected surface of a plugin type.
///
/// # Example
/// ```ignore
/// impl Exported for Greeter {
///     fn export(meta: &mut MetaBuilder<Self>) {
///         meta.method("greet", 1, |this, args| Ok(this.greet(&args[0]).into()))
///             .property_with_setter("greeting", Greeter::greeting, Greeter::set_greeting);
///     }
/// }
/// ```
pub trait Exported: Plugin + Sized {
    fn export(meta: &mut MetaBuilder<Self>);
}
