//! Script-side stub generation
//!
//! A stub installs the proxy object for one binding: a namespace object with
//! one forwarding function per method and one accessor per property. Stubs
//! are plain text built from the MetaObject; generating one runs nothing.
//!
//! ```text
//! (function(exports) {
//! exports["greet"] = LatchScripting.invokeNative.bind(exports, "greet#1s");
//! LatchScripting.defineProperty(exports, "greeting", function() { return "hello"; }, true);
//! })(LatchScripting.createPlugin("7", "greeter", null));
//!
//! //# sourceURL=io.latch.plugin.Greeter.js
//! ```
//!
//! Every fragment passes through [`Plugin::rewrite_generated_stub`] under its
//! member name, or `.local`, `.base`, `.sourceURL` and `.global`.

use crate::meta::MetaObject;
use crate::plugin::Plugin;
use crate::serialize::quote;
use std::collections::BTreeMap;

/// Script global installed by the context adapter's prelude.
pub const SCRIPT_GLOBAL: &str = "LatchScripting";

/// What the stub attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubTarget<'a> {
    /// The principal object, installed at `namespace`.
    Plugin { namespace: &'a str },
    /// A native-originated reference, installed at `owner[instance]`.
    Reference { owner: &'a str, instance: i64 },
}

/// Inputs of one stub.
pub struct Stub<'a> {
    pub channel: &'a str,
    pub target: StubTarget<'a>,
    pub meta: &'a MetaObject,
    pub plugin: &'a dyn Plugin,
    /// Serialized current value of each property.
    pub values: &'a BTreeMap<String, String>,
    pub source_url_prefix: &'a str,
}

impl Stub<'_> {
    pub fn generate(&self) -> String {
        let prebind = !self.meta.is_constructible();

        let mut local = String::new();
        for (key, member) in self.meta.iter() {
            let stub = if member.is_method() && !key.is_empty() {
                let opcode = format!("{}{}", key, member.type_tag());
                let this = if prebind { "exports" } else { "this" };
                let method = method_stub(&opcode, this, prebind);
                format!("exports[{}] = {};", quote(key), method)
            } else if member.is_property() {
                let value = self
                    .values
                    .get(key)
                    .map(String::as_str)
                    .unwrap_or("undefined");
                format!(
                    "{}.defineProperty(exports, {}, function() {{ return {}; }}, {});",
                    SCRIPT_GLOBAL,
                    quote(key),
                    value,
                    member.has_setter()
                )
            } else {
                continue;
            };
            local.push_str(&self.rewrite(stub, key));
            local.push('\n');
        }

        let base = match self.meta.default_member() {
            Some(member) if member.is_initializer() => quote(&member.type_tag()),
            Some(member) => method_stub(&member.type_tag(), "this", false),
            None => self.rewrite("null".to_owned(), ".base"),
        };

        let factory = match self.target {
            StubTarget::Plugin { namespace } => format!(
                "{}.createPlugin({}, {}, {})",
                SCRIPT_GLOBAL,
                quote(self.channel),
                quote(namespace),
                base
            ),
            StubTarget::Reference { owner, instance } => format!(
                "{}.createReference({}, {}, {}, {})",
                SCRIPT_GLOBAL,
                quote(self.channel),
                quote(owner),
                instance,
                base
            ),
        };

        let source_url = self.rewrite(
            format!("\n//# sourceURL={}", self.source_url()),
            ".sourceURL",
        );

        self.rewrite(
            format!(
                "(function(exports) {{\n{}}})({});\n{}",
                self.rewrite(local, ".local"),
                factory,
                source_url
            ),
            ".global",
        )
    }

    /// Logical filename of the injected stub.
    pub fn source_url(&self) -> String {
        format!("{}{}.js", self.source_url_prefix, self.plugin.description())
    }

    fn rewrite(&self, stub: String, key: &str) -> String {
        self.plugin.rewrite_generated_stub(stub, key)
    }
}

fn method_stub(opcode: &str, this: &str, prebind: bool) -> String {
    let stub = format!("{}.invokeNative.bind({}, {})", SCRIPT_GLOBAL, this, quote(opcode));
    if prebind {
        stub
    } else {
        format!("function() {{ return {}.apply(null, arguments); }}", stub)
    }
}
