//! Value Serializer
//!
//! Turns [`ScriptValue`]s into script-literal expressions and script operands
//! back into native arguments. Serialization only builds text; it never runs
//! script code. Exposed objects are written as references to their binding
//! namespace, which the [`ReferenceResolver`] allocates on demand.

use crate::value::{NativeRef, ScriptValue};
use chrono::SecondsFormat;
use serde_json::Value;

/// Maps a live native object to the namespace of its BindingObject.
pub trait ReferenceResolver {
    fn namespace_of(&mut self, object: &NativeRef) -> String;
}

/// Resolver for contexts without a channel. References degrade to the lossy
/// quoted fallback.
pub struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn namespace_of(&mut self, object: &NativeRef) -> String {
        quote(&format!("[native {}]", object.meta().type_name()))
    }
}

/// Engine-specific literal hook, consulted before the default rules.
pub type EngineLiteral<'a> = &'a dyn Fn(&ScriptValue) -> Option<String>;

pub struct Serializer<'a> {
    references: &'a mut dyn ReferenceResolver,
    engine: Option<EngineLiteral<'a>>,
}

impl<'a> Serializer<'a> {
    pub fn new(references: &'a mut dyn ReferenceResolver) -> Self {
        Self {
            references,
            engine: None,
        }
    }

    pub fn with_engine(mut self, engine: EngineLiteral<'a>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn serialize(&mut self, value: &ScriptValue) -> String {
        if let Some(literal) = self.engine.and_then(|engine| engine(value)) {
            return literal;
        }

        match value {
            ScriptValue::Undefined => "undefined".to_owned(),
            ScriptValue::Null => "null".to_owned(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Int(i) => i.to_string(),
            ScriptValue::Float(f) => number_literal(*f),
            ScriptValue::Date(date) => quote(&date.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ScriptValue::Native(object) => self.references.namespace_of(object),
            ScriptValue::String(s) => quote(s),
            ScriptValue::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| self.serialize(item)).collect();
                format!("[{}]", items.join(", "))
            }
            ScriptValue::Object(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(key, value)| format!("{}: {}", quote(key), self.serialize(value)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            // Lossy fallback
            ScriptValue::Bytes(bytes) => quote(&String::from_utf8_lossy(bytes)),
            ScriptValue::Opaque(description) => quote(description),
            // Functions only travel script to native.
            ScriptValue::Callback(_) => "undefined".to_owned(),
        }
    }
}

/// Serialize without a channel or engine hook.
pub fn serialize(value: &ScriptValue) -> String {
    Serializer::new(&mut NoReferences).serialize(value)
}

/// JSON string escaping, so quotes, backslashes and control characters
/// survive the trip.
pub fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

fn number_literal(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        f.to_string()
    }
}

/// Native arguments from a method operand.
///
/// A non-sequence operand means "no arguments". With an expected arity,
/// missing trailing arguments are padded with `undefined`; surplus arguments
/// are kept so the arity check can reject them.
pub fn deserialize(operand: Option<&Value>, arity: Option<usize>) -> Vec<ScriptValue> {
    let mut args: Vec<ScriptValue> = match operand {
        Some(Value::Array(items)) => items.iter().cloned().map(ScriptValue::from).collect(),
        _ => Vec::new(),
    };
    if let Some(arity) = arity {
        if args.len() < arity {
            args.resize(arity, ScriptValue::Undefined);
        }
    }
    args
}

/// Native value from a property-write operand. An absent operand is the
/// script assigning `undefined`.
pub fn from_operand(operand: Option<&Value>) -> ScriptValue {
    operand
        .cloned()
        .map(ScriptValue::from)
        .unwrap_or(ScriptValue::Undefined)
}
