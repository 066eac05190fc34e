//! Values crossing the script boundary
//!
//! `ScriptValue` is the native-side view of anything a plugin hands to or
//! receives from scripts. Exposed objects travel as `NativeRef`, which is
//! never copied into a literal: the serializer turns it into a reference to
//! the object's binding namespace.

use crate::callback::ScriptCallback;
use crate::meta::MetaObject;
use crate::plugin::{Exported, Plugin};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value exchanged with the script side.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScriptValue {
    /// Native absence; serializes to `undefined`.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
    /// Live reference to an exposed native object.
    Native(NativeRef),
    /// Script function passed as an argument.
    Callback(ScriptCallback),
    /// Anything without a structural mapping, kept as its description.
    Opaque(String),
}

impl ScriptValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral view of a number. Floats without a fractional part qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ScriptValue>> {
        match self {
            ScriptValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeRef> {
        match self {
            ScriptValue::Native(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&ScriptCallback> {
        match self {
            ScriptValue::Callback(callback) => Some(callback),
            _ => None,
        }
    }

    /// Take the callback out of a value, leaving `undefined`.
    pub fn take_callback(&mut self) -> Option<ScriptCallback> {
        match std::mem::take(self) {
            ScriptValue::Callback(callback) => Some(callback),
            other => {
                *self = other;
                None
            }
        }
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Null | ScriptValue::Undefined)
    }

    /// Short kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) | ScriptValue::Float(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Date(_) => "date",
            ScriptValue::Bytes(_) => "bytes",
            ScriptValue::Array(_) => "array",
            ScriptValue::Object(_) => "object",
            ScriptValue::Native(_) => "native",
            ScriptValue::Callback(_) => "function",
            ScriptValue::Opaque(_) => "opaque",
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Int(value as i64)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<u32> for ScriptValue {
    fn from(value: u32) -> Self {
        ScriptValue::Int(value as i64)
    }
}

impl From<u64> for ScriptValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(int) => ScriptValue::Int(int),
            Err(_) => ScriptValue::Float(value as f64),
        }
    }
}

impl From<usize> for ScriptValue {
    fn from(value: usize) -> Self {
        ScriptValue::from(value as u64)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<DateTime<Utc>> for ScriptValue {
    fn from(value: DateTime<Utc>) -> Self {
        ScriptValue::Date(value)
    }
}

impl From<NativeRef> for ScriptValue {
    fn from(value: NativeRef) -> Self {
        ScriptValue::Native(value)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(items: Vec<T>) -> Self {
        ScriptValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ScriptValue::Null)
    }
}

impl From<BTreeMap<String, ScriptValue>> for ScriptValue {
    fn from(map: BTreeMap<String, ScriptValue>) -> Self {
        ScriptValue::Object(map)
    }
}

/// Operands decoded from the wire are plain JSON.
impl From<serde_json::Value> for ScriptValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(int) => ScriptValue::Int(int),
                None => ScriptValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ScriptValue::String(s),
            Value::Array(items) => {
                ScriptValue::Array(items.into_iter().map(ScriptValue::from).collect())
            }
            Value::Object(map) => ScriptValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, ScriptValue::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Shared handle to an exposed native object.
///
/// Identity is the address of the shared allocation, so clones of the same
/// `Arc` always resolve to the same binding.
#[derive(Clone)]
pub struct NativeRef {
    object: Arc<dyn Any + Send + Sync>,
    plugin: Arc<dyn Plugin>,
    meta: Arc<MetaObject>,
}

impl NativeRef {
    pub fn new<T: Exported>(object: Arc<T>) -> Self {
        let plugin: Arc<dyn Plugin> = object.clone();
        Self {
            object,
            plugin,
            meta: MetaObject::of::<T>(),
        }
    }

    /// Move `value` behind a fresh `Arc`.
    pub fn from_value<T: Exported>(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.object) as *const () as usize
    }

    pub fn meta(&self) -> &Arc<MetaObject> {
        &self.meta
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    pub(crate) fn as_any(&self) -> &(dyn Any + Send + Sync + 'static) {
        self.object.as_ref()
    }
}

impl PartialEq for NativeRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRef")
            .field("type", &self.meta.type_name())
            .field("identity", &format_args!("{:#x}", self.identity()))
            .finish()
    }
}
