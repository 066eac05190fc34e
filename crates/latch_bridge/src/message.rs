//! Wire messages posted from scripts
//!
//! A script call arrives as a keyed mapping:
//!
//! ```text
//! { "$opcode": "greet", "$target": 0, "$operand": ["world"] }
//! ```
//!
//! `$target` defaults to the principal instance (0). `$operand` carries the
//! argument sequence for method calls, a single value for property writes and
//! the constructor arguments for `"+"`.

use crate::error::BridgeError;
use serde_json::Value;

pub const OPCODE_KEY: &str = "$opcode";
pub const TARGET_KEY: &str = "$target";
pub const OPERAND_KEY: &str = "$operand";

/// Opcode creating a sub-instance at the script-chosen target id.
pub const CREATE_OPCODE: &str = "+";
/// Opcode disposing the target instance (the whole channel for target 0).
pub const DISPOSE_OPCODE: &str = "-";

/// Message as delivered by a context adapter, before decoding.
///
/// `body` is `None` when the script posted `undefined`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMessage {
    pub name: String,
    pub body: Option<Value>,
}

impl ScriptMessage {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            body: Some(body),
        }
    }

    /// The "undefined payload" posted by some engines.
    pub fn undefined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: None,
        }
    }
}

/// Decoded script-to-native call.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub target: i64,
    pub opcode: String,
    pub operand: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode<'a> {
    Create,
    Dispose,
    Member(&'a str),
}

impl Message {
    pub fn decode(raw: &ScriptMessage) -> Result<Message, BridgeError> {
        let body = raw
            .body
            .as_ref()
            .ok_or_else(|| BridgeError::MalformedMessage("undefined payload".into()))?;
        let fields = body
            .as_object()
            .ok_or_else(|| BridgeError::MalformedMessage("body is not a keyed mapping".into()))?;
        let opcode = fields
            .get(OPCODE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::MalformedMessage(format!("missing {}", OPCODE_KEY)))?;

        let target = match fields.get(TARGET_KEY) {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral))
                .ok_or_else(|| {
                    BridgeError::MalformedMessage(format!("{} {} is not an instance id", TARGET_KEY, n))
                })?,
            Some(other) => {
                return Err(BridgeError::MalformedMessage(format!(
                    "{} must be a number, got {}",
                    TARGET_KEY, other
                )))
            }
        };

        Ok(Message {
            channel: raw.name.clone(),
            target,
            opcode: opcode.to_owned(),
            operand: fields.get(OPERAND_KEY).cloned(),
        })
    }

    pub fn opcode(&self) -> Opcode<'_> {
        match self.opcode.as_str() {
            CREATE_OPCODE => Opcode::Create,
            DISPOSE_OPCODE => Opcode::Dispose,
            name => Opcode::Member(name),
        }
    }
}

/// Whole numbers within the id range; scripts send every id as a double.
fn integral(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}
