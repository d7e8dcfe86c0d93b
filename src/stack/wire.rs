//! Wire shapes of a get-method stack item
//!
//! Indexers disagree on how a stack item is serialised:
//!
//! - Shape A (TonAPI, toncenter v3): `{"type": "num", "num": "0x2a"}`,
//!   `{"type": "cell", "cell": "b5ee9c72..."}`, `{"type": "num", "value": "42"}`
//! - Shape B (toncenter v2 / tonlib): `["num", "0x2a"]`, `["tvm.Cell", {"bytes": "te6c..."}]`
//! - Shape C: a bare JSON number or string
//!
//! `WireValue` is a closed union over all of them. Deserialising never fails:
//! anything unrecognised lands in `WireValue::Other`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One stack item exactly as the indexer sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Shape A
    Tagged(TaggedItem),
    /// Shape B
    Pair(String, Value),
    /// Shape C
    Number(serde_json::Number),
    Text(String),
    Flag(bool),
    Other(Value),
}

/// Shape A object. The payload field name varies by provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaggedItem {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub num: Option<Value>,
    #[serde(default)]
    pub cell: Option<Value>,
    #[serde(default)]
    pub slice: Option<Value>,
}

impl TaggedItem {
    /// First present payload, in the order providers are known to use them.
    pub fn payload(&self) -> Option<&Value> {
        self.value
            .as_ref()
            .or(self.num.as_ref())
            .or(self.cell.as_ref())
            .or(self.slice.as_ref())
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) if map.get("type").map_or(false, Value::is_string) => {
                let value = Value::Object(map);
                match serde_json::from_value::<TaggedItem>(value.clone()) {
                    Ok(tagged) => WireValue::Tagged(tagged),
                    Err(_) => WireValue::Other(value),
                }
            }
            Value::Array(mut items) if items.len() == 2 && items[0].is_string() => {
                let payload = items.pop().unwrap_or(Value::Null);
                match items.pop() {
                    Some(Value::String(tag)) => WireValue::Pair(tag, payload),
                    other => WireValue::Other(Value::Array(other.into_iter().chain([payload]).collect())),
                }
            }
            Value::Number(n) => WireValue::Number(n),
            Value::String(s) => WireValue::Text(s),
            Value::Bool(b) => WireValue::Flag(b),
            other => WireValue::Other(other),
        }
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(WireValue::from)
    }
}

/// What kind of value a wire tag announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireTag {
    Num,
    Cell,
    Unknown,
}

impl WireTag {
    pub fn classify(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "num" | "int" | "int257" | "number" => WireTag::Num,
            "cell" | "slice" | "tvm.cell" | "tvm.slice" | "builder" | "tvm.builder" => {
                WireTag::Cell
            }
            _ => WireTag::Unknown,
        }
    }
}

/// Parse a raw JSON stack array. Never fails; a non-array yields an empty stack.
pub fn wire_stack(value: &Value) -> Vec<WireValue> {
    match value {
        Value::Array(items) => items.iter().cloned().map(WireValue::from).collect(),
        _ => Vec::new(),
    }
}
