//! Tagged runtime values and their wire codec.
//!
//! The store keeps everything as UTF-8 strings; decoding attempts boolean,
//! then number, then JSON, then falls back to the raw string. The boolean
//! alphabet on the decode path is `true`/`false` only, so numeric values
//! round-trip; the wider flexible alphabet (`1/0/yes/no`) applies wherever a
//! boolean is demanded, through [`parse_flexible_bool`].

use std::collections::HashMap;

use beacon_lang::ast::ScalarLit;

/// A value read from or written to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Number(f64),
    Bool(bool),
    Str(String),
    Object(serde_json::Value),
    Unavailable,
}

impl TaggedValue {
    pub fn is_available(&self) -> bool {
        !matches!(self, TaggedValue::Unavailable)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TaggedValue::Number(_) => "number",
            TaggedValue::Bool(_) => "bool",
            TaggedValue::Str(_) => "string",
            TaggedValue::Object(_) => "object",
            TaggedValue::Unavailable => "unavailable",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TaggedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Follow a property path into an object value. An empty path returns
    /// the value itself; any miss returns `Unavailable`.
    pub fn get_path(&self, path: &[String]) -> TaggedValue {
        if path.is_empty() {
            return self.clone();
        }
        let TaggedValue::Object(json) = self else {
            return TaggedValue::Unavailable;
        };
        let mut cur = json;
        for seg in path {
            match cur.get(seg) {
                Some(next) => cur = next,
                None => return TaggedValue::Unavailable,
            }
        }
        from_json(cur)
    }
}

impl From<&ScalarLit> for TaggedValue {
    fn from(lit: &ScalarLit) -> Self {
        match lit {
            ScalarLit::Number(n) => TaggedValue::Number(*n),
            ScalarLit::Bool(b) => TaggedValue::Bool(*b),
            ScalarLit::Str(s) => TaggedValue::Str(s.clone()),
            _ => TaggedValue::Unavailable,
        }
    }
}

/// Typed equality: values of different types are never equal; numbers
/// compare by value.
pub fn values_equal(a: &TaggedValue, b: &TaggedValue) -> bool {
    match (a, b) {
        (TaggedValue::Number(x), TaggedValue::Number(y)) => x == y,
        (TaggedValue::Bool(x), TaggedValue::Bool(y)) => x == y,
        (TaggedValue::Str(x), TaggedValue::Str(y)) => x == y,
        (TaggedValue::Object(x), TaggedValue::Object(y)) => x == y,
        (TaggedValue::Unavailable, TaggedValue::Unavailable) => true,
        _ => false,
    }
}

/// Render a value for message bodies and log lines.
pub fn value_to_string(v: &TaggedValue) -> String {
    match v {
        TaggedValue::Number(n) => format_number(*n),
        TaggedValue::Bool(b) => b.to_string(),
        TaggedValue::Str(s) => s.clone(),
        TaggedValue::Object(j) => j.to_string(),
        TaggedValue::Unavailable => "unavailable".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Wire codec
// ---------------------------------------------------------------------------

/// Serialize a value to its store representation. Booleans are lowercase,
/// numbers canonical decimal, objects JSON.
pub fn encode_wire(v: &TaggedValue) -> String {
    value_to_string(v)
}

/// Decode a raw store string into a tagged value: boolean, then number,
/// then JSON object/array, then the string itself.
pub fn decode_wire(raw: &str) -> TaggedValue {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return TaggedValue::Bool(true),
        "false" => return TaggedValue::Bool(false),
        _ => {}
    }
    if let Some(n) = parse_wire_number(trimmed) {
        return TaggedValue::Number(n);
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return TaggedValue::Object(json);
        }
    }
    TaggedValue::Str(raw.to_string())
}

/// The shared flexible boolean predicate: `true/false/1/0/yes/no`,
/// case-insensitive.
pub fn parse_flexible_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a number, tolerating `,` as the decimal separator.
pub fn parse_wire_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = if s.contains(',') && !s.contains('.') {
        s.replacen(',', ".", 1)
    } else {
        s.to_string()
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Canonical decimal rendering: integral values print without a fraction.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn from_json(json: &serde_json::Value) -> TaggedValue {
    match json {
        serde_json::Value::Bool(b) => TaggedValue::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(TaggedValue::Number)
            .unwrap_or(TaggedValue::Unavailable),
        serde_json::Value::String(s) => TaggedValue::Str(s.clone()),
        serde_json::Value::Null => TaggedValue::Unavailable,
        other => TaggedValue::Object(other.clone()),
    }
}

/// Decode a hash representation (`value` + optional `timestamp` fields).
pub fn decode_hash(fields: &HashMap<String, String>) -> TaggedValue {
    match fields.get("value") {
        Some(raw) => decode_wire(raw),
        None => TaggedValue::Unavailable,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
