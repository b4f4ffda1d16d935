// =============================================================================
// normalize.rs - THE FORM BOOK TRANSLATOR
// =============================================================================
//
// Providers can't agree on what to call anything. A horse is `horse_name`
// here, `name` there. A course is a `course`, a `venue`, a `track` or, when
// someone is feeling creative, the meeting's `name`.
//
// The helpers here pick the first candidate that actually has something in
// it, and coerce finishing positions and yes/no flags into real types. None
// of them ever fail: bad input degrades to empty/absent.
// =============================================================================

use std::sync::LazyLock;

use serde_json::{Map, Value};

static EMPTY_OBJECT: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

/// Scripting-style truthiness: null, false, zero, "" and empty containers
/// are falsy. Everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// First candidate that is a non-blank string or a truthy non-string.
/// Returns `""` when nothing qualifies.
pub fn first_non_empty<'a, I>(candidates: I) -> Value
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|v| match v {
            Value::String(s) => !s.trim().is_empty(),
            other => is_truthy(other),
        })
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()))
}

/// Plain `a or b or c` fallback: the first truthy candidate, whitespace-only
/// strings included.
pub fn first_truthy<'a, I>(candidates: I) -> Option<&'a Value>
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    candidates.into_iter().flatten().find(|v| is_truthy(v))
}

/// Stringify a chosen value for an output field.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// `first_non_empty` over the named keys of `obj`, rendered as text.
pub fn pick(obj: &Map<String, Value>, keys: &[&str]) -> String {
    text_of(&first_non_empty(keys.iter().map(|k| obj.get(*k))))
}

/// View a JSON value as an object, treating anything else as `{}`.
pub fn as_object(value: &Value) -> &Map<String, Value> {
    value.as_object().unwrap_or(&EMPTY_OBJECT)
}

/// `"1"`, `"1="`, `" 2 "`, `3` -> rank. Everything else -> `None`.
///
/// A trailing `=` is the dead-heat marker and is dropped before parsing.
pub fn normalize_position(raw: Option<&Value>) -> Option<i64> {
    let raw = raw?;
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => return n.as_i64(),
        _ => return None,
    };
    let trimmed = text.trim();
    let trimmed = trimmed.strip_suffix('=').unwrap_or(trimmed).trim();
    trimmed.parse::<i64>().ok()
}

/// `"1"`, `"true"`, `"yes"`, `"y"` (any case) -> true.
pub fn normalize_boolean(raw: &str) -> bool {
    matches!(
        raw.to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}
