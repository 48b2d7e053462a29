//! Payload templating and JSON template matching.
//!
//! Commands render outbound payloads from a template and an optional runtime
//! value. Events match inbound JSON payloads against a stored template while
//! ignoring the one field that carries the value.

use serde_json::Value;

/// Placeholder substituted with the runtime value in plain payload templates.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Substitute [`VALUE_PLACEHOLDER`] in `template` with `value`.
///
/// The template is returned unchanged when `value` is `None`.
#[must_use]
pub fn apply_value(template: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => template.replace(VALUE_PLACEHOLDER, value),
        None => template.to_string(),
    }
}

/// Set `field` to `value` inside the JSON object `template`.
///
/// The template is returned unchanged when either is `None` or when the
/// template is not a JSON object.
#[must_use]
pub fn apply_json_field(template: &str, field: Option<&str>, value: Option<&str>) -> String {
    let (Some(field), Some(value)) = (field, value) else {
        return template.to_string();
    };
    match serde_json::from_str::<Value>(template) {
        Ok(Value::Object(mut map)) => {
            map.insert(field.to_string(), Value::String(value.to_string()));
            Value::Object(map).to_string()
        }
        _ => template.to_string(),
    }
}

/// Compare an event template against an actual payload.
///
/// Objects match when every key other than `ignored` is present on both
/// sides with equal values. `ignored` may be missing from `actual`. Any other
/// key present on only one side is a mismatch. Non-object values are
/// compared for plain equality.
#[must_use]
pub fn json_matches(template: &Value, actual: &Value, ignored: Option<&str>) -> bool {
    let (Value::Object(expected), Value::Object(received)) = (template, actual) else {
        return template == actual;
    };
    let relevant = |key: &String| Some(key.as_str()) != ignored;

    let expected_ok = expected
        .iter()
        .filter(|(key, _)| relevant(key))
        .all(|(key, value)| received.get(key) == Some(value));
    let no_extra = received
        .keys()
        .filter(|key| relevant(key))
        .all(|key| expected.contains_key(key));

    expected_ok && no_extra
}

/// Extract `field` from `actual` as a carried value.
///
/// JSON strings are returned without quotes, other values in their JSON form.
#[must_use]
pub fn carried_value(actual: &Value, field: &str) -> Option<String> {
    match actual.get(field)? {
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
