use std::borrow::Cow;

use serde_json::Value as JsonValue;

/// Suffix marking an accessor whose leaf is an array.
pub const ARRAY_SUFFIX: &str = "[]";
/// Trailing path segment resolving to an array's element count.
pub const LENGTH_SEGMENT: &str = "length";

/// Resolves an accessor path against a record.
///
/// Paths are dot separated. A trailing `[]` marks an array facet, and a trailing
/// `.length` segment on an array yields its element count. Array leaves are
/// returned element by element; `null` and absent paths yield nothing.
pub fn lookup<'a>(record: &'a JsonValue, accessor: &str) -> Vec<Cow<'a, JsonValue>> {
    let path = accessor.strip_suffix(ARRAY_SUFFIX).unwrap_or(accessor);
    if let Some(parent) = path.strip_suffix(&format!(".{LENGTH_SEGMENT}"))
        && let Some(JsonValue::Array(items)) = walk(record, parent)
    {
        return vec![Cow::Owned(JsonValue::from(items.len()))];
    }
    match walk(record, path) {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(Cow::Borrowed)
            .collect(),
        Some(value) => vec![Cow::Borrowed(value)],
    }
}

fn walk<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Canonical text form shared by the in-memory index and relational imports.
pub fn canonical_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Bool(flag) => Some(flag.to_string()),
        JsonValue::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numeric coercion used for continuous facets.
pub fn coerce_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64().filter(|value| value.is_finite()),
        JsonValue::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite()),
        _ => None,
    }
}

/// `null` is always missing; sentinels match by value or by canonical text.
pub fn is_missing(value: &JsonValue, sentinels: &[JsonValue]) -> bool {
    if value.is_null() {
        return true;
    }
    let text = canonical_text(value);
    sentinels
        .iter()
        .any(|sentinel| sentinel == value || (text.is_some() && canonical_text(sentinel) == text))
}

/// Like [`is_missing`], but numeric values also match numeric sentinels by
/// value, so `-1.0` and `"-1"` both hit a `-1` sentinel.
pub fn is_missing_number(value: &JsonValue, sentinels: &[JsonValue]) -> bool {
    if is_missing(value, sentinels) {
        return true;
    }
    let Some(number) = coerce_number(value) else {
        return false;
    };
    sentinels
        .iter()
        .any(|sentinel| coerce_number(sentinel) == Some(number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_nested_paths() {
        let record = json!({"a": {"b": 3}, "tags": ["x", null, "y"]});
        let values = lookup(&record, "a.b");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_ref(), &json!(3));
        assert!(lookup(&record, "a.c").is_empty());
    }

    #[test]
    fn lookup_expands_arrays_and_lengths() {
        let record = json!({"tags": ["x", null, "y"]});
        let values = lookup(&record, "tags[]");
        let texts: Vec<_> = values.iter().filter_map(|v| canonical_text(v)).collect();
        assert_eq!(texts, vec!["x", "y"]);
        let length = lookup(&record, "tags.length");
        assert_eq!(length[0].as_ref(), &json!(3));
    }

    #[test]
    fn missing_matches_null_and_sentinels() {
        let sentinels = vec![json!(-999), json!("NA")];
        assert!(is_missing(&JsonValue::Null, &sentinels));
        assert!(is_missing(&json!(-999), &sentinels));
        assert!(is_missing(&json!("-999"), &sentinels));
        assert!(is_missing(&json!("NA"), &sentinels));
        assert!(!is_missing(&json!(0), &sentinels));
    }

    #[test]
    fn numeric_sentinels_match_by_value() {
        let sentinels = vec![json!(-1), json!("NA")];
        assert!(!is_missing(&json!(-1.0), &sentinels));
        assert!(is_missing_number(&json!(-1.0), &sentinels));
        assert!(is_missing_number(&json!("-1.00"), &sentinels));
        assert!(is_missing_number(&json!("NA"), &sentinels));
        assert!(!is_missing_number(&json!(-1.5), &sentinels));
    }

    #[test]
    fn coerces_numeric_text() {
        assert_eq!(coerce_number(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(coerce_number(&json!("abc")), None);
        assert_eq!(coerce_number(&json!(true)), None);
    }
}
