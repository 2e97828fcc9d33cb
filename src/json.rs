//! JSON tree vocabulary shared by the serializer, the loader and the archive.

/// A node of the JSON tree.
pub type JsonValue = serde_json::Value;

/// An insertion-ordered JSON mapping.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Key marking a mapping as a typed payload.
pub const FORMAT_KEY: &str = "__format__";

/// Key used instead of [`FORMAT_KEY`] when the serializer runs with `write_only_format`.
pub const WRITE_FORMAT_KEY: &str = "__write_format__";

/// Key holding the archive path of an externalized value.
pub const REF_KEY: &str = "$ref";

/// Returns the format tag of a mapping.
///
/// Both [`FORMAT_KEY`] and [`WRITE_FORMAT_KEY`] are accepted; the former wins
/// when both are present.
pub fn format_tag(map: &JsonMap) -> Option<&str> {
    map.get(FORMAT_KEY)
        .or_else(|| map.get(WRITE_FORMAT_KEY))
        .and_then(JsonValue::as_str)
}

/// Returns the format tag of `node` if it is a tagged mapping.
pub fn node_format_tag(node: &JsonValue) -> Option<&str> {
    node.as_object().and_then(format_tag)
}

/// True for the two format keys.
pub fn is_format_key(key: &str) -> bool {
    key == FORMAT_KEY || key == WRITE_FORMAT_KEY
}

/// True for a reference stub left in place of an externalized value.
pub fn is_external_ref(map: &JsonMap) -> bool {
    map.contains_key(REF_KEY) && format_tag(map).is_some_and(|t| t.ends_with(":external"))
}

/// The `$ref` of a reference stub.
pub fn external_ref(node: &JsonValue) -> Option<&str> {
    node.as_object()
        .filter(|m| is_external_ref(m))
        .and_then(|m| m.get(REF_KEY))
        .and_then(JsonValue::as_str)
}

/// Encodes a float. JSON has no literal for non-finite values, so those become
/// the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
pub fn float_to_json(value: f64) -> JsonValue {
    match serde_json::Number::from_f64(value) {
        Some(n) => JsonValue::Number(n),
        None if value.is_nan() => JsonValue::String("NaN".into()),
        None if value > 0.0 => JsonValue::String("Infinity".into()),
        None => JsonValue::String("-Infinity".into()),
    }
}

/// Decodes a float written by [`float_to_json`]; integers are widened.
pub fn float_from_json(node: &JsonValue) -> Option<f64> {
    match node {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => match s.as_str() {
            "NaN" | "nan" => Some(f64::NAN),
            "Infinity" | "inf" => Some(f64::INFINITY),
            "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}
