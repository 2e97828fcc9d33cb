// src/rt.rs

//! Runtime utilities for generated code (Macros).
//! Do not use directly.

use std::any::type_name;

use crate::equality::DeepEq;
use crate::error::{ErrorMode, Result, ZanjError};
use crate::handlers::LoaderHandler;
use crate::json::{JsonMap, JsonValue, format_tag, is_format_key, node_format_tag};
use crate::load_impls::Loadable;
use crate::loader::{JsonLoader, Loaded, register_loader_handler};
use crate::path::ObjectPath;
use crate::record::{SerializableDataclass, SerializableRecord};
use crate::serializer::JsonSerializer;
use crate::types::validate_type;
use crate::value::{Serializable, ValueKind};

#[doc(hidden)]
pub use inventory;

/// Type assertion policy of one field, built by the derive.
#[derive(Debug, Clone, Copy)]
pub struct FieldCheck {
    /// `Record.field`, used in errors.
    pub qualname: &'static str,
    /// Check the payload against the field type before loading.
    pub assert_type: bool,
    /// Policy when the payload does not conform.
    pub on_mismatch: ErrorMode,
    /// Policy when the field type cannot be checked.
    pub on_error: ErrorMode,
}

// --- Loading ---

/// Returns the mapping of a record payload after checking its format tag.
pub fn record_map<'n>(node: &'n JsonValue, tag: &'static str, path: &ObjectPath) -> Result<&'n JsonMap> {
    let map = node
        .as_object()
        .ok_or_else(|| ZanjError::schema(path, format!("payload for {tag} must be a mapping")))?;
    match format_tag(map) {
        Some(found) if found != tag => Err(ZanjError::schema(
            path,
            format!("format tag `{found}` does not match `{tag}`"),
        )),
        _ => Ok(map),
    }
}

/// Loads one field payload, applying the type assertion policy first.
pub fn load_field<T: Loadable>(
    node: &JsonValue,
    loader: &JsonLoader<'_>,
    path: &ObjectPath,
    check: FieldCheck,
) -> Result<T> {
    if check.assert_type {
        let expr = T::type_expr();
        match validate_type(node, &expr) {
            Ok(true) => {}
            Ok(false) => {
                let err = ZanjError::type_error(
                    check.qualname,
                    format!("payload at `{path}` does not conform to {expr}"),
                );
                check.on_mismatch.handle(err, || ())?;
            }
            Err(err) => check.on_error.handle(err, || ())?,
        }
    }
    T::load_json(node, loader, path)
}

/// Error for an init field without payload and without default.
pub fn missing_field(qualname: &'static str, path: &ObjectPath) -> ZanjError {
    ZanjError::type_error(qualname, format!("missing from the payload at `{path}` and has no default"))
}

/// Wraps a failure of a user-supplied field function.
pub fn field_fn_error(qualname: &'static str, err: ZanjError) -> ZanjError {
    match err {
        ZanjError::Type { .. } | ZanjError::Schema { .. } => err,
        other => ZanjError::type_error(qualname, other.to_string()),
    }
}

/// Load handler of `T`, indexed under its format tag.
pub fn record_loader_handler<T: SerializableDataclass>() -> LoaderHandler {
    let tag = T::FORMAT_TAG;
    LoaderHandler::new(
        format!("sdc:{tag}"),
        move |node, _, _| node_format_tag(node) == Some(tag),
        |node, path, loader| T::load_payload(node, loader, path).map(|r| Loaded::Record(Box::new(r))),
    )
    .with_format_tag(tag)
    .with_desc(format!("typed record {tag}"))
    .with_source(type_name::<T>())
}

/// Registers the loader of `T` under its format tag. Called once per type
/// through [`SerializableDataclass::ensure_registered`].
pub fn register_record_loader<T: SerializableDataclass>() {
    tracing::debug!(tag = T::FORMAT_TAG, "registering record loader");
    register_loader_handler(record_loader_handler::<T>());
}

/// Link-time entry submitted by the derive for every record type. The global
/// registry installs all entries when it is first touched, so a process can
/// load a record it never constructed or saved.
pub struct RecordRegistration {
    /// Builds the load handler of the record.
    pub handler: fn() -> LoaderHandler,
}

inventory::collect!(RecordRegistration);

/// Load handlers of every record linked into the binary.
pub(crate) fn linked_record_handlers() -> impl Iterator<Item = LoaderHandler> {
    inventory::iter::<RecordRegistration>
        .into_iter()
        .map(|entry| (entry.handler)())
}

// --- Serializing ---

/// Serializes a field through the ambient serializer.
pub fn serialize_field(
    out: &mut JsonMap,
    serializer: &JsonSerializer,
    path: &ObjectPath,
    name: &'static str,
    value: &dyn Serializable,
) -> Result<()> {
    let json = serializer.json_serialize(value, &path.child(name))?;
    out.insert(name.to_owned(), json);
    Ok(())
}

/// Merges the fields of an embedded record into `out`. Its format tag is dropped.
pub fn flatten_into(
    out: &mut JsonMap,
    serializer: &JsonSerializer,
    path: &ObjectPath,
    inner: &dyn SerializableRecord,
) -> Result<()> {
    match inner.serialize_record(serializer, path)? {
        JsonValue::Object(map) => {
            out.extend(map.into_iter().filter(|(k, _)| !is_format_key(k)));
            Ok(())
        }
        other => Err(ZanjError::schema(
            path,
            format!("flattened record {} serialized to a non-mapping: {other}", inner.format_tag()),
        )),
    }
}

// --- Equality, diff, validation ---

/// Adds `name` to `out` when `a` and `b` differ. Records of the same type are
/// diffed recursively.
pub fn field_diff<T>(out: &mut JsonMap, name: &'static str, a: &T, b: &T) -> Result<()>
where
    T: DeepEq + Serializable,
{
    if a.deep_eq(b) {
        return Ok(());
    }
    if let (ValueKind::Record(ra), ValueKind::Record(rb)) = (a.describe(), b.describe())
        && ra.format_tag() == rb.format_tag()
    {
        out.insert(name.to_owned(), ra.diff_dyn(rb, false)?);
        return Ok(());
    }
    out.insert(name.to_owned(), self_other(crate::json_serialize(a)?, crate::json_serialize(b)?));
    Ok(())
}

/// Like [`field_diff`] for fields that are not [`Serializable`]; both sides are
/// rendered with `Debug`.
pub fn field_diff_debug<T>(out: &mut JsonMap, name: &'static str, a: &T, b: &T)
where
    T: DeepEq + std::fmt::Debug,
{
    if !a.deep_eq(b) {
        out.insert(
            name.to_owned(),
            self_other(JsonValue::String(format!("{a:?}")), JsonValue::String(format!("{b:?}"))),
        );
    }
}

/// Diff of two serialized records. Nested untagged or same-tagged mappings
/// recurse; format keys are skipped.
pub fn serialized_diff(a: &JsonValue, b: &JsonValue) -> JsonValue {
    let (JsonValue::Object(ma), JsonValue::Object(mb)) = (a, b) else {
        return if a == b { JsonValue::Object(JsonMap::new()) } else { self_other(a.clone(), b.clone()) };
    };
    let mut out = JsonMap::new();
    for (key, va) in ma {
        if is_format_key(key) {
            continue;
        }
        match mb.get(key) {
            Some(vb) if va == vb => {}
            Some(vb @ JsonValue::Object(_))
                if va.is_object() && node_format_tag(va) == node_format_tag(vb) =>
            {
                out.insert(key.clone(), serialized_diff(va, vb));
            }
            Some(vb) => {
                out.insert(key.clone(), self_other(va.clone(), vb.clone()));
            }
            None => {
                out.insert(key.clone(), self_other(va.clone(), JsonValue::Null));
            }
        }
    }
    for (key, vb) in mb {
        if !is_format_key(key) && !ma.contains_key(key) {
            out.insert(key.clone(), self_other(JsonValue::Null, vb.clone()));
        }
    }
    JsonValue::Object(out)
}

fn self_other(a: JsonValue, b: JsonValue) -> JsonValue {
    let mut pair = JsonMap::new();
    pair.insert("self".into(), a);
    pair.insert("other".into(), b);
    JsonValue::Object(pair)
}

/// Error for `diff` between records of different types.
pub fn diff_type_mismatch(this: &'static str, other: &dyn SerializableRecord) -> ZanjError {
    ZanjError::type_error(
        this,
        format!("cannot diff against a record of another type ({})", other.format_tag()),
    )
}

/// Checks the serialized form of a field value against its declared type.
pub fn check_field_type<T>(value: &T, qualname: &'static str) -> Result<()>
where
    T: Serializable + Loadable,
{
    let expr = T::type_expr();
    let node = crate::json_serialize(value)?;
    if validate_type(&node, &expr)? {
        Ok(())
    } else {
        Err(ZanjError::type_error(qualname, format!("value does not conform to {expr}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHECK: FieldCheck = FieldCheck {
        qualname: "R.x",
        assert_type: true,
        on_mismatch: ErrorMode::Raise,
        on_error: ErrorMode::Raise,
    };

    #[test]
    fn mismatch_policy_decides() {
        let loader = JsonLoader::default();
        let root = ObjectPath::root();
        let err = load_field::<String>(&json!(1), &loader, &root, CHECK).unwrap_err();
        assert!(err.to_string().contains("R.x"), "{err}");

        let relaxed = FieldCheck {
            on_mismatch: ErrorMode::Ignore,
            ..CHECK
        };
        // The payload still has to load.
        assert_eq!(load_field::<f64>(&json!(1), &loader, &root, relaxed).ok(), Some(1.0));
        assert!(load_field::<String>(&json!(1), &loader, &root, relaxed).is_err());
    }

    #[test]
    fn record_map_rejects_foreign_tags() {
        let root = ObjectPath::root();
        let tag = "A(SerializableDataclass)";
        assert!(record_map(&json!({"x": 1}), tag, &root).is_ok());
        assert!(record_map(&json!({"__format__": tag}), tag, &root).is_ok());
        let err = record_map(&json!({"__format__": "B(SerializableDataclass)"}), tag, &root).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }

    #[test]
    fn serialized_diff_recurses() {
        let a = json!({"__format__": "T", "x": 1, "inner": {"y": [1, 2], "z": 0}});
        let b = json!({"__format__": "T", "x": 1, "inner": {"y": [1, 3], "z": 0}});
        assert_eq!(
            serialized_diff(&a, &b),
            json!({"inner": {"y": {"self": [1, 2], "other": [1, 3]}}})
        );
        assert_eq!(serialized_diff(&a, &a), json!({}));
    }

    #[test]
    fn field_diff_reports_both_sides() -> Result<()> {
        let mut out = JsonMap::new();
        field_diff(&mut out, "v", &vec![1, 2], &vec![1, 2])?;
        assert!(out.is_empty());
        field_diff(&mut out, "v", &vec![1, 2], &vec![3])?;
        assert_eq!(JsonValue::Object(out), json!({"v": {"self": [1, 2], "other": [3]}}));
        Ok(())
    }
}
