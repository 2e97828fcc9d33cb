//! Typed records: the traits implemented by `#[derive(SerializableDataclass)]`.
//!
//! [`SerializableRecord`] is the object-safe half, used by the serializer, the
//! loader and `Box<dyn SerializableRecord>` values. [`SerializableDataclass`]
//! adds the static half: the format tag, field loading and the user-facing
//! `serialize` / `load` / `diff` / `update_from_nested` operations.

use std::fmt;

use crate::equality::DeepEq;
use crate::error::{Result, ZanjError};
use crate::json::{JsonValue, is_format_key};
use crate::loader::JsonLoader;
use crate::path::ObjectPath;
use crate::serializer::JsonSerializer;
use crate::value::Serializable;

/// Suffix of every record format tag.
pub const RECORD_TAG_SUFFIX: &str = "(SerializableDataclass)";

/// True when `tag` follows the record tag convention `<Name>(SerializableDataclass)`.
pub fn is_record_tag(tag: &str) -> bool {
    tag.len() > RECORD_TAG_SUFFIX.len() && tag.ends_with(RECORD_TAG_SUFFIX)
}

/// Static description of one record field, as declared through `#[sdc(...)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name, also the key in the serialized mapping.
    pub name: &'static str,
    /// Declared type, as written in the source.
    pub type_name: &'static str,
    /// Included in the serialized mapping.
    pub serialize: bool,
    /// Read back from the mapping on load.
    pub init: bool,
    /// Has a default used when the key is missing (or always, for non-init fields).
    pub has_default: bool,
    /// Payload is checked against the field type on load.
    pub assert_type: bool,
    /// Takes part in equality and `diff`.
    pub compare: bool,
    /// Shown in `repr`.
    pub repr: bool,
    /// Fields of the embedded record are serialized at this level.
    pub flatten: bool,
    /// A `serialization_fn` is set.
    pub has_serialization_fn: bool,
    /// A `deserialize_fn` is set.
    pub has_deserialize_fn: bool,
    /// A `loading_fn` is set.
    pub has_loading_fn: bool,
}

impl FieldInfo {
    /// Descriptor with every flag at its default.
    pub const fn new(name: &'static str, type_name: &'static str) -> Self {
        Self {
            name,
            type_name,
            serialize: true,
            init: true,
            has_default: false,
            assert_type: true,
            compare: true,
            repr: true,
            flatten: false,
            has_serialization_fn: false,
            has_deserialize_fn: false,
            has_loading_fn: false,
        }
    }
}

/// Object-safe interface of a typed record.
pub trait SerializableRecord: Serializable {
    /// `<Name>(SerializableDataclass)`.
    fn format_tag(&self) -> &'static str;

    /// Declared fields, in declaration order.
    fn fields(&self) -> &'static [FieldInfo];

    /// Names of the computed properties serialized after the fields.
    fn properties(&self) -> &'static [&'static str];

    /// Value of a field walked by the serializer (serialized, no `serialization_fn`).
    /// Flattened records are searched too.
    fn field_value(&self, name: &str) -> Option<&dyn Serializable>;

    /// Serializes the record with `serializer`; nested values are serialized
    /// through it so that its handler chain (and archive externalization) applies.
    fn serialize_record(&self, serializer: &JsonSerializer, path: &ObjectPath) -> Result<JsonValue>;

    /// Structural equality against a record of any type.
    fn dyn_eq(&self, other: &dyn SerializableRecord) -> bool;

    /// Differing fields as `{field: {"self": X, "other": Y}}`.
    fn diff_dyn(&self, other: &dyn SerializableRecord, of_serialized: bool) -> Result<JsonValue>;

    /// Checks every field with `assert_type` against its declared type.
    fn check_field_types(&self) -> Result<()>;
}

impl fmt::Debug for dyn SerializableRecord + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl DeepEq for dyn SerializableRecord {
    fn deep_eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

/// A record type deriving `SerializableDataclass`.
///
/// ```rust
/// use zanj::prelude::*;
///
/// #[derive(Debug, Clone, SerializableDataclass)]
/// #[sdc(properties(full_name))]
/// struct Person {
///     first: String,
///     last: String,
///     #[sdc(default)]
///     age: Option<u32>,
/// }
///
/// impl Person {
///     fn full_name(&self) -> String {
///         format!("{} {}", self.first, self.last)
///     }
/// }
///
/// let p = Person { first: "Ada".into(), last: "Lovelace".into(), age: None };
/// let json = p.serialize()?;
/// assert_eq!(json["__format__"], "Person(SerializableDataclass)");
/// assert_eq!(json["full_name"], "Ada Lovelace");
/// assert_eq!(Person::load(&json)?, p);
/// # Ok::<(), zanj::ZanjError>(())
/// ```
pub trait SerializableDataclass: SerializableRecord + Sized {
    /// Format tag stamped on the serialized mapping.
    const FORMAT_TAG: &'static str;

    /// Declared fields.
    const FIELDS: &'static [FieldInfo];

    /// Computed properties serialized after the fields.
    const PROPERTIES: &'static [&'static str];

    /// Builds the record from the fields of a mapping whose tag was already checked.
    fn load_fields(map: &crate::json::JsonMap, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self>;

    /// Loads a payload: the generated tag check and field loading, or a
    /// preserved user-written `load`.
    fn load_payload(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self>;

    /// Replaces or patches one field from its serialized form. Returns `false`
    /// for names that are not init fields of this record.
    fn update_field(
        &mut self,
        name: &str,
        value: &JsonValue,
        loader: &JsonLoader<'_>,
        path: &ObjectPath,
    ) -> Result<bool>;

    /// Registers the loader for [`Self::FORMAT_TAG`] once per process.
    fn ensure_registered();

    /// Serializes with a default serializer.
    fn serialize(&self) -> Result<JsonValue> {
        JsonSerializer::default().json_serialize(self, &ObjectPath::root())
    }

    /// Loads from a serialized mapping with a default loader.
    fn load(node: &JsonValue) -> Result<Self> {
        Self::load_payload(node, &JsonLoader::default(), &ObjectPath::root())
    }

    /// Differing fields between `self` and `other`. With `of_serialized` the
    /// serialized forms are compared instead of the values.
    fn diff(&self, other: &Self, of_serialized: bool) -> Result<JsonValue> {
        self.diff_dyn(other, of_serialized)
    }

    /// Applies a partial nested mapping. Nested records are patched in place;
    /// keys that are absent leave their field unchanged.
    fn update_from_nested(&mut self, patch: &JsonValue) -> Result<()> {
        self.update_from_nested_with(patch, &JsonLoader::default(), &ObjectPath::root())
    }

    /// [`Self::update_from_nested`] with an explicit loader.
    fn update_from_nested_with(
        &mut self,
        patch: &JsonValue,
        loader: &JsonLoader<'_>,
        path: &ObjectPath,
    ) -> Result<()> {
        let map = patch.as_object().ok_or_else(|| {
            ZanjError::schema(path, format!("patch for {} must be a mapping", Self::FORMAT_TAG))
        })?;
        for (key, value) in map {
            if is_format_key(key) {
                continue;
            }
            if !self.update_field(key, value, loader, &path.child(key.as_str()))? {
                tracing::debug!(%path, key = %key, tag = Self::FORMAT_TAG, "ignoring patch key");
            }
        }
        Ok(())
    }

    /// True when every asserted field conforms to its declared type.
    fn validate_fields_types(&self) -> bool {
        self.check_field_types().is_ok()
    }

    /// Like [`Self::validate_fields_types`], returning the first failure.
    fn assert_fields_types(&self) -> Result<()> {
        self.check_field_types()
    }
}

/// Registers the loader of `T` again. Derived records are already installed
/// when the global registry is created; this restores a record loader after
/// [`register_loader_handler`](crate::register_loader_handler) replaced it.
pub fn register_record<T: SerializableDataclass>() {
    T::ensure_registered();
}
