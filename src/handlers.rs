//! Serialize-side and load-side handlers, and the default serialize chain.
//!
//! A handler pairs a predicate with an action. Chains are kept sorted by
//! descending priority; handlers of equal priority keep their insertion order,
//! and the first handler whose predicate accepts a value owns it.

use std::fmt;
use std::sync::Arc;

use crate::array::serialize_array;
use crate::error::{Result, ZanjError};
use crate::json::{FORMAT_KEY, JsonMap, JsonValue, float_to_json};
use crate::loader::{JsonLoader, Loaded};
use crate::path::ObjectPath;
use crate::serializer::JsonSerializer;
use crate::value::{Subject, ValueKind};

/// Predicate of a serialize handler.
pub type SerializeCheck = Arc<dyn Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> bool + Send + Sync>;

/// Action of a serialize handler.
pub type SerializeFn =
    Arc<dyn Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> Result<JsonValue> + Send + Sync>;

/// Predicate of a load handler.
pub type LoadCheck = Arc<dyn Fn(&JsonValue, &ObjectPath, &JsonLoader<'_>) -> bool + Send + Sync>;

/// Action of a load handler.
pub type LoadFn = Arc<dyn Fn(&JsonValue, &ObjectPath, &JsonLoader<'_>) -> Result<Loaded> + Send + Sync>;

/// One entry of the serialize chain.
#[derive(Clone)]
pub struct SerializerHandler {
    /// Decides whether this handler owns a value.
    pub check: SerializeCheck,
    /// Produces the JSON form of an owned value.
    pub serialize_func: SerializeFn,
    /// Stable identifier, recorded in archive metadata.
    pub uid: String,
    /// Where the handler was defined.
    pub source: String,
    /// Higher runs first.
    pub priority: i32,
    /// Human-readable description, used in errors.
    pub desc: String,
}

impl SerializerHandler {
    /// Creates a handler with priority 0.
    pub fn new<C, F>(uid: impl Into<String>, check: C, serialize_func: F) -> Self
    where
        C: Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> bool + Send + Sync + 'static,
        F: Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> Result<JsonValue> + Send + Sync + 'static,
    {
        let uid = uid.into();
        Self {
            check: Arc::new(check),
            serialize_func: Arc::new(serialize_func),
            desc: uid.clone(),
            source: "user".into(),
            uid,
            priority: 0,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the description.
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Debug for SerializerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerHandler")
            .field("uid", &self.uid)
            .field("source", &self.source)
            .field("priority", &self.priority)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

/// One entry of the load chain.
#[derive(Clone)]
pub struct LoaderHandler {
    /// Decides whether this handler owns a node that no format tag matched.
    pub check: LoadCheck,
    /// Reconstructs an owned node.
    pub load: LoadFn,
    /// Stable identifier; registering a handler with an existing uid replaces it.
    pub uid: String,
    /// Where the handler was defined.
    pub source: String,
    /// Higher runs first.
    pub priority: i32,
    /// Human-readable description.
    pub desc: String,
    /// Format tags dispatched straight to this handler.
    pub format_tags: Vec<String>,
}

impl LoaderHandler {
    /// Creates a handler with priority 0 and no format tags.
    pub fn new<C, L>(uid: impl Into<String>, check: C, load: L) -> Self
    where
        C: Fn(&JsonValue, &ObjectPath, &JsonLoader<'_>) -> bool + Send + Sync + 'static,
        L: Fn(&JsonValue, &ObjectPath, &JsonLoader<'_>) -> Result<Loaded> + Send + Sync + 'static,
    {
        let uid = uid.into();
        Self {
            check: Arc::new(check),
            load: Arc::new(load),
            desc: uid.clone(),
            source: "user".into(),
            uid,
            priority: 0,
            format_tags: Vec::new(),
        }
    }

    /// Adds a format tag to the dispatch index.
    pub fn with_format_tag(mut self, tag: impl Into<String>) -> Self {
        self.format_tags.push(tag.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the description.
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Debug for LoaderHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderHandler")
            .field("uid", &self.uid)
            .field("priority", &self.priority)
            .field("format_tags", &self.format_tags)
            .finish_non_exhaustive()
    }
}

/// Inserts `handler` after every handler of greater or equal priority.
pub(crate) fn insert_by_priority<H>(chain: &mut Vec<H>, handler: H, priority: impl Fn(&H) -> i32) {
    let p = priority(&handler);
    let at = chain.iter().position(|h| priority(h) < p).unwrap_or(chain.len());
    chain.insert(at, handler);
}

const SOURCE: &str = "zanj::handlers";

fn builtin<C, F>(uid: &str, desc: &str, check: C, serialize_func: F) -> SerializerHandler
where
    C: Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> bool + Send + Sync + 'static,
    F: Fn(&JsonSerializer, &Subject<'_>, &ObjectPath) -> Result<JsonValue> + Send + Sync + 'static,
{
    SerializerHandler::new(uid, check, serialize_func)
        .with_desc(desc)
        .with_source(SOURCE)
}

/// The default serialize chain, in dispatch order.
pub fn default_serializer_handlers() -> Vec<SerializerHandler> {
    vec![
        builtin(
            "base types",
            "primitives: null, bool, integers, floats, strings",
            |_, s, _| s.kind.is_primitive(),
            |_, s, _| serialize_primitive(&s.kind),
        ),
        builtin(
            "dictionaries",
            "mappings: recurse on values, keys stringified",
            |_, s, _| matches!(s.kind, ValueKind::Map(_)),
            |ser, s, path| match &s.kind {
                ValueKind::Map(entries) => {
                    let mut out = JsonMap::new();
                    for (key, value) in entries {
                        out.insert(key.clone(), ser.json_serialize(*value, &path.child(key.as_str()))?);
                    }
                    Ok(JsonValue::Object(out))
                }
                _ => Err(view_mismatch("mapping")),
            },
        ),
        builtin(
            "(list, tuple) -> list",
            "sequences: recurse on elements",
            |_, s, _| matches!(s.kind, ValueKind::Seq(_)),
            |ser, s, path| match &s.kind {
                ValueKind::Seq(items) => serialize_items(ser, items, path),
                _ => Err(view_mismatch("sequence")),
            },
        ),
        builtin(
            ".serialize override",
            "values that serialize themselves",
            |_, s, _| matches!(s.kind, ValueKind::Delegate(_)),
            |_, s, _| match &s.kind {
                ValueKind::Delegate(d) => d.serialize_json(),
                _ => Err(view_mismatch("delegate")),
            },
        ),
        builtin(
            "namedtuple -> dict",
            "named tuples: mapping of field name to value",
            |_, s, _| matches!(s.kind, ValueKind::NamedTuple(_)),
            |ser, s, path| match &s.kind {
                ValueKind::NamedTuple(fields) => {
                    let mut out = JsonMap::new();
                    for (name, value) in fields {
                        out.insert((*name).to_owned(), ser.json_serialize(*value, &path.child(*name))?);
                    }
                    Ok(JsonValue::Object(out))
                }
                _ => Err(view_mismatch("named tuple")),
            },
        ),
        builtin(
            "SerializableDataclass",
            "typed records: fields, properties and format tag",
            |_, s, _| matches!(s.kind, ValueKind::Record(_)),
            |ser, s, path| match &s.kind {
                ValueKind::Record(record) => record.serialize_record(ser, path),
                _ => Err(view_mismatch("record")),
            },
        ),
        builtin(
            "path -> str",
            "filesystem paths: POSIX string",
            |_, s, _| matches!(s.kind, ValueKind::Path(_)),
            |_, s, _| match &s.kind {
                ValueKind::Path(p) => Ok(JsonValue::String(p.to_string_lossy().replace('\\', "/"))),
                _ => Err(view_mismatch("path")),
            },
        ),
        builtin(
            "obj -> str(obj)",
            "opaque type descriptors: stringified",
            |_, s, _| matches!(s.kind, ValueKind::Descriptor(_)),
            |_, s, _| match &s.kind {
                ValueKind::Descriptor(d) => Ok(JsonValue::String(d.clone())),
                _ => Err(view_mismatch("descriptor")),
            },
        ),
        builtin(
            "numpy.ndarray",
            "dense arrays: array codec in the configured mode",
            |_, s, _| matches!(s.kind, ValueKind::Array(_)),
            |ser, s, _| match &s.kind {
                ValueKind::Array(a) => serialize_array(a, ser.config().array_mode),
                _ => Err(view_mismatch("array")),
            },
        ),
        builtin(
            "pandas.DataFrame",
            "tables: row mappings with recorded columns",
            |_, s, _| matches!(s.kind, ValueKind::Table(_)),
            |_, s, _| match &s.kind {
                ValueKind::Table(t) => Ok(t.to_json()),
                _ => Err(view_mismatch("table")),
            },
        ),
        builtin(
            "(set, list, tuple, Iterable) -> list",
            "other iterables: list of elements",
            |_, s, _| matches!(s.kind, ValueKind::Iterable(_)),
            |ser, s, path| match &s.kind {
                ValueKind::Iterable(items) => serialize_items(ser, items, path),
                _ => Err(view_mismatch("iterable")),
            },
        ),
        builtin(
            "fallback",
            "anything else: opaque record, not loadable",
            |_, _, _| true,
            |_, s, _| Ok(serialize_opaque(s)),
        )
        .with_priority(i32::MIN),
    ]
}

fn view_mismatch(expected: &str) -> ZanjError {
    ZanjError::Policy(format!("handler for {expected} views received another view"))
}

fn serialize_primitive(kind: &ValueKind<'_>) -> Result<JsonValue> {
    Ok(match kind {
        ValueKind::Null => JsonValue::Null,
        ValueKind::Bool(b) => JsonValue::Bool(*b),
        ValueKind::Int(i) => JsonValue::from(*i),
        ValueKind::UInt(u) => JsonValue::from(*u),
        ValueKind::Float(x) => float_to_json(*x),
        ValueKind::Str(s) => JsonValue::String(s.to_string()),
        _ => return Err(view_mismatch("primitive")),
    })
}

pub(crate) fn serialize_items(
    ser: &JsonSerializer,
    items: &[&dyn crate::value::Serializable],
    path: &ObjectPath,
) -> Result<JsonValue> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| ser.json_serialize(*item, &path.child(i)))
        .collect::<Result<Vec<_>>>()
        .map(JsonValue::Array)
}

/// `{__format__: "<type>:opaque", type_name, module, repr}`.
fn serialize_opaque(subject: &Subject<'_>) -> JsonValue {
    let type_name = subject.type_name();
    let mut out = JsonMap::new();
    out.insert(FORMAT_KEY.into(), JsonValue::from(format!("{type_name}:opaque")));
    out.insert("type_name".into(), JsonValue::from(type_name));
    out.insert("module".into(), JsonValue::from(module_of(type_name)));
    out.insert("repr".into(), JsonValue::from(subject.value.repr()));
    // Source text is not available at runtime; the key is kept for a stable shape.
    out.insert("source".into(), JsonValue::Null);
    JsonValue::Object(out)
}

/// Module path of a fully qualified type name, ignoring generic arguments.
fn module_of(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit_once("::").map_or("", |(module, _)| module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_order() {
        let uids: Vec<String> = default_serializer_handlers().into_iter().map(|h| h.uid).collect();
        assert_eq!(uids.len(), 12);
        assert_eq!(uids.first().map(String::as_str), Some("base types"));
        assert_eq!(uids.last().map(String::as_str), Some("fallback"));
    }

    #[test]
    fn insertion_is_stable_within_a_priority() {
        let mut chain = vec![("a", 5), ("b", 0), ("c", i32::MIN)];
        insert_by_priority(&mut chain, ("d", 0), |h| h.1);
        insert_by_priority(&mut chain, ("e", 10), |h| h.1);
        let names: Vec<&str> = chain.iter().map(|h| h.0).collect();
        assert_eq!(names, ["e", "a", "b", "d", "c"]);
    }

    #[test]
    fn module_strips_generics() {
        assert_eq!(module_of("my_app::net::Socket<u8>"), "my_app::net");
        assert_eq!(module_of("Plain"), "");
    }
}
