//! Loader dispatch: turning JSON trees back into values.
//!
//! Dispatch order for one node:
//!
//! 1. a mapping whose format tag is in the tag index goes to that handler;
//! 2. otherwise the first handler whose predicate accepts the node;
//! 3. otherwise a mapping with an unknown tag is left as raw JSON (record
//!    tags, unless `strict`) or handled per [`ErrorMode`];
//! 4. otherwise containers are rebuilt from their loaded children and leaves
//!    are returned unchanged.
//!
//! The registry is process-global. Readers take a snapshot (`Arc`) so that
//! handlers never run while the lock is held.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::array::{ARRAY_TYPE_NAME, ArrayMode, NdArray, is_array_payload, load_array_at};
use crate::equality::DeepEq;
use crate::error::{ErrorMode, Result, ZanjError};
use crate::handlers::{LoaderHandler, insert_by_priority};
use crate::json::{JsonValue, external_ref, format_tag, node_format_tag};
use crate::lazy::LazyZanj;
use crate::map::{TagMap, tag_map};
use crate::path::ObjectPath;
use crate::record::{SerializableRecord, is_record_tag};
use crate::table::{TABLE_FORMAT, Table};
use crate::value::{Serializable, ValueKind};

/// A dynamically loaded value.
#[derive(Debug)]
pub enum Loaded {
    /// A JSON leaf, or a node left untouched.
    Json(JsonValue),
    /// A list of loaded values.
    Seq(Vec<Loaded>),
    /// A mapping of loaded values, in document order.
    Map(IndexMap<String, Loaded>),
    /// A dense array.
    Array(NdArray),
    /// A tabular frame.
    Table(Table),
    /// A typed record reconstructed through its registered loader.
    Record(Box<dyn SerializableRecord>),
}

impl Loaded {
    /// The raw JSON, for [`Loaded::Json`].
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// The array, for [`Loaded::Array`].
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The table, for [`Loaded::Table`].
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The elements, for [`Loaded::Seq`].
    pub fn as_seq(&self) -> Option<&[Loaded]> {
        match self {
            Self::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, for [`Loaded::Map`].
    pub fn as_map(&self) -> Option<&IndexMap<String, Loaded>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The record, if this is a [`Loaded::Record`] of type `T`.
    pub fn downcast_record<T: SerializableRecord>(&self) -> Option<&T> {
        match self {
            Self::Record(r) => (**r).as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Takes the record out, if this is a [`Loaded::Record`] of type `T`.
    pub fn into_record<T: SerializableRecord>(self) -> Option<T> {
        match self {
            Self::Record(r) => r.into_any().downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }
}

impl Serializable for Loaded {
    fn describe(&self) -> ValueKind<'_> {
        match self {
            Self::Json(v) => ValueKind::Delegate(v),
            Self::Seq(items) => ValueKind::Seq(items.iter().map(|v| v as &dyn Serializable).collect()),
            Self::Map(entries) => ValueKind::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v as &dyn Serializable))
                    .collect(),
            ),
            Self::Array(a) => ValueKind::Array(a.view()),
            Self::Table(t) => ValueKind::Table(t),
            Self::Record(r) => ValueKind::Record(&**r),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Record(r) => (**r).type_name(),
            _ => std::any::type_name::<Self>(),
        }
    }

    fn repr(&self) -> String {
        match self {
            Self::Json(v) => v.to_string(),
            Self::Record(r) => (**r).repr(),
            Self::Array(a) => a.repr(),
            Self::Table(t) => t.repr(),
            Self::Seq(items) => format!("Loaded::Seq(len={})", items.len()),
            Self::Map(entries) => format!("Loaded::Map(len={})", entries.len()),
        }
    }
}

impl DeepEq for Loaded {
    fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Seq(a), Self::Seq(b)) => a.deep_eq(b),
            (Self::Map(a), Self::Map(b)) => a.deep_eq(b),
            (Self::Array(a), Self::Array(b)) => a.deep_eq(b),
            (Self::Table(a), Self::Table(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => (**a).dyn_eq(&**b),
            _ => false,
        }
    }
}

/// Ordered load handlers plus the format tag index.
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    handlers: Vec<LoaderHandler>,
    by_tag: TagMap<usize>,
}

impl LoaderRegistry {
    /// Registry holding the default handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
            by_tag: tag_map(),
        };
        for handler in default_loader_handlers() {
            registry.register(handler);
        }
        registry
    }

    /// Adds `handler`, replacing any handler with the same uid.
    pub fn register(&mut self, handler: LoaderHandler) {
        self.handlers.retain(|h| h.uid != handler.uid);
        insert_by_priority(&mut self.handlers, handler, |h| h.priority);
        self.reindex();
    }

    fn reindex(&mut self) {
        let mut by_tag = tag_map();
        for (i, handler) in self.handlers.iter().enumerate() {
            for tag in &handler.format_tags {
                by_tag.entry(tag.clone()).or_insert(i);
            }
        }
        self.by_tag = by_tag;
    }

    /// Handler indexed under `tag`.
    pub fn handler_for_tag(&self, tag: &str) -> Option<&LoaderHandler> {
        self.by_tag.get(tag).and_then(|&i| self.handlers.get(i))
    }

    /// Handlers in dispatch order.
    pub fn handlers(&self) -> &[LoaderHandler] {
        &self.handlers
    }

    /// Uids in dispatch order.
    pub fn uids(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.uid.clone()).collect()
    }
}

static REGISTRY: LazyLock<RwLock<Arc<LoaderRegistry>>> = LazyLock::new(|| {
    let mut registry = LoaderRegistry::with_defaults();
    for handler in crate::rt::linked_record_handlers() {
        registry.register(handler);
    }
    tracing::debug!(handlers = registry.handlers.len(), "loader registry initialized");
    RwLock::new(Arc::new(registry))
});

/// Current state of the global registry.
pub fn loader_registry() -> Arc<LoaderRegistry> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Adds a handler to the global registry, replacing any handler with the same uid.
pub fn register_loader_handler(handler: LoaderHandler) {
    tracing::debug!(uid = %handler.uid, tags = ?handler.format_tags, "registering load handler");
    let mut guard = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    let mut next = LoaderRegistry::clone(&guard);
    next.register(handler);
    *guard = Arc::new(next);
}

/// Uids of the global registry, in dispatch order.
pub fn loader_handler_uids() -> Vec<String> {
    loader_registry().uids()
}

fn default_loader_handlers() -> Vec<LoaderHandler> {
    let mut array = LoaderHandler::new(
        "numpy.ndarray",
        |node, _, _| node.as_object().is_some_and(is_array_payload),
        |node, path, _| load_array_at(node, None, path).map(Loaded::Array),
    )
    .with_desc("dense array payloads in any metadata mode")
    .with_source("zanj::loader");
    for mode in [
        ArrayMode::ArrayListMeta,
        ArrayMode::ArrayHexMeta,
        ArrayMode::ArrayB64Meta,
        ArrayMode::ZeroDim,
    ] {
        array = array.with_format_tag(format!("{ARRAY_TYPE_NAME}:{mode}"));
    }

    vec![
        array,
        LoaderHandler::new(
            "pandas.DataFrame",
            |node, _, _| node_format_tag(node) == Some(TABLE_FORMAT),
            |node, path, _| Table::from_json(node, path).map(Loaded::Table),
        )
        .with_format_tag(TABLE_FORMAT)
        .with_desc("inline tables")
        .with_source("zanj::loader"),
        LoaderHandler::new(
            "opaque",
            |node, _, _| node_format_tag(node).is_some_and(|t| t.ends_with(":opaque")),
            |node, _, _| Ok(Loaded::Json(node.clone())),
        )
        .with_desc("opaque fallback payloads, returned as written")
        .with_source("zanj::loader"),
    ]
}

/// Reconstructs values from JSON trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLoader<'a> {
    /// What happens when a node cannot be loaded. The substitute is the raw node.
    pub error_mode: ErrorMode,
    /// Treat record tags without a registered loader like any other unknown tag.
    pub strict: bool,
    /// Archive used to resolve reference stubs.
    pub archive: Option<&'a LazyZanj>,
}

impl<'a> JsonLoader<'a> {
    /// Loader with the given error mode.
    pub fn new(error_mode: ErrorMode) -> Self {
        Self {
            error_mode,
            ..Self::default()
        }
    }

    /// Sets strict mode.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolves reference stubs through `archive`.
    pub fn with_archive(mut self, archive: &'a LazyZanj) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Replaces a reference stub by the content of its archive entry; other
    /// nodes are returned as is.
    pub fn resolve<'n>(&self, node: &'n JsonValue, path: &ObjectPath) -> Result<Cow<'n, JsonValue>> {
        let Some(reference) = external_ref(node) else {
            return Ok(Cow::Borrowed(node));
        };
        match self.archive {
            Some(archive) => Ok(Cow::Owned(archive.load_external(reference)?.as_ref().clone())),
            None => Err(ZanjError::schema(
                path,
                format!("unresolved external reference `{reference}`"),
            )),
        }
    }

    /// The typed array behind a stub of a `.npy` entry, read without passing
    /// through JSON. `None` for any other node, or without an archive.
    pub fn resolve_array(&self, node: &JsonValue) -> Result<Option<Arc<NdArray>>> {
        match (self.archive, external_ref(node)) {
            (Some(archive), Some(reference)) if archive.is_array_entry(reference) => {
                archive.load_array(reference).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Loads `node` found at `path` through the registry.
    pub fn load_item(&self, node: &JsonValue, path: &ObjectPath) -> Result<Loaded> {
        let node = match self.resolve(node, path) {
            Ok(node) => node,
            Err(err) => return self.error_mode.handle(err, || Loaded::Json(node.clone())),
        };
        let registry = loader_registry();

        if let Some(tag) = node_format_tag(&node)
            && let Some(handler) = registry.handler_for_tag(tag)
        {
            tracing::trace!(%path, handler = %handler.uid, tag, "loading by tag");
            return self.run(handler, &node, path);
        }

        if let Some(handler) = registry.handlers().iter().find(|h| (h.check)(&node, path, self)) {
            tracing::trace!(%path, handler = %handler.uid, "loading by predicate");
            return self.run(handler, &node, path);
        }

        match node.as_ref() {
            JsonValue::Object(map) => {
                if let Some(tag) = format_tag(map) {
                    if is_record_tag(tag) && !self.strict {
                        tracing::trace!(%path, tag, "no loader for record tag, keeping raw mapping");
                        return Ok(Loaded::Json(JsonValue::Object(map.clone())));
                    }
                    let err = ZanjError::schema(path, format!("no loader registered for format tag `{tag}`"));
                    return self.error_mode.handle(err, || Loaded::Json(JsonValue::Object(map.clone())));
                }
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.load_item(v, &path.child(k.as_str()))?)))
                    .collect::<Result<IndexMap<_, _>>>()
                    .map(Loaded::Map)
            }
            JsonValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| self.load_item(v, &path.child(i)))
                .collect::<Result<Vec<_>>>()
                .map(Loaded::Seq),
            leaf => Ok(Loaded::Json(leaf.clone())),
        }
    }

    fn run(&self, handler: &LoaderHandler, node: &JsonValue, path: &ObjectPath) -> Result<Loaded> {
        match (handler.load)(node, path, self) {
            Ok(loaded) => Ok(loaded),
            Err(err) => self.error_mode.handle(err, || Loaded::Json(node.clone())),
        }
    }
}
