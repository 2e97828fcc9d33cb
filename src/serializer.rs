//! The handler-driven JSON serializer.

use std::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};

use crate::array::ArrayMode;
use crate::error::{ErrorMode, Result, ZanjError};
use crate::externals::{ExternalItem, ExternalTable};
use crate::handlers::{SerializerHandler, default_serializer_handlers, insert_by_priority};
use crate::json::{FORMAT_KEY, JsonMap, JsonValue, WRITE_FORMAT_KEY};
use crate::path::ObjectPath;
use crate::value::{Serializable, Subject};

/// Serializer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Encoding of dense arrays.
    pub array_mode: ArrayMode,
    /// What happens when a handler fails.
    pub error_mode: ErrorMode,
    /// Emit `__write_format__` instead of `__format__`.
    pub write_only_format: bool,
}

/// Walks values through an ordered handler chain.
///
/// A serializer is single-threaded: the externals table used by the archive
/// writer lives in a `RefCell`. Use one instance per task.
pub struct JsonSerializer {
    config: SerializerConfig,
    handlers: Vec<SerializerHandler>,
    externals: RefCell<ExternalTable>,
    suppress_externals: Cell<usize>,
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self::new(SerializerConfig::default())
    }
}

impl std::fmt::Debug for JsonSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSerializer")
            .field("config", &self.config)
            .field("handlers", &self.handler_uids())
            .finish_non_exhaustive()
    }
}

impl JsonSerializer {
    /// Serializer with the default chain.
    pub fn new(config: SerializerConfig) -> Self {
        Self::with_handlers_pre(config, Vec::new())
    }

    /// Serializer whose chain is `handlers_pre` followed by the default chain.
    ///
    /// The combined chain is ordered by priority; within a priority the prefix
    /// handlers come first.
    pub fn with_handlers_pre(config: SerializerConfig, handlers_pre: Vec<SerializerHandler>) -> Self {
        let mut handlers = handlers_pre;
        handlers.extend(default_serializer_handlers());
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            config,
            handlers,
            externals: RefCell::new(ExternalTable::default()),
            suppress_externals: Cell::new(0),
        }
    }

    /// Settings.
    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// The chain, in dispatch order.
    pub fn handlers(&self) -> &[SerializerHandler] {
        &self.handlers
    }

    /// Uids of the chain, in dispatch order.
    pub fn handler_uids(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.uid.clone()).collect()
    }

    /// Adds a handler after every handler of greater or equal priority.
    pub fn register_handler(&mut self, handler: SerializerHandler) {
        insert_by_priority(&mut self.handlers, handler, |h| h.priority);
    }

    /// Serializes `value` found at `path`.
    ///
    /// Handler failures are wrapped in [`ZanjError::Handler`] and then go
    /// through the configured [`ErrorMode`], whose substitute is the repr
    /// string of the value. Errors that are already wrapped propagate as is.
    pub fn json_serialize(&self, value: &dyn Serializable, path: &ObjectPath) -> Result<JsonValue> {
        let subject = Subject::new(value);

        let Some(handler) = self.handlers.iter().find(|h| (h.check)(self, &subject, path)) else {
            let err = ZanjError::Handler {
                path: path.to_string(),
                handler: "<none>".into(),
                type_name: subject.type_name().into(),
                source: Box::new(ZanjError::schema(path, "no handler accepted the value")),
            };
            return self
                .config
                .error_mode
                .handle(err, || JsonValue::String(value.repr()));
        };

        tracing::trace!(%path, handler = %handler.uid, kind = subject.kind.name(), "serializing");

        match (handler.serialize_func)(self, &subject, path) {
            Ok(out) => Ok(self.finish(out)),
            Err(err @ ZanjError::Handler { .. }) => Err(err),
            Err(err) => {
                let err = ZanjError::Handler {
                    path: path.to_string(),
                    handler: handler.desc.clone(),
                    type_name: subject.type_name().into(),
                    source: Box::new(err),
                };
                self.config
                    .error_mode
                    .handle(err, || JsonValue::String(value.repr()))
            }
        }
    }

    fn finish(&self, out: JsonValue) -> JsonValue {
        if !self.config.write_only_format {
            return out;
        }
        match out {
            JsonValue::Object(map) if map.contains_key(FORMAT_KEY) => JsonValue::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if k == FORMAT_KEY {
                            (WRITE_FORMAT_KEY.to_owned(), v)
                        } else {
                            (k, v)
                        }
                    })
                    .collect::<JsonMap>(),
            ),
            other => other,
        }
    }

    /// Records an externalized value and returns its archive entry name.
    pub fn register_external(&self, item: ExternalItem) -> Result<String> {
        self.externals.borrow_mut().register(item)
    }

    /// Removes and returns every recorded external, in registration order.
    pub fn take_externals(&self) -> Vec<ExternalItem> {
        self.externals.borrow_mut().take()
    }

    /// Forgets every recorded external.
    pub fn clear_externals(&self) {
        self.externals.borrow_mut().clear();
    }

    /// Number of recorded externals.
    pub fn externals_len(&self) -> usize {
        self.externals.borrow().len()
    }

    /// True while the payload of an externalized value is being serialized.
    /// Values nested inside such a payload are written inline.
    pub fn externals_suppressed(&self) -> bool {
        self.suppress_externals.get() > 0
    }

    /// Runs `f` with externalization suppressed.
    pub fn without_externals<R>(&self, f: impl FnOnce() -> R) -> R {
        self.suppress_externals.set(self.suppress_externals.get() + 1);
        let out = f();
        self.suppress_externals.set(self.suppress_externals.get() - 1);
        out
    }
}
