//! # ZANJ
//!
//! Handler-driven JSON serialization of object graphs, typed records that
//! round-trip through JSON, and zip archives that move bulk arrays and tables
//! out of the main document.
//!
//! ## Overview
//!
//! ZANJ is built from three layers:
//!
//! *   **A pluggable serializer.** [`JsonSerializer`] walks a value through an
//!     ordered chain of [`SerializerHandler`]s. Each handler has a predicate and
//!     an encoder; the first match wins. The default chain covers primitives,
//!     containers, records, dense arrays (four storage modes) and tables, and
//!     falls back to an opaque repr for anything else.
//! *   **Typed records.** `#[derive(SerializableDataclass)]` gives a struct a
//!     format tag, field metadata, serialization, loading, deep equality,
//!     structural diffs and field type checks.
//! *   **Archives.** [`Zanj::save`] writes a zip whose `__zanj__.json` holds the
//!     document. Arrays and long sequences above the configured thresholds
//!     are replaced by reference stubs and stored as `.npy` or `.jsonl` side
//!     entries. [`Zanj::read`] grafts them back; [`Zanj::read_lazy`] resolves
//!     them on first access.
//!
//! ## Architecture
//!
//! ### Values
//!
//! Every serializable type implements [`Serializable`], which exposes a
//! structural view ([`ValueKind`]) of the value. Handlers inspect that view
//! (and may downcast through [`AsAny`]) rather than reflecting on the type.
//!
//! ### Loading
//!
//! Two paths lead back from JSON. Static loading goes through [`Loadable`]:
//! the target type drives the reconstruction (`from_json::<T>`). Dynamic
//! loading goes through the global loader registry: [`load_item`] dispatches
//! on the `__format__` tag, then on handler predicates, and yields a
//! [`Loaded`] tree. Every derived record is in that registry from the start.
//!
//! ### File Format
//!
//! ```text
//! __zanj__.json        root document, with reference stubs
//! __zanj_meta__.json   configuration, handler uids, externals manifest
//! <path>.npy           externalized arrays
//! <path>.jsonl         externalized sequences and tables
//! ```
//!
//! ## Usage Patterns
//!
//! ### Records
//!
//! ```rust
//! use zanj::prelude::*;
//!
//! #[derive(Debug, Clone, SerializableDataclass)]
//! struct Run {
//!     name: String,
//!     losses: Vec<f64>,
//! }
//!
//! let run = Run { name: "a".into(), losses: vec![0.5, 0.25] };
//! let json = zanj::json_serialize(&run)?;
//! assert_eq!(json["__format__"], "Run(SerializableDataclass)");
//! let back: Run = zanj::from_json(&json)?;
//! assert_eq!(back, run);
//! # Ok::<(), zanj::ZanjError>(())
//! ```
//!
//! ### Archives
//!
//! ```rust,no_run
//! use zanj::Zanj;
//! use ndarray::ArrayD;
//!
//! let weights = ArrayD::<f32>::zeros(vec![64, 64]);
//! let zanj = Zanj::builder().external_array_threshold(1024).build();
//! let path = zanj.save(&weights, "model/weights")?;
//!
//! // Eager: everything is materialized.
//! let back: ArrayD<f32> = zanj.read(&path)?;
//!
//! // Lazy: entries are read when reached.
//! let lazy = zanj.read_lazy(&path)?;
//! let again: ArrayD<f32> = lazy.load()?;
//! assert_eq!(back, again);
//! # Ok::<(), zanj::ZanjError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` is the memory map in the
//!   `reader` module.
//! * **No Panics:** no `unwrap()` or `panic!()` in the library.
//! * **Comprehensive Errors:** every failure is a [`ZanjError`]; recoverable
//!   ones are routed through an [`ErrorMode`].

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// The derive emits `::zanj::` paths, which must also resolve inside this crate.
extern crate self as zanj;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod array;
pub mod compression;
pub mod equality;
pub mod error;
pub mod externals;
pub mod format;
pub mod handlers;
pub mod inspector;
pub mod json;
pub mod lazy;
pub mod load_impls;
pub mod loader;
pub mod path;
pub mod reader;
pub mod record;
pub mod serializer;
pub mod table;
pub mod types;
pub mod value;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod executor;
#[doc(hidden)]
pub mod io;
#[doc(hidden)]
pub mod map;

// Private modules
mod value_impls;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
#[doc(hidden)]
pub mod rt;

// --- RE-EXPORTS ---

pub use api::{Zanj, ZanjBuilder, ZanjConfig};
pub use array::{ArrayMode, ArrayRef, DType, NdArray};
pub use compression::ArchiveCompression;
pub use equality::DeepEq;
pub use error::{ErrorKind, ErrorMode, Result, ZanjError};
pub use handlers::{LoaderHandler, SerializerHandler};
pub use inspector::ZanjInspector;
pub use json::{FORMAT_KEY, JsonMap, JsonValue};
pub use lazy::{ExternalPromise, LazyZanj};
pub use load_impls::{Loadable, from_json};
pub use loader::{JsonLoader, Loaded, register_loader_handler};
pub use path::{ObjectPath, PathSegment};
pub use reader::ZanjReader;
pub use record::{FieldInfo, SerializableDataclass, SerializableRecord, register_record};
pub use serializer::{JsonSerializer, SerializerConfig};
pub use table::Table;
pub use types::TypeExpr;
pub use value::{AsAny, Serde, Serializable, ValueKind};

// Re-export the derive macro so it is accessible as `zanj::SerializableDataclass`
pub use zanj_derive::SerializableDataclass;

/// Serializes `value` with a default serializer.
///
/// ```rust
/// let json = zanj::json_serialize(&vec![(1u8, "a")])?;
/// assert_eq!(json, serde_json::json!([[1, "a"]]));
/// # Ok::<(), zanj::ZanjError>(())
/// ```
pub fn json_serialize(value: &dyn Serializable) -> Result<JsonValue> {
    JsonSerializer::default().json_serialize(value, &ObjectPath::root())
}

/// Loads `node` through the loader registry with a default loader.
pub fn load_item(node: &JsonValue) -> Result<Loaded> {
    JsonLoader::default().load_item(node, &ObjectPath::root())
}

/// The items most code needs.
pub mod prelude {
    pub use crate::{
        DeepEq, ErrorMode, JsonValue, Loadable, Serializable, SerializableDataclass,
        SerializableRecord, Zanj, ZanjError,
    };
}
