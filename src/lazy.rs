//! Lazy access to `.zanj` archives.
//!
//! A [`LazyZanj`] keeps the archive open and leaves reference stubs in the
//! root document. Entries are materialized the first time something asks for
//! them (a loader resolving a stub, or an [`ExternalPromise`]) and cached for
//! the lifetime of the handle. `.npy` entries are cached as typed arrays, so
//! array loads skip the JSON form entirely. Dropping the handle (or
//! [`LazyZanj::close`]) releases the mapping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::ZanjConfig;
use crate::array::{ArrayMode, NdArray, serialize_array};
use crate::error::{ErrorMode, Result, ZanjError};
use crate::externals::{ExternalInfo, ExternalKind};
use crate::format::ZanjMeta;
use crate::json::{JsonValue, external_ref};
use crate::load_impls::Loadable;
use crate::loader::{JsonLoader, Loaded};
use crate::path::{ObjectPath, PathSegment};
use crate::reader::{Archive, decode_npy, materialize, read_entry};

/// An archive opened for on-demand access.
pub struct LazyZanj {
    meta: ZanjMeta,
    root: JsonValue,
    error_mode: ErrorMode,
    archive: Mutex<Archive>,
    cache: Mutex<HashMap<String, Arc<JsonValue>>>,
    arrays: Mutex<HashMap<String, Arc<NdArray>>>,
}

impl std::fmt::Debug for LazyZanj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyZanj")
            .field("externals", &self.meta.externals_info.len())
            .field("cached", &self.cached_count())
            .finish_non_exhaustive()
    }
}

impl LazyZanj {
    pub(crate) fn new(archive: Archive, meta: ZanjMeta, root: JsonValue) -> Self {
        Self {
            error_mode: meta.zanj_cfg.config.error_mode,
            meta,
            root,
            archive: Mutex::new(archive),
            cache: Mutex::new(HashMap::new()),
            arrays: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the error mode of [`LazyZanj::loader`], which defaults to the
    /// recorded one.
    pub fn with_error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    /// The metadata document.
    pub fn meta(&self) -> &ZanjMeta {
        &self.meta
    }

    /// The configuration the archive was written with.
    pub fn config(&self) -> &ZanjConfig {
        &self.meta.zanj_cfg.config
    }

    /// The root document, reference stubs included.
    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    /// A loader that resolves stubs through this archive.
    pub fn loader(&self) -> JsonLoader<'_> {
        JsonLoader::new(self.error_mode).with_archive(self)
    }

    /// Loads the root as `T`. Only the entries `T` actually reaches are read.
    pub fn load<T: Loadable>(&self) -> Result<T> {
        T::load_json(&self.root, &self.loader(), &ObjectPath::root())
    }

    /// Loads the root through the loader registry.
    pub fn load_item(&self) -> Result<Loaded> {
        self.loader().load_item(&self.root, &ObjectPath::root())
    }

    /// Content of the external entry `reference`, materialized on first access.
    pub fn load_external(&self, reference: &str) -> Result<Arc<JsonValue>> {
        if let Some(hit) = self.lock_cache().get(reference) {
            return Ok(Arc::clone(hit));
        }
        let info = self.info(reference)?;
        let node = match info.kind {
            ExternalKind::Npy => serialize_array(&self.load_array(reference)?.view(), ArrayMode::ArrayB64Meta)?,
            ExternalKind::Jsonl => {
                let bytes = self.read_bytes(reference)?;
                materialize(reference, info, &bytes)?
            }
        };
        // A concurrent load of the same entry may have won; keep the first.
        Ok(Arc::clone(
            self.lock_cache().entry(reference.to_owned()).or_insert(Arc::new(node)),
        ))
    }

    /// Typed content of the `.npy` entry `reference`, decoded on first access.
    pub fn load_array(&self, reference: &str) -> Result<Arc<NdArray>> {
        if let Some(hit) = self.lock_arrays().get(reference) {
            return Ok(Arc::clone(hit));
        }
        if self.info(reference)?.kind != ExternalKind::Npy {
            return Err(ZanjError::schema(reference, "entry is not an array"));
        }
        let bytes = self.read_bytes(reference)?;
        let array = Arc::new(decode_npy(reference, &bytes)?);
        Ok(Arc::clone(
            self.lock_arrays().entry(reference.to_owned()).or_insert(array),
        ))
    }

    /// True when `reference` names a `.npy` entry of the manifest.
    pub fn is_array_entry(&self, reference: &str) -> bool {
        self.info(reference).is_ok_and(|info| info.kind == ExternalKind::Npy)
    }

    /// True once `reference` has been materialized.
    pub fn is_loaded(&self, reference: &str) -> bool {
        let in_arrays = self.lock_arrays().contains_key(reference);
        in_arrays || self.lock_cache().contains_key(reference)
    }

    /// Number of materialized entries.
    pub fn cached_count(&self) -> usize {
        let arrays = self.lock_arrays();
        let nodes = self.lock_cache();
        arrays.len() + nodes.keys().filter(|k| !arrays.contains_key(*k)).count()
    }

    /// A promise for one external entry.
    pub fn promise(&self, reference: &str) -> Result<ExternalPromise<'_>> {
        let info = self.info(reference)?;
        Ok(ExternalPromise {
            archive: self,
            reference: reference.to_owned(),
            info,
        })
    }

    /// Promises for every external entry, in write order.
    pub fn promises(&self) -> Vec<ExternalPromise<'_>> {
        self.meta
            .externals_info
            .iter()
            .map(|(reference, info)| ExternalPromise {
                archive: self,
                reference: reference.clone(),
                info,
            })
            .collect()
    }

    /// Closes the archive. Equivalent to dropping the handle.
    pub fn close(self) {
        tracing::debug!(cached = self.cached_count(), "closing lazy archive");
    }

    fn info(&self, reference: &str) -> Result<&ExternalInfo> {
        self.meta
            .externals_info
            .get(reference)
            .ok_or_else(|| ZanjError::schema(reference, "reference is not in the externals manifest"))
    }

    fn read_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        let bytes = {
            let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
            read_entry(&mut archive, reference)?
        };
        tracing::debug!(reference, bytes = bytes.len(), "external entry loaded");
        Ok(bytes)
    }

    /// The node of the root document at `path`.
    fn node_at(&self, path: &ObjectPath) -> Option<&JsonValue> {
        path.segments().iter().try_fold(&self.root, |node, segment| match (segment, node) {
            (PathSegment::Key(key), JsonValue::Object(map)) => map.get(key),
            (PathSegment::Index(i), JsonValue::Array(items)) => items.get(*i),
            _ => None,
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<JsonValue>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_arrays(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<NdArray>>> {
        self.arrays.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A handle for an external entry that has not necessarily been read yet.
#[derive(Debug, Clone)]
pub struct ExternalPromise<'z> {
    archive: &'z LazyZanj,
    reference: String,
    info: &'z ExternalInfo,
}

impl<'z> ExternalPromise<'z> {
    /// Entry name inside the zip.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Manifest record of the entry.
    pub fn info(&self) -> &'z ExternalInfo {
        self.info
    }

    /// True once the entry has been materialized.
    pub fn is_loaded(&self) -> bool {
        self.archive.is_loaded(&self.reference)
    }

    /// The materialized JSON node (array payload, list or table payload).
    pub fn load(&self) -> Result<Arc<JsonValue>> {
        self.archive.load_external(&self.reference)
    }

    /// The entry loaded as `T`. Loading goes through the stub in the root
    /// document, so typed arrays come straight from the `.npy` entry.
    pub fn load_as<T: Loadable>(&self) -> Result<T> {
        let loader = self.archive.loader();
        match self.archive.node_at(&self.info.path) {
            Some(stub) if external_ref(stub) == Some(self.reference.as_str()) => {
                T::load_json(stub, &loader, &self.info.path)
            }
            _ => T::load_json(&*self.load()?, &loader, &self.info.path),
        }
    }
}
