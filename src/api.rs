//! The archive entry points: [`Zanj`], its configuration and builder.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::array::ArrayMode;
use crate::compression::ArchiveCompression;
use crate::error::{ErrorMode, Result, ZanjError};
use crate::executor::encode_externals;
use crate::externals::{ExternalThresholds, ExternalsGuard, external_handlers};
use crate::format::{ZANJ_EXTENSION, ZanjMeta};
use crate::handlers::SerializerHandler;
use crate::io::write_archive;
use crate::json::{JsonMap, JsonValue};
use crate::lazy::LazyZanj;
use crate::load_impls::Loadable;
use crate::loader::{JsonLoader, Loaded, loader_handler_uids};
use crate::path::ObjectPath;
use crate::reader::ZanjReader;
use crate::serializer::{JsonSerializer, SerializerConfig};
use crate::value::Serializable;

/// Default element count at which arrays move to `.npy` entries.
pub const DEFAULT_EXTERNAL_ARRAY_THRESHOLD: usize = 256;

/// Default length at which sequences and tables move to `.jsonl` entries.
pub const DEFAULT_EXTERNAL_LIST_THRESHOLD: usize = 256;

/// Archive settings. Recorded in the metadata document of every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZanjConfig {
    /// What happens when a handler or loader fails.
    pub error_mode: ErrorMode,
    /// Encoding of arrays kept inline in the root document.
    pub internal_array_mode: ArrayMode,
    /// Arrays with at least this many elements (and `ndim > 0`) are externalized.
    pub external_array_threshold: usize,
    /// Non-empty sequences and tables with at least this many items are externalized.
    pub external_list_threshold: usize,
    /// Compression of every zip entry.
    pub compression: ArchiveCompression,
    /// Write to a temporary sibling and rename on success.
    pub atomic_write: bool,
    /// Free-form settings carried into the metadata document.
    pub custom_settings: JsonMap,
}

impl Default for ZanjConfig {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::default(),
            internal_array_mode: ArrayMode::default(),
            external_array_threshold: DEFAULT_EXTERNAL_ARRAY_THRESHOLD,
            external_list_threshold: DEFAULT_EXTERNAL_LIST_THRESHOLD,
            compression: ArchiveCompression::default(),
            atomic_write: false,
            custom_settings: JsonMap::new(),
        }
    }
}

impl ZanjConfig {
    fn serializer_config(&self) -> Result<SerializerConfig> {
        if matches!(self.internal_array_mode, ArrayMode::External | ArrayMode::ZeroDim) {
            return Err(ZanjError::Policy(format!(
                "`{}` is not an inline array mode",
                self.internal_array_mode.as_str()
            )));
        }
        Ok(SerializerConfig {
            array_mode: self.internal_array_mode,
            error_mode: self.error_mode,
            write_only_format: false,
        })
    }
}

/// Saves and reads `.zanj` archives.
///
/// ```rust,no_run
/// use zanj::Zanj;
///
/// let zanj = Zanj::builder().external_list_threshold(1000).build();
/// let path = zanj.save(&vec![1u32, 2, 3], "out/numbers")?;
/// assert_eq!(path.extension().and_then(|e| e.to_str()), Some("zanj"));
/// let back: Vec<u32> = zanj.read(&path)?;
/// assert_eq!(back, vec![1, 2, 3]);
/// # Ok::<(), zanj::ZanjError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Zanj {
    config: ZanjConfig,
    /// Prefix handlers for writes, tried after the externalizing handlers.
    /// Not part of the recorded config; their uids land in the metadata.
    handlers_pre: Vec<SerializerHandler>,
}

impl Zanj {
    /// An archive handle with `config`.
    pub fn new(config: ZanjConfig) -> Self {
        Self {
            config,
            handlers_pre: Vec::new(),
        }
    }

    /// A builder starting from the default configuration.
    pub fn builder() -> ZanjBuilder {
        ZanjBuilder::default()
    }

    /// The configuration.
    pub fn config(&self) -> &ZanjConfig {
        &self.config
    }

    /// The prefix handlers used by [`Zanj::save`].
    pub fn handlers_pre(&self) -> &[SerializerHandler] {
        &self.handlers_pre
    }

    /// Writes `value` to an archive and returns the final path.
    ///
    /// `.zanj` is appended when `path` has another extension, and missing
    /// parent directories are created.
    pub fn save<T: Serializable>(&self, value: &T, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = archive_path(path.as_ref());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut chain = external_handlers(ExternalThresholds {
            array: self.config.external_array_threshold,
            list: self.config.external_list_threshold,
        });
        chain.extend(self.handlers_pre.iter().cloned());
        let ser = JsonSerializer::with_handlers_pre(self.config.serializer_config()?, chain);
        let guard = ExternalsGuard::new(&ser);
        let root = ser.json_serialize(value, &ObjectPath::root())?;
        let items = ser.take_externals();
        drop(guard);

        let entries = encode_externals(&items)?;
        let meta = ZanjMeta::new(
            self.config.clone(),
            ser.handler_uids(),
            loader_handler_uids(),
            &items,
        );
        let main = serde_json::to_vec(&root)?;
        let meta = serde_json::to_vec(&meta)?;

        write_archive(
            &path,
            self.config.compression,
            self.config.atomic_write,
            &main,
            &meta,
            &entries,
        )?;
        tracing::debug!(path = %path.display(), externals = entries.len(), "saved archive");
        Ok(path)
    }

    /// Reads an archive into `T`, materializing every external entry first.
    pub fn read<T: Loadable>(&self, path: impl AsRef<Path>) -> Result<T> {
        let tree = self.read_tree(path.as_ref())?;
        T::load_json(&tree, &self.loader(), &ObjectPath::root())
    }

    /// Reads an archive through the loader registry.
    pub fn read_item(&self, path: impl AsRef<Path>) -> Result<Loaded> {
        let tree = self.read_tree(path.as_ref())?;
        self.loader().load_item(&tree, &ObjectPath::root())
    }

    /// Opens an archive for on-demand access. External entries are read the
    /// first time they are needed.
    pub fn read_lazy(&self, path: impl AsRef<Path>) -> Result<LazyZanj> {
        Ok(ZanjReader::open(path)?.into_lazy().with_error_mode(self.config.error_mode))
    }

    fn read_tree(&self, path: &Path) -> Result<JsonValue> {
        let reader = ZanjReader::open(path)?;
        tracing::debug!(
            path = %path.display(),
            externals = reader.meta().externals_info.len(),
            "reading archive"
        );
        reader.into_tree()
    }

    fn loader(&self) -> JsonLoader<'static> {
        JsonLoader::new(self.config.error_mode)
    }
}

/// `path` with the archive extension.
pub fn archive_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == ZANJ_EXTENSION) {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(ZANJ_EXTENSION);
        PathBuf::from(name)
    }
}

/// Builder for [`Zanj`].
#[derive(Debug, Clone, Default)]
pub struct ZanjBuilder {
    config: ZanjConfig,
    handlers_pre: Vec<SerializerHandler>,
}

impl ZanjBuilder {
    /// Sets the error mode.
    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.config.error_mode = mode;
        self
    }

    /// Sets the encoding of inline arrays.
    pub fn internal_array_mode(mut self, mode: ArrayMode) -> Self {
        self.config.internal_array_mode = mode;
        self
    }

    /// Sets the array externalization threshold.
    pub fn external_array_threshold(mut self, threshold: usize) -> Self {
        self.config.external_array_threshold = threshold;
        self
    }

    /// Sets the sequence and table externalization threshold.
    pub fn external_list_threshold(mut self, threshold: usize) -> Self {
        self.config.external_list_threshold = threshold;
        self
    }

    /// Sets the entry compression.
    pub fn compression(mut self, compression: ArchiveCompression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Enables atomic writes.
    pub fn atomic_write(mut self, atomic: bool) -> Self {
        self.config.atomic_write = atomic;
        self
    }

    /// Adds a free-form setting.
    pub fn custom_setting(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.config.custom_settings.insert(key.into(), value.into());
        self
    }

    /// Appends prefix handlers for writes. They run ahead of the default
    /// chain but after the externalizing handlers.
    pub fn handlers_pre(mut self, handlers: impl IntoIterator<Item = SerializerHandler>) -> Self {
        self.handlers_pre.extend(handlers);
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Zanj {
        Zanj {
            config: self.config,
            handlers_pre: self.handlers_pre,
        }
    }
}
