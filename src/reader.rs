//! The Read-Side Engine.
//!
//! Handles memory-mapping the file, validating the archive layout, and
//! turning external entries back into JSON nodes. Eager reads graft every
//! external into the tree up front; lazy reads hand the open archive to
//! [`LazyZanj`], which resolves entries on first access.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use memmap2::Mmap;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::api::ZanjConfig;
use crate::array::{ArrayMode, NdArray, read_npy, serialize_array};
use crate::compression::method_name;
use crate::error::{Result, ZanjError};
use crate::executor::{RawEntry, materialize_entries};
use crate::externals::{ExternalInfo, ExternalKind};
use crate::format::{ZANJ_MAIN, ZANJ_META, ZanjMeta};
use crate::json::{JsonValue, external_ref};
use crate::lazy::LazyZanj;
use crate::path::{ObjectPath, PathSegment};
use crate::table::Table;

/// Bytes backing an open archive.
#[derive(Debug)]
pub enum DataSource {
    /// A memory-mapped file.
    Mmap(Mmap),
    /// An in-memory buffer.
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for DataSource {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Mmap(m) => m,
            Self::Bytes(b) => b,
        }
    }
}

/// An open zip container over a [`DataSource`].
pub type Archive = ZipArchive<Cursor<DataSource>>;

/// Size and compression of one zip entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EntryStat {
    /// Entry name.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Stored size in bytes.
    pub compressed_size: u64,
    /// Compression method name.
    pub compression: String,
}

/// The main handle for reading a `.zanj` file.
/// It holds the open container, the metadata and the root document.
#[derive(Debug)]
pub struct ZanjReader {
    archive: Archive,
    meta: ZanjMeta,
    root: JsonValue,
}

impl ZanjReader {
    /// Opens an archive, memory-mapping the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // Safety: the map is read-only; concurrent truncation of the file by
        // another process is outside the supported usage.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        tracing::debug!(path = %path.as_ref().display(), bytes = mmap.len(), "opening archive");
        Self::from_source(DataSource::Mmap(mmap))
    }

    /// Opens an archive held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(DataSource::Bytes(bytes))
    }

    fn from_source(source: DataSource) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(source))?;
        let meta = ZanjMeta::from_slice(&read_entry(&mut archive, ZANJ_META)?)?;
        let root: JsonValue = serde_json::from_slice(&read_entry(&mut archive, ZANJ_MAIN)?)?;
        Ok(Self { archive, meta, root })
    }

    /// The metadata document.
    pub fn meta(&self) -> &ZanjMeta {
        &self.meta
    }

    /// The configuration the archive was written with.
    pub fn config(&self) -> &ZanjConfig {
        &self.meta.zanj_cfg.config
    }

    /// The root document, with reference stubs in place.
    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    /// Raw content of one entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        read_entry(&mut self.archive, name)
    }

    /// Names of all entries, in archive order.
    pub fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_owned).collect()
    }

    /// Size and compression of every entry, in archive order.
    pub fn entry_stats(&mut self) -> Result<Vec<EntryStat>> {
        (0..self.archive.len())
            .map(|i| {
                let file = self.archive.by_index(i)?;
                Ok(EntryStat {
                    name: file.name().to_owned(),
                    size: file.size(),
                    compressed_size: file.compressed_size(),
                    compression: method_name(file.compression()),
                })
            })
            .collect()
    }

    /// Materializes every external entry and grafts it at its recorded path.
    ///
    /// Fails with a schema error when an entry is missing, a recorded path does
    /// not lead to the matching stub, or a stub is left without an entry.
    pub fn into_tree(mut self) -> Result<JsonValue> {
        let raw = self
            .meta
            .externals_info
            .iter()
            .map(|(name, info)| {
                Ok(RawEntry {
                    name: name.clone(),
                    info: info.clone(),
                    bytes: read_entry(&mut self.archive, name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut root = self.root;
        for ((name, node), entry) in materialize_entries(&raw)?.into_iter().zip(&raw) {
            graft(&mut root, &entry.info.path, &name, node)?;
        }
        check_no_stubs(&root, &ObjectPath::root())?;
        tracing::debug!(externals = raw.len(), "archive tree materialized");
        Ok(root)
    }

    /// Hands the open archive to a lazy handle.
    pub fn into_lazy(self) -> LazyZanj {
        LazyZanj::new(self.archive, self.meta, self.root)
    }
}

pub(crate) fn read_entry(archive: &mut Archive, name: &str) -> Result<Vec<u8>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => {
            return Err(ZanjError::schema(name, "archive entry is missing"));
        }
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::with_capacity(usize::try_from(file.size()).unwrap_or_default());
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Decodes one external entry into the node that replaces its stub.
///
/// `.npy` entries become `array_b64_meta` payloads; `.jsonl` entries become a
/// list, or a table payload when the manifest records columns.
pub fn materialize(name: &str, info: &ExternalInfo, bytes: &[u8]) -> Result<JsonValue> {
    match info.kind {
        ExternalKind::Npy => serialize_array(&decode_npy(name, bytes)?.view(), ArrayMode::ArrayB64Meta),
        ExternalKind::Jsonl => {
            let rows = parse_jsonl(name, bytes)?;
            match &info.columns {
                Some(columns) => Ok(Table::from_rows(columns.clone(), &rows, &info.path)?.to_json()),
                None => Ok(JsonValue::Array(rows)),
            }
        }
    }
}

/// Decodes the `.npy` entry `name` into a typed array.
pub fn decode_npy(name: &str, bytes: &[u8]) -> Result<NdArray> {
    read_npy(bytes).map_err(|e| match e {
        ZanjError::Schema { message, .. } => ZanjError::schema(name, message),
        other => ZanjError::schema(name, other.to_string()),
    })
}

fn parse_jsonl(name: &str, bytes: &[u8]) -> Result<Vec<JsonValue>> {
    bytes
        .split(|&b| b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(i, line)| {
            serde_json::from_slice(line)
                .map_err(|e| ZanjError::schema(name, format!("line {}: {e}", i + 1)))
        })
        .collect()
}

/// Replaces the stub at `path` (which must reference `name`) with `node`.
fn graft(root: &mut JsonValue, path: &ObjectPath, name: &str, node: JsonValue) -> Result<()> {
    let mut target = root;
    for segment in path.segments() {
        let next = match (segment, target) {
            (PathSegment::Key(key), JsonValue::Object(map)) => map.get_mut(key),
            (PathSegment::Index(i), JsonValue::Array(items)) => items.get_mut(*i),
            _ => None,
        };
        target = next.ok_or_else(|| ZanjError::schema(path, format!("no node for external `{name}`")))?;
    }
    match external_ref(target) {
        Some(reference) if reference == name => {
            *target = node;
            Ok(())
        }
        Some(other) => Err(ZanjError::schema(
            path,
            format!("stub references `{other}`, manifest records `{name}`"),
        )),
        None => Err(ZanjError::schema(path, format!("expected a reference stub for `{name}`"))),
    }
}

fn check_no_stubs(node: &JsonValue, path: &ObjectPath) -> Result<()> {
    if let Some(reference) = external_ref(node) {
        return Err(ZanjError::schema(
            path,
            format!("reference `{reference}` has no entry in the manifest"),
        ));
    }
    match node {
        JsonValue::Object(map) => map
            .iter()
            .try_for_each(|(k, v)| check_no_stubs(v, &path.child(k.as_str()))),
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| check_no_stubs(v, &path.child(i))),
        _ => Ok(()),
    }
}
