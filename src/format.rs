//! Defines the layout of `.zanj` archives.
//!
//! # Layout
//! A `.zanj` file is a zip container:
//!
//! ```text
//! __zanj__.json        root document, with reference stubs
//! __zanj_meta__.json   metadata document (ZanjMeta)
//! <path>.npy           one entry per externalized array
//! <path>.jsonl         one entry per externalized sequence or table
//! ```
//!
//! `<path>` is the object path of the value joined with `/`, or `__root__`
//! when the root value itself was externalized.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::api::ZanjConfig;
use crate::error::{Result, ZanjError};
use crate::externals::{ExternalInfo, ExternalItem};

/// Name of the root document entry.
pub const ZANJ_MAIN: &str = "__zanj__.json";

/// Name of the metadata document entry.
pub const ZANJ_META: &str = "__zanj_meta__.json";

/// Format tag of the metadata document.
pub const META_FORMAT: &str = "ZANJ_META";

/// File extension of archives.
pub const ZANJ_EXTENSION: &str = "zanj";

/// Version written into new archives.
pub const ZANJ_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Effective configuration recorded in the metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZanjCfgRecord {
    /// The archive configuration.
    #[serde(flatten)]
    pub config: ZanjConfig,
    /// Uids of the serialize chain used for the write, in dispatch order.
    pub serialization_handlers: Vec<String>,
    /// Uids of the loader registry at write time.
    pub load_handlers: Vec<String>,
}

/// Host description recorded in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysInfo {
    /// `std::env::consts::OS`.
    pub os: String,
    /// `std::env::consts::ARCH`.
    pub arch: String,
    /// `std::env::consts::FAMILY`.
    #[serde(default)]
    pub family: String,
}

impl SysInfo {
    /// Description of the running host.
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.into(),
            arch: std::env::consts::ARCH.into(),
            family: std::env::consts::FAMILY.into(),
        }
    }
}

/// The `__zanj_meta__.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZanjMeta {
    /// Always [`META_FORMAT`].
    #[serde(rename = "__format__")]
    pub format: String,
    /// Configuration and handler uids.
    pub zanj_cfg: ZanjCfgRecord,
    /// Manifest of external entries, keyed by entry name, in write order.
    pub externals_info: IndexMap<String, ExternalInfo>,
    /// Crate version of the writer.
    pub version: String,
    /// Seconds since the Unix epoch at write time.
    pub timestamp: f64,
    /// Host of the writer.
    pub sysinfo: SysInfo,
}

impl ZanjMeta {
    /// Metadata for a write of `externals` under `config`.
    pub fn new(
        config: ZanjConfig,
        serialization_handlers: Vec<String>,
        load_handlers: Vec<String>,
        externals: &[ExternalItem],
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            format: META_FORMAT.into(),
            zanj_cfg: ZanjCfgRecord {
                config,
                serialization_handlers,
                load_handlers,
            },
            externals_info: externals
                .iter()
                .map(|item| (item.entry_name(), item.info()))
                .collect(),
            version: ZANJ_VERSION.into(),
            timestamp,
            sysinfo: SysInfo::current(),
        }
    }

    /// Parses and checks a metadata document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let meta: Self = serde_json::from_slice(bytes)?;
        if meta.format != META_FORMAT {
            return Err(ZanjError::schema(
                ZANJ_META,
                format!("expected format `{META_FORMAT}`, found `{}`", meta.format),
            ));
        }
        Ok(meta)
    }
}

/// True for entry names the archive reserves for its own documents.
pub fn is_reserved_entry(name: &str) -> bool {
    name == ZANJ_MAIN || name == ZANJ_META
}
