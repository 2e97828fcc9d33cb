//! Compression of archive entries.
//!
//! Every entry of a `.zanj` file is compressed with the same method. The
//! archive records its choice in the metadata document, and readers accept
//! whatever method each zip entry declares.

use serde::{Deserialize, Serialize};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Deflate level used when none is configured.
pub const DEFAULT_DEFLATE_LEVEL: i64 = 6;

/// Compression applied to archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ArchiveCompression {
    /// Deflate, level 0-9.
    Deflated {
        /// Deflate level.
        level: i64,
    },
    /// No compression.
    Stored,
}

impl Default for ArchiveCompression {
    fn default() -> Self {
        Self::Deflated {
            level: DEFAULT_DEFLATE_LEVEL,
        }
    }
}

impl ArchiveCompression {
    /// Zip method of this setting.
    pub fn method(self) -> CompressionMethod {
        match self {
            Self::Deflated { .. } => CompressionMethod::Deflated,
            Self::Stored => CompressionMethod::Stored,
        }
    }

    /// Options for one zip entry. Zip64 is always enabled so that entry size
    /// never limits what can be stored.
    pub fn file_options(self) -> SimpleFileOptions {
        let level = match self {
            Self::Deflated { level } => Some(level.clamp(0, 9)),
            Self::Stored => None,
        };
        SimpleFileOptions::default()
            .compression_method(self.method())
            .compression_level(level)
            .large_file(true)
    }
}

/// Short lowercase name of a zip compression method, for reports.
pub fn method_name(method: CompressionMethod) -> String {
    match method {
        CompressionMethod::Stored => "stored".into(),
        CompressionMethod::Deflated => "deflated".into(),
        other => format!("{other:?}").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_deflate_six() {
        assert_eq!(ArchiveCompression::default(), ArchiveCompression::Deflated { level: 6 });
        assert_eq!(ArchiveCompression::default().method(), CompressionMethod::Deflated);
    }

    #[test]
    fn config_form_is_tagged() -> crate::error::Result<()> {
        let json = serde_json::to_value(ArchiveCompression::Stored)?;
        assert_eq!(json, serde_json::json!({"method": "stored"}));
        let back: ArchiveCompression = serde_json::from_value(serde_json::json!({"method": "deflated", "level": 3}))?;
        assert_eq!(back, ArchiveCompression::Deflated { level: 3 });
        Ok(())
    }
}
