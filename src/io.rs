//! Low-level I/O operations handling sequential writing.
//!
//! Entries are encoded in parallel beforehand; this module only streams the
//! finished buffers into the zip container, one entry after the other, and
//! optionally publishes the file atomically through a temporary sibling.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::compression::ArchiveCompression;
use crate::error::Result;
use crate::executor::EncodedEntry;
use crate::format::{ZANJ_MAIN, ZANJ_META};

/// Sequential writer of one zip container.
pub struct ArchiveWriter {
    zip: ZipWriter<BufWriter<File>>,
    options: SimpleFileOptions,
    entries: usize,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path, compression: ArchiveCompression) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            zip: ZipWriter::new(BufWriter::new(file)),
            options: compression.file_options(),
            entries: 0,
        })
    }

    /// Writes one complete entry.
    pub fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(bytes)?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Writes the central directory and syncs the file to disk.
    pub fn finish(self) -> Result<()> {
        let mut buffered = self.zip.finish()?;
        buffered.flush()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Temporary sibling used by atomic writes.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes a complete archive: main document, metadata document, then the
/// external entries in order.
///
/// With `atomic`, the archive is written to [`temp_path`] and renamed over
/// `path` once complete; on failure the temporary file is removed and `path`
/// is left untouched.
pub fn write_archive(
    path: &Path,
    compression: ArchiveCompression,
    atomic: bool,
    main: &[u8],
    meta: &[u8],
    externals: &[EncodedEntry],
) -> Result<()> {
    if !atomic {
        return write_entries(path, compression, main, meta, externals);
    }

    let tmp = temp_path(path);
    let result = write_entries(&tmp, compression, main, meta, externals).and_then(|()| {
        fs::rename(&tmp, path)?;
        Ok(())
    });
    if result.is_err() {
        // Cleanup errors are dropped; the write error is returned.
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_entries(
    path: &Path,
    compression: ArchiveCompression,
    main: &[u8],
    meta: &[u8],
    externals: &[EncodedEntry],
) -> Result<()> {
    let mut writer = ArchiveWriter::create(path, compression)?;
    writer.write_entry(ZANJ_MAIN, main)?;
    writer.write_entry(ZANJ_META, meta)?;
    for entry in externals {
        writer.write_entry(&entry.name, &entry.bytes)?;
    }
    tracing::debug!(path = %path.display(), entries = writer.entries(), "archive written");
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_a_sibling() {
        assert_eq!(temp_path(Path::new("/a/b/x.zanj")), PathBuf::from("/a/b/x.zanj.tmp"));
    }

    #[test]
    fn atomic_failure_leaves_no_temp_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // A directory in place of the target makes the final rename fail.
        let target = dir.path().join("out.zanj");
        fs::create_dir(&target)?;
        fs::write(target.join("keep"), b"x")?;
        let result = write_archive(&target, ArchiveCompression::Stored, true, b"{}", b"{}", &[]);
        assert!(result.is_err());
        assert!(!temp_path(&target).exists());
        Ok(())
    }
}
