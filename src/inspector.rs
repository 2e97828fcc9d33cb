// src/inspector.rs

//! Tools for inspecting the physical structure of ZANJ files.
//! useful for debugging externalization thresholds and verification.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::externals::{ExternalInfo, ExternalKind};
use crate::format::ZanjMeta;
use crate::json::{JsonValue, external_ref, node_format_tag};
use crate::reader::{EntryStat, ZanjReader};

/// Children shown per container before the rest is summarized.
const MAX_CHILDREN: usize = 16;

/// A structural report of a ZANJ file.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total size of the file on disk.
    pub file_size: u64,
    /// Version of the writer.
    pub version: String,
    /// Every zip entry, in archive order.
    pub entries: Vec<EntryReport>,
    /// The root document, with externals marked.
    pub tree: NodeInfo,
}

/// One zip entry.
#[derive(Debug, Serialize)]
pub struct EntryReport {
    /// Size and compression.
    #[serde(flatten)]
    pub stat: EntryStat,
    /// External kind, `None` for the two documents.
    pub kind: Option<ExternalKind>,
    /// Shape, length or columns from the manifest.
    pub detail: Option<String>,
}

/// One node of the root document.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// Key or index under the parent (`<root>` for the root).
    pub label: String,
    /// Inferred type (e.g., "object", "list", "ndarray.ArrayD:external").
    pub node_type_hint: String,
    /// Extra info (e.g., "-> arr.npy", "12 items").
    pub detail: Option<String>,
    /// Children shown.
    pub children: Vec<NodeInfo>,
    /// Children left out of the report.
    pub elided: usize,
}

/// The ZANJ Inspector tool.
#[derive(Debug)]
pub struct ZanjInspector;

impl ZanjInspector {
    /// Analyzes a file and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<DebugReport> {
        let file_size = std::fs::metadata(path.as_ref())?.len();
        let mut reader = ZanjReader::open(path)?;
        let meta = reader.meta().clone();

        let entries = reader
            .entry_stats()?
            .into_iter()
            .map(|stat| {
                let info = meta.externals_info.get(&stat.name);
                EntryReport {
                    kind: info.map(|i| i.kind),
                    detail: info.map(describe_external),
                    stat,
                }
            })
            .collect();

        Ok(DebugReport {
            file_size,
            version: meta.version.clone(),
            entries,
            tree: Self::inspect_node("<root>".into(), reader.root(), &meta),
        })
    }

    fn inspect_node(label: String, node: &JsonValue, meta: &ZanjMeta) -> NodeInfo {
        if let Some(reference) = external_ref(node) {
            let extra = meta
                .externals_info
                .get(reference)
                .map(|info| format!(" ({})", describe_external(info)))
                .unwrap_or_else(|| " (missing from manifest)".into());
            return NodeInfo {
                label,
                node_type_hint: node_format_tag(node).unwrap_or("external").to_owned(),
                detail: Some(format!("-> {reference}{extra}")),
                children: Vec::new(),
                elided: 0,
            };
        }

        match node {
            JsonValue::Object(map) => {
                let hint = node_format_tag(node).unwrap_or("object").to_owned();
                let children: Vec<_> = map
                    .iter()
                    .take(MAX_CHILDREN)
                    .map(|(k, v)| Self::inspect_node(k.clone(), v, meta))
                    .collect();
                NodeInfo {
                    label,
                    node_type_hint: hint,
                    detail: Some(format!("{} keys", map.len())),
                    elided: map.len() - children.len(),
                    children,
                }
            }
            JsonValue::Array(items) => {
                let children: Vec<_> = items
                    .iter()
                    .take(MAX_CHILDREN)
                    .enumerate()
                    .map(|(i, v)| Self::inspect_node(i.to_string(), v, meta))
                    .collect();
                NodeInfo {
                    label,
                    node_type_hint: "list".into(),
                    detail: Some(format!("{} items", items.len())),
                    elided: items.len() - children.len(),
                    children,
                }
            }
            leaf => NodeInfo {
                label,
                node_type_hint: leaf_hint(leaf).into(),
                detail: None,
                children: Vec::new(),
                elided: 0,
            },
        }
    }
}

fn leaf_hint(node: &JsonValue) -> &'static str {
    match node {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) | JsonValue::Object(_) => "container",
    }
}

fn describe_external(info: &ExternalInfo) -> String {
    match info.kind {
        ExternalKind::Npy => match (&info.shape, &info.dtype) {
            (Some(shape), Some(dtype)) => format!("shape {shape:?}, dtype {dtype}"),
            (Some(shape), None) => format!("shape {shape:?}"),
            _ => "array".into(),
        },
        ExternalKind::Jsonl => match &info.columns {
            Some(columns) => format!("{} rows x [{}]", info.len.unwrap_or(0), columns.join(", ")),
            None => format!("{} items", info.len.unwrap_or(0)),
        },
    }
}

impl std::fmt::Display for DebugReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== ZANJ INSPECTOR REPORT ===")?;
        writeln!(f, "File Size:      {}b", self.file_size)?;
        writeln!(f, "Version:        {}", self.version)?;
        writeln!(f, "\n[ENTRIES]")?;
        for entry in &self.entries {
            let kind = entry.kind.map(|k| k.extension()).unwrap_or("doc");
            let detail = entry
                .detail
                .as_deref()
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            writeln!(
                f,
                "{} ({}) Size: {}b | Stored: {}b | Algo: {}{}",
                entry.stat.name,
                kind,
                entry.stat.size,
                entry.stat.compressed_size,
                entry.stat.compression,
                detail
            )?;
        }
        writeln!(f, "\n[DOCUMENT LAYOUT]")?;
        self.tree.fmt_recursive(f, "", true)
    }
}

impl NodeInfo {
    fn fmt_recursive(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let detail = self
            .detail
            .as_deref()
            .map(|d| format!(" [{d}]"))
            .unwrap_or_default();

        writeln!(f, "{prefix}{connector}{}: {}{detail}", self.label, self.node_type_hint)?;

        let nested = format!("{prefix}{child_prefix}");
        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == self.children.len() - 1 && self.elided == 0;
            child.fmt_recursive(f, &nested, is_last_child)?;
        }
        if self.elided > 0 {
            writeln!(f, "{nested}└── ... {} more", self.elided)?;
        }
        Ok(())
    }
}
