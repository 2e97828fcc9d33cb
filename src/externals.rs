//! Externalization: moving bulk arrays, long sequences and tables out of the
//! root document into their own archive entries.
//!
//! The archive writer prepends the handlers built by [`external_handlers`] to
//! the serializer chain. Each one records an [`ExternalItem`] in the
//! serializer's table and leaves a reference stub in the tree:
//!
//! ```json
//! {"__format__": "ndarray.ArrayD:external", "$ref": "data/arr.npy", "shape": [128, 128], "dtype": "float64"}
//! ```

use serde::{Deserialize, Serialize};

use crate::array::{ARRAY_TYPE_NAME, DType, NdArray};
use crate::error::{Result, ZanjError};
use crate::handlers::SerializerHandler;
use crate::json::{FORMAT_KEY, JsonMap, JsonValue, REF_KEY};
use crate::path::ObjectPath;
use crate::serializer::JsonSerializer;
use crate::table::TABLE_TYPE_NAME;
use crate::value::ValueKind;

/// Entry name used for a value externalized at the root.
pub const ROOT_ENTRY_NAME: &str = "__root__";

/// Priority of the externalizing handlers; they must run before the defaults.
pub const EXTERNAL_HANDLER_PRIORITY: i32 = 1000;

/// Storage format of an external entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    /// A `.npy` dump of a dense array.
    Npy,
    /// One JSON document per line.
    Jsonl,
}

impl ExternalKind {
    /// File extension of the entry.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Npy => "npy",
            Self::Jsonl => "jsonl",
        }
    }
}

/// Content of an external entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalPayload {
    /// A dense array, written as `.npy`.
    Array(NdArray),
    /// Serialized sequence elements, one per line.
    Rows(Vec<JsonValue>),
    /// Table rows, one mapping per line, under the recorded columns.
    Table {
        /// Column names.
        columns: Vec<String>,
        /// Row mappings.
        rows: Vec<JsonValue>,
    },
}

impl ExternalPayload {
    /// Kind of entry this payload is written to.
    pub fn kind(&self) -> ExternalKind {
        match self {
            Self::Array(_) => ExternalKind::Npy,
            Self::Rows(_) | Self::Table { .. } => ExternalKind::Jsonl,
        }
    }
}

/// A value moved to its own archive entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalItem {
    /// Location of the value in the tree.
    pub path: ObjectPath,
    /// Type name recorded in the stub tag.
    pub type_name: String,
    /// The content.
    pub payload: ExternalPayload,
}

impl ExternalItem {
    /// Kind of entry.
    pub fn kind(&self) -> ExternalKind {
        self.payload.kind()
    }

    /// Archive entry name: the slash-joined path plus the extension.
    pub fn entry_name(&self) -> String {
        let stem = if self.path.is_empty() {
            ROOT_ENTRY_NAME.to_owned()
        } else {
            self.path.join()
        };
        format!("{stem}.{}", self.kind().extension())
    }

    /// The reference stub left in the tree.
    pub fn stub(&self) -> JsonValue {
        let mut out = JsonMap::new();
        out.insert(FORMAT_KEY.into(), JsonValue::from(format!("{}:external", self.type_name)));
        out.insert(REF_KEY.into(), JsonValue::from(self.entry_name()));
        match &self.payload {
            ExternalPayload::Array(a) => {
                out.insert("shape".into(), JsonValue::from(a.shape().to_vec()));
                out.insert("dtype".into(), JsonValue::from(a.dtype().as_str()));
                out.insert("n_elements".into(), JsonValue::from(a.len()));
            }
            ExternalPayload::Rows(rows) => {
                out.insert("len".into(), JsonValue::from(rows.len()));
            }
            ExternalPayload::Table { columns, rows } => {
                out.insert("columns".into(), JsonValue::from(columns.clone()));
                out.insert("n_rows".into(), JsonValue::from(rows.len()));
            }
        }
        JsonValue::Object(out)
    }

    /// Manifest record written to the metadata document.
    pub fn info(&self) -> ExternalInfo {
        let mut info = ExternalInfo {
            kind: self.kind(),
            path: self.path.clone(),
            shape: None,
            dtype: None,
            len: None,
            columns: None,
        };
        match &self.payload {
            ExternalPayload::Array(a) => {
                info.shape = Some(a.shape().to_vec());
                info.dtype = Some(a.dtype());
            }
            ExternalPayload::Rows(rows) => info.len = Some(rows.len()),
            ExternalPayload::Table { columns, rows } => {
                info.len = Some(rows.len());
                info.columns = Some(columns.clone());
            }
        }
        info
    }
}

/// Manifest record of one external entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInfo {
    /// Storage format.
    pub kind: ExternalKind,
    /// Location of the value in the tree.
    pub path: ObjectPath,
    /// Array shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Array dtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    /// Number of lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    /// Table columns; present exactly for tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Externals recorded during one save.
#[derive(Debug, Default)]
pub struct ExternalTable {
    items: Vec<ExternalItem>,
}

impl ExternalTable {
    /// Records `item`, returning its entry name.
    ///
    /// Paths must be unique and no path may be a segment-wise prefix of another.
    pub fn register(&mut self, item: ExternalItem) -> Result<String> {
        if let Some(clash) = self
            .items
            .iter()
            .find(|e| e.path.is_prefix_of(&item.path) || item.path.is_prefix_of(&e.path))
        {
            return Err(ZanjError::schema(
                &item.path,
                format!("external path clashes with already externalized `{}`", clash.path),
            ));
        }
        let name = item.entry_name();
        if self.items.iter().any(|e| e.entry_name() == name) {
            return Err(ZanjError::schema(&item.path, format!("duplicate external entry `{name}`")));
        }
        tracing::debug!(path = %item.path, entry = %name, "externalized value");
        self.items.push(item);
        Ok(name)
    }

    /// Drains the table.
    pub fn take(&mut self) -> Vec<ExternalItem> {
        std::mem::take(&mut self.items)
    }

    /// Empties the table.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no item is recorded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Clears a serializer's externals table on creation and again on drop, so no
/// entry survives a failed save.
pub struct ExternalsGuard<'s> {
    serializer: &'s JsonSerializer,
}

impl<'s> ExternalsGuard<'s> {
    /// Resets the table of `serializer`.
    pub fn new(serializer: &'s JsonSerializer) -> Self {
        serializer.clear_externals();
        Self { serializer }
    }
}

impl Drop for ExternalsGuard<'_> {
    fn drop(&mut self) {
        self.serializer.clear_externals();
    }
}

/// Thresholds of the externalizing handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalThresholds {
    /// Arrays with at least this many elements are externalized.
    pub array: usize,
    /// Sequences and tables with at least this many items are externalized.
    pub list: usize,
}

/// The externalizing handlers for an archive write.
pub fn external_handlers(thresholds: ExternalThresholds) -> Vec<SerializerHandler> {
    let ExternalThresholds { array, list } = thresholds;
    vec![
        SerializerHandler::new(
            "__zanj__external_array",
            move |ser, s, _| {
                !ser.externals_suppressed()
                    && matches!(&s.kind, ValueKind::Array(a) if a.ndim() > 0 && a.len() >= array)
            },
            |ser, s, path| match &s.kind {
                ValueKind::Array(a) => {
                    let item = ExternalItem {
                        path: path.clone(),
                        type_name: ARRAY_TYPE_NAME.into(),
                        payload: ExternalPayload::Array(a.to_owned_array()),
                    };
                    let stub = item.stub();
                    ser.register_external(item)?;
                    Ok(stub)
                }
                _ => Err(ZanjError::Policy("external array handler received another view".into())),
            },
        )
        .with_priority(EXTERNAL_HANDLER_PRIORITY)
        .with_desc("dense arrays at or above the array threshold -> .npy entry")
        .with_source("zanj::externals"),
        SerializerHandler::new(
            "__zanj__external_list",
            move |ser, s, _| {
                !ser.externals_suppressed()
                    && matches!(
                        &s.kind,
                        ValueKind::Seq(items) | ValueKind::Iterable(items)
                            if !items.is_empty() && items.len() >= list
                    )
            },
            |ser, s, path| match &s.kind {
                ValueKind::Seq(items) | ValueKind::Iterable(items) => {
                    let rows = ser.without_externals(|| {
                        items
                            .iter()
                            .enumerate()
                            .map(|(i, item)| ser.json_serialize(*item, &path.child(i)))
                            .collect::<Result<Vec<_>>>()
                    })?;
                    let item = ExternalItem {
                        path: path.clone(),
                        type_name: s.type_name().into(),
                        payload: ExternalPayload::Rows(rows),
                    };
                    let stub = item.stub();
                    ser.register_external(item)?;
                    Ok(stub)
                }
                _ => Err(ZanjError::Policy("external list handler received another view".into())),
            },
        )
        .with_priority(EXTERNAL_HANDLER_PRIORITY)
        .with_desc("sequences at or above the list threshold -> .jsonl entry")
        .with_source("zanj::externals"),
        SerializerHandler::new(
            "__zanj__external_table",
            move |ser, s, _| {
                !ser.externals_suppressed() && matches!(&s.kind, ValueKind::Table(t) if t.len() >= list)
            },
            |ser, s, path| match &s.kind {
                ValueKind::Table(t) => {
                    let item = ExternalItem {
                        path: path.clone(),
                        type_name: TABLE_TYPE_NAME.into(),
                        payload: ExternalPayload::Table {
                            columns: t.columns().to_vec(),
                            rows: t.to_records().into_iter().map(JsonValue::Object).collect(),
                        },
                    };
                    let stub = item.stub();
                    ser.register_external(item)?;
                    Ok(stub)
                }
                _ => Err(ZanjError::Policy("external table handler received another view".into())),
            },
        )
        .with_priority(EXTERNAL_HANDLER_PRIORITY)
        .with_desc("tables at or above the list threshold -> .jsonl entry")
        .with_source("zanj::externals"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(path: ObjectPath) -> ExternalItem {
        ExternalItem {
            path,
            type_name: "Vec".into(),
            payload: ExternalPayload::Rows(vec![JsonValue::from(1)]),
        }
    }

    #[test]
    fn root_items_use_reserved_name() {
        assert_eq!(rows(ObjectPath::root()).entry_name(), "__root__.jsonl");
        assert_eq!(rows(ObjectPath::root().child("a").child(2)).entry_name(), "a/2.jsonl");
    }

    #[test]
    fn prefix_paths_are_rejected() {
        let mut table = ExternalTable::default();
        let data = ObjectPath::root().child("data");
        assert!(table.register(rows(data.clone())).is_ok());
        assert!(table.register(rows(ObjectPath::root().child("database"))).is_ok());
        assert!(table.register(rows(data.child(0))).is_err());
        assert!(table.register(rows(data)).is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn guard_clears_on_drop() -> Result<()> {
        let ser = JsonSerializer::default();
        {
            let _guard = ExternalsGuard::new(&ser);
            ser.register_external(rows(ObjectPath::root().child("x")))?;
            assert_eq!(ser.externals_len(), 1);
        }
        assert_eq!(ser.externals_len(), 0);
        Ok(())
    }
}
