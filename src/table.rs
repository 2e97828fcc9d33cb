//! A small column-named tabular frame made of row mappings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZanjError};
use crate::json::{FORMAT_KEY, JsonMap, JsonValue, format_tag};
use crate::path::ObjectPath;

/// Format tag of an inline table.
pub const TABLE_FORMAT: &str = "zanj.Table:records";

/// Type name used in external stubs for tables.
pub const TABLE_TYPE_NAME: &str = "zanj.Table";

/// Rows of JSON values under a fixed list of column names.
///
/// Columns keep their declared order. Rows may omit a column; the missing
/// cell reads as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<JsonMap>,
}

impl Table {
    /// An empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a table from row mappings. Columns are collected in first-seen order.
    pub fn from_records(rows: Vec<JsonMap>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Appends a row. Unknown keys become new trailing columns.
    pub fn push_row(&mut self, row: JsonMap) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[JsonMap] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no row.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` / `column`.
    pub fn get(&self, row: usize, column: &str) -> Option<&JsonValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Rows as mappings with every column present, in column order.
    pub fn to_records(&self) -> Vec<JsonMap> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(JsonValue::Null)))
                    .collect()
            })
            .collect()
    }

    /// Inline encoding: `{__format__, columns, n_rows, data}`.
    pub fn to_json(&self) -> JsonValue {
        let mut out = JsonMap::new();
        out.insert(FORMAT_KEY.into(), JsonValue::from(TABLE_FORMAT));
        out.insert("columns".into(), JsonValue::from(self.columns.clone()));
        out.insert("n_rows".into(), JsonValue::from(self.len()));
        out.insert(
            "data".into(),
            JsonValue::Array(self.to_records().into_iter().map(JsonValue::Object).collect()),
        );
        JsonValue::Object(out)
    }

    /// Decodes the inline encoding.
    pub fn from_json(node: &JsonValue, path: &ObjectPath) -> Result<Self> {
        let map = node
            .as_object()
            .filter(|m| format_tag(m) == Some(TABLE_FORMAT))
            .ok_or_else(|| ZanjError::schema(path, "not a table payload"))?;
        let columns = map
            .get("columns")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ZanjError::schema(path, "table payload has no `columns`"))?
            .iter()
            .map(|c| {
                c.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| ZanjError::schema(path, format!("column name `{c}` is not a string")))
            })
            .collect::<Result<Vec<_>>>()?;
        let rows = map
            .get("data")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ZanjError::schema(path, "table payload has no `data`"))?;
        let table = Self::from_rows(columns, rows, path)?;
        if let Some(n) = map.get("n_rows").and_then(JsonValue::as_u64)
            && n != table.len() as u64
        {
            return Err(ZanjError::schema(
                path,
                format!("n_rows is {n} but {} rows were decoded", table.len()),
            ));
        }
        Ok(table)
    }

    /// Builds a table from `columns` and row nodes, each of which must be a mapping.
    pub fn from_rows(columns: Vec<String>, rows: &[JsonValue], path: &ObjectPath) -> Result<Self> {
        let mut table = Self::new(columns);
        for (i, row) in rows.iter().enumerate() {
            match row {
                JsonValue::Object(map) => table.push_row(map.clone()),
                other => {
                    return Err(ZanjError::schema(
                        path.child(i),
                        format!("table row must be a mapping, found {other}"),
                    ));
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: JsonValue) -> JsonMap {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn columns_follow_first_seen_order() {
        let t = Table::from_records(vec![row(json!({"b": 1, "a": 2})), row(json!({"a": 3, "c": 4}))]);
        assert_eq!(t.columns(), &["b", "a", "c"]);
        assert_eq!(t.to_records()[0].get("c"), Some(&JsonValue::Null));
    }

    #[test]
    fn inline_round_trip() -> Result<()> {
        let t = Table::from_records(vec![row(json!({"x": 1, "y": "a"})), row(json!({"x": 2, "y": "b"}))]);
        let json = t.to_json();
        assert_eq!(json["__format__"], json!("zanj.Table:records"));
        assert_eq!(json["n_rows"], json!(2));
        assert_eq!(Table::from_json(&json, &ObjectPath::root())?, t);
        Ok(())
    }

    #[test]
    fn empty_table_keeps_columns() -> Result<()> {
        let t = Table::new(["id", "score"]);
        let back = Table::from_json(&t.to_json(), &ObjectPath::root())?;
        assert!(back.is_empty());
        assert_eq!(back.columns(), &["id", "score"]);
        Ok(())
    }

    #[test]
    fn non_mapping_rows_are_rejected() {
        let node = json!({"__format__": TABLE_FORMAT, "columns": ["a"], "data": [1]});
        assert!(Table::from_json(&node, &ObjectPath::root()).is_err());
    }
}
