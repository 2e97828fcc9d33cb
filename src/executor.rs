//! The Parallel Executor.
//!
//! Encoding external payloads (`.npy` dumps, JSON lines) and decoding them on
//! read are CPU bound and independent of each other, so both run on the rayon
//! pool. The zip itself is written and read sequentially by the caller.
//!
//! Workers share an abort flag: the first failure is captured, later tasks
//! return early, and the captured error is reported after the scope joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, ZanjError};
use crate::externals::{ExternalInfo, ExternalItem, ExternalPayload};
use crate::json::JsonValue;
use crate::reader::materialize;

/// An encoded archive entry, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    /// Entry name inside the zip.
    pub name: String,
    /// Entry content.
    pub bytes: Vec<u8>,
}

/// Context shared among all worker threads.
struct ExecutionContext<R> {
    slots: Mutex<Vec<Option<R>>>,
    abort_flag: AtomicBool,
    error_capture: Mutex<Option<ZanjError>>,
}

impl<R> ExecutionContext<R> {
    fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new((0..len).map(|_| None).collect()),
            abort_flag: AtomicBool::new(false),
            error_capture: Mutex::new(None),
        }
    }

    fn signal_error(&self, err: ZanjError) {
        let mut guard = self.error_capture.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(err);
            self.abort_flag.store(true, Ordering::SeqCst);
        }
    }

    fn should_abort(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    fn store(&self, index: usize, result: R) {
        let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = guard.get_mut(index) {
            *slot = Some(result);
        }
    }
}

/// Runs `task` on every input in parallel; results keep the input order.
fn run_parallel<T, R, F>(inputs: &[T], task: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let ctx = ExecutionContext::new(inputs.len());

    rayon::scope(|s| {
        let ctx_ref = &ctx;
        let task_ref = &task;
        for (index, input) in inputs.iter().enumerate() {
            s.spawn(move |_| {
                if ctx_ref.should_abort() {
                    return;
                }
                match task_ref(input) {
                    Ok(result) => ctx_ref.store(index, result),
                    Err(e) => ctx_ref.signal_error(e),
                }
            });
        }
    });

    if ctx.should_abort() {
        let mut guard = ctx.error_capture.lock().unwrap_or_else(PoisonError::into_inner);
        return Err(guard
            .take()
            .unwrap_or_else(|| ZanjError::Archive("unknown execution error".into())));
    }

    ctx.slots
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .map(|slot| slot.ok_or_else(|| ZanjError::Archive("parallel execution incomplete".into())))
        .collect()
}

// --- Write side ---

/// Encodes every external item, in registration order.
pub fn encode_externals(items: &[ExternalItem]) -> Result<Vec<EncodedEntry>> {
    tracing::debug!(count = items.len(), "encoding external entries");
    run_parallel(items, encode_item)
}

fn encode_item(item: &ExternalItem) -> Result<EncodedEntry> {
    let mut bytes = Vec::new();
    match &item.payload {
        ExternalPayload::Array(array) => array.view().write_npy(&mut bytes)?,
        ExternalPayload::Rows(rows) | ExternalPayload::Table { rows, .. } => write_jsonl(rows, &mut bytes)?,
    }
    Ok(EncodedEntry {
        name: item.entry_name(),
        bytes,
    })
}

/// One compact JSON document per line, each terminated by `\n`.
pub fn write_jsonl(rows: &[JsonValue], out: &mut Vec<u8>) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        out.push(b'\n');
    }
    Ok(())
}

// --- Read side ---

/// Raw bytes of one external entry with its manifest record.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Entry name inside the zip.
    pub name: String,
    /// Manifest record.
    pub info: ExternalInfo,
    /// Entry content.
    pub bytes: Vec<u8>,
}

/// Decodes every raw entry into the JSON node grafted in its place.
pub fn materialize_entries(entries: &[RawEntry]) -> Result<Vec<(String, JsonValue)>> {
    tracing::debug!(count = entries.len(), "materializing external entries");
    run_parallel(entries, |entry| {
        materialize(&entry.name, &entry.info, &entry.bytes).map(|node| (entry.name.clone(), node))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;
    use crate::path::ObjectPath;
    use serde_json::json;

    #[test]
    fn results_keep_input_order() -> Result<()> {
        let inputs: Vec<usize> = (0..64).collect();
        let out = run_parallel(&inputs, |&i| Ok(i * 2))?;
        assert_eq!(out, inputs.iter().map(|i| i * 2).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn first_error_is_reported() {
        let inputs: Vec<usize> = (0..8).collect();
        let err = run_parallel(&inputs, |&i| {
            if i == 3 {
                Err(ZanjError::Policy("boom".into()))
            } else {
                Ok(i)
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn encodes_rows_and_arrays() -> Result<()> {
        let items = vec![
            ExternalItem {
                path: ObjectPath::root().child("rows"),
                type_name: "Vec".into(),
                payload: ExternalPayload::Rows(vec![json!(1), json!({"a": "b"})]),
            },
            ExternalItem {
                path: ObjectPath::root().child("arr"),
                type_name: "ndarray.ArrayD".into(),
                payload: ExternalPayload::Array(NdArray::from_shape_vec(&[2], vec![1.0f64, 2.0])?),
            },
        ];
        let entries = encode_externals(&items)?;
        assert_eq!(entries[0].name, "rows.jsonl");
        assert_eq!(entries[0].bytes, b"1\n{\"a\":\"b\"}\n");
        assert_eq!(entries[1].name, "arr.npy");
        assert!(entries[1].bytes.starts_with(b"\x93NUMPY"));
        Ok(())
    }
}
