#![allow(missing_docs)]

use std::io::{Cursor, Write};

use ndarray::{ArrayD, IxDyn};
use serde_json::json;
use zanj::format::{ZANJ_MAIN, ZANJ_META, ZanjMeta};
use zanj::prelude::*;
use zanj::{ArchiveCompression, Table, ZanjConfig, ZanjReader};

#[derive(Debug, Clone, SerializableDataclass)]
struct Basic {
    a: String,
    q: i64,
    c: Vec<i64>,
}

#[derive(Debug, Clone, SerializableDataclass)]
struct Nested {
    name: String,
    child: Basic,
    val: f64,
}

#[derive(Debug, Clone, SerializableDataclass)]
struct WithArray {
    label: String,
    arr: ArrayD<f64>,
}

#[derive(Debug, Clone, SerializableDataclass)]
struct WithList {
    items: Vec<Basic>,
}

#[derive(Debug, Clone, SerializableDataclass)]
struct Mixed {
    weights: ArrayD<f32>,
    bias: ArrayD<f32>,
    history: Vec<u32>,
    frame: Table,
}

fn basic(i: i64) -> Basic {
    Basic {
        a: format!("item-{i}"),
        q: i,
        c: (0..i % 4).collect(),
    }
}

fn square(n: usize) -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(&[n, n]), |ix| (ix[0] * n + ix[1]) as f64 * 0.5)
}

fn filled(len: usize) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[len]), |ix| ix[0] as f32)
}

fn entries(path: &std::path::Path) -> zanj::Result<Vec<String>> {
    Ok(ZanjReader::open(path)?.entry_names())
}

// --- END-TO-END SCENARIOS ---

#[test]
fn test_basic_record_archive_round_trip() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = Basic {
        a: "hello".into(),
        q: 42,
        c: vec![1, 2, 3],
    };
    let zanj = Zanj::default();
    let path = zanj.save(&value, dir.path().join("basic.zanj"))?;

    assert_eq!(entries(&path)?, [ZANJ_MAIN, ZANJ_META]);
    let back: Basic = zanj.read(&path)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn test_nested_record_reloads_through_registry() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = Nested {
        name: "root".into(),
        child: Basic {
            a: "x".into(),
            q: 1,
            c: vec![],
        },
        val: 2.75,
    };
    let zanj = Zanj::default();
    let path = zanj.save(&value, dir.path().join("nested"))?;

    let typed: Nested = zanj.read(&path)?;
    assert_eq!(typed, value);
    let dynamic = zanj.read_item(&path)?;
    assert_eq!(dynamic.into_record::<Nested>(), Some(value));
    Ok(())
}

#[test]
fn test_large_array_moves_to_npy_entry() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = WithArray {
        label: "grid".into(),
        arr: square(128),
    };
    let zanj = Zanj::builder().external_array_threshold(64).build();
    let path = zanj.save(&value, dir.path().join("array"))?;

    assert_eq!(entries(&path)?, [ZANJ_MAIN, ZANJ_META, "arr.npy"]);
    let reader = ZanjReader::open(&path)?;
    let stub = &reader.root()["arr"];
    assert_eq!(stub["$ref"], "arr.npy");
    assert_eq!(stub["shape"], json!([128, 128]));
    assert_eq!(stub["dtype"], "float64");
    assert_eq!(stub["__format__"], "ndarray.ArrayD:external");

    let back: WithArray = zanj.read(&path)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn test_long_record_list_moves_to_jsonl_entry() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = WithList {
        items: (0..20).map(basic).collect(),
    };
    let zanj = Zanj::builder().external_list_threshold(10).build();
    let path = zanj.save(&value, dir.path().join("list"))?;

    assert_eq!(entries(&path)?, [ZANJ_MAIN, ZANJ_META, "items.jsonl"]);
    let mut reader = ZanjReader::open(&path)?;
    assert_eq!(reader.root()["items"]["len"], 20);
    let lines = reader.read_entry("items.jsonl")?;
    assert_eq!(lines.iter().filter(|&&b| b == b'\n').count(), 20);

    let back: WithList = zanj.read(&path)?;
    assert_eq!(back.items.len(), 20);
    assert_eq!(back, value);
    Ok(())
}

// --- THRESHOLDS AND PATHS ---

#[test]
fn test_array_threshold_is_inclusive() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().external_array_threshold(100).build();

    let below = zanj.save(&filled(99), dir.path().join("below"))?;
    assert_eq!(entries(&below)?.len(), 2);
    let at = zanj.save(&filled(100), dir.path().join("at"))?;
    assert_eq!(entries(&at)?, [ZANJ_MAIN, ZANJ_META, "__root__.npy"]);

    let back: ArrayD<f32> = zanj.read(&at)?;
    assert_eq!(back, filled(100));
    Ok(())
}

#[test]
fn test_zero_row_table_keeps_its_columns() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().external_list_threshold(0).build();
    let table = Table::new(["id", "score"]);
    let path = zanj.save(&table, dir.path().join("empty_table"))?;

    let mut reader = ZanjReader::open(&path)?;
    assert_eq!(reader.read_entry("__root__.jsonl")?, Vec::<u8>::new());
    assert_eq!(reader.root()["columns"], json!(["id", "score"]));

    let back: Table = zanj.read(&path)?;
    assert!(back.is_empty());
    assert_eq!(back.columns(), ["id", "score"]);
    Ok(())
}

#[test]
fn test_external_paths_are_unique_and_disjoint() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut frame = Table::new(["step"]);
    for step in 0..5 {
        let mut row = zanj::JsonMap::new();
        row.insert("step".into(), json!(step));
        frame.push_row(row);
    }
    let value = Mixed {
        weights: filled(32),
        bias: filled(8),
        history: (0..40).collect(),
        frame,
    };
    let zanj = Zanj::builder()
        .external_array_threshold(8)
        .external_list_threshold(5)
        .build();
    let path = zanj.save(&value, dir.path().join("mixed"))?;

    let reader = ZanjReader::open(&path)?;
    let infos: Vec<_> = reader.meta().externals_info.values().collect();
    assert_eq!(infos.len(), 4);
    for (i, a) in infos.iter().enumerate() {
        for b in &infos[i + 1..] {
            assert!(!a.path.is_prefix_of(&b.path) && !b.path.is_prefix_of(&a.path));
        }
    }
    assert_eq!(
        reader.meta().externals_info.keys().collect::<Vec<_>>(),
        ["weights.npy", "bias.npy", "history.jsonl", "frame.jsonl"]
    );

    let back: Mixed = zanj.read(&path)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn test_lists_inside_external_lists_stay_inline() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let value: Vec<Vec<u8>> = (0..6).map(|i| vec![i; 6]).collect();
    let zanj = Zanj::builder().external_list_threshold(3).build();
    let path = zanj.save(&value, dir.path().join("rows"))?;

    assert_eq!(entries(&path)?, [ZANJ_MAIN, ZANJ_META, "__root__.jsonl"]);
    let back: Vec<Vec<u8>> = zanj.read(&path)?;
    assert_eq!(back, value);
    Ok(())
}

// --- FILES AND METADATA ---

#[test]
fn test_extension_and_parent_directories() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = Zanj::default().save(&1u8, dir.path().join("deep").join("er").join("value.json"))?;
    assert_eq!(path, dir.path().join("deep").join("er").join("value.json.zanj"));
    assert!(path.is_file());
    Ok(())
}

#[test]
fn test_metadata_records_the_write() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder()
        .error_mode(ErrorMode::Warn)
        .external_array_threshold(4)
        .custom_setting("experiment", "e1")
        .build();
    let path = zanj.save(&filled(4), dir.path().join("meta"))?;

    let reader = ZanjReader::open(&path)?;
    assert_eq!(reader.config(), zanj.config());
    let meta = reader.meta();
    assert_eq!(meta.format, "ZANJ_META");
    assert!(meta.zanj_cfg.serialization_handlers.iter().any(|u| u == "__zanj__external_array"));
    assert!(!meta.zanj_cfg.load_handlers.is_empty());
    assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(meta.sysinfo.os, std::env::consts::OS);
    let info = &meta.externals_info["__root__.npy"];
    assert_eq!(info.shape.as_deref(), Some(&[4][..]));
    Ok(())
}

struct Kelvin(f64);

impl Serializable for Kelvin {
    fn describe(&self) -> zanj::ValueKind<'_> {
        zanj::ValueKind::Opaque
    }
}

fn kelvin_handler() -> zanj::SerializerHandler {
    zanj::SerializerHandler::new(
        "kelvin",
        |_, s, _| s.downcast::<Kelvin>().is_some(),
        |_, s, _| Ok(json!({"kelvin": s.downcast::<Kelvin>().map(|k| k.0)})),
    )
}

#[test]
fn test_prefix_handlers_shape_the_write() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder()
        .external_list_threshold(3)
        .handlers_pre([kelvin_handler()])
        .build();
    assert_eq!(zanj.handlers_pre().len(), 1);
    let temps = vec![Kelvin(1.5), Kelvin(300.0)];
    let path = zanj.save(&(temps, vec![1u32, 2, 3]), dir.path().join("kelvin"))?;

    let reader = ZanjReader::open(&path)?;
    let uids = &reader.meta().zanj_cfg.serialization_handlers;
    let at = |uid: &str| uids.iter().position(|u| u == uid);
    assert!(at("__zanj__external_list").is_some() && at("kelvin").is_some());
    assert!(at("__zanj__external_list") < at("kelvin"), "{uids:?}");
    assert_eq!(reader.meta().externals_info.keys().collect::<Vec<_>>(), ["1.jsonl"]);
    assert_eq!(reader.config(), zanj.config());

    let tree = reader.into_tree()?;
    assert_eq!(tree[0], json!([{"kelvin": 1.5}, {"kelvin": 300.0}]));
    assert_eq!(tree[1], json!([1, 2, 3]));
    Ok(())
}

#[test]
fn test_stored_compression() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().compression(ArchiveCompression::Stored).build();
    let path = zanj.save(&vec![0u64; 10], dir.path().join("stored"))?;
    let stats = ZanjReader::open(&path)?.entry_stats()?;
    assert!(stats.iter().all(|s| s.compression == "stored" && s.size == s.compressed_size));
    Ok(())
}

#[test]
fn test_atomic_write_leaves_no_temp_file() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().atomic_write(true).build();
    let first = zanj.save(&vec![1u8], dir.path().join("atomic"))?;
    let second = zanj.save(&vec![2u8], dir.path().join("atomic"))?;
    assert_eq!(first, second);
    assert!(!dir.path().join("atomic.zanj.tmp").exists());
    let back: Vec<u8> = zanj.read(&second)?;
    assert_eq!(back, vec![2]);
    Ok(())
}

// --- DAMAGED ARCHIVES ---

fn zip_of(files: &[(&str, Vec<u8>)]) -> zanj::Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn meta_bytes() -> zanj::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ZanjMeta::new(ZanjConfig::default(), vec![], vec![], &[]))?)
}

#[test]
fn test_missing_documents_are_schema_errors() -> zanj::Result<()> {
    let bytes = zip_of(&[(ZANJ_MAIN, b"{}".to_vec())])?;
    let err = ZanjReader::from_bytes(bytes).unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
    assert!(err.to_string().contains(ZANJ_META), "{err}");
    Ok(())
}

#[test]
fn test_dangling_reference_is_a_schema_error() -> zanj::Result<()> {
    let main = serde_json::to_vec(&json!({
        "arr": {"__format__": "ndarray.ArrayD:external", "$ref": "arr.npy", "shape": [3], "dtype": "int32"}
    }))?;
    let bytes = zip_of(&[(ZANJ_MAIN, main), (ZANJ_META, meta_bytes()?)])?;
    let err = ZanjReader::from_bytes(bytes)?.into_tree().unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
    Ok(())
}

#[test]
fn test_plain_zip_reads_without_externals() -> zanj::Result<()> {
    let bytes = zip_of(&[(ZANJ_MAIN, b"[1, 2]".to_vec()), (ZANJ_META, meta_bytes()?)])?;
    let tree = ZanjReader::from_bytes(bytes)?.into_tree()?;
    assert_eq!(tree, json!([1, 2]));
    Ok(())
}
