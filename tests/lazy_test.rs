#![allow(missing_docs)]

use std::path::PathBuf;

use ndarray::{ArrayD, IxDyn};
use zanj::externals::ExternalKind;
use zanj::prelude::*;

#[derive(Debug, Clone, SerializableDataclass)]
struct Experiment {
    name: String,
    weights: ArrayD<f64>,
    losses: Vec<f64>,
    seed: u64,
}

fn experiment() -> Experiment {
    Experiment {
        name: "run-7".into(),
        weights: ArrayD::from_shape_fn(IxDyn(&[16, 8]), |ix| (ix[0] + ix[1]) as f64),
        losses: (0..50).map(|i| 1.0 / f64::from(i + 1)).collect(),
        seed: 7,
    }
}

fn saved(dir: &tempfile::TempDir) -> zanj::Result<(Zanj, PathBuf)> {
    let zanj = Zanj::builder()
        .external_array_threshold(32)
        .external_list_threshold(10)
        .build();
    let path = zanj.save(&experiment(), dir.path().join("experiment"))?;
    Ok((zanj, path))
}

#[test]
fn test_open_reads_no_external_entries() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    assert_eq!(lazy.cached_count(), 0);
    assert_eq!(lazy.root()["name"], "run-7");
    assert_eq!(lazy.root()["weights"]["$ref"], "weights.npy");

    let promises = lazy.promises();
    let names: Vec<&str> = promises.iter().map(|p| p.reference()).collect();
    assert_eq!(names, ["weights.npy", "losses.jsonl"]);
    assert!(promises.iter().all(|p| !p.is_loaded()));
    assert_eq!(promises[0].info().kind, ExternalKind::Npy);
    assert_eq!(promises[1].info().len, Some(50));
    Ok(())
}

#[test]
fn test_promise_loads_one_entry() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let weights = lazy.promise("weights.npy")?;
    let array: ArrayD<f64> = weights.load_as()?;
    assert_eq!(array, experiment().weights);
    assert!(weights.is_loaded());
    assert!(!lazy.is_loaded("losses.jsonl"));
    assert_eq!(lazy.cached_count(), 1);
    Ok(())
}

#[test]
fn test_repeated_loads_share_the_cached_node() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let first = lazy.load_external("losses.jsonl")?;
    let second = lazy.load_external("losses.jsonl")?;
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.as_array().map(Vec::len), Some(50));
    Ok(())
}

#[test]
fn test_full_load_matches_eager_read() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let value: Experiment = lazy.load()?;
    assert_eq!(value, experiment());
    assert_eq!(lazy.cached_count(), 2);

    let eager: Experiment = zanj.read(&path)?;
    assert_eq!(eager, value);

    let item = lazy.load_item()?;
    assert_eq!(item.into_record::<Experiment>(), Some(value));
    lazy.close();
    Ok(())
}

#[test]
fn test_concurrent_loads_agree() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let results: Vec<zanj::Result<Vec<f64>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| lazy.promise("losses.jsonl")?.load_as::<Vec<f64>>()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(ZanjError::Policy("thread panicked".into()))))
            .collect()
    });
    for losses in results {
        assert_eq!(losses?, experiment().losses);
    }
    assert_eq!(lazy.cached_count(), 1);
    Ok(())
}

#[test]
fn test_unknown_reference_is_a_schema_error() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let err = lazy.load_external("nope.npy").unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
    assert!(lazy.promise("nope.npy").is_err());
    Ok(())
}

#[test]
fn test_recorded_error_mode_is_kept() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().error_mode(ErrorMode::Warn).build();
    let path = zanj.save(&vec![1u8, 2], dir.path().join("warn"))?;

    let lazy = zanj::ZanjReader::open(&path)?.into_lazy();
    assert_eq!(lazy.config().error_mode, ErrorMode::Warn);
    let back: Vec<u8> = lazy.load()?;
    assert_eq!(back, [1, 2]);
    Ok(())
}

#[test]
fn test_arrays_load_straight_from_npy() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let (zanj, path) = saved(&dir)?;
    let lazy = zanj.read_lazy(&path)?;

    let value: Experiment = lazy.load()?;
    let first = lazy.load_array("weights.npy")?;
    let second = lazy.load_array("weights.npy")?;
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(*first, zanj::NdArray::from(value.weights));

    let err = lazy.promise("weights.npy")?.load_as::<ArrayD<f32>>().unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
    assert!(lazy.load_array("losses.jsonl").is_err());

    // The JSON form is still available for untyped consumers.
    let node = lazy.load_external("weights.npy")?;
    assert_eq!(node["shape"], serde_json::json!([16, 8]));
    assert_eq!(lazy.cached_count(), 2);
    Ok(())
}

#[derive(Debug, Clone, SerializableDataclass)]
struct Placed {
    label: String,
    xyz: (i32, i32, i32),
}

#[test]
fn test_externalized_tuple_loads_lazily() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::builder().external_list_threshold(2).build();
    let value = Placed {
        label: "p".into(),
        xyz: (1, -2, 3),
    };
    let path = zanj.save(&value, dir.path().join("placed"))?;
    assert_eq!(lazy_refs(&zanj.read_lazy(&path)?), ["xyz.jsonl"]);

    let eager: Placed = zanj.read(&path)?;
    let lazy: Placed = zanj.read_lazy(&path)?.load()?;
    assert_eq!(eager, value);
    assert_eq!(lazy, value);
    Ok(())
}

fn lazy_refs(lazy: &zanj::LazyZanj) -> Vec<String> {
    lazy.promises().iter().map(|p| p.reference().to_owned()).collect()
}
