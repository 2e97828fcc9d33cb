#![allow(missing_docs)]

// Own binary: the loader registry is process-global and must start untouched.

use serde_json::json;
use zanj::Loaded;
use zanj::prelude::*;

#[derive(Debug, Clone, SerializableDataclass)]
struct Fresh {
    id: u32,
    name: String,
}

#[derive(Debug, Clone, SerializableDataclass)]
struct Holder {
    inner: Fresh,
}

#[test]
fn test_untouched_records_load_dynamically() -> zanj::Result<()> {
    let uids = zanj::loader::loader_handler_uids();
    assert!(uids.iter().any(|u| u == "sdc:Fresh(SerializableDataclass)"), "{uids:?}");
    assert!(uids.iter().any(|u| u == "sdc:Holder(SerializableDataclass)"), "{uids:?}");

    let node = json!({
        "__format__": "Holder(SerializableDataclass)",
        "inner": {"__format__": "Fresh(SerializableDataclass)", "id": 3, "name": "x"},
    });
    let item = zanj::load_item(&node)?;
    assert!(matches!(item, Loaded::Record(_)), "{item:?}");
    let holder = item.into_record::<Holder>();
    assert_eq!(holder.map(|h| h.inner.id), Some(3));
    Ok(())
}

#[test]
fn test_read_item_reconstructs_records_from_raw_archive() -> zanj::Result<()> {
    let dir = tempfile::tempdir()?;
    let zanj = Zanj::default();
    let raw = json!({"__format__": "Fresh(SerializableDataclass)", "id": 9, "name": "raw"});
    let path = zanj.save(&raw, dir.path().join("fresh"))?;

    let fresh = zanj.read_item(&path)?.into_record::<Fresh>();
    assert_eq!(fresh.map(|f| (f.id, f.name)), Some((9, "raw".to_owned())));
    Ok(())
}
