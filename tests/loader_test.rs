#![allow(missing_docs)]

use serde_json::json;
use zanj::prelude::*;
use zanj::{JsonLoader, Loaded, LoaderHandler, ObjectPath, Table, load_item, register_loader_handler, register_record};

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

#[test]
fn test_records_dispatch_by_tag() -> zanj::Result<()> {
    register_record::<Basic>();
    let json = json!({"__format__": "Basic(SerializableDataclass)", "a": "x", "q": 1, "c": []});
    let loaded = load_item(&json)?;
    let record = loaded.downcast_record::<Basic>();
    assert_eq!(
        record,
        Some(&Basic {
            a: "x".into(),
            q: 1,
            c: vec![]
        })
    );
    Ok(())
}

#[test]
fn test_nested_records_come_back_typed() -> zanj::Result<()> {
    let value = Nested {
        name: "root".into(),
        child: Basic {
            a: "x".into(),
            q: 1,
            c: vec![],
        },
        val: 0.5,
    };
    register_record::<Nested>();
    let json = zanj::json_serialize(&value)?;

    // The child alone dispatches to its own registered loader.
    let child = load_item(&json["child"])?;
    assert_eq!(child.downcast_record::<Basic>(), Some(&value.child));

    let loaded = load_item(&json)?;
    assert_eq!(loaded.into_record::<Nested>(), Some(value));
    Ok(())
}

#[test]
fn test_arrays_and_tables_dispatch() -> zanj::Result<()> {
    let array = ndarray::ArrayD::<u8>::zeros(vec![2, 2]);
    let loaded = load_item(&zanj::json_serialize(&array)?)?;
    assert_eq!(loaded.as_array().map(|a| a.shape().to_vec()), Some(vec![2, 2]));

    let mut table = Table::new(["k", "v"]);
    let mut row = zanj::JsonMap::new();
    row.insert("k".into(), json!("a"));
    row.insert("v".into(), json!(1));
    table.push_row(row);
    let loaded = load_item(&zanj::json_serialize(&table)?)?;
    assert_eq!(loaded.as_table(), Some(&table));
    Ok(())
}

#[test]
fn test_plain_containers_recurse() -> zanj::Result<()> {
    let loaded = load_item(&json!({"xs": [1, {"y": null}], "s": "t"}))?;
    let map = loaded.as_map().map(|m| m.keys().cloned().collect::<Vec<_>>());
    assert_eq!(map, Some(vec!["xs".to_string(), "s".to_string()]));
    Ok(())
}

// --- UNKNOWN TAGS ---

fn unknown() -> JsonValue {
    json!({"__format__": "mystery.Widget", "x": 1})
}

#[test]
fn test_unknown_tag_raise() {
    let err = JsonLoader::new(ErrorMode::Raise)
        .load_item(&unknown(), &ObjectPath::root())
        .unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
    assert!(err.to_string().contains("mystery.Widget"), "{err}");
}

#[test]
fn test_unknown_tag_warn_and_ignore_keep_the_node() -> zanj::Result<()> {
    for mode in [ErrorMode::Warn, ErrorMode::Ignore] {
        let loaded = JsonLoader::new(mode).load_item(&unknown(), &ObjectPath::root())?;
        assert_eq!(loaded.as_json(), Some(&unknown()));
    }
    Ok(())
}

// --- CUSTOM HANDLERS ---

#[test]
fn test_registered_handler_takes_its_tag() -> zanj::Result<()> {
    register_loader_handler(
        LoaderHandler::new(
            "celsius",
            |_, _, _| false,
            |node, _, _| {
                let c = node["c"].as_f64().unwrap_or_default();
                Ok(Loaded::Json(json!(c * 9.0 / 5.0 + 32.0)))
            },
        )
        .with_format_tag("test.Celsius"),
    );
    let loaded = load_item(&json!({"__format__": "test.Celsius", "c": 100.0}))?;
    assert_eq!(loaded.as_json(), Some(&json!(212.0)));
    assert!(zanj::loader::loader_handler_uids().iter().any(|u| u == "celsius"));
    Ok(())
}

#[test]
fn test_predicate_handlers_catch_untagged_nodes() -> zanj::Result<()> {
    register_loader_handler(LoaderHandler::new(
        "legacy point",
        |node, _, _| {
            node.as_object()
                .is_some_and(|m| m.len() == 2 && m.contains_key("px") && m.contains_key("py"))
        },
        |node, _, _| Ok(Loaded::Json(json!([node["px"], node["py"]]))),
    ));
    let loaded = load_item(&json!({"px": 1, "py": 2}))?;
    assert_eq!(loaded.as_json(), Some(&json!([1, 2])));
    Ok(())
}
