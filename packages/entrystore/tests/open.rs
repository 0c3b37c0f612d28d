use std::sync::Arc;

use entrystore::{
    Error, MemoryDriver, NdArray, OpenMode, Priority, Registry, StoreConfig, TypeTag,
};

#[test]
fn open_by_uri_through_default_registry() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("by-uri");
    let uri = format!("file://{}", location.display());

    let root = entrystore::open(&uri, "x".parse().unwrap()).unwrap();
    assert!(root.describe().starts_with("file:"));
    root.at("a/b")
        .unwrap()
        .write_dataset(&NdArray::from_vec(vec![1i32, 2, 3]))
        .unwrap();
    root.close().unwrap();

    let root = entrystore::open(&location.display().to_string(), OpenMode::Read).unwrap();
    assert_eq!(root.at("a/b").unwrap().type_tag().unwrap(), TypeTag::Dataset);
    drop(root);

    assert!(matches!(
        entrystore::open(&uri, OpenMode::Exclusive),
        Err(Error::AlreadyExists { .. })
    ));
    assert!(matches!(
        entrystore::open(&dir.path().join("missing").display().to_string(), OpenMode::Read),
        Err(Error::EntryNotFound { .. })
    ));
}

#[test]
fn modes_parse_from_text() {
    let modes: Vec<OpenMode> = ["r", "r+", "a", "w", "x"]
        .iter()
        .map(|text| text.parse().unwrap())
        .collect();
    assert_eq!(
        modes,
        vec![
            OpenMode::Read,
            OpenMode::ReadWrite,
            OpenMode::Append,
            OpenMode::Write,
            OpenMode::Exclusive
        ]
    );
    assert!(matches!(
        "rw".parse::<OpenMode>(),
        Err(Error::UnknownMode(_))
    ));
}

#[test]
fn memory_stores_follow_open_modes() {
    let memory = Arc::new(MemoryDriver::new());
    let mut registry = Registry::new();
    registry.register(memory.clone(), Priority::First).unwrap();

    assert!(matches!(
        registry.open("memory:lab", OpenMode::ReadWrite, None),
        Err(Error::EntryNotFound { .. })
    ));

    let root = registry.open("memory:lab", OpenMode::Append, None).unwrap();
    root.at("first").unwrap().write_binary(&b"1"[..]).unwrap();
    root.close().unwrap();

    let root = registry.open("memory:lab", OpenMode::ReadWrite, None).unwrap();
    assert_eq!(root.entry().keys().unwrap(), vec!["first"]);
    drop(root);

    let root = registry.open("memory:lab", OpenMode::Write, None).unwrap();
    assert!(root.entry().keys().unwrap().is_empty());
    drop(root);

    assert_eq!(memory.stats("lab").unwrap().payload_writes(), 0);
    assert!(memory.remove("lab"));
    assert!(memory.stats("lab").is_none());
}

#[test]
fn process_registry_holds_defaults() {
    entrystore::registry()
        .register(Arc::new(MemoryDriver::new()), Priority::First)
        .unwrap_err();
    let names = entrystore::registry().names();
    assert_eq!(names, vec!["memory", "file"]);

    let config: StoreConfig =
        serde_json::from_str(r#"{"type": "memory", "name": "open-config"}"#).unwrap();
    let root = config.open(OpenMode::Write).unwrap();
    root.at("x").unwrap().write_binary(&b"x"[..]).unwrap();
    root.close().unwrap();
    let root = entrystore::open("memory:open-config", OpenMode::Read).unwrap();
    assert_eq!(root.at("x").unwrap().read_binary().unwrap(), &b"x"[..]);
}
