use entrystore::{
    Backend, Error, InMemoryBackend, LocalDiskBackend, NdArray, OpenMode, PutOptions, Root,
    TypeTag, Value,
};

fn populate<B: Backend>(root: &Root<B>) {
    let run = root.at("runs/1").unwrap();
    run.attrs().set("operator", "lee").unwrap();
    run.child("trace")
        .unwrap()
        .write_dataset(&NdArray::from_vec(vec![1i32, 2, 3]))
        .unwrap();
    run.child("trace").unwrap().attrs().set("units", "mV").unwrap();
    run.child("notes").unwrap().write_binary(&b"calm"[..]).unwrap();
    root.at("runs/1/raw/chunk").unwrap().write_binary(&b"0101"[..]).unwrap();
    root.entry().attrs().set("project", "apollo").unwrap();
}

fn assert_run_copied<B: Backend>(root: &Root<B>, path: &str) {
    let run = root.at(path).unwrap();
    assert_eq!(run.type_tag().unwrap(), TypeTag::Group);
    assert_eq!(run.keys().unwrap(), vec!["trace", "notes", "raw"]);
    assert_eq!(run.attrs().get("operator").unwrap(), Value::from("lee"));
    assert_eq!(run.attrs().get("trace/dtype").unwrap(), Value::from("int32"));

    let trace = run.child("trace").unwrap();
    assert_eq!(trace.read_dataset().unwrap().to_vec::<i32>().unwrap(), vec![1, 2, 3]);
    assert_eq!(trace.attrs().get("units").unwrap(), Value::from("mV"));
    assert_eq!(
        run.at("raw/chunk").unwrap().read_binary().unwrap(),
        &b"0101"[..]
    );
}

#[test]
fn copy_between_backends() {
    let source = Root::new(InMemoryBackend::new());
    populate(&source);

    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDiskBackend::open(dir.path().join("copy"), OpenMode::Exclusive).unwrap();
    let target = Root::new(backend);
    let archive = target.at("archive").unwrap();
    archive
        .put_entry("first", &source.at("runs/1").unwrap(), PutOptions::default())
        .unwrap();

    assert_run_copied(&target, "archive/first");
    // The source is untouched.
    assert_run_copied(&source, "runs/1");
    assert!(target.with_backend(|backend| backend.check_integrity().unwrap().is_clean()));
}

#[test]
fn existing_target_needs_overwrite() {
    let root = Root::new(InMemoryBackend::new());
    populate(&root);
    root.at("other/trace").unwrap().write_binary(&b"x"[..]).unwrap();

    let other = root.at("other").unwrap();
    let trace = root.at("runs/1/trace").unwrap();
    assert!(matches!(
        other.put_entry("trace", &trace, PutOptions::default()),
        Err(Error::AlreadyExists { .. })
    ));

    other
        .put_entry(
            "trace",
            &trace,
            PutOptions {
                overwrite: true,
                delete_source: false,
            },
        )
        .unwrap();
    assert_eq!(other.child("trace").unwrap().type_tag().unwrap(), TypeTag::Dataset);
    assert_eq!(other.attrs().get("trace/shape").unwrap(), Value::from(vec![3usize]));
}

#[test]
fn move_deletes_and_invalidates_source() {
    let root = Root::new(InMemoryBackend::new());
    populate(&root);
    let source = root.at("runs/1").unwrap();
    let nested = root.at("runs/1/trace").unwrap();

    root.entry()
        .put_entry(
            "moved",
            &source,
            PutOptions {
                overwrite: false,
                delete_source: true,
            },
        )
        .unwrap();

    assert_run_copied(&root, "moved");
    assert!(!root.at("runs/1").unwrap().exists().unwrap());
    assert!(matches!(
        nested.read_dataset(),
        Err(Error::InvalidatedEntry { .. })
    ));
}

#[test]
fn copy_into_itself_is_refused() {
    let root = Root::new(InMemoryBackend::new());
    populate(&root);
    let run = root.at("runs/1").unwrap();
    assert!(matches!(
        run.put_entry("again", &run, PutOptions::default()),
        Err(Error::Path(_))
    ));
}

#[test]
fn update_from_merges_roots() {
    let source = Root::new(InMemoryBackend::new());
    populate(&source);

    let target_backend = InMemoryBackend::new();
    let stats = target_backend.stats();
    let target = Root::new(target_backend);
    target.at("runs/1/stale").unwrap().write_binary(&b"old"[..]).unwrap();
    target.at("keep").unwrap().write_binary(&b"mine"[..]).unwrap();
    target.entry().attrs().set("local", true).unwrap();
    stats.reset();

    target.update_from(&source).unwrap();

    // `runs` was replaced as a whole; `keep` was left alone.
    assert_run_copied(&target, "runs/1");
    assert!(!target.at("runs/1/stale").unwrap().exists().unwrap());
    assert_eq!(target.at("keep").unwrap().read_binary().unwrap(), &b"mine"[..]);

    let attrs = target.entry().attrs();
    assert_eq!(attrs.get("project").unwrap(), Value::from("apollo"));
    assert_eq!(attrs.get("local").unwrap(), Value::from(true));
    assert!(stats.payload_writes() >= 3);
}
