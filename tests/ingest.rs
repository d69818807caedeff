mod common;

use std::{fs, sync::Arc, thread};

use common::{Engine, TestWorkspace, fixture_path, numbered_csv};
use csv_overlay::{
    config::EngineConfig,
    data::Scalar,
    error::EngineError,
    ingest::{Backfill, Ingestor, resolve_source},
    parser::DelimitedParser,
    schema::ColumnType,
    source::{DirFileStore, register_upload},
    store::{JsonDirStore, Table, TableRegistry, TableStore},
};

#[test]
fn fixture_schema_is_inferred_per_column() {
    let engine = Engine::new(EngineConfig::default());
    let contents = fs::read_to_string(fixture_path("people.csv")).expect("fixture");
    let handle = engine.ingest("people.csv", &contents);
    let table = handle.snapshot();

    let schema = table.schema();
    assert_eq!(
        schema.headers(),
        vec!["name", "age", "active", "joined", "city"]
    );
    assert_eq!(schema.column_type("age"), Some(ColumnType::Number));
    assert_eq!(schema.column_type("active"), Some(ColumnType::Boolean));
    assert_eq!(schema.column_type("joined"), Some(ColumnType::Date));
    assert_eq!(schema.column_type("city"), Some(ColumnType::String));

    let rows = table.full_rows().expect("full rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[1]["age"], Scalar::Null);
    assert_eq!(rows[2]["age"], Scalar::Float(41.5));
    assert_eq!(rows[2]["joined"], Scalar::Null);
    assert_eq!(rows[3]["city"], Scalar::Null);
    assert_eq!(rows[4]["joined"], Scalar::from("2022-06-15"));
}

#[test]
fn repeated_ingest_yields_one_table_with_identical_contents() {
    let engine = Engine::new(EngineConfig::default());
    let source = engine.upload(1, "numbers.csv", &numbered_csv(20));
    let first = engine.ingestor().ingest(1, &source).expect("first ingest");
    let second = engine.ingestor().ingest(1, &source).expect("second ingest");

    let (a, b) = (first.snapshot(), second.snapshot());
    assert_eq!(a.schema(), b.schema());
    assert_eq!(a.row_count(), b.row_count());
    assert_eq!(a.full_rows(), b.full_rows());
    assert_eq!(engine.registry.store().table_keys(1).unwrap().len(), 1);
}

#[test]
fn exactly_cap_rows_keeps_full_data_one_more_does_not() {
    let config = EngineConfig {
        full_data_cap: 50,
        sample_rows: 10,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let at_cap = engine.ingest("fifty.csv", &numbered_csv(50));
    assert_eq!(at_cap.read(|t| t.full_rows().map(<[_]>::len)), Some(50));

    let over = engine.ingest("fifty_one.csv", &numbered_csv(51));
    over.read(|t| {
        assert!(!t.has_full_data());
        assert_eq!(t.row_count(), 51);
        assert_eq!(t.sample_rows().len(), 10);
    });
}

#[test]
fn unsupported_and_malformed_sources_fail_ingest() {
    let engine = Engine::new(EngineConfig {
        allowed_extensions: vec![".csv".to_string(), ".json".to_string()],
        ..EngineConfig::default()
    });
    let json = engine.upload(1, "rows.json", "[]");
    assert!(matches!(
        engine.ingestor().ingest(1, &json),
        Err(EngineError::UnsupportedFormat(ext)) if ext == ".json"
    ));

    let empty = engine.upload(1, "empty.csv", "");
    assert!(matches!(
        engine.ingestor().ingest(1, &empty),
        Err(EngineError::Parse { .. })
    ));
}

#[test]
fn tables_persist_across_registries_and_backfill_after_cap_change() {
    let workspace = TestWorkspace::new();
    let root = workspace.store_dir();
    let files = DirFileStore::new(&root);

    let tight = EngineConfig {
        full_data_cap: 5,
        ..EngineConfig::default()
    };
    let source = register_upload(&tight, &files, 4, "numbers.csv", numbered_csv(8).as_bytes())
        .expect("register");
    let key = {
        let registry = TableRegistry::new(JsonDirStore::new(&root));
        registry.store().save_source(&source).expect("save source");
        let parser = DelimitedParser::new(&tight);
        let handle = Ingestor::new(&registry, &parser, &files, &tight)
            .ingest(4, &source)
            .expect("ingest");
        assert!(!handle.read(Table::has_full_data));
        handle.key()
    };

    let relaxed = EngineConfig::default();
    let registry = TableRegistry::new(JsonDirStore::new(&root));
    let parser = DelimitedParser::new(&relaxed);
    let ingestor = Ingestor::new(&registry, &parser, &files, &relaxed);
    let source = resolve_source(registry.store(), 4, None).expect("latest source");
    let handle = registry.open(&key).expect("open").expect("table exists");
    assert_eq!(ingestor.ensure_full_data(&handle, &source), Backfill::Filled);

    let reloaded = JsonDirStore::new(&root)
        .load_table(&key)
        .expect("load")
        .expect("present");
    let rows = reloaded.full_rows().expect("backfilled rows");
    assert_eq!(rows.len(), 8);
    assert_eq!(rows[7]["value"], Scalar::Integer(70));
}

#[test]
fn concurrent_ingest_of_one_source_creates_one_table() {
    let engine = Arc::new(Engine::new(EngineConfig::default()));
    let source = engine.upload(2, "numbers.csv", &numbered_csv(200));
    let workers = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let source = source.clone();
            thread::spawn(move || {
                engine
                    .ingestor()
                    .ingest(2, &source)
                    .expect("ingest")
                    .snapshot()
            })
        })
        .collect::<Vec<_>>();
    let tables = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker"))
        .collect::<Vec<_>>();

    assert!(tables.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(engine.registry.store().table_keys(2).unwrap().len(), 1);
}
