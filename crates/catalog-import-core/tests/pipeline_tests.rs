use std::fs;
use std::path::Path;
use tempfile::tempdir;

use catalog_import_core::batch::{self, load_manifest};
use catalog_import_core::extract::table_file;
use catalog_import_core::loader::{self, filtered_file};
use catalog_import_core::{
    AppConfig, ImportEngine, MemoryStore, ResumeOutcome, SilentReporter, SqlExecutor, Table,
};

/// Dump layout:
///   3 collections (1, 2, 3)
///   5 categories, `orphans` points at missing collection 99
///   5 subcollections, one under `orphans`
///   10 subcategories `sub-0`..`sub-9`, `sub-4` and `sub-9` under the orphaned subcollection
///   25000 products spread over the subcategories; every description quotes `'sub-0'`
fn write_dump(path: &Path) {
    let mut dump = String::from(
        "--\n-- PostgreSQL database dump\n--\n\
         CREATE EXTENSION IF NOT EXISTS pg_trgm WITH SCHEMA public;\n\
         COPY public.collections (id, slug, name) FROM stdin;\n\
         1\thome\tHome\n2\toffice\tOffice\n3\tgarden\tGarden\n\\.\n\n",
    );

    dump.push_str("COPY public.categories (id, slug, name, collection_id) FROM stdin;\n");
    for (id, collection) in [(10, 1), (11, 1), (12, 2), (13, 3)] {
        dump.push_str(&format!("{}\tcat-{}\tCategory {}\t{}\n", id, id, id, collection));
    }
    dump.push_str("14\torphans\tOrphans\t99\n\\.\n\n");

    dump.push_str("COPY public.subcollections (id, slug, name, category_slug) FROM stdin;\n");
    for (id, category) in [(100, "cat-10"), (101, "cat-11"), (102, "cat-12"), (103, "cat-13"), (104, "orphans")] {
        dump.push_str(&format!("{}\tsc-{}\tSubcollection {}\t{}\n", id, id, id, category));
    }
    dump.push_str("\\.\n\n");

    dump.push_str("COPY public.subcategories (id, slug, name, subcollection_id) FROM stdin;\n");
    for i in 0..10 {
        dump.push_str(&format!("{}\tsub-{}\tSub {}\t{}\n", 1000 + i, i, i, 100 + i % 5));
    }
    dump.push_str("\\.\n\n");

    dump.push_str(
        "COPY public.products (slug, name, description, price, image_url, subcategory_slug) FROM stdin;\n",
    );
    for i in 0..25_000 {
        dump.push_str(&format!(
            "p-{:05}\tProduct {}\tFits 'sub-0' kits\t{}.99\t\\N\tsub-{}\n",
            i,
            i,
            i % 100,
            i % 10
        ));
    }
    dump.push_str("\\.\n");

    fs::write(path, dump).unwrap();
}

fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        input_file: root.join("data.sql"),
        ordered_dir: root.join("ordered-import"),
        resume_dir: root.join("resume-import"),
        demo_dir: root.join("demo-import"),
        backup_dir: root.join("backup"),
        migration_file: root.join("migration.sql"),
        ..AppConfig::default()
    }
    .without_delays()
}

#[test]
fn test_full_pipeline_drops_orphans_at_every_level() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let mut store = MemoryStore::new();
    let engine = ImportEngine::new(config.clone());
    let result = engine
        .ordered_import(&mut store, &SilentReporter, true)
        .unwrap();

    assert_eq!(result.extract.rows_for(Table::Products), 25_000);
    assert_eq!(result.extract.rows_for(Table::Categories), 5);

    let counts = match result.outcome {
        Some(ResumeOutcome::Completed { counts, .. }) => counts,
        other => panic!("expected a completed import, got {:?}", other),
    };
    assert_eq!(counts.get(Table::Collections), 3);
    assert_eq!(counts.get(Table::Categories), 4);
    assert_eq!(counts.get(Table::Subcollections), 4);
    assert_eq!(counts.get(Table::Subcategories), 8);
    assert_eq!(counts.get(Table::Products), 20_000);

    // The quoted 'sub-0' in every description must not rescue orphaned products.
    assert_eq!(result.products.kept, 20_000);
    assert_eq!(result.products.skipped, 5_000);

    let manifest = load_manifest(&config.resume_dir).unwrap().unwrap();
    assert_eq!(manifest.total_products, 20_000);
    assert_eq!(manifest.total_batches, 20);
    assert!(batch::batch_file(&config.resume_dir, 19).exists());
    assert!(!batch::batch_file(&config.resume_dir, 20).exists());
}

#[test]
fn test_filtered_files_written_per_child_table() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let mut store = MemoryStore::new();
    ImportEngine::new(config.clone())
        .ordered_import(&mut store, &SilentReporter, false)
        .unwrap();

    for table in [Table::Categories, Table::Subcollections, Table::Subcategories, Table::Products] {
        assert!(filtered_file(&config.ordered_dir, table).exists(), "{} not filtered", table);
    }
    assert!(!filtered_file(&config.ordered_dir, Table::Collections).exists());

    let categories = fs::read_to_string(filtered_file(&config.ordered_dir, Table::Categories)).unwrap();
    assert!(!categories.contains("'orphans'"));
    assert_eq!(store.count_rows(Table::Products).unwrap(), 0);
}

#[test]
fn test_reloading_parents_is_idempotent() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let mut store = MemoryStore::new();
    ImportEngine::new(config.clone())
        .ordered_import(&mut store, &SilentReporter, false)
        .unwrap();
    let before = store.table_counts().unwrap();

    let stats = loader::load_parent_tables(&mut store, &config.ordered_dir, &SilentReporter).unwrap();
    assert_eq!(stats.len(), 4);
    assert_eq!(store.table_counts().unwrap(), before);
}

#[test]
fn test_ordered_import_resets_previous_batch_state() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    fs::create_dir_all(&config.resume_dir).unwrap();
    fs::write(batch::batch_file(&config.resume_dir, 0), "-- stale\n").unwrap();
    fs::write(
        config.resume_dir.join("checkpoint.json"),
        r#"{"lastCompletedBatch":40,"timestamp":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let mut store = MemoryStore::new();
    let result = ImportEngine::new(config.clone())
        .ordered_import(&mut store, &SilentReporter, true)
        .unwrap();

    match result.outcome {
        Some(ResumeOutcome::Completed { plan, .. }) => assert_eq!(plan.start, 0),
        other => panic!("expected a completed import, got {:?}", other),
    }
    assert_eq!(store.count_rows(Table::Products).unwrap(), 20_000);
}

#[test]
fn test_missing_dump_is_reported() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());

    let mut store = MemoryStore::new();
    let err = ImportEngine::new(config)
        .ordered_import(&mut store, &SilentReporter, true)
        .unwrap_err();
    assert!(matches!(err, catalog_import_core::Error::NotFound(_)));
}

#[test]
fn test_extract_only_writes_every_table_file() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let stats = ImportEngine::new(config.clone()).extract(&SilentReporter).unwrap();
    assert_eq!(stats.total_rows(), 3 + 5 + 5 + 10 + 25_000);

    let products = fs::read_to_string(table_file(&config.ordered_dir, Table::Products)).unwrap();
    let first = products.lines().find(|l| l.starts_with("INSERT")).unwrap();
    assert_eq!(
        first,
        "INSERT INTO products (slug, name, description, price, image_url, subcategory_slug) \
         VALUES ('p-00000', 'Product 0', 'Fits ''sub-0'' kits', 0.99, NULL, 'sub-0') ON CONFLICT DO NOTHING;"
    );
}

#[test]
fn test_demo_import_uses_existing_subcategories() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let mut store = MemoryStore::new();
    let engine = ImportEngine::new(config.clone());
    engine.ordered_import(&mut store, &SilentReporter, false).unwrap();

    let counts = engine.demo_import(&mut store, Some(250)).unwrap();
    assert_eq!(counts.get(Table::Products), 250);
    assert!(config.demo_dir.join("demo_products.sql").exists());

    let valid = store.fetch_keys(Table::Subcategories, "slug").unwrap();
    for product in store.rows(Table::Products) {
        let sub = product.value("subcategory_slug").and_then(|v| v.as_key()).unwrap();
        assert!(valid.contains(sub));
    }
}

#[test]
fn test_demo_import_without_subcategories_fails() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    let mut store = MemoryStore::new();
    assert!(ImportEngine::new(config).demo_import(&mut store, Some(10)).is_err());
}

#[test]
fn test_restore_and_migrate_require_files() {
    let tmp = tempdir().unwrap();
    let config = test_config(tmp.path());
    let engine = ImportEngine::new(config.clone());
    let mut store = MemoryStore::new();

    assert!(engine.restore(&mut store, "missing.sql").is_err());
    assert!(engine.migrate(&mut store, None).is_err());

    fs::create_dir_all(&config.backup_dir).unwrap();
    fs::write(
        config.backup_dir.join("shop-backup-2024-05-01.sql"),
        "INSERT INTO collections (id, slug, name) VALUES (1, 'home', 'Home') ON CONFLICT DO NOTHING;\n",
    )
    .unwrap();
    fs::write(config.backup_dir.join("shop-backup-2024-06-01.sql"), "").unwrap();
    fs::write(config.backup_dir.join("notes.txt"), "").unwrap();

    assert_eq!(
        engine.available_backups().unwrap(),
        vec![
            "shop-backup-2024-06-01.sql".to_string(),
            "shop-backup-2024-05-01.sql".to_string()
        ]
    );
    engine.restore(&mut store, "shop-backup-2024-05-01.sql").unwrap();
    assert_eq!(store.count_rows(Table::Collections).unwrap(), 1);

    fs::write(&config.migration_file, "ALTER TABLE products ADD COLUMN IF NOT EXISTS sku TEXT;\n").unwrap();
    engine.migrate(&mut store, None).unwrap();
}

#[test]
fn test_dry_run_leaves_real_import_state_alone() {
    let tmp = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);

    let mut store = MemoryStore::new();
    let engine = ImportEngine::new(config.clone());
    engine.ordered_import(&mut store, &SilentReporter, false).unwrap();
    let filtered_before = fs::read_to_string(filtered_file(&config.ordered_dir, Table::Products)).unwrap();

    let dry = ImportEngine::dry_run(&config, scratch.path()).unwrap();
    let result = dry
        .ordered_import(&mut MemoryStore::new(), &SilentReporter, true)
        .unwrap();
    assert!(matches!(result.outcome, Some(ResumeOutcome::Completed { .. })));
    assert!(scratch.path().join("resume-import").join("checkpoint.json").exists());

    assert!(!config.resume_dir.join("checkpoint.json").exists());
    assert!(!batch::batch_file(&config.resume_dir, 0).exists());
    assert_eq!(
        fs::read_to_string(filtered_file(&config.ordered_dir, Table::Products)).unwrap(),
        filtered_before
    );

    let outcome = engine
        .resume_import(&mut store, &SilentReporter, Default::default())
        .unwrap();
    match outcome {
        ResumeOutcome::Completed { plan, counts } => {
            assert_eq!((plan.start, plan.end), (0, 19));
            assert_eq!(counts.get(Table::Products), 20_000);
        }
        other => panic!("expected a completed import, got {:?}", other),
    }
}

#[test]
fn test_dry_resume_uses_copied_tables_in_scratch() {
    let tmp = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dump(&config.input_file);
    ImportEngine::new(config.clone()).extract(&SilentReporter).unwrap();

    let dry = ImportEngine::dry_run(&config, scratch.path()).unwrap();
    let outcome = dry
        .resume_import(&mut MemoryStore::new(), &SilentReporter, Default::default())
        .unwrap();

    // No subcategories in an empty store, so every product is filtered out.
    assert!(matches!(outcome, ResumeOutcome::NothingToImport(_)));
    assert!(filtered_file(&dry.config().ordered_dir, Table::Products).exists());
    assert!(!filtered_file(&config.ordered_dir, Table::Products).exists());
    assert!(!config.resume_dir.exists());
}
