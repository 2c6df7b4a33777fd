//! Loading custom dataset definitions from the datasets directory.

use m3_core::{DatasetDefinition, DatasetRegistry, M3Config};
use pretty_assertions::assert_eq;
use std::fs;

#[test]
fn test_custom_definitions_are_loaded_and_bad_files_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("eicu.json"),
        r#"{
            "name": "eicu-demo",
            "subdirectories_to_scan": ["."],
            "primary_verification_table": "patient",
            "default_duckdb_filename": "eicu.duckdb"
        }"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("tiny.yaml"),
        "name: Tiny\nprimary_verification_table: hosp_patients\ntags: [test]\n",
    )
    .unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    fs::write(dir.path().join("missing_primary.yaml"), "name: nope\n").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mut registry = DatasetRegistry::with_builtins();
    let skipped = registry.load_dir(dir.path());

    assert_eq!(skipped.len(), 2);
    assert_eq!(
        registry.names(),
        vec!["eicu-demo", "mimic-iv-demo", "mimic-iv-full", "Tiny"]
    );

    let eicu = registry.get("EICU-DEMO").unwrap();
    assert_eq!(eicu.catalog_filename(), "eicu.duckdb");
    assert_eq!(eicu.version, "1.0");
    assert_eq!(registry.get("tiny").unwrap().catalog_filename(), "tiny.duckdb");
}

#[test]
fn test_user_definition_replaces_builtin() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("demo.yaml"),
        "name: mimic-iv-demo\ndescription: mirror\nprimary_verification_table: hosp_admissions\n\
         file_listing_url: http://mirror.local/demo/\n",
    )
    .unwrap();

    let registry = DatasetRegistry::load(dir.path());
    let demo = registry.get("mimic-iv-demo").unwrap();
    assert_eq!(demo.description, "mirror");
    assert_eq!(demo.file_listing_url.as_deref(), Some("http://mirror.local/demo/"));
    assert_ne!(demo, &DatasetDefinition::mimic_iv_demo());
}

#[test]
fn test_missing_directory_yields_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let registry = DatasetRegistry::load(dir.path().join("does-not-exist"));
    assert_eq!(registry.list().len(), 2);
}

#[test]
fn test_config_datasets_dir_follows_data_dir() {
    let config = M3Config::from_yaml("data_dir: /srv/m3\n").unwrap();
    assert_eq!(
        config.datasets_dir(),
        std::path::PathBuf::from("/srv/m3/datasets")
    );
}
