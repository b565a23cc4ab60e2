use std::fs;

use assert_matches::assert_matches;

use kira_biobank_ingest::app::init_record_set;
use kira_biobank_ingest::config::{
    CURRENT_SCHEMA_VERSION, ConfigFile, ConfigLoader, ConfigStore, RecordSetConfig,
};
use kira_biobank_ingest::domain::RecordSpec;
use kira_biobank_ingest::error::IngestError;

fn record_set(records: &[&str], bids: bool) -> RecordSetConfig {
    let records: Vec<RecordSpec> = records.iter().map(|r| r.parse().unwrap()).collect();
    RecordSetConfig::new("12345".parse().unwrap(), records, bids)
}

#[test]
fn init_writes_versioned_json() {
    let temp = tempfile::tempdir().unwrap();
    let store = ConfigStore::in_git_dir(temp.path());
    let config = record_set(&["20227_2_0", "25747_2_0.adv"], true);

    let result = init_record_set(&store, &config, false).unwrap();
    assert!(!result.replaced);
    assert_eq!(result.records, ["20227_2_0", "25747_2_0.adv"]);

    let content = fs::read_to_string(store.path()).unwrap();
    let file: ConfigFile = serde_json::from_str(&content).unwrap();
    assert_eq!(file.schema_version, Some(CURRENT_SCHEMA_VERSION));
    assert_eq!(file.subject_id, "12345");
    assert!(file.use_standard_layout);
    assert!(file.initialized_at.is_some());
    assert_eq!(store.load().unwrap(), config);
    assert!(!temp.path().join("kira-ingest.json.tmp").exists());
}

#[test]
fn forced_reinit_replaces_record_set() {
    let temp = tempfile::tempdir().unwrap();
    let store = ConfigStore::in_git_dir(temp.path());
    init_record_set(&store, &record_set(&["20227_2_0"], false), false).unwrap();

    let narrowed = record_set(&["25748_2_0", "25748_3_0"], true);
    let err = init_record_set(&store, &narrowed, false).unwrap_err();
    assert_matches!(err, IngestError::ConfigExists(_));

    let result = init_record_set(&store, &narrowed, true).unwrap();
    assert!(result.replaced);
    assert_eq!(store.load().unwrap(), narrowed);
}

#[test]
fn minimal_file_uses_defaults() {
    let config: ConfigFile =
        serde_json::from_str(r#"{"subject_id": "12345", "records": ["25748_2_0"]}"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert!(!resolved.use_standard_layout);
    assert_eq!(resolved.subject_id.as_str(), "12345");
    assert_eq!(resolved.records().len(), 1);
}

#[test]
fn newer_schema_is_rejected() {
    let config: ConfigFile = serde_json::from_str(
        r#"{"schema_version": 99, "subject_id": "12345", "records": ["25748_2_0"]}"#,
    )
    .unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config).unwrap_err(),
        IngestError::ConfigParse(_)
    );
}

#[test]
fn invalid_entries_are_rejected() {
    let bad_record: ConfigFile =
        serde_json::from_str(r#"{"subject_id": "12345", "records": ["fmri"]}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(bad_record).unwrap_err(),
        IngestError::InvalidRecord(raw) if raw == "fmri"
    );

    let bad_subject: ConfigFile =
        serde_json::from_str(r#"{"subject_id": "", "records": ["25748_2_0"]}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(bad_subject).unwrap_err(),
        IngestError::InvalidSubject(_)
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-ingest.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::load(&path).unwrap_err(),
        IngestError::ConfigParse(_)
    );
}
