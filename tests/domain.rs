use kira_biobank_ingest::domain::{RecordSpec, SnapshotBranch};

#[test]
fn record_identifiers_round_trip_through_display() {
    for raw in ["20227_2_0", "25747_2_0.adv", "25748_3_0"] {
        let record: RecordSpec = raw.parse().unwrap();
        assert_eq!(record.to_string(), raw);
    }
}

#[test]
fn forced_extension_does_not_change_identity() {
    let plain: RecordSpec = "25747_2_0".parse().unwrap();
    let forced: RecordSpec = "25747_2_0.adv".parse().unwrap();
    assert!(plain.same_record(&forced));
    assert_ne!(plain, forced);
    assert_eq!(plain.stem(), forced.stem());
}

#[test]
fn session_comes_from_the_visit_number() {
    let record: RecordSpec = "20227_3_1".parse().unwrap();
    assert_eq!(record.session(), "3");
    assert_eq!(record.array_index(), "1");
}

#[test]
fn records_serialize_as_identifiers() {
    let record: RecordSpec = "25747_2_0.adv".parse().unwrap();
    assert_eq!(serde_json::to_string(&record).unwrap(), r#""25747_2_0.adv""#);
    let parsed: RecordSpec = serde_json::from_str(r#""25748_2_0""#).unwrap();
    assert_eq!(parsed.field_code(), "25748");
    assert!(serde_json::from_str::<RecordSpec>(r#""nope""#).is_err());
}

#[test]
fn derived_stages_name_their_upstream() {
    assert_eq!(SnapshotBranch::Raw.upstream(), None);
    assert_eq!(
        SnapshotBranch::Native.upstream(),
        Some(SnapshotBranch::Raw)
    );
    assert_eq!(
        SnapshotBranch::Standardized.upstream(),
        Some(SnapshotBranch::Native)
    );
    assert_eq!(
        serde_json::to_string(&SnapshotBranch::Standardized).unwrap(),
        r#""standardized""#
    );
}
