/// Downgrade tests
///
/// DOWNGRADE segments, effective history and re-upgrades
/// Run with: cargo test --test downgrade_tests

mod common;

use common::{TestDb, column, processor, version};
use dbupgrade::{SegmentKind, UpgradeError, Version};

const SCRIPT: &str = r#"
--* UPGRADE "" --> "1.0"
CREATE TABLE ACCOUNTS ( ID INTEGER PRIMARY KEY, NAME VARCHAR(40) );
--* /UPGRADE

--* UPGRADE "1.0" --> "1.1"
ALTER TABLE ACCOUNTS ADD COLUMN EMAIL VARCHAR(80);
CREATE TABLE AUDIT ( ACCOUNT_ID INTEGER, ACTION VARCHAR(20) );
--* /UPGRADE

--* UPGRADE "1.1" --> "1.2"
--* IF HISTORY CONTAINS "1.1"
INSERT INTO AUDIT VALUES ( 0, 'upgraded' );
--* /IF
--* /UPGRADE

--* DOWNGRADE "1.2" --> "1.1"
DELETE FROM AUDIT;
--* /DOWNGRADE

--* DOWNGRADE "1.1" --> "1.0"
DROP TABLE AUDIT;
--* /DOWNGRADE
"#;

fn upgraded(db: &TestDb) {
    let (mut processor, _) = processor(db, SCRIPT);
    processor.upgrade("1.2", false).unwrap();
}

#[test]
fn test_downgrade_requires_permission() {
    let db = TestDb::new();
    upgraded(&db);

    let (mut processor, events) = processor(&db, SCRIPT);
    let err = processor.upgrade("1.0", false).unwrap_err();
    assert!(matches!(err, UpgradeError::NoPath { ref to, .. } if to == "1.0"));
    assert_eq!(version(&processor), Some("1.2"));
    assert_eq!(events.count_starting_with("segment"), 0);

    processor.upgrade("1.0", true).unwrap();
    assert_eq!(version(&processor), Some("1.0"));
    assert!(events.contains("segment 1/2 DOWNGRADE \"1.2\" --> \"1.1\""));
    assert!(events.contains("segment 2/2 DOWNGRADE \"1.1\" --> \"1.0\""));
    processor.end().unwrap();

    assert!(!db.table_exists("AUDIT"));
    assert_eq!(db.version_row()[0].as_deref(), Some("1.0"));
}

#[test]
fn test_latest_target_ignores_downgrades() {
    let db = TestDb::new();
    upgraded(&db);

    let (mut processor, _) = processor(&db, SCRIPT);
    assert_eq!(processor.resolve_target("", true).unwrap(), Version::from("1.2"));
    processor.upgrade("", true).unwrap();
    assert_eq!(version(&processor), Some("1.2"));
}

#[test]
fn test_downgrade_cancels_history_above_target() {
    let db = TestDb::new();
    upgraded(&db);

    let (mut processor, _) = processor(&db, SCRIPT);
    processor.upgrade("1.1", true).unwrap();

    assert_eq!(processor.history().len(), 4);
    let effective: Vec<(SegmentKind, String)> = processor
        .effective_history()
        .iter()
        .map(|entry| (entry.kind, entry.target.to_string()))
        .collect();
    assert_eq!(
        effective,
        vec![
            (SegmentKind::Upgrade, "1.0".to_string()),
            (SegmentKind::Upgrade, "1.1".to_string()),
            (SegmentKind::Downgrade, "1.1".to_string()),
        ]
    );
    assert!(processor.history_includes("1.1"));
    assert!(!processor.history_includes("1.2"));
}

#[test]
fn test_reupgrade_after_downgrade_runs_segment_again() {
    let db = TestDb::new();
    upgraded(&db);
    assert_eq!(column(&db.query("SELECT ACTION FROM AUDIT")), vec!["upgraded"]);

    let (mut processor, events) = processor(&db, SCRIPT);
    processor.upgrade("1.1", true).unwrap();
    assert!(db.query("SELECT * FROM AUDIT").is_empty());

    processor.upgrade("1.2", false).unwrap();
    assert_eq!(events.count_starting_with("skipped"), 0);
    assert_eq!(column(&db.query("SELECT ACTION FROM AUDIT")), vec!["upgraded"]);

    // Coming back to 1.2 lets the same downgrade run a second time
    processor.upgrade("1.1", true).unwrap();
    assert_eq!(version(&processor), Some("1.1"));
    assert!(db.query("SELECT * FROM AUDIT").is_empty());
    assert_eq!(processor.history().len(), 6);
}

#[test]
fn test_targets_listing() {
    let db = TestDb::new();
    let (mut processor, _) = processor(&db, SCRIPT);

    let fresh: Vec<String> = processor
        .targets(false)
        .unwrap()
        .iter()
        .map(Version::to_string)
        .collect();
    assert_eq!(fresh, vec!["1.0", "1.1", "1.2"]);

    processor.upgrade("1.2", false).unwrap();
    assert_eq!(processor.targets(false).unwrap(), vec![Version::from("1.2")]);

    let with_downgrades: Vec<String> = processor
        .targets(true)
        .unwrap()
        .iter()
        .map(Version::to_string)
        .collect();
    assert_eq!(with_downgrades, vec!["1.2", "1.1", "1.0"]);
}

#[test]
fn test_downgrade_failure_keeps_version() {
    let script = SCRIPT.replace("DROP TABLE AUDIT;", "DROP TABLE AUDIT_TRAIL;");
    let db = TestDb::new();
    upgraded(&db);

    let (mut processor, _) = processor(&db, &script);
    let err = processor.upgrade("1.0", true).unwrap_err();
    assert_eq!(err.line(), Some(22));
    assert_eq!(version(&processor), Some("1.1"));
    assert!(db.table_exists("AUDIT"));
}
