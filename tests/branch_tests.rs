/// Branch tests
///
/// Tagged segments, branch pruning and SWITCH segments
/// Run with: cargo test --test branch_tests

mod common;

use common::{TestDb, column, processor, version};
use dbupgrade::{Branch, UpgradeError};

const SCRIPT: &str = r#"
--* UPGRADE "" --> "1.0"
CREATE TABLE STEPS ( NAME VARCHAR(40) );
--* /UPGRADE

--* UPGRADE "1.0" --> "2.0"
INSERT INTO STEPS VALUES ( '2.0' );
--* /UPGRADE

--* UPGRADE "1.0" --> "1.1" BRANCH "acme"
INSERT INTO STEPS VALUES ( 'acme 1.1' );
--* /UPGRADE

--* UPGRADE "1.1" --> "2.0" BRANCH "acme"
INSERT INTO STEPS VALUES ( 'acme 2.0' );
--* /UPGRADE

--* UPGRADE "2.0" --> "3.0" BRANCH "globex"
INSERT INTO STEPS VALUES ( 'globex 3.0' );
--* /UPGRADE

--* UPGRADE "2.0" --> "3.0"
INSERT INTO STEPS VALUES ( '3.0' );
--* /UPGRADE

--* UPGRADE "2.0" --> "2.1" BRANCH "globex"
INSERT INTO STEPS VALUES ( 'globex 2.1' );
--* /UPGRADE

--* SWITCH "2.0" --> "2.0" BRANCH "globex"
--* SECTION "Moving to globex"
--* /SWITCH
"#;

fn branch_of(processor: &dbupgrade::UpgradeProcessor) -> Option<&str> {
    processor.current_branch().map(Branch::as_str)
}

#[test]
fn test_first_declared_segment_wins_a_tie() {
    let db = TestDb::new();
    let (mut processor, _) = processor(&db, SCRIPT);
    processor.upgrade("3.0", false).unwrap();

    assert_eq!(version(&processor), Some("3.0"));
    assert_eq!(branch_of(&processor), Some("globex"));
    assert_eq!(
        column(&db.query("SELECT NAME FROM STEPS")),
        vec!["2.0", "globex 3.0"]
    );
    assert_eq!(
        db.version_row(),
        vec![Some("3.0".to_string()), Some("globex".to_string())]
    );
}

#[test]
fn test_other_branch_segments_are_pruned() {
    let db = TestDb::new();
    let (mut processor, _) = processor(&db, SCRIPT);
    processor.upgrade("1.1", false).unwrap();
    assert_eq!(branch_of(&processor), Some("acme"));

    processor.upgrade("3.0", false).unwrap();
    assert_eq!(branch_of(&processor), Some("acme"));
    assert_eq!(
        column(&db.query("SELECT NAME FROM STEPS")),
        vec!["acme 1.1", "acme 2.0", "3.0"]
    );
}

#[test]
fn test_branch_survives_reopening() {
    let db = TestDb::new();
    {
        let (mut processor, _) = processor(&db, SCRIPT);
        processor.upgrade("1.1", false).unwrap();
    }

    let (mut processor, _) = processor(&db, SCRIPT);
    assert_eq!(branch_of(&processor), Some("acme"));
    let targets: Vec<String> = processor
        .targets(false)
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(targets, vec!["1.1", "2.0", "3.0", "2.1"]);

    processor.upgrade("3.0", false).unwrap();
    let log = db.query("SELECT TARGET, BRANCH FROM DBVERSIONLOG ORDER BY SEQ");
    let branches: Vec<(String, Option<String>)> = log
        .into_iter()
        .map(|row| (row[0].clone().unwrap_or_default(), row[1].clone()))
        .collect();
    assert_eq!(
        branches,
        vec![
            ("1.0".to_string(), None),
            ("1.1".to_string(), Some("acme".to_string())),
            ("2.0".to_string(), Some("acme".to_string())),
            ("3.0".to_string(), None),
        ]
    );
    assert_eq!(db.version_row()[1].as_deref(), Some("acme"));
}

#[test]
fn test_switch_moves_to_another_branch() {
    let db = TestDb::new();
    let (mut processor, events) = processor(&db, SCRIPT);
    processor.upgrade("1.1", false).unwrap();

    processor.upgrade("2.1", false).unwrap();
    assert_eq!(version(&processor), Some("2.1"));
    assert_eq!(branch_of(&processor), Some("globex"));
    assert!(events.contains("segment 2/3 SWITCH \"2.0\" --> \"2.0\" BRANCH \"globex\""));
    assert!(events.contains("section Moving to globex"));
    assert_eq!(
        column(&db.query("SELECT NAME FROM STEPS")),
        vec!["acme 1.1", "acme 2.0", "globex 2.1"]
    );

    let kinds = column(&db.query("SELECT KIND FROM DBVERSIONLOG ORDER BY SEQ"));
    assert_eq!(kinds, vec!["UPGRADE", "UPGRADE", "UPGRADE", "SWITCH", "UPGRADE"]);
}

#[test]
fn test_latest_is_ambiguous_across_branches() {
    let db = TestDb::new();
    let (mut processor, _) = processor(&db, SCRIPT);

    match processor.upgrade("", false).unwrap_err() {
        UpgradeError::AmbiguousTarget { target, candidates } => {
            assert_eq!(target, "<latest>");
            assert_eq!(candidates, vec!["3.0".to_string(), "2.1".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(processor.current().is_none());
}
