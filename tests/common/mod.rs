//! Shared helpers for the integration tests

#![allow(dead_code)]

use dbupgrade::connection::SqliteConnection;
use dbupgrade::connection::Row;
use dbupgrade::{
    Command, Connection, ConnectionParams, DriverError, ProcessorConfig, ProgressListener,
    ScriptSource, Segment, SkipReason, UpgradeError, UpgradeProcessor, Version,
};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

/// A SQLite database file in a temporary directory
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.db");
        Self { dir, path }
    }

    /// Another database file next to this one
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    pub fn config(&self) -> ProcessorConfig {
        ProcessorConfig::new(ConnectionParams::new("sqlite", &self.url()))
    }

    pub fn query(&self, sql: &str) -> Vec<Row> {
        query_file(&self.path, sql)
    }

    pub fn execute(&self, sql: &str) {
        let mut conn = SqliteConnection::open(&self.url()).unwrap();
        conn.execute(sql).unwrap();
        conn.commit().unwrap();
        conn.close().unwrap();
    }

    pub fn table_exists(&self, table: &str) -> bool {
        table_exists_in(&self.path, table)
    }

    /// The single row of DBVERSION
    pub fn version_row(&self) -> Row {
        self.query("SELECT VERSION, BRANCH FROM DBVERSION")
            .into_iter()
            .next()
            .unwrap()
    }
}

pub fn query_file(path: &PathBuf, sql: &str) -> Vec<Row> {
    let mut conn = SqliteConnection::open(&path.display().to_string()).unwrap();
    let rows = conn.query(sql, &[]).unwrap();
    conn.close().unwrap();
    rows
}

pub fn table_exists_in(path: &PathBuf, table: &str) -> bool {
    let mut conn = SqliteConnection::open(&path.display().to_string()).unwrap();
    let exists = conn.table_exists(table).unwrap();
    conn.close().unwrap();
    exists
}

/// First column of every row
pub fn column(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|row| row[0].clone().unwrap_or_default())
        .collect()
}

/// Progress listener that records events as readable strings
#[derive(Clone, Default)]
pub struct Events(Rc<RefCell<Vec<String>>>);

impl Events {
    pub fn all(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.borrow().iter().any(|recorded| recorded == event)
    }

    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|recorded| recorded.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        self.0.borrow_mut().push(event);
    }
}

impl ProgressListener for Events {
    fn segment_starting(&mut self, segment: &Segment, index: usize, of: usize) {
        self.push(format!("segment {index}/{of} {segment}"));
    }

    fn section(&mut self, message: &str) {
        self.push(format!("section {message}"));
    }

    fn command_skipped(&mut self, command: &Command, reason: SkipReason) {
        self.push(format!("skipped line {} ({reason})", command.line()));
    }

    fn error_ignored(&mut self, command: &Command, error: &DriverError) {
        self.push(format!(
            "ignored line {} code {}",
            command.line(),
            error.code().unwrap_or("<none>")
        ));
    }

    fn error(&mut self, error: &UpgradeError) {
        self.push(format!("error {error}"));
    }

    fn upgrade_complete(&mut self, version: &Version) {
        self.push(format!("complete {version}"));
    }

    fn no_upgrade_needed(&mut self, version: Option<&Version>) {
        self.push(format!(
            "no upgrade needed {}",
            version.map(Version::as_str).unwrap_or("<none>")
        ));
    }
}

/// A processor for `db` loaded with `script`, recording progress into the returned events
pub fn processor(db: &TestDb, script: &str) -> (UpgradeProcessor, Events) {
    processor_with(db.config(), script)
}

pub fn processor_with(config: ProcessorConfig, script: &str) -> (UpgradeProcessor, Events) {
    let events = Events::default();
    let mut processor = UpgradeProcessor::new(config)
        .unwrap()
        .with_progress(Box::new(events.clone()));
    processor
        .init(ScriptSource::from_string("upgrade.sql", script))
        .unwrap();
    (processor, events)
}

pub fn version(processor: &UpgradeProcessor) -> Option<&str> {
    processor.current().map(Version::as_str)
}
