// ============================================================================
// Control State
// ============================================================================
//
// Two tables inside the target database record where it stands:
//
//   DBVERSION     ( VERSION, BRANCH )                         single row
//   DBVERSIONLOG  ( SEQ, KIND, SOURCE, TARGET, BRANCH, STAMP ) append-only
//
// The log is never rewritten. Downgrades are folded in when the effective
// history is computed.
//
// ============================================================================

use crate::connection::Connection;
use crate::core::{Branch, DriverError, Result, SegmentKind, UpgradeError, Version};
use crate::graph::VersionGraph;
use crate::script::Segment;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VERSION_TABLE: &str = "DBVERSION";
pub const DEFAULT_LOG_TABLE: &str = "DBVERSIONLOG";

lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$").unwrap();
}

/// Names of the version table and the log table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTables {
    version: String,
    log: String,
}

impl ControlTables {
    pub fn new(version: &str, log: &str) -> Result<Self> {
        for name in [version, log] {
            if !TABLE_NAME.is_match(name) {
                return Err(UpgradeError::ControlState(format!(
                    "Invalid control table name '{name}'"
                )));
            }
        }
        if version.eq_ignore_ascii_case(log) {
            return Err(UpgradeError::ControlState(format!(
                "Version table and log table are both named {version}"
            )));
        }
        Ok(Self {
            version: version.to_string(),
            log: log.to_string(),
        })
    }

    pub fn version_table(&self) -> &str {
        &self.version
    }

    pub fn log_table(&self) -> &str {
        &self.log
    }
}

impl Default for ControlTables {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION_TABLE.to_string(),
            log: DEFAULT_LOG_TABLE.to_string(),
        }
    }
}

/// One row of the log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: i64,
    pub kind: SegmentKind,
    pub source: Option<Version>,
    pub target: Version,
    pub branch: Option<Branch>,
    pub stamp: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Whether this row records `segment`.
    pub fn records(&self, segment: &Segment) -> bool {
        self.kind == segment.kind()
            && self.source.as_ref() == segment.source()
            && &self.target == segment.target()
            && self.branch.as_ref() == segment.branch()
    }
}

/// Snapshot of the control tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    version: Option<Version>,
    branch: Option<Branch>,
    history: Vec<HistoryEntry>,
}

impl ControlState {
    pub fn new(version: Option<Version>, branch: Option<Branch>, history: Vec<HistoryEntry>) -> Self {
        Self {
            version,
            branch,
            history,
        }
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn branch(&self) -> Option<&Branch> {
        self.branch.as_ref()
    }

    /// The raw log, in sequence order.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The log with downgrades applied.
    ///
    /// A DOWNGRADE to `W` cancels earlier entries that reached a version above `W`, i.e. one in
    /// the upgrade closure of `W` other than `W` itself. Reaching `V` again cancels earlier
    /// downgrades that started at `V`.
    pub fn effective_history(&self, graph: &VersionGraph) -> Vec<&HistoryEntry> {
        let mut effective: Vec<&HistoryEntry> = Vec::new();
        for entry in &self.history {
            if entry.kind == SegmentKind::Downgrade {
                let above = graph.upgrade_closure(&entry.target);
                effective.retain(|earlier| earlier.target == entry.target || !above.contains(&earlier.target));
            } else {
                effective.retain(|earlier| {
                    earlier.kind != SegmentKind::Downgrade
                        || earlier.source.as_ref() != Some(&entry.target)
                });
            }
            effective.push(entry);
        }
        effective
    }

    /// Whether `version` was reached according to the effective history.
    pub fn history_includes(&self, graph: &VersionGraph, version: &Version) -> bool {
        self.effective_history(graph)
            .iter()
            .any(|entry| &entry.target == version)
    }

    /// Whether `segment` was applied according to the effective history.
    pub fn is_applied(&self, graph: &VersionGraph, segment: &Segment) -> bool {
        self.effective_history(graph)
            .iter()
            .any(|entry| entry.records(segment))
    }

    /// Fold a freshly recorded entry into the snapshot.
    pub(crate) fn apply(&mut self, entry: HistoryEntry, branch: Option<Branch>) {
        self.version = Some(entry.target.clone());
        self.branch = branch;
        self.history.push(entry);
    }
}

/// Reads and writes the control tables through the default connection.
#[derive(Debug, Clone, Default)]
pub struct ControlStateStore {
    tables: ControlTables,
}

fn control_error(action: &str, table: &str, err: DriverError) -> UpgradeError {
    UpgradeError::ControlState(format!("Failed to {action} {table}: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

impl ControlStateStore {
    pub fn new(tables: ControlTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &ControlTables {
        &self.tables
    }

    /// Read the current state. Missing tables mean the database has no version yet.
    pub fn load(&self, conn: &mut dyn Connection) -> Result<ControlState> {
        let version_table = self.tables.version_table();
        let log_table = self.tables.log_table();

        let exists = conn
            .table_exists(version_table)
            .map_err(|err| control_error("inspect", version_table, err))?;
        if !exists {
            debug!("Version table {} does not exist yet", version_table);
            return Ok(ControlState::default());
        }

        let rows = conn
            .query(&format!("SELECT VERSION, BRANCH FROM {version_table}"), &[])
            .map_err(|err| control_error("read", version_table, err))?;
        let (version, branch) = match rows.as_slice() {
            [] => (None, None),
            [row] => (
                non_empty(row.first().cloned().flatten()).map(Version::from),
                non_empty(row.get(1).cloned().flatten()).map(Branch::new),
            ),
            _ => {
                return Err(UpgradeError::ControlState(format!(
                    "Version table {} holds {} rows, expected one",
                    version_table,
                    rows.len()
                )));
            }
        };

        let history = if conn
            .table_exists(log_table)
            .map_err(|err| control_error("inspect", log_table, err))?
        {
            self.load_history(conn)?
        } else {
            Vec::new()
        };

        if version.is_none() && !history.is_empty() {
            warn!("Log table {} has entries but no version is recorded", log_table);
        }

        Ok(ControlState::new(version, branch, history))
    }

    fn load_history(&self, conn: &mut dyn Connection) -> Result<Vec<HistoryEntry>> {
        let log_table = self.tables.log_table();
        let rows = conn
            .query(
                &format!("SELECT SEQ, KIND, SOURCE, TARGET, BRANCH, STAMP FROM {log_table} ORDER BY SEQ"),
                &[],
            )
            .map_err(|err| control_error("read", log_table, err))?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let mut columns = row.into_iter();
            let mut next = || columns.next().flatten();

            let sequence = next()
                .and_then(|seq| seq.trim().parse::<i64>().ok())
                .ok_or_else(|| UpgradeError::ControlState(format!("{log_table} has a row without SEQ")))?;
            let kind = next()
                .and_then(|kind| SegmentKind::from_keyword(kind.trim()))
                .ok_or_else(|| {
                    UpgradeError::ControlState(format!("{log_table} row {sequence} has an unknown KIND"))
                })?;
            let source = non_empty(next()).map(Version::from);
            let target = non_empty(next()).map(Version::from).ok_or_else(|| {
                UpgradeError::ControlState(format!("{log_table} row {sequence} has no TARGET"))
            })?;
            let branch = non_empty(next()).map(Branch::new);
            let stamp = next().and_then(|stamp| {
                DateTime::parse_from_rfc3339(stamp.trim())
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .ok()
            });

            history.push(HistoryEntry {
                sequence,
                kind,
                source,
                target,
                branch,
                stamp,
            });
        }
        Ok(history)
    }

    /// Create whichever control table is missing.
    pub fn ensure_tables(&self, conn: &mut dyn Connection) -> Result<()> {
        let version_table = self.tables.version_table();
        let log_table = self.tables.log_table();

        if !conn
            .table_exists(version_table)
            .map_err(|err| control_error("inspect", version_table, err))?
        {
            debug!("Creating version table {}", version_table);
            conn.execute(&format!(
                "CREATE TABLE {version_table} ( VERSION VARCHAR(80), BRANCH VARCHAR(80) )"
            ))
            .map_err(|err| control_error("create", version_table, err))?;
        }

        if !conn
            .table_exists(log_table)
            .map_err(|err| control_error("inspect", log_table, err))?
        {
            debug!("Creating log table {}", log_table);
            conn.execute(&format!(
                "CREATE TABLE {log_table} ( SEQ INTEGER NOT NULL, KIND VARCHAR(16) NOT NULL, \
                 SOURCE VARCHAR(80), TARGET VARCHAR(80) NOT NULL, BRANCH VARCHAR(80), STAMP VARCHAR(40) )"
            ))
            .map_err(|err| control_error("create", log_table, err))?;
        }
        Ok(())
    }

    /// Set the single row of the version table.
    pub fn advance(&self, conn: &mut dyn Connection, version: &Version, branch: Option<&Branch>) -> Result<()> {
        let version_table = self.tables.version_table();
        let params = [Some(version.as_str()), branch.map(Branch::as_str)];

        let updated = conn
            .execute_with(&format!("UPDATE {version_table} SET VERSION = ?, BRANCH = ?"), &params)
            .map_err(|err| control_error("update", version_table, err))?;
        if updated == 0 {
            conn.execute_with(
                &format!("INSERT INTO {version_table} ( VERSION, BRANCH ) VALUES ( ?, ? )"),
                &params,
            )
            .map_err(|err| control_error("update", version_table, err))?;
        } else if updated > 1 {
            return Err(UpgradeError::ControlState(format!(
                "Version table {version_table} holds {updated} rows, expected one"
            )));
        }
        Ok(())
    }

    /// Append a log row for `segment`.
    pub fn append(&self, conn: &mut dyn Connection, segment: &Segment) -> Result<HistoryEntry> {
        let log_table = self.tables.log_table();
        let last = conn
            .query(&format!("SELECT MAX(SEQ) FROM {log_table}"), &[])
            .map_err(|err| control_error("read", log_table, err))?;
        let sequence = last
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .and_then(|seq| seq.trim().parse::<i64>().ok())
            .unwrap_or(0)
            + 1;

        let entry = HistoryEntry {
            sequence,
            kind: segment.kind(),
            source: segment.source().cloned(),
            target: segment.target().clone(),
            branch: segment.branch().cloned(),
            stamp: Some(Utc::now()),
        };

        let sequence_text = sequence.to_string();
        let stamp_text = entry.stamp.map(|stamp| stamp.to_rfc3339());
        conn.execute_with(
            &format!(
                "INSERT INTO {log_table} ( SEQ, KIND, SOURCE, TARGET, BRANCH, STAMP ) VALUES ( ?, ?, ?, ?, ?, ? )"
            ),
            &[
                Some(sequence_text.as_str()),
                Some(entry.kind.keyword()),
                entry.source.as_ref().map(Version::as_str),
                Some(entry.target.as_str()),
                entry.branch.as_ref().map(Branch::as_str),
                stamp_text.as_deref(),
            ],
        )
        .map_err(|err| control_error("append to", log_table, err))?;

        Ok(entry)
    }

    /// Record a completed segment: bootstrap the tables if needed, advance the version and log it.
    pub fn record(
        &self,
        conn: &mut dyn Connection,
        segment: &Segment,
        branch: Option<&Branch>,
    ) -> Result<HistoryEntry> {
        self.ensure_tables(conn)?;
        self.advance(conn, segment.target(), branch)?;
        self.append(conn, segment)
    }
}

/// Serialize a history log as pretty printed JSON.
pub fn history_json(history: &[HistoryEntry]) -> Result<String> {
    serde_json::to_string_pretty(history)
        .map_err(|err| UpgradeError::ControlState(format!("Failed to export history: {err}")))
}
