use super::{Connection, ConnectionParams, Driver, DriverResult, Row};
use crate::core::DriverError;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::params_from_iter;

const MEMORY: &str = ":memory:";

lazy_static! {
    /// A plain `ROLLBACK`, as opposed to `ROLLBACK TO <savepoint>`
    static ref ROLLBACK: Regex = Regex::new(r"(?i)^ROLLBACK(?:\s+TRANSACTION)?\s*;?\s*$").unwrap();
}

/// Refuse statements that would end or restart the implicit transaction
fn check_statement(sql: &str) -> DriverResult<()> {
    let trimmed = sql.trim_start();
    let leading = trimmed.split(|c: char| !c.is_ascii_alphabetic()).next().unwrap_or_default();
    let controls = match leading.to_ascii_uppercase().as_str() {
        "BEGIN" | "COMMIT" | "END" => true,
        "ROLLBACK" => ROLLBACK.is_match(trimmed.trim_end()),
        _ => false,
    };
    if controls {
        return Err(DriverError::new(format!(
            "Transaction control is managed by the upgrade, found '{}'",
            trimmed.lines().next().unwrap_or_default().trim()
        ))
        .with_code("TRANSACTION"));
    }
    Ok(())
}

/// Embedded driver backed by SQLite. The url is a file path or `:memory:`.
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::open(&params.url)?))
    }
}

pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    pub fn open(url: &str) -> DriverResult<Self> {
        let conn = if url == MEMORY {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(url)?
        };
        debug!("Opened SQLite database {}", url);
        Ok(Self { conn: Some(conn) })
    }

    fn handle(&self) -> DriverResult<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::new("Connection is closed"))
    }

    /// Handle with a transaction open
    fn in_transaction(&self) -> DriverResult<&rusqlite::Connection> {
        let conn = self.handle()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_autocommit())
    }
}

fn render(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> DriverResult<()> {
        check_statement(sql)?;
        self.in_transaction()?.execute_batch(sql)?;
        Ok(())
    }

    fn execute_with(&mut self, sql: &str, params: &[Option<&str>]) -> DriverResult<u64> {
        check_statement(sql)?;
        let affected = self
            .in_transaction()?
            .execute(sql, params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> DriverResult<Vec<Row>> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for index in 0..columns {
                values.push(render(row.get_ref(index)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    fn table_exists(&mut self, table: &str) -> DriverResult<bool> {
        let count: i64 = self.handle()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn commit(&mut self) -> DriverResult<()> {
        let conn = self.handle()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        let conn = self.handle()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| DriverError::from(err))?;
        }
        Ok(())
    }
}
