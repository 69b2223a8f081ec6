pub mod config;
pub mod registry;
pub mod sqlite;

pub use config::{ConnectionParams, DEFAULT_CONNECTION};
pub use registry::ConnectionRegistry;
pub use sqlite::{SqliteConnection, SqliteDriver};

use crate::core::DriverError;
use log::debug;

/// Result type returned by physical connections and drivers
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// One result row, every value rendered as text. `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Physical database connection
///
/// Statements run inside an implicit transaction that stays open until
/// [`commit`](Connection::commit) or [`rollback`](Connection::rollback). A segment is only
/// atomic while its statements leave that transaction alone, so drivers refuse statements
/// such as `COMMIT` or `BEGIN`.
pub trait Connection {
    /// Execute a statement without parameters
    fn execute(&mut self, sql: &str) -> DriverResult<()>;

    /// Execute a statement with positional parameters and return the number of affected rows
    fn execute_with(&mut self, sql: &str, params: &[Option<&str>]) -> DriverResult<u64>;

    /// Run a query and collect all rows
    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> DriverResult<Vec<Row>>;

    /// Check whether a table exists; the name is matched case-insensitively
    fn table_exists(&mut self, table: &str) -> DriverResult<bool>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    /// Close the connection, discarding any uncommitted work
    fn close(&mut self) -> DriverResult<()>;
}

/// Factory for physical connections, selected by its identifier
pub trait Driver {
    /// Identifier used in connection parameters, e.g. `sqlite`
    fn name(&self) -> &'static str;

    fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn Connection>>;
}

/// Registry of available drivers
pub struct DriverRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a driver. A later driver with the same name shadows the earlier one.
    pub fn register(&mut self, driver: Box<dyn Driver>) {
        debug!("Registered database driver: {}", driver.name());
        self.drivers.insert(0, driver);
    }

    /// Registry with every bundled driver
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SqliteDriver));
        registry
    }

    pub fn find(&self, name: &str) -> Option<&dyn Driver> {
        self.drivers
            .iter()
            .find(|driver| driver.name().eq_ignore_ascii_case(name))
            .map(|boxed| &**boxed)
    }

    /// Open a physical connection through the driver named in `params`
    pub fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn Connection>> {
        let driver = self
            .find(&params.driver)
            .ok_or_else(|| DriverError::new(format!("No driver registered for '{}'", params.driver)))?;
        driver.connect(params)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|driver| driver.name()).collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_default_drivers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_knows_sqlite() {
        let registry = DriverRegistry::with_default_drivers();
        assert!(registry.find("SQLite").is_some());
        assert!(registry.find("oracle").is_none());
        assert_eq!(registry.names(), vec!["sqlite"]);
    }

    #[test]
    fn test_unknown_driver_is_a_driver_error() {
        let registry = DriverRegistry::new();
        let params = ConnectionParams::new("postgres", "localhost/app");
        let err = registry.connect(&params).err().unwrap();
        assert!(err.message().contains("postgres"));
    }
}
