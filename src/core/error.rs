use thiserror::Error;

const NO_VERSION: &str = "<no version>";

/// Renders an optional version the way error messages and logs show it.
pub fn display_version(version: Option<&str>) -> &str {
    version.unwrap_or(NO_VERSION)
}

/// Error reported by a physical connection, a driver or a command listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    code: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a driver specific error code (SQLSTATE, extended result code, ...)
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code.to_string()),
            _ => None,
        };
        let driver = DriverError::new(err.to_string());
        match code {
            Some(code) => driver.with_code(code),
            None => driver,
        }
    }
}

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("{resource}, line {line}: expected {expected}, found {found}")]
    ScriptSyntax {
        resource: String,
        line: usize,
        expected: String,
        found: String,
    },

    #[error("Target {to} is not reachable from version {}", display_version(.from.as_deref()))]
    NoPath { from: Option<String>, to: String },

    #[error("Command at line {line} of segment {segment} failed: {source}\n{command}")]
    CommandExecution {
        segment: String,
        command: String,
        line: usize,
        #[source]
        source: DriverError,
    },

    #[error("Control state error: {0}")]
    ControlState(String),

    #[error(
        "The current database version {0} is not available in the upgrade script. Maybe this version is deprecated or the wrong upgrade script is used"
    )]
    VersionNotInScript(String),

    #[error("More than one possible target found for {target}: {}", .candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },

    #[error("Transaction of segment {segment} could not be completed: {source}")]
    Transaction {
        segment: String,
        #[source]
        source: DriverError,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid processor state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpgradeError {
    pub(crate) fn syntax(
        resource: &str,
        line: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::ScriptSyntax {
            resource: resource.to_string(),
            line,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Source line the error points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::ScriptSyntax { line, .. } | Self::CommandExecution { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_path_message_names_both_versions() {
        let err = UpgradeError::NoPath {
            from: Some("1.1.0".into()),
            to: "1.0.3".into(),
        };
        assert_eq!(err.to_string(), "Target 1.0.3 is not reachable from version 1.1.0");

        let fresh = UpgradeError::NoPath {
            from: None,
            to: "1.0.1".into(),
        };
        assert!(fresh.to_string().contains("<no version>"));
    }

    #[test]
    fn test_command_error_carries_line() {
        let err = UpgradeError::CommandExecution {
            segment: "\"1.0.1\" --> \"1.0.2\"".into(),
            command: "CREATE TABLE X".into(),
            line: 42,
            source: DriverError::new("syntax error").with_code("1"),
        };
        assert_eq!(err.line(), Some(42));
        assert!(err.to_string().contains("CREATE TABLE X"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
