use crate::core::{DriverError, UpgradeError, Version, display_version};
use crate::script::{Command, Script, Segment};
use log::{debug, error, info, warn};
use std::fmt;

/// Why a command was not executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The segment is already in the effective history and the command is not repeatable
    AlreadyApplied,
    /// The command sits inside an `IF HISTORY` block that does not hold
    Condition,
    /// The command sits inside a `SKIP` block
    SkipBlock,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyApplied => f.write_str("already applied"),
            SkipReason::Condition => f.write_str("condition not met"),
            SkipReason::SkipBlock => f.write_str("skip block"),
        }
    }
}

/// Callback interface for reporting upgrade progress. Every method defaults to doing nothing.
pub trait ProgressListener {
    fn script_opened(&mut self, _script: &Script) {}

    /// `index` is 1-based, `of` is the number of segments in the path
    fn segment_starting(&mut self, _segment: &Segment, _index: usize, _of: usize) {}

    fn section(&mut self, _message: &str) {}

    fn command_executing(&mut self, _command: &Command, _connection: &str) {}

    fn command_executed(&mut self, _command: &Command) {}

    fn command_skipped(&mut self, _command: &Command, _reason: SkipReason) {}

    /// The command failed with an error code listed in an open `IGNORE SQL ERROR` block
    fn error_ignored(&mut self, _command: &Command, _error: &DriverError) {}

    fn segment_finished(&mut self, _segment: &Segment) {}

    fn error(&mut self, _error: &UpgradeError) {}

    fn upgrade_complete(&mut self, _version: &Version) {}

    fn no_upgrade_needed(&mut self, _version: Option<&Version>) {}
}

/// Forwards progress to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressListener for LogProgress {
    fn script_opened(&mut self, script: &Script) {
        info!(
            "Opened upgrade script {} with {} segments",
            script.name(),
            script.segments().len()
        );
    }

    fn segment_starting(&mut self, segment: &Segment, index: usize, of: usize) {
        info!("[{}/{}] {}", index, of, segment);
    }

    fn section(&mut self, message: &str) {
        info!("{}", message);
    }

    fn command_executing(&mut self, command: &Command, connection: &str) {
        debug!("line {} on {}: {}", command.line(), connection, command);
    }

    fn command_skipped(&mut self, command: &Command, reason: SkipReason) {
        debug!("line {} skipped ({})", command.line(), reason);
    }

    fn error_ignored(&mut self, command: &Command, error: &DriverError) {
        warn!("line {}: ignored {}", command.line(), error);
    }

    fn error(&mut self, error: &UpgradeError) {
        error!("{}", error);
    }

    fn upgrade_complete(&mut self, version: &Version) {
        info!("Database is now at version {}", version);
    }

    fn no_upgrade_needed(&mut self, version: Option<&Version>) {
        warn!(
            "Database is already at version {}, nothing to do",
            display_version(version.map(Version::as_str))
        );
    }
}
