// ============================================================================
// dbupgrade Library
// ============================================================================

pub mod connection;
pub mod control;
pub mod core;
pub mod graph;
pub mod plugins;
pub mod processor;
pub mod progress;
pub mod script;

// Re-export main types for convenience
pub use core::{Branch, DriverError, Result, SegmentKind, UpgradeError, Version};
pub use processor::{ProcessorConfig, ProcessorState, UpgradeProcessor};
pub use script::{Command, Script, ScriptSource, Segment};

// Re-export collaborator interfaces
pub use connection::{
    Connection, ConnectionParams, ConnectionRegistry, Driver, DriverRegistry, DEFAULT_CONNECTION,
};
pub use control::{ControlState, ControlTables, HistoryEntry};
pub use graph::{Path, PathStep, VersionGraph};
pub use plugins::{CommandContext, CommandListener, ListenerRegistry};
pub use progress::{LogProgress, ProgressListener, SkipReason};

// ============================================================================
// One-shot API
// ============================================================================

/// Upgrade the database behind `config` to `target` using the script at `source`.
///
/// `target` follows [`UpgradeProcessor::upgrade`]: an exact version, a `prefix*` or empty for
/// the latest version.
///
/// # Examples
///
/// ```no_run
/// use dbupgrade::{ProcessorConfig, ScriptSource};
///
/// # fn main() -> dbupgrade::Result<()> {
/// let config = ProcessorConfig::from_url("sqlite:app.db")?;
/// let version = dbupgrade::upgrade(config, ScriptSource::from_path("upgrade.sql"), "")?;
/// println!("Database is at {:?}", version);
/// # Ok(())
/// # }
/// ```
pub fn upgrade(config: ProcessorConfig, source: ScriptSource, target: &str) -> Result<Option<Version>> {
    let mut processor = UpgradeProcessor::new(config)?;
    processor.init(source)?;
    processor.upgrade(target, false)?;
    let version = processor.current().cloned();
    processor.end()?;
    Ok(version)
}
