// ============================================================================
// Upgrade Processor
// ============================================================================
//
// Drives a database from its recorded version to a requested one:
//
//   init(script)      parse, build the version graph, load the control state
//   upgrade(target)   resolve a path and run it one segment at a time
//   end()             terminate listeners, close connections
//
// Every segment is its own transaction scope. A failing segment is rolled
// back on every connection it touched and the run stops there; the control
// state keeps pointing at the last committed segment.
//
// ============================================================================

mod directives;
mod segment;
pub mod state;

pub use state::ProcessorState;

use crate::connection::registry::TouchedConnections;
use crate::connection::{Connection, ConnectionParams, ConnectionRegistry, DriverRegistry};
use crate::control::{self, ControlState, ControlStateStore, ControlTables, HistoryEntry};
use crate::core::{Branch, Result, UpgradeError, Version};
use crate::graph::VersionGraph;
use crate::plugins::{CommandListener, ListenerRegistry};
use crate::progress::{LogProgress, ProgressListener};
use crate::script::{Script, ScriptSource};
use log::{info, warn};
use segment::SegmentRun;

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Connection holding the control tables
    pub default_connection: ConnectionParams,

    /// Secondary connections reachable through `SELECT CONNECTION`
    pub connections: Vec<ConnectionParams>,

    /// Control table names, unless the script declares its own
    pub control_tables: Option<ControlTables>,
}

impl ProcessorConfig {
    pub fn new(default_connection: ConnectionParams) -> Self {
        Self {
            default_connection,
            connections: Vec::new(),
            control_tables: None,
        }
    }

    /// Configuration for a default connection given as `<driver>:<url>`
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(ConnectionParams::from_url(url)?))
    }

    /// Add a secondary connection
    pub fn connection(mut self, params: ConnectionParams) -> Self {
        self.connections.push(params);
        self
    }

    /// Set the control table names
    pub fn control_tables(mut self, tables: ControlTables) -> Self {
        self.control_tables = Some(tables);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.default_connection.validate()?;
        if !self.default_connection.is_default() {
            return Err(UpgradeError::Connection(format!(
                "The default connection is named {}",
                self.default_connection.name
            )));
        }

        for (index, params) in self.connections.iter().enumerate() {
            params.validate()?;
            if params.is_default() {
                return Err(UpgradeError::Connection(
                    "Secondary connections can't use the name of the default connection".to_string(),
                ));
            }
            if self.connections[..index]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&params.name))
            {
                return Err(UpgradeError::Connection(format!(
                    "Connection {} is defined twice",
                    params.name
                )));
            }
        }
        Ok(())
    }
}

struct Loaded {
    script: Script,
    graph: VersionGraph,
}

/// Upgrade state machine. See [`ProcessorState`] for the lifecycle.
pub struct UpgradeProcessor {
    connections: ConnectionRegistry,
    listeners: ListenerRegistry,
    progress: Box<dyn ProgressListener>,
    configured_tables: Option<ControlTables>,
    loaded: Option<Loaded>,
    store: ControlStateStore,
    control: ControlState,
    state: ProcessorState,
}

impl UpgradeProcessor {
    /// Processor with the bundled drivers, the bundled listeners and log based progress
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Self::with_drivers(config, DriverRegistry::with_default_drivers())
    }

    pub fn with_drivers(config: ProcessorConfig, drivers: DriverRegistry) -> Result<Self> {
        config.validate()?;
        let mut connections = ConnectionRegistry::new(config.default_connection, drivers)?;
        for params in config.connections {
            connections.add(params)?;
        }

        Ok(Self {
            connections,
            listeners: ListenerRegistry::with_default_plugins(),
            progress: Box::new(LogProgress),
            configured_tables: config.control_tables,
            loaded: None,
            store: ControlStateStore::default(),
            control: ControlState::default(),
            state: ProcessorState::Uninitialized,
        })
    }

    /// Replace the listener registry
    pub fn with_listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = listeners;
        self
    }

    /// Add a listener after the registered ones
    pub fn register_listener(&mut self, listener: Box<dyn CommandListener>) {
        self.listeners.register(listener);
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn script(&self) -> Option<&Script> {
        self.loaded.as_ref().map(|loaded| &loaded.script)
    }

    /// Control tables in use; the script's declaration wins over the configuration
    pub fn control_tables(&self) -> &ControlTables {
        self.store.tables()
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded
            .as_ref()
            .ok_or_else(|| UpgradeError::InvalidState("No upgrade script has been loaded".to_string()))
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ProcessorState::Ended => Err(UpgradeError::InvalidState(
                "The processor has ended".to_string(),
            )),
            ProcessorState::Running { .. } => Err(UpgradeError::InvalidState(format!(
                "The processor is {}",
                self.state
            ))),
            _ => Ok(()),
        }
    }

    /// Load an upgrade script and the control state of the default connection
    pub fn init(&mut self, source: ScriptSource) -> Result<()> {
        self.ensure_usable()?;
        let result = self.load(source);
        if let Err(err) = &result {
            self.progress.error(err);
        }
        result
    }

    fn load(&mut self, source: ScriptSource) -> Result<()> {
        let script = Script::parse(source)?;
        let graph = VersionGraph::new(script.segments())?;

        let tables = script
            .control_tables()
            .or(self.configured_tables.as_ref())
            .cloned()
            .unwrap_or_default();
        self.store = ControlStateStore::new(tables);
        self.connections
            .set_init_fragments(script.init_fragments().to_vec());
        self.progress.script_opened(&script);

        self.loaded = Some(Loaded { script, graph });
        self.reload()?;
        self.state = ProcessorState::Ready;
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let connection = self.connections.default_connection().map_err(|err| {
            UpgradeError::Connection(format!("Cannot open the default connection: {err}"))
        })?;
        self.control = self.store.load(connection)?;
        Ok(())
    }

    /// Current version, as loaded by the last `init` or `upgrade`
    pub fn current(&self) -> Option<&Version> {
        self.control.version()
    }

    pub fn current_branch(&self) -> Option<&Branch> {
        self.control.branch()
    }

    /// The raw history log
    pub fn history(&self) -> &[HistoryEntry] {
        self.control.history()
    }

    /// The history log with downgrades applied
    pub fn effective_history(&self) -> Vec<&HistoryEntry> {
        match &self.loaded {
            Some(loaded) => self.control.effective_history(&loaded.graph),
            None => self.control.history().iter().collect(),
        }
    }

    pub fn history_includes(&self, version: &str) -> bool {
        let version = Version::from(version);
        self.effective_history()
            .iter()
            .any(|entry| entry.target == version)
    }

    /// The history log as JSON
    pub fn history_json(&self) -> Result<String> {
        control::history_json(self.history())
    }

    /// Versions reachable from the current version
    pub fn targets(&self, allow_downgrade: bool) -> Result<Vec<Version>> {
        self.loaded()?
            .graph
            .reachable_targets(self.current(), self.current_branch(), allow_downgrade)
    }

    /// Resolve `target`: an exact version, a prefix ending in `*` or empty for the latest version.
    pub fn resolve_target(&self, target: &str, allow_downgrade: bool) -> Result<Version> {
        let graph = &self.loaded()?.graph;
        let target = target.trim();
        let prefix = match target.strip_suffix('*') {
            Some(prefix) => Some(prefix.trim()).filter(|prefix| !prefix.is_empty()),
            None if target.is_empty() => None,
            None => return Ok(Version::from(target)),
        };

        let tips = graph.tips(self.current(), self.current_branch(), allow_downgrade, prefix)?;
        match tips.as_slice() {
            [] => Err(UpgradeError::NoPath {
                from: self.current().map(Version::to_string),
                to: if target.is_empty() { "<latest>".to_string() } else { target.to_string() },
            }),
            [only] => Ok(only.clone()),
            _ => Err(UpgradeError::AmbiguousTarget {
                target: if target.is_empty() { "<latest>".to_string() } else { target.to_string() },
                candidates: tips.iter().map(Version::to_string).collect(),
            }),
        }
    }

    /// Bring the database to `target`
    pub fn upgrade(&mut self, target: &str, allow_downgrade: bool) -> Result<()> {
        if !self.state.can_upgrade() {
            return Err(UpgradeError::InvalidState(format!(
                "Cannot upgrade while the processor is {}",
                self.state
            )));
        }
        let result = self.run(target, allow_downgrade);
        if let Err(err) = &result {
            self.progress.error(err);
        }
        result
    }

    fn run(&mut self, target: &str, allow_downgrade: bool) -> Result<()> {
        self.reload()?;
        let to = self.resolve_target(target, allow_downgrade)?;
        let path = self.loaded()?.graph.resolve_path(
            self.current(),
            self.current_branch(),
            &to,
            allow_downgrade,
        )?;

        if path.is_empty() {
            self.progress.no_upgrade_needed(self.control.version());
            return Ok(());
        }
        info!("Upgrade path: {}", path);

        let of = path.len();
        for (position, step) in path.steps().iter().enumerate() {
            self.state = ProcessorState::Running {
                segment: position + 1,
                of,
            };

            let Self {
                connections,
                listeners,
                progress,
                loaded,
                store,
                control,
                ..
            } = self;
            let Some(loaded) = loaded.as_ref() else {
                return Err(UpgradeError::InvalidState("No upgrade script has been loaded".to_string()));
            };

            let run = SegmentRun {
                script: &loaded.script,
                graph: &loaded.graph,
                connections,
                listeners,
                progress: progress.as_mut(),
                store,
                control,
                touched: TouchedConnections::default(),
            };
            match run.execute(step, position + 1, of) {
                Ok(entry) => {
                    control.apply(entry, step.branch.clone());
                    progress.segment_finished(&step.segment);
                }
                Err(err) => {
                    self.state = ProcessorState::Failed;
                    return Err(err);
                }
            }
        }

        self.state = ProcessorState::Committed;
        self.progress.upgrade_complete(&to);
        Ok(())
    }

    /// A configured connection, opened on demand
    pub fn connection(&mut self, name: &str) -> Result<&mut dyn Connection> {
        self.connections
            .get(name)
            .map_err(|err| UpgradeError::Connection(err.to_string()))
    }

    /// Terminate listeners and close every connection. Safe to call more than once.
    pub fn end(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state = ProcessorState::Ended;
        self.listeners.terminate_all();
        self.connections
            .close_all()
            .map_err(|err| UpgradeError::Connection(format!("Failed to close connections: {err}")))
    }
}

impl Drop for UpgradeProcessor {
    fn drop(&mut self) {
        if let Err(err) = self.end() {
            warn!("{}", err);
        }
    }
}
