use super::directives::{Blocks, Directive};
use crate::connection::registry::TouchedConnections;
use crate::connection::{ConnectionRegistry, DEFAULT_CONNECTION};
use crate::control::{ControlState, ControlStateStore, HistoryEntry};
use crate::core::{DriverError, Result, UpgradeError};
use crate::graph::{PathStep, VersionGraph};
use crate::plugins::{CommandContext, ListenerRegistry};
use crate::progress::{ProgressListener, SkipReason};
use crate::script::{Command, Script, Segment};
use log::{debug, warn};
use std::collections::HashMap;

/// Executes one segment of a path inside its own transaction scope.
pub(super) struct SegmentRun<'a> {
    pub script: &'a Script,
    pub graph: &'a VersionGraph,
    pub connections: &'a mut ConnectionRegistry,
    pub listeners: &'a mut ListenerRegistry,
    pub progress: &'a mut dyn ProgressListener,
    pub store: &'a ControlStateStore,
    pub control: &'a ControlState,
    pub touched: TouchedConnections,
}

fn command_failed(segment: &Segment, command: &Command, source: DriverError) -> UpgradeError {
    UpgradeError::CommandExecution {
        segment: segment.to_string(),
        command: command.text().to_string(),
        line: command.line(),
        source,
    }
}

fn transaction_failed(segment: &Segment, source: DriverError) -> UpgradeError {
    UpgradeError::Transaction {
        segment: segment.to_string(),
        source,
    }
}

impl SegmentRun<'_> {
    /// Run every command of `step`, record it and commit. On failure every touched connection
    /// is rolled back.
    pub fn execute(mut self, step: &PathStep, index: usize, of: usize) -> Result<HistoryEntry> {
        self.progress.segment_starting(&step.segment, index, of);
        match self.run(step) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    fn run(&mut self, step: &PathStep) -> Result<HistoryEntry> {
        let segment = &step.segment;
        let resource = self.script.name();
        let applied = self.control.is_applied(self.graph, segment);
        if applied {
            debug!("{} is already applied, running repeatable commands only", segment);
        }

        let mut selected = DEFAULT_CONNECTION.to_string();
        // Users set with SET USER, by lowercase connection name
        let mut users: HashMap<String, String> = HashMap::new();
        let mut blocks = Blocks::default();

        for command in self.script.commands(segment)? {
            let command = command?;
            let directive = if command.is_directive() {
                Directive::parse(command.text())
            } else {
                None
            };

            // Blocks nest, so they are tracked even inside a part that is skipped
            if let Some(directive) = &directive {
                let (control, graph) = (self.control, self.graph);
                match blocks.apply(directive, |version| control.history_includes(graph, version)) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(expected) => {
                        return Err(UpgradeError::syntax(
                            &resource,
                            command.line(),
                            expected,
                            format!("\"{command}\""),
                        ));
                    }
                }
            }

            if let Some(reason) = blocks.skipping() {
                self.progress.command_skipped(&command, reason);
                continue;
            }

            match directive {
                Some(Directive::SelectConnection(name)) => {
                    if !self.connections.contains(&name) {
                        return Err(command_failed(
                            segment,
                            &command,
                            DriverError::new(format!("Unknown connection {name}")),
                        ));
                    }
                    selected = name;
                    continue;
                }
                Some(Directive::SetUser(user)) => {
                    debug!("Connection {} now runs as {}", selected, user);
                    users.insert(selected.to_ascii_lowercase(), user);
                    continue;
                }
                Some(Directive::Section(message)) => {
                    self.progress.section(&message);
                    continue;
                }
                _ => {}
            }

            if applied && !command.is_repeatable() && !blocks.is_transient() {
                self.progress.command_skipped(&command, SkipReason::AlreadyApplied);
                continue;
            }

            let user = users.get(&selected.to_ascii_lowercase()).map(String::as_str);
            self.progress.command_executing(&command, &selected);
            let claimed = {
                let mut context = CommandContext::new(
                    &mut *self.connections,
                    &selected,
                    &mut self.touched,
                    &mut *self.progress,
                )
                .with_user(user);
                self.listeners.dispatch(&command, &mut context)
            }
            .map_err(|err| command_failed(segment, &command, err))?;

            if !claimed {
                if command.is_directive() {
                    return Err(UpgradeError::syntax(
                        &resource,
                        command.line(),
                        "a known directive",
                        format!("\"{command}\""),
                    ));
                }
                self.touched.touch(&selected);
                let executed = self
                    .connections
                    .get_as(&selected, user)
                    .and_then(|connection| connection.execute(command.text()));
                match executed {
                    Ok(()) => {}
                    Err(err) if blocks.ignores(err.code()) => {
                        self.progress.error_ignored(&command, &err);
                        continue;
                    }
                    Err(err) => return Err(command_failed(segment, &command, err)),
                }
            }
            self.progress.command_executed(&command);
        }

        if let Some(expected) = blocks.unclosed() {
            return Err(UpgradeError::syntax(
                &resource,
                segment.line(),
                expected,
                format!("end of segment {segment}"),
            ));
        }

        self.touched.touch(DEFAULT_CONNECTION);
        let connection = self
            .connections
            .default_connection()
            .map_err(|err| transaction_failed(segment, err))?;
        let entry = self.store.record(connection, segment, step.branch.as_ref())?;

        for name in self.touched.commit_order() {
            debug!("Committing connection {}", name);
            self.connections
                .commit(name)
                .map_err(|err| transaction_failed(segment, err))?;
        }
        Ok(entry)
    }

    fn rollback(&mut self) {
        self.touched.touch(DEFAULT_CONNECTION);
        for name in self.touched.commit_order() {
            if let Err(err) = self.connections.rollback(name) {
                warn!("Rollback of connection {} failed: {}", name, err);
            }
        }
    }
}
