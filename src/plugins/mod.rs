pub mod assert;

use crate::connection::registry::TouchedConnections;
use crate::connection::{Connection, ConnectionRegistry, DriverResult};
use crate::progress::ProgressListener;
use crate::script::Command;
use log::debug;

/// Interceptor that gets the first refusal on every command of a segment
///
/// Returning `Ok(true)` claims the command: it is not offered to later listeners and not
/// executed as SQL. Errors abort the segment like a failed statement.
pub trait CommandListener {
    /// Listener name for logging
    fn name(&self) -> &'static str;

    fn execute(&mut self, command: &Command, context: &mut CommandContext<'_>) -> DriverResult<bool>;

    /// Called once when the processor ends
    fn terminate(&mut self) {}
}

/// What a listener may touch while handling a command
pub struct CommandContext<'a> {
    connections: &'a mut ConnectionRegistry,
    selected: &'a str,
    user: Option<&'a str>,
    touched: &'a mut TouchedConnections,
    progress: &'a mut dyn ProgressListener,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        connections: &'a mut ConnectionRegistry,
        selected: &'a str,
        touched: &'a mut TouchedConnections,
        progress: &'a mut dyn ProgressListener,
    ) -> Self {
        Self {
            connections,
            selected,
            user: None,
            touched,
            progress,
        }
    }

    /// Run the selected connection as `user` instead of its configured user
    pub(crate) fn with_user(mut self, user: Option<&'a str>) -> Self {
        self.user = user;
        self
    }

    /// Name of the connection selected with `SELECT CONNECTION`
    pub fn connection_name(&self) -> &str {
        self.selected
    }

    /// The selected connection. Work done on it commits or rolls back with the segment.
    pub fn connection(&mut self) -> DriverResult<&mut dyn Connection> {
        let connection = self.connections.get_as(self.selected, self.user)?;
        self.touched.touch(self.selected);
        Ok(connection)
    }

    /// Another connection, for its configured user
    pub fn connection_named(&mut self, name: &str) -> DriverResult<&mut dyn Connection> {
        let connection = self.connections.get(name)?;
        self.touched.touch(name);
        Ok(connection)
    }

    pub fn progress(&mut self) -> &mut dyn ProgressListener {
        &mut *self.progress
    }
}

/// Ordered set of command listeners
pub struct ListenerRegistry {
    listeners: Vec<Box<dyn CommandListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener after the existing ones
    pub fn register(&mut self, listener: Box<dyn CommandListener>) {
        debug!("Registered command listener: {}", listener.name());
        self.listeners.push(listener);
    }

    /// Registry with every bundled listener
    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(assert::AssertPlugin));
        registry
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|listener| listener.name()).collect()
    }

    /// Offer `command` to each listener in order until one claims it
    pub fn dispatch(&mut self, command: &Command, context: &mut CommandContext<'_>) -> DriverResult<bool> {
        for listener in &mut self.listeners {
            if listener.execute(command, context)? {
                debug!("Line {} handled by {}", command.line(), listener.name());
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn terminate_all(&mut self) {
        for listener in &mut self.listeners {
            debug!("Terminating command listener: {}", listener.name());
            listener.terminate();
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::with_default_plugins()
    }
}
