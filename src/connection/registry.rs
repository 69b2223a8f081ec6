use super::{Connection, ConnectionParams, DriverRegistry, DriverResult, DEFAULT_CONNECTION};
use crate::core::{DriverError, Result, UpgradeError};
use crate::script::InitFragment;
use log::{debug, info, warn};

struct Slot {
    params: ConnectionParams,
    /// Open physical connections, one per user
    open: Vec<UserConnection>,
}

struct UserConnection {
    user: Option<String>,
    connection: Box<dyn Connection>,
}

impl Slot {
    /// Parameters for `user`. The configured password only goes with the configured user.
    fn params_for(&self, user: Option<&str>) -> ConnectionParams {
        match user {
            Some(user) if !same_user(Some(user), self.params.username.as_deref()) => {
                let mut params = self.params.clone();
                params.username = Some(user.to_string());
                params.password = None;
                params
            }
            _ => self.params.clone(),
        }
    }

    fn position(&self, user: Option<&str>) -> Option<usize> {
        self.open
            .iter()
            .position(|open| same_user(open.user.as_deref(), user))
    }
}

fn same_user(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        (None, None) => true,
        _ => false,
    }
}

/// Named logical connections, each opened lazily on first use
///
/// The `default` connection is always present. A logical connection holds one physical
/// connection per user that asked for it. Init fragments from the script run on every
/// matching connection right after it is opened.
pub struct ConnectionRegistry {
    drivers: DriverRegistry,
    slots: Vec<Slot>,
    init_fragments: Vec<InitFragment>,
}

impl ConnectionRegistry {
    pub fn new(default: ConnectionParams, drivers: DriverRegistry) -> Result<Self> {
        default.validate()?;
        if !default.is_default() {
            return Err(UpgradeError::Connection(format!(
                "The first connection must be named {DEFAULT_CONNECTION}, found {}",
                default.name
            )));
        }
        Ok(Self {
            drivers,
            slots: vec![Slot {
                params: default,
                open: Vec::new(),
            }],
            init_fragments: Vec::new(),
        })
    }

    /// Add a secondary connection
    pub fn add(&mut self, params: ConnectionParams) -> Result<()> {
        params.validate()?;
        if self.contains(&params.name) {
            return Err(UpgradeError::Connection(format!(
                "Connection {} is defined twice",
                params.name
            )));
        }
        debug!("Configured connection {}", params);
        self.slots.push(Slot {
            params,
            open: Vec::new(),
        });
        Ok(())
    }

    pub fn set_init_fragments(&mut self, fragments: Vec<InitFragment>) {
        self.init_fragments = fragments;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.params.name.as_str()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.params.name.eq_ignore_ascii_case(name))
    }

    /// The connection called `name` for its configured user, opening it if needed
    pub fn get(&mut self, name: &str) -> DriverResult<&mut dyn Connection> {
        self.get_as(name, None)
    }

    /// The connection called `name` for `user`, opening it if needed.
    /// `None` stands for the configured user.
    pub fn get_as(&mut self, name: &str, user: Option<&str>) -> DriverResult<&mut dyn Connection> {
        let index = self
            .position(name)
            .ok_or_else(|| DriverError::new(format!("Unknown connection {name}")))?;

        let slot = &mut self.slots[index];
        let user = user.or(slot.params.username.as_deref()).map(str::to_string);
        let open = match slot.position(user.as_deref()) {
            Some(open) => open,
            None => {
                let params = slot.params_for(user.as_deref());
                info!("Opening connection {}", params);
                let mut connection = self.drivers.connect(&params)?;
                run_init_fragments(&self.init_fragments, &params, connection.as_mut())?;
                slot.open.push(UserConnection { user, connection });
                slot.open.len() - 1
            }
        };
        Ok(slot.open[open].connection.as_mut())
    }

    pub fn default_connection(&mut self) -> DriverResult<&mut dyn Connection> {
        self.get(DEFAULT_CONNECTION)
    }

    /// Commit every open connection of `name`
    pub fn commit(&mut self, name: &str) -> DriverResult<()> {
        for open in self.open_connections(name) {
            open.connection.commit()?;
        }
        Ok(())
    }

    /// Roll back every open connection of `name`. All are rolled back even when one fails;
    /// the first failure is returned.
    pub fn rollback(&mut self, name: &str) -> DriverResult<()> {
        let mut first_error = None;
        for open in self.open_connections(name) {
            if let Err(err) = open.connection.rollback() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn open_connections(&mut self, name: &str) -> &mut [UserConnection] {
        match self.position(name) {
            Some(index) => &mut self.slots[index].open,
            None => &mut [],
        }
    }

    /// Close every open connection. All connections are closed even when one fails;
    /// the first failure is returned.
    pub fn close_all(&mut self) -> DriverResult<()> {
        let mut first_error = None;
        for slot in &mut self.slots {
            for mut open in slot.open.drain(..) {
                debug!("Closing connection {}", slot.params.name);
                if let Err(err) = open.connection.close() {
                    warn!("Closing connection {} failed: {}", slot.params.name, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Connections used by the segment that is running, in order of first use
#[derive(Debug, Default, Clone)]
pub struct TouchedConnections {
    names: Vec<String>,
}

impl TouchedConnections {
    pub fn touch(&mut self, name: &str) {
        if !self.contains(name) {
            self.names.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|touched| touched.eq_ignore_ascii_case(name))
    }

    /// Secondary connections first, the default connection last
    pub fn commit_order(&self) -> Vec<&str> {
        let (default, secondary): (Vec<&str>, Vec<&str>) = self
            .names
            .iter()
            .map(String::as_str)
            .partition(|name| name.eq_ignore_ascii_case(DEFAULT_CONNECTION));
        secondary.into_iter().chain(default).collect()
    }
}

fn run_init_fragments(
    fragments: &[InitFragment],
    params: &ConnectionParams,
    connection: &mut dyn Connection,
) -> DriverResult<()> {
    let matching: Vec<&InitFragment> = fragments
        .iter()
        .filter(|fragment| fragment.applies_to(&params.name, params.username.as_deref()))
        .collect();
    if matching.is_empty() {
        return Ok(());
    }

    for fragment in matching {
        debug!(
            "Running init fragment from line {} on connection {}",
            fragment.line(),
            params.name
        );
        for command in fragment.commands() {
            connection.execute(command.text()).map_err(|err| {
                DriverError::new(format!(
                    "Init command at line {} failed on connection {}: {}",
                    command.line(),
                    params.name,
                    err
                ))
            })?;
        }
    }
    connection.commit()
}
