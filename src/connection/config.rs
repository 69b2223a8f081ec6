use crate::core::{Result, UpgradeError};
use std::fmt;

/// Name of the connection that always exists and holds the control tables
pub const DEFAULT_CONNECTION: &str = "default";

/// Parameters of one logical connection
///
/// Built with the builder methods or parsed from the `<driver>:<url>` shorthand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Logical name used by `SELECT CONNECTION`
    pub name: String,

    /// Driver identifier
    pub driver: String,

    /// Driver specific location of the database
    pub url: String,

    pub username: Option<String>,

    pub password: Option<String>,
}

impl ConnectionParams {
    /// Parameters for the default connection
    pub fn new(driver: &str, url: &str) -> Self {
        Self {
            name: DEFAULT_CONNECTION.to_string(),
            driver: driver.to_string(),
            url: url.to_string(),
            username: None,
            password: None,
        }
    }

    /// Set the logical name
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the username
    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    /// Set the password
    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Parse from the `<driver>:<url>` shorthand
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let params = ConnectionParams::from_url("sqlite:/var/lib/app/app.db")?;
    /// let memory = ConnectionParams::from_url("sqlite::memory:")?;
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let (driver, location) = url
            .split_once(':')
            .ok_or_else(|| UpgradeError::Connection(format!("Expected <driver>:<url>, found '{url}'")))?;
        if driver.is_empty() || location.is_empty() {
            return Err(UpgradeError::Connection(format!(
                "Expected <driver>:<url>, found '{url}'"
            )));
        }
        Ok(Self::new(driver, location))
    }

    /// Parse `<name>=<driver>:<url>`, the form used for secondary connections
    pub fn from_named_url(text: &str) -> Result<Self> {
        let (name, url) = text.split_once('=').ok_or_else(|| {
            UpgradeError::Connection(format!("Expected <name>=<driver>:<url>, found '{text}'"))
        })?;
        let params = Self::from_url(url.trim())?.name(name.trim());
        params.validate()?;
        Ok(params)
    }

    /// Whether this is the default connection
    pub fn is_default(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEFAULT_CONNECTION)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        match &self.username {
            Some(username) => format!(
                "{}:{} (user {}, password {})",
                self.driver,
                self.url,
                username,
                if self.password.is_some() { "***" } else { "none" }
            ),
            None => format!("{}:{}", self.driver, self.url),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(UpgradeError::Connection(format!(
                "Invalid connection name '{}'",
                self.name
            )));
        }

        if self.driver.is_empty() {
            return Err(UpgradeError::Connection(format!(
                "Connection {} has no driver",
                self.name
            )));
        }

        if self.url.is_empty() {
            return Err(UpgradeError::Connection(format!(
                "Connection {} has no url",
                self.name
            )));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(UpgradeError::Connection(format!(
                "Connection {} has a password but no username",
                self.name
            )));
        }

        Ok(())
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let params = ConnectionParams::new("sqlite", "app.db")
            .name("queues")
            .username("app")
            .password("secret");

        assert_eq!(params.name, "queues");
        assert_eq!(params.driver, "sqlite");
        assert_eq!(params.username.as_deref(), Some("app"));
        assert!(!params.is_default());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_from_url() {
        let params = ConnectionParams::from_url("sqlite::memory:").unwrap();
        assert_eq!(params.driver, "sqlite");
        assert_eq!(params.url, ":memory:");
        assert!(params.is_default());

        let named = ConnectionParams::from_named_url("queues=sqlite:/tmp/queues.db").unwrap();
        assert_eq!(named.name, "queues");
        assert_eq!(named.url, "/tmp/queues.db");
    }

    #[test]
    fn test_invalid_url() {
        assert!(ConnectionParams::from_url("no-driver").is_err());
        assert!(ConnectionParams::from_url(":memory").is_err());
        assert!(ConnectionParams::from_named_url("sqlite:app.db").is_err());
        assert!(ConnectionParams::from_named_url("my queue=sqlite:app.db").is_err());
    }

    #[test]
    fn test_validate() {
        let no_user = ConnectionParams::new("sqlite", "app.db").password("secret");
        assert!(no_user.validate().is_err());

        let no_url = ConnectionParams::new("sqlite", "");
        assert!(no_url.validate().is_err());
    }

    #[test]
    fn test_to_url_hides_password() {
        let params = ConnectionParams::new("sqlite", "app.db")
            .username("alice")
            .password("secret123");

        let url = params.to_url();
        assert!(!url.contains("secret123"));
        assert!(url.contains("***"));
        assert!(!params.to_string().contains("secret123"));
    }
}
