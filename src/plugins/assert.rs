use super::{CommandContext, CommandListener};
use crate::connection::DriverResult;
use crate::core::DriverError;
use crate::script::Command;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    /// `ASSERT EXISTS|EMPTY MESSAGE "<text>" <select>`
    static ref ASSERT: Regex =
        Regex::new(r#"(?is)^ASSERT\s+(EXISTS|EMPTY)\s+MESSAGE\s+"([^"]*)"\s+(.+)$"#).unwrap();
}

/// Fails the segment unless a query returns rows (`EXISTS`) or returns none (`EMPTY`).
///
/// ```text
/// --* ASSERT EXISTS MESSAGE "Run the export first" SELECT 1 FROM EXPORT_DONE
/// ```
pub struct AssertPlugin;

impl CommandListener for AssertPlugin {
    fn name(&self) -> &'static str {
        "ASSERT"
    }

    fn execute(&mut self, command: &Command, context: &mut CommandContext<'_>) -> DriverResult<bool> {
        let Some(caps) = ASSERT.captures(command.text().trim()) else {
            return Ok(false);
        };
        let expect_rows = caps[1].eq_ignore_ascii_case("EXISTS");
        let message = &caps[2];
        let query = caps[3].trim();

        debug!("Checking assertion on connection {}", context.connection_name());
        let rows = context.connection()?.query(query, &[])?;
        if rows.is_empty() == expect_rows {
            return Err(DriverError::new(format!("Assertion failed: {message}")).with_code("ASSERT"));
        }
        Ok(true)
    }
}
