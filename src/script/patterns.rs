use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `--* // anything`
    pub(crate) static ref COMMENT: Regex = Regex::new(r"^--\*\s*//").unwrap();

    /// Any line that looks like a segment header, checked before the full header syntax.
    pub(crate) static ref HEADER_MARKER: Regex =
        Regex::new(r"(?i)^--\*\s*(UPGRADE|DOWNGRADE|SWITCH)\b").unwrap();

    /// `--* UPGRADE "source" --> "target" [BRANCH "tag"]`
    pub(crate) static ref SEGMENT_HEADER: Regex = Regex::new(
        r#"(?i)^--\*\s*(UPGRADE|DOWNGRADE|SWITCH)\s+"([^"]*)"\s*-->\s*"([^"]+)"(?:\s+BRANCH\s+"([^"]+)")?\s*(?://.*)?$"#
    )
    .unwrap();

    /// `--* /UPGRADE`
    pub(crate) static ref SEGMENT_FOOTER: Regex =
        Regex::new(r"(?i)^--\*\s*/(UPGRADE|DOWNGRADE|SWITCH)\s*$").unwrap();

    /// `--* DELIMITER IS [ISOLATED|TRAILING] <token>` or `--* DELIMITER IS DEFAULT`
    pub(crate) static ref DELIMITER: Regex = Regex::new(
        r"(?i)^--\*\s*DELIMITER\s+IS\s+(?:(DEFAULT)|(?:(ISOLATED|TRAILING)\s+)?(\S+))\s*$"
    )
    .unwrap();

    /// `--* VERSION TABLE <name> LOG TABLE <name>`
    pub(crate) static ref CONTROL_TABLES: Regex =
        Regex::new(r"(?i)^--\*\s*VERSION\s+TABLE\s+(\S+)\s+LOG\s+TABLE\s+(\S+)\s*$").unwrap();

    pub(crate) static ref INIT_CONNECTION_MARKER: Regex =
        Regex::new(r"(?i)^--\*\s*INIT\s+CONNECTION\b").unwrap();

    /// `--* INIT CONNECTION [<name> [USER <user>]]`
    pub(crate) static ref INIT_CONNECTION: Regex =
        Regex::new(r"(?i)^--\*\s*INIT\s+CONNECTION(?:\s+(\S+)(?:\s+USER\s+(\S+))?)?\s*$").unwrap();

    pub(crate) static ref INIT_CONNECTION_END: Regex =
        Regex::new(r"(?i)^--\*\s*/INIT\s+CONNECTION\s*$").unwrap();
}
