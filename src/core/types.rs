use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque version identifier as written in the upgrade script.
///
/// Versions are ordered by the upgrade graph, never by their text. The "no version" state of a
/// fresh database is modelled as `Option::<Version>::None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Version(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Version::new(value)
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Version(value)
    }
}

/// Tag that tells parallel segments between the same versions apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branch(String);

impl Branch {
    pub fn new(branch: impl Into<String>) -> Self {
        Branch(branch.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Branch {
    fn from(value: &str) -> Self {
        Branch::new(value)
    }
}

/// Kind of a segment edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentKind {
    Upgrade,
    Downgrade,
    Switch,
}

impl SegmentKind {
    /// Keyword used for headers, footers and the KIND column of the log table.
    pub fn keyword(&self) -> &'static str {
        match self {
            SegmentKind::Upgrade => "UPGRADE",
            SegmentKind::Downgrade => "DOWNGRADE",
            SegmentKind::Switch => "SWITCH",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("UPGRADE") {
            Some(SegmentKind::Upgrade)
        } else if keyword.eq_ignore_ascii_case("DOWNGRADE") {
            Some(SegmentKind::Downgrade)
        } else if keyword.eq_ignore_ascii_case("SWITCH") {
            Some(SegmentKind::Switch)
        } else {
            None
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}
