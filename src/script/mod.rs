// ============================================================================
// Upgrade Script Model
// ============================================================================
//
// An upgrade script is a sequence of segments, each one a versioned edge with
// its own body of commands:
//
//   --* UPGRADE "1.0.1" --> "1.0.2" [BRANCH "tag"]
//   CREATE TABLE USERS ( ... );
//   --* /UPGRADE
//
// Scanning records where every body starts; bodies are streamed again only
// when their segment is executed.
//
// ============================================================================

mod command;
mod patterns;
mod scanner;
mod source;

pub use command::{Command, CommandStream, Delimiter, DelimiterKind};
pub use source::ScriptSource;

use crate::control::ControlTables;
use crate::core::{Branch, Result, SegmentKind, Version};
use command::{BodyKind, BodyParser};
use log::info;
use source::LineReader;
use std::fmt;

/// One directed edge of the version graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    index: usize,
    kind: SegmentKind,
    source: Option<Version>,
    target: Version,
    branch: Option<Branch>,
    line: usize,
    body_offset: u64,
    body_line: usize,
    delimiters: Vec<Delimiter>,
}

impl Segment {
    /// A segment that is not backed by script text. Used when building graphs by hand.
    pub fn new(
        kind: SegmentKind,
        source: Option<Version>,
        target: Version,
        branch: Option<Branch>,
    ) -> Self {
        Self::located(0, kind, source, target, branch, 0, 0, 0, Delimiter::defaults())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn located(
        index: usize,
        kind: SegmentKind,
        source: Option<Version>,
        target: Version,
        branch: Option<Branch>,
        line: usize,
        body_offset: u64,
        body_line: usize,
        delimiters: Vec<Delimiter>,
    ) -> Self {
        Self {
            index,
            kind,
            source,
            target,
            branch,
            line,
            body_offset,
            body_line,
            delimiters,
        }
    }

    pub fn upgrade(source: Option<&str>, target: &str) -> Self {
        Self::new(SegmentKind::Upgrade, source.map(Version::from), Version::from(target), None)
    }

    pub fn downgrade(source: &str, target: &str) -> Self {
        Self::new(
            SegmentKind::Downgrade,
            Some(Version::from(source)),
            Version::from(target),
            None,
        )
    }

    pub fn switch(version: &str, target: &str, branch: Option<&str>) -> Self {
        Self::new(
            SegmentKind::Switch,
            Some(Version::from(version)),
            Version::from(target),
            branch.map(Branch::from),
        )
    }

    /// Same segment with a branch tag.
    pub fn on_branch(mut self, branch: &str) -> Self {
        self.branch = Some(Branch::from(branch));
        self
    }

    /// Declaration order within the script.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn source(&self) -> Option<&Version> {
        self.source.as_ref()
    }

    pub fn target(&self) -> &Version {
        &self.target
    }

    pub fn branch(&self) -> Option<&Branch> {
        self.branch.as_ref()
    }

    /// Line of the segment header.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_init(&self) -> bool {
        self.source.is_none()
    }

    /// Identity used to detect duplicates and to match history rows.
    pub fn same_edge(&self, other: &Segment) -> bool {
        self.kind == other.kind
            && self.source == other.source
            && self.target == other.target
            && self.branch == other.branch
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" --> \"{}\"",
            self.kind,
            self.source.as_ref().map(Version::as_str).unwrap_or(""),
            self.target
        )?;
        if let Some(branch) = &self.branch {
            write!(f, " BRANCH \"{branch}\"")?;
        }
        Ok(())
    }
}

/// Session setup commands executed whenever a matching connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFragment {
    connection: Option<String>,
    user: Option<String>,
    line: usize,
    commands: Vec<Command>,
}

impl InitFragment {
    pub fn new(
        connection: Option<String>,
        user: Option<String>,
        line: usize,
        commands: Vec<Command>,
    ) -> Self {
        Self {
            connection,
            user,
            line,
            commands,
        }
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// An unnamed fragment applies to every connection, an unnamed user to every user.
    pub fn applies_to(&self, connection: &str, user: Option<&str>) -> bool {
        let connection_matches = self
            .connection
            .as_deref()
            .is_none_or(|name| name.eq_ignore_ascii_case(connection));
        let user_matches = match (self.user.as_deref(), user) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        };
        connection_matches && user_matches
    }
}

/// A scanned upgrade script.
#[derive(Debug, Clone)]
pub struct Script {
    source: ScriptSource,
    segments: Vec<Segment>,
    init_fragments: Vec<InitFragment>,
    control_tables: Option<ControlTables>,
}

impl Script {
    /// Scans the whole script once, validating its structure.
    pub fn parse(source: ScriptSource) -> Result<Self> {
        info!("Opening upgrade script {}", source);
        let scanned = scanner::scan(&source)?;
        Ok(Self {
            source,
            segments: scanned.segments,
            init_fragments: scanned.init_fragments,
            control_tables: scanned.control_tables,
        })
    }

    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Segments in declaration order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn init_fragments(&self) -> &[InitFragment] {
        &self.init_fragments
    }

    /// Control table names declared with `--* VERSION TABLE .. LOG TABLE ..`.
    pub fn control_tables(&self) -> Option<&ControlTables> {
        self.control_tables.as_ref()
    }

    /// Opens a fresh command stream for `segment`.
    pub fn commands(&self, segment: &Segment) -> Result<CommandStream> {
        let reader = LineReader::open(&self.source, segment.body_offset, segment.body_line)?;
        let resource = self.source.name();
        let parser = BodyParser::new(
            BodyKind::Segment(segment.kind),
            segment.delimiters.clone(),
            resource.clone(),
        );
        Ok(CommandStream::new(reader, parser, resource))
    }
}
