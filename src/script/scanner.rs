use super::command::{BodyEvent, BodyKind, BodyParser, Delimiter};
use super::patterns::{
    COMMENT, CONTROL_TABLES, DELIMITER, HEADER_MARKER, INIT_CONNECTION, INIT_CONNECTION_END,
    INIT_CONNECTION_MARKER, SEGMENT_FOOTER, SEGMENT_HEADER,
};
use super::source::{Line, LineReader, ScriptSource};
use super::{InitFragment, Segment};
use crate::control::ControlTables;
use crate::core::{Branch, Result, SegmentKind, UpgradeError, Version};
use log::debug;
use std::collections::HashSet;

const HEADER_SYNTAX: &str =
    "(UPGRADE|DOWNGRADE|SWITCH) \"<source>\" --> \"<target>\" [BRANCH \"<branch>\"]";

/// Result of the scan pass over a whole script.
pub(crate) struct ScanResult {
    pub segments: Vec<Segment>,
    pub init_fragments: Vec<InitFragment>,
    pub control_tables: Option<ControlTables>,
}

struct OpenSegment {
    segment: Segment,
    parser: BodyParser,
}

struct OpenFragment {
    targets: Vec<(Option<String>, Option<String>)>,
    parser: BodyParser,
    commands: Vec<super::Command>,
}

enum State {
    TopLevel,
    InSegment(OpenSegment),
    InFragment(OpenFragment),
}

type SegmentKey = (Option<Version>, Version, Option<Branch>);

/// Scans a script: finds every segment, validates its body and records where it starts.
///
/// Segment commands are checked for terminators but not kept.
pub(crate) fn scan(source: &ScriptSource) -> Result<ScanResult> {
    let resource = source.name();
    let mut reader = LineReader::open(source, 0, 1)?;

    let mut delimiters = Delimiter::defaults();
    let mut segments: Vec<Segment> = Vec::new();
    let mut keys: HashSet<SegmentKey> = HashSet::new();
    let mut init_fragments = Vec::new();
    let mut control_tables = None;
    let mut state = State::TopLevel;

    while let Some(line) = reader.read_line()? {
        state = match state {
            State::TopLevel => top_level(
                &line,
                &resource,
                &reader,
                &mut delimiters,
                &mut control_tables,
                &mut keys,
                segments.len(),
            )?,
            State::InSegment(mut open) => match open.parser.feed(&line)? {
                BodyEvent::End => {
                    debug!("Found segment {} at line {}", open.segment, open.segment.line());
                    segments.push(open.segment);
                    State::TopLevel
                }
                BodyEvent::Command(command) => {
                    if open.segment.kind() == SegmentKind::Switch && !command.is_directive() {
                        return Err(UpgradeError::syntax(
                            &resource,
                            command.line(),
                            "only directives inside a SWITCH segment",
                            format!("\"{}\"", first_line(command.text())),
                        ));
                    }
                    State::InSegment(open)
                }
                BodyEvent::Nothing => State::InSegment(open),
            },
            State::InFragment(mut open) => {
                if INIT_CONNECTION_MARKER.is_match(line.marker_text()) {
                    if !open.commands.is_empty() {
                        return Err(UpgradeError::syntax(
                            &resource,
                            line.number,
                            "INIT CONNECTION blocks to be strictly nested",
                            format!("\"{}\"", line.text.trim()),
                        ));
                    }
                    open.targets.push(parse_init_connection(&line, &resource)?);
                    State::InFragment(open)
                } else if INIT_CONNECTION_END.is_match(line.marker_text()) {
                    open.parser.finish(line.text.trim())?;
                    if let Some(first) = open.commands.first() {
                        let start = first.line();
                        for (connection, user) in open.targets {
                            init_fragments.push(InitFragment::new(
                                connection,
                                user,
                                start,
                                open.commands.clone(),
                            ));
                        }
                    }
                    State::TopLevel
                } else {
                    if let BodyEvent::Command(command) = open.parser.feed(&line)? {
                        open.commands.push(command);
                    }
                    State::InFragment(open)
                }
            }
        };
    }

    let last_line = reader.line_number();
    match state {
        State::TopLevel => {}
        State::InSegment(mut open) => {
            open.parser.finish("end of file")?;
            return Err(UpgradeError::syntax(
                &resource,
                last_line,
                format!("\"--* /{}\"", open.segment.kind().keyword()),
                "end of file",
            ));
        }
        State::InFragment(_) => {
            return Err(UpgradeError::syntax(
                &resource,
                last_line,
                "\"--* /INIT CONNECTION\"",
                "end of file",
            ));
        }
    }

    if !segments.iter().any(|segment| segment.source().is_none()) {
        return Err(UpgradeError::syntax(
            &resource,
            last_line,
            "at least one segment starting from \"\"",
            "none",
        ));
    }

    debug!(
        "Scanned {}: {} segments, {} init fragments",
        resource,
        segments.len(),
        init_fragments.len()
    );

    Ok(ScanResult {
        segments,
        init_fragments,
        control_tables,
    })
}

fn top_level(
    line: &Line,
    resource: &str,
    reader: &LineReader,
    delimiters: &mut Vec<Delimiter>,
    control_tables: &mut Option<ControlTables>,
    keys: &mut HashSet<SegmentKey>,
    index: usize,
) -> Result<State> {
    let text = line.marker_text();
    let trimmed = text.trim();

    if trimmed.is_empty() || COMMENT.is_match(text) || trimmed == "--*" {
        return Ok(State::TopLevel);
    }

    if HEADER_MARKER.is_match(text) {
        let segment = parse_header(line, resource, reader, delimiters, index)?;
        let key = (
            segment.source().cloned(),
            segment.target().clone(),
            segment.branch().cloned(),
        );
        if !keys.insert(key) {
            return Err(UpgradeError::syntax(
                resource,
                line.number,
                "a unique source, target and branch",
                format!("duplicate segment {segment}"),
            ));
        }
        let parser = BodyParser::new(
            BodyKind::Segment(segment.kind()),
            delimiters.clone(),
            resource,
        );
        return Ok(State::InSegment(OpenSegment { segment, parser }));
    }

    if SEGMENT_FOOTER.is_match(text) {
        return Err(UpgradeError::syntax(
            resource,
            line.number,
            "a segment header",
            format!("\"{trimmed}\" without an open segment"),
        ));
    }

    if let Some(caps) = DELIMITER.captures(text) {
        *delimiters = Delimiter::parse_directive(
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
        )
        .unwrap_or_else(Delimiter::defaults);
        return Ok(State::TopLevel);
    }

    if let Some(caps) = CONTROL_TABLES.captures(text) {
        let tables = ControlTables::new(&caps[1], &caps[2]).map_err(|_| {
            UpgradeError::syntax(resource, line.number, "valid table names", format!("\"{trimmed}\""))
        })?;
        *control_tables = Some(tables);
        return Ok(State::TopLevel);
    }

    if INIT_CONNECTION_MARKER.is_match(text) {
        let target = parse_init_connection(line, resource)?;
        return Ok(State::InFragment(OpenFragment {
            targets: vec![target],
            parser: BodyParser::new(BodyKind::Fragment, Delimiter::defaults(), resource),
            commands: Vec::new(),
        }));
    }

    if trimmed.starts_with("--") && !trimmed.starts_with("--*") && !trimmed.starts_with("--+") {
        return Ok(State::TopLevel);
    }

    Err(UpgradeError::syntax(
        resource,
        line.number,
        "a segment header",
        format!("\"{trimmed}\""),
    ))
}

fn parse_header(
    line: &Line,
    resource: &str,
    reader: &LineReader,
    delimiters: &[Delimiter],
    index: usize,
) -> Result<Segment> {
    let text = line.marker_text().trim_end();
    let caps = SEGMENT_HEADER
        .captures(text)
        .ok_or_else(|| UpgradeError::syntax(resource, line.number, HEADER_SYNTAX, format!("\"{text}\"")))?;

    let kind = SegmentKind::from_keyword(&caps[1])
        .ok_or_else(|| UpgradeError::syntax(resource, line.number, HEADER_SYNTAX, format!("\"{text}\"")))?;
    let source = match &caps[2] {
        "" => None,
        version => Some(Version::new(version)),
    };
    if source.is_none() && kind != SegmentKind::Upgrade {
        return Err(UpgradeError::syntax(
            resource,
            line.number,
            "a source version for a DOWNGRADE or SWITCH segment",
            format!("\"{text}\""),
        ));
    }
    let target = Version::new(&caps[3]);
    let branch = caps.get(4).map(|m| Branch::new(m.as_str()));

    Ok(Segment::located(
        index,
        kind,
        source,
        target,
        branch,
        line.number,
        reader.offset(),
        line.number + 1,
        delimiters.to_vec(),
    ))
}

fn parse_init_connection(line: &Line, resource: &str) -> Result<(Option<String>, Option<String>)> {
    let caps = INIT_CONNECTION.captures(line.marker_text().trim_end()).ok_or_else(|| {
        UpgradeError::syntax(
            resource,
            line.number,
            "INIT CONNECTION [<connection> [USER <user>]]",
            format!("\"{}\"", line.text.trim()),
        )
    })?;
    Ok((
        caps.get(1).map(|m| m.as_str().to_string()),
        caps.get(2).map(|m| m.as_str().to_string()),
    ))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
