use super::patterns::{
    COMMENT, CONTROL_TABLES, DELIMITER, HEADER_MARKER, INIT_CONNECTION_END, INIT_CONNECTION_MARKER,
    SEGMENT_FOOTER,
};
use super::source::{Line, LineReader};
use crate::core::{Result, SegmentKind, UpgradeError};
use std::fmt;

/// A single command read from a segment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    repeatable: bool,
    directive: bool,
    line: usize,
}

impl Command {
    pub fn new(text: impl Into<String>, repeatable: bool, line: usize) -> Self {
        Self {
            text: text.into(),
            repeatable,
            directive: false,
            line,
        }
    }

    /// A `--*` directive. Directives are always repeatable.
    pub fn directive(text: impl Into<String>, line: usize) -> Self {
        Self {
            text: text.into(),
            repeatable: true,
            directive: true,
            line,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    pub fn is_directive(&self) -> bool {
        self.directive
    }

    /// 1-based line where the command starts.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.directive {
            write!(f, "--* {}", self.text)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimiterKind {
    /// Token at the end of the last line of the command.
    Trailing,
    /// Token alone on its own line.
    Isolated,
}

/// Command terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter {
    token: String,
    kind: DelimiterKind,
}

impl Delimiter {
    pub fn trailing(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            kind: DelimiterKind::Trailing,
        }
    }

    pub fn isolated(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            kind: DelimiterKind::Isolated,
        }
    }

    /// A trailing `;` or a line containing only `GO`.
    pub fn defaults() -> Vec<Delimiter> {
        vec![Delimiter::trailing(";"), Delimiter::isolated("GO")]
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn kind(&self) -> DelimiterKind {
        self.kind
    }

    /// Returns the part of `line` that still belongs to the command when the line terminates it.
    fn terminate<'a>(&self, line: &'a str) -> Option<&'a str> {
        match self.kind {
            DelimiterKind::Isolated => line
                .trim()
                .eq_ignore_ascii_case(&self.token)
                .then_some(""),
            DelimiterKind::Trailing => {
                let trimmed = line.trim_end();
                trimmed
                    .strip_suffix(self.token.as_str())
                    .or_else(|| {
                        let split = trimmed.len().checked_sub(self.token.len())?;
                        let (head, tail) = trimmed.split_at_checked(split)?;
                        tail.eq_ignore_ascii_case(&self.token).then_some(head)
                    })
            }
        }
    }

    /// Parses the tail of a `DELIMITER IS` line. `None` restores the defaults.
    pub(crate) fn parse_directive(kind: Option<&str>, token: Option<&str>) -> Option<Vec<Delimiter>> {
        let token = token?;
        let delimiter = match kind {
            Some(kind) if kind.eq_ignore_ascii_case("ISOLATED") => Delimiter::isolated(token),
            _ => Delimiter::trailing(token),
        };
        Some(vec![delimiter])
    }
}

fn describe_delimiters(delimiters: &[Delimiter]) -> String {
    delimiters
        .iter()
        .map(|d| format!("\"{}\"", d.token))
        .collect::<Vec<_>>()
        .join(" or ")
}

struct Pending {
    text: String,
    line: usize,
    repeatable: bool,
}

/// What a body line turned out to be.
#[derive(Debug)]
pub(crate) enum BodyEvent {
    Nothing,
    Command(Command),
    End,
}

/// Where a body parser is reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Segment(SegmentKind),
    /// An INIT CONNECTION block. Its end marker is handled by the scanner.
    Fragment,
}

/// Splits body lines into commands.
///
/// Shared by the scanner, which only validates, and by [`CommandStream`], which yields.
pub(crate) struct BodyParser {
    kind: BodyKind,
    delimiters: Vec<Delimiter>,
    pending: Option<Pending>,
    resource: String,
}

impl BodyParser {
    pub fn new(kind: BodyKind, delimiters: Vec<Delimiter>, resource: impl Into<String>) -> Self {
        Self {
            kind,
            delimiters,
            pending: None,
            resource: resource.into(),
        }
    }

    pub fn feed(&mut self, line: &Line) -> Result<BodyEvent> {
        let text = line.marker_text();

        if self.pending.is_some() {
            if text.starts_with("--*") || text.starts_with("--+") {
                if COMMENT.is_match(text) {
                    return Ok(BodyEvent::Nothing);
                }
                return Err(self.unterminated(text));
            }
            return Ok(self.absorb(text));
        }

        if text.trim().is_empty() || COMMENT.is_match(text) {
            return Ok(BodyEvent::Nothing);
        }

        if let Some(caps) = SEGMENT_FOOTER.captures(text) {
            return match self.kind {
                BodyKind::Segment(open) if SegmentKind::from_keyword(&caps[1]) == Some(open) => {
                    Ok(BodyEvent::End)
                }
                BodyKind::Segment(open) => Err(self.error(
                    line.number,
                    format!("\"--* /{}\"", open.keyword()),
                    text,
                )),
                BodyKind::Fragment => Err(self.error(line.number, "\"--* /INIT CONNECTION\"", text)),
            };
        }

        if HEADER_MARKER.is_match(text) {
            let expected = match self.kind {
                BodyKind::Segment(open) => format!("\"--* /{}\"", open.keyword()),
                BodyKind::Fragment => "\"--* /INIT CONNECTION\"".to_string(),
            };
            return Err(self.error(line.number, expected, text));
        }

        if let Some(caps) = DELIMITER.captures(text) {
            self.delimiters = Delimiter::parse_directive(
                caps.get(2).map(|m| m.as_str()),
                caps.get(3).map(|m| m.as_str()),
            )
            .unwrap_or_else(Delimiter::defaults);
            return Ok(BodyEvent::Nothing);
        }

        if CONTROL_TABLES.is_match(text)
            || INIT_CONNECTION_MARKER.is_match(text)
            || INIT_CONNECTION_END.is_match(text)
        {
            return Err(self.error(line.number, "a command", text));
        }

        if let Some(directive) = text.strip_prefix("--*") {
            let directive = directive.trim();
            if directive.is_empty() {
                return Ok(BodyEvent::Nothing);
            }
            if self.kind == BodyKind::Fragment {
                return Err(self.error(line.number, "a command", text));
            }
            return Ok(BodyEvent::Command(Command::directive(directive, line.number)));
        }

        if let Some(rest) = text.strip_prefix("--+") {
            self.pending = Some(Pending {
                text: String::new(),
                line: line.number,
                repeatable: true,
            });
            return Ok(self.absorb(rest.trim_start()));
        }

        if text.trim_start().starts_with("--") {
            // Plain SQL comment between commands
            return Ok(BodyEvent::Nothing);
        }

        self.pending = Some(Pending {
            text: String::new(),
            line: line.number,
            repeatable: false,
        });
        Ok(self.absorb(text))
    }

    /// Called at the end of the input or of a fragment; fails when a command is still open.
    pub fn finish(&mut self, found: &str) -> Result<()> {
        if self.pending.is_some() {
            return Err(self.unterminated(found));
        }
        Ok(())
    }

    fn absorb(&mut self, text: &str) -> BodyEvent {
        let terminated = self
            .delimiters
            .iter()
            .find_map(|delimiter| delimiter.terminate(text));

        let Some(pending) = self.pending.as_mut() else {
            return BodyEvent::Nothing;
        };

        match terminated {
            None => {
                pending.text.push_str(text);
                pending.text.push('\n');
                BodyEvent::Nothing
            }
            Some(last) => {
                pending.text.push_str(last);
                let Some(done) = self.pending.take() else {
                    return BodyEvent::Nothing;
                };
                let command = done.text.trim_end();
                if command.trim().is_empty() {
                    return BodyEvent::Nothing;
                }
                BodyEvent::Command(Command::new(command, done.repeatable, done.line))
            }
        }
    }

    fn unterminated(&self, found: &str) -> UpgradeError {
        let line = self.pending.as_ref().map(|p| p.line).unwrap_or_default();
        let expected = format!(
            "command terminator {}",
            describe_delimiters(&self.delimiters)
        );
        self.error(line, expected, found)
    }

    fn error(&self, line: usize, expected: impl Into<String>, found: &str) -> UpgradeError {
        UpgradeError::syntax(&self.resource, line, expected, format!("\"{}\"", found.trim()))
    }
}

/// Lazily reads the commands of one segment, starting at the segment's recorded offset.
///
/// The stream ends at the segment footer. Obtain a new stream from the script to restart.
pub struct CommandStream {
    reader: LineReader,
    parser: BodyParser,
    resource: String,
    done: bool,
}

impl CommandStream {
    pub(crate) fn new(reader: LineReader, parser: BodyParser, resource: String) -> Self {
        Self {
            reader,
            parser,
            resource,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<Command>> {
        loop {
            let Some(line) = self.reader.read_line()? else {
                self.parser.finish("end of file")?;
                return Err(UpgradeError::syntax(
                    &self.resource,
                    self.reader.line_number(),
                    "segment footer",
                    "end of file",
                ));
            };
            match self.parser.feed(&line)? {
                BodyEvent::Nothing => continue,
                BodyEvent::Command(command) => return Ok(Some(command)),
                BodyEvent::End => return Ok(None),
            }
        }
    }
}

impl Iterator for CommandStream {
    type Item = Result<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(command)) => Some(Ok(command)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
