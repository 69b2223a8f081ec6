use crate::core::Version;
use crate::progress::SkipReason;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECT_CONNECTION: Regex =
        Regex::new(r"(?i)^SELECT\s+CONNECTION\s+(\S+)\s*$").unwrap();
    static ref SET_USER: Regex = Regex::new(r"(?i)^SET\s+USER\s+(\w+)\s*$").unwrap();
    static ref SECTION: Regex = Regex::new(r#"(?i)^SECTION\s+"([^"]*)"\s*$"#).unwrap();
    static ref IF_HISTORY: Regex =
        Regex::new(r#"(?i)^IF\s+HISTORY\s+(NOT\s+)?CONTAINS\s+"([^"]+)"\s*$"#).unwrap();
    static ref END_IF: Regex = Regex::new(r"(?i)^/IF\s*$").unwrap();
    static ref SKIP: Regex = Regex::new(r"(?i)^SKIP\s*$").unwrap();
    static ref END_SKIP: Regex = Regex::new(r"(?i)^/SKIP\s*$").unwrap();
    static ref IGNORE_SQL_ERROR: Regex =
        Regex::new(r"(?i)^IGNORE\s+SQL\s+ERROR\s+(\w+(?:\s*,\s*\w+)*)\s*$").unwrap();
    static ref END_IGNORE_SQL_ERROR: Regex =
        Regex::new(r"(?i)^/IGNORE\s+SQL\s+ERROR\s*$").unwrap();
    static ref TRANSIENT: Regex = Regex::new(r"(?i)^TRANSIENT\s*$").unwrap();
    static ref END_TRANSIENT: Regex = Regex::new(r"(?i)^/TRANSIENT\s*$").unwrap();
}

/// Directives understood by the processor itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    SelectConnection(String),
    SetUser(String),
    Section(String),
    IfHistory { negated: bool, version: Version },
    EndIf,
    Skip,
    EndSkip,
    IgnoreSqlError(Vec<String>),
    EndIgnoreSqlError,
    Transient,
    EndTransient,
}

impl Directive {
    /// Parse the text of a `--*` line. Anything else is left to the command listeners.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(caps) = SELECT_CONNECTION.captures(text) {
            return Some(Directive::SelectConnection(caps[1].to_string()));
        }
        if let Some(caps) = SET_USER.captures(text) {
            return Some(Directive::SetUser(caps[1].to_string()));
        }
        if let Some(caps) = SECTION.captures(text) {
            return Some(Directive::Section(caps[1].to_string()));
        }
        if let Some(caps) = IF_HISTORY.captures(text) {
            return Some(Directive::IfHistory {
                negated: caps.get(1).is_some(),
                version: Version::from(&caps[2]),
            });
        }
        if let Some(caps) = IGNORE_SQL_ERROR.captures(text) {
            let codes = caps[1].split(',').map(|code| code.trim().to_string()).collect();
            return Some(Directive::IgnoreSqlError(codes));
        }

        let simple = [
            (&*END_IF, Directive::EndIf),
            (&*SKIP, Directive::Skip),
            (&*END_SKIP, Directive::EndSkip),
            (&*END_IGNORE_SQL_ERROR, Directive::EndIgnoreSqlError),
            (&*TRANSIENT, Directive::Transient),
            (&*END_TRANSIENT, Directive::EndTransient),
        ];
        simple
            .into_iter()
            .find(|(pattern, _)| pattern.is_match(text))
            .map(|(_, directive)| directive)
    }
}

/// Blocks opened by directives while a segment runs
///
/// `IF HISTORY`, `SKIP` and `IGNORE SQL ERROR` nest. `TRANSIENT` does not.
#[derive(Debug, Default)]
pub(crate) struct Blocks {
    conditions: Vec<bool>,
    skips: usize,
    ignores: Vec<Vec<String>>,
    transient: bool,
}

impl Blocks {
    /// Open or close the block `directive` stands for. `history_includes` answers
    /// `IF HISTORY` conditions.
    ///
    /// Returns `Ok(false)` when `directive` is not a block directive, and the expected
    /// marker when it closes a block that is not open.
    pub fn apply(
        &mut self,
        directive: &Directive,
        history_includes: impl FnOnce(&Version) -> bool,
    ) -> Result<bool, &'static str> {
        match directive {
            Directive::IfHistory { negated, version } => {
                self.conditions.push(history_includes(version) != *negated);
            }
            Directive::EndIf => {
                self.conditions.pop().ok_or("an open IF HISTORY block")?;
            }
            Directive::Skip => self.skips += 1,
            Directive::EndSkip => {
                self.skips = self.skips.checked_sub(1).ok_or("an open SKIP block")?;
            }
            Directive::IgnoreSqlError(codes) => self.ignores.push(codes.clone()),
            Directive::EndIgnoreSqlError => {
                self.ignores.pop().ok_or("an open IGNORE SQL ERROR block")?;
            }
            Directive::Transient => {
                if self.transient {
                    return Err("\"--* /TRANSIENT\" before another TRANSIENT");
                }
                self.transient = true;
            }
            Directive::EndTransient => {
                if !self.transient {
                    return Err("an open TRANSIENT block");
                }
                self.transient = false;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Why the commands at this point are skipped, if they are
    pub fn skipping(&self) -> Option<SkipReason> {
        if self.conditions.contains(&false) {
            Some(SkipReason::Condition)
        } else if self.skips > 0 {
            Some(SkipReason::SkipBlock)
        } else {
            None
        }
    }

    /// Whether an error with `code` is ignored by an open `IGNORE SQL ERROR` block
    pub fn ignores(&self, code: Option<&str>) -> bool {
        let Some(code) = code else {
            return false;
        };
        self.ignores
            .iter()
            .flatten()
            .any(|ignored| ignored.eq_ignore_ascii_case(code))
    }

    /// Commands inside `TRANSIENT` run even when their segment is already applied
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Closing marker of the first block still open
    pub fn unclosed(&self) -> Option<&'static str> {
        if !self.conditions.is_empty() {
            Some("\"--* /IF\"")
        } else if self.skips > 0 {
            Some("\"--* /SKIP\"")
        } else if !self.ignores.is_empty() {
            Some("\"--* /IGNORE SQL ERROR\"")
        } else if self.transient {
            Some("\"--* /TRANSIENT\"")
        } else {
            None
        }
    }
}
