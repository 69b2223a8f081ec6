use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where an upgrade script is read from.
///
/// The script is scanned once when the processor is initialised. Segment bodies are read again
/// when they are executed, starting at their recorded byte offset, so file sources are re-opened
/// and seeked instead of being held in memory.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    File(PathBuf),
    Memory { name: String, text: Arc<str> },
}

impl ScriptSource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        ScriptSource::File(path.as_ref().to_path_buf())
    }

    pub fn from_string(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text: String = text.into();
        ScriptSource::Memory {
            name: name.into(),
            text: Arc::from(text),
        }
    }

    /// Script compiled into the binary, usually through `include_str!`.
    pub fn from_static(name: impl Into<String>, text: &'static str) -> Self {
        ScriptSource::Memory {
            name: name.into(),
            text: Arc::from(text),
        }
    }

    /// Name used in error messages and progress output.
    pub fn name(&self) -> String {
        match self {
            ScriptSource::File(path) => path.display().to_string(),
            ScriptSource::Memory { name, .. } => name.clone(),
        }
    }

    pub(crate) fn open_at(&self, offset: u64) -> io::Result<Box<dyn BufRead>> {
        match self {
            ScriptSource::File(path) => {
                let mut file = File::open(path)?;
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset))?;
                }
                Ok(Box::new(BufReader::new(file)))
            }
            ScriptSource::Memory { text, .. } => {
                let mut cursor = Cursor::new(SharedText(Arc::clone(text)));
                cursor.set_position(offset);
                Ok(Box::new(cursor))
            }
        }
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

struct SharedText(Arc<str>);

impl AsRef<[u8]> for SharedText {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// One physical line of a script.
#[derive(Debug, Clone)]
pub(crate) struct Line {
    pub text: String,
    /// 1-based line number.
    pub number: usize,
}

impl Line {
    /// The text without leading whitespace when the line is a `--*` or `--+` marker.
    pub fn marker_text(&self) -> &str {
        let trimmed = self.text.trim_start();
        if trimmed.starts_with("--*") || trimmed.starts_with("--+") {
            trimmed
        } else {
            &self.text
        }
    }
}

/// Line reader that keeps track of line numbers and byte offsets.
pub(crate) struct LineReader {
    reader: Box<dyn BufRead>,
    line_number: usize,
    offset: u64,
}

impl LineReader {
    /// Open `source` at `offset`; `first_line` is the number of the line found there.
    pub fn open(source: &ScriptSource, offset: u64, first_line: usize) -> io::Result<Self> {
        Ok(Self {
            reader: source.open_at(offset)?,
            line_number: first_line.saturating_sub(1),
            offset,
        })
    }

    /// Byte offset of the next line to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of the last line read.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn read_line(&mut self) -> io::Result<Option<Line>> {
        let mut text = String::new();
        let read = self.reader.read_line(&mut text)?;
        if read == 0 {
            return Ok(None);
        }

        if self.offset == 0 && text.starts_with('\u{feff}') {
            text.drain(..'\u{feff}'.len_utf8());
        }
        self.offset += read as u64;
        self.line_number += 1;

        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }

        Ok(Some(Line {
            text,
            number: self.line_number,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_allow_reopening_mid_file() {
        let source = ScriptSource::from_string("mem", "first\r\nsecond\nthird");
        let mut reader = LineReader::open(&source, 0, 1).unwrap();
        assert_eq!(reader.read_line().unwrap().unwrap().text, "first");
        let offset = reader.offset();
        let line = reader.line_number() + 1;

        let mut again = LineReader::open(&source, offset, line).unwrap();
        let second = again.read_line().unwrap().unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(second.number, 2);
        let third = again.read_line().unwrap().unwrap();
        assert_eq!((third.text.as_str(), third.number), ("third", 3));
        assert!(again.read_line().unwrap().is_none());
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let source = ScriptSource::from_string("bom", "\u{feff}--* // hello\n");
        let mut reader = LineReader::open(&source, 0, 1).unwrap();
        assert_eq!(reader.read_line().unwrap().unwrap().text, "--* // hello");
        assert_eq!(reader.offset(), "\u{feff}--* // hello\n".len() as u64);
    }
}
