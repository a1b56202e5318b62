//! Dialect-aware boundary scanner
//!
//! Cuts a script into contiguous segments. Every byte of the input belongs to
//! exactly one segment, so offsets computed from segments always index the
//! original text. The scanner never fails on malformed SQL: an unterminated
//! quote or comment simply extends the final segment to the end of input.

use std::ops::Range;

use sqlbatch_core::Dialect;

use crate::error::SplitError;

const DEFAULT_DELIMITER: &str = ";";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    /// Statement text ending with the active delimiter (included in the range)
    Terminated { delimiter: String },
    /// Trailing text after the last delimiter
    Unterminated,
    /// MySQL client `DELIMITER` line, including its line break
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub range: Range<usize>,
    pub kind: SegmentKind,
    /// Whether anything other than whitespace and comments was seen
    pub has_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Quoted region; `backslash` enables `\` escapes
    Quoted { quote: u8, backslash: bool },
    LineComment,
    /// Block comment with the current nesting depth
    BlockComment { depth: usize },
    /// Dollar-quoted string; the tag range (including both `$`) is stored
    DollarQuoted { tag_start: usize, tag_end: usize },
}

/// Scan `text` into segments using the rules of `dialect`.
pub(crate) fn scan(text: &str, dialect: Dialect) -> Result<Vec<Segment>, SplitError> {
    Scanner::new(text, dialect).run()
}

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    dialect: Dialect,
    delimiter: String,
    state: State,
    segment_start: usize,
    has_content: bool,
    /// Open parentheses in PostgreSQL text; terminators inside are literal
    paren_depth: usize,
    segments: Vec<Segment>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, dialect: Dialect) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            dialect,
            delimiter: DEFAULT_DELIMITER.to_string(),
            state: State::Normal,
            segment_start: 0,
            has_content: false,
            paren_depth: 0,
            segments: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Segment>, SplitError> {
        let mut i = 0;
        while i < self.bytes.len() {
            i = match self.state {
                State::Normal => self.step_normal(i)?,
                State::Quoted { quote, backslash } => self.step_quoted(i, quote, backslash),
                State::LineComment => {
                    if self.bytes[i] == b'\n' {
                        self.state = State::Normal;
                    }
                    i + 1
                }
                State::BlockComment { depth } => self.step_block_comment(i, depth),
                State::DollarQuoted { tag_start, tag_end } => {
                    let tag = &self.bytes[tag_start..tag_end];
                    if self.bytes[i..].starts_with(tag) {
                        self.state = State::Normal;
                        i + tag.len()
                    } else {
                        i + 1
                    }
                }
            };
        }

        if self.segment_start < self.bytes.len() {
            self.segments.push(Segment {
                range: self.segment_start..self.bytes.len(),
                kind: SegmentKind::Unterminated,
                has_content: self.has_content,
            });
        }
        Ok(self.segments)
    }

    fn close_segment(&mut self, end: usize, kind: SegmentKind) {
        self.segments.push(Segment {
            range: self.segment_start..end,
            kind,
            has_content: self.has_content,
        });
        self.segment_start = end;
        self.has_content = false;
    }

    fn peek(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    fn step_normal(&mut self, i: usize) -> Result<usize, SplitError> {
        let byte = self.bytes[i];

        if self.paren_depth == 0 && self.bytes[i..].starts_with(self.delimiter.as_bytes()) {
            let end = i + self.delimiter.len();
            let delimiter = self.delimiter.clone();
            self.close_segment(end, SegmentKind::Terminated { delimiter });
            return Ok(end);
        }

        if byte.is_ascii_whitespace() {
            return Ok(i + 1);
        }

        match self.dialect {
            Dialect::MySql => self.step_normal_mysql(i, byte),
            Dialect::PostgreSql => Ok(self.step_normal_postgres(i, byte)),
        }
    }

    fn step_normal_mysql(&mut self, i: usize, byte: u8) -> Result<usize, SplitError> {
        match byte {
            b'\'' | b'"' => {
                self.has_content = true;
                self.state = State::Quoted { quote: byte, backslash: true };
                Ok(i + 1)
            }
            b'`' => {
                self.has_content = true;
                self.state = State::Quoted { quote: byte, backslash: false };
                Ok(i + 1)
            }
            b'#' => {
                self.state = State::LineComment;
                Ok(i + 1)
            }
            b'-' if self.peek(i + 1) == Some(b'-') && self.mysql_dash_comment_follows(i + 2) => {
                self.state = State::LineComment;
                Ok(i + 2)
            }
            b'/' if self.peek(i + 1) == Some(b'*') => {
                // `/*! ... */` and `/*+ ... */` are executed by the server
                if matches!(self.peek(i + 2), Some(b'!') | Some(b'+')) {
                    self.has_content = true;
                }
                self.state = State::BlockComment { depth: 1 };
                Ok(i + 2)
            }
            // Only recognised when nothing of the next statement is pending
            b'd' | b'D' if !self.has_content && self.dialect.supports_delimiter_directive() => {
                match self.directive_at(i)? {
                    Some((delimiter, end)) => {
                        self.delimiter = delimiter;
                        self.has_content = false;
                        self.close_segment(end, SegmentKind::Directive);
                        Ok(end)
                    }
                    None => {
                        self.has_content = true;
                        Ok(i + 1)
                    }
                }
            }
            _ => {
                self.has_content = true;
                Ok(i + 1)
            }
        }
    }

    fn step_normal_postgres(&mut self, i: usize, byte: u8) -> usize {
        match byte {
            b'\'' => {
                self.has_content = true;
                let escape_string = i > 0
                    && matches!(self.bytes[i - 1], b'e' | b'E')
                    && (i < 2 || !is_ident_byte(self.bytes[i - 2]));
                self.state = State::Quoted { quote: byte, backslash: escape_string };
                i + 1
            }
            b'"' => {
                self.has_content = true;
                self.state = State::Quoted { quote: byte, backslash: false };
                i + 1
            }
            b'-' if self.peek(i + 1) == Some(b'-') => {
                self.state = State::LineComment;
                i + 2
            }
            b'/' if self.peek(i + 1) == Some(b'*') => {
                self.state = State::BlockComment { depth: 1 };
                i + 2
            }
            b'(' => {
                self.has_content = true;
                self.paren_depth += 1;
                i + 1
            }
            b')' => {
                self.has_content = true;
                self.paren_depth = self.paren_depth.saturating_sub(1);
                i + 1
            }
            b'$' => {
                self.has_content = true;
                let preceded_by_ident = i > 0 && is_ident_byte(self.bytes[i - 1]);
                match self.dollar_tag_end(i) {
                    Some(tag_end) if !preceded_by_ident => {
                        self.state = State::DollarQuoted { tag_start: i, tag_end };
                        tag_end
                    }
                    _ => i + 1,
                }
            }
            _ => {
                self.has_content = true;
                i + 1
            }
        }
    }

    fn step_quoted(&mut self, i: usize, quote: u8, backslash: bool) -> usize {
        let byte = self.bytes[i];
        if backslash && byte == b'\\' {
            return (i + 2).min(self.bytes.len());
        }
        if byte == quote {
            if self.peek(i + 1) == Some(quote) {
                return i + 2;
            }
            self.state = State::Normal;
        }
        i + 1
    }

    fn step_block_comment(&mut self, i: usize, depth: usize) -> usize {
        if self.bytes[i..].starts_with(b"*/") {
            self.state = if depth == 1 {
                State::Normal
            } else {
                State::BlockComment { depth: depth - 1 }
            };
            return i + 2;
        }
        if self.dialect == Dialect::PostgreSql && self.bytes[i..].starts_with(b"/*") {
            self.state = State::BlockComment { depth: depth + 1 };
            return i + 2;
        }
        i + 1
    }

    /// `--` only opens a MySQL comment when followed by whitespace, a control
    /// character or the end of input.
    fn mysql_dash_comment_follows(&self, i: usize) -> bool {
        match self.peek(i) {
            None => true,
            Some(b) => b.is_ascii_whitespace() || b.is_ascii_control(),
        }
    }

    /// Parse a `DELIMITER <token>` line starting at `i`.
    ///
    /// Returns the new delimiter and the offset just past the line break, or
    /// `None` when the word at `i` is not the directive keyword.
    fn directive_at(&self, i: usize) -> Result<Option<(String, usize)>, SplitError> {
        const KEYWORD: &[u8] = b"delimiter";
        let rest = &self.bytes[i..];
        if rest.len() < KEYWORD.len() || !rest[..KEYWORD.len()].eq_ignore_ascii_case(KEYWORD) {
            return Ok(None);
        }
        match rest.get(KEYWORD.len()) {
            None | Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {}
            Some(_) => return Ok(None),
        }

        let line_end = self.text[i..]
            .find('\n')
            .map(|offset| i + offset)
            .unwrap_or(self.bytes.len());
        let argument = self.text[i + KEYWORD.len()..line_end].trim();
        let token = argument.split_whitespace().next().unwrap_or("");

        if token.is_empty() || token.contains('\\') {
            let line = self.text[..i].matches('\n').count() + 1;
            return Err(SplitError::InvalidDelimiter { line });
        }

        let end = if line_end < self.bytes.len() {
            line_end + 1
        } else {
            line_end
        };
        Ok(Some((token.to_string(), end)))
    }

    /// End offset of a `$tag$` opener at `i`, if one starts there.
    fn dollar_tag_end(&self, i: usize) -> Option<usize> {
        let mut j = i + 1;
        match self.peek(j) {
            Some(b'$') => return Some(j + 1),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' || b >= 0x80 => j += 1,
            _ => return None,
        }
        while let Some(b) = self.peek(j) {
            match b {
                b'$' => return Some(j + 1),
                b if is_ident_byte(b) => j += 1,
                _ => return None,
            }
        }
        None
    }
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}
