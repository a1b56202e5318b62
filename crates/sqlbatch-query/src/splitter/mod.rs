//! Statement splitting
//!
//! Turns a raw script into ordered [`StatementSpan`]s using the lexical rules
//! of one [`Dialect`]. Splitting is purely lexical: no statement is parsed,
//! and malformed SQL still yields spans (the server reports the error when
//! the span is executed).

mod lexer;

use std::ops::Range;

use serde::Serialize;
use sqlbatch_core::Dialect;

use crate::error::SplitError;
use lexer::SegmentKind;

/// 1-based line and column (in characters) of a byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// One executable statement and its location in the source script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementSpan {
    /// Verbatim source text, terminator included
    pub text: String,
    /// Byte range of `text` in the source script
    pub range: Range<usize>,
    /// Position of the first byte
    pub start: Position,
    /// Position just past the last byte
    pub end: Position,
    /// Client-side delimiter that ended the statement, when it is not `;`
    pub delimiter: Option<String>,
}

impl StatementSpan {
    /// Text to send to the server.
    ///
    /// A custom `DELIMITER` terminator only exists on the client, so it is
    /// removed; a `;` terminator is kept as written.
    pub fn executable_sql(&self) -> &str {
        match &self.delimiter {
            Some(delimiter) => self
                .text
                .strip_suffix(delimiter.as_str())
                .unwrap_or(&self.text),
            None => &self.text,
        }
    }
}

/// Split a script into statements.
///
/// - Segments holding only whitespace and comments are dropped, and so are
///   MySQL `DELIMITER` directive lines.
/// - The first span has its leading whitespace trimmed; later spans keep the
///   whitespace that followed the previous terminator.
/// - A trailing statement without terminator ends at its last
///   non-whitespace byte.
pub fn split(text: &str, dialect: Dialect) -> Result<Vec<StatementSpan>, SplitError> {
    let segments = lexer::scan(text, dialect)?;
    let locator = Locator::new(text);

    let mut spans = Vec::new();
    for segment in segments {
        if !segment.has_content {
            continue;
        }

        let mut range = segment.range;
        let delimiter = match segment.kind {
            SegmentKind::Directive => continue,
            SegmentKind::Terminated { delimiter } if delimiter != ";" => Some(delimiter),
            SegmentKind::Terminated { .. } => None,
            SegmentKind::Unterminated => {
                let trimmed = text[range.clone()].trim_end();
                range.end = range.start + trimmed.len();
                None
            }
        };

        if spans.is_empty() {
            let slice = &text[range.clone()];
            range.start += slice.len() - slice.trim_start().len();
        }

        spans.push(StatementSpan {
            text: text[range.clone()].to_string(),
            start: locator.position(range.start),
            end: locator.position(range.end),
            range,
            delimiter,
        });
    }

    tracing::debug!(dialect = %dialect, statements = spans.len(), "split script");
    Ok(spans)
}

/// Split raw bytes, rejecting input that is not UTF-8.
pub fn split_bytes(bytes: &[u8], dialect: Dialect) -> Result<Vec<StatementSpan>, SplitError> {
    let text = std::str::from_utf8(bytes).map_err(|e| SplitError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    split(text, dialect)
}

/// Maps byte offsets to line/column positions
struct Locator<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> Locator<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    fn position(&self, offset: usize) -> Position {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        let line_start = self.line_starts[line_index];
        Position {
            line: line_index + 1,
            column: self.text[line_start..offset].chars().count() + 1,
        }
    }
}
