use std::fmt;

use crate::location::{Locator, Position};

/// Fatal lexical or syntactic error. The first one aborts the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub file: String,
    /// Absent for byte-level errors (invalid UTF-8), which report a raw
    /// byte offset inside the message instead.
    pub position: Option<Position>,
}

impl ParseError {
    pub(crate) fn at(source: &[u8], file: &str, offset: usize, message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            file: file.to_string(),
            position: Some(Locator::new(source).position(offset)),
        }
    }

    pub(crate) fn invalid_unicode(file: &str, offset: usize) -> Self {
        ParseError {
            message: format!("invalid unicode character at offset {offset}"),
            file: file.to_string(),
            position: None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(pos) if self.file.is_empty() => {
                write!(f, "{} (line: {}, column: {})", self.message, pos.line, pos.column)
            }
            Some(pos) => write!(
                f,
                "{} (file: {}, line: {}, column: {})",
                self.message, self.file, pos.line, pos.column
            ),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}
