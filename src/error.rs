//! Error types for parsing and path queries.
//!
//! Two failure families surface to callers: `ParseError` (malformed input
//! with recovery disabled, or an unusable encoding) and `QueryError`
//! (path syntax or evaluation failure, reported with the backend's code
//! and message). Structural no-ops (adding an attribute that already
//! exists, a namespace lookup that resolves nothing) are silent
//! successes, not errors.

use std::fmt;
use thiserror::Error;

/// Severity of a diagnostic collected while parsing in recovery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// A non-fatal issue that doesn't prevent parsing.
    Warning,
    /// A recoverable error; the document is malformed but parsing continued.
    Error,
    /// An unrecoverable error; parsing stopped here.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Source position within the parsed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// 0-based byte offset from the start of the input.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single diagnostic emitted during parsing.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity, self.message, self.location)
    }
}

/// Returned when input cannot be turned into a document.
///
/// No partial document is ever returned alongside this error. In recovery
/// mode most malformations are downgraded to diagnostics and parsing
/// continues; only unusable input (e.g. a rejected encoding) still fails.
#[derive(Debug, Clone, Error)]
#[error("parse error at {location}: {message}")]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
    /// Diagnostics collected before the fatal error.
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        ParseError {
            message: message.into(),
            location,
            diagnostics: Vec::new(),
        }
    }
}

/// Returned when a path query cannot be compiled or evaluated.
///
/// `code` mirrors the backend evaluator's error numbering so callers can
/// distinguish syntax errors from evaluation and anchoring failures.
#[derive(Debug, Clone, Error)]
#[error("query error {code}: {message}")]
pub struct QueryError {
    pub code: i32,
    pub message: String,
}

/// Query syntax could not be compiled.
pub(crate) const QUERY_ERR_SYNTAX: i32 = 1;
/// Query compiled but evaluation failed.
pub(crate) const QUERY_ERR_EVAL: i32 = 2;
/// The query target is not a node that can anchor an evaluation.
pub(crate) const QUERY_ERR_CONTEXT: i32 = 3;

impl QueryError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        QueryError {
            code: QUERY_ERR_SYNTAX,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        QueryError {
            code: QUERY_ERR_EVAL,
            message: message.into(),
        }
    }

    pub(crate) fn context(message: impl Into<String>) -> Self {
        QueryError {
            code: QUERY_ERR_CONTEXT,
            message: message.into(),
        }
    }
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(
            "unexpected end of input",
            SourceLocation {
                line: 1,
                column: 15,
                byte_offset: 14,
            },
        );
        assert_eq!(err.to_string(), "parse error at 1:15: unexpected end of input");
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::syntax("unterminated string literal");
        assert_eq!(err.to_string(), "query error 1: unterminated string literal");
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Error = QueryError::eval("boom").into();
        let _: &dyn std::error::Error = &err;
    }
}
