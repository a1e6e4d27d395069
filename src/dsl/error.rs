//! Error and severity types shared by the compiler and the command dispatcher.

use std::fmt;

/// How serious the outcome of parsing a line was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    None,
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised while tokenizing, expanding, dispatching or compiling a line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub kind: ErrorKind,
    /// Set when the error happened while a bar was being defined, so the
    /// whole bar must be discarded.
    pub aborts_bar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Token,
    Expand,
    Command,
    Melody,
    Duration,
    Linkage,
}

impl ParseError {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            aborts_bar: false,
        }
    }

    pub fn token(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Token)
    }

    pub fn expand(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Expand)
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Command)
    }

    pub fn melody(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Melody)
    }

    pub fn duration(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Duration)
    }

    pub fn linkage(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Linkage)
    }

    /// Mark this error as one that invalidates the bar currently open.
    pub fn in_bar(mut self) -> Self {
        self.aborts_bar = true;
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Note);
        assert!(Severity::Note > Severity::None);
    }

    #[test]
    fn in_bar_sets_flag() {
        let err = ParseError::melody("bad token").in_bar();
        assert!(err.aborts_bar);
        assert_eq!(err.kind, ErrorKind::Melody);
    }

    #[test]
    fn display_includes_kind() {
        let err = ParseError::duration("sum mismatch");
        assert_eq!(err.to_string(), "Duration: sum mismatch");
    }
}
