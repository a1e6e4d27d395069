//! Recent errors and warnings, a bounded ring shown by `\errors`.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::dsl::error::Severity;

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub timestamp: SystemTime,
    pub severity: Severity,
    /// 0-based source line, when the message came from a line.
    pub line: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a message; notes are not kept.
    pub fn push(&mut self, severity: Severity, line: Option<usize>, message: impl Into<String>) {
        if severity < Severity::Warning {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Diagnostic {
            timestamp: SystemTime::now(),
            severity,
            line,
            message: message.into(),
        });
    }

    /// The `n` most recent entries, newest last.
    pub fn recent(&self, n: usize) -> Vec<&Diagnostic> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_are_dropped() {
        let mut d = Diagnostics::new(4);
        d.push(Severity::Note, Some(0), "fyi");
        assert!(d.is_empty());
        d.push(Severity::Error, Some(1), "bad");
        assert_eq!(d.len(), 1);
        assert_eq!(d.recent(5)[0].line, Some(1));
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let mut d = Diagnostics::new(2);
        for msg in ["a", "b", "c"] {
            d.push(Severity::Warning, None, msg);
        }
        let messages: Vec<&str> = d.recent(10).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }
}
