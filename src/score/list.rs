//! Named lists of strings with 1-based access.

use crate::dsl::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List {
    pub name: String,
    pub items: Vec<String>,
}

impl List {
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// Element at a 1-based position.
    pub fn get(&self, position: usize) -> Result<&str, ParseError> {
        position
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .map(String::as_str)
            .ok_or_else(|| {
                ParseError::command(format!(
                    "list {} has {} elements, index {position} out of range",
                    self.name,
                    self.items.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One line per element: `template` with `$1` replaced by the element.
    pub fn traverse(&self, template: &str) -> Vec<String> {
        self.items
            .iter()
            .map(|item| template.replace("$1", item))
            .collect()
    }
}
