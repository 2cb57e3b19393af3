//! Field-level validation errors attached to a record.

use crate::error::FieldErrors;
use serde::Serialize;

/// Validation messages keyed by attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordErrors {
    messages: FieldErrors,
}

impl RecordErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append messages for `attribute`. Empty message lists are ignored.
    pub fn add(&mut self, attribute: impl Into<String>, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.messages
            .entry(attribute.into())
            .or_default()
            .extend(messages);
    }

    /// Drop every message for `attribute`. Returns true if any were removed.
    pub fn remove(&mut self, attribute: &str) -> bool {
        self.messages.remove(attribute).is_some()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn errors_for(&self, attribute: &str) -> &[String] {
        self.messages
            .get(attribute)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has(&self, attribute: &str) -> bool {
        self.messages.contains_key(attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total number of messages across all attributes.
    pub fn len(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn to_map(&self) -> FieldErrors {
        self.messages.clone()
    }
}
