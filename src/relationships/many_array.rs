//! Live, index-addressable view of a has-many relationship.

use crate::model::ModelLookup;
use crate::types::ModelId;

/// The ordered records a has-many currently shows.
#[derive(Clone, Debug)]
pub struct ManyArray {
    owner: ModelId,
    key: String,
    current_state: Vec<ModelId>,
    is_loaded: bool,
    meta: Option<serde_json::Value>,
}

impl ManyArray {
    pub fn new(owner: ModelId, key: impl Into<String>) -> Self {
        Self {
            owner,
            key: key.into(),
            current_state: Vec::new(),
            is_loaded: false,
            meta: None,
        }
    }

    pub fn owner(&self) -> ModelId {
        self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn records(&self) -> &[ModelId] {
        &self.current_state
    }

    pub fn get(&self, index: usize) -> Option<ModelId> {
        self.current_state.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.current_state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current_state.is_empty()
    }

    pub fn contains(&self, record: ModelId) -> bool {
        self.current_state.contains(&record)
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.is_loaded = loaded;
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub(crate) fn set_meta(&mut self, meta: Option<serde_json::Value>) {
        self.meta = meta;
    }

    pub(crate) fn internal_add(&mut self, record: ModelId, idx: Option<usize>) {
        if self.current_state.contains(&record) {
            return;
        }
        match idx {
            Some(idx) => {
                let idx = idx.min(self.current_state.len());
                self.current_state.insert(idx, record);
            }
            None => self.current_state.push(record),
        }
    }

    pub(crate) fn internal_remove(&mut self, record: ModelId) {
        self.current_state.retain(|r| *r != record);
    }

    /// Rebuild from canonical order, dropping deleted records and keeping
    /// unsaved local records appended after the canonical ones.
    pub(crate) fn flush_canonical<M: ModelLookup>(&mut self, canonical: &[ModelId], models: &M) {
        let mut next: Vec<ModelId> = canonical
            .iter()
            .copied()
            .filter(|r| !models.is_deleted(*r))
            .collect();
        let unsaved: Vec<ModelId> = self
            .current_state
            .iter()
            .copied()
            .filter(|r| models.is_new(*r) && !next.contains(r))
            .collect();
        next.extend(unsaved);
        self.current_state = next;
    }
}
