//! Arena of internal models plus the `(type, id)` identity map.

use crate::error::{Result, StoreError};
use crate::ordered_set::OrderedSet;
use crate::types::ModelId;
use std::collections::HashMap;

use super::internal::InternalModel;

/// Read access to record flags needed by the relationship graph.
pub trait ModelLookup {
    fn model_name(&self, handle: ModelId) -> Option<&str>;
    fn is_new(&self, handle: ModelId) -> bool;
    fn is_deleted(&self, handle: ModelId) -> bool;
    fn is_live(&self, handle: ModelId) -> bool;
}

/// Owns every internal model, live or tombstoned.
#[derive(Debug, Default)]
pub struct ModelTable {
    models: HashMap<ModelId, InternalModel>,
    identity: HashMap<(String, String), ModelId>,
    /// Live models per type, in creation order.
    by_type: HashMap<String, OrderedSet<ModelId>>,
    next_handle: u64,
}

impl ModelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new empty model. When `id` is known it is registered in
    /// the identity map.
    pub fn build(&mut self, model_name: &str, id: Option<String>) -> ModelId {
        self.next_handle += 1;
        let handle = ModelId(self.next_handle);
        if let Some(ref id) = id {
            self.identity
                .insert((model_name.to_string(), id.clone()), handle);
        }
        self.by_type
            .entry(model_name.to_string())
            .or_default()
            .add(handle);
        self.models
            .insert(handle, InternalModel::new(handle, model_name, id));
        handle
    }

    pub fn lookup(&self, model_name: &str, id: &str) -> Option<ModelId> {
        self.identity
            .get(&(model_name.to_string(), id.to_string()))
            .copied()
    }

    pub fn get(&self, handle: ModelId) -> Result<&InternalModel> {
        self.models
            .get(&handle)
            .ok_or(StoreError::UnknownRecord(handle))
    }

    pub fn get_mut(&mut self, handle: ModelId) -> Result<&mut InternalModel> {
        self.models
            .get_mut(&handle)
            .ok_or(StoreError::UnknownRecord(handle))
    }

    /// Like `get` but refuses tombstones.
    pub fn live(&self, handle: ModelId) -> Result<&InternalModel> {
        let model = self.get(handle)?;
        if model.is_destroyed() {
            return Err(StoreError::RecordDestroyed(handle));
        }
        Ok(model)
    }

    pub fn live_mut(&mut self, handle: ModelId) -> Result<&mut InternalModel> {
        let model = self.get_mut(handle)?;
        if model.is_destroyed() {
            return Err(StoreError::RecordDestroyed(handle));
        }
        Ok(model)
    }

    /// Assign the id of a model, registering it in the identity map.
    ///
    /// An id never changes once assigned.
    pub fn update_id(&mut self, handle: ModelId, id: &str) -> Result<()> {
        let model = self.get_mut(handle)?;
        match model.id() {
            Some(existing) if existing == id => return Ok(()),
            Some(existing) => {
                return Err(StoreError::IdMismatch {
                    model: model.model_name().to_string(),
                    old: existing.to_string(),
                    new: id.to_string(),
                })
            }
            None => model.set_id(id.to_string()),
        }
        let key = (model.model_name().to_string(), id.to_string());
        self.identity.insert(key, handle);
        Ok(())
    }

    /// Remove a model from the identity map and per-type index, leaving a
    /// tombstone behind. Returns false if it was already destroyed.
    pub fn dematerialize(&mut self, handle: ModelId) -> Result<bool> {
        let model = self.get_mut(handle)?;
        if model.is_destroyed() {
            return Ok(false);
        }
        model.destroy();
        let name = model.model_name().to_string();
        if let Some(id) = model.id().map(str::to_string) {
            let key = (name.clone(), id);
            if self.identity.get(&key) == Some(&handle) {
                self.identity.remove(&key);
            }
        }
        if let Some(set) = self.by_type.get_mut(&name) {
            set.delete(&handle);
        }
        Ok(true)
    }

    /// Live models of a type, in creation order.
    pub fn records_of_type(&self, model_name: &str) -> Vec<ModelId> {
        self.by_type
            .get(model_name)
            .map(OrderedSet::to_vec)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InternalModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.by_type.values().map(OrderedSet::len).sum()
    }
}

impl ModelLookup for ModelTable {
    fn model_name(&self, handle: ModelId) -> Option<&str> {
        self.models.get(&handle).map(InternalModel::model_name)
    }

    fn is_new(&self, handle: ModelId) -> bool {
        self.models.get(&handle).map_or(false, InternalModel::is_new)
    }

    fn is_deleted(&self, handle: ModelId) -> bool {
        self.models.get(&handle).map_or(false, InternalModel::is_deleted)
    }

    fn is_live(&self, handle: ModelId) -> bool {
        self.models.get(&handle).map_or(false, |m| !m.is_destroyed())
    }
}
