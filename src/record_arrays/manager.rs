//! Keeps live and filtered record arrays in sync with record changes.

use crate::error::{Result, StoreError};
use crate::model::{ModelTable, RecordView};
use crate::ordered_set::OrderedSet;
use crate::schema::SchemaRegistry;
use crate::state::RecordState;
use crate::types::{ArrayId, ModelId};
use std::collections::HashMap;

use super::record_array::{FilterFn, RecordArray, RecordArrayKind};

/// Owns every record array of a store.
#[derive(Debug, Default)]
pub struct RecordArrayManager {
    arrays: HashMap<ArrayId, RecordArray>,
    /// Live and filtered arrays, re-evaluated on record changes.
    filtered: HashMap<String, Vec<ArrayId>>,
    live: HashMap<String, ArrayId>,
    /// Query results; only shrink when a member is destroyed.
    populated: HashMap<String, Vec<ArrayId>>,
    /// Reverse index: arrays currently holding each record.
    containing: HashMap<ModelId, OrderedSet<ArrayId>>,
    /// Records changed since the last `update_record_arrays`.
    changed: OrderedSet<ModelId>,
    next_id: u64,
}

impl RecordArrayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, array: ArrayId) -> Result<&RecordArray> {
        self.arrays
            .get(&array)
            .ok_or(StoreError::UnknownRecordArray(array))
    }

    pub(crate) fn get_mut(&mut self, array: ArrayId) -> Result<&mut RecordArray> {
        self.arrays
            .get_mut(&array)
            .ok_or(StoreError::UnknownRecordArray(array))
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn live_array(&self, model_name: &str) -> Option<ArrayId> {
        self.live.get(model_name).copied()
    }

    /// Arrays currently holding `record`.
    pub fn arrays_for_record(&self, record: ModelId) -> Vec<ArrayId> {
        self.containing
            .get(&record)
            .map(OrderedSet::to_vec)
            .unwrap_or_default()
    }

    fn allocate(&mut self, model_name: &str, kind: RecordArrayKind) -> ArrayId {
        self.next_id += 1;
        let id = ArrayId(self.next_id);
        self.arrays.insert(id, RecordArray::new(id, model_name, kind));
        id
    }

    // --- Creation ---

    /// The live array of a type, created and populated on first use.
    pub fn live_record_array_for(
        &mut self,
        model_name: &str,
        models: &ModelTable,
        schema: &SchemaRegistry,
    ) -> ArrayId {
        if let Some(id) = self.live.get(model_name) {
            return *id;
        }
        let id = self.allocate(model_name, RecordArrayKind::Live);
        self.live.insert(model_name.to_string(), id);
        self.filtered
            .entry(model_name.to_string())
            .or_default()
            .push(id);
        self.update_filter(id, models, schema);
        tracing::debug!(model = model_name, array = id.0, "created live record array");
        id
    }

    /// Register a filtered array and populate it.
    pub fn create_filtered(
        &mut self,
        model_name: &str,
        filter: FilterFn,
        models: &ModelTable,
        schema: &SchemaRegistry,
    ) -> ArrayId {
        let id = self.allocate(model_name, RecordArrayKind::Filtered);
        if let Some(array) = self.arrays.get_mut(&id) {
            array.set_filter(Some(filter));
        }
        self.filtered
            .entry(model_name.to_string())
            .or_default()
            .push(id);
        self.update_filter(id, models, schema);
        tracing::debug!(model = model_name, array = id.0, "created filtered record array");
        id
    }

    pub fn create_adapter_populated(&mut self, model_name: &str, query: serde_json::Value) -> ArrayId {
        let id = self.allocate(model_name, RecordArrayKind::AdapterPopulated { query });
        self.populated
            .entry(model_name.to_string())
            .or_default()
            .push(id);
        id
    }

    /// Fill an adapter-populated array with a query result.
    pub fn load_records(
        &mut self,
        array_id: ArrayId,
        records: &[ModelId],
        meta: Option<serde_json::Value>,
    ) -> Result<()> {
        let array = self
            .arrays
            .get_mut(&array_id)
            .ok_or(StoreError::UnknownRecordArray(array_id))?;
        let previous = array.replace_content(records);
        array.set_loaded(true);
        array.set_updating(false);
        array.set_meta(meta);
        for record in previous {
            if let Some(set) = self.containing.get_mut(&record) {
                set.delete(&array_id);
            }
        }
        for record in records {
            self.containing.entry(*record).or_default().add(array_id);
        }
        Ok(())
    }

    pub fn set_filter(&mut self, array_id: ArrayId, filter: Option<FilterFn>) -> Result<()> {
        let array = self.get_mut(array_id)?;
        if array.query().is_some() {
            return Err(StoreError::InvalidOperation(
                "cannot filter an adapter-populated record array".into(),
            ));
        }
        array.set_filter(filter);
        Ok(())
    }

    /// Forget an array and its reverse-index entries.
    pub fn unregister(&mut self, array_id: ArrayId) -> Result<()> {
        let array = self
            .arrays
            .remove(&array_id)
            .ok_or(StoreError::UnknownRecordArray(array_id))?;
        let name = array.model_name();
        for index in [&mut self.filtered, &mut self.populated] {
            if let Some(ids) = index.get_mut(name) {
                ids.retain(|id| *id != array_id);
            }
        }
        if self.live.get(name) == Some(&array_id) {
            self.live.remove(name);
        }
        for record in array.records() {
            if let Some(set) = self.containing.get_mut(record) {
                set.delete(&array_id);
            }
        }
        Ok(())
    }

    // --- Change propagation ---

    /// Note that `record` changed. Returns true when it was not already
    /// waiting, i.e. when a new update pass needs scheduling.
    pub fn record_did_change(&mut self, record: ModelId) -> bool {
        let first = self.changed.is_empty();
        self.changed.add(record) && first
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Re-evaluate every changed record. Returns the arrays whose content
    /// changed.
    pub fn update_record_arrays(&mut self, models: &ModelTable, schema: &SchemaRegistry) -> Vec<ArrayId> {
        let changed = std::mem::take(&mut self.changed);
        let mut touched = OrderedSet::new();
        for record in changed.iter().copied() {
            let gone = models.get(record).map_or(true, |m| {
                m.is_destroyed() || m.current_state() == RecordState::DeletedSaved
            });
            let arrays = if gone {
                self.remove_record(record)
            } else {
                self.record_was_changed(record, models, schema)
            };
            for array in arrays {
                touched.add(array);
            }
        }
        tracing::trace!(records = changed.len(), arrays = touched.len(), "updated record arrays");
        touched.to_vec()
    }

    fn record_was_changed(
        &mut self,
        record: ModelId,
        models: &ModelTable,
        schema: &SchemaRegistry,
    ) -> Vec<ArrayId> {
        let Ok(model) = models.get(record) else {
            return Vec::new();
        };
        let candidates = self
            .filtered
            .get(model.model_name())
            .cloned()
            .unwrap_or_default();
        candidates
            .into_iter()
            .filter(|array| self.update_record_array(*array, record, models, schema))
            .collect()
    }

    /// Add or remove `record` from one array according to its predicate.
    /// Returns true if membership changed.
    pub fn update_record_array(
        &mut self,
        array_id: ArrayId,
        record: ModelId,
        models: &ModelTable,
        schema: &SchemaRegistry,
    ) -> bool {
        let Ok(model) = models.get(record) else {
            return false;
        };
        let Ok(model_schema) = schema.get(model.model_name()) else {
            return false;
        };
        let Some(array) = self.arrays.get_mut(&array_id) else {
            return false;
        };
        let view = RecordView::new(model, model_schema);
        let has_data =
            !(model.is_destroyed() || model.is_deleted() || model.is_empty() || model.is_loading());
        let should_be_in_array = has_data && array.accepts(&view);

        if should_be_in_array {
            if !array.add_record(record) {
                return false;
            }
            self.containing.entry(record).or_default().add(array_id);
        } else {
            if !array.remove_record(record) {
                return false;
            }
            if let Some(set) = self.containing.get_mut(&record) {
                set.delete(&array_id);
            }
        }
        true
    }

    /// Rescan every record of the array's type. Used on creation and when
    /// the predicate changes.
    pub fn update_filter(&mut self, array_id: ArrayId, models: &ModelTable, schema: &SchemaRegistry) -> bool {
        let Some(name) = self.arrays.get(&array_id).map(|a| a.model_name().to_string()) else {
            return false;
        };
        let mut changed = false;
        for record in models.records_of_type(&name) {
            let skip = models
                .get(record)
                .map_or(true, |m| m.is_deleted() || m.is_empty());
            if skip {
                // Still evict records that stopped qualifying.
                let present = self
                    .arrays
                    .get(&array_id)
                    .map_or(false, |a| a.contains(record));
                if !present {
                    continue;
                }
            }
            changed |= self.update_record_array(array_id, record, models, schema);
        }
        changed
    }

    /// Drop `record` from every array holding it.
    pub fn remove_record(&mut self, record: ModelId) -> Vec<ArrayId> {
        self.changed.delete(&record);
        let Some(arrays) = self.containing.remove(&record) else {
            return Vec::new();
        };
        arrays
            .iter()
            .copied()
            .filter(|id| {
                self.arrays
                    .get_mut(id)
                    .map_or(false, |array| array.remove_record(record))
            })
            .collect()
    }
}
