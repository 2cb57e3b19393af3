//! The per-record controller.
//!
//! An `InternalModel` owns the three attribute layers, the current state
//! node, validation errors and the loading ticket. It never reaches into
//! other records: effects that cross records (relationships, record arrays)
//! are applied by the store.

use crate::error::FieldErrors;
use crate::state::{LifecycleEvent, PropertyChange, RecordState, StateFlags};
use crate::types::{AttrMap, FetchTicket, ModelId};
use std::collections::BTreeMap;

use super::errors::RecordErrors;

/// `(original, current)` pair for a changed attribute.
pub type AttributeChange = (Option<serde_json::Value>, Option<serde_json::Value>);

/// Authoritative record state for one `(type, id)` identity.
#[derive(Clone, Debug)]
pub struct InternalModel {
    handle: ModelId,
    model_name: String,
    id: Option<String>,
    current_state: RecordState,
    /// Last server-confirmed values.
    data: AttrMap,
    /// Uncommitted local edits.
    attributes: AttrMap,
    /// Edits currently being persisted.
    in_flight_attributes: AttrMap,
    errors: RecordErrors,
    is_error: bool,
    adapter_error: Option<String>,
    is_reloading: bool,
    is_materialized: bool,
    is_destroyed: bool,
    loading_ticket: Option<FetchTicket>,
    deferred_triggers: Vec<LifecycleEvent>,
}

impl InternalModel {
    pub fn new(handle: ModelId, model_name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            handle,
            model_name: model_name.into(),
            id,
            current_state: RecordState::Empty,
            data: AttrMap::new(),
            attributes: AttrMap::new(),
            in_flight_attributes: AttrMap::new(),
            errors: RecordErrors::new(),
            is_error: false,
            adapter_error: None,
            is_reloading: false,
            is_materialized: false,
            is_destroyed: false,
            loading_ticket: None,
            deferred_triggers: Vec::new(),
        }
    }

    pub fn handle(&self) -> ModelId {
        self.handle
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub fn current_state(&self) -> RecordState {
        self.current_state
    }

    pub(crate) fn set_current_state(&mut self, state: RecordState) {
        self.current_state = state;
    }

    pub fn flags(&self) -> StateFlags {
        self.current_state.flags()
    }

    pub fn is_empty(&self) -> bool {
        self.flags().is_empty
    }

    pub fn is_loading(&self) -> bool {
        self.flags().is_loading
    }

    pub fn is_loaded(&self) -> bool {
        self.flags().is_loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().is_dirty
    }

    pub fn is_new(&self) -> bool {
        self.flags().is_new
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().is_deleted
    }

    pub fn is_valid(&self) -> bool {
        self.flags().is_valid
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn adapter_error(&self) -> Option<&str> {
        self.adapter_error.as_deref()
    }

    pub fn is_reloading(&self) -> bool {
        self.is_reloading
    }

    pub(crate) fn set_reloading(&mut self, reloading: bool) {
        self.is_reloading = reloading;
    }

    pub fn is_materialized(&self) -> bool {
        self.is_materialized
    }

    pub(crate) fn materialize(&mut self) {
        self.is_materialized = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.is_destroyed
    }

    // --- Attributes ---

    /// Visible value: local edit, then in-flight edit, then confirmed data.
    pub fn attr(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes
            .get(name)
            .or_else(|| self.in_flight_attributes.get(name))
            .or_else(|| self.data.get(name))
    }

    pub fn data(&self) -> &AttrMap {
        &self.data
    }

    pub fn local_attributes(&self) -> &AttrMap {
        &self.attributes
    }

    pub fn in_flight_attributes(&self) -> &AttrMap {
        &self.in_flight_attributes
    }

    pub fn has_changed_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Change context for writing `value`, or `None` when the visible value
    /// (falling back to `default`) already equals it.
    ///
    /// The original value is the in-flight one while a save is running, so
    /// writing back the last confirmed value still counts as an edit.
    pub fn property_change(
        &self,
        name: &str,
        value: &serde_json::Value,
        default: Option<&serde_json::Value>,
    ) -> Option<PropertyChange> {
        let old_value = self.attr(name).or(default).cloned();
        if old_value.as_ref() == Some(value) {
            return None;
        }
        Some(PropertyChange {
            name: name.to_string(),
            old_value,
            original_value: self
                .in_flight_attributes
                .get(name)
                .or_else(|| self.data.get(name))
                .cloned(),
            value: value.clone(),
        })
    }

    /// Stage a local edit.
    pub(crate) fn write_attribute(&mut self, name: &str, value: serde_json::Value) {
        self.attributes.insert(name.to_string(), value);
    }

    pub(crate) fn delete_local_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    /// Diff of confirmed data against in-flight plus local edits.
    pub fn changed_attributes(&self) -> BTreeMap<String, AttributeChange> {
        let mut current = self.in_flight_attributes.clone();
        current.extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        current
            .into_iter()
            .map(|(key, value)| {
                let original = self.data.get(&key).cloned();
                (key, (original, Some(value)))
            })
            .collect()
    }

    /// Drop local edits that now equal the confirmed value.
    pub(crate) fn update_changed_attributes(&mut self) {
        let unchanged: Vec<String> = self
            .changed_attributes()
            .into_iter()
            .filter(|(_, (old, new))| old == new)
            .map(|(key, _)| key)
            .collect();
        for key in unchanged {
            self.attributes.remove(&key);
        }
    }

    /// Keys whose visible value would change if `updates` were merged.
    ///
    /// Keys with a local edit are skipped: server data never overrides them.
    pub fn changed_keys(&self, updates: &AttrMap) -> Vec<String> {
        updates
            .iter()
            .filter(|(key, _)| !self.attributes.contains_key(*key))
            .filter(|(key, value)| {
                let original = self
                    .in_flight_attributes
                    .get(*key)
                    .or_else(|| self.data.get(*key));
                original != Some(*value)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Merge pushed attributes into confirmed data, returning changed keys.
    pub(crate) fn merge_data(&mut self, updates: &AttrMap) -> Vec<String> {
        let changed = self.changed_keys(updates);
        self.data
            .extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        changed
    }

    /// Out-of-band attribute seeding before a fetch completes.
    pub(crate) fn preload_attribute(&mut self, name: &str, value: serde_json::Value) {
        self.data.insert(name.to_string(), value);
    }

    /// Move local edits into the in-flight layer at the start of a save.
    pub(crate) fn flush_changed_attributes(&mut self) {
        let pending = std::mem::take(&mut self.attributes);
        self.in_flight_attributes.extend(pending);
    }

    /// Return in-flight edits to the local layer after a rejected save.
    ///
    /// Edits made while the save was in flight win over the rejected ones.
    pub(crate) fn save_was_rejected(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight_attributes);
        for (key, value) in in_flight {
            self.attributes.entry(key).or_insert(value);
        }
    }

    /// Server acknowledged the save: promote in-flight edits then merge any
    /// returned data. Returns the keys whose visible value changed.
    pub(crate) fn adapter_did_commit(&mut self, data: Option<&AttrMap>) -> Vec<String> {
        self.did_clean_error();
        let changed = data.map(|d| self.changed_keys(d)).unwrap_or_default();
        let in_flight = std::mem::take(&mut self.in_flight_attributes);
        self.data.extend(in_flight);
        if let Some(data) = data {
            self.data
                .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        changed
    }

    /// Discard local edits. Returns the keys that were dirty.
    pub(crate) fn rollback_attributes(&mut self) -> Vec<String> {
        let dirty: Vec<String> = self.attributes.keys().cloned().collect();
        if self.is_error {
            self.in_flight_attributes.clear();
            self.did_clean_error();
        }
        if self.is_valid() {
            self.in_flight_attributes.clear();
        }
        self.attributes.clear();
        dirty
    }

    // --- Errors ---

    pub fn errors(&self) -> &RecordErrors {
        &self.errors
    }

    pub(crate) fn add_error_messages(&mut self, errors: &FieldErrors) {
        for (attribute, messages) in errors {
            self.errors.add(attribute.clone(), messages.clone());
        }
    }

    /// Returns true when the last error was removed.
    pub(crate) fn remove_error_message(&mut self, attribute: &str) -> bool {
        self.errors.remove(attribute) && self.errors.is_empty()
    }

    pub(crate) fn clear_error_messages(&mut self) {
        self.errors.clear();
    }

    pub(crate) fn did_error(&mut self, message: String) {
        self.is_error = true;
        self.adapter_error = Some(message);
    }

    pub(crate) fn did_clean_error(&mut self) {
        self.is_error = false;
        self.adapter_error = None;
    }

    // --- Bookkeeping ---

    pub fn loading_ticket(&self) -> Option<FetchTicket> {
        self.loading_ticket
    }

    pub(crate) fn set_loading_ticket(&mut self, ticket: Option<FetchTicket>) {
        self.loading_ticket = ticket;
    }

    pub(crate) fn trigger_later(&mut self, event: LifecycleEvent) {
        self.deferred_triggers.push(event);
    }

    pub(crate) fn take_deferred_triggers(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.deferred_triggers)
    }

    /// Turn the model into a tombstone.
    pub(crate) fn destroy(&mut self) {
        self.is_destroyed = true;
        self.is_materialized = false;
        self.loading_ticket = None;
        self.attributes.clear();
        self.in_flight_attributes.clear();
    }
}
