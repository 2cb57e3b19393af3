//! Record creation, attribute access and the local lifecycle operations.

use crate::error::{Result, StoreError};
use crate::model::{AttributeChange, ModelLookup, RecordErrors, RecordView, Snapshot, SnapshotRelationship};
use crate::relationships::EdgeKey;
use crate::schema::RelationshipKind;
use crate::state::{RecordEvent, RecordState, StateFlags};
use crate::types::{coerce_id, AttrMap, FetchTicket, ModelId, ResourceRef};
use serde_json::Value;
use std::collections::BTreeMap;

use super::Store;

/// A value assigned by `create_record` or `set_properties`.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// An attribute value, or raw ids for a relationship.
    Value(Value),
    Record(Option<ModelId>),
    Records(Vec<ModelId>),
}

/// Initial properties of a record, keyed by attribute or relationship name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), PropertyValue::Value(value));
        self
    }

    pub fn record(mut self, key: impl Into<String>, record: Option<ModelId>) -> Self {
        self.0.insert(key.into(), PropertyValue::Record(record));
        self
    }

    pub fn records(mut self, key: impl Into<String>, records: Vec<ModelId>) -> Self {
        self.0.insert(key.into(), PropertyValue::Records(records));
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Plain attribute values, for id generation.
    fn attribute_values(&self) -> AttrMap {
        self.0
            .iter()
            .filter_map(|(key, value)| match value {
                PropertyValue::Value(v) => Some((key.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }
}

impl From<Value> for Properties {
    /// Every key of a JSON object becomes a plain value; anything else is
    /// empty.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(
                map.into_iter()
                    .map(|(k, v)| (k, PropertyValue::Value(v)))
                    .collect(),
            ),
            _ => Self::default(),
        }
    }
}

impl IntoIterator for Properties {
    type Item = (String, PropertyValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A property checked against the schema.
pub(super) enum Assignment {
    Attribute(Value),
    BelongsTo(Option<ModelId>),
    HasMany(Vec<ModelId>),
}

impl Store {
    // --- Identity ---

    /// The record for `(model, id)`, creating an empty one if unknown.
    pub fn record_for_id(&mut self, model_name: &str, id: &str) -> Result<ModelId> {
        self.schema.get(model_name)?;
        if let Some(handle) = self.models.lookup(model_name, id) {
            return Ok(handle);
        }
        let handle = self.models.build(model_name, Some(id.to_string()));
        tracing::trace!(model = model_name, id, record = handle.0, "built record");
        Ok(handle)
    }

    /// Whether a loaded record exists for `(model, id)`.
    pub fn has_record_for_id(&self, model_name: &str, id: &str) -> bool {
        self.peek_record(model_name, id).is_some()
    }

    /// The record for `(model, id)` if it is loaded; never fetches.
    pub fn peek_record(&self, model_name: &str, id: &str) -> Option<ModelId> {
        let handle = self.models.lookup(model_name, id)?;
        self.models
            .get(handle)
            .ok()
            .filter(|m| m.is_loaded())
            .map(|_| handle)
    }

    // --- Creation ---

    /// Create a new, unsaved record. An `id` property (or an adapter
    /// generated id) is registered immediately.
    pub fn create_record(&mut self, model_name: &str, properties: Properties) -> Result<ModelId> {
        self.schema.get(model_name)?;
        let mut id = match properties.get("id") {
            Some(PropertyValue::Value(value)) => coerce_id(value),
            _ => None,
        };
        if id.is_none() && self.registry.has_adapter(model_name) {
            let adapter = self.registry.adapter_for(model_name)?;
            id = adapter.generate_id_for_record(model_name, &properties.attribute_values());
        }
        if let Some(id) = &id {
            if self.models.lookup(model_name, id).is_some() {
                return Err(StoreError::InvalidOperation(format!(
                    "The id {} has already been used with another record for type {}",
                    id, model_name
                )));
            }
        }

        self.join(|store| {
            let handle = store.models.build(model_name, id);
            store.models.live_mut(handle)?.materialize();
            store.send(handle, RecordEvent::LoadedData)?;
            store.set_properties(handle, properties)?;
            tracing::debug!(model = model_name, record = handle.0, "created record");
            Ok(handle)
        })
    }

    /// Assign attributes and relationships in one unit.
    pub fn set_properties(&mut self, handle: ModelId, properties: Properties) -> Result<()> {
        let model_name = self.models.live(handle)?.model_name().to_string();
        self.join(|store| {
            for (key, value) in properties {
                if key == "id" {
                    continue;
                }
                match store.resolve_property(&model_name, &key, value)? {
                    Assignment::Attribute(value) => store.set_attr(handle, &key, value)?,
                    Assignment::BelongsTo(target) => store.set_belongs_to(handle, &key, target)?,
                    Assignment::HasMany(records) => store.replace_has_many(handle, &key, &records)?,
                }
            }
            Ok(())
        })
    }

    /// Check a property against the schema and resolve raw references.
    pub(super) fn resolve_property(
        &mut self,
        model_name: &str,
        key: &str,
        value: PropertyValue,
    ) -> Result<Assignment> {
        let schema = self.schema.get(model_name)?;
        if schema.attribute(key).is_some() {
            return match value {
                PropertyValue::Value(value) => Ok(Assignment::Attribute(value)),
                _ => Err(StoreError::InvalidOperation(format!(
                    "{}.{} is an attribute, not a relationship",
                    model_name, key
                ))),
            };
        }
        if !schema.is_relationship(key) {
            return Err(StoreError::UnknownAttribute {
                model: model_name.to_string(),
                key: key.to_string(),
            });
        }
        let meta = self.schema.relationship(model_name, key)?.clone();
        match (meta.kind, value) {
            (RelationshipKind::BelongsTo, PropertyValue::Record(target)) => Ok(Assignment::BelongsTo(target)),
            (RelationshipKind::BelongsTo, PropertyValue::Value(raw)) => {
                Ok(Assignment::BelongsTo(self.resolve_reference(&meta, &raw)?))
            }
            (RelationshipKind::HasMany, PropertyValue::Records(records)) => Ok(Assignment::HasMany(records)),
            (RelationshipKind::HasMany, PropertyValue::Value(raw)) => {
                Ok(Assignment::HasMany(self.resolve_references(&meta, &raw)?))
            }
            (kind, _) => Err(StoreError::InvalidOperation(format!(
                "wrong value kind for {:?} relationship {}.{}",
                kind, model_name, key
            ))),
        }
    }

    fn replace_has_many(&mut self, handle: ModelId, key: &str, records: &[ModelId]) -> Result<()> {
        let len = self.many_array(handle, key)?.len();
        self.has_many_replace(handle, key, 0, len, records)
    }

    // --- Attributes ---

    /// Write an attribute. Writing the visible value again is a no-op.
    pub fn set_attr(&mut self, handle: ModelId, name: &str, value: Value) -> Result<()> {
        let model = self.models.live(handle)?;
        let schema = self.schema.get(model.model_name())?;
        let def = schema
            .attribute(name)
            .ok_or_else(|| StoreError::UnknownAttribute {
                model: model.model_name().to_string(),
                key: name.to_string(),
            })?;
        let Some(change) = model.property_change(name, &value, def.default.as_ref()) else {
            return Ok(());
        };
        let event = RecordEvent::DidSetProperty(change);
        self.check_event(handle, &event)?;

        self.models.live_mut(handle)?.write_attribute(name, value);
        self.send(handle, event)?;
        self.notify_properties(handle, vec![name.to_string()]);
        Ok(())
    }

    /// Visible value of an attribute, falling back to its default.
    pub fn attr(&self, handle: ModelId, name: &str) -> Result<Option<Value>> {
        let view = self.record(handle)?;
        Ok(view.attr(name).cloned())
    }

    /// `(original, current)` for every attribute with an uncommitted or
    /// in-flight change.
    pub fn changed_attributes(&self, handle: ModelId) -> Result<BTreeMap<String, AttributeChange>> {
        Ok(self.models.get(handle)?.changed_attributes())
    }

    // --- Lifecycle ---

    /// Mark a record deleted. A new record goes straight to `deleted.saved`.
    pub fn delete_record(&mut self, handle: ModelId) -> Result<()> {
        self.models.live(handle)?;
        self.join(|store| store.send(handle, RecordEvent::DeleteRecord))
    }

    /// Delete, then save.
    pub fn destroy_record(&mut self, handle: ModelId) -> Result<FetchTicket> {
        self.delete_record(handle)?;
        self.save_record(handle)
    }

    /// Discard uncommitted edits. A new record is removed entirely and a
    /// deleted one is restored.
    pub fn rollback(&mut self, handle: ModelId) -> Result<()> {
        self.join(|store| {
            let model = store.models.live_mut(handle)?;
            let is_new = model.is_new();
            let dirty = model.rollback_attributes();
            if is_new {
                store.with_graph(|graph, ctx| graph.clear_record(ctx, handle))?;
            }
            store.send(handle, RecordEvent::RolledBack)?;
            store.notify_properties(handle, dirty);
            Ok(())
        })
    }

    /// Remove a record from the store. Unloading a destroyed record is a
    /// no-op; unloading one with a save in flight is refused.
    pub fn unload_record(&mut self, handle: ModelId) -> Result<()> {
        if !self.models.is_live(handle) {
            self.models.get(handle)?;
            return Ok(());
        }
        tracing::debug!(record = handle.0, "unloading record");
        self.join(|store| store.send(handle, RecordEvent::UnloadRecord))
    }

    /// Unload every record of a type, or of every type.
    pub fn unload_all(&mut self, model_name: Option<&str>) -> Result<()> {
        let names = match model_name {
            Some(name) => {
                self.schema.get(name)?;
                vec![name.to_string()]
            }
            None => self.schema.model_names(),
        };
        for name in names {
            for handle in self.models.records_of_type(&name) {
                self.unload_record(handle)?;
            }
            self.type_meta.remove(&name);
        }
        Ok(())
    }

    /// Refetch a loaded record. Returns its loading ticket.
    pub fn reload_record(&mut self, handle: ModelId) -> Result<FetchTicket> {
        self.models.live(handle)?;
        self.send(handle, RecordEvent::ReloadRecord)?;
        self.models
            .get(handle)?
            .loading_ticket()
            .ok_or_else(|| StoreError::InvalidOperation("reload did not schedule a fetch".into()))
    }

    // --- Reads ---

    pub fn state(&self, handle: ModelId) -> Result<RecordState> {
        Ok(self.models.get(handle)?.current_state())
    }

    pub fn flags(&self, handle: ModelId) -> Result<StateFlags> {
        Ok(self.models.get(handle)?.flags())
    }

    pub fn errors(&self, handle: ModelId) -> Result<&RecordErrors> {
        Ok(self.models.get(handle)?.errors())
    }

    pub fn is_error(&self, handle: ModelId) -> Result<bool> {
        Ok(self.models.get(handle)?.is_error())
    }

    pub fn is_destroyed(&self, handle: ModelId) -> Result<bool> {
        Ok(self.models.get(handle)?.is_destroyed())
    }

    /// Materialized read view of a record.
    pub fn record(&self, handle: ModelId) -> Result<RecordView<'_>> {
        let model = self.models.get(handle)?;
        let schema = self.schema.get(model.model_name())?;
        Ok(RecordView::new(model, schema))
    }

    fn resource_ref(&self, handle: ModelId) -> Option<ResourceRef> {
        let model = self.models.get(handle).ok()?;
        Some(ResourceRef::new(model.model_name(), model.id()?))
    }

    /// Point-in-time copy of a record for adapters. Relationships whose
    /// membership is unknown are left out.
    pub fn snapshot(&self, handle: ModelId) -> Result<Snapshot> {
        let view = self.record(handle)?;
        let schema = self.schema.get(view.model_name())?;
        let mut relationships = BTreeMap::new();
        for meta in &schema.relationships {
            let Some(rel) = self.graph.get(handle, &EdgeKey::declared(meta.key.as_str())) else {
                continue;
            };
            if !rel.has_data() {
                continue;
            }
            let value = match meta.kind {
                RelationshipKind::BelongsTo => {
                    SnapshotRelationship::BelongsTo(rel.target().and_then(|t| self.resource_ref(t)))
                }
                RelationshipKind::HasMany => SnapshotRelationship::HasMany(
                    rel.many_array()
                        .map(|array| {
                            array
                                .records()
                                .iter()
                                .filter_map(|r| self.resource_ref(*r))
                                .collect()
                        })
                        .unwrap_or_default(),
                ),
            };
            relationships.insert(meta.key.clone(), value);
        }
        Ok(Snapshot {
            handle,
            model_name: view.model_name().to_string(),
            id: view.id().map(str::to_string),
            attributes: view.attributes(),
            relationships,
        })
    }
}
