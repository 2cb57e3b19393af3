//! Immutable point-in-time record views handed to adapters.

use crate::schema::RelationshipKind;
use crate::types::{AttrMap, ModelId, ResourceRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// A captured relationship value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SnapshotRelationship {
    BelongsTo(Option<ResourceRef>),
    HasMany(Vec<ResourceRef>),
}

impl SnapshotRelationship {
    pub fn kind(&self) -> RelationshipKind {
        match self {
            SnapshotRelationship::BelongsTo(_) => RelationshipKind::BelongsTo,
            SnapshotRelationship::HasMany(_) => RelationshipKind::HasMany,
        }
    }
}

/// Read-only copy of a record's attributes and relationship references.
///
/// Later local edits never show up in a snapshot that was already taken.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(skip)]
    pub handle: ModelId,
    #[serde(rename = "type")]
    pub model_name: String,
    pub id: Option<String>,
    pub attributes: AttrMap,
    /// Only relationships whose data is known are captured.
    pub relationships: BTreeMap<String, SnapshotRelationship>,
}

impl Snapshot {
    pub fn attr(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// `None` when the relationship is unknown or not a belongs-to;
    /// `Some(None)` when it is known to be empty.
    pub fn belongs_to(&self, key: &str) -> Option<Option<&ResourceRef>> {
        match self.relationships.get(key)? {
            SnapshotRelationship::BelongsTo(r) => Some(r.as_ref()),
            SnapshotRelationship::HasMany(_) => None,
        }
    }

    pub fn belongs_to_id(&self, key: &str) -> Option<&str> {
        self.belongs_to(key).flatten().map(|r| r.id.as_str())
    }

    pub fn has_many(&self, key: &str) -> Option<&[ResourceRef]> {
        match self.relationships.get(key)? {
            SnapshotRelationship::HasMany(refs) => Some(refs),
            SnapshotRelationship::BelongsTo(_) => None,
        }
    }

    pub fn each_attribute<F: FnMut(&str, &serde_json::Value)>(&self, mut f: F) {
        for (name, value) in &self.attributes {
            f(name, value);
        }
    }

    pub fn each_relationship<F: FnMut(&str, &SnapshotRelationship)>(&self, mut f: F) {
        for (key, value) in &self.relationships {
            f(key, value);
        }
    }

    pub fn resource_ref(&self) -> Option<ResourceRef> {
        self.id
            .as_ref()
            .map(|id| ResourceRef::new(self.model_name.clone(), id.clone()))
    }
}
