//! Model schemas and inverse-relationship inference.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a declared relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

/// How the inverse of a relationship is determined.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum InverseSpec {
    /// Look for a single relationship on the target pointing back.
    #[default]
    Infer,
    /// The relationship is one-directional.
    None,
    /// The inverse is the named relationship on the target type.
    Key(String),
}

/// A declared attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub default: Option<serde_json::Value>,
}

/// Metadata for a declared relationship.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipMeta {
    pub key: String,
    pub kind: RelationshipKind,
    /// Target model name.
    pub target: String,
    pub inverse: InverseSpec,
    pub is_async: bool,
    pub polymorphic: bool,
}

impl RelationshipMeta {
    pub fn new(key: impl Into<String>, kind: RelationshipKind, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            target: target.into(),
            inverse: InverseSpec::Infer,
            is_async: false,
            polymorphic: false,
        }
    }

    /// Mark the relationship as asynchronous (fetched on access).
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn inverse(mut self, key: impl Into<String>) -> Self {
        self.inverse = InverseSpec::Key(key.into());
        self
    }

    pub fn no_inverse(mut self) -> Self {
        self.inverse = InverseSpec::None;
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }
}

/// Schema for one model type.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSchema {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
    pub relationships: Vec<RelationshipMeta>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn attr_with_default(mut self, name: impl Into<String>, default: serde_json::Value) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    pub fn belongs_to(self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipMeta::new(key, RelationshipKind::BelongsTo, target))
    }

    pub fn has_many(self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipMeta::new(key, RelationshipKind::HasMany, target))
    }

    /// Add a fully configured relationship.
    pub fn relationship(mut self, meta: RelationshipMeta) -> Self {
        self.relationships.push(meta);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship_meta(&self, key: &str) -> Option<&RelationshipMeta> {
        self.relationships.iter().find(|r| r.key == key)
    }

    pub fn is_relationship(&self, key: &str) -> bool {
        self.relationship_meta(key).is_some()
    }
}

/// Registered model schemas.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, ModelSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model schema.
    pub fn register(&mut self, schema: ModelSchema) {
        self.models.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, model: &str) -> Result<&ModelSchema> {
        self.models
            .get(model)
            .ok_or_else(|| StoreError::UnknownModelType(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn relationship(&self, model: &str, key: &str) -> Result<&RelationshipMeta> {
        self.get(model)?
            .relationship_meta(key)
            .ok_or_else(|| StoreError::UnknownRelationship {
                model: model.to_string(),
                key: key.to_string(),
            })
    }

    /// Find the inverse relationship key for `model.key`, if any.
    pub fn inverse_for(&self, model: &str, key: &str) -> Result<Option<String>> {
        let meta = self.relationship(model, key)?;
        match &meta.inverse {
            InverseSpec::None => return Ok(None),
            InverseSpec::Key(inverse) => {
                // Validate that the named inverse exists on the target.
                self.relationship(&meta.target, inverse)?;
                return Ok(Some(inverse.clone()));
            }
            InverseSpec::Infer => {}
        }

        let target = match self.models.get(&meta.target) {
            Some(t) => t,
            // Target registered later (or never): no inverse can be inferred.
            None => return Ok(None),
        };

        let mut candidates: Vec<&RelationshipMeta> = target
            .relationships
            .iter()
            .filter(|r| r.target == model)
            .filter(|r| !(target.name == model && r.key == key))
            .filter(|r| match &r.inverse {
                InverseSpec::Infer => true,
                InverseSpec::Key(k) => k == key,
                InverseSpec::None => false,
            })
            .collect();

        if candidates.is_empty() {
            return Ok(None);
        }

        let explicit: Vec<&RelationshipMeta> = candidates
            .iter()
            .copied()
            .filter(|r| r.inverse == InverseSpec::Key(key.to_string()))
            .collect();
        if explicit.len() == 1 {
            candidates = explicit;
        }

        if candidates.len() > 1 {
            return Err(StoreError::AmbiguousInverse {
                model: model.to_string(),
                key: key.to_string(),
                candidates: candidates.iter().map(|r| r.key.clone()).collect(),
            });
        }

        Ok(Some(candidates[0].key.clone()))
    }
}
