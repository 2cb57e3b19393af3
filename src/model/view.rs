//! Materialized read view of a record.

use crate::model::{InternalModel, RecordErrors};
use crate::schema::ModelSchema;
use crate::state::{RecordState, StateFlags};
use crate::types::{AttrMap, ModelId};

/// What consumers (and filter predicates) see of a record.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    model: &'a InternalModel,
    schema: &'a ModelSchema,
}

impl<'a> RecordView<'a> {
    pub fn new(model: &'a InternalModel, schema: &'a ModelSchema) -> Self {
        Self { model, schema }
    }

    pub fn handle(&self) -> ModelId {
        self.model.handle()
    }

    pub fn model_name(&self) -> &'a str {
        self.model.model_name()
    }

    pub fn id(&self) -> Option<&'a str> {
        self.model.id()
    }

    pub fn state(&self) -> RecordState {
        self.model.current_state()
    }

    pub fn flags(&self) -> StateFlags {
        self.model.flags()
    }

    pub fn is_dirty(&self) -> bool {
        self.model.is_dirty()
    }

    pub fn is_new(&self) -> bool {
        self.model.is_new()
    }

    pub fn is_deleted(&self) -> bool {
        self.model.is_deleted()
    }

    pub fn is_error(&self) -> bool {
        self.model.is_error()
    }

    /// Visible value of an attribute, falling back to its declared default.
    pub fn attr(&self, name: &str) -> Option<&'a serde_json::Value> {
        self.model.attr(name).or_else(|| {
            self.schema
                .attribute(name)
                .and_then(|def| def.default.as_ref())
        })
    }

    /// Every declared attribute that currently has a value.
    pub fn attributes(&self) -> AttrMap {
        self.schema
            .attributes
            .iter()
            .filter_map(|def| {
                self.attr(&def.name)
                    .map(|value| (def.name.clone(), value.clone()))
            })
            .collect()
    }

    pub fn errors(&self) -> &'a RecordErrors {
        self.model.errors()
    }
}

impl std::fmt::Debug for RecordView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordView")
            .field("type", &self.model_name())
            .field("id", &self.id())
            .field("state", &self.state().path())
            .finish()
    }
}
