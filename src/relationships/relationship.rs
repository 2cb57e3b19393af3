//! A single relationship edge.

use crate::error::{Result, StoreError};
use crate::model::ModelLookup;
use crate::ordered_set::OrderedSet;
use crate::schema::{RelationshipKind, SchemaRegistry};
use crate::types::{FetchTicket, ModelId};

use super::belongs_to::BelongsToState;
use super::has_many::HasManyState;
use super::EdgeKey;

/// Kind-specific state of an edge.
#[derive(Clone, Debug)]
pub enum EdgeKind {
    Implicit,
    BelongsTo(BelongsToState),
    HasMany(HasManyState),
}

/// Local and canonical membership of one edge.
#[derive(Clone, Debug)]
pub struct Relationship {
    pub(crate) owner: ModelId,
    pub(crate) owner_type: String,
    pub(crate) key: EdgeKey,
    /// Edge on the other record pointing back here.
    pub(crate) inverse: EdgeKey,
    pub(crate) is_async: bool,
    pub(crate) members: OrderedSet<ModelId>,
    pub(crate) canonical_members: OrderedSet<ModelId>,
    /// True once the membership is known, even if empty.
    pub(crate) has_data: bool,
    pub(crate) has_loaded: bool,
    pub(crate) link: Option<String>,
    pub(crate) link_ticket: Option<FetchTicket>,
    pub(crate) kind: EdgeKind,
}

impl Relationship {
    /// Build the edge `key` for `owner` from the schema.
    pub(crate) fn build(
        schema: &SchemaRegistry,
        owner: ModelId,
        owner_type: &str,
        key: &EdgeKey,
    ) -> Result<Self> {
        let (inverse, is_async, kind) = match key {
            EdgeKey::Declared(name) => {
                let meta = schema.relationship(owner_type, name)?;
                let inverse = match schema.inverse_for(owner_type, name)? {
                    Some(inverse) => EdgeKey::Declared(inverse),
                    None => EdgeKey::Implicit {
                        owner_type: owner_type.to_string(),
                        key: name.clone(),
                    },
                };
                let kind = match meta.kind {
                    RelationshipKind::BelongsTo => EdgeKind::BelongsTo(BelongsToState::default()),
                    RelationshipKind::HasMany => {
                        EdgeKind::HasMany(HasManyState::new(owner, name.clone()))
                    }
                };
                (inverse, meta.is_async, kind)
            }
            EdgeKey::Implicit { key: name, .. } => {
                (EdgeKey::Declared(name.clone()), false, EdgeKind::Implicit)
            }
        };
        Ok(Self {
            owner,
            owner_type: owner_type.to_string(),
            key: key.clone(),
            inverse,
            is_async,
            members: OrderedSet::new(),
            canonical_members: OrderedSet::new(),
            has_data: false,
            has_loaded: false,
            link: None,
            link_ticket: None,
            kind,
        })
    }

    /// The edge on `member` that mirrors this one.
    ///
    /// A declared inverse the member's type does not have (polymorphic
    /// targets) falls back to an implicit edge.
    pub(crate) fn inverse_on<M: ModelLookup>(
        &self,
        schema: &SchemaRegistry,
        models: &M,
        member: ModelId,
    ) -> EdgeKey {
        match (&self.inverse, &self.key) {
            (EdgeKey::Declared(inverse), EdgeKey::Declared(own)) => {
                let declared = models
                    .model_name(member)
                    .and_then(|name| schema.get(name).ok())
                    .map_or(false, |s| s.is_relationship(inverse));
                if declared {
                    self.inverse.clone()
                } else {
                    EdgeKey::Implicit {
                        owner_type: self.owner_type.clone(),
                        key: own.clone(),
                    }
                }
            }
            _ => self.inverse.clone(),
        }
    }

    pub fn owner(&self) -> ModelId {
        self.owner
    }

    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    pub fn inverse_key(&self) -> &EdgeKey {
        &self.inverse
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn members(&self) -> &[ModelId] {
        self.members.as_slice()
    }

    pub fn canonical_members(&self) -> &[ModelId] {
        self.canonical_members.as_slice()
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn has_loaded(&self) -> bool {
        self.has_loaded
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn link_ticket(&self) -> Option<FetchTicket> {
        self.link_ticket
    }

    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    /// Current belongs-to target.
    pub fn target(&self) -> Option<ModelId> {
        match &self.kind {
            EdgeKind::BelongsTo(state) => state.inverse_record,
            _ => None,
        }
    }

    pub fn canonical_target(&self) -> Option<ModelId> {
        match &self.kind {
            EdgeKind::BelongsTo(state) => state.canonical_state,
            _ => None,
        }
    }

    pub fn many_array(&self) -> Option<&super::ManyArray> {
        match &self.kind {
            EdgeKind::HasMany(state) => Some(&state.many_array),
            _ => None,
        }
    }

    pub(crate) fn many_array_mut(&mut self) -> Option<&mut super::ManyArray> {
        match &mut self.kind {
            EdgeKind::HasMany(state) => Some(&mut state.many_array),
            _ => None,
        }
    }

    pub(crate) fn expect_has_many(&mut self) -> Result<&mut HasManyState> {
        match &mut self.kind {
            EdgeKind::HasMany(state) => Ok(state),
            _ => Err(StoreError::InvalidOperation(format!(
                "{}.{:?} is not a has-many relationship",
                self.owner_type, self.key
            ))),
        }
    }

    pub(crate) fn expect_belongs_to(&mut self) -> Result<&mut BelongsToState> {
        match &mut self.kind {
            EdgeKind::BelongsTo(state) => Ok(state),
            _ => Err(StoreError::InvalidOperation(format!(
                "{}.{:?} is not a belongs-to relationship",
                self.owner_type, self.key
            ))),
        }
    }
}
