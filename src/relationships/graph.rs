//! Edge storage and the membership algorithms shared by every edge kind.

use crate::error::{Result, StoreError};
use crate::model::ModelLookup;
use crate::runloop::Task;
use crate::types::{FetchTicket, ModelId};
use std::collections::{BTreeMap, HashMap};

use super::relationship::{EdgeKind, Relationship};
use super::{EdgeKey, GraphCtx};

/// All relationship edges, grouped by owning record.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    edges: HashMap<ModelId, BTreeMap<EdgeKey, Relationship>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: ModelId, key: &EdgeKey) -> Option<&Relationship> {
        self.edges.get(&owner)?.get(key)
    }

    pub(crate) fn edge_mut(&mut self, owner: ModelId, key: &EdgeKey) -> Option<&mut Relationship> {
        self.edges.get_mut(&owner)?.get_mut(key)
    }

    /// Edge keys instantiated on `owner`.
    pub fn edges_of(&self, owner: ModelId) -> Vec<EdgeKey> {
        self.edges
            .get(&owner)
            .map(|edges| edges.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// Get the edge, creating it from the schema on first use.
    pub(crate) fn ensure<M: ModelLookup>(
        &mut self,
        ctx: &GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
    ) -> Result<&mut Relationship> {
        if !ctx.models.is_live(owner) {
            return Err(StoreError::RecordDestroyed(owner));
        }
        let edges = self.edges.entry(owner).or_default();
        if !edges.contains_key(key) {
            let owner_type = ctx
                .models
                .model_name(owner)
                .ok_or(StoreError::UnknownRecord(owner))?;
            let relationship = Relationship::build(ctx.schema, owner, owner_type, key)?;
            edges.insert(key.clone(), relationship);
        }
        edges.get_mut(key).ok_or(StoreError::UnknownRecord(owner))
    }

    fn inverse_of<M: ModelLookup>(
        &self,
        ctx: &GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        member: ModelId,
    ) -> Option<EdgeKey> {
        self.get(owner, key)
            .map(|rel| rel.inverse_on(ctx.schema, ctx.models, member))
    }

    pub(crate) fn flush_canonical_later<M: ModelLookup>(
        &self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
    ) {
        ctx.run_loop
            .schedule_once(Task::FlushCanonical(owner, key.clone()));
    }

    // --- Local membership ---

    /// Add `record` to the local members of `owner.key` and mirror it on the
    /// inverse edge.
    pub fn add_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
        idx: Option<usize>,
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        if rel.members.has(&record) {
            rel.has_data = true;
            return Ok(());
        }
        if let Some(current) = rel.target() {
            self.remove_record(ctx, owner, key, current)?;
        }

        let rel = self.ensure(ctx, owner, key)?;
        rel.members.add_with_index(record, idx);
        match &mut rel.kind {
            EdgeKind::BelongsTo(state) => state.inverse_record = Some(record),
            EdgeKind::HasMany(state) => state.many_array.internal_add(record, idx),
            EdgeKind::Implicit => {}
        }
        rel.has_data = true;
        let inverse = rel.inverse_on(ctx.schema, ctx.models, record);
        ctx.notify(owner, key);

        self.add_record(ctx, record, &inverse, owner, None)
    }

    /// Remove `record` from `owner.key` and from the inverse edge.
    pub fn remove_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
    ) -> Result<()> {
        let present = self
            .get(owner, key)
            .map_or(false, |rel| rel.members.has(&record));
        if !present {
            return Ok(());
        }
        let inverse = self.inverse_of(ctx, owner, key, record);
        self.remove_record_from_own(ctx, owner, key, record);
        if let Some(inverse) = inverse {
            self.remove_record_from_own(ctx, record, &inverse, owner);
        }
        Ok(())
    }

    pub(crate) fn remove_record_from_own<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
    ) {
        let Some(rel) = self.edge_mut(owner, key) else {
            return;
        };
        if !rel.members.delete(&record) {
            return;
        }
        match &mut rel.kind {
            EdgeKind::BelongsTo(state) => state.inverse_record = None,
            EdgeKind::HasMany(state) => state.many_array.internal_remove(record),
            EdgeKind::Implicit => {}
        }
        ctx.notify(owner, key);
    }

    // --- Canonical membership ---

    /// Record server-acknowledged membership and schedule reconciliation.
    pub fn add_canonical_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
        idx: Option<usize>,
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        if !rel.canonical_members.has(&record) {
            if let Some(previous) = rel.canonical_target() {
                self.remove_canonical_record(ctx, owner, key, previous)?;
            }
            let rel = self.ensure(ctx, owner, key)?;
            match &mut rel.kind {
                EdgeKind::BelongsTo(state) => state.canonical_state = Some(record),
                EdgeKind::HasMany(state) => {
                    let at = idx
                        .unwrap_or(state.canonical_state.len())
                        .min(state.canonical_state.len());
                    state.canonical_state.insert(at, record);
                }
                EdgeKind::Implicit => {}
            }
            rel.canonical_members.add(record);
            let inverse = rel.inverse_on(ctx.schema, ctx.models, record);
            self.add_canonical_record(ctx, record, &inverse, owner, None)?;
            self.flush_canonical_later(ctx, owner, key);
        }
        if let Some(rel) = self.edge_mut(owner, key) {
            rel.has_data = true;
        }
        Ok(())
    }

    pub fn remove_canonical_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
    ) -> Result<()> {
        let present = self
            .get(owner, key)
            .map_or(false, |rel| rel.canonical_members.has(&record));
        if present {
            let inverse = self.inverse_of(ctx, owner, key, record);
            self.remove_canonical_record_from_own(ctx, owner, key, record);
            if let Some(inverse) = inverse {
                self.remove_canonical_record_from_own(ctx, record, &inverse, owner);
            }
        }
        if self.get(owner, key).is_some() {
            self.flush_canonical_later(ctx, owner, key);
        }
        Ok(())
    }

    pub(crate) fn remove_canonical_record_from_own<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: ModelId,
    ) {
        let Some(rel) = self.edge_mut(owner, key) else {
            return;
        };
        if !rel.canonical_members.delete(&record) {
            return;
        }
        match &mut rel.kind {
            EdgeKind::BelongsTo(state) => {
                if state.canonical_state == Some(record) {
                    state.canonical_state = None;
                }
            }
            EdgeKind::HasMany(state) => state.canonical_state.retain(|r| *r != record),
            EdgeKind::Implicit => {}
        }
        self.flush_canonical_later(ctx, owner, key);
    }

    /// Make local membership match canonical membership, keeping records
    /// that are new and unsaved.
    pub fn flush_canonical<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
    ) {
        let models = ctx.models;
        let Some(rel) = self.edge_mut(owner, key) else {
            return;
        };
        let changed = match &mut rel.kind {
            EdgeKind::BelongsTo(state) => {
                // An unsaved local target survives a null canonical value.
                if let Some(current) = state.inverse_record {
                    if models.is_new(current) && state.canonical_state.is_none() {
                        return;
                    }
                }
                let changed = state.inverse_record != state.canonical_state;
                state.inverse_record = state.canonical_state;
                changed
            }
            EdgeKind::HasMany(state) => {
                let before = state.many_array.records().to_vec();
                state
                    .many_array
                    .flush_canonical(&state.canonical_state, models);
                state.many_array.records() != before.as_slice()
            }
            EdgeKind::Implicit => false,
        };
        let unsaved: Vec<ModelId> = rel
            .members
            .iter()
            .copied()
            .filter(|m| models.is_new(*m))
            .collect();
        rel.members = rel.canonical_members.clone();
        for record in unsaved {
            rel.members.add(record);
        }
        if changed {
            ctx.notify(owner, key);
        }
    }

    // --- Whole-edge operations ---

    /// Remove every local and canonical member.
    pub fn clear<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
    ) -> Result<()> {
        while let Some(first) = self
            .get(owner, key)
            .and_then(|rel| rel.members.as_slice().first().copied())
        {
            self.remove_record(ctx, owner, key, first)?;
        }
        while let Some(first) = self
            .get(owner, key)
            .and_then(|rel| rel.canonical_members.as_slice().first().copied())
        {
            self.remove_canonical_record(ctx, owner, key, first)?;
        }
        Ok(())
    }

    /// Sever the inverse side of every member, keeping this side intact.
    pub fn disconnect<M: ModelLookup>(&mut self, ctx: &mut GraphCtx<'_, M>, owner: ModelId, key: &EdgeKey) {
        let members = self
            .get(owner, key)
            .map(|rel| rel.members.to_vec())
            .unwrap_or_default();
        for member in members {
            if let Some(inverse) = self.inverse_of(ctx, owner, key, member) {
                self.remove_record_from_own(ctx, member, &inverse, owner);
            }
        }
    }

    /// Restore the inverse side of every member.
    pub fn reconnect<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
    ) -> Result<()> {
        let members = self
            .get(owner, key)
            .map(|rel| rel.members.to_vec())
            .unwrap_or_default();
        for member in members {
            if let Some(inverse) = self.inverse_of(ctx, owner, key, member) {
                self.add_record(ctx, member, &inverse, owner, None)?;
            }
        }
        Ok(())
    }

    /// Point the edge at a new link; any memoized link fetch is forgotten
    /// and the edge counts as not loaded until the link is fetched.
    pub fn update_link<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        link: String,
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        if rel.link.as_deref() == Some(link.as_str()) {
            return Ok(());
        }
        rel.link = Some(link);
        rel.link_ticket = None;
        rel.has_loaded = false;
        ctx.notify(owner, key);
        Ok(())
    }

    pub(crate) fn set_link_ticket(&mut self, owner: ModelId, key: &EdgeKey, ticket: Option<FetchTicket>) {
        if let Some(rel) = self.edge_mut(owner, key) {
            rel.link_ticket = ticket;
        }
    }

    pub(crate) fn set_has_loaded(&mut self, owner: ModelId, key: &EdgeKey, has_loaded: bool) {
        if let Some(rel) = self.edge_mut(owner, key) {
            rel.has_loaded = has_loaded;
        }
    }

    // --- Record-level operations ---

    /// Clear and drop every edge of `owner`.
    pub fn clear_record<M: ModelLookup>(&mut self, ctx: &mut GraphCtx<'_, M>, owner: ModelId) -> Result<()> {
        for key in self.edges_of(owner) {
            self.clear(ctx, owner, &key)?;
        }
        self.edges.remove(&owner);
        Ok(())
    }

    pub fn disconnect_record<M: ModelLookup>(&mut self, ctx: &mut GraphCtx<'_, M>, owner: ModelId) {
        for key in self.edges_of(owner) {
            self.disconnect(ctx, owner, &key);
        }
    }

    pub fn reconnect_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
    ) -> Result<()> {
        for key in self.edges_of(owner) {
            self.reconnect(ctx, owner, &key)?;
        }
        Ok(())
    }

    /// Drop the edges of a destroyed record without touching other records.
    pub fn forget_record(&mut self, owner: ModelId) -> Vec<Relationship> {
        self.edges
            .remove(&owner)
            .map(|edges| edges.into_values().collect())
            .unwrap_or_default()
    }

    pub(crate) fn set_has_data(&mut self, owner: ModelId, key: &EdgeKey, has_data: bool) {
        if let Some(rel) = self.edge_mut(owner, key) {
            rel.has_data = has_data;
        }
    }
}
