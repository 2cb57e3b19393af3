//! Multi-reference edges.

use crate::error::Result;
use crate::model::ModelLookup;
use crate::ordered_set::OrderedSet;
use crate::types::ModelId;

use super::many_array::ManyArray;
use super::relationship::EdgeKind;
use super::{EdgeKey, GraphCtx, RelationshipGraph};

/// Canonical order and the visible array of a has-many edge.
#[derive(Clone, Debug)]
pub struct HasManyState {
    pub(crate) canonical_state: Vec<ModelId>,
    pub(crate) many_array: ManyArray,
}

impl HasManyState {
    pub fn new(owner: ModelId, key: impl Into<String>) -> Self {
        Self {
            canonical_state: Vec::new(),
            many_array: ManyArray::new(owner, key),
        }
    }

    pub fn canonical_state(&self) -> &[ModelId] {
        &self.canonical_state
    }
}

impl RelationshipGraph {
    /// Replace canonical membership with `records`, in order.
    ///
    /// Canonical members missing from `records` are removed, the rest are
    /// placed at their new index. Local unsaved additions survive the
    /// resulting flush.
    pub fn compute_changes<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        records: &[ModelId],
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        rel.expect_has_many()?;

        let mut wanted = OrderedSet::new();
        for record in records {
            wanted.add(*record);
        }
        let stale: Vec<ModelId> = rel
            .canonical_members
            .iter()
            .copied()
            .filter(|m| !wanted.has(m))
            .collect();
        for record in stale {
            self.remove_canonical_record(ctx, owner, key, record)?;
        }

        for (idx, record) in wanted.iter().copied().enumerate() {
            let rel = self.ensure(ctx, owner, key)?;
            let state = rel.expect_has_many()?;
            match state.canonical_state.iter().position(|r| *r == record) {
                Some(at) if at == idx => {}
                Some(at) => {
                    state.canonical_state.remove(at);
                    let to = idx.min(state.canonical_state.len());
                    state.canonical_state.insert(to, record);
                    self.flush_canonical_later(ctx, owner, key);
                }
                None => self.add_canonical_record(ctx, owner, key, record, Some(idx))?,
            }
        }

        let rel = self.ensure(ctx, owner, key)?;
        let mut ordered = OrderedSet::new();
        for record in wanted.iter().copied().filter(|r| rel.canonical_members.has(r)) {
            ordered.add(record);
        }
        for record in rel.canonical_members.iter() {
            ordered.add(*record);
        }
        rel.canonical_members = ordered;
        rel.has_data = true;
        self.flush_canonical_later(ctx, owner, key);
        Ok(())
    }

    /// Add `records` locally, starting at `idx` when given.
    pub fn add_records<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        records: &[ModelId],
        idx: Option<usize>,
    ) -> Result<()> {
        self.ensure(ctx, owner, key)?.expect_has_many()?;
        for (offset, record) in records.iter().enumerate() {
            self.add_record(ctx, owner, key, *record, idx.map(|i| i + offset))?;
        }
        Ok(())
    }

    pub fn remove_records<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        records: &[ModelId],
    ) -> Result<()> {
        self.ensure(ctx, owner, key)?.expect_has_many()?;
        for record in records {
            self.remove_record(ctx, owner, key, *record)?;
        }
        Ok(())
    }

    /// Splice the visible array: drop `remove_count` records starting at
    /// `idx`, then insert `records` there.
    pub fn replace<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        idx: usize,
        remove_count: usize,
        records: &[ModelId],
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        let removed: Vec<ModelId> = match &rel.kind {
            EdgeKind::HasMany(state) => state
                .many_array
                .records()
                .iter()
                .skip(idx)
                .take(remove_count)
                .copied()
                .collect(),
            _ => {
                rel.expect_has_many()?;
                Vec::new()
            }
        };
        self.remove_records(ctx, owner, key, &removed)?;
        self.add_records(ctx, owner, key, records, Some(idx))?;
        let rel = self.ensure(ctx, owner, key)?;
        rel.has_data = true;
        Ok(())
    }
}
