//! Single-reference edges.

use crate::error::Result;
use crate::model::ModelLookup;
use crate::types::ModelId;

use super::{EdgeKey, GraphCtx, RelationshipGraph};

/// Current and canonical target of a belongs-to edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BelongsToState {
    pub(crate) inverse_record: Option<ModelId>,
    pub(crate) canonical_state: Option<ModelId>,
}

impl RelationshipGraph {
    /// Replace the local target. `None` clears it.
    pub fn set_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: Option<ModelId>,
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        rel.expect_belongs_to()?;
        match record {
            Some(record) => self.add_record(ctx, owner, key, record, None)?,
            None => {
                if let Some(current) = self.get(owner, key).and_then(|r| r.target()) {
                    self.remove_record(ctx, owner, key, current)?;
                }
            }
        }
        let rel = self.ensure(ctx, owner, key)?;
        rel.has_data = true;
        rel.has_loaded = true;
        Ok(())
    }

    /// Replace the canonical target. `None` means the server reported no
    /// target; reconciliation still keeps an unsaved local one.
    pub fn set_canonical_record<M: ModelLookup>(
        &mut self,
        ctx: &mut GraphCtx<'_, M>,
        owner: ModelId,
        key: &EdgeKey,
        record: Option<ModelId>,
    ) -> Result<()> {
        let rel = self.ensure(ctx, owner, key)?;
        rel.expect_belongs_to()?;
        match record {
            Some(record) => self.add_canonical_record(ctx, owner, key, record, None)?,
            None => match self.get(owner, key).and_then(|r| r.canonical_target()) {
                Some(current) => self.remove_canonical_record(ctx, owner, key, current)?,
                None => self.flush_canonical_later(ctx, owner, key),
            },
        }
        let rel = self.ensure(ctx, owner, key)?;
        rel.has_data = true;
        rel.has_loaded = true;
        Ok(())
    }
}
