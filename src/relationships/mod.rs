//! The relationship graph.
//!
//! Every edge is owned by one record and keyed by [`EdgeKey`]. Declared
//! relationships come from the schema; when a declared relationship has no
//! inverse, an implicit edge is kept on the other record instead so removals
//! still reach both ends.
//!
//! Each edge tracks two memberships: `members` (what readers see now) and
//! `canonical_members` (what the server last said). Canonical updates are
//! reconciled into `members` by a deferred `flush_canonical` run from the
//! `SyncRelationships` queue.

mod belongs_to;
mod graph;
mod has_many;
mod many_array;
mod relationship;

pub use belongs_to::BelongsToState;
pub use graph::RelationshipGraph;
pub use has_many::HasManyState;
pub use many_array::ManyArray;
pub use relationship::{EdgeKind, Relationship};

use crate::model::ModelLookup;
use crate::runloop::RunLoop;
use crate::schema::SchemaRegistry;
use crate::types::ModelId;
use std::fmt;

/// Identifies an edge on its owning record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKey {
    /// A relationship declared on the owner's schema.
    Declared(String),
    /// Shadow edge for `owner_type.key` relationships pointing at this
    /// record that declare no inverse.
    Implicit { owner_type: String, key: String },
}

impl EdgeKey {
    pub fn declared(key: impl Into<String>) -> Self {
        EdgeKey::Declared(key.into())
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, EdgeKey::Implicit { .. })
    }

    /// The declared key name, if this is a declared edge.
    pub fn as_declared(&self) -> Option<&str> {
        match self {
            EdgeKey::Declared(key) => Some(key),
            EdgeKey::Implicit { .. } => None,
        }
    }
}

impl fmt::Debug for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKey::Declared(key) => write!(f, "{}", key),
            EdgeKey::Implicit { owner_type, key } => write!(f, "<{}.{}>", owner_type, key),
        }
    }
}

/// What graph operations may touch outside the graph itself.
pub struct GraphCtx<'a, M: ModelLookup> {
    pub schema: &'a SchemaRegistry,
    pub models: &'a M,
    pub run_loop: &'a mut RunLoop,
    /// Declared edges whose visible value changed, in order.
    pub changes: Vec<(ModelId, String)>,
}

impl<'a, M: ModelLookup> GraphCtx<'a, M> {
    pub fn new(schema: &'a SchemaRegistry, models: &'a M, run_loop: &'a mut RunLoop) -> Self {
        Self {
            schema,
            models,
            run_loop,
            changes: Vec::new(),
        }
    }

    pub(crate) fn notify(&mut self, owner: ModelId, key: &EdgeKey) {
        if let EdgeKey::Declared(key) = key {
            if !self.changes.iter().any(|(o, k)| *o == owner && k == key) {
                self.changes.push((owner, key.clone()));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::Result;
    use crate::runloop::{Queue, Task};
    use crate::schema::{ModelSchema, RelationshipKind, RelationshipMeta};
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct Models {
        types: HashMap<ModelId, (String, bool, bool)>,
    }

    impl ModelLookup for Models {
        fn model_name(&self, handle: ModelId) -> Option<&str> {
            self.types.get(&handle).map(|(name, _, _)| name.as_str())
        }
        fn is_new(&self, handle: ModelId) -> bool {
            self.types.get(&handle).map_or(false, |(_, new, _)| *new)
        }
        fn is_deleted(&self, handle: ModelId) -> bool {
            self.types.get(&handle).map_or(false, |(_, _, deleted)| *deleted)
        }
        fn is_live(&self, handle: ModelId) -> bool {
            self.types.contains_key(&handle)
        }
    }

    pub struct Fixture {
        pub schema: SchemaRegistry,
        pub models: Models,
        pub run_loop: RunLoop,
        pub graph: RelationshipGraph,
        next: u64,
    }

    impl Fixture {
        pub fn blog() -> Self {
            let mut schema = SchemaRegistry::new();
            schema.register(
                ModelSchema::new("post")
                    .attr("title")
                    .has_many("comments", "comment")
                    .relationship(RelationshipMeta::new("tags", RelationshipKind::HasMany, "tag").no_inverse()),
            );
            schema.register(ModelSchema::new("comment").attr("body").belongs_to("post", "post"));
            schema.register(ModelSchema::new("tag").attr("name"));
            Self {
                schema,
                models: Models::default(),
                run_loop: RunLoop::new(),
                graph: RelationshipGraph::new(),
                next: 0,
            }
        }

        pub fn add(&mut self, model: &str, is_new: bool) -> ModelId {
            self.next += 1;
            let handle = ModelId(self.next);
            self.models.types.insert(handle, (model.to_string(), is_new, false));
            handle
        }

        pub fn mark_deleted(&mut self, handle: ModelId) {
            if let Some(entry) = self.models.types.get_mut(&handle) {
                entry.2 = true;
            }
        }

        pub fn try_with<F>(&mut self, f: F) -> Result<Vec<(ModelId, String)>>
        where
            F: FnOnce(&mut RelationshipGraph, &mut GraphCtx<'_, Models>) -> Result<()>,
        {
            let mut ctx = GraphCtx::new(&self.schema, &self.models, &mut self.run_loop);
            f(&mut self.graph, &mut ctx)?;
            Ok(ctx.changes)
        }

        pub fn with<F>(&mut self, f: F) -> Vec<(ModelId, String)>
        where
            F: FnOnce(&mut RelationshipGraph, &mut GraphCtx<'_, Models>) -> Result<()>,
        {
            self.try_with(f).unwrap()
        }
    }

    /// Run every queued canonical flush.
    pub fn flush(fx: &mut Fixture) {
        while let Some(task) = fx.run_loop.pop(Queue::SyncRelationships) {
            if let Task::FlushCanonical(owner, key) = task {
                let mut ctx = GraphCtx::new(&fx.schema, &fx.models, &mut fx.run_loop);
                fx.graph.flush_canonical(&mut ctx, owner, &key);
            }
        }
    }
}
