//! Relationship access on the store: sync and async reads, link fetches
//! and local edits that keep both sides of an edge in step.

use crate::error::{Result, StoreError};
use crate::model::{ModelLookup, ModelTable};
use crate::relationships::{EdgeKey, GraphCtx, ManyArray, Relationship, RelationshipGraph};
use crate::runloop::Task;
use crate::schema::{RelationshipKind, RelationshipMeta};
use crate::serializer::RequestType;
use crate::tickets::{TicketState, TicketValue};
use crate::types::{FetchTicket, ModelId};

use super::fetch::FindOptions;
use super::records::Properties;
use super::{PendingRequest, Store};

/// Value of a belongs-to read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BelongsToValue {
    Loaded(Option<ModelId>),
    /// Settles with `TicketValue::Record` once the target is loaded.
    Pending(FetchTicket),
}

/// Value of a has-many read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HasManyValue {
    Loaded(Vec<ModelId>),
    /// Settles with `TicketValue::ManyArray` once every member is loaded.
    Pending(FetchTicket),
}

impl Store {
    fn relationship_meta(&self, owner: ModelId, key: &str) -> Result<RelationshipMeta> {
        let model_name = self.models.live(owner)?.model_name();
        Ok(self.schema.relationship(model_name, key)?.clone())
    }

    fn expect_kind(&self, owner: ModelId, key: &str, kind: RelationshipKind) -> Result<RelationshipMeta> {
        let meta = self.relationship_meta(owner, key)?;
        if meta.kind != kind {
            return Err(StoreError::InvalidOperation(format!(
                "{} is a {:?} relationship, not {:?}",
                key, meta.kind, kind
            )));
        }
        Ok(meta)
    }

    fn ensure_edge(&mut self, owner: ModelId, key: &str) -> Result<EdgeKey> {
        let edge = EdgeKey::declared(key);
        self.with_graph(|graph, ctx| graph.ensure(ctx, owner, &edge).map(|_| ()))?;
        Ok(edge)
    }

    fn edge(&self, owner: ModelId, edge: &EdgeKey) -> Result<&Relationship> {
        self.graph.get(owner, edge).ok_or(StoreError::UnknownRecord(owner))
    }

    /// Empty or still loading.
    fn is_unloaded(&self, record: ModelId) -> bool {
        self.models
            .get(record)
            .map_or(true, |m| m.is_empty() || m.is_loading())
    }

    fn check_target(&self, meta: &RelationshipMeta, owner: ModelId, target: ModelId) -> Result<()> {
        let target_type = self.models.live(target)?.model_name();
        if meta.polymorphic || target_type == meta.target {
            return Ok(());
        }
        let owner_type = self.models.get(owner)?.model_name();
        Err(StoreError::InvalidOperation(format!(
            "You cannot add a '{}' record to the '{}.{}' relationship (only '{}' allowed)",
            target_type, owner_type, meta.key, meta.target
        )))
    }

    fn not_loaded(&self, owner: ModelId, key: &str) -> StoreError {
        StoreError::RelationshipNotLoaded {
            model: self
                .models
                .get(owner)
                .map(|m| m.model_name().to_string())
                .unwrap_or_default(),
            key: key.to_string(),
        }
    }

    fn mark_many_array_loaded(&mut self, owner: ModelId, edge: &EdgeKey) {
        if let Some(array) = self
            .graph
            .edge_mut(owner, edge)
            .and_then(Relationship::many_array_mut)
        {
            array.set_loaded(true);
        }
    }

    /// The pending link fetch of an edge, starting one if needed.
    fn link_ticket(&mut self, owner: ModelId, key: &str, edge: &EdgeKey, link: String) -> FetchTicket {
        if let Some(ticket) = self.graph.get(owner, edge).and_then(Relationship::link_ticket) {
            if self.tickets.is_pending(ticket) {
                return ticket;
            }
        }
        let ticket = self.tickets.create();
        self.graph.set_link_ticket(owner, edge, Some(ticket));
        let request = match self.graph.get(owner, edge).map(Relationship::kind) {
            Some(crate::relationships::EdgeKind::HasMany(_)) => PendingRequest::HasManyLink {
                owner,
                key: key.to_string(),
                link,
                ticket,
            },
            _ => PendingRequest::BelongsToLink {
                owner,
                key: key.to_string(),
                link,
                ticket,
            },
        };
        tracing::trace!(record = owner.0, key, "queued link fetch");
        self.pending_requests.push_back(request);
        self.run_loop.schedule_once(Task::FlushPendingRequests);
        ticket
    }

    /// Link of an async edge whose link has not been fetched yet.
    fn unfetched_link(&self, meta: &RelationshipMeta, rel: &Relationship) -> Option<String> {
        if !meta.is_async || rel.has_loaded() {
            return None;
        }
        rel.link().map(str::to_string)
    }

    // --- Reads ---

    /// Read a belongs-to. A sync relationship whose target is not loaded is
    /// an error; an async one fetches it.
    pub fn get_belongs_to(&mut self, owner: ModelId, key: &str) -> Result<BelongsToValue> {
        let meta = self.expect_kind(owner, key, RelationshipKind::BelongsTo)?;
        let edge = self.ensure_edge(owner, key)?;
        let rel = self.edge(owner, &edge)?;
        let target = rel.target();

        if !meta.is_async {
            if target.map_or(false, |t| self.is_unloaded(t)) {
                return Err(self.not_loaded(owner, key));
            }
            return Ok(BelongsToValue::Loaded(target));
        }

        if let Some(link) = self.unfetched_link(&meta, rel) {
            return Ok(BelongsToValue::Pending(self.link_ticket(owner, key, &edge, link)));
        }
        match target {
            Some(t) if self.is_unloaded(t) => Ok(BelongsToValue::Pending(
                self.find_by_handle(t, FindOptions::default())?,
            )),
            target => Ok(BelongsToValue::Loaded(target)),
        }
    }

    /// Read a has-many. A sync relationship with any unloaded member is an
    /// error; an async one fetches the link or the missing members.
    pub fn get_has_many(&mut self, owner: ModelId, key: &str) -> Result<HasManyValue> {
        let meta = self.expect_kind(owner, key, RelationshipKind::HasMany)?;
        let edge = self.ensure_edge(owner, key)?;
        let rel = self.edge(owner, &edge)?;
        let records = rel
            .many_array()
            .map(|array| array.records().to_vec())
            .unwrap_or_default();

        if !meta.is_async {
            if records.iter().any(|r| self.is_unloaded(*r)) {
                return Err(self.not_loaded(owner, key));
            }
            self.mark_many_array_loaded(owner, &edge);
            return Ok(HasManyValue::Loaded(records));
        }

        if let Some(link) = self.unfetched_link(&meta, rel) {
            return Ok(HasManyValue::Pending(self.link_ticket(owner, key, &edge, link)));
        }
        let unloaded: Vec<ModelId> = records
            .iter()
            .copied()
            .filter(|r| self.is_unloaded(*r))
            .collect();
        if unloaded.is_empty() {
            self.mark_many_array_loaded(owner, &edge);
            return Ok(HasManyValue::Loaded(records));
        }
        let mut fetches = Vec::with_capacity(unloaded.len());
        for record in unloaded {
            fetches.push(self.find_by_handle(record, FindOptions::default())?);
        }
        let value = TicketValue::ManyArray {
            owner,
            key: key.to_string(),
        };
        Ok(HasManyValue::Pending(self.tickets.after_all(fetches, value)))
    }

    /// A declared relationship edge, without loading anything.
    pub fn relationship(&mut self, owner: ModelId, key: &str) -> Result<&Relationship> {
        self.relationship_meta(owner, key)?;
        let edge = self.ensure_edge(owner, key)?;
        self.edge(owner, &edge)
    }

    /// The many array of a has-many, without loading anything.
    pub fn many_array(&mut self, owner: ModelId, key: &str) -> Result<&ManyArray> {
        self.expect_kind(owner, key, RelationshipKind::HasMany)?;
        let edge = self.ensure_edge(owner, key)?;
        self.edge(owner, &edge)?
            .many_array()
            .ok_or_else(|| StoreError::UnknownRelationship {
                model: String::new(),
                key: key.to_string(),
            })
    }

    // --- Link fetches ---

    pub(super) fn process_belongs_to_link(
        &mut self,
        owner: ModelId,
        key: &str,
        link: &str,
        ticket: FetchTicket,
    ) -> Result<()> {
        if !self.models.is_live(owner) {
            self.tickets.abandon(ticket);
            return Ok(());
        }
        let edge = EdgeKey::declared(key);
        match self.fetch_belongs_to_link(owner, key, &edge, link) {
            Ok(target) => {
                self.graph.set_has_loaded(owner, &edge, true);
                self.tickets.resolve(ticket, TicketValue::Record(target));
            }
            Err(error) => {
                tracing::warn!(record = owner.0, key, link, error = %error, "belongs-to link fetch failed");
                self.graph.set_link_ticket(owner, &edge, None);
                self.tickets.reject(ticket, error);
            }
        }
        Ok(())
    }

    fn fetch_belongs_to_link(
        &mut self,
        owner: ModelId,
        key: &str,
        edge: &EdgeKey,
        link: &str,
    ) -> Result<Option<ModelId>> {
        let meta = self.relationship_meta(owner, key)?;
        let snapshot = self.snapshot(owner)?;
        tracing::debug!(record = owner.0, key, link, "find_belongs_to");
        let (records, _) = self.request_document(&meta.target, None, RequestType::FindBelongsTo, |adapter| {
            adapter.find_belongs_to(&snapshot, link, &meta)
        })?;
        let target = records.first().copied();
        self.join(|store| {
            store.with_graph(|graph, ctx| graph.set_canonical_record(ctx, owner, edge, target))
        })?;
        Ok(target)
    }

    pub(super) fn process_has_many_link(
        &mut self,
        owner: ModelId,
        key: &str,
        link: &str,
        ticket: FetchTicket,
    ) -> Result<()> {
        if !self.models.is_live(owner) {
            self.tickets.abandon(ticket);
            return Ok(());
        }
        let edge = EdgeKey::declared(key);
        match self.fetch_has_many_link(owner, key, &edge, link) {
            Ok(records) => {
                let mut fetches = Vec::new();
                for record in records.into_iter().filter(|r| self.is_unloaded(*r)).collect::<Vec<_>>() {
                    fetches.push(self.find_by_handle(record, FindOptions::default())?);
                }
                let value = TicketValue::ManyArray {
                    owner,
                    key: key.to_string(),
                };
                self.tickets.wait_for_all(ticket, fetches, value);
            }
            Err(error) => {
                tracing::warn!(record = owner.0, key, link, error = %error, "has-many link fetch failed");
                self.graph.set_link_ticket(owner, &edge, None);
                self.tickets.reject(ticket, error);
            }
        }
        Ok(())
    }

    fn fetch_has_many_link(
        &mut self,
        owner: ModelId,
        key: &str,
        edge: &EdgeKey,
        link: &str,
    ) -> Result<Vec<ModelId>> {
        let meta = self.relationship_meta(owner, key)?;
        let snapshot = self.snapshot(owner)?;
        tracing::debug!(record = owner.0, key, link, "find_has_many");
        let (records, payload_meta) =
            self.request_document(&meta.target, None, RequestType::FindHasMany, |adapter| {
                adapter.find_has_many(&snapshot, link, &meta)
            })?;
        self.join(|store| {
            store.with_graph(|graph, ctx| graph.compute_changes(ctx, owner, edge, &records))
        })?;
        self.graph.set_has_loaded(owner, edge, true);
        if let Some(array) = self
            .graph
            .edge_mut(owner, edge)
            .and_then(Relationship::many_array_mut)
        {
            array.set_loaded(true);
            array.set_meta(payload_meta);
        }
        Ok(records)
    }

    // --- Writes ---

    /// Point a belongs-to at `target`, or clear it. The inverse side follows.
    ///
    /// Replaces any assignment still waiting on a ticket.
    pub fn set_belongs_to(&mut self, owner: ModelId, key: &str, target: Option<ModelId>) -> Result<()> {
        self.pending_assignments.remove(&(owner, key.to_string()));
        self.assign_belongs_to(owner, key, target)
    }

    fn assign_belongs_to(&mut self, owner: ModelId, key: &str, target: Option<ModelId>) -> Result<()> {
        let meta = self.expect_kind(owner, key, RelationshipKind::BelongsTo)?;
        if let Some(target) = target {
            self.check_target(&meta, owner, target)?;
        }
        let edge = EdgeKey::declared(key);
        self.join(|store| store.with_graph(|graph, ctx| graph.set_record(ctx, owner, &edge, target)))
    }

    /// Assign the outcome of a find ticket.
    ///
    /// A pending ticket clears the relationship until it resolves, then the
    /// resolved record is assigned unless a later assignment replaced this
    /// one. A ticket that fails leaves the relationship cleared.
    pub fn set_belongs_to_ticket(&mut self, owner: ModelId, key: &str, ticket: FetchTicket) -> Result<()> {
        match self.tickets.state(ticket)?.clone() {
            TicketState::Resolved(value) => self.set_belongs_to(owner, key, value.record()),
            TicketState::Pending => {
                self.set_belongs_to(owner, key, None)?;
                self.pending_assignments.insert((owner, key.to_string()), ticket);
                Ok(())
            }
            TicketState::Rejected(error) => Err(error),
            TicketState::Abandoned => Err(StoreError::TicketAbandoned(ticket)),
        }
    }

    /// Apply waiting belongs-to assignments whose ticket has settled.
    pub(super) fn apply_settled_assignments(&mut self) {
        let settled: Vec<_> = self
            .pending_assignments
            .iter()
            .filter(|(_, ticket)| !self.tickets.is_pending(**ticket))
            .map(|(edge, ticket)| (edge.clone(), *ticket))
            .collect();
        for ((owner, key), ticket) in settled {
            self.pending_assignments.remove(&(owner, key.clone()));
            let Ok(TicketState::Resolved(value)) = self.tickets.state(ticket) else {
                tracing::debug!(record = owner.0, key = %key, ticket = ?ticket, "dropping failed assignment");
                continue;
            };
            let target = value.record();
            if self.models.live(owner).is_err() {
                continue;
            }
            if let Err(error) = self.assign_belongs_to(owner, &key, target) {
                tracing::warn!(record = owner.0, key = %key, %error, "resolved assignment rejected");
            }
        }
    }

    fn edit_has_many<F>(&mut self, owner: ModelId, key: &str, records: &[ModelId], edit: F) -> Result<()>
    where
        F: FnOnce(&mut RelationshipGraph, &mut GraphCtx<'_, ModelTable>, &EdgeKey) -> Result<()>,
    {
        let meta = self.expect_kind(owner, key, RelationshipKind::HasMany)?;
        for record in records {
            self.check_target(&meta, owner, *record)?;
        }
        let edge = EdgeKey::declared(key);
        self.join(|store| store.with_graph(|graph, ctx| edit(graph, ctx, &edge)))
    }

    /// Append records to a has-many.
    pub fn has_many_add(&mut self, owner: ModelId, key: &str, records: &[ModelId]) -> Result<()> {
        self.edit_has_many(owner, key, records, |graph, ctx, edge| {
            graph.add_records(ctx, owner, edge, records, None)
        })
    }

    pub fn has_many_remove(&mut self, owner: ModelId, key: &str, records: &[ModelId]) -> Result<()> {
        self.edit_has_many(owner, key, &[], |graph, ctx, edge| {
            graph.remove_records(ctx, owner, edge, records)
        })
    }

    /// Splice a has-many: remove `remove_count` records at `idx`, then
    /// insert `records` there.
    pub fn has_many_replace(
        &mut self,
        owner: ModelId,
        key: &str,
        idx: usize,
        remove_count: usize,
        records: &[ModelId],
    ) -> Result<()> {
        self.edit_has_many(owner, key, records, |graph, ctx, edge| {
            graph.replace(ctx, owner, edge, idx, remove_count, records)
        })
    }

    /// Create a record of the relationship's type and append it.
    pub fn has_many_create_record(
        &mut self,
        owner: ModelId,
        key: &str,
        properties: Properties,
    ) -> Result<ModelId> {
        let meta = self.expect_kind(owner, key, RelationshipKind::HasMany)?;
        if meta.polymorphic {
            return Err(StoreError::InvalidOperation(format!(
                "cannot create a record through the polymorphic relationship {}",
                key
            )));
        }
        let record = self.create_record(&meta.target, properties)?;
        self.has_many_add(owner, key, &[record])?;
        Ok(record)
    }

    // --- Reload ---

    /// Refetch one record: an empty record is found, a loaded one reloaded.
    fn reload_handle(&mut self, record: ModelId) -> Result<FetchTicket> {
        if self.models.live(record)?.is_empty() {
            return self.find_by_handle(record, FindOptions::default());
        }
        self.find_by_handle(record, FindOptions::reload())
    }

    /// Refetch a has-many: its link when it has one, otherwise every member.
    pub fn reload_has_many(&mut self, owner: ModelId, key: &str) -> Result<FetchTicket> {
        self.expect_kind(owner, key, RelationshipKind::HasMany)?;
        let edge = self.ensure_edge(owner, key)?;
        let rel = self.edge(owner, &edge)?;
        let link = rel.link().map(str::to_string);
        let records = rel
            .many_array()
            .map(|array| array.records().to_vec())
            .unwrap_or_default();

        if let Some(link) = link {
            self.graph.set_has_loaded(owner, &edge, false);
            self.graph.set_link_ticket(owner, &edge, None);
            return Ok(self.link_ticket(owner, key, &edge, link));
        }
        let mut fetches = Vec::with_capacity(records.len());
        for record in records {
            fetches.push(self.reload_handle(record)?);
        }
        let value = TicketValue::ManyArray {
            owner,
            key: key.to_string(),
        };
        Ok(self.tickets.after_all(fetches, value))
    }

    /// Refetch a belongs-to: its link when it has one, otherwise the target.
    pub fn reload_belongs_to(&mut self, owner: ModelId, key: &str) -> Result<FetchTicket> {
        self.expect_kind(owner, key, RelationshipKind::BelongsTo)?;
        let edge = self.ensure_edge(owner, key)?;
        let rel = self.edge(owner, &edge)?;
        let target = rel.target();
        if let Some(link) = rel.link().map(str::to_string) {
            self.graph.set_has_loaded(owner, &edge, false);
            self.graph.set_link_ticket(owner, &edge, None);
            return Ok(self.link_ticket(owner, key, &edge, link));
        }
        match target {
            Some(target) => self.reload_handle(target),
            None => Ok(self.tickets.resolved(TicketValue::Record(None))),
        }
    }
}
