//! The store: identity map, record lifecycle and the run loop tying the
//! relationship graph, record arrays and collaborators together.
//!
//! Every public mutation runs synchronously against in-memory state and
//! queues deferred work (canonical flushes, record array updates, fetches,
//! saves) on the run loop. Nothing talks to an adapter until [`Store::flush`]
//! drains the queues, which is what lets same-tick fetches coalesce.

mod arrays;
mod fetch;
mod push;
mod records;
mod relationships;
mod save;

pub use fetch::FindOptions;
pub use records::{Properties, PropertyValue};
pub use relationships::{BelongsToValue, HasManyValue};

use crate::adapter::Adapter;
use crate::error::{Result, StoreError};
use crate::model::{ModelTable, RecordView, Snapshot};
use crate::record_arrays::RecordArrayManager;
use crate::registry::CollaboratorRegistry;
use crate::relationships::{GraphCtx, RelationshipGraph};
use crate::runloop::{Queue, RunLoop, Task};
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::serializer::Serializer;
use crate::state::{dispatch, exit_effects, setup_effects, Effect, RecordEvent};
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
    DEFAULT_PAYLOAD_THRESHOLD,
};
use crate::tickets::{TicketState, TicketTable, TicketValue};
use crate::types::{ArrayId, AttrMap, FetchTicket, ModelId, StoreStats};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Upper bound on tasks run by a single `flush`.
    pub max_flush_tasks: usize,

    /// Largest serialized attribute map inlined into property events.
    pub payload_threshold: usize,

    /// Registry name used when a model has no adapter of its own.
    pub default_adapter: String,

    /// Registry name used when a model has no serializer of its own.
    pub default_serializer: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_flush_tasks: 100_000,
            payload_threshold: DEFAULT_PAYLOAD_THRESHOLD,
            default_adapter: "application".to_string(),
            default_serializer: "application".to_string(),
        }
    }
}

#[derive(Debug)]
struct PendingFetch {
    handle: ModelId,
    ticket: FetchTicket,
}

#[derive(Debug)]
struct PendingSave {
    handle: ModelId,
    snapshot: Snapshot,
    ticket: FetchTicket,
}

/// Adapter work other than per-record fetches and saves.
#[derive(Debug)]
enum PendingRequest {
    FindAll {
        model: String,
        array: ArrayId,
        ticket: FetchTicket,
    },
    Query {
        model: String,
        array: ArrayId,
        query: Value,
        ticket: FetchTicket,
    },
    BelongsToLink {
        owner: ModelId,
        key: String,
        link: String,
        ticket: FetchTicket,
    },
    HasManyLink {
        owner: ModelId,
        key: String,
        link: String,
        ticket: FetchTicket,
    },
}

/// The record store.
///
/// Provides a unified interface for:
/// - Pushing server data and creating records locally
/// - Reading and editing attributes and relationships
/// - Finding, saving, deleting and unloading records
/// - Live, filtered and query-backed record arrays
pub struct Store {
    config: StoreConfig,
    schema: SchemaRegistry,
    registry: CollaboratorRegistry,
    models: ModelTable,
    graph: RelationshipGraph,
    record_arrays: RecordArrayManager,
    run_loop: RunLoop,
    tickets: TicketTable,
    subscriptions: SubscriptionManager,
    pending_fetches: BTreeMap<String, Vec<PendingFetch>>,
    pending_saves: Vec<PendingSave>,
    pending_requests: VecDeque<PendingRequest>,
    /// Belongs-to edges waiting on a find ticket, keyed by `(owner, key)`.
    pending_assignments: BTreeMap<(ModelId, String), FetchTicket>,
    /// Merged payload `meta` per model type.
    type_meta: HashMap<String, Value>,
}

impl Store {
    pub fn new(config: StoreConfig, schema: SchemaRegistry) -> Self {
        let registry =
            CollaboratorRegistry::new(config.default_adapter.clone(), config.default_serializer.clone());
        let subscriptions = SubscriptionManager::with_payload_threshold(config.payload_threshold);
        Self {
            config,
            schema,
            registry,
            models: ModelTable::new(),
            graph: RelationshipGraph::new(),
            record_arrays: RecordArrayManager::new(),
            run_loop: RunLoop::new(),
            tickets: TicketTable::new(),
            subscriptions,
            pending_fetches: BTreeMap::new(),
            pending_saves: Vec::new(),
            pending_requests: VecDeque::new(),
            pending_assignments: BTreeMap::new(),
            type_meta: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn register_model(&mut self, schema: ModelSchema) {
        self.schema.register(schema);
    }

    /// Register an adapter under a model name or the default adapter name.
    pub fn register_adapter(&mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.registry.register_adapter(name, adapter);
    }

    pub fn register_serializer(&mut self, name: impl Into<String>, serializer: Arc<dyn Serializer>) {
        self.registry.register_serializer(name, serializer);
    }

    /// Payload `meta` accumulated for a model type.
    pub fn metadata_for(&self, model_name: &str) -> Option<&Value> {
        self.type_meta.get(model_name)
    }

    pub(crate) fn merge_metadata(&mut self, model_name: &str, meta: &Value) {
        let entry = self
            .type_meta
            .entry(model_name.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        match (entry, meta) {
            (Value::Object(existing), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    existing.insert(key.clone(), value.clone());
                }
            }
            (entry, meta) => *entry = meta.clone(),
        }
    }

    // --- Tickets ---

    pub fn ticket(&self, ticket: FetchTicket) -> Result<&TicketState> {
        self.tickets.state(ticket)
    }

    /// The settled value of a ticket without flushing.
    pub fn ticket_result(&self, ticket: FetchTicket) -> Result<TicketValue> {
        self.tickets.result(ticket)
    }

    /// Flush the run loop, then read the ticket's outcome.
    ///
    /// A settled ticket is released once read, so its id is unknown to
    /// later calls. A ticket still pending after the flush is kept.
    pub fn wait(&mut self, ticket: FetchTicket) -> Result<TicketValue> {
        self.flush()?;
        let result = self.tickets.result(ticket);
        if !self.tickets.is_pending(ticket) {
            self.tickets.release(ticket)?;
        }
        result
    }

    /// Drop a settled ticket that was read with [`Store::ticket_result`].
    pub fn release_ticket(&mut self, ticket: FetchTicket) -> Result<()> {
        self.tickets.release(ticket).map(|_| ())
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            model_count: self.models.len(),
            live_model_count: self.models.live_count(),
            relationship_count: self.graph.edge_count(),
            record_array_count: self.record_arrays.len(),
            pending_tickets: self.tickets.pending_count(),
            ticket_count: self.tickets.len(),
        }
    }

    // --- State Machine ---

    fn unhandled(&self, handle: ModelId, event: &RecordEvent) -> StoreError {
        match self.models.get(handle) {
            Ok(model) => StoreError::UnhandledEvent {
                event: event.name().to_string(),
                state: model.current_state().path(),
                model: model.model_name().to_string(),
            },
            Err(e) => e,
        }
    }

    pub(crate) fn can_handle(&self, handle: ModelId, event: &RecordEvent) -> bool {
        self.models
            .get(handle)
            .map_or(false, |m| dispatch(m.current_state(), event).is_some())
    }

    /// Fail with `UnhandledEvent` before any side effect is applied.
    pub(crate) fn check_event(&self, handle: ModelId, event: &RecordEvent) -> Result<()> {
        if self.can_handle(handle, event) {
            Ok(())
        } else {
            Err(self.unhandled(handle, event))
        }
    }

    /// Send an event into the record's current state.
    pub(crate) fn send(&mut self, handle: ModelId, event: RecordEvent) -> Result<()> {
        let state = self.models.get(handle)?.current_state();
        let effects = dispatch(state, &event).ok_or_else(|| self.unhandled(handle, &event))?;
        tracing::trace!(record = handle.0, event = event.name(), state = %state, "send");
        for effect in effects {
            self.apply_effect(handle, effect)?;
        }
        Ok(())
    }

    fn transition_to(&mut self, handle: ModelId, path: &str) -> Result<()> {
        let from = self.models.get(handle)?.current_state();
        let plan = from.plan_transition(path)?;
        for state in &plan.exits {
            for effect in exit_effects(*state) {
                self.apply_effect(handle, effect)?;
            }
        }
        self.models.get_mut(handle)?.set_current_state(plan.target);
        tracing::debug!(record = handle.0, from = %from, to = %plan.target, "transition");
        for state in &plan.enters {
            for effect in setup_effects(*state) {
                self.apply_effect(handle, effect)?;
            }
        }
        self.record_did_change(handle);
        Ok(())
    }

    fn apply_effect(&mut self, handle: ModelId, effect: Effect) -> Result<()> {
        match effect {
            Effect::TransitionTo(path) => self.transition_to(handle, path)?,
            Effect::TransitionIfClean(path) => {
                if !self.models.get(handle)?.has_changed_attributes() {
                    self.transition_to(handle, path)?;
                }
            }
            Effect::Send(event) => self.send(handle, event)?,
            Effect::SendIfClean(event) => {
                if !self.models.get(handle)?.has_changed_attributes() {
                    self.send(handle, event)?;
                }
            }
            Effect::SendIfDirty(event) => {
                if self.models.get(handle)?.has_changed_attributes() {
                    self.send(handle, event)?;
                }
            }
            Effect::TriggerLater(event) => {
                self.models.get_mut(handle)?.trigger_later(event);
                self.run_loop.schedule_once(Task::TriggerDeferred(handle));
            }
            Effect::DeleteAttribute(name) => self.models.get_mut(handle)?.delete_local_attribute(&name),
            Effect::UpdateChangedAttributes => self.models.get_mut(handle)?.update_changed_attributes(),
            Effect::UpdateRecordArrays => self.record_did_change(handle),
            Effect::ClearRelationships => {
                self.with_graph(|graph, ctx| graph.clear_record(ctx, handle))?;
            }
            Effect::DisconnectRelationships => {
                self.with_graph(|graph, ctx| {
                    graph.disconnect_record(ctx, handle);
                    Ok(())
                })?;
            }
            Effect::ReconnectRelationships => {
                self.with_graph(|graph, ctx| graph.reconnect_record(ctx, handle))?;
            }
            Effect::ClearErrorMessages => self.models.get_mut(handle)?.clear_error_messages(),
            Effect::RemoveErrorMessage(name) => {
                if self.models.get_mut(handle)?.remove_error_message(&name) {
                    self.send(handle, RecordEvent::BecameValid)?;
                }
            }
            Effect::ClearError => self.models.get_mut(handle)?.did_clean_error(),
            Effect::ClearLoadingTicket => self.models.get_mut(handle)?.set_loading_ticket(None),
            Effect::Dematerialize => self.dematerialize(handle)?,
            Effect::Reload => {
                self.models.get_mut(handle)?.set_reloading(true);
                self.schedule_fetch(handle)?;
            }
            Effect::Reject(message) => return Err(StoreError::InvalidOperation(message.to_string())),
        }
        Ok(())
    }

    /// Tombstone a record and detach it from arrays, edges and tickets.
    fn dematerialize(&mut self, handle: ModelId) -> Result<()> {
        let ticket = self.models.get(handle)?.loading_ticket();
        if !self.models.dematerialize(handle)? {
            return Ok(());
        }
        for array in self.record_arrays.remove_record(handle) {
            self.array_changed(array);
        }
        self.graph.forget_record(handle);
        if let Some(ticket) = ticket {
            self.tickets.abandon(ticket);
        }
        tracing::debug!(record = handle.0, "dematerialized record");
        Ok(())
    }

    // --- Run Loop ---

    /// Run `f` against the relationship graph, then announce changed edges.
    pub(crate) fn with_graph<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RelationshipGraph, &mut GraphCtx<'_, ModelTable>) -> Result<T>,
    {
        let mut ctx = GraphCtx::new(&self.schema, &self.models, &mut self.run_loop);
        let result = f(&mut self.graph, &mut ctx);
        let changes = ctx.changes;
        for (owner, key) in changes {
            if let Ok(model) = self.models.get(owner) {
                self.subscriptions
                    .broadcast_relationship(model.model_name(), model.id(), owner, &key);
            }
        }
        result
    }

    /// Queue a record for the next record array update pass.
    pub(crate) fn record_did_change(&mut self, handle: ModelId) {
        self.record_arrays.record_did_change(handle);
        self.run_loop.schedule_once(Task::UpdateRecordArrays);
    }

    /// Run `f` as one unit: canonical relationship flushes it schedules are
    /// drained when the outermost join ends.
    pub(crate) fn join<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.run_loop.begin();
        let result = f(self);
        let drained = if self.run_loop.end() {
            self.drain_sync_relationships()
        } else {
            Ok(())
        };
        let value = result?;
        drained?;
        Ok(value)
    }

    fn drain_sync_relationships(&mut self) -> Result<()> {
        while let Some(task) = self.run_loop.pop(Queue::SyncRelationships) {
            self.run_task(task)?;
        }
        Ok(())
    }

    /// Drain every queue until the run loop is idle. Returns the number of
    /// tasks run.
    pub fn flush(&mut self) -> Result<usize> {
        let mut ran = 0;
        while !self.run_loop.is_idle() {
            if ran >= self.config.max_flush_tasks {
                tracing::warn!(ran, pending = self.run_loop.pending(), "run loop did not settle");
                return Err(StoreError::FlushLimit(ran));
            }
            let Some(task) = self.run_loop.next_task() else {
                break;
            };
            ran += 1;
            self.run_task(task)?;
            if !self.pending_assignments.is_empty() {
                self.apply_settled_assignments();
            }
        }
        Ok(ran)
    }

    fn run_task(&mut self, task: Task) -> Result<()> {
        tracing::trace!(?task, "running task");
        match task {
            Task::FlushCanonical(owner, key) => self.with_graph(|graph, ctx| {
                graph.flush_canonical(ctx, owner, &key);
                Ok(())
            }),
            Task::UpdateRecordArrays => {
                for array in self
                    .record_arrays
                    .update_record_arrays(&self.models, &self.schema)
                {
                    self.array_changed(array);
                }
                Ok(())
            }
            Task::TriggerDeferred(handle) => {
                self.deliver_triggers(handle);
                Ok(())
            }
            Task::UpdateFilter(array) => {
                if self
                    .record_arrays
                    .update_filter(array, &self.models, &self.schema)
                {
                    self.array_changed(array);
                }
                Ok(())
            }
            Task::FlushPendingSaves => self.flush_pending_saves(),
            Task::FlushPendingFetches => self.flush_pending_fetches(),
            Task::FlushPendingRequests => self.flush_pending_requests(),
        }
    }

    fn deliver_triggers(&mut self, handle: ModelId) {
        let Ok(model) = self.models.get_mut(handle) else {
            return;
        };
        let events = model.take_deferred_triggers();
        let model = &*model;
        for event in events {
            tracing::trace!(record = handle.0, ?event, "lifecycle callback");
            self.subscriptions
                .broadcast_lifecycle(model.model_name(), model.id(), handle, event);
        }
    }

    // --- Notifications ---

    pub(crate) fn array_changed(&self, array: ArrayId) {
        if let Ok(array) = self.record_arrays.get(array) {
            self.subscriptions
                .broadcast_record_array(array.id(), array.model_name(), array.len());
        }
    }

    pub(crate) fn notify_properties(&self, handle: ModelId, keys: Vec<String>) {
        if keys.is_empty() || !self.subscriptions.has_subscribers() {
            return;
        }
        let Ok(model) = self.models.get(handle) else {
            return;
        };
        let Ok(schema) = self.schema.get(model.model_name()) else {
            return;
        };
        let view = RecordView::new(model, schema);
        let values: AttrMap = keys
            .iter()
            .filter_map(|key| view.attr(key).map(|value| (key.clone(), value.clone())))
            .collect();
        self.subscriptions
            .broadcast_properties(model.model_name(), model.id(), handle, keys, &values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;
    use crate::state::{LifecycleEvent, RecordState};
    use crate::subscriptions::{StoreEvent, SubscriptionFilter};
    use serde_json::json;

    fn store() -> Store {
        let mut schema = SchemaRegistry::new();
        schema.register(ModelSchema::new("post").attr("title").has_many("comments", "comment"));
        schema.register(ModelSchema::new("comment").attr("body").belongs_to("post", "post"));
        Store::new(StoreConfig::default(), schema)
    }

    #[test]
    fn test_unhandled_event_is_an_error() {
        let mut store = store();
        let post = store.record_for_id("post", "1").unwrap();
        let err = store.send(post, RecordEvent::DidCommit).unwrap_err();
        match err {
            StoreError::UnhandledEvent { event, state, model } => {
                assert_eq!(event, "didCommit");
                assert_eq!(state, "root.empty");
                assert_eq!(model, "post");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_flush_runs_deferred_callbacks_once() {
        let mut store = store();
        let sub = store.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::lifecycle(),
            ..Default::default()
        });
        let post = store.push("post", json!({"id": "1", "title": "Hi"})).unwrap();
        assert_eq!(store.state(post).unwrap(), RecordState::LoadedSaved);
        assert!(sub.try_recv().is_err());

        store.flush().unwrap();
        let events: Vec<LifecycleEvent> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                StoreEvent::Lifecycle { event, .. } => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(events, vec![LifecycleEvent::DidLoad, LifecycleEvent::Ready]);
        assert_eq!(store.flush().unwrap(), 0);
    }

    #[test]
    fn test_flush_limit() {
        let mut schema = SchemaRegistry::new();
        schema.register(ModelSchema::new("post").attr("title"));
        let mut store = Store::new(
            StoreConfig {
                max_flush_tasks: 1,
                ..Default::default()
            },
            schema,
        );
        store.push("post", json!({"id": "1"})).unwrap();
        // Record array update plus lifecycle delivery.
        assert!(matches!(store.flush(), Err(StoreError::FlushLimit(1))));
    }

    #[test]
    fn test_metadata_merges() {
        let mut store = store();
        store.merge_metadata("post", &json!({"since": 1, "total": 4}));
        store.merge_metadata("post", &json!({"since": 2}));
        assert_eq!(store.metadata_for("post"), Some(&json!({"since": 2, "total": 4})));
        assert_eq!(store.metadata_for("comment"), None);
    }

    #[test]
    fn test_stats() {
        let mut store = store();
        store
            .push("post", json!({"id": "1", "comments": ["2"]}))
            .unwrap();
        let stats = store.stats();
        assert_eq!(stats.model_count, 2);
        assert_eq!(stats.live_model_count, 2);
        assert_eq!(stats.relationship_count, 2);
        assert_eq!(stats.pending_tickets, 0);
    }

    #[test]
    fn test_waited_tickets_are_released() {
        let mut store = store();
        let post = store.push("post", json!({"id": "1"})).unwrap();
        for _ in 0..100 {
            let ticket = store.find_record("post", "1").unwrap();
            assert_eq!(store.wait(ticket).unwrap().record(), Some(post));
            assert!(matches!(store.ticket(ticket), Err(StoreError::UnknownTicket(_))));
        }
        assert_eq!(store.stats().ticket_count, 0);

        let ticket = store.find_record("post", "1").unwrap();
        assert_eq!(store.ticket_result(ticket).unwrap().record(), Some(post));
        assert_eq!(store.stats().ticket_count, 1);
        store.release_ticket(ticket).unwrap();
        assert_eq!(store.stats().ticket_count, 0);
    }
}
