//! Finding records: single fetches, coalesced batches, find-all and queries.

use crate::adapter::{Adapter, AdapterResult};
use crate::error::{Result, StoreError};
use crate::model::{ModelLookup, Snapshot};
use crate::relationships::EdgeKey;
use crate::runloop::Task;
use crate::serializer::RequestType;
use crate::state::RecordEvent;
use crate::tickets::TicketValue;
use crate::types::{ArrayId, FetchTicket, ModelId};
use serde_json::Value;

use super::records::{Assignment, Properties};
use super::{PendingFetch, PendingRequest, Store};

/// Options for [`Store::find_record_with`].
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    /// Refetch even when the record is already loaded.
    pub reload: bool,

    /// Values seeded into an empty record before its fetch completes.
    pub preload: Option<Properties>,
}

impl FindOptions {
    pub fn reload() -> Self {
        Self {
            reload: true,
            ..Default::default()
        }
    }

    pub fn preload(properties: Properties) -> Self {
        Self {
            preload: Some(properties),
            ..Default::default()
        }
    }
}

impl Store {
    // --- Find ---

    /// Find a record by id. A loaded record resolves immediately; anything
    /// else is fetched on the next flush.
    pub fn find_record(&mut self, model_name: &str, id: &str) -> Result<FetchTicket> {
        self.find_record_with(model_name, id, FindOptions::default())
    }

    pub fn find_record_with(
        &mut self,
        model_name: &str,
        id: &str,
        options: FindOptions,
    ) -> Result<FetchTicket> {
        let handle = self.record_for_id(model_name, id)?;
        self.find_by_handle(handle, options)
    }

    pub(crate) fn find_by_handle(&mut self, handle: ModelId, options: FindOptions) -> Result<FetchTicket> {
        let model = self.models.live(handle)?;
        let (is_empty, is_loading) = (model.is_empty(), model.is_loading());
        if is_empty {
            if let Some(preload) = options.preload {
                self.join(|store| store.preload_data(handle, preload))?;
            }
        }
        if is_empty || is_loading {
            return self.schedule_fetch(handle);
        }
        if options.reload {
            self.models.live_mut(handle)?.set_reloading(true);
            return self.schedule_fetch(handle);
        }
        Ok(self.tickets.resolved(TicketValue::Record(Some(handle))))
    }

    /// Find several records of one type. Resolves with them in `ids` order.
    pub fn find_many(&mut self, model_name: &str, ids: &[&str]) -> Result<FetchTicket> {
        let mut handles = Vec::with_capacity(ids.len());
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            let handle = self.record_for_id(model_name, id)?;
            tickets.push(self.find_by_handle(handle, FindOptions::default())?);
            handles.push(handle);
        }
        Ok(self.tickets.after_all(tickets, TicketValue::Records(handles)))
    }

    fn preload_data(&mut self, handle: ModelId, preload: Properties) -> Result<()> {
        let model_name = self.models.live(handle)?.model_name().to_string();
        for (key, value) in preload {
            if key == "id" {
                continue;
            }
            let edge = EdgeKey::declared(key.as_str());
            match self.resolve_property(&model_name, &key, value)? {
                Assignment::Attribute(value) => {
                    self.models.live_mut(handle)?.preload_attribute(&key, value);
                }
                Assignment::BelongsTo(target) => {
                    self.with_graph(|graph, ctx| graph.set_record(ctx, handle, &edge, target))?;
                }
                Assignment::HasMany(records) => {
                    self.with_graph(|graph, ctx| graph.compute_changes(ctx, handle, &edge, &records))?;
                }
            }
        }
        Ok(())
    }

    /// Queue a fetch for the record, reusing its pending loading ticket.
    pub(crate) fn schedule_fetch(&mut self, handle: ModelId) -> Result<FetchTicket> {
        if let Some(ticket) = self.models.live(handle)?.loading_ticket() {
            if self.tickets.is_pending(ticket) {
                return Ok(ticket);
            }
        }
        self.check_event(handle, &RecordEvent::LoadingData)?;

        let ticket = self.tickets.create();
        let model = self.models.live_mut(handle)?;
        model.set_loading_ticket(Some(ticket));
        let model_name = model.model_name().to_string();
        self.send(handle, RecordEvent::LoadingData)?;

        tracing::trace!(model = %model_name, record = handle.0, "scheduled fetch");
        self.pending_fetches
            .entry(model_name)
            .or_default()
            .push(PendingFetch { handle, ticket });
        self.run_loop.schedule_once(Task::FlushPendingFetches);
        Ok(ticket)
    }

    pub(crate) fn flush_pending_fetches(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_fetches);
        for (model_name, fetches) in pending {
            self.flush_fetches_for_type(&model_name, fetches)?;
        }
        Ok(())
    }

    fn flush_fetches_for_type(&mut self, model_name: &str, fetches: Vec<PendingFetch>) -> Result<()> {
        let (live, dead): (Vec<PendingFetch>, Vec<PendingFetch>) = fetches
            .into_iter()
            .partition(|fetch| self.models.is_live(fetch.handle));
        for fetch in dead {
            self.tickets.abandon(fetch.ticket);
        }
        if live.is_empty() {
            return Ok(());
        }

        let adapter = match self.registry.adapter_for(model_name) {
            Ok(adapter) => adapter,
            Err(error) => {
                for fetch in live {
                    self.fetch_failed(fetch, error.clone())?;
                }
                return Ok(());
            }
        };
        if live.len() == 1 || !adapter.coalesce_find_requests() {
            for fetch in live {
                self.fetch_one(model_name, fetch)?;
            }
            return Ok(());
        }

        let snapshots = live
            .iter()
            .map(|fetch| self.snapshot(fetch.handle))
            .collect::<Result<Vec<Snapshot>>>()?;
        let groups = adapter.group_records_for_find_many(&snapshots);
        tracing::debug!(
            model = model_name,
            fetches = live.len(),
            groups = groups.len(),
            "coalescing fetches"
        );

        let mut remaining = live;
        for group in groups {
            let mut batch = Vec::with_capacity(group.len());
            for snapshot in &group {
                if let Some(at) = remaining.iter().position(|f| f.handle == snapshot.handle) {
                    batch.push(remaining.remove(at));
                }
            }
            match batch.len() {
                0 => tracing::warn!(model = model_name, "adapter returned an empty find_many group"),
                1 => {
                    for fetch in batch {
                        self.fetch_one(model_name, fetch)?;
                    }
                }
                _ => self.fetch_many(model_name, batch, group)?,
            }
        }
        for fetch in remaining {
            tracing::warn!(
                model = model_name,
                record = fetch.handle.0,
                "record left out of every find_many group; fetching it alone"
            );
            self.fetch_one(model_name, fetch)?;
        }
        Ok(())
    }

    fn fetch_one(&mut self, model_name: &str, fetch: PendingFetch) -> Result<()> {
        let Some(id) = self.models.get(fetch.handle)?.id().map(str::to_string) else {
            return self.fetch_failed(
                fetch,
                StoreError::InvalidOperation("cannot fetch a record without an id".into()),
            );
        };
        let snapshot = self.snapshot(fetch.handle)?;
        tracing::debug!(model = model_name, id = %id, "find_record");
        let result = self.request_document(model_name, Some(&id), RequestType::FindRecord, |adapter| {
            adapter.find_record(model_name, &id, &snapshot)
        });
        match result {
            Ok(_) => self.fetch_succeeded(fetch),
            Err(error) => self.fetch_failed(fetch, error),
        }
    }

    fn fetch_many(&mut self, model_name: &str, batch: Vec<PendingFetch>, snapshots: Vec<Snapshot>) -> Result<()> {
        let ids: Vec<String> = snapshots.iter().filter_map(|s| s.id.clone()).collect();
        tracing::debug!(model = model_name, count = ids.len(), "find_many");
        let result = self.request_document(model_name, None, RequestType::FindMany, |adapter| {
            adapter.find_many(model_name, &ids, &snapshots)
        });
        match result {
            Ok(_) => {
                for fetch in batch {
                    self.fetch_succeeded(fetch)?;
                }
            }
            Err(error) => {
                for fetch in batch {
                    self.fetch_failed(fetch, error.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Call the adapter, normalize its payload and push it. Returns the
    /// primary records and the payload meta.
    pub(crate) fn request_document<F>(
        &mut self,
        model_name: &str,
        id: Option<&str>,
        request: RequestType,
        call: F,
    ) -> Result<(Vec<ModelId>, Option<Value>)>
    where
        F: FnOnce(&dyn Adapter) -> AdapterResult<Value>,
    {
        let adapter = self.registry.adapter_for(model_name)?;
        let raw = call(adapter.as_ref())?;
        let payload = self
            .registry
            .serializer_for(model_name)
            .extract(model_name, raw, id, request)?;
        let meta = payload.meta.clone();
        let records = self.push_document(model_name, payload)?;
        Ok((records, meta))
    }

    /// Clear the reloading flag and the loading ticket if it is this fetch's.
    fn finish_fetch(&mut self, fetch: &PendingFetch) -> Result<()> {
        let model = self.models.live_mut(fetch.handle)?;
        model.set_reloading(false);
        if model.loading_ticket() == Some(fetch.ticket) {
            model.set_loading_ticket(None);
        }
        Ok(())
    }

    fn fetch_succeeded(&mut self, fetch: PendingFetch) -> Result<()> {
        if !self.models.is_live(fetch.handle) {
            self.tickets.abandon(fetch.ticket);
            return Ok(());
        }
        self.finish_fetch(&fetch)?;
        let model = self.models.get(fetch.handle)?;
        if model.is_empty() || model.is_loading() {
            let error = StoreError::MissingFromPayload {
                model: model.model_name().to_string(),
                id: model.id().unwrap_or_default().to_string(),
            };
            return self.fetch_failed(fetch, error);
        }
        self.tickets
            .resolve(fetch.ticket, TicketValue::Record(Some(fetch.handle)));
        Ok(())
    }

    fn fetch_failed(&mut self, fetch: PendingFetch, error: StoreError) -> Result<()> {
        if !self.models.is_live(fetch.handle) {
            self.tickets.abandon(fetch.ticket);
            return Ok(());
        }
        self.finish_fetch(&fetch)?;
        tracing::warn!(record = fetch.handle.0, error = %error, "fetch failed");
        if self.can_handle(fetch.handle, &RecordEvent::NotFound) {
            self.send(fetch.handle, RecordEvent::NotFound)?;
        }
        if self.models.get(fetch.handle)?.is_empty() {
            self.unload_record(fetch.handle)?;
        }
        self.tickets.reject(fetch.ticket, error);
        Ok(())
    }

    // --- Find All ---

    /// Every record of a type. Resolves with the live array, fetching
    /// from the adapter first when it asks to.
    pub fn find_all(&mut self, model_name: &str) -> Result<FetchTicket> {
        self.find_all_with(model_name, false)
    }

    pub fn find_all_with(&mut self, model_name: &str, reload: bool) -> Result<FetchTicket> {
        let array = self.peek_all(model_name)?;
        let loaded = self.record_arrays.get(array)?.len();
        let fetch = reload || self.registry.adapter_for(model_name)?.should_reload_all(model_name, loaded);
        if !fetch {
            return Ok(self.tickets.resolved(TicketValue::RecordArray(array)));
        }
        self.record_arrays.get_mut(array)?.set_updating(true);
        let ticket = self.tickets.create();
        self.pending_requests.push_back(PendingRequest::FindAll {
            model: model_name.to_string(),
            array,
            ticket,
        });
        self.run_loop.schedule_once(Task::FlushPendingRequests);
        Ok(ticket)
    }

    fn process_find_all(&mut self, model_name: &str, array: ArrayId, ticket: FetchTicket) -> Result<()> {
        let since = self
            .type_meta
            .get(model_name)
            .and_then(|meta| meta.get("since"))
            .cloned();
        tracing::debug!(model = model_name, ?since, "find_all");
        let result = self.request_document(model_name, None, RequestType::FindAll, |adapter| {
            adapter.find_all(model_name, since.as_ref())
        });
        // The live array must hold the pushed records before the ticket
        // resolves.
        self.run_task(Task::UpdateRecordArrays)?;
        if let Ok(record_array) = self.record_arrays.get_mut(array) {
            record_array.set_updating(false);
            if result.is_ok() {
                record_array.set_loaded(true);
            }
        }
        match result {
            Ok(_) => self.tickets.resolve(ticket, TicketValue::RecordArray(array)),
            Err(error) => {
                tracing::warn!(model = model_name, error = %error, "find_all failed");
                self.tickets.reject(ticket, error);
            }
        }
        Ok(())
    }

    // --- Query ---

    /// Ask the adapter for records matching `query`. Resolves with a new
    /// adapter-populated array.
    pub fn query(&mut self, model_name: &str, query: Value) -> Result<FetchTicket> {
        self.schema.get(model_name)?;
        let array = self
            .record_arrays
            .create_adapter_populated(model_name, query.clone());
        self.queue_query(model_name, array, query)
    }

    pub(super) fn queue_query(
        &mut self,
        model_name: &str,
        array: ArrayId,
        query: Value,
    ) -> Result<FetchTicket> {
        self.record_arrays.get_mut(array)?.set_updating(true);
        let ticket = self.tickets.create();
        self.pending_requests.push_back(PendingRequest::Query {
            model: model_name.to_string(),
            array,
            query,
            ticket,
        });
        self.run_loop.schedule_once(Task::FlushPendingRequests);
        Ok(ticket)
    }

    fn process_query(
        &mut self,
        model_name: &str,
        array: ArrayId,
        query: Value,
        ticket: FetchTicket,
    ) -> Result<()> {
        tracing::debug!(model = model_name, %query, "query");
        let result = self.request_document(model_name, None, RequestType::Query, |adapter| {
            adapter.query(model_name, &query)
        });
        match result {
            Ok((records, meta)) => {
                match self.record_arrays.load_records(array, &records, meta) {
                    Ok(()) => {
                        self.array_changed(array);
                        self.tickets.resolve(ticket, TicketValue::RecordArray(array));
                    }
                    // The array was unregistered while the query was queued.
                    Err(_) => self.tickets.abandon(ticket),
                }
            }
            Err(error) => {
                if let Ok(record_array) = self.record_arrays.get_mut(array) {
                    record_array.set_updating(false);
                }
                tracing::warn!(model = model_name, error = %error, "query failed");
                self.tickets.reject(ticket, error);
            }
        }
        Ok(())
    }

    pub(crate) fn flush_pending_requests(&mut self) -> Result<()> {
        while let Some(request) = self.pending_requests.pop_front() {
            match request {
                PendingRequest::FindAll { model, array, ticket } => {
                    self.process_find_all(&model, array, ticket)?
                }
                PendingRequest::Query {
                    model,
                    array,
                    query,
                    ticket,
                } => self.process_query(&model, array, query, ticket)?,
                PendingRequest::BelongsToLink {
                    owner,
                    key,
                    link,
                    ticket,
                } => self.process_belongs_to_link(owner, &key, &link, ticket)?,
                PendingRequest::HasManyLink {
                    owner,
                    key,
                    link,
                    ticket,
                } => self.process_has_many_link(owner, &key, &link, ticket)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;
    use crate::schema::{ModelSchema, SchemaRegistry};
    use crate::state::RecordState;
    use crate::store::StoreConfig;
    use crate::tickets::TicketState;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Server {
        find_calls: Mutex<Vec<String>>,
        find_many_calls: Mutex<Vec<Vec<String>>>,
        coalesce: bool,
        missing: Vec<String>,
    }

    impl Adapter for Server {
        fn find_record(&self, _model: &str, id: &str, _snapshot: &Snapshot) -> AdapterResult<Value> {
            self.find_calls.lock().push(id.to_string());
            if self.missing.iter().any(|m| m == id) {
                return Err(AdapterError::Transport("404".into()));
            }
            Ok(json!({"id": id, "title": format!("post {}", id)}))
        }

        fn find_many(&self, _model: &str, ids: &[String], _snapshots: &[Snapshot]) -> AdapterResult<Value> {
            self.find_many_calls.lock().push(ids.to_vec());
            let data: Vec<Value> = ids
                .iter()
                .filter(|id| !self.missing.contains(id))
                .map(|id| json!({"id": id, "title": format!("post {}", id)}))
                .collect();
            Ok(json!({ "data": data }))
        }

        fn find_all(&self, _model: &str, since: Option<&Value>) -> AdapterResult<Value> {
            let next = since.and_then(Value::as_i64).unwrap_or(0) + 1;
            Ok(json!({"data": [{"id": "1"}, {"id": "2"}], "meta": {"since": next}}))
        }

        fn query(&self, _model: &str, query: &Value) -> AdapterResult<Value> {
            Ok(json!({"data": [{"id": query["id"].clone()}], "meta": {"total": 1}}))
        }

        fn create_record(&self, _model: &str, _snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
            Ok(None)
        }

        fn update_record(&self, _model: &str, _snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
            Ok(None)
        }

        fn delete_record(&self, _model: &str, _snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
            Ok(None)
        }

        fn coalesce_find_requests(&self) -> bool {
            self.coalesce
        }
    }

    fn store_with(server: Server) -> (Store, Arc<Server>) {
        let mut schema = SchemaRegistry::new();
        schema.register(ModelSchema::new("post").attr("title"));
        let mut store = Store::new(StoreConfig::default(), schema);
        let server = Arc::new(server);
        store.register_adapter("application", server.clone());
        (store, server)
    }

    #[test]
    fn test_find_record_fetches_once_loaded() {
        let (mut store, server) = store_with(Server::default());
        let ticket = store.find_record("post", "1").unwrap();
        let post = store.peek_record("post", "1");
        assert_eq!(post, None);
        assert!(store.ticket(ticket).unwrap().is_pending());

        // Same-tick finds share the ticket.
        assert_eq!(store.find_record("post", "1").unwrap(), ticket);

        let post = store.wait(ticket).unwrap().record().unwrap();
        assert_eq!(store.state(post).unwrap(), RecordState::LoadedSaved);
        assert_eq!(store.attr(post, "title").unwrap(), Some(json!("post 1")));
        assert_eq!(server.find_calls.lock().len(), 1);

        // A loaded record resolves without another call.
        let again = store.find_record("post", "1").unwrap();
        assert!(matches!(store.ticket(again).unwrap(), TicketState::Resolved(_)));
        store.flush().unwrap();
        assert_eq!(server.find_calls.lock().len(), 1);
    }

    #[test]
    fn test_find_record_reload() {
        let (mut store, server) = store_with(Server::default());
        let post = store.push("post", json!({"id": "1", "title": "old"})).unwrap();
        let ticket = store.find_record_with("post", "1", FindOptions::reload()).unwrap();
        assert!(store.models.get(post).unwrap().is_reloading());
        assert_eq!(store.wait(ticket).unwrap().record(), Some(post));
        assert!(!store.models.get(post).unwrap().is_reloading());
        assert_eq!(store.attr(post, "title").unwrap(), Some(json!("post 1")));
        assert_eq!(server.find_calls.lock().len(), 1);
    }

    #[test]
    fn test_find_missing_record_unloads_it() {
        let (mut store, _server) = store_with(Server {
            missing: vec!["7".into()],
            ..Default::default()
        });
        let ticket = store.find_record("post", "7").unwrap();
        let handle = store.models.lookup("post", "7").unwrap();
        assert!(matches!(store.wait(ticket), Err(StoreError::Adapter(_))));
        assert!(store.is_destroyed(handle).unwrap());
        assert!(store.models.lookup("post", "7").is_none());
    }

    #[test]
    fn test_find_with_preload() {
        let (mut store, _server) = store_with(Server::default());
        let ticket = store
            .find_record_with(
                "post",
                "1",
                FindOptions::preload(Properties::new().value("title", json!("preloaded"))),
            )
            .unwrap();
        let handle = store.models.lookup("post", "1").unwrap();
        assert_eq!(store.attr(handle, "title").unwrap(), Some(json!("preloaded")));
        store.wait(ticket).unwrap();
        assert_eq!(store.attr(handle, "title").unwrap(), Some(json!("post 1")));
    }

    #[test]
    fn test_coalesced_find_many_reports_missing() {
        let (mut store, server) = store_with(Server {
            coalesce: true,
            missing: vec!["3".into()],
            ..Default::default()
        });
        let t1 = store.find_record("post", "1").unwrap();
        let t2 = store.find_record("post", "2").unwrap();
        let t3 = store.find_record("post", "3").unwrap();
        store.flush().unwrap();

        assert!(server.find_calls.lock().is_empty());
        assert_eq!(
            *server.find_many_calls.lock(),
            vec![vec!["1".to_string(), "2".to_string(), "3".to_string()]]
        );
        assert!(store.ticket_result(t1).is_ok());
        assert!(store.ticket_result(t2).is_ok());
        assert!(matches!(
            store.ticket_result(t3),
            Err(StoreError::MissingFromPayload { .. })
        ));
    }

    #[test]
    fn test_find_many_resolves_in_order() {
        let (mut store, _server) = store_with(Server::default());
        let ticket = store.find_many("post", &["2", "1"]).unwrap();
        let records = match store.wait(ticket).unwrap() {
            TicketValue::Records(records) => records,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(store.record(records[0]).unwrap().id(), Some("2"));
        assert_eq!(store.record(records[1]).unwrap().id(), Some("1"));
    }

    #[test]
    fn test_find_all_uses_since_token() {
        let (mut store, _server) = store_with(Server::default());
        let ticket = store.find_all("post").unwrap();
        let array = match store.wait(ticket).unwrap() {
            TicketValue::RecordArray(array) => array,
            other => panic!("unexpected {other:?}"),
        };
        let record_array = store.record_array(array).unwrap();
        assert_eq!(record_array.len(), 2);
        assert!(record_array.is_loaded());
        assert!(!record_array.is_updating());
        assert_eq!(store.metadata_for("post"), Some(&json!({"since": 1})));

        // Records are loaded now, so the default policy skips the adapter.
        let ticket = store.find_all("post").unwrap();
        assert!(matches!(store.ticket(ticket).unwrap(), TicketState::Resolved(_)));

        let ticket = store.find_all_with("post", true).unwrap();
        store.wait(ticket).unwrap();
        assert_eq!(store.metadata_for("post"), Some(&json!({"since": 2})));
    }

    #[test]
    fn test_query_populates_array() {
        let (mut store, _server) = store_with(Server::default());
        let ticket = store.query("post", json!({"id": "4"})).unwrap();
        let array = match store.wait(ticket).unwrap() {
            TicketValue::RecordArray(array) => array,
            other => panic!("unexpected {other:?}"),
        };
        let record_array = store.record_array(array).unwrap();
        assert_eq!(record_array.len(), 1);
        assert_eq!(record_array.meta(), Some(&json!({"total": 1})));
        assert_eq!(record_array.query(), Some(&json!({"id": "4"})));
    }

    #[test]
    fn test_find_without_adapter_rejects() {
        let mut schema = SchemaRegistry::new();
        schema.register(ModelSchema::new("post"));
        let mut store = Store::new(StoreConfig::default(), schema);
        let ticket = store.find_record("post", "1").unwrap();
        assert!(matches!(store.wait(ticket), Err(StoreError::NoAdapter(_))));
    }
}
