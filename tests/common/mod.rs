//! Shared fixtures for integration tests: an in-memory server adapter that
//! logs every call, and a small blog schema.

#![allow(dead_code)]

use parking_lot::Mutex;
use record_graph::{
    coerce_id, Adapter, AdapterError, AdapterResult, ModelSchema, RelationshipKind,
    RelationshipMeta, SchemaRegistry, Snapshot, Store, StoreConfig,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// post has many comments (async) and tags (no inverse), belongs to an
/// author; user has many posts.
pub fn blog_schema() -> SchemaRegistry {
    let mut schema = SchemaRegistry::new();
    schema.register(
        ModelSchema::new("post")
            .attr("title")
            .attr_with_default("published", Value::Bool(false))
            .relationship(
                RelationshipMeta::new("comments", RelationshipKind::HasMany, "comment").asynchronous(),
            )
            .belongs_to("author", "user")
            .relationship(RelationshipMeta::new("tags", RelationshipKind::HasMany, "tag").no_inverse()),
    );
    schema.register(ModelSchema::new("comment").attr("body").belongs_to("post", "post"));
    schema.register(ModelSchema::new("user").attr("name").has_many("posts", "post"));
    schema.register(ModelSchema::new("tag").attr("name"));
    schema
}

pub fn blog_store(server: Arc<Server>) -> Store {
    init_tracing();
    let mut store = Store::new(StoreConfig::default(), blog_schema());
    store.register_adapter("application", server);
    store
}

/// In-memory backend. Records live in `data`; scripted replies, when
/// queued, answer writes before the default behaviour does.
#[derive(Default)]
pub struct Server {
    data: Mutex<BTreeMap<(String, String), Map<String, Value>>>,
    links: Mutex<HashMap<String, Value>>,
    replies: Mutex<VecDeque<AdapterResult<Option<Value>>>>,
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    coalesce: bool,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn coalescing() -> Arc<Self> {
        Arc::new(Self {
            coalesce: true,
            ..Default::default()
        })
    }

    pub fn seed(&self, model: &str, record: Value) {
        let Value::Object(hash) = record else {
            panic!("seed expects an object");
        };
        let id = hash.get("id").and_then(coerce_id).expect("seeded record needs an id");
        self.data.lock().insert((model.to_string(), id), hash);
    }

    pub fn link(&self, url: &str, document: Value) {
        self.links.lock().insert(url.to_string(), document);
    }

    /// Answer the next write with `reply`.
    pub fn reply(&self, reply: AdapterResult<Option<Value>>) {
        self.replies.lock().push_back(reply);
    }

    pub fn stored(&self, model: &str, id: &str) -> Option<Value> {
        self.data
            .lock()
            .get(&(model.to_string(), id.to_string()))
            .cloned()
            .map(Value::Object)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of logged calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn lookup(&self, model: &str, id: &str) -> Option<Value> {
        self.stored(model, id)
    }

    fn write(&self, model: &str, snapshot: &Snapshot, id: String) -> Map<String, Value> {
        let mut hash: Map<String, Value> = snapshot
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        hash.insert("id".to_string(), Value::String(id.clone()));
        self.data
            .lock()
            .insert((model.to_string(), id), hash.clone());
        hash
    }
}

impl Adapter for Server {
    fn find_record(&self, model: &str, id: &str, _snapshot: &Snapshot) -> AdapterResult<Value> {
        self.log(format!("find_record {}:{}", model, id));
        self.lookup(model, id)
            .ok_or_else(|| AdapterError::Transport(format!("404 {}:{}", model, id)))
    }

    fn find_many(&self, model: &str, ids: &[String], _snapshots: &[Snapshot]) -> AdapterResult<Value> {
        self.log(format!("find_many {}:{}", model, ids.join(",")));
        let found = ids.iter().filter_map(|id| self.lookup(model, id)).collect();
        Ok(Value::Array(found))
    }

    fn find_all(&self, model: &str, _since: Option<&Value>) -> AdapterResult<Value> {
        self.log(format!("find_all {}", model));
        let records: Vec<Value> = self
            .data
            .lock()
            .iter()
            .filter(|((m, _), _)| m == model)
            .map(|(_, hash)| Value::Object(hash.clone()))
            .collect();
        Ok(Value::Array(records))
    }

    fn query(&self, model: &str, query: &Value) -> AdapterResult<Value> {
        self.log(format!("query {} {}", model, query));
        let wanted = query.as_object().cloned().unwrap_or_default();
        let records: Vec<Value> = self
            .data
            .lock()
            .iter()
            .filter(|((m, _), hash)| m == model && wanted.iter().all(|(k, v)| hash.get(k) == Some(v)))
            .map(|(_, hash)| Value::Object(hash.clone()))
            .collect();
        let total = records.len();
        Ok(serde_json::json!({"data": records, "meta": {"total": total}}))
    }

    fn find_has_many(
        &self,
        _snapshot: &Snapshot,
        link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<Value> {
        self.log(format!("link {}", link));
        self.links
            .lock()
            .get(link)
            .cloned()
            .ok_or_else(|| AdapterError::Transport(format!("404 {}", link)))
    }

    fn find_belongs_to(
        &self,
        snapshot: &Snapshot,
        link: &str,
        relationship: &RelationshipMeta,
    ) -> AdapterResult<Value> {
        self.find_has_many(snapshot, link, relationship)
    }

    fn create_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
        self.log(format!("create {}", model));
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        let id = match &snapshot.id {
            Some(id) => id.clone(),
            None => {
                let mut next = self.next_id.lock();
                *next += 1;
                format!("srv-{}", *next)
            }
        };
        Ok(Some(Value::Object(self.write(model, snapshot, id))))
    }

    fn update_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
        let id = snapshot.id.clone().unwrap_or_default();
        self.log(format!("update {}:{}", model, id));
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        self.write(model, snapshot, id);
        Ok(None)
    }

    fn delete_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>> {
        let id = snapshot.id.clone().unwrap_or_default();
        self.log(format!("delete {}:{}", model, id));
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        self.data.lock().remove(&(model.to_string(), id));
        Ok(None)
    }

    fn coalesce_find_requests(&self) -> bool {
        self.coalesce
    }
}
