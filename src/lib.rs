//! # Record Graph
//!
//! A client-side record store: an identity map of records, each driven by a
//! lifecycle state machine, connected by a relationship graph that keeps
//! both sides of every edge in step, and observed through live record
//! arrays.
//!
//! ## Core Concepts
//!
//! - **Records**: One internal model per `(type, id)`, moving through
//!   `empty`, `loading`, `loaded.*` and `deleted.*` states
//! - **Relationships**: Belongs-to and has-many edges with a canonical
//!   (server) side and a local side reconciled on flush
//! - **Record arrays**: Live, filtered and query-populated collections
//! - **Run loop**: Deferred work queues; adapter calls only happen on flush,
//!   so fetches made in one tick coalesce
//!
//! ## Example
//!
//! ```ignore
//! use record_graph::{ModelSchema, SchemaRegistry, Store, StoreConfig};
//!
//! let mut schema = SchemaRegistry::new();
//! schema.register(ModelSchema::new("post").attr("title").has_many("comments", "comment"));
//! schema.register(ModelSchema::new("comment").attr("body").belongs_to("post", "post"));
//!
//! let mut store = Store::new(StoreConfig::default(), schema);
//! store.register_adapter("application", Arc::new(MyAdapter::default()));
//!
//! // Load server data
//! let post = store.push("post", json!({"id": "1", "title": "Hello", "comments": ["2"]}))?;
//!
//! // Edit and save
//! store.set_attr(post, "title", json!("Hello again"))?;
//! let ticket = store.save_record(post)?;
//! store.wait(ticket)?;
//! ```

pub mod adapter;
pub mod error;
pub mod model;
pub mod ordered_set;
pub mod record_arrays;
pub mod registry;
pub mod relationships;
pub mod runloop;
pub mod schema;
pub mod serializer;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod tickets;
pub mod types;

// Re-exports
pub use adapter::{group_by_url, strip_id_from_url, Adapter, AdapterError, AdapterResult};
pub use error::{FieldErrors, Result, StoreError};
pub use model::{AttributeChange, RecordErrors, RecordView, Snapshot, SnapshotRelationship};
pub use ordered_set::OrderedSet;
pub use record_arrays::{FilterFn, RecordArray, RecordArrayKind};
pub use relationships::{EdgeKey, ManyArray, Relationship};
pub use schema::{ModelSchema, RelationshipKind, RelationshipMeta, SchemaRegistry};
pub use serializer::{
    IncludedResource, NormalizedPayload, PassthroughSerializer, PrimaryData, RequestType,
    ResourceHash, Serializer,
};
pub use state::{DirtyType, LifecycleEvent, RecordEvent, RecordState, StateFlags};
pub use store::{
    BelongsToValue, FindOptions, HasManyValue, Properties, PropertyValue, Store, StoreConfig,
};
pub use subscriptions::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
pub use tickets::{TicketState, TicketValue};
pub use types::*;
