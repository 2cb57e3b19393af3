//! Subscriptions to store change notifications.
//!
//! Consumers that want to observe records (the way a UI layer would) subscribe
//! here instead of polling:
//! - Lifecycle callbacks (`ready`, `did_load`, `did_commit`, ...)
//! - Attribute changes
//! - Relationship membership changes
//! - Record array content changes
//!
//! Subscriptions support filtering by model type and event family, and use
//! bounded buffers; a subscriber that falls behind is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::model_types(vec!["post".to_string()]),
//!     ..Default::default()
//! });
//!
//! store.push("post", json!({"id": "1", "title": "Hello"}))?;
//! store.flush()?;
//!
//! for event in handle.drain() {
//!     match event {
//!         StoreEvent::Lifecycle { event, .. } => println!("{:?}", event),
//!         StoreEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::{SubscriptionManager, DEFAULT_PAYLOAD_THRESHOLD};
pub use types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
