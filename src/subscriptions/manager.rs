//! Subscription manager for broadcasting store events.

use crate::state::LifecycleEvent;
use crate::types::{ArrayId, AttrMap, ModelId};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};

/// Default threshold for inlining changed values in property events (bytes).
pub const DEFAULT_PAYLOAD_THRESHOLD: usize = 4096;

/// Which family an event belongs to, for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Lifecycle,
    Properties,
    Relationships,
    RecordArrays,
}

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// False when the buffer is full or the receiver is gone.
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    fn matches(&self, family: Family, model: &str) -> bool {
        let filter: &SubscriptionFilter = &self.config.filter;
        let wanted = match family {
            Family::Lifecycle => filter.include_lifecycle,
            Family::Properties => filter.include_properties,
            Family::Relationships => filter.include_relationships,
            Family::RecordArrays => filter.include_record_arrays,
        };
        wanted && filter.matches_model(model)
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Threshold for inlining values in property events.
    payload_threshold: usize,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::with_payload_threshold(DEFAULT_PAYLOAD_THRESHOLD)
    }

    /// Create a new subscription manager with custom payload threshold.
    pub fn with_payload_threshold(threshold: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            payload_threshold: threshold,
        }
    }

    /// Create a new subscription. Events are delivered from now on.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Remove a subscription. Its handle sees a final `Dropped` event.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscriptions.read().is_empty()
    }

    // --- Broadcasting ---

    pub fn broadcast_lifecycle(
        &self,
        model: &str,
        id: Option<&str>,
        handle: ModelId,
        event: LifecycleEvent,
    ) {
        let event = StoreEvent::Lifecycle {
            model: model.to_string(),
            id: id.map(str::to_string),
            handle,
            event,
        };
        self.broadcast(Family::Lifecycle, model, event);
    }

    /// Broadcast changed attribute keys. `values` is inlined when its
    /// serialized size is within the payload threshold.
    pub fn broadcast_properties(
        &self,
        model: &str,
        id: Option<&str>,
        handle: ModelId,
        keys: Vec<String>,
        values: &AttrMap,
    ) {
        if !self.has_subscribers() {
            return;
        }
        let values = serde_json::to_vec(values)
            .ok()
            .filter(|bytes| bytes.len() <= self.payload_threshold)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        let event = StoreEvent::PropertiesChanged {
            model: model.to_string(),
            id: id.map(str::to_string),
            handle,
            keys,
            values,
        };
        self.broadcast(Family::Properties, model, event);
    }

    pub fn broadcast_relationship(&self, model: &str, id: Option<&str>, handle: ModelId, key: &str) {
        let event = StoreEvent::RelationshipChanged {
            model: model.to_string(),
            id: id.map(str::to_string),
            handle,
            key: key.to_string(),
        };
        self.broadcast(Family::Relationships, model, event);
    }

    pub fn broadcast_record_array(&self, array: ArrayId, model: &str, len: usize) {
        let event = StoreEvent::RecordArrayChanged {
            array,
            model: model.to_string(),
            len,
        };
        self.broadcast(Family::RecordArrays, model, event);
    }

    /// Deliver to every matching subscriber, evicting those that cannot keep up.
    fn broadcast(&self, family: Family, model: &str, event: StoreEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.matches(family, model) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        // Evict outside the read lock.
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscription_count())
            .field("payload_threshold", &self.payload_threshold)
            .finish()
    }
}
