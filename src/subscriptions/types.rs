//! Subscription types for store change notifications.

use crate::state::LifecycleEvent;
use crate::types::{ArrayId, ModelId};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Filter by model types (None = all types).
    pub model_types: Option<Vec<String>>,

    /// Include lifecycle callbacks (`ready`, `did_load`, ...).
    pub include_lifecycle: bool,

    /// Include attribute change events.
    pub include_properties: bool,

    /// Include relationship change events.
    pub include_relationships: bool,

    /// Include record array content events.
    pub include_record_arrays: bool,
}

impl SubscriptionFilter {
    /// Lifecycle callbacks for every model type.
    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Every record-level event for the given model types.
    pub fn model_types(types: Vec<String>) -> Self {
        Self {
            model_types: Some(types),
            include_lifecycle: true,
            include_properties: true,
            include_relationships: true,
            include_record_arrays: true,
        }
    }

    pub fn properties() -> Self {
        Self {
            include_properties: true,
            ..Default::default()
        }
    }

    pub fn relationships() -> Self {
        Self {
            include_relationships: true,
            ..Default::default()
        }
    }

    pub fn record_arrays() -> Self {
        Self {
            include_record_arrays: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            model_types: None,
            include_lifecycle: true,
            include_properties: true,
            include_relationships: true,
            include_record_arrays: true,
        }
    }

    pub(crate) fn matches_model(&self, model: &str) -> bool {
        match &self.model_types {
            Some(types) => types.iter().any(|t| t == model),
            None => true,
        }
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    // --- Record Events ---
    /// A deferred lifecycle callback fired.
    Lifecycle {
        model: String,
        id: Option<String>,
        handle: ModelId,
        event: LifecycleEvent,
    },

    /// Visible attribute values changed.
    PropertiesChanged {
        model: String,
        id: Option<String>,
        handle: ModelId,
        keys: Vec<String>,
        /// The new values, when small enough to inline.
        values: Option<serde_json::Value>,
    },

    /// A relationship's visible membership changed.
    RelationshipChanged {
        model: String,
        id: Option<String>,
        handle: ModelId,
        key: String,
    },

    // --- Record Array Events ---
    /// A record array gained or lost records.
    RecordArrayChanged {
        array: ArrayId,
        model: String,
        len: usize,
    },

    // --- Subscription Events ---
    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl StoreEvent {
    /// The model type an event concerns, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            StoreEvent::Lifecycle { model, .. }
            | StoreEvent::PropertiesChanged { model, .. }
            | StoreEvent::RelationshipChanged { model, .. }
            | StoreEvent::RecordArrayChanged { model, .. } => Some(model),
            StoreEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered so far, without blocking.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}
