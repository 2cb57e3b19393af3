//! Error types for the record graph.

use crate::adapter::AdapterError;
use crate::types::{ArrayId, FetchTicket, ModelId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Validation messages keyed by attribute name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Main error type for store operations.
///
/// Cloneable so a single rejection can be handed to every waiter on a ticket.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("No model was registered for type '{0}'")]
    UnknownModelType(String),

    #[error("Model '{model}' has no relationship named '{key}'")]
    UnknownRelationship { model: String, key: String },

    #[error("Model '{model}' has no attribute named '{key}'")]
    UnknownAttribute { model: String, key: String },

    #[error("Unknown record: {0}")]
    UnknownRecord(ModelId),

    #[error("Unknown record array: {0}")]
    UnknownRecordArray(ArrayId),

    #[error("Unknown ticket: {0:?}")]
    UnknownTicket(FetchTicket),

    #[error("Ticket {0:?} has not settled; flush the store first")]
    TicketPending(FetchTicket),

    #[error("Ticket {0:?} was abandoned because its record was destroyed")]
    TicketAbandoned(FetchTicket),

    #[error("Attempted to handle event `{event}` on {model} while in state {state}")]
    UnhandledEvent {
        event: String,
        state: String,
        model: String,
    },

    #[error("Invalid state path '{path}' from {from}")]
    InvalidStatePath { path: String, from: String },

    #[error("Multiple possible inverses for {model}.{key}: {candidates:?}")]
    AmbiguousInverse {
        model: String,
        key: String,
        candidates: Vec<String>,
    },

    #[error("No adapter registered for '{0}'")]
    NoAdapter(String),

    #[error("Record not found: {model}:{id}")]
    NotFound { model: String, id: String },

    #[error("Expected {model}:{id} to be present in the adapter payload, but it was not found")]
    MissingFromPayload { model: String, id: String },

    #[error("Relationship {model}.{key} is not loaded; mark it async or load the related records first")]
    RelationshipNotLoaded { model: String, key: String },

    #[error("Cannot change the id of {model} from {old} to {new}")]
    IdMismatch {
        model: String,
        old: String,
        new: String,
    },

    #[error("Record {0} was destroyed")]
    RecordDestroyed(ModelId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Run loop did not settle after running {0} tasks")]
    FlushLimit(usize),

    #[error("The adapter rejected the commit because it was invalid")]
    Invalid(FieldErrors),

    #[error("Adapter error: {0}")]
    Adapter(AdapterError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<AdapterError> for StoreError {
    fn from(e: AdapterError) -> Self {
        StoreError::Adapter(e)
    }
}

impl StoreError {
    /// True for validation rejections (recoverable by editing and resaving).
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            StoreError::Invalid(_) | StoreError::Adapter(AdapterError::Invalid(_))
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
