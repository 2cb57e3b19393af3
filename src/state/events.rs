//! Event handlers of the record state chart.
//!
//! Handlers are pure: given a state and an event they return the effects the
//! owning model must apply. Lookup starts at the current state and walks the
//! parent chain; an event no ancestor handles is a programmer error.

use super::chart::{DirtyType, RecordState};
use serde::{Deserialize, Serialize};

/// Context of an attribute write.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    /// Value visible before the write.
    pub old_value: Option<serde_json::Value>,
    /// Last confirmed (or in-flight) value.
    pub original_value: Option<serde_json::Value>,
    pub value: serde_json::Value,
}

/// Events sent into a record's current state.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordEvent {
    LoadingData,
    LoadedData,
    PushedData,
    BecomeDirty,
    DidSetProperty(PropertyChange),
    PropertyWasReset(String),
    DeleteRecord,
    WillCommit,
    DidCommit,
    BecameInvalid,
    BecameValid,
    BecameError,
    RolledBack,
    NotFound,
    UnloadRecord,
    ReloadRecord,
    InvokeLifecycleCallbacks(DirtyType),
}

impl RecordEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecordEvent::LoadingData => "loadingData",
            RecordEvent::LoadedData => "loadedData",
            RecordEvent::PushedData => "pushedData",
            RecordEvent::BecomeDirty => "becomeDirty",
            RecordEvent::DidSetProperty(_) => "didSetProperty",
            RecordEvent::PropertyWasReset(_) => "propertyWasReset",
            RecordEvent::DeleteRecord => "deleteRecord",
            RecordEvent::WillCommit => "willCommit",
            RecordEvent::DidCommit => "didCommit",
            RecordEvent::BecameInvalid => "becameInvalid",
            RecordEvent::BecameValid => "becameValid",
            RecordEvent::BecameError => "becameError",
            RecordEvent::RolledBack => "rolledBack",
            RecordEvent::NotFound => "notFound",
            RecordEvent::UnloadRecord => "unloadRecord",
            RecordEvent::ReloadRecord => "reloadRecord",
            RecordEvent::InvokeLifecycleCallbacks(_) => "invokeLifecycleCallbacks",
        }
    }
}

/// Lifecycle callbacks delivered after the current run loop turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Ready,
    DidLoad,
    DidCreate,
    DidUpdate,
    DidDelete,
    DidCommit,
    BecameInvalid,
    BecameError,
}

/// Side effects requested by a handler or hook.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    TransitionTo(&'static str),
    /// Only transition when the model has no pending local edits.
    TransitionIfClean(&'static str),
    Send(RecordEvent),
    /// Only send when the model has no pending local edits.
    SendIfClean(RecordEvent),
    /// Only send when the model has pending local edits.
    SendIfDirty(RecordEvent),
    TriggerLater(LifecycleEvent),
    DeleteAttribute(String),
    UpdateChangedAttributes,
    UpdateRecordArrays,
    ClearRelationships,
    DisconnectRelationships,
    ReconnectRelationships,
    ClearErrorMessages,
    RemoveErrorMessage(String),
    ClearError,
    ClearLoadingTicket,
    Dematerialize,
    Reload,
    /// Refuse the event with an invalid-operation error.
    Reject(&'static str),
}

use Effect::*;
use RecordState::*;

fn did_set_property(change: &PropertyChange) -> Vec<Effect> {
    let mut effects = Vec::new();
    if change.original_value.as_ref() == Some(&change.value) {
        effects.push(DeleteAttribute(change.name.clone()));
        effects.push(Send(RecordEvent::PropertyWasReset(change.name.clone())));
    } else if change.old_value.as_ref() != Some(&change.value) {
        effects.push(Send(RecordEvent::BecomeDirty));
    }
    effects.push(UpdateRecordArrays);
    effects
}

fn invalid_did_set_property(change: &PropertyChange) -> Vec<Effect> {
    let mut effects = vec![RemoveErrorMessage(change.name.clone())];
    effects.extend(did_set_property(change));
    effects
}

fn lifecycle_callbacks(dirty_type: DirtyType) -> Vec<Effect> {
    let first = match dirty_type {
        DirtyType::Created => LifecycleEvent::DidCreate,
        _ => LifecycleEvent::DidUpdate,
    };
    vec![TriggerLater(first), TriggerLater(LifecycleEvent::DidCommit)]
}

const UNLOAD_IN_FLIGHT: &str = "You can only unload a record which is not inFlight";

/// Handler declared directly on `state` for `event`, without inheritance.
fn local_handler(state: RecordState, event: &RecordEvent) -> Option<Vec<Effect>> {
    use RecordEvent as E;
    let effects = match (state, event) {
        // root
        (Root, E::RolledBack) => vec![],
        (Root, E::PropertyWasReset(_)) => vec![],
        (Root, E::UnloadRecord) => vec![ClearRelationships, TransitionTo("deleted.saved")],
        (Root, E::InvokeLifecycleCallbacks(dirty)) => lifecycle_callbacks(*dirty),

        // empty
        (Empty, E::LoadingData) => vec![TransitionTo("loading")],
        (Empty, E::LoadedData) => vec![
            TransitionTo("loaded.created.uncommitted"),
            TriggerLater(LifecycleEvent::Ready),
        ],
        (Empty, E::PushedData) => vec![
            TransitionTo("loaded.saved"),
            TriggerLater(LifecycleEvent::DidLoad),
            TriggerLater(LifecycleEvent::Ready),
        ],

        // loading
        (Loading, E::PushedData) => vec![
            TransitionTo("loaded.saved"),
            TriggerLater(LifecycleEvent::DidLoad),
            TriggerLater(LifecycleEvent::Ready),
            ClearError,
        ],
        (Loading, E::BecameError) => vec![TriggerLater(LifecycleEvent::BecameError)],
        (Loading, E::NotFound) => vec![TransitionTo("empty")],

        // loaded
        (Loaded, E::LoadingData) => vec![],

        // loaded.saved
        (LoadedSaved, E::DidSetProperty(change)) => did_set_property(change),
        (LoadedSaved, E::PushedData) => vec![],
        (LoadedSaved, E::BecomeDirty) => vec![TransitionTo("updated.uncommitted")],
        (LoadedSaved, E::WillCommit) => vec![TransitionTo("updated.inFlight")],
        (LoadedSaved, E::ReloadRecord) => vec![Reload],
        (LoadedSaved, E::DeleteRecord) => {
            vec![TransitionTo("deleted.uncommitted"), DisconnectRelationships]
        }
        (LoadedSaved, E::UnloadRecord) => vec![ClearRelationships, TransitionTo("deleted.saved")],
        (LoadedSaved, E::DidCommit) => vec![Send(E::InvokeLifecycleCallbacks(DirtyType::Updated))],
        (LoadedSaved, E::NotFound) => vec![],

        // created/updated overrides
        (CreatedUncommitted, E::PushedData) => vec![
            TransitionTo("loaded.updated.uncommitted"),
            TriggerLater(LifecycleEvent::DidLoad),
        ],
        (CreatedUncommitted, E::RolledBack) => vec![TransitionTo("deleted.saved")],
        (CreatedUncommitted, E::DeleteRecord) => {
            vec![ClearRelationships, TransitionTo("deleted.saved")]
        }
        (UpdatedUncommitted, E::DeleteRecord) => {
            vec![TransitionTo("deleted.uncommitted"), DisconnectRelationships]
        }
        (CreatedInvalid, E::RolledBack) => vec![ClearErrorMessages, TransitionTo("deleted.saved")],

        // dirty template: uncommitted
        (CreatedUncommitted | UpdatedUncommitted, E::DidSetProperty(change)) => {
            did_set_property(change)
        }
        (CreatedUncommitted | UpdatedUncommitted, E::LoadingData) => vec![],
        (CreatedUncommitted | UpdatedUncommitted, E::PropertyWasReset(_)) => {
            vec![SendIfClean(E::RolledBack)]
        }
        (CreatedUncommitted | UpdatedUncommitted, E::PushedData) => {
            vec![UpdateChangedAttributes, TransitionIfClean("loaded.saved")]
        }
        (CreatedUncommitted | UpdatedUncommitted, E::BecomeDirty) => vec![],
        (CreatedUncommitted | UpdatedUncommitted, E::WillCommit) => vec![TransitionTo("inFlight")],
        (CreatedUncommitted | UpdatedUncommitted, E::ReloadRecord) => vec![Reload],
        (CreatedUncommitted | UpdatedUncommitted, E::RolledBack) => {
            vec![TransitionTo("loaded.saved")]
        }
        (CreatedUncommitted | UpdatedUncommitted, E::BecameInvalid) => {
            vec![TransitionTo("invalid")]
        }

        // dirty template: inFlight
        (CreatedInFlight | UpdatedInFlight, E::DidSetProperty(change)) => did_set_property(change),
        (CreatedInFlight | UpdatedInFlight, E::BecomeDirty) => vec![],
        (CreatedInFlight | UpdatedInFlight, E::PushedData) => vec![],
        (CreatedInFlight | UpdatedInFlight, E::UnloadRecord) => vec![Reject(UNLOAD_IN_FLIGHT)],
        (CreatedInFlight | UpdatedInFlight, E::WillCommit) => vec![],
        (CreatedInFlight, E::DidCommit) => vec![
            TransitionTo("saved"),
            Send(E::InvokeLifecycleCallbacks(DirtyType::Created)),
        ],
        (UpdatedInFlight, E::DidCommit) => vec![
            TransitionTo("saved"),
            Send(E::InvokeLifecycleCallbacks(DirtyType::Updated)),
        ],
        (CreatedInFlight, E::BecameInvalid) => vec![
            TransitionTo("invalid"),
            Send(E::InvokeLifecycleCallbacks(DirtyType::Created)),
        ],
        (UpdatedInFlight, E::BecameInvalid) => vec![
            TransitionTo("invalid"),
            Send(E::InvokeLifecycleCallbacks(DirtyType::Updated)),
        ],
        (CreatedInFlight | UpdatedInFlight, E::BecameError) => vec![
            TransitionTo("uncommitted"),
            TriggerLater(LifecycleEvent::BecameError),
        ],

        // dirty template: invalid
        (CreatedInvalid | UpdatedInvalid, E::DeleteRecord) => {
            vec![TransitionTo("deleted.uncommitted"), DisconnectRelationships]
        }
        (CreatedInvalid | UpdatedInvalid, E::DidSetProperty(change)) => {
            invalid_did_set_property(change)
        }
        (CreatedInvalid | UpdatedInvalid, E::BecameInvalid) => vec![],
        (CreatedInvalid | UpdatedInvalid, E::BecomeDirty) => vec![],
        (CreatedInvalid | UpdatedInvalid, E::PushedData) => vec![],
        (CreatedInvalid | UpdatedInvalid, E::WillCommit) => {
            vec![ClearErrorMessages, TransitionTo("inFlight")]
        }
        (CreatedInvalid | UpdatedInvalid, E::RolledBack) => vec![
            ClearErrorMessages,
            TransitionTo("loaded.saved"),
            TriggerLater(LifecycleEvent::Ready),
        ],
        (CreatedInvalid | UpdatedInvalid, E::BecameValid) => vec![TransitionTo("uncommitted")],
        (CreatedInvalid | UpdatedInvalid, E::InvokeLifecycleCallbacks(_)) => {
            vec![TriggerLater(LifecycleEvent::BecameInvalid)]
        }

        // deleted.uncommitted
        (DeletedUncommitted, E::WillCommit) => vec![TransitionTo("inFlight")],
        (DeletedUncommitted, E::BecomeDirty) => vec![],
        (DeletedUncommitted, E::DeleteRecord) => vec![],
        (DeletedUncommitted, E::RolledBack) => vec![
            TransitionTo("loaded.saved"),
            TriggerLater(LifecycleEvent::Ready),
            ReconnectRelationships,
            UpdateRecordArrays,
        ],

        // deleted.inFlight
        (DeletedInFlight, E::UnloadRecord) => vec![Reject(UNLOAD_IN_FLIGHT)],
        (DeletedInFlight, E::WillCommit) => vec![],
        (DeletedInFlight, E::DidCommit) => vec![
            TransitionTo("saved"),
            Send(E::InvokeLifecycleCallbacks(DirtyType::Deleted)),
        ],
        (DeletedInFlight, E::BecameError) => vec![
            TransitionTo("uncommitted"),
            TriggerLater(LifecycleEvent::BecameError),
        ],
        (DeletedInFlight, E::BecameInvalid) => vec![
            TransitionTo("invalid"),
            TriggerLater(LifecycleEvent::BecameInvalid),
        ],

        // deleted.saved
        (DeletedSaved, E::InvokeLifecycleCallbacks(_)) => vec![
            TriggerLater(LifecycleEvent::DidDelete),
            TriggerLater(LifecycleEvent::DidCommit),
        ],
        (DeletedSaved, E::WillCommit) => vec![],
        (DeletedSaved, E::DidCommit) => vec![],

        // deleted.invalid
        (DeletedInvalid, E::DidSetProperty(change)) => invalid_did_set_property(change),
        (DeletedInvalid, E::DeleteRecord) => vec![],
        (DeletedInvalid, E::BecomeDirty) => vec![],
        (DeletedInvalid, E::WillCommit) => vec![],
        (DeletedInvalid, E::RolledBack) => vec![
            ClearErrorMessages,
            TransitionTo("loaded.saved"),
            TriggerLater(LifecycleEvent::Ready),
            ReconnectRelationships,
            UpdateRecordArrays,
        ],
        (DeletedInvalid, E::BecameValid) => vec![TransitionTo("uncommitted")],

        _ => return None,
    };
    Some(effects)
}

/// Find the handler for `event`, starting at `state` and walking up.
pub fn dispatch(state: RecordState, event: &RecordEvent) -> Option<Vec<Effect>> {
    state.ancestors().find_map(|s| local_handler(s, event))
}

/// Effects run when `state` is exited.
pub fn exit_effects(state: RecordState) -> Vec<Effect> {
    match state {
        Loading => vec![ClearLoadingTicket],
        _ => vec![],
    }
}

/// Effects run after every entered node has been entered.
pub fn setup_effects(state: RecordState) -> Vec<Effect> {
    match state {
        LoadedSaved => vec![SendIfDirty(RecordEvent::BecomeDirty)],
        Deleted => vec![UpdateRecordArrays],
        DeletedSaved => vec![ClearRelationships, Dematerialize],
        _ => vec![],
    }
}
