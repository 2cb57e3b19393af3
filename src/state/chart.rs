//! The record state chart.
//!
//! States form a tree rooted at `root`. Flags are declared on the node that
//! introduces them and inherited by descendants unless overridden, mirroring
//! a prototype chain with an explicit parent table.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of the record state chart. Records always rest on a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    Root,
    Empty,
    Loading,
    Loaded,
    LoadedSaved,
    Created,
    CreatedUncommitted,
    CreatedInFlight,
    CreatedInvalid,
    Updated,
    UpdatedUncommitted,
    UpdatedInFlight,
    UpdatedInvalid,
    Deleted,
    DeletedUncommitted,
    DeletedInFlight,
    DeletedSaved,
    DeletedInvalid,
}

/// Which dirty shape a state belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyType {
    Created,
    Updated,
    Deleted,
}

/// Boolean flags observable by consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    IsEmpty,
    IsLoading,
    IsLoaded,
    IsDirty,
    IsSaving,
    IsDeleted,
    IsNew,
    IsValid,
}

/// Resolved flag values for one state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    pub is_empty: bool,
    pub is_loading: bool,
    pub is_loaded: bool,
    pub is_dirty: bool,
    pub is_saving: bool,
    pub is_deleted: bool,
    pub is_new: bool,
    pub is_valid: bool,
}

/// Every node in the chart, parents before children.
pub const ALL_STATES: [RecordState; 18] = [
    RecordState::Root,
    RecordState::Empty,
    RecordState::Loading,
    RecordState::Loaded,
    RecordState::LoadedSaved,
    RecordState::Created,
    RecordState::CreatedUncommitted,
    RecordState::CreatedInFlight,
    RecordState::CreatedInvalid,
    RecordState::Updated,
    RecordState::UpdatedUncommitted,
    RecordState::UpdatedInFlight,
    RecordState::UpdatedInvalid,
    RecordState::Deleted,
    RecordState::DeletedUncommitted,
    RecordState::DeletedInFlight,
    RecordState::DeletedSaved,
    RecordState::DeletedInvalid,
];

impl RecordState {
    pub fn parent(self) -> Option<RecordState> {
        use RecordState::*;
        match self {
            Root => None,
            Empty | Loading | Loaded | Deleted => Some(Root),
            LoadedSaved | Created | Updated => Some(Loaded),
            CreatedUncommitted | CreatedInFlight | CreatedInvalid => Some(Created),
            UpdatedUncommitted | UpdatedInFlight | UpdatedInvalid => Some(Updated),
            DeletedUncommitted | DeletedInFlight | DeletedSaved | DeletedInvalid => Some(Deleted),
        }
    }

    /// The node's own path segment.
    pub fn name(self) -> &'static str {
        use RecordState::*;
        match self {
            Root => "root",
            Empty => "empty",
            Loading => "loading",
            Loaded => "loaded",
            LoadedSaved | DeletedSaved => "saved",
            Created => "created",
            Updated => "updated",
            Deleted => "deleted",
            CreatedUncommitted | UpdatedUncommitted | DeletedUncommitted => "uncommitted",
            CreatedInFlight | UpdatedInFlight | DeletedInFlight => "inFlight",
            CreatedInvalid | UpdatedInvalid | DeletedInvalid => "invalid",
        }
    }

    /// Dotted path from the root, e.g. `root.loaded.created.uncommitted`.
    pub fn path(self) -> String {
        let mut segments: Vec<&'static str> = self.ancestors().map(|s| s.name()).collect();
        segments.reverse();
        segments.join(".")
    }

    /// This node followed by each ancestor up to the root.
    pub fn ancestors(self) -> impl Iterator<Item = RecordState> {
        std::iter::successors(Some(self), |s| s.parent())
    }

    pub fn child(self, name: &str) -> Option<RecordState> {
        ALL_STATES
            .iter()
            .copied()
            .find(|s| s.parent() == Some(self) && s.name() == name)
    }

    /// Child entered automatically when transitioning into a non-leaf node.
    pub fn initial_child(self) -> Option<RecordState> {
        use RecordState::*;
        match self {
            Loaded => Some(LoadedSaved),
            Created => Some(CreatedUncommitted),
            Updated => Some(UpdatedUncommitted),
            Deleted => Some(DeletedUncommitted),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        !ALL_STATES.iter().any(|s| s.parent() == Some(self))
    }

    fn local_flag(self, flag: Flag) -> Option<bool> {
        use Flag::*;
        use RecordState::*;
        match (self, flag) {
            (Root, IsValid) => Some(true),
            (Root, _) => Some(false),
            (Empty, IsEmpty) => Some(true),
            (Loading, IsLoading) => Some(true),
            (Loaded, IsLoaded) => Some(true),
            (Created, IsDirty) | (Created, IsNew) => Some(true),
            (Updated, IsDirty) => Some(true),
            (CreatedInFlight | UpdatedInFlight | DeletedInFlight, IsSaving) => Some(true),
            (CreatedInvalid | UpdatedInvalid | DeletedInvalid, IsValid) => Some(false),
            (Deleted, IsDeleted) | (Deleted, IsLoaded) | (Deleted, IsDirty) => Some(true),
            (DeletedSaved, IsDirty) => Some(false),
            _ => None,
        }
    }

    /// Resolve a flag by walking up the parent chain.
    pub fn flag(self, flag: Flag) -> bool {
        self.ancestors()
            .find_map(|s| s.local_flag(flag))
            .unwrap_or(false)
    }

    pub fn flags(self) -> StateFlags {
        StateFlags {
            is_empty: self.flag(Flag::IsEmpty),
            is_loading: self.flag(Flag::IsLoading),
            is_loaded: self.flag(Flag::IsLoaded),
            is_dirty: self.flag(Flag::IsDirty),
            is_saving: self.flag(Flag::IsSaving),
            is_deleted: self.flag(Flag::IsDeleted),
            is_new: self.flag(Flag::IsNew),
            is_valid: self.flag(Flag::IsValid),
        }
    }

    pub fn dirty_type(self) -> Option<DirtyType> {
        self.ancestors().find_map(|s| match s {
            RecordState::Created => Some(DirtyType::Created),
            RecordState::Updated => Some(DirtyType::Updated),
            RecordState::Deleted => Some(DirtyType::Deleted),
            _ => None,
        })
    }

    /// Plan a transition to a dotted `path` relative to this state.
    ///
    /// Walks up from the current state until an ancestor owns the first path
    /// segment (exiting each node passed), then descends the path and any
    /// initial children.
    pub fn plan_transition(self, path: &str) -> Result<TransitionPlan> {
        let invalid = || StoreError::InvalidStatePath {
            path: path.to_string(),
            from: self.path(),
        };
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let pivot_name = *segments.first().ok_or_else(invalid)?;

        let mut exits = Vec::new();
        let mut state = self;
        loop {
            exits.push(state);
            state = state.parent().ok_or_else(invalid)?;
            if state.child(pivot_name).is_some() {
                break;
            }
        }

        let mut enters = Vec::new();
        for segment in segments {
            state = state.child(segment).ok_or_else(invalid)?;
            enters.push(state);
        }
        while let Some(initial) = state.initial_child() {
            state = initial;
            enters.push(state);
        }

        Ok(TransitionPlan {
            exits,
            enters,
            target: state,
        })
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Nodes exited and entered by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub exits: Vec<RecordState>,
    pub enters: Vec<RecordState>,
    pub target: RecordState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(RecordState::Root.path(), "root");
        assert_eq!(
            RecordState::CreatedUncommitted.path(),
            "root.loaded.created.uncommitted"
        );
        assert_eq!(RecordState::DeletedSaved.path(), "root.deleted.saved");
    }

    #[test]
    fn test_flag_inheritance() {
        let flags = RecordState::CreatedInFlight.flags();
        assert!(flags.is_loaded && flags.is_dirty && flags.is_new && flags.is_saving);
        assert!(flags.is_valid);
        assert!(!flags.is_deleted);

        let flags = RecordState::DeletedSaved.flags();
        assert!(flags.is_deleted);
        assert!(!flags.is_dirty);

        assert!(!RecordState::UpdatedInvalid.flag(Flag::IsValid));
        assert!(RecordState::Empty.flag(Flag::IsEmpty));
        assert!(!RecordState::LoadedSaved.flag(Flag::IsDirty));
    }

    #[test]
    fn test_plan_sibling_transition() {
        let plan = RecordState::CreatedUncommitted.plan_transition("inFlight").unwrap();
        assert_eq!(plan.exits, vec![RecordState::CreatedUncommitted]);
        assert_eq!(plan.enters, vec![RecordState::CreatedInFlight]);
        assert_eq!(plan.target, RecordState::CreatedInFlight);
    }

    #[test]
    fn test_plan_descends_initial_states() {
        let plan = RecordState::LoadedSaved.plan_transition("updated").unwrap();
        assert_eq!(plan.target, RecordState::UpdatedUncommitted);

        let plan = RecordState::Empty.plan_transition("loaded").unwrap();
        assert_eq!(plan.enters, vec![RecordState::Loaded, RecordState::LoadedSaved]);
    }

    #[test]
    fn test_plan_walks_to_common_ancestor() {
        let plan = RecordState::CreatedUncommitted
            .plan_transition("deleted.saved")
            .unwrap();
        assert_eq!(
            plan.exits,
            vec![
                RecordState::CreatedUncommitted,
                RecordState::Created,
                RecordState::Loaded
            ]
        );
        assert_eq!(plan.enters, vec![RecordState::Deleted, RecordState::DeletedSaved]);

        let plan = RecordState::CreatedInFlight.plan_transition("saved").unwrap();
        assert_eq!(plan.target, RecordState::LoadedSaved);

        let plan = RecordState::DeletedInFlight.plan_transition("saved").unwrap();
        assert_eq!(plan.target, RecordState::DeletedSaved);
    }

    #[test]
    fn test_plan_invalid_path() {
        let err = RecordState::Empty.plan_transition("nowhere").unwrap_err();
        assert!(matches!(err, StoreError::InvalidStatePath { .. }));
    }

    #[test]
    fn test_only_leaves_have_no_initial_child() {
        for state in ALL_STATES {
            assert_eq!(state.is_leaf(), state.initial_child().is_none() && state != RecordState::Root);
        }
    }
}
