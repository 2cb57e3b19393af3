//! Internal models: per-record state, attributes and errors.

mod errors;
mod internal;
mod snapshot;
mod table;
mod view;

pub use errors::RecordErrors;
pub use internal::{AttributeChange, InternalModel};
pub use snapshot::{Snapshot, SnapshotRelationship};
pub use table::{ModelLookup, ModelTable};
pub use view::RecordView;
