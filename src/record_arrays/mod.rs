//! Record arrays: live, filtered and adapter-populated collections.
//!
//! Live and filtered arrays are registered per model type. When a record
//! changes it is queued once; the queued records are re-evaluated against
//! every registered array of their type in a single `UpdateRecordArrays`
//! pass. A reverse index from record to arrays keeps removal of destroyed
//! records proportional to the arrays that actually hold them.

mod manager;
mod record_array;

pub use manager::RecordArrayManager;
pub use record_array::{FilterFn, RecordArray, RecordArrayKind};
