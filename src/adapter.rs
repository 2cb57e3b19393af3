//! The adapter contract: how records are fetched and persisted.
//!
//! Adapters are synchronous; the store only calls them while flushing its
//! run loop, so every call made within one tick is already batched.

use crate::model::Snapshot;
use crate::schema::RelationshipMeta;
use crate::types::AttrMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure reported by an adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Semantic rejection of a write; carries the raw error document.
    #[error("The adapter rejected the record as invalid")]
    Invalid(Value),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Adapter does not implement {0}")]
    Unsupported(&'static str),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Default cap used when splitting coalesced requests by URL length.
pub const DEFAULT_MAX_URL_LENGTH: usize = 2048;

/// Length of the `&ids%5B%5D=` query parameter added per id.
const IDS_PARAM_LENGTH: usize = "&ids%5B%5D=".len();

/// Characters a URI component leaves unescaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub trait Adapter: Send + Sync {
    fn find_record(&self, model: &str, id: &str, snapshot: &Snapshot) -> AdapterResult<Value>;

    fn find_many(&self, _model: &str, _ids: &[String], _snapshots: &[Snapshot]) -> AdapterResult<Value> {
        Err(AdapterError::Unsupported("find_many"))
    }

    /// `since` is the token from the last find-all payload's meta.
    fn find_all(&self, _model: &str, _since: Option<&Value>) -> AdapterResult<Value> {
        Err(AdapterError::Unsupported("find_all"))
    }

    fn query(&self, _model: &str, _query: &Value) -> AdapterResult<Value> {
        Err(AdapterError::Unsupported("query"))
    }

    fn find_has_many(
        &self,
        _snapshot: &Snapshot,
        _link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<Value> {
        Err(AdapterError::Unsupported("find_has_many"))
    }

    fn find_belongs_to(
        &self,
        _snapshot: &Snapshot,
        _link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<Value> {
        Err(AdapterError::Unsupported("find_belongs_to"))
    }

    /// `None` means the server acknowledged without returning data.
    fn create_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>>;

    fn update_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>>;

    fn delete_record(&self, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<Value>>;

    /// Merge same-tick fetches of one type into `find_many` calls.
    fn coalesce_find_requests(&self) -> bool {
        false
    }

    /// Partition pending fetches into `find_many` batches.
    fn group_records_for_find_many(&self, snapshots: &[Snapshot]) -> Vec<Vec<Snapshot>> {
        vec![snapshots.to_vec()]
    }

    /// Client-side id for a newly created record.
    fn generate_id_for_record(&self, _model: &str, _properties: &AttrMap) -> Option<String> {
        None
    }

    fn max_url_length(&self) -> usize {
        DEFAULT_MAX_URL_LENGTH
    }

    /// Whether `find_all` must hit the adapter given how many records of
    /// the type are already loaded.
    fn should_reload_all(&self, _model: &str, loaded: usize) -> bool {
        loaded == 0
    }
}

/// Remove a trailing `/:id` or `?id=:id` from a record URL.
pub fn strip_id_from_url(url: &str, id: &str) -> String {
    let mut segments: Vec<String> = url.split('/').map(str::to_string).collect();
    let query_suffix = format!("?id={}", id);
    if let Some(last) = segments.last_mut() {
        if last.as_str() == id {
            last.clear();
        } else if let Some(base) = last.strip_suffix(&query_suffix) {
            *last = base.to_string();
        }
    }
    segments.join("/")
}

/// Length of `id` once percent-encoded as a query component.
fn encoded_len(id: &str) -> usize {
    utf8_percent_encode(id, URI_COMPONENT).map(str::len).sum()
}

/// Group snapshots by base URL, then split each group so the resulting
/// `find_many` URL stays under `max_url_length`.
///
/// `build_url` maps a snapshot to its single-record URL.
pub fn group_by_url<F>(snapshots: &[Snapshot], build_url: F, max_url_length: usize) -> Vec<Vec<Snapshot>>
where
    F: Fn(&Snapshot) -> String,
{
    let mut groups: BTreeMap<usize, (String, Vec<Snapshot>)> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for snapshot in snapshots {
        let id = snapshot.id.as_deref().unwrap_or_default();
        let base = strip_id_from_url(&build_url(snapshot), id);
        let slot = match order.iter().position(|b| *b == base) {
            Some(slot) => slot,
            None => {
                order.push(base.clone());
                order.len() - 1
            }
        };
        groups
            .entry(slot)
            .or_insert_with(|| (base, Vec::new()))
            .1
            .push(snapshot.clone());
    }

    let mut result = Vec::new();
    for (_, (base, group)) in groups {
        let mut ids_size = 0;
        let mut current: Vec<Snapshot> = Vec::new();
        for snapshot in group {
            let id = snapshot.id.as_deref().unwrap_or_default();
            let additional = encoded_len(id) + IDS_PARAM_LENGTH;
            if !current.is_empty() && base.len() + ids_size + additional >= max_url_length {
                result.push(std::mem::take(&mut current));
                ids_size = 0;
            }
            ids_size += additional;
            current.push(snapshot);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
