//! Record array types.

use crate::model::RecordView;
use crate::ordered_set::OrderedSet;
use crate::types::{ArrayId, ModelId};
use std::fmt;

/// Membership predicate of a filtered array.
pub type FilterFn = Box<dyn Fn(&RecordView<'_>) -> bool + Send>;

/// How an array's content is decided.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordArrayKind {
    /// Every loaded record of the type.
    Live,
    /// Loaded records of the type accepted by a predicate.
    Filtered,
    /// Records returned by an adapter query, loaded once.
    AdapterPopulated { query: serde_json::Value },
}

/// An ordered collection of records of one type.
pub struct RecordArray {
    id: ArrayId,
    model_name: String,
    kind: RecordArrayKind,
    content: OrderedSet<ModelId>,
    filter: Option<FilterFn>,
    is_loaded: bool,
    is_updating: bool,
    meta: Option<serde_json::Value>,
}

impl RecordArray {
    pub(crate) fn new(id: ArrayId, model_name: &str, kind: RecordArrayKind) -> Self {
        Self {
            id,
            model_name: model_name.to_string(),
            kind,
            content: OrderedSet::new(),
            filter: None,
            is_loaded: false,
            is_updating: false,
            meta: None,
        }
    }

    pub fn id(&self) -> ArrayId {
        self.id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn kind(&self) -> &RecordArrayKind {
        &self.kind
    }

    pub fn query(&self) -> Option<&serde_json::Value> {
        match &self.kind {
            RecordArrayKind::AdapterPopulated { query } => Some(query),
            _ => None,
        }
    }

    pub fn records(&self) -> &[ModelId] {
        self.content.as_slice()
    }

    pub fn get(&self, index: usize) -> Option<ModelId> {
        self.content.as_slice().get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn contains(&self, record: ModelId) -> bool {
        self.content.has(&record)
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// True while a refetch for this array is outstanding.
    pub fn is_updating(&self) -> bool {
        self.is_updating
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.is_loaded = loaded;
    }

    pub(crate) fn set_updating(&mut self, updating: bool) {
        self.is_updating = updating;
    }

    pub(crate) fn set_meta(&mut self, meta: Option<serde_json::Value>) {
        self.meta = meta;
    }

    pub(crate) fn set_filter(&mut self, filter: Option<FilterFn>) {
        self.filter = filter;
    }

    /// Whether `view` belongs here, ignoring record state.
    pub(crate) fn accepts(&self, view: &RecordView<'_>) -> bool {
        match (&self.kind, &self.filter) {
            (RecordArrayKind::AdapterPopulated { .. }, _) => false,
            (_, Some(filter)) => filter(view),
            (RecordArrayKind::Filtered, None) => false,
            (RecordArrayKind::Live, None) => true,
        }
    }

    pub(crate) fn add_record(&mut self, record: ModelId) -> bool {
        self.content.add(record)
    }

    pub(crate) fn remove_record(&mut self, record: ModelId) -> bool {
        self.content.delete(&record)
    }

    /// Replace the content wholesale; returns the previous content.
    pub(crate) fn replace_content(&mut self, records: &[ModelId]) -> Vec<ModelId> {
        let previous = self.content.to_vec();
        self.content.clear();
        for record in records {
            self.content.add(*record);
        }
        previous
    }
}

impl fmt::Debug for RecordArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordArray")
            .field("id", &self.id)
            .field("model_name", &self.model_name)
            .field("kind", &self.kind)
            .field("len", &self.content.len())
            .field("has_filter", &self.filter.is_some())
            .field("is_loaded", &self.is_loaded)
            .field("is_updating", &self.is_updating)
            .finish()
    }
}
