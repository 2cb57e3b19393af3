//! Loading server data into the store.

use crate::error::{Result, StoreError};
use crate::relationships::EdgeKey;
use crate::schema::{RelationshipKind, RelationshipMeta};
use crate::serializer::{NormalizedPayload, PrimaryData, RequestType, ResourceHash};
use crate::state::RecordEvent;
use crate::types::{coerce_id, AttrMap, ModelId};
use serde_json::Value;

use super::Store;

/// Keys of a resource hash that are neither attributes nor relationships.
const RESERVED_KEYS: [&str; 4] = ["id", "type", "links", "meta"];

impl Store {
    // --- Push ---

    /// Push one normalized resource hash. The record is created if unknown
    /// and its attributes and relationships are replaced by the pushed ones.
    pub fn push(&mut self, model_name: &str, data: Value) -> Result<ModelId> {
        let hash = match data {
            Value::Object(hash) => hash,
            other => {
                return Err(StoreError::Serialization(format!(
                    "expected an object to push for {}, got {}",
                    model_name, other
                )))
            }
        };
        self.join(|store| store.push_hash(model_name, hash))
    }

    /// Push several hashes of one type as a single unit.
    pub fn push_many(&mut self, model_name: &str, data: Vec<Value>) -> Result<Vec<ModelId>> {
        self.join(|store| {
            data.into_iter()
                .map(|item| store.push(model_name, item))
                .collect()
        })
    }

    /// Run a raw payload through the model's serializer and push the result.
    /// Returns the primary records.
    pub fn push_payload(&mut self, model_name: &str, raw: Value) -> Result<Vec<ModelId>> {
        self.schema.get(model_name)?;
        let payload = self
            .registry
            .serializer_for(model_name)
            .extract(model_name, raw, None, RequestType::PushPayload)?;
        self.push_document(model_name, payload)
    }

    /// Push sideloaded resources first, then primary data.
    pub(crate) fn push_document(
        &mut self,
        model_name: &str,
        payload: NormalizedPayload,
    ) -> Result<Vec<ModelId>> {
        if let Some(meta) = &payload.meta {
            self.merge_metadata(model_name, meta);
        }
        self.join(|store| {
            for included in payload.included {
                store.push_hash(&included.model, included.hash)?;
            }
            match payload.primary {
                PrimaryData::None => Ok(Vec::new()),
                PrimaryData::One(hash) => Ok(vec![store.push_hash(model_name, hash)?]),
                PrimaryData::Many(hashes) => hashes
                    .into_iter()
                    .map(|hash| store.push_hash(model_name, hash))
                    .collect(),
            }
        })
    }

    pub(crate) fn push_hash(&mut self, model_name: &str, hash: ResourceHash) -> Result<ModelId> {
        self.schema.get(model_name)?;
        let id = hash.get("id").and_then(coerce_id).ok_or_else(|| {
            StoreError::Serialization(format!(
                "You must include an `id` for {} in the hash passed to `push`",
                model_name
            ))
        })?;
        let handle = self.record_for_id(model_name, &id)?;
        self.setup_data(handle, &hash)?;
        self.setup_relationships(handle, &hash)?;
        Ok(handle)
    }

    /// Declared attributes of a resource hash. Unknown keys are logged and
    /// skipped.
    pub(crate) fn attributes_from_hash(&self, model_name: &str, hash: &ResourceHash) -> Result<AttrMap> {
        let schema = self.schema.get(model_name)?;
        let mut attributes = AttrMap::new();
        for (key, value) in hash {
            if schema.attribute(key).is_some() {
                attributes.insert(key.clone(), value.clone());
            } else if !schema.is_relationship(key) && !RESERVED_KEYS.contains(&key.as_str()) {
                tracing::warn!(model = model_name, key = %key, "ignoring undeclared key in payload");
            }
        }
        Ok(attributes)
    }

    fn setup_data(&mut self, handle: ModelId, hash: &ResourceHash) -> Result<()> {
        let model_name = self.models.live(handle)?.model_name().to_string();
        let updates = self.attributes_from_hash(&model_name, hash)?;
        let changed = self.models.live_mut(handle)?.merge_data(&updates);
        self.send(handle, RecordEvent::PushedData)?;
        self.record_did_change(handle);
        self.notify_properties(handle, changed);
        Ok(())
    }

    /// Apply relationship values and links of a resource hash as canonical
    /// state. Keys absent from the hash are left untouched.
    pub(crate) fn setup_relationships(&mut self, handle: ModelId, hash: &ResourceHash) -> Result<()> {
        let model_name = self.models.live(handle)?.model_name().to_string();
        let relationships = self.schema.get(&model_name)?.relationships.clone();
        let links = hash.get("links").and_then(Value::as_object);

        for meta in &relationships {
            let key = EdgeKey::declared(meta.key.as_str());
            if let Some(link) = links.and_then(|l| l.get(&meta.key)).and_then(Value::as_str) {
                let link = link.to_string();
                self.with_graph(|graph, ctx| graph.update_link(ctx, handle, &key, link))?;
            }
            let Some(value) = hash.get(&meta.key) else {
                continue;
            };
            match meta.kind {
                RelationshipKind::BelongsTo => {
                    let target = self.resolve_reference(meta, value)?;
                    self.with_graph(|graph, ctx| graph.set_canonical_record(ctx, handle, &key, target))?;
                }
                RelationshipKind::HasMany => {
                    let records = self.resolve_references(meta, value)?;
                    self.with_graph(|graph, ctx| graph.compute_changes(ctx, handle, &key, &records))?;
                }
            }
        }
        Ok(())
    }

    /// Resolve a relationship value (`null`, an id, or `{"id", "type"}`)
    /// to a record, creating an empty one when the id is unknown.
    pub(crate) fn resolve_reference(
        &mut self,
        meta: &RelationshipMeta,
        value: &Value,
    ) -> Result<Option<ModelId>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(reference) => {
                let id = reference.get("id").and_then(coerce_id).ok_or_else(|| {
                    StoreError::Serialization(format!("reference without an id in {}", meta.key))
                })?;
                let model = reference
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or(&meta.target);
                self.record_for_id(model, &id).map(Some)
            }
            other => {
                let id = coerce_id(other).ok_or_else(|| {
                    StoreError::Serialization(format!("invalid reference {} in {}", other, meta.key))
                })?;
                self.record_for_id(&meta.target, &id).map(Some)
            }
        }
    }

    pub(crate) fn resolve_references(
        &mut self,
        meta: &RelationshipMeta,
        value: &Value,
    ) -> Result<Vec<ModelId>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(record) = self.resolve_reference(meta, item)? {
                        records.push(record);
                    }
                }
                Ok(records)
            }
            other => Err(StoreError::Serialization(format!(
                "expected a list for {}, got {}",
                meta.key, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelSchema, SchemaRegistry};
    use crate::state::RecordState;
    use crate::store::StoreConfig;
    use serde_json::json;

    fn store() -> Store {
        let mut schema = SchemaRegistry::new();
        schema.register(
            ModelSchema::new("post")
                .attr("title")
                .has_many("comments", "comment")
                .belongs_to("author", "user"),
        );
        schema.register(ModelSchema::new("comment").attr("body").belongs_to("post", "post"));
        schema.register(ModelSchema::new("user").attr("name"));
        Store::new(StoreConfig::default(), schema)
    }

    #[test]
    fn test_push_requires_id() {
        let mut store = store();
        let err = store.push("post", json!({"title": "x"})).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert!(matches!(
            store.push("nope", json!({"id": 1})),
            Err(StoreError::UnknownModelType(_))
        ));
    }

    #[test]
    fn test_push_numeric_id_is_coerced() {
        let mut store = store();
        let a = store.push("post", json!({"id": 1, "title": "a"})).unwrap();
        let b = store.push("post", json!({"id": "1"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.attr(a, "title").unwrap(), Some(json!("a")));
    }

    #[test]
    fn test_push_sets_up_relationships_in_order() {
        let mut store = store();
        let post = store
            .push("post", json!({"id": "1", "comments": ["2", "3"], "author": 9}))
            .unwrap();
        let comments = store.many_array(post, "comments").unwrap().records().to_vec();
        assert_eq!(comments.len(), 2);
        assert_eq!(store.record(comments[0]).unwrap().id(), Some("2"));
        assert_eq!(store.record(comments[1]).unwrap().id(), Some("3"));
        assert_eq!(store.state(comments[0]).unwrap(), RecordState::Empty);

        // The inverse side is maintained too.
        let rel = store
            .graph
            .get(comments[0], &EdgeKey::declared("post"))
            .unwrap();
        assert_eq!(rel.target(), Some(post));
    }

    #[test]
    fn test_push_without_key_keeps_relationship() {
        let mut store = store();
        let post = store.push("post", json!({"id": "1", "comments": ["2"]})).unwrap();
        store.push("post", json!({"id": "1", "title": "t"})).unwrap();
        assert_eq!(store.many_array(post, "comments").unwrap().len(), 1);

        store.push("post", json!({"id": "1", "comments": []})).unwrap();
        assert!(store.many_array(post, "comments").unwrap().is_empty());
    }

    #[test]
    fn test_push_payload_with_included_and_meta() {
        let mut store = store();
        let pushed = store
            .push_payload(
                "post",
                json!({
                    "data": [{"id": "1", "comments": ["2"]}],
                    "included": [{"type": "comment", "id": "2", "body": "hi"}],
                    "meta": {"total": 1}
                }),
            )
            .unwrap();
        assert_eq!(pushed.len(), 1);
        let comment = store.peek_record("comment", "2").unwrap();
        assert_eq!(store.attr(comment, "body").unwrap(), Some(json!("hi")));
        assert_eq!(store.metadata_for("post"), Some(&json!({"total": 1})));
    }

    #[test]
    fn test_polymorphic_reference_uses_type() {
        let mut schema = SchemaRegistry::new();
        schema.register(
            ModelSchema::new("comment").relationship(
                RelationshipMeta::new("subject", RelationshipKind::BelongsTo, "post").polymorphic(),
            ),
        );
        schema.register(ModelSchema::new("post"));
        schema.register(ModelSchema::new("photo"));
        let mut store = Store::new(StoreConfig::default(), schema);
        let comment = store
            .push("comment", json!({"id": "1", "subject": {"type": "photo", "id": "5"}}))
            .unwrap();
        let target = store
            .graph
            .get(comment, &EdgeKey::declared("subject"))
            .and_then(|rel| rel.target())
            .unwrap();
        assert_eq!(store.record(target).unwrap().model_name(), "photo");
    }
}
