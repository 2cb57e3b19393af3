//! The serializer contract: raw adapter payloads to normalized hashes.
//!
//! A normalized resource hash looks like
//! `{"id": "1", "title": "...", "author": "9", "comments": ["2", "3"],
//!   "links": {"comments": "/posts/1/comments"}}`. Relationship values may
//! be an id, a `{"id", "type"}` reference, a list of either, or `null`.

use crate::error::{FieldErrors, Result, StoreError};
use serde_json::{Map, Value};

/// A normalized resource hash.
pub type ResourceHash = Map<String, Value>;

/// Which store operation produced a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    FindRecord,
    FindMany,
    FindAll,
    Query,
    FindHasMany,
    FindBelongsTo,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    PushPayload,
}

/// Primary data of a normalized document.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum PrimaryData {
    #[default]
    None,
    One(ResourceHash),
    Many(Vec<ResourceHash>),
}

/// A sideloaded resource of any type.
#[derive(Clone, Debug, PartialEq)]
pub struct IncludedResource {
    pub model: String,
    pub hash: ResourceHash,
}

/// Output of `Serializer::extract`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedPayload {
    pub primary: PrimaryData,
    pub included: Vec<IncludedResource>,
    pub meta: Option<Value>,
}

pub trait Serializer: Send + Sync {
    /// Turn a raw adapter payload into a normalized document.
    fn extract(
        &self,
        model: &str,
        raw: Value,
        id: Option<&str>,
        request: RequestType,
    ) -> Result<NormalizedPayload>;

    /// Normalize a single resource hash.
    fn normalize(&self, model: &str, hash: Value) -> Result<ResourceHash> {
        match hash {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Serialization(format!(
                "expected an object for {}, got {}",
                model, other
            ))),
        }
    }

    /// Field errors from a validation rejection.
    ///
    /// Accepts `{"errors": {"field": ["msg"]}}`, a bare field map, or a
    /// list of `{"source": {"pointer": ".../field"}, "detail": "msg"}`.
    fn extract_errors(&self, _model: &str, raw: &Value, _id: Option<&str>) -> FieldErrors {
        let errors = raw.get("errors").unwrap_or(raw);
        let mut out = FieldErrors::new();
        match errors {
            Value::Object(map) => {
                for (field, messages) in map {
                    let messages = match messages {
                        Value::Array(items) => items
                            .iter()
                            .filter_map(|m| m.as_str().map(str::to_string))
                            .collect(),
                        Value::String(s) => vec![s.clone()],
                        _ => continue,
                    };
                    out.entry(field.clone()).or_default().extend(messages);
                }
            }
            Value::Array(items) => {
                for item in items {
                    let field = item
                        .pointer("/source/pointer")
                        .and_then(Value::as_str)
                        .and_then(|p| p.rsplit('/').next())
                        .unwrap_or("base");
                    if let Some(detail) = item.get("detail").and_then(Value::as_str) {
                        out.entry(field.to_string())
                            .or_default()
                            .push(detail.to_string());
                    }
                }
            }
            _ => {}
        }
        out
    }
}

/// Reads documents that are already normalized:
/// `{"data": hash | [hash] | null, "included": [{"type", ...}], "meta": {...}}`.
///
/// A bare resource hash (an object with an `id` and no `data`) is accepted
/// as single primary data, a bare list as many.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughSerializer;

impl Serializer for PassthroughSerializer {
    fn extract(
        &self,
        model: &str,
        raw: Value,
        _id: Option<&str>,
        _request: RequestType,
    ) -> Result<NormalizedPayload> {
        let mut document = match raw {
            Value::Object(map) => map,
            Value::Null => return Ok(NormalizedPayload::default()),
            Value::Array(items) => {
                let hashes = items
                    .into_iter()
                    .map(|item| self.normalize(model, item))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(NormalizedPayload {
                    primary: PrimaryData::Many(hashes),
                    ..Default::default()
                });
            }
            other => {
                return Err(StoreError::Serialization(format!(
                    "expected a document object, got {}",
                    other
                )))
            }
        };

        if !document.contains_key("data") && document.contains_key("id") {
            let hash = self.normalize(model, Value::Object(document))?;
            return Ok(NormalizedPayload {
                primary: PrimaryData::One(hash),
                ..Default::default()
            });
        }

        let primary = match document.remove("data") {
            None | Some(Value::Null) => PrimaryData::None,
            Some(Value::Array(items)) => PrimaryData::Many(
                items
                    .into_iter()
                    .map(|item| self.normalize(model, item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(hash) => PrimaryData::One(self.normalize(model, hash)?),
        };

        let mut included = Vec::new();
        if let Some(Value::Array(items)) = document.remove("included") {
            for item in items {
                let item_model = item
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        StoreError::Serialization("included resource without a type".into())
                    })?;
                let mut hash = self.normalize(&item_model, item)?;
                hash.remove("type");
                included.push(IncludedResource {
                    model: item_model,
                    hash,
                });
            }
        }

        Ok(NormalizedPayload {
            primary,
            included,
            meta: document.remove("meta"),
        })
    }
}
