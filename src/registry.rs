//! Adapter and serializer lookup by model name.
//!
//! Resolution order: the model's own registration, then the configured
//! default name, then (serializers only) the built-in passthrough.

use crate::adapter::Adapter;
use crate::error::{Result, StoreError};
use crate::serializer::{PassthroughSerializer, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

pub struct CollaboratorRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
    default_adapter: String,
    default_serializer: String,
    passthrough: Arc<dyn Serializer>,
}

impl CollaboratorRegistry {
    pub fn new(default_adapter: impl Into<String>, default_serializer: impl Into<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            serializers: HashMap::new(),
            default_adapter: default_adapter.into(),
            default_serializer: default_serializer.into(),
            passthrough: Arc::new(PassthroughSerializer),
        }
    }

    /// Register an adapter for a model name, or for the default name.
    pub fn register_adapter(&mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn register_serializer(&mut self, name: impl Into<String>, serializer: Arc<dyn Serializer>) {
        self.serializers.insert(name.into(), serializer);
    }

    pub fn adapter_for(&self, model: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(model)
            .or_else(|| self.adapters.get(&self.default_adapter))
            .cloned()
            .ok_or_else(|| StoreError::NoAdapter(model.to_string()))
    }

    pub fn has_adapter(&self, model: &str) -> bool {
        self.adapters.contains_key(model) || self.adapters.contains_key(&self.default_adapter)
    }

    pub fn serializer_for(&self, model: &str) -> Arc<dyn Serializer> {
        self.serializers
            .get(model)
            .or_else(|| self.serializers.get(&self.default_serializer))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.passthrough))
    }
}

impl Default for CollaboratorRegistry {
    fn default() -> Self {
        Self::new("application", "application")
    }
}
