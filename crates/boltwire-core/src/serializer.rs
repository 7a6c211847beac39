//! Pluggable content serializers keyed by a one-byte id.
//!
//! Content is carried in memory as `serde_json::Value`; a serializer turns it
//! into bytes and back. The registry is built explicitly and passed to the
//! codec paths that need it, never held in a process-wide static.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RemotingError, Result};

/// Selects the content codec; carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerializerId(pub u8);

impl SerializerId {
    pub const JSON: SerializerId = SerializerId(1);
}

impl fmt::Display for SerializerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for SerializerId {
    fn default() -> Self {
        SerializerId::JSON
    }
}

pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// Built-in JSON content codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| RemotingError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| RemotingError::Deserialization(e.to_string()))
    }
}

/// Registry of serializers by id.
#[derive(Clone)]
pub struct SerializerRegistry {
    by_id: HashMap<SerializerId, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    /// Empty registry (no serializers at all).
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }

    /// Registry with the JSON serializer at `SerializerId::JSON`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register(SerializerId::JSON, Arc::new(JsonSerializer));
        reg
    }

    /// Register (or replace) the serializer for `id`.
    pub fn register(&mut self, id: SerializerId, serializer: Arc<dyn Serializer>) {
        if self.by_id.insert(id, serializer).is_some() {
            tracing::warn!(serializer = %id, "serializer replaced");
        }
    }

    pub fn get(&self, id: SerializerId) -> Result<&Arc<dyn Serializer>> {
        self.by_id
            .get(&id)
            .ok_or_else(|| RemotingError::Serialization(format!("unknown serializer id: {id}")))
    }

    pub fn contains(&self, id: SerializerId) -> bool {
        self.by_id.contains_key(&id)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u8> = self.by_id.keys().map(|id| id.0).collect();
        ids.sort_unstable();
        f.debug_struct("SerializerRegistry").field("ids", &ids).finish()
    }
}
