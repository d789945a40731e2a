use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One compiled module, keyed by the content hash of its source.
///
/// The payload is opaque to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub hash: String,
    pub module_name: String,
    pub created_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredArtifact {
    pub fn new(hash: impl Into<String>, module_name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            hash: hash.into(),
            module_name: module_name.into(),
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn meta(&self, size_bytes: u64) -> ArtifactMeta {
        ArtifactMeta {
            hash: self.hash.clone(),
            module_name: self.module_name.clone(),
            created_at: self.created_at,
            size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub hash: String,
    pub module_name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}
