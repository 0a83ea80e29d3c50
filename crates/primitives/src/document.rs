use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to a document, independent of its CRDT content (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub encrypted: bool,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    /// Free-form application extensions, opaque to the core.
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl DocumentMetadata {
    #[must_use]
    pub fn new(encrypted: bool) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            encrypted,
            files: Vec::new(),
            milestones: Vec::new(),
            extensions: Map::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A document's content: an opaque CRDT snapshot plus a compact summary of
/// causal history. Both fields are treated as opaque bytes by the core; the
/// CRDT library supplied by the host application gives them meaning (§1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub update: Vec<u8>,
    pub state_vector: Vec<u8>,
}

impl Document {
    #[must_use]
    pub const fn new(update: Vec<u8>, state_vector: Vec<u8>) -> Self {
        Self {
            update,
            state_vector,
        }
    }
}
