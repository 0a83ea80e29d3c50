use std::sync::Arc;

use teleportal_primitives::DocumentId;

use crate::engine::{CrdtEngine, LogEngine};
use crate::memory::{InMemoryEncryptedStorage, InMemoryUnencryptedStorage, Storage};

/// Selects the right storage engine for a document based on whether it is
/// encrypted (§3, §4.C: "encrypted and unencrypted documents are handled by
/// different storage engines selected per document").
pub struct StorageFactory<E: CrdtEngine> {
    engine_factory: Arc<dyn Fn() -> E + Send + Sync>,
}

impl<E: CrdtEngine + 'static> StorageFactory<E> {
    #[must_use]
    pub fn new(engine_factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self {
            engine_factory: Arc::new(engine_factory),
        }
    }

    /// Builds a fresh unencrypted backend for `document_id` using a new
    /// engine instance. Callers that want shared state across documents
    /// should hold their own `Arc<dyn Storage>` and reuse it rather than
    /// calling this per-message.
    #[must_use]
    pub fn unencrypted(&self, _document_id: &DocumentId) -> InMemoryUnencryptedStorage<E> {
        InMemoryUnencryptedStorage::new((self.engine_factory)())
    }

    #[must_use]
    pub fn encrypted(&self, _document_id: &DocumentId) -> InMemoryEncryptedStorage {
        InMemoryEncryptedStorage::new()
    }

    /// Resolves to a boxed trait object keyed on the document's declared
    /// encryption, so callers that don't care which concrete engine backs a
    /// document can hold one uniform type.
    #[must_use]
    pub fn storage_for(&self, document_id: &DocumentId, encrypted: bool) -> Arc<dyn Storage>
    where
        E: 'static,
    {
        if encrypted {
            Arc::new(self.encrypted(document_id))
        } else {
            Arc::new(self.unencrypted(document_id))
        }
    }
}

impl StorageFactory<LogEngine> {
    /// Convenience constructor for the reference [`LogEngine`]; most callers
    /// in tests and examples want this rather than supplying their own
    /// `CrdtEngine`.
    #[must_use]
    pub fn with_log_engine() -> Self {
        Self::new(|| LogEngine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_for_routes_by_encrypted_flag() {
        let factory = StorageFactory::with_log_engine();
        let unencrypted = factory.storage_for(&DocumentId::new("doc-a"), false);
        let encrypted = factory.storage_for(&DocumentId::new("doc-b"), true);

        unencrypted
            .get_document_metadata(&DocumentId::new("doc-a"))
            .await
            .unwrap();
        encrypted
            .get_document_metadata(&DocumentId::new("doc-b"))
            .await
            .unwrap();
    }
}
