use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use teleportal_primitives::{
    Document, DocumentId, DocumentMetadata, EncryptedMessageRecord, EncryptedStateVector,
    StateVector, SyncStep2Update, UpdatePayload,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::CrdtEngine;
use crate::error::StorageError;

/// Held while a caller serializes a sequence of mutations against one
/// document (§4.C `transaction`). Dropping it releases the per-document
/// lock.
pub struct DocumentTransaction {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl DocumentTransaction {
    #[must_use]
    pub fn noop() -> Self {
        Self { _guard: None }
    }

    fn locked(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            _guard: Some(guard),
        }
    }
}

/// The pluggable document storage capability (§4.C). Implementations are
/// tagged `unencrypted`/`encrypted` by the factory that constructs them
/// rather than by an inheritance split (§9 Design Notes).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn handle_sync_step1(
        &self,
        document_id: &DocumentId,
        state_vector: &StateVector,
    ) -> Result<(SyncStep2Update, StateVector), StorageError>;

    async fn handle_sync_step2(
        &self,
        document_id: &DocumentId,
        update: &SyncStep2Update,
    ) -> Result<(), StorageError>;

    async fn handle_update(
        &self,
        document_id: &DocumentId,
        update: &UpdatePayload,
    ) -> Result<(), StorageError>;

    async fn get_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Document>, StorageError>;

    async fn get_document_metadata(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<DocumentMetadata>, StorageError>;

    async fn write_document_metadata(
        &self,
        document_id: &DocumentId,
        metadata: DocumentMetadata,
    ) -> Result<(), StorageError>;

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StorageError>;

    /// Serializes concurrent mutations against one document. The default
    /// the spec describes is identity (caller promises external
    /// serialization); implementations that need real mutual exclusion
    /// override it with a per-document lock.
    async fn transaction(&self, _document_id: &DocumentId) -> DocumentTransaction {
        DocumentTransaction::noop()
    }
}

#[derive(Default)]
struct DocumentState {
    snapshot: Vec<u8>,
}

/// In-memory unencrypted storage backed by a [`CrdtEngine`] collaborator.
pub struct InMemoryUnencryptedStorage<E: CrdtEngine> {
    engine: E,
    documents: DashMap<DocumentId, DocumentState>,
    metadata: DashMap<DocumentId, DocumentMetadata>,
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl<E: CrdtEngine> InMemoryUnencryptedStorage<E> {
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            documents: DashMap::new(),
            metadata: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, document_id: &DocumentId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(document_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[async_trait]
impl<E: CrdtEngine> Storage for InMemoryUnencryptedStorage<E> {
    async fn handle_sync_step1(
        &self,
        document_id: &DocumentId,
        state_vector: &StateVector,
    ) -> Result<(SyncStep2Update, StateVector), StorageError> {
        let StateVector::Plain(peer_sv) = state_vector else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };

        let snapshot = self
            .documents
            .get(document_id)
            .map(|d| d.snapshot.clone())
            .unwrap_or_default();
        let (update, own_sv) = self.engine.diff(&snapshot, peer_sv);

        Ok((
            SyncStep2Update::Plain(update),
            StateVector::Plain(own_sv),
        ))
    }

    async fn handle_sync_step2(
        &self,
        document_id: &DocumentId,
        update: &SyncStep2Update,
    ) -> Result<(), StorageError> {
        let SyncStep2Update::Plain(bytes) = update else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };
        let mut entry = self.documents.entry(document_id.clone()).or_default();
        entry.snapshot = self.engine.merge(&entry.snapshot, bytes);
        Ok(())
    }

    async fn handle_update(
        &self,
        document_id: &DocumentId,
        update: &UpdatePayload,
    ) -> Result<(), StorageError> {
        let UpdatePayload::Plain(bytes) = update else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };
        let mut entry = self.documents.entry(document_id.clone()).or_default();
        entry.snapshot = self.engine.merge(&entry.snapshot, bytes);
        Ok(())
    }

    async fn get_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .documents
            .get(document_id)
            .map(|d| Document::new(d.snapshot.clone(), Vec::new())))
    }

    async fn get_document_metadata(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<DocumentMetadata>, StorageError> {
        Ok(self.metadata.get(document_id).map(|m| m.clone()))
    }

    async fn write_document_metadata(
        &self,
        document_id: &DocumentId,
        metadata: DocumentMetadata,
    ) -> Result<(), StorageError> {
        self.metadata.insert(document_id.clone(), metadata);
        Ok(())
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StorageError> {
        self.documents.remove(document_id);
        self.metadata.remove(document_id);
        self.locks.remove(document_id);
        Ok(())
    }

    async fn transaction(&self, document_id: &DocumentId) -> DocumentTransaction {
        let lock = self.lock_for(document_id);
        DocumentTransaction::locked(lock.lock_owned().await)
    }
}

#[derive(Default)]
struct EncryptedDocumentState {
    records: Vec<EncryptedMessageRecord>,
    state_vector: EncryptedStateVector,
}

/// In-memory encrypted storage. Keeps the full append-only message log
/// per document plus the `(lamportClientId -> maxCounter)` state vector
/// (§3, §8 invariant 8: the stored maximum counter only increases).
#[derive(Default)]
pub struct InMemoryEncryptedStorage {
    documents: DashMap<DocumentId, EncryptedDocumentState>,
    metadata: DashMap<DocumentId, DocumentMetadata>,
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl InMemoryEncryptedStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, document_id: &DocumentId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(document_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn absorb(state: &mut EncryptedDocumentState, record: EncryptedMessageRecord) {
        let already_seen = state
            .records
            .iter()
            .any(|r| r.message_id == record.message_id);
        if already_seen {
            return;
        }

        let max_counter = state
            .state_vector
            .entry(record.lamport_client_id)
            .or_insert(0);
        if record.counter > *max_counter {
            *max_counter = record.counter;
        }
        state.records.push(record);
    }
}

#[async_trait]
impl Storage for InMemoryEncryptedStorage {
    async fn handle_sync_step1(
        &self,
        document_id: &DocumentId,
        state_vector: &StateVector,
    ) -> Result<(SyncStep2Update, StateVector), StorageError> {
        let StateVector::Encrypted(peer_sv) = state_vector else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };

        let state = self.documents.entry(document_id.clone()).or_default();
        let missing: Vec<EncryptedMessageRecord> = state
            .records
            .iter()
            .filter(|r| {
                let seen = peer_sv.get(&r.lamport_client_id).copied().unwrap_or(0);
                r.counter > seen
            })
            .cloned()
            .collect();

        Ok((
            SyncStep2Update::Encrypted(missing),
            StateVector::Encrypted(state.state_vector.clone()),
        ))
    }

    async fn handle_sync_step2(
        &self,
        document_id: &DocumentId,
        update: &SyncStep2Update,
    ) -> Result<(), StorageError> {
        let SyncStep2Update::Encrypted(records) = update else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };
        let mut state = self.documents.entry(document_id.clone()).or_default();
        for record in records.iter().cloned() {
            Self::absorb(&mut state, record);
        }
        Ok(())
    }

    async fn handle_update(
        &self,
        document_id: &DocumentId,
        update: &UpdatePayload,
    ) -> Result<(), StorageError> {
        let UpdatePayload::Encrypted(record) = update else {
            return Err(StorageError::EncryptionMismatch(document_id.clone()));
        };
        let mut state = self.documents.entry(document_id.clone()).or_default();
        Self::absorb(&mut state, record.clone());
        Ok(())
    }

    async fn get_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self.documents.get(document_id).map(|state| {
            let mut bytes = Vec::new();
            for record in &state.records {
                bytes.extend_from_slice(&record.payload);
            }
            Document::new(bytes, Vec::new())
        }))
    }

    async fn get_document_metadata(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<DocumentMetadata>, StorageError> {
        Ok(self.metadata.get(document_id).map(|m| m.clone()))
    }

    async fn write_document_metadata(
        &self,
        document_id: &DocumentId,
        metadata: DocumentMetadata,
    ) -> Result<(), StorageError> {
        self.metadata.insert(document_id.clone(), metadata);
        Ok(())
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StorageError> {
        self.documents.remove(document_id);
        self.metadata.remove(document_id);
        self.locks.remove(document_id);
        Ok(())
    }

    async fn transaction(&self, document_id: &DocumentId) -> DocumentTransaction {
        let lock = self.lock_for(document_id);
        DocumentTransaction::locked(lock.lock_owned().await)
    }
}
