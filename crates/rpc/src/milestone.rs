use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use teleportal_primitives::{DocumentId, MilestoneId};
use uuid::Uuid;

use crate::error::RpcError;

/// A durable, user-visible document snapshot (§6 persisted state layout:
/// `<prefix>:milestone:<docId>:meta` / `...:content:<milestoneId>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub id: MilestoneId,
    pub document_id: DocumentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Storage for milestone metadata and content. `delete` is soft: a deleted
/// milestone is hidden from `list`/`get` but its content survives so
/// `restore` can bring it back.
#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn list(&self, document_id: &DocumentId) -> Result<Vec<MilestoneRecord>, RpcError>;

    async fn get(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
    ) -> Result<(MilestoneRecord, Vec<u8>), RpcError>;

    async fn create(
        &self,
        document_id: &DocumentId,
        name: String,
        snapshot: Vec<u8>,
    ) -> Result<MilestoneRecord, RpcError>;

    async fn update_name(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
        name: String,
    ) -> Result<MilestoneRecord, RpcError>;

    async fn delete(&self, document_id: &DocumentId, id: &MilestoneId) -> Result<(), RpcError>;

    async fn restore(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
    ) -> Result<MilestoneRecord, RpcError>;
}

struct Entry {
    record: MilestoneRecord,
    snapshot: Vec<u8>,
}

/// In-memory reference `MilestoneStore`, keyed by document then milestone
/// id.
#[derive(Default)]
pub struct InMemoryMilestoneStore {
    documents: DashMap<DocumentId, DashMap<MilestoneId, Entry>>,
}

impl InMemoryMilestoneStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn documents_for(&self, document_id: &DocumentId) {
        self.documents.entry(document_id.clone()).or_default();
    }
}

#[async_trait]
impl MilestoneStore for InMemoryMilestoneStore {
    async fn list(&self, document_id: &DocumentId) -> Result<Vec<MilestoneRecord>, RpcError> {
        self.documents_for(document_id);
        let entries = self.documents.get(document_id).expect("just inserted");
        let mut records: Vec<MilestoneRecord> = entries
            .iter()
            .filter(|e| !e.value().record.deleted)
            .map(|e| e.value().record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn get(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
    ) -> Result<(MilestoneRecord, Vec<u8>), RpcError> {
        self.documents_for(document_id);
        let entries = self.documents.get(document_id).expect("just inserted");
        let entry = entries
            .get(id)
            .filter(|e| !e.value().record.deleted)
            .ok_or_else(|| RpcError::MilestoneNotFound(id.clone()))?;
        Ok((entry.value().record.clone(), entry.value().snapshot.clone()))
    }

    async fn create(
        &self,
        document_id: &DocumentId,
        name: String,
        snapshot: Vec<u8>,
    ) -> Result<MilestoneRecord, RpcError> {
        let id = MilestoneId::new(Uuid::new_v4().to_string());
        let record = MilestoneRecord {
            id: id.clone(),
            document_id: document_id.clone(),
            name,
            created_at: Utc::now(),
            deleted: false,
        };
        self.documents
            .entry(document_id.clone())
            .or_default()
            .insert(
                id,
                Entry {
                    record: record.clone(),
                    snapshot,
                },
            );
        Ok(record)
    }

    async fn update_name(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
        name: String,
    ) -> Result<MilestoneRecord, RpcError> {
        self.documents_for(document_id);
        let entries = self.documents.get(document_id).expect("just inserted");
        let mut entry = entries
            .get_mut(id)
            .ok_or_else(|| RpcError::MilestoneNotFound(id.clone()))?;
        entry.record.name = name;
        Ok(entry.record.clone())
    }

    async fn delete(&self, document_id: &DocumentId, id: &MilestoneId) -> Result<(), RpcError> {
        self.documents_for(document_id);
        let entries = self.documents.get(document_id).expect("just inserted");
        let mut entry = entries
            .get_mut(id)
            .ok_or_else(|| RpcError::MilestoneNotFound(id.clone()))?;
        entry.record.deleted = true;
        Ok(())
    }

    async fn restore(
        &self,
        document_id: &DocumentId,
        id: &MilestoneId,
    ) -> Result<MilestoneRecord, RpcError> {
        self.documents_for(document_id);
        let entries = self.documents.get(document_id).expect("just inserted");
        let mut entry = entries
            .get_mut(id)
            .ok_or_else(|| RpcError::MilestoneNotFound(id.clone()))?;
        entry.record.deleted = false;
        Ok(entry.record.clone())
    }
}
