use std::sync::Arc;

use dashmap::DashMap;
use teleportal_primitives::DocumentId;
use teleportal_session::Session;

/// `documentId -> session` map with compute-if-absent semantics (§5 Shared
/// resources: "concurrent calls for the same id must return the same
/// session, otherwise duplicate subscriptions are created"). Construction
/// itself (`Session::new`) is synchronous; the caller is responsible for
/// calling the returned session's `load()` afterwards, which is itself
/// idempotent.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<DocumentId, Arc<Session>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_construct(
        &self,
        document_id: DocumentId,
        make: impl FnOnce() -> Session,
    ) -> Arc<Session> {
        Arc::clone(
            self.sessions
                .entry(document_id)
                .or_insert_with(|| Arc::new(make()))
                .value(),
        )
    }

    #[must_use]
    pub fn get(&self, document_id: &DocumentId) -> Option<Arc<Session>> {
        self.sessions.get(document_id).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
