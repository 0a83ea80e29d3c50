use std::sync::{Arc, Mutex};

use dashmap::DashSet;
use teleportal_auth::Claims;
use teleportal_primitives::{ClientSink, DocumentId};

/// Server-side bookkeeping for one connected client: its verified claims
/// (resolved once at connect time, not per message — see DESIGN.md), its
/// outbound sink, and which documents it has touched so `disconnectClient`
/// can remove it everywhere (§4.H).
pub struct ClientRecord {
    pub claims: Claims,
    pub sink: Arc<dyn ClientSink>,
    joined: DashSet<DocumentId>,
    /// The most recent document-bearing message's id, used to route an
    /// `ack` frame (which carries no `documentId` on the wire, §6) to the
    /// session it confirms delivery for.
    last_document: Mutex<Option<DocumentId>>,
}

impl ClientRecord {
    #[must_use]
    pub fn new(claims: Claims, sink: Arc<dyn ClientSink>) -> Self {
        Self {
            claims,
            sink,
            joined: DashSet::new(),
            last_document: Mutex::new(None),
        }
    }

    pub fn remember_document(&self, document_id: DocumentId) {
        self.joined.insert(document_id.clone());
        *self.last_document.lock().unwrap() = Some(document_id);
    }

    #[must_use]
    pub fn last_document(&self) -> Option<DocumentId> {
        self.last_document.lock().unwrap().clone()
    }

    #[must_use]
    pub fn joined_documents(&self) -> Vec<DocumentId> {
        self.joined.iter().map(|d| d.clone()).collect()
    }
}
