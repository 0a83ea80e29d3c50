use std::sync::Arc;

use teleportal_primitives::DocumentId;
use teleportal_storage::Storage;

/// What a handler sees of the outside world: the document it's scoped to
/// and the storage backing it (§4.J: "context exposes the document's
/// session and storage"). The session handle itself is layered in by the
/// session crate, which owns the concrete `RpcContext` construction.
#[derive(Clone)]
pub struct RpcContext {
    pub document_id: DocumentId,
    pub storage: Arc<dyn Storage>,
}

impl RpcContext {
    #[must_use]
    pub fn new(document_id: DocumentId, storage: Arc<dyn Storage>) -> Self {
        Self {
            document_id,
            storage,
        }
    }
}
