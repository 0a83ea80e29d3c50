use teleportal_primitives::DocumentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("document {0} is encrypted but an unencrypted operation was attempted")]
    EncryptionMismatch(DocumentId),
    #[error("storage backend failure for document {0}: {1}")]
    Backend(DocumentId, String),
}
