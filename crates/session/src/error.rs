use teleportal_primitives::DocumentId;
use teleportal_replicator::ReplicatorError;
use teleportal_rpc::RpcError;
use teleportal_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("document {0}: message encryption flag does not match session")]
    EncryptionMismatch(DocumentId),
    #[error("sync-step-1 requires a local originating client")]
    NoOriginatingClient,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Replicator(#[from] ReplicatorError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Upload(#[from] teleportal_upload::UploadError),
}
