use teleportal_primitives::MilestoneId;
use teleportal_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unknown rpc method {0}")]
    UnknownMethod(String),
    #[error("invalid payload for {0}: {1}")]
    InvalidPayload(String, String),
    #[error("milestone {0} not found")]
    MilestoneNotFound(MilestoneId),
    #[error("file {0} not found")]
    FileNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Upload(#[from] teleportal_upload::UploadError),
}
