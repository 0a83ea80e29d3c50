use teleportal_primitives::UploadId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload {0} is unknown")]
    UnknownUpload(UploadId),
    #[error("upload {upload_id} expected {expected} chunks, got {got}")]
    ChunkCountMismatch {
        upload_id: UploadId,
        expected: u64,
        got: u64,
    },
    #[error("upload {0} is missing chunk {1}")]
    MissingChunk(UploadId, u32),
    #[error("upload {upload_id} declared size {declared} but chunks totalled {actual}")]
    SizeMismatch {
        upload_id: UploadId,
        declared: u64,
        actual: u64,
    },
    #[error("upload {0} Merkle root mismatch")]
    RootMismatch(UploadId),
    #[error("cold storage rejected upload {0}: {1}")]
    ColdStorage(UploadId, String),
}
