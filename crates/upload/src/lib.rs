//! Chunked file-upload pipeline (§4.I).
//!
//! Uploads are multi-message: a begin, zero or more chunks in arbitrary
//! order, and a completion that verifies the whole thing against a
//! Merkle root before handing off to cold storage.

pub mod error;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use teleportal_merkle::{chunk_count, verify, Hash, MerkleTree};
use teleportal_primitives::{DocumentId, FileId, UploadId};
use teleportal_storage::{DocumentTransaction, Storage};
use tracing::debug;

pub use error::UploadError;

/// Metadata supplied with `beginUpload`.
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub document_id: DocumentId,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub encrypted: bool,
}

struct StoredChunk {
    data: Vec<u8>,
    proof: Option<Vec<Hash>>,
}

struct InFlightUpload {
    metadata: UploadMetadata,
    chunks: BTreeMap<u32, StoredChunk>,
    last_activity: DateTime<Utc>,
}

impl InFlightUpload {
    fn bytes_uploaded(&self) -> u64 {
        self.chunks.values().map(|c| c.data.len() as u64).sum()
    }
}

/// Snapshot of an in-flight upload's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub chunks_received: usize,
    pub last_activity: DateTime<Utc>,
}

/// A single chunk read out of a completed upload. Reading it consumes it:
/// the backing temporary storage drops the chunk bytes once [`take`] is
/// called, so handing a whole file off to cold storage never needs to hold
/// the entire file in memory at once (§4.I step 5).
pub struct UploadChunkReader {
    data: Option<Vec<u8>>,
}

impl UploadChunkReader {
    #[must_use]
    pub fn take(&mut self) -> Vec<u8> {
        self.data.take().unwrap_or_default()
    }
}

/// The outcome of a successful `completeUpload`: the verified file id plus
/// single-use readers for each chunk in order.
pub struct FileUploadResult {
    pub file_id: FileId,
    pub metadata: UploadMetadata,
    chunks: Vec<Option<Vec<u8>>>,
}

impl FileUploadResult {
    /// Returns a single-use reader for chunk `index`. Calling this twice for
    /// the same index returns an empty reader the second time.
    #[must_use]
    pub fn get_chunk(&mut self, index: usize) -> UploadChunkReader {
        UploadChunkReader {
            data: self.chunks.get_mut(index).and_then(Option::take),
        }
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Cold storage for completed files (§4.I step 5). Implementations stream
/// `result.get_chunk(i)` in order rather than buffering the whole file.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store_file_from_upload(&self, result: FileUploadResult) -> Result<(), UploadError>;
}

/// Reads a completed file back by id, for `file.download-request` and the
/// `fileDownload` RPC. Kept separate from [`FileStorage`] since a
/// write-optimized cold-storage backend (e.g. content-addressed object
/// storage) may implement retrieval very differently from ingestion.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_file(&self, file_id: &FileId) -> Option<Vec<u8>>;
}

/// Cold storage backed by an in-memory map, keyed by `FileId`. Mostly useful
/// for tests; a production deployment swaps this for object storage.
#[derive(Default)]
pub struct InMemoryFileStorage {
    files: DashMap<FileId, Vec<u8>>,
}

impl InMemoryFileStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, file_id: &FileId) -> Option<Vec<u8>> {
        self.files.get(file_id).map(|v| v.clone())
    }

    /// Inserts a file directly, bypassing the upload pipeline. Useful for
    /// seeding cold storage in tests or out-of-band imports.
    pub fn put(&self, file_id: FileId, bytes: Vec<u8>) {
        self.files.insert(file_id, bytes);
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store_file_from_upload(&self, mut result: FileUploadResult) -> Result<(), UploadError> {
        let mut bytes = Vec::new();
        for i in 0..result.chunk_count() {
            bytes.extend_from_slice(&result.get_chunk(i).take());
        }
        self.files.insert(result.file_id.clone(), bytes);
        Ok(())
    }
}

#[async_trait]
impl FileReader for InMemoryFileStorage {
    async fn read_file(&self, file_id: &FileId) -> Option<Vec<u8>> {
        self.get(file_id)
    }
}

/// How long an upload may sit idle before [`TemporaryUploadStorage::cleanup_expired_uploads`]
/// reclaims it (§3 Lifecycles: default 24h).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::hours(24);

/// Temporary storage for in-flight (not yet completed) uploads (§4.I).
pub struct TemporaryUploadStorage {
    uploads: DashMap<UploadId, InFlightUpload>,
    idle_timeout: Duration,
}

impl TemporaryUploadStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            uploads: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn begin_upload(&self, upload_id: UploadId, metadata: UploadMetadata) {
        self.uploads.insert(
            upload_id,
            InFlightUpload {
                metadata,
                chunks: BTreeMap::new(),
                last_activity: Utc::now(),
            },
        );
    }

    pub fn store_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u32,
        chunk_data: Vec<u8>,
        proof: Option<Vec<Hash>>,
    ) -> Result<(), UploadError> {
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::UnknownUpload(upload_id.clone()))?;
        upload.chunks.insert(
            chunk_index,
            StoredChunk {
                data: chunk_data,
                proof,
            },
        );
        upload.last_activity = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn get_upload_progress(&self, upload_id: &UploadId) -> Option<UploadProgress> {
        self.uploads.get(upload_id).map(|u| UploadProgress {
            bytes_uploaded: u.bytes_uploaded(),
            chunks_received: u.chunks.len(),
            last_activity: u.last_activity,
        })
    }

    /// Runs the §4.I completion algorithm and, on success, removes the
    /// upload from temporary storage and returns a [`FileUploadResult`]
    /// ready for cold-storage handoff. On any verification failure the
    /// upload is left untouched so it can still be retried or reaped by
    /// [`Self::cleanup_expired_uploads`].
    pub fn complete_upload(
        &self,
        upload_id: &UploadId,
        claimed_file_id: Option<FileId>,
    ) -> Result<FileUploadResult, UploadError> {
        let upload = self
            .uploads
            .get(upload_id)
            .ok_or_else(|| UploadError::UnknownUpload(upload_id.clone()))?;

        let expected = chunk_count(upload.metadata.size);
        let got = upload.chunks.len() as u64;
        if got != expected {
            return Err(UploadError::ChunkCountMismatch {
                upload_id: upload_id.clone(),
                expected,
                got,
            });
        }

        let mut ordered: Vec<&StoredChunk> = Vec::with_capacity(expected as usize);
        for index in 0..expected as u32 {
            let chunk = upload
                .chunks
                .get(&index)
                .ok_or_else(|| UploadError::MissingChunk(upload_id.clone(), index))?;
            ordered.push(chunk);
        }

        let actual_size: u64 = ordered.iter().map(|c| c.data.len() as u64).sum();
        if actual_size != upload.metadata.size {
            return Err(UploadError::SizeMismatch {
                upload_id: upload_id.clone(),
                declared: upload.metadata.size,
                actual: actual_size,
            });
        }

        let tree = MerkleTree::build(&ordered.iter().map(|c| c.data.clone()).collect::<Vec<_>>());
        let root = tree.root();
        let file_id = FileId::from_root(root);

        if let Some(claimed) = claimed_file_id {
            if claimed.as_bytes() != file_id.as_bytes() {
                return Err(UploadError::RootMismatch(upload_id.clone()));
            }
        }

        for (i, chunk) in ordered.iter().enumerate() {
            if let Some(proof) = &chunk.proof {
                let leaf = tree.leaf(i).expect("index within built tree");
                if !verify(root, leaf, i, proof) {
                    return Err(UploadError::RootMismatch(upload_id.clone()));
                }
            }
        }

        let chunks: Vec<Option<Vec<u8>>> = ordered.iter().map(|c| Some(c.data.clone())).collect();
        let metadata = upload.metadata.clone();
        drop(upload);
        self.uploads.remove(upload_id);

        Ok(FileUploadResult {
            file_id,
            metadata,
            chunks,
        })
    }

    /// Deletes every upload whose `lastActivity` is older than the
    /// configured idle timeout. Safe to call repeatedly; a second call with
    /// nothing newly expired is a no-op (§8: "cleanupExpiredUploads is
    /// idempotent").
    pub fn cleanup_expired_uploads(&self) -> usize {
        let cutoff = Utc::now() - self.idle_timeout;
        let expired: Vec<UploadId> = self
            .uploads
            .iter()
            .filter(|entry| entry.value().last_activity < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for upload_id in &expired {
            self.uploads.remove(upload_id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "reaped expired uploads");
        }
        expired.len()
    }
}

impl Default for TemporaryUploadStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes an upload end to end: runs [`TemporaryUploadStorage::complete_upload`],
/// hands the result to `file_storage`, then atomically records the new
/// `fileId` on the owning document's metadata inside a [`DocumentTransaction`]
/// (§4.I step 6).
pub async fn complete_and_commit(
    temporary: &TemporaryUploadStorage,
    file_storage: &dyn FileStorage,
    storage: &dyn Storage,
    upload_id: &UploadId,
    claimed_file_id: Option<FileId>,
) -> Result<FileId, UploadError> {
    let result = temporary.complete_upload(upload_id, claimed_file_id)?;
    let file_id = result.file_id.clone();
    let document_id = result.metadata.document_id.clone();

    file_storage
        .store_file_from_upload(result)
        .await
        .map_err(|e| UploadError::ColdStorage(upload_id.clone(), e.to_string()))?;

    let _txn: DocumentTransaction = storage.transaction(&document_id).await;
    let mut metadata = storage
        .get_document_metadata(&document_id)
        .await
        .map_err(|e| UploadError::ColdStorage(upload_id.clone(), e.to_string()))?
        .unwrap_or_else(|| teleportal_primitives::DocumentMetadata::new(false));

    let file_hex = file_id.to_hex();
    if !metadata.files.contains(&file_hex) {
        metadata.files.push(file_hex);
        metadata.touch();
    }
    storage
        .write_document_metadata(&document_id, metadata)
        .await
        .map_err(|e| UploadError::ColdStorage(upload_id.clone(), e.to_string()))?;

    Ok(file_id)
}
