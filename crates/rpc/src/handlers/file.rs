use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use teleportal_merkle::CHUNK_SIZE;
use teleportal_primitives::{FileId, UploadId};
use teleportal_storage::Storage;
use teleportal_upload::{complete_and_commit, FileReader, FileStorage, TemporaryUploadStorage};

use crate::context::RpcContext;
use crate::error::RpcError;
use crate::registry::{RpcHandler, RpcOutcome};

/// `fileUpload`: completes an already fully-chunked upload (the chunks
/// themselves arrive as `file` frames, not over RPC) and records the
/// resulting `fileId` on the document (§4.I step 6).
pub struct FileUploadHandler {
    pub temporary: Arc<TemporaryUploadStorage>,
    pub file_storage: Arc<dyn FileStorage>,
}

#[async_trait]
impl RpcHandler for FileUploadHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let upload_id = payload
            .get("uploadId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RpcError::InvalidPayload("fileUpload".into(), "missing `uploadId`".into())
            })?;
        let claimed_file_id = match payload.get("fileId").and_then(Value::as_str) {
            Some(hex) => Some(decode_file_id(hex)?),
            None => None,
        };

        let file_id = complete_and_commit(
            &self.temporary,
            self.file_storage.as_ref(),
            ctx.storage.as_ref(),
            &UploadId::new(upload_id),
            claimed_file_id,
        )
        .await?;

        Ok(RpcOutcome::Response(
            json!({ "fileId": file_id.to_hex() }),
        ))
    }
}

/// `fileDownload`: streams a completed file's chunks as `direction=stream`
/// messages, then a final response confirming completion (§4.J).
pub struct FileDownloadHandler {
    pub reader: Arc<dyn FileReader>,
}

#[async_trait]
impl RpcHandler for FileDownloadHandler {
    async fn handle(&self, _ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let file_id_hex = payload
            .get("fileId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RpcError::InvalidPayload("fileDownload".into(), "missing `fileId`".into())
            })?;
        let file_id = decode_file_id(file_id_hex)?;

        let bytes = self
            .reader
            .read_file(&file_id)
            .await
            .ok_or_else(|| RpcError::FileNotFound(file_id_hex.to_owned()))?;

        let items: Vec<Value> = bytes
            .chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                json!({
                    "chunkIndex": i,
                    "data": BASE64.encode(chunk),
                })
            })
            .collect();

        Ok(RpcOutcome::Stream {
            items,
            response: json!({ "fileId": file_id_hex, "chunkCount": bytes.chunks(CHUNK_SIZE).count() }),
        })
    }
}

fn decode_file_id(hex: &str) -> Result<FileId, RpcError> {
    let bytes = hex::decode(hex)
        .map_err(|e| RpcError::InvalidPayload("fileId".into(), e.to_string()))?;
    let root: [u8; 32] = bytes
        .try_into()
        .map_err(|_| RpcError::InvalidPayload("fileId".into(), "expected 32 bytes".into()))?;
    Ok(FileId::from_root(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleportal_primitives::DocumentId;
    use teleportal_storage::{InMemoryUnencryptedStorage, LogEngine};
    use teleportal_upload::{InMemoryFileStorage, UploadMetadata};

    #[tokio::test]
    async fn file_upload_rpc_completes_and_records_metadata() {
        let temporary = Arc::new(TemporaryUploadStorage::new());
        let file_storage = Arc::new(InMemoryFileStorage::new());
        let storage: Arc<dyn Storage> = Arc::new(InMemoryUnencryptedStorage::new(LogEngine));

        let upload_id = UploadId::new("u1");
        temporary.begin_upload(
            upload_id.clone(),
            UploadMetadata {
                document_id: DocumentId::new("doc-1"),
                filename: "f.bin".into(),
                size: 3,
                mime_type: "application/octet-stream".into(),
                encrypted: false,
            },
        );
        temporary.store_chunk(&upload_id, 0, vec![1, 2, 3], None).unwrap();

        let handler = FileUploadHandler {
            temporary,
            file_storage: file_storage.clone(),
        };
        let ctx = RpcContext::new(DocumentId::new("doc-1"), storage.clone());
        let RpcOutcome::Response(response) = handler
            .handle(&ctx, json!({"uploadId": "u1"}))
            .await
            .unwrap()
        else {
            panic!("expected response")
        };

        let file_id_hex = response["fileId"].as_str().unwrap().to_owned();
        let metadata = storage
            .get_document_metadata(&DocumentId::new("doc-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(metadata.files.contains(&file_id_hex));
    }

    #[tokio::test]
    async fn file_download_rpc_streams_chunks_then_responds() {
        let file_storage = Arc::new(InMemoryFileStorage::new());
        let tree = teleportal_merkle::MerkleTree::build(&[b"abc".to_vec()]);
        let file_id = FileId::from_root(tree.root());
        file_storage.put(file_id.clone(), b"abc".to_vec());

        let handler = FileDownloadHandler {
            reader: file_storage,
        };
        let ctx = RpcContext::new(
            DocumentId::new("doc-1"),
            Arc::new(InMemoryUnencryptedStorage::new(LogEngine)),
        );
        let outcome = handler
            .handle(&ctx, json!({"fileId": file_id.to_hex()}))
            .await
            .unwrap();
        let RpcOutcome::Stream { items, response } = outcome else {
            panic!("expected stream")
        };
        assert_eq!(items.len(), 1);
        assert_eq!(response["chunkCount"], 1);
    }
}
