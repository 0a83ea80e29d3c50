use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use teleportal_merkle::CHUNK_SIZE;
use teleportal_primitives::{
    ClientId, ClientSendError, ClientSink, DocMessage, DocPayload, DocumentId, FileMessage,
    FilePayload, Message, MessageBody, MessageId, NodeId, Origin, RpcDirection, RpcMessage,
};
use teleportal_replicator::{ReplicationHandler, Replicator, SubscriptionHandle};
use teleportal_rpc::{MethodRegistry, RpcContext, RpcOutcome};
use teleportal_storage::Storage;
use teleportal_upload::{complete_and_commit, FileReader, FileStorage, TemporaryUploadStorage, UploadMetadata};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::dedupe::{DedupeCache, DEFAULT_DEDUPE_TTL};
use crate::error::SessionError;

/// Everything a [`Session`] needs at construction. One config per document
/// (§3 Session: "Holds... a storage handle... a replicator subscription
/// token...").
pub struct SessionConfig {
    pub document_id: DocumentId,
    pub encrypted: bool,
    pub storage: Arc<dyn Storage>,
    pub replicator: Arc<dyn Replicator>,
    pub rpc: Arc<MethodRegistry>,
    pub temporary_uploads: Arc<TemporaryUploadStorage>,
    pub file_storage: Arc<dyn FileStorage>,
    pub file_reader: Arc<dyn FileReader>,
    pub dedupe_ttl: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn new(
        document_id: DocumentId,
        encrypted: bool,
        storage: Arc<dyn Storage>,
        replicator: Arc<dyn Replicator>,
        rpc: Arc<MethodRegistry>,
        temporary_uploads: Arc<TemporaryUploadStorage>,
        file_storage: Arc<dyn FileStorage>,
        file_reader: Arc<dyn FileReader>,
    ) -> Self {
        Self {
            document_id,
            encrypted,
            storage,
            replicator,
            rpc,
            temporary_uploads,
            file_storage,
            file_reader,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
        }
    }
}

/// The per-document actor (§4.G). Exactly one lives per `(node, documentId)`
/// (§3 invariant 1) — enforcing that is the session registry's job
/// (`getOrOpenSession`, §4.H), not this type's.
pub struct Session {
    document_id: DocumentId,
    encrypted: bool,
    storage: Arc<dyn Storage>,
    replicator: Arc<dyn Replicator>,
    rpc: Arc<MethodRegistry>,
    temporary_uploads: Arc<TemporaryUploadStorage>,
    file_storage: Arc<dyn FileStorage>,
    file_reader: Arc<dyn FileReader>,
    clients: DashMap<ClientId, Arc<dyn ClientSink>>,
    dedupe: DedupeCache,
    loaded: AtomicBool,
    subscription: AsyncMutex<Option<SubscriptionHandle>>,
    /// Serializes `apply` so a session behaves as a single-writer actor
    /// (§5: "concurrent apply invocations on the same session are
    /// serialized").
    apply_lock: AsyncMutex<()>,
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            document_id: config.document_id,
            encrypted: config.encrypted,
            storage: config.storage,
            replicator: config.replicator,
            rpc: config.rpc,
            temporary_uploads: config.temporary_uploads,
            file_storage: config.file_storage,
            file_reader: config.file_reader,
            clients: DashMap::new(),
            dedupe: DedupeCache::with_ttl(config.dedupe_ttl),
            loaded: AtomicBool::new(false),
            subscription: AsyncMutex::new(None),
            apply_lock: AsyncMutex::new(()),
        }
    }

    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    #[must_use]
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Subscribes to the replicator channel. Idempotent: a second call on
    /// an already-loaded session is a no-op (§4.G `load()`).
    pub async fn load(self: &Arc<Self>) -> Result<(), SessionError> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handler: Arc<dyn ReplicationHandler> = Arc::new(SessionReplicationHandler {
            session: Arc::downgrade(self),
            own_node: self.replicator.node_id(),
        });
        let handle = self
            .replicator
            .subscribe(&self.document_id.replication_channel(), handler)
            .await?;
        *self.subscription.lock().await = Some(handle);
        Ok(())
    }

    pub fn add_client(&self, client: Arc<dyn ClientSink>) {
        self.clients.insert(client.client_id().clone(), client);
    }

    pub fn remove_client(&self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Sends `message` to every local client except `exclude` (§4.G
    /// `broadcast`). A client whose send fails is dropped from the roster;
    /// other recipients are unaffected (§4.G failure semantics).
    pub fn broadcast(&self, message: &Message, exclude: Option<&ClientId>) {
        let mut dead = Vec::new();
        for entry in &self.clients {
            if Some(entry.key()) == exclude {
                continue;
            }
            if let Err(ClientSendError::Disconnected(id)) = entry.value().send(message.clone()) {
                dead.push(id);
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// Unsubscribes from the replicator. In-flight applies already hold the
    /// apply lock and are allowed to finish; no new replicated message can
    /// arrive once this returns (§4.G `asyncDispose`).
    pub async fn dispose(&self) {
        *self.subscription.lock().await = None;
    }

    /// Protocol entry point (§4.G). `origin` distinguishes a locally
    /// originated message (gets a reply, gets replicated) from one arriving
    /// via the replicator subscription (neither).
    pub async fn apply(&self, message: Message, origin: Origin<'_>) -> Result<(), SessionError> {
        let _guard = self.apply_lock.lock().await;

        if !self.dedupe.observe(&message.id) {
            return Ok(());
        }

        if let Some(encrypted) = message.encrypted() {
            if encrypted != self.encrypted {
                return Err(SessionError::EncryptionMismatch(self.document_id.clone()));
            }
        }

        match &message.body {
            MessageBody::Doc(doc) => self.apply_doc(&message, doc, origin).await,
            MessageBody::Awareness(_) | MessageBody::Ack(_) => {
                self.broadcast_and_replicate(&message, origin).await
            }
            MessageBody::File(file) => self.apply_file(file, origin).await,
            MessageBody::Rpc(rpc) => self.apply_rpc(&message, rpc, origin).await,
        }
    }

    async fn apply_doc(
        &self,
        message: &Message,
        doc: &DocMessage,
        origin: Origin<'_>,
    ) -> Result<(), SessionError> {
        match &doc.payload {
            DocPayload::SyncStep1 { sv } => {
                let Origin::Local(client_id) = origin else {
                    return Err(SessionError::NoOriginatingClient);
                };
                let (update, own_sv) = self.storage.handle_sync_step1(&self.document_id, sv).await?;
                self.send_to(
                    client_id,
                    self.doc_message(DocPayload::SyncStep2 { update }),
                );
                self.send_to(
                    client_id,
                    self.doc_message(DocPayload::SyncStep1 { sv: own_sv }),
                );
                Ok(())
            }
            DocPayload::SyncStep2 { update } => {
                let (_, storage_result) = tokio::join!(
                    async { self.rebroadcast(message, origin) },
                    self.storage.handle_sync_step2(&self.document_id, update),
                );
                storage_result?;

                if let Origin::Local(client_id) = origin {
                    self.send_to(client_id, self.doc_message(DocPayload::SyncDone));
                    self.replicate(message).await?;
                }
                Ok(())
            }
            DocPayload::Update { update } => {
                let (_, storage_result) = tokio::join!(
                    async { self.rebroadcast(message, origin) },
                    self.storage.handle_update(&self.document_id, update),
                );
                storage_result?;

                if origin.is_local() {
                    self.replicate(message).await?;
                }
                Ok(())
            }
            DocPayload::SyncDone => Ok(()),
            // Server-to-client only; an inbound one is dropped (§6).
            DocPayload::AuthMessage { .. } => Ok(()),
        }
    }

    async fn apply_file(&self, file: &FileMessage, origin: Origin<'_>) -> Result<(), SessionError> {
        let Origin::Local(client_id) = origin else {
            // File transfer is a direct client<->server exchange, not part
            // of the replicated protocol.
            return Ok(());
        };

        match &file.payload {
            FilePayload::BeginUpload {
                upload_id,
                filename,
                size,
                mime_type,
                encrypted,
            } => {
                self.temporary_uploads.begin_upload(
                    upload_id.clone(),
                    UploadMetadata {
                        document_id: self.document_id.clone(),
                        filename: filename.clone(),
                        size: *size,
                        mime_type: mime_type.clone(),
                        encrypted: *encrypted,
                    },
                );
                Ok(())
            }
            FilePayload::Chunk {
                upload_id,
                chunk_index,
                data,
                proof,
            } => {
                if let Err(e) = self.temporary_uploads.store_chunk(
                    upload_id,
                    *chunk_index,
                    data.clone(),
                    proof.clone(),
                ) {
                    self.send_to(
                        client_id,
                        self.file_message(FilePayload::UploadRejected {
                            upload_id: upload_id.clone(),
                            reason: e.to_string(),
                        }),
                    );
                }
                Ok(())
            }
            FilePayload::CompleteUpload { upload_id, file_id } => {
                match complete_and_commit(
                    &self.temporary_uploads,
                    self.file_storage.as_ref(),
                    self.storage.as_ref(),
                    upload_id,
                    file_id.clone(),
                )
                .await
                {
                    Ok(resolved) => self.send_to(
                        client_id,
                        self.file_message(FilePayload::UploadAccepted {
                            upload_id: upload_id.clone(),
                            file_id: resolved,
                        }),
                    ),
                    Err(e) => self.send_to(
                        client_id,
                        self.file_message(FilePayload::UploadRejected {
                            upload_id: upload_id.clone(),
                            reason: e.to_string(),
                        }),
                    ),
                }
                Ok(())
            }
            FilePayload::DownloadRequest { file_id } => {
                match self.file_reader.read_file(file_id).await {
                    Some(bytes) => {
                        for (i, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
                            self.send_to(
                                client_id,
                                self.file_message(FilePayload::DownloadChunk {
                                    file_id: file_id.clone(),
                                    chunk_index: i as u32,
                                    data: chunk.to_vec(),
                                }),
                            );
                        }
                        self.send_to(
                            client_id,
                            self.file_message(FilePayload::DownloadComplete {
                                file_id: file_id.clone(),
                            }),
                        );
                    }
                    None => warn!(file_id = %file_id, "download requested for unknown file"),
                }
                Ok(())
            }
            // Server-originated; never accepted inbound.
            FilePayload::UploadAccepted { .. }
            | FilePayload::UploadRejected { .. }
            | FilePayload::DownloadChunk { .. }
            | FilePayload::DownloadComplete { .. } => Ok(()),
        }
    }

    async fn apply_rpc(
        &self,
        message: &Message,
        rpc: &RpcMessage,
        origin: Origin<'_>,
    ) -> Result<(), SessionError> {
        let Origin::Local(client_id) = origin else {
            return Ok(());
        };
        if !matches!(rpc.direction, RpcDirection::Request) {
            return Ok(());
        }

        let ctx = RpcContext::new(self.document_id.clone(), self.storage.clone());
        match self.rpc.dispatch(&rpc.method, &ctx, rpc.payload.clone()).await {
            Ok(RpcOutcome::Response(payload)) => {
                self.send_to(
                    client_id,
                    self.rpc_reply(&rpc.method, RpcDirection::Response, message.id.clone(), payload),
                );
            }
            Ok(RpcOutcome::Stream { items, response }) => {
                for item in items {
                    self.send_to(
                        client_id,
                        self.rpc_reply(&rpc.method, RpcDirection::Stream, message.id.clone(), item),
                    );
                }
                self.send_to(
                    client_id,
                    self.rpc_reply(&rpc.method, RpcDirection::Response, message.id.clone(), response),
                );
            }
            Err(e) => {
                self.send_to(
                    client_id,
                    self.rpc_reply(
                        &rpc.method,
                        RpcDirection::Response,
                        message.id.clone(),
                        json!({ "type": "error", "details": e.to_string() }),
                    ),
                );
            }
        }
        Ok(())
    }

    fn rebroadcast(&self, message: &Message, origin: Origin<'_>) {
        match origin {
            Origin::Local(client_id) => self.broadcast(message, Some(client_id)),
            Origin::Replicated => self.broadcast(message, None),
        }
    }

    async fn broadcast_and_replicate(
        &self,
        message: &Message,
        origin: Origin<'_>,
    ) -> Result<(), SessionError> {
        self.rebroadcast(message, origin);
        if origin.is_local() {
            self.replicate(message).await?;
        }
        Ok(())
    }

    async fn replicate(&self, message: &Message) -> Result<(), SessionError> {
        let bytes = teleportal_codec::encode(message);
        self.replicator
            .publish(&self.document_id.replication_channel(), bytes, self.replicator.node_id())
            .await?;
        Ok(())
    }

    fn send_to(&self, client_id: &ClientId, message: Message) {
        if let Some(client) = self.clients.get(client_id) {
            if let Err(e) = client.send(message) {
                warn!(%client_id, error = %e, "failed to send to client");
            }
        }
    }

    fn doc_message(&self, payload: DocPayload) -> Message {
        new_message(MessageBody::Doc(DocMessage {
            document_id: self.document_id.clone(),
            encrypted: self.encrypted,
            context: serde_json::Map::new(),
            payload,
        }))
    }

    fn file_message(&self, payload: FilePayload) -> Message {
        new_message(MessageBody::File(FileMessage {
            document_id: self.document_id.clone(),
            payload,
        }))
    }

    fn rpc_reply(
        &self,
        method: &str,
        direction: RpcDirection,
        original_request_id: MessageId,
        payload: serde_json::Value,
    ) -> Message {
        new_message(MessageBody::Rpc(RpcMessage {
            document_id: self.document_id.clone(),
            method: method.to_owned(),
            direction,
            original_request_id: Some(original_request_id),
            payload,
        }))
    }
}

/// Assigns the deterministic content-hash id every outgoing message carries
/// (§3: "Every outgoing message carries a server-assigned id... used by
/// `ack` and for TTL dedupe").
fn new_message(body: MessageBody) -> Message {
    let draft = Message::new(MessageId::new(String::new()), body);
    let encoded = teleportal_codec::encode(&draft);
    let id = teleportal_codec::content_id(&encoded);
    Message::new(id, draft.body)
}

struct SessionReplicationHandler {
    session: Weak<Session>,
    own_node: NodeId,
}

#[async_trait]
impl ReplicationHandler for SessionReplicationHandler {
    async fn on_message(&self, source_id: NodeId, bytes: Vec<u8>) {
        if source_id == self.own_node {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let message = match teleportal_codec::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed replicated frame");
                return;
            }
        };
        if let Err(e) = session.apply(message, Origin::Replicated).await {
            warn!(error = %e, "replicated apply failed");
        }
    }
}
