use std::sync::Arc;

use dashmap::DashMap;
use teleportal_auth::Claims;
use teleportal_primitives::{
    ClientId, DocMessage, DocPayload, DocumentId, Message, MessageBody, MessageId, Origin,
};
use teleportal_replicator::Replicator;
use teleportal_rpc::MethodRegistry;
use teleportal_session::{Session, SessionConfig};
use teleportal_storage::{CrdtEngine, LogEngine, StorageFactory};
use teleportal_upload::{FileReader, FileStorage, TemporaryUploadStorage};
use tracing::warn;

use crate::client::ClientRecord;
use crate::error::ServerError;
use crate::permission::{ClaimsPermissionChecker, PermissionChecker, PermissionRequest};
use crate::registry::SessionRegistry;
use crate::transport::Transport;

/// Everything a [`Server`] needs at construction (§4.H).
pub struct ServerConfig<E: CrdtEngine + 'static = LogEngine> {
    pub storage_factory: StorageFactory<E>,
    pub replicator: Arc<dyn Replicator>,
    pub rpc: Arc<MethodRegistry>,
    pub temporary_uploads: Arc<TemporaryUploadStorage>,
    pub file_storage: Arc<dyn FileStorage>,
    pub file_reader: Arc<dyn FileReader>,
    pub permission_checker: Arc<dyn PermissionChecker>,
}

impl ServerConfig<LogEngine> {
    /// Convenience constructor wiring the reference in-memory/`LogEngine`
    /// stack with the default claims-based permission checker.
    #[must_use]
    pub fn with_defaults(replicator: Arc<dyn Replicator>, rpc: Arc<MethodRegistry>) -> Self {
        let file_storage = Arc::new(teleportal_upload::InMemoryFileStorage::new());
        Self {
            storage_factory: StorageFactory::with_log_engine(),
            replicator,
            rpc,
            temporary_uploads: Arc::new(TemporaryUploadStorage::new()),
            file_storage: file_storage.clone(),
            file_reader: file_storage,
            permission_checker: Arc::new(ClaimsPermissionChecker::new()),
        }
    }
}

/// Binds transports to sessions: the top-level entry point (§4.H). Owns the
/// session registry and every connected client's bookkeeping; one `Server`
/// per node.
pub struct Server<E: CrdtEngine + 'static = LogEngine> {
    sessions: SessionRegistry,
    storage_factory: StorageFactory<E>,
    replicator: Arc<dyn Replicator>,
    rpc: Arc<MethodRegistry>,
    temporary_uploads: Arc<TemporaryUploadStorage>,
    file_storage: Arc<dyn FileStorage>,
    file_reader: Arc<dyn FileReader>,
    permission_checker: Arc<dyn PermissionChecker>,
    clients: DashMap<ClientId, Arc<ClientRecord>>,
}

impl<E: CrdtEngine + 'static> Server<E> {
    #[must_use]
    pub fn new(config: ServerConfig<E>) -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionRegistry::new(),
            storage_factory: config.storage_factory,
            replicator: config.replicator,
            rpc: config.rpc,
            temporary_uploads: config.temporary_uploads,
            file_storage: config.file_storage,
            file_reader: config.file_reader,
            permission_checker: config.permission_checker,
            clients: DashMap::new(),
        })
    }

    /// Returns the existing session for `document_id`, or constructs,
    /// loads, and registers a new one (§4.H `getOrOpenSession`).
    pub async fn get_or_open_session(
        self: &Arc<Self>,
        document_id: DocumentId,
        encrypted: bool,
    ) -> Result<Arc<Session>, ServerError> {
        let session = self.sessions.get_or_construct(document_id.clone(), || {
            Session::new(SessionConfig::new(
                document_id.clone(),
                encrypted,
                self.storage_factory.storage_for(&document_id, encrypted),
                Arc::clone(&self.replicator),
                Arc::clone(&self.rpc),
                Arc::clone(&self.temporary_uploads),
                Arc::clone(&self.file_storage),
                Arc::clone(&self.file_reader),
            ))
        });
        session.load().await?;
        Ok(session)
    }

    /// Binds `transport` to a new client and spawns its reader loop. Each
    /// inbound message is permission-checked, then routed to
    /// `getOrOpenSession(documentId).apply(message, client)` (§4.H
    /// `createClient`). Returns immediately; the reader runs in the
    /// background until the transport's stream ends.
    ///
    /// The client's id is always the one its sink reports
    /// (`transport.sink().client_id()`) — the same id the session roster
    /// keys `addClient`/`removeClient`/`broadcast`'s exclusion on, so a
    /// client is never registered under one id at the server and a
    /// different one inside a session.
    pub fn create_client(self: &Arc<Self>, mut transport: Box<dyn Transport>, claims: Claims) -> ClientId {
        let sink = transport.sink();
        let client_id = sink.client_id().clone();
        let record = Arc::new(ClientRecord::new(claims, sink));
        self.clients.insert(client_id.clone(), record);

        let server = Arc::clone(self);
        let reader_client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(message) = transport.recv().await {
                server.route_message(&reader_client_id, message).await;
            }
            server.disconnect_client(&reader_client_id).await;
        });

        client_id
    }

    async fn route_message(self: &Arc<Self>, client_id: &ClientId, message: Message) {
        let Some(record) = self.clients.get(client_id).map(|r| Arc::clone(r.value())) else {
            return;
        };

        // Server-to-client only; never forwarded (§6 permission mapping).
        if matches!(
            &message.body,
            MessageBody::Doc(DocMessage {
                payload: DocPayload::AuthMessage { .. },
                ..
            })
        ) {
            return;
        }

        let document_id = match message.document_id() {
            Some(id) => {
                record.remember_document(id.clone());
                id.clone()
            }
            None => match record.last_document() {
                Some(id) => id,
                None => {
                    warn!(%client_id, "dropping ack with no prior document context");
                    return;
                }
            },
        };

        if let Some(permission) = message.required_permission() {
            let allowed = self
                .permission_checker
                .check(PermissionRequest {
                    claims: &record.claims,
                    document_id: &document_id,
                    message: &message,
                    permission,
                })
                .await;
            if !allowed {
                let denial = auth_denied_message(&document_id, "permission denied");
                if let Err(e) = record.sink.send(denial) {
                    warn!(%client_id, error = %e, "failed to deliver auth-message denial");
                }
                return;
            }
        }

        let encrypted = message.encrypted().unwrap_or(false);
        let session = match self.get_or_open_session(document_id.clone(), encrypted).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%client_id, error = %e, "failed to open session");
                return;
            }
        };

        session.add_client(Arc::clone(&record.sink));
        record.remember_document(document_id);

        if let Err(e) = session.apply(message, Origin::Local(client_id)).await {
            warn!(%client_id, error = %e, "apply failed");
        }
    }

    /// Removes `client_id` from every session it has joined (§4.H
    /// `disconnectClient`).
    pub async fn disconnect_client(&self, client_id: &ClientId) {
        if let Some((_, record)) = self.clients.remove(client_id) {
            for document_id in record.joined_documents() {
                if let Some(session) = self.sessions.get(&document_id) {
                    session.remove_client(client_id);
                }
            }
        }
    }

    /// Disposes every session (unsubscribing from the replicator), then
    /// awaits any applies still in flight (§4.H `asyncDispose`, §5
    /// Cancellation and timeouts).
    pub async fn dispose(&self) {
        for session in self.sessions.all() {
            session.dispose().await;
        }
    }
}

fn auth_denied_message(document_id: &DocumentId, reason: impl Into<String>) -> Message {
    let body = MessageBody::Doc(DocMessage {
        document_id: document_id.clone(),
        encrypted: false,
        context: serde_json::Map::new(),
        payload: DocPayload::AuthMessage {
            reason: reason.into(),
        },
    });
    let draft = Message::new(MessageId::new(String::new()), body);
    let encoded = teleportal_codec::encode(&draft);
    let id = teleportal_codec::content_id(&encoded);
    Message::new(id, draft.body)
}
