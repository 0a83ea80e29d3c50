//! Per-document session actor (§4.G): the state machine every `doc`,
//! `awareness`, `ack`, `file`, and `rpc` message passes through, bridging
//! local clients, storage, the replicator, and the upload/RPC subsystems.

pub mod dedupe;
pub mod error;
pub mod session;

pub use dedupe::{DedupeCache, DEFAULT_DEDUPE_TTL};
pub use error::SessionError;
pub use session::{Session, SessionConfig};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use teleportal_primitives::{
        AckMessage, ClientId, ClientSendError, ClientSink, DocMessage, DocPayload, DocumentId,
        Message, MessageBody, MessageId, Origin, StateVector,
    };
    use teleportal_replicator::InMemoryReplicator;
    use teleportal_rpc::MethodRegistry;
    use teleportal_storage::{InMemoryUnencryptedStorage, LogEngine, Storage};
    use teleportal_upload::{InMemoryFileStorage, TemporaryUploadStorage};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug)]
    struct RecordingSink {
        id: ClientId,
        received: Mutex<Vec<Message>>,
    }

    impl RecordingSink {
        fn new(id: ClientId) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: Mutex::new(Vec::new()),
            })
        }

        async fn drain(&self) -> Vec<Message> {
            std::mem::take(&mut *self.received.lock().await)
        }
    }

    impl ClientSink for RecordingSink {
        fn client_id(&self) -> &ClientId {
            &self.id
        }

        fn send(&self, message: Message) -> Result<(), ClientSendError> {
            self.received
                .try_lock()
                .expect("test sink is single-threaded")
                .push(message);
            Ok(())
        }
    }

    fn new_session(document_id: DocumentId) -> Arc<Session> {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryUnencryptedStorage::new(LogEngine));
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        let temporary_uploads = Arc::new(TemporaryUploadStorage::new());
        let file_storage = Arc::new(InMemoryFileStorage::new());
        Arc::new(Session::new(SessionConfig::new(
            document_id,
            false,
            storage,
            replicator,
            rpc,
            temporary_uploads,
            file_storage.clone(),
            file_storage,
        )))
    }

    fn update_message(bytes: Vec<u8>) -> Message {
        Message::new(
            MessageId::new("local-placeholder"),
            MessageBody::Doc(DocMessage {
                document_id: DocumentId::new("doc-1"),
                encrypted: false,
                context: serde_json::Map::new(),
                payload: DocPayload::Update {
                    update: teleportal_primitives::UpdatePayload::Plain(bytes),
                },
            }),
        )
    }

    #[tokio::test]
    async fn update_from_one_client_broadcasts_to_the_other_but_not_back() {
        let session = new_session(DocumentId::new("doc-1"));
        session.load().await.unwrap();

        let a = ClientId::new("a");
        let b = ClientId::new("b");
        let sink_a = RecordingSink::new(a.clone());
        let sink_b = RecordingSink::new(b.clone());
        session.add_client(sink_a.clone());
        session.add_client(sink_b.clone());

        session
            .apply(update_message(vec![1, 2, 3]), Origin::Local(&a))
            .await
            .unwrap();

        assert!(sink_a.drain().await.is_empty());
        let received_b = sink_b.drain().await;
        assert_eq!(received_b.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_applied_once() {
        let session = new_session(DocumentId::new("doc-1"));
        session.load().await.unwrap();

        let a = ClientId::new("a");
        let b = ClientId::new("b");
        session.add_client(RecordingSink::new(a.clone()));
        let sink_b = RecordingSink::new(b.clone());
        session.add_client(sink_b.clone());

        let ack = Message::new(MessageId::new("dup"), MessageBody::Ack(AckMessage {
            message_id: MessageId::new("whatever"),
        }));
        session.apply(ack.clone(), Origin::Local(&a)).await.unwrap();
        session.apply(ack, Origin::Local(&a)).await.unwrap();

        assert_eq!(sink_b.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn encryption_mismatch_is_rejected() {
        let session = new_session(DocumentId::new("doc-1"));
        session.load().await.unwrap();
        let a = ClientId::new("a");

        let mismatched = Message::new(
            MessageId::new("m"),
            MessageBody::Doc(DocMessage {
                document_id: DocumentId::new("doc-1"),
                encrypted: true,
                context: serde_json::Map::new(),
                payload: DocPayload::SyncStep1 {
                    sv: StateVector::Plain(vec![]),
                },
            }),
        );

        let err = session.apply(mismatched, Origin::Local(&a)).await.unwrap_err();
        assert!(matches!(err, SessionError::EncryptionMismatch(_)));
    }

    #[tokio::test]
    async fn sync_step1_without_local_origin_is_rejected() {
        let session = new_session(DocumentId::new("doc-1"));
        session.load().await.unwrap();

        let message = Message::new(
            MessageId::new("m"),
            MessageBody::Doc(DocMessage {
                document_id: DocumentId::new("doc-1"),
                encrypted: false,
                context: serde_json::Map::new(),
                payload: DocPayload::SyncStep1 {
                    sv: StateVector::Plain(vec![]),
                },
            }),
        );

        let err = session.apply(message, Origin::Replicated).await.unwrap_err();
        assert!(matches!(err, SessionError::NoOriginatingClient));
    }

    #[tokio::test]
    async fn rpc_request_from_local_client_gets_a_response() {
        struct EchoHandler;
        #[async_trait]
        impl teleportal_rpc::RpcHandler for EchoHandler {
            async fn handle(
                &self,
                _ctx: &teleportal_rpc::RpcContext,
                payload: serde_json::Value,
            ) -> Result<teleportal_rpc::RpcOutcome, teleportal_rpc::RpcError> {
                Ok(teleportal_rpc::RpcOutcome::Response(payload))
            }
        }

        let storage: Arc<dyn Storage> = Arc::new(InMemoryUnencryptedStorage::new(LogEngine));
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        rpc.register("echo", Arc::new(EchoHandler));
        let temporary_uploads = Arc::new(TemporaryUploadStorage::new());
        let file_storage = Arc::new(InMemoryFileStorage::new());
        let session = Arc::new(Session::new(SessionConfig::new(
            DocumentId::new("doc-1"),
            false,
            storage,
            replicator,
            rpc,
            temporary_uploads,
            file_storage.clone(),
            file_storage,
        )));
        session.load().await.unwrap();

        let a = ClientId::new("a");
        let sink_a = RecordingSink::new(a.clone());
        session.add_client(sink_a.clone());

        let request = Message::new(
            MessageId::new("req-1"),
            MessageBody::Rpc(teleportal_primitives::RpcMessage {
                document_id: DocumentId::new("doc-1"),
                method: "echo".into(),
                direction: teleportal_primitives::RpcDirection::Request,
                original_request_id: None,
                payload: json!({"hello": "world"}),
            }),
        );
        session.apply(request, Origin::Local(&a)).await.unwrap();

        let received = sink_a.drain().await;
        assert_eq!(received.len(), 1);
        let MessageBody::Rpc(reply) = &received[0].body else {
            panic!("expected rpc reply")
        };
        assert_eq!(reply.direction, teleportal_primitives::RpcDirection::Response);
        assert_eq!(reply.payload, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn two_sessions_over_one_replicator_converge_without_a_resend_loop() {
        let replicator = Arc::new(InMemoryReplicator::new());
        let doc = DocumentId::new("shared-doc");

        let storage_a: Arc<dyn Storage> = Arc::new(InMemoryUnencryptedStorage::new(LogEngine));
        let session_a = Arc::new(Session::new(SessionConfig::new(
            doc.clone(),
            false,
            storage_a,
            replicator.clone(),
            Arc::new(MethodRegistry::new()),
            Arc::new(TemporaryUploadStorage::new()),
            Arc::new(InMemoryFileStorage::new()),
            Arc::new(InMemoryFileStorage::new()),
        )));
        session_a.load().await.unwrap();

        let storage_b: Arc<dyn Storage> = Arc::new(InMemoryUnencryptedStorage::new(LogEngine));
        let session_b = Arc::new(Session::new(SessionConfig::new(
            doc.clone(),
            false,
            storage_b.clone(),
            replicator.clone(),
            Arc::new(MethodRegistry::new()),
            Arc::new(TemporaryUploadStorage::new()),
            Arc::new(InMemoryFileStorage::new()),
            Arc::new(InMemoryFileStorage::new()),
        )));
        session_b.load().await.unwrap();

        let client = ClientId::new("local");
        let sink = RecordingSink::new(client.clone());
        session_a.add_client(sink.clone());

        let message = Message::new(
            MessageId::new("unused"),
            MessageBody::Doc(DocMessage {
                document_id: doc.clone(),
                encrypted: false,
                context: serde_json::Map::new(),
                payload: DocPayload::Update {
                    update: teleportal_primitives::UpdatePayload::Plain(vec![9, 9]),
                },
            }),
        );
        session_a.apply(message, Origin::Local(&client)).await.unwrap();

        // session_b receives the replicated frame asynchronously; give the
        // handler a chance to run.
        for _ in 0..20 {
            if storage_b
                .get_document(&doc)
                .await
                .unwrap()
                .is_some_and(|d| !d.update.is_empty())
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let replicated = storage_b.get_document(&doc).await.unwrap().expect("converged");
        assert!(replicated.update.ends_with(&[9, 9]));

        // The replicated apply never re-publishes: a third session on the
        // same channel sees exactly one delivery, not an echo.
        drop(session_b);
    }
}
