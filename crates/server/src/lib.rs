//! Transport-to-session binding (§4.H): client lifecycle, the permission
//! gate, and the session registry that guarantees one session per document.

pub mod client;
pub mod error;
pub mod permission;
pub mod registry;
pub mod server;
pub mod transport;

pub use client::ClientRecord;
pub use error::ServerError;
pub use permission::{ClaimsPermissionChecker, PermissionChecker, PermissionRequest};
pub use registry::SessionRegistry;
pub use server::{Server, ServerConfig};
pub use transport::Transport;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use teleportal_auth::{AccessEntry, Claims};
    use teleportal_primitives::{
        AckMessage, ClientId, ClientSendError, ClientSink, DocMessage, DocPayload, DocumentId,
        Message, MessageBody, MessageId, Permission, StateVector, UpdatePayload,
    };
    use teleportal_replicator::InMemoryReplicator;
    use teleportal_rpc::MethodRegistry;
    use tokio::sync::{mpsc, Mutex};

    use super::*;

    struct ChannelTransport {
        inbound: mpsc::UnboundedReceiver<Message>,
        sink: Arc<ChannelSink>,
    }

    #[derive(Debug)]
    struct ChannelSink {
        id: ClientId,
        outbound: mpsc::UnboundedSender<Message>,
    }

    impl ClientSink for ChannelSink {
        fn client_id(&self) -> &ClientId {
            &self.id
        }

        fn send(&self, message: Message) -> Result<(), ClientSendError> {
            self.outbound
                .send(message)
                .map_err(|_| ClientSendError::Disconnected(self.id.clone()))
        }
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn recv(&mut self) -> Option<Message> {
            self.inbound.recv().await
        }

        fn sink(&self) -> Arc<dyn ClientSink> {
            self.sink.clone()
        }
    }

    fn channel_pair(
        client_id: ClientId,
    ) -> (
        ChannelTransport,
        mpsc::UnboundedSender<Message>,
        Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            id: client_id,
            outbound: out_tx,
        });
        (
            ChannelTransport {
                inbound: in_rx,
                sink,
            },
            in_tx,
            Arc::new(Mutex::new(out_rx)),
        )
    }

    fn claims_with(entries: Vec<AccessEntry>) -> Claims {
        Claims {
            user_id: "u1".into(),
            room: "r1".into(),
            document_access: entries,
            iat: 0,
            exp: u64::MAX,
            iss: "test".into(),
            aud: "teleportal".into(),
        }
    }

    fn update_message(document_id: &str, bytes: Vec<u8>) -> Message {
        Message::new(
            MessageId::new("unused"),
            MessageBody::Doc(DocMessage {
                document_id: DocumentId::new(document_id),
                encrypted: false,
                context: serde_json::Map::new(),
                payload: DocPayload::Update {
                    update: UpdatePayload::Plain(bytes),
                },
            }),
        )
    }

    #[tokio::test]
    async fn permitted_update_is_applied_and_acked_by_silence() {
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        let server = Server::new(ServerConfig::with_defaults(replicator, rpc));

        let claims = claims_with(vec![AccessEntry::grant("doc-1", vec![Permission::Write])]);
        let (transport, in_tx, out_rx) = channel_pair(ClientId::new("a"));
        let client_id = server.create_client(Box::new(transport), claims);

        in_tx.send(update_message("doc-1", vec![1, 2, 3])).unwrap();
        // give the reader task a turn
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let session = server
            .get_or_open_session(DocumentId::new("doc-1"), false)
            .await
            .unwrap();
        assert_eq!(session.client_count(), 1);
        assert!(out_rx.lock().await.try_recv().is_err());

        server.disconnect_client(&client_id).await;
        assert_eq!(session.client_count(), 0);
    }

    #[tokio::test]
    async fn denied_write_gets_an_auth_message_and_is_not_applied() {
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        let server = Server::new(ServerConfig::with_defaults(replicator, rpc));

        let claims = claims_with(vec![AccessEntry::grant("doc-1", vec![Permission::Read])]);
        let (transport, in_tx, out_rx) = channel_pair(ClientId::new("a"));
        server.create_client(Box::new(transport), claims);

        in_tx.send(update_message("doc-1", vec![9])).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let received = out_rx.lock().await.try_recv().expect("denial should be sent");
        let MessageBody::Doc(doc) = received.body else {
            panic!("expected doc message")
        };
        assert!(matches!(doc.payload, DocPayload::AuthMessage { .. }));

        let session = server
            .get_or_open_session(DocumentId::new("doc-1"), false)
            .await
            .unwrap();
        assert_eq!(session.client_count(), 0);
    }

    #[tokio::test]
    async fn ack_without_document_id_routes_to_the_last_active_document() {
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        let server = Server::new(ServerConfig::with_defaults(replicator, rpc));

        let claims = claims_with(vec![AccessEntry::grant("doc-1", vec![Permission::Write])]);
        let (transport, in_tx, _out_rx) = channel_pair(ClientId::new("a"));
        server.create_client(Box::new(transport), claims);

        in_tx.send(update_message("doc-1", vec![1])).unwrap();
        tokio::task::yield_now().await;

        let ack = Message::new(
            MessageId::new("ack-1"),
            MessageBody::Ack(AckMessage {
                message_id: MessageId::new("whatever"),
            }),
        );
        in_tx.send(ack).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // No panic and the session still exists is the observable proof;
        // dedupe/broadcast behavior for ack itself is covered in
        // teleportal-session's tests.
        assert!(server
            .get_or_open_session(DocumentId::new("doc-1"), false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn originator_is_not_echoed_its_own_update_and_disconnect_clears_the_roster() {
        let replicator = Arc::new(InMemoryReplicator::new());
        let rpc = Arc::new(MethodRegistry::new());
        let server = Server::new(ServerConfig::with_defaults(replicator, rpc));

        let claims = claims_with(vec![AccessEntry::grant("doc-1", vec![Permission::Write])]);
        let (transport_a, in_tx_a, out_rx_a) = channel_pair(ClientId::new("a"));
        let (transport_b, _in_tx_b, out_rx_b) = channel_pair(ClientId::new("b"));
        let client_a = server.create_client(Box::new(transport_a), claims.clone());
        server.create_client(Box::new(transport_b), claims);

        in_tx_a.send(update_message("doc-1", vec![7])).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // The sender hears nothing back; the other client gets the broadcast.
        assert!(out_rx_a.lock().await.try_recv().is_err());
        let received = out_rx_b.lock().await.try_recv().expect("peer should receive the update");
        assert!(matches!(received.body, MessageBody::Doc(_)));

        let session = server
            .get_or_open_session(DocumentId::new("doc-1"), false)
            .await
            .unwrap();
        assert_eq!(session.client_count(), 2);

        server.disconnect_client(&client_a).await;
        assert_eq!(session.client_count(), 1);
    }
}
