//! Pub/sub replication plane (§4.F).
//!
//! Channels are named `"document/<documentId>"` (see
//! [`teleportal_primitives::DocumentId::replication_channel`]). Every
//! published frame carries the publishing node's [`NodeId`] so subscribers
//! can suppress the loop of re-delivering a node's own writes back to
//! itself; the in-memory reference implementation here passes it straight
//! through, but a networked implementation must carry it in an envelope
//! header since the underlying transport won't do it for free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use teleportal_primitives::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("failed to publish to channel {0}: {1}")]
    PublishFailed(String, String),
}

/// Receives frames delivered on a subscribed channel, alongside the
/// publishing node's id so the caller can apply loop suppression (§4.F).
#[async_trait]
pub trait ReplicationHandler: Send + Sync {
    async fn on_message(&self, source_id: NodeId, bytes: Vec<u8>);
}

#[async_trait]
pub trait Replicator: Send + Sync {
    fn node_id(&self) -> NodeId;

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn ReplicationHandler>,
    ) -> Result<SubscriptionHandle, ReplicatorError>;

    async fn publish(
        &self,
        channel: &str,
        bytes: Vec<u8>,
        source_id: NodeId,
    ) -> Result<(), ReplicatorError>;
}

/// Drops to unsubscribe. Holding this alive is what keeps a session's
/// channel subscription active.
pub struct SubscriptionHandle {
    channel: String,
    subscriber_id: u64,
    registry: Arc<InMemoryReplicatorInner>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.channel, self.subscriber_id);
    }
}

struct InMemoryReplicatorInner {
    node_id: NodeId,
    channels: DashMap<String, DashMap<u64, Arc<dyn ReplicationHandler>>>,
    next_subscriber_id: AtomicU64,
}

impl InMemoryReplicatorInner {
    fn unsubscribe(&self, channel: &str, subscriber_id: u64) {
        if let Some(subscribers) = self.channels.get(channel) {
            subscribers.remove(&subscriber_id);
        }
    }
}

/// In-process reference replicator: every node in the process shares the
/// same channel registry, so this is only useful for single-node
/// deployments or tests. A networked implementation swaps this out behind
/// the same [`Replicator`] trait.
#[derive(Clone)]
pub struct InMemoryReplicator {
    inner: Arc<InMemoryReplicatorInner>,
}

impl InMemoryReplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_node_id(NodeId::random())
    }

    #[must_use]
    pub fn with_node_id(node_id: NodeId) -> Self {
        Self {
            inner: Arc::new(InMemoryReplicatorInner {
                node_id,
                channels: DashMap::new(),
                next_subscriber_id: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for InMemoryReplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Replicator for InMemoryReplicator {
    fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn ReplicationHandler>,
    ) -> Result<SubscriptionHandle, ReplicatorError> {
        let subscriber_id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .entry(channel.to_owned())
            .or_default()
            .insert(subscriber_id, handler);

        Ok(SubscriptionHandle {
            channel: channel.to_owned(),
            subscriber_id,
            registry: Arc::clone(&self.inner),
        })
    }

    async fn publish(
        &self,
        channel: &str,
        bytes: Vec<u8>,
        source_id: NodeId,
    ) -> Result<(), ReplicatorError> {
        let Some(subscribers) = self.inner.channels.get(channel) else {
            return Ok(());
        };

        let deliveries: Vec<_> = subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        drop(subscribers);

        for handler in deliveries {
            handler.on_message(source_id, bytes.clone()).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler {
        received: Mutex<Vec<(NodeId, Vec<u8>)>>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReplicationHandler for RecordingHandler {
        async fn on_message(&self, source_id: NodeId, bytes: Vec<u8>) {
            self.received.lock().unwrap().push((source_id, bytes));
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let replicator = InMemoryReplicator::new();
        let handler = RecordingHandler::new();
        let _sub = replicator
            .subscribe("document/doc-1", handler.clone())
            .await
            .unwrap();

        let other_node = NodeId::random();
        replicator
            .publish("document/doc-1", vec![1, 2, 3], other_node)
            .await
            .unwrap();

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unrelated_channel_does_not_receive() {
        let replicator = InMemoryReplicator::new();
        let handler = RecordingHandler::new();
        let _sub = replicator
            .subscribe("document/doc-1", handler.clone())
            .await
            .unwrap();

        replicator
            .publish("document/doc-2", vec![9], NodeId::random())
            .await
            .unwrap();

        assert!(handler.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_the_handle_unsubscribes() {
        let replicator = InMemoryReplicator::new();
        let handler = RecordingHandler::new();
        let sub = replicator
            .subscribe("document/doc-1", handler.clone())
            .await
            .unwrap();
        drop(sub);

        replicator
            .publish("document/doc-1", vec![1], NodeId::random())
            .await
            .unwrap();

        assert!(handler.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn caller_is_responsible_for_loop_suppression_by_source_id() {
        // The replicator itself doesn't filter; it hands source_id to the
        // handler, which is expected to ignore source_id == its own node.
        let replicator = InMemoryReplicator::new();
        let own_node = replicator.node_id();
        let handler = RecordingHandler::new();
        let _sub = replicator
            .subscribe("document/doc-1", handler.clone())
            .await
            .unwrap();

        replicator
            .publish("document/doc-1", vec![1], own_node)
            .await
            .unwrap();

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, own_node);
    }
}
