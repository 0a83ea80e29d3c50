use std::sync::Arc;

use async_trait::async_trait;
use teleportal_primitives::{ClientSink, Message};

/// The boundary between the core and whatever owns the actual wire
/// connection (§6 Transport boundary). Framing/decoding already happened
/// by the time a [`Message`] reaches `recv` — one WebSocket frame, one
/// long-poll body, whatever the adapter decodes into.
#[async_trait]
pub trait Transport: Send {
    /// Yields the next decoded message, or `None` once the connection is
    /// closed.
    async fn recv(&mut self) -> Option<Message>;

    /// The writable half, handed to every session this client joins.
    fn sink(&self) -> Arc<dyn ClientSink>;
}
