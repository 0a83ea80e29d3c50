use thiserror::Error;

use crate::ids::ClientId;
use crate::message::Message;

/// A narrow, typed seam between the session/broadcast engine and whatever
/// owns the actual transport write-half. One `ClientSink` per connected
/// client; the session only ever calls `send`, never touches the transport
/// directly (§9 Design Notes — prefer explicit interfaces over untyped
/// dispatch).
pub trait ClientSink: Send + Sync + core::fmt::Debug {
    fn client_id(&self) -> &ClientId;

    /// Enqueue a message for delivery on this client's writable half.
    /// Implementations are expected to be a thin wrapper over a
    /// single-producer channel into the transport's write task (§3 Client);
    /// `send` itself must not block on transport I/O.
    fn send(&self, message: Message) -> Result<(), ClientSendError>;
}

#[derive(Debug, Error)]
pub enum ClientSendError {
    #[error("client {0} is no longer connected")]
    Disconnected(ClientId),
}
