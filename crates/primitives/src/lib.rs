//! Shared data model for the teleportal server: document identity and
//! metadata, the wire-independent message shape, and the client seam the
//! session engine broadcasts through.
//!
//! This crate has no async runtime and no I/O; it exists so every other
//! crate in the workspace can agree on the same types without depending on
//! each other's internals.

pub mod client;
pub mod document;
pub mod ids;
pub mod message;

pub use client::{ClientSendError, ClientSink};
pub use document::{Document, DocumentMetadata};
pub use ids::{ClientId, DocumentId, FileId, MessageId, MilestoneId, NodeId, UploadId};
pub use message::{
    AckMessage, AwarenessMessage, DocMessage, DocPayload, EncryptedMessageId,
    EncryptedMessageRecord, EncryptedStateVector, FileMessage, FilePayload, Message, MessageBody,
    Origin, Permission, RpcDirection, RpcMessage, StateVector, SyncStep2Update, UpdatePayload,
};
