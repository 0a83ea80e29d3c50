use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ClientId, DocumentId, FileId, MessageId, UploadId};

/// A read/write permission required to apply a given payload (§4.D, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    /// Never required by a specific check, but matches `required` in an
    /// access-list entry (`admin` satisfies any check).
    Admin,
}

/// A fully decoded, envelope-wrapped protocol message (§3 Message).
///
/// `id` is assigned by the server when not supplied by the sender, computed
/// as a deterministic content hash (§4.A).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub body: MessageBody,
}

impl Message {
    #[must_use]
    pub const fn new(id: MessageId, body: MessageBody) -> Self {
        Self { id, body }
    }

    #[must_use]
    pub fn document_id(&self) -> Option<&DocumentId> {
        match &self.body {
            MessageBody::Doc(doc) => Some(&doc.document_id),
            MessageBody::Awareness(a) => Some(&a.document_id),
            MessageBody::File(f) => Some(&f.document_id),
            MessageBody::Rpc(r) => Some(&r.document_id),
            MessageBody::Ack(_) => None,
        }
    }

    #[must_use]
    pub fn encrypted(&self) -> Option<bool> {
        match &self.body {
            MessageBody::Doc(doc) => Some(doc.encrypted),
            _ => None,
        }
    }

    /// The permission class required to accept this message, per the wire
    /// mapping in §6. `None` means the message bypasses the permission gate
    /// entirely (awareness, ack, file, rpc-other-than-milestone-write).
    #[must_use]
    pub fn required_permission(&self) -> Option<Permission> {
        match &self.body {
            MessageBody::Doc(doc) => match &doc.payload {
                DocPayload::SyncStep1 { .. } | DocPayload::SyncDone => Some(Permission::Read),
                DocPayload::SyncStep2 { .. } | DocPayload::Update { .. } => {
                    Some(Permission::Write)
                }
                // Server-originated denials are never accepted inbound.
                DocPayload::AuthMessage { .. } => None,
            },
            MessageBody::Rpc(rpc) => rpc.required_permission(),
            MessageBody::Awareness(_) | MessageBody::Ack(_) | MessageBody::File(_) => None,
        }
    }
}

/// `doc` message: synchronization and update traffic for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMessage {
    pub document_id: DocumentId,
    pub encrypted: bool,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub payload: DocPayload,
}

/// The mapping from lamport client id to highest-seen counter, for
/// encrypted documents (§3). Unencrypted state vectors are opaque CRDT
/// bytes the host's CRDT engine produced.
pub type EncryptedStateVector = BTreeMap<u32, u32>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateVector {
    Plain(Vec<u8>),
    Encrypted(EncryptedStateVector),
}

/// Content-hash identifier of a single encrypted message, base64-encoded
/// (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncryptedMessageId(String);

impl EncryptedMessageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single opaque encrypted message in the append-only per-document log,
/// indexed by `(lamportClientId, counter)` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessageRecord {
    pub message_id: EncryptedMessageId,
    pub lamport_client_id: u32,
    pub counter: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStep2Update {
    Plain(Vec<u8>),
    Encrypted(Vec<EncryptedMessageRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePayload {
    Plain(Vec<u8>),
    Encrypted(EncryptedMessageRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocPayload {
    /// "tell me what you have beyond this".
    SyncStep1 { sv: StateVector },
    /// "here is the diff".
    SyncStep2 { update: SyncStep2Update },
    /// "we are caught up".
    SyncDone,
    /// "apply this".
    Update { update: UpdatePayload },
    /// Server-to-client denial. Never accepted inbound (§4.D).
    AuthMessage { reason: String },
}

/// `awareness` message: ephemeral, unmerged-by-the-server presence data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessMessage {
    pub document_id: DocumentId,
    pub update: Vec<u8>,
}

/// `ack` message: confirms delivery of a prior message by id. No
/// `documentId` on the wire (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub message_id: MessageId,
}

/// `file` message: chunked upload/download traffic (§4.I).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMessage {
    pub document_id: DocumentId,
    pub payload: FilePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilePayload {
    BeginUpload {
        upload_id: UploadId,
        filename: String,
        size: u64,
        mime_type: String,
        encrypted: bool,
    },
    Chunk {
        upload_id: UploadId,
        chunk_index: u32,
        data: Vec<u8>,
        /// Optional per-chunk Merkle proof; verification may be deferred to
        /// completion (§4.I).
        proof: Option<Vec<[u8; 32]>>,
    },
    CompleteUpload {
        upload_id: UploadId,
        file_id: Option<FileId>,
    },
    UploadAccepted {
        upload_id: UploadId,
        file_id: FileId,
    },
    UploadRejected {
        upload_id: UploadId,
        reason: String,
    },
    DownloadRequest {
        file_id: FileId,
    },
    DownloadChunk {
        file_id: FileId,
        chunk_index: u32,
        data: Vec<u8>,
    },
    DownloadComplete {
        file_id: FileId,
    },
}

/// `rpc` message: request/stream/response traffic over the method registry
/// (§4.J).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub document_id: DocumentId,
    pub method: String,
    pub direction: RpcDirection,
    pub original_request_id: Option<MessageId>,
    pub payload: Value,
}

impl RpcMessage {
    /// Classifies the method per §4.J / §6. Methods not recognized as a
    /// milestone write default to bypassing the gate, matching the wire
    /// table's "allow" default for `rpc.*`.
    #[must_use]
    pub fn required_permission(&self) -> Option<Permission> {
        if !matches!(self.direction, RpcDirection::Request) {
            return None;
        }
        match self.method.as_str() {
            "milestoneCreate" | "milestoneUpdateName" | "milestoneDelete" | "milestoneRestore" => {
                Some(Permission::Write)
            }
            "milestoneList" | "milestoneGet" => Some(Permission::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcDirection {
    Request,
    Stream,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    Doc(DocMessage),
    Awareness(AwarenessMessage),
    Ack(AckMessage),
    File(FileMessage),
    Rpc(RpcMessage),
}

/// Originating client for a locally-applied message, or `None` for a
/// message arriving via replication (§4.G "Dedupe and replication order").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin<'a> {
    Local(&'a ClientId),
    Replicated,
}

impl Origin<'_> {
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}
