//! Top-level message framing (§3, §6).
//!
//! `Message.id` is never put on the wire: both sides compute it
//! identically as a content hash of the encoded body, so `decode(encode(m))
//! == m` holds without ever trusting a sender-supplied id for a message
//! that didn't have one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use teleportal_primitives::{
    AckMessage, AwarenessMessage, DocMessage, DocPayload, EncryptedMessageRecord, FileId,
    FileMessage, FilePayload, Message, MessageBody, MessageId, RpcDirection, RpcMessage,
    StateVector, SyncStep2Update, UpdatePayload, UploadId,
};

use crate::bytes::{Reader, Writer};
use crate::encrypted_sync;
use crate::error::CodecError;

const TAG_DOC: u8 = 0;
const TAG_AWARENESS: u8 = 1;
const TAG_ACK: u8 = 2;
const TAG_FILE: u8 = 3;
const TAG_RPC: u8 = 4;

const DOC_SYNC_STEP1: u8 = 0;
const DOC_SYNC_STEP2: u8 = 1;
const DOC_SYNC_DONE: u8 = 2;
const DOC_UPDATE: u8 = 3;
const DOC_AUTH_MESSAGE: u8 = 4;

const FILE_BEGIN_UPLOAD: u8 = 0;
const FILE_CHUNK: u8 = 1;
const FILE_COMPLETE_UPLOAD: u8 = 2;
const FILE_UPLOAD_ACCEPTED: u8 = 3;
const FILE_UPLOAD_REJECTED: u8 = 4;
const FILE_DOWNLOAD_REQUEST: u8 = 5;
const FILE_DOWNLOAD_CHUNK: u8 = 6;
const FILE_DOWNLOAD_COMPLETE: u8 = 7;

const RPC_REQUEST: u8 = 0;
const RPC_STREAM: u8 = 1;
const RPC_RESPONSE: u8 = 2;

/// Encodes `message.body` only; `message.id` is dropped and recomputed by
/// the reader.
#[must_use]
pub fn encode(message: &Message) -> Vec<u8> {
    encode_body(&message.body)
}

/// Decodes a full [`Message`], assigning it the content-hash id computed
/// from the bytes just consumed.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let body = decode_body(bytes)?;
    Ok(Message::new(content_id(bytes), body))
}

/// The deterministic id a message receives when the sender didn't supply
/// one: base64 of the `sha256` of its encoded body.
#[must_use]
pub fn content_id(encoded_body: &[u8]) -> MessageId {
    let mut hasher = Sha256::new();
    hasher.update(encoded_body);
    MessageId::new(BASE64.encode(hasher.finalize()))
}

fn encode_body(body: &MessageBody) -> Vec<u8> {
    let mut w = Writer::new();
    match body {
        MessageBody::Doc(doc) => {
            w.write_u8(TAG_DOC);
            w.write_varstring(doc.document_id.as_str());
            encode_doc(&mut w, doc);
        }
        MessageBody::Awareness(a) => {
            w.write_u8(TAG_AWARENESS);
            w.write_varstring(a.document_id.as_str());
            w.write_varlen_bytes(&a.update);
        }
        MessageBody::Ack(ack) => {
            w.write_u8(TAG_ACK);
            w.write_varstring(ack.message_id.as_str());
        }
        MessageBody::File(file) => {
            w.write_u8(TAG_FILE);
            w.write_varstring(file.document_id.as_str());
            encode_file(&mut w, &file.payload);
        }
        MessageBody::Rpc(rpc) => {
            w.write_u8(TAG_RPC);
            w.write_varstring(rpc.document_id.as_str());
            encode_rpc(&mut w, rpc);
        }
    }
    w.into_bytes()
}

fn decode_body(bytes: &[u8]) -> Result<MessageBody, CodecError> {
    let mut r = Reader::new(bytes);
    let tag = r.read_u8()?;
    let body = match tag {
        TAG_DOC => {
            let document_id = r.read_varstring()?.into();
            MessageBody::Doc(decode_doc(&mut r, document_id)?)
        }
        TAG_AWARENESS => {
            let document_id = r.read_varstring()?.into();
            let update = r.read_varlen_bytes()?.to_vec();
            MessageBody::Awareness(AwarenessMessage {
                document_id,
                update,
            })
        }
        TAG_ACK => MessageBody::Ack(AckMessage {
            message_id: MessageId::new(r.read_varstring()?),
        }),
        TAG_FILE => {
            let document_id = r.read_varstring()?.into();
            let payload = decode_file(&mut r)?;
            MessageBody::File(FileMessage {
                document_id,
                payload,
            })
        }
        TAG_RPC => {
            let document_id = r.read_varstring()?.into();
            MessageBody::Rpc(decode_rpc(&mut r, document_id)?)
        }
        other => return Err(CodecError::UnknownDiscriminator(other)),
    };
    r.finish()?;
    Ok(body)
}

fn encode_doc(w: &mut Writer, doc: &DocMessage) {
    w.write_bool(doc.encrypted);
    w.write_varlen_bytes(
        &serde_json::to_vec(&doc.context).unwrap_or_else(|_| b"{}".to_vec()),
    );
    match &doc.payload {
        DocPayload::SyncStep1 { sv } => {
            w.write_u8(DOC_SYNC_STEP1);
            encode_state_vector(w, sv);
        }
        DocPayload::SyncStep2 { update } => {
            w.write_u8(DOC_SYNC_STEP2);
            encode_sync_step2(w, update);
        }
        DocPayload::SyncDone => w.write_u8(DOC_SYNC_DONE),
        DocPayload::Update { update } => {
            w.write_u8(DOC_UPDATE);
            encode_update(w, update);
        }
        DocPayload::AuthMessage { reason } => {
            w.write_u8(DOC_AUTH_MESSAGE);
            w.write_varstring(reason);
        }
    }
}

fn decode_doc(
    r: &mut Reader<'_>,
    document_id: teleportal_primitives::DocumentId,
) -> Result<DocMessage, CodecError> {
    let encrypted = r.read_bool()?;
    let context_bytes = r.read_varlen_bytes()?;
    let context = serde_json::from_slice(context_bytes)
        .map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    let tag = r.read_u8()?;
    let payload = match tag {
        DOC_SYNC_STEP1 => DocPayload::SyncStep1 {
            sv: decode_state_vector(r, encrypted)?,
        },
        DOC_SYNC_STEP2 => DocPayload::SyncStep2 {
            update: decode_sync_step2(r, encrypted)?,
        },
        DOC_SYNC_DONE => DocPayload::SyncDone,
        DOC_UPDATE => DocPayload::Update {
            update: decode_update(r, encrypted)?,
        },
        DOC_AUTH_MESSAGE => DocPayload::AuthMessage {
            reason: r.read_varstring()?,
        },
        other => return Err(CodecError::UnknownDocPayloadTag(other)),
    };
    Ok(DocMessage {
        document_id,
        encrypted,
        context,
        payload,
    })
}

fn encode_state_vector(w: &mut Writer, sv: &StateVector) {
    match sv {
        StateVector::Plain(bytes) => w.write_varlen_bytes(bytes),
        StateVector::Encrypted(sv) => w.write_varlen_bytes(&encrypted_sync::encode_state_vector(sv)),
    }
}

fn decode_state_vector(r: &mut Reader<'_>, encrypted: bool) -> Result<StateVector, CodecError> {
    let bytes = r.read_varlen_bytes()?;
    if encrypted {
        Ok(StateVector::Encrypted(encrypted_sync::decode_state_vector(
            bytes,
        )?))
    } else {
        Ok(StateVector::Plain(bytes.to_vec()))
    }
}

fn encode_sync_step2(w: &mut Writer, update: &SyncStep2Update) {
    match update {
        SyncStep2Update::Plain(bytes) => w.write_varlen_bytes(bytes),
        SyncStep2Update::Encrypted(records) => {
            w.write_varlen_bytes(&encrypted_sync::encode_sync_step2(records));
        }
    }
}

fn decode_sync_step2(
    r: &mut Reader<'_>,
    encrypted: bool,
) -> Result<SyncStep2Update, CodecError> {
    let bytes = r.read_varlen_bytes()?;
    if encrypted {
        Ok(SyncStep2Update::Encrypted(
            encrypted_sync::decode_sync_step2(bytes)?,
        ))
    } else {
        Ok(SyncStep2Update::Plain(bytes.to_vec()))
    }
}

fn encode_update(w: &mut Writer, update: &UpdatePayload) {
    match update {
        UpdatePayload::Plain(bytes) => w.write_varlen_bytes(bytes),
        UpdatePayload::Encrypted(record) => {
            w.write_varlen_bytes(&encrypted_sync::encode_update_list(std::slice::from_ref(
                record,
            )));
        }
    }
}

fn decode_update(r: &mut Reader<'_>, encrypted: bool) -> Result<UpdatePayload, CodecError> {
    let bytes = r.read_varlen_bytes()?;
    if encrypted {
        let mut records = encrypted_sync::decode_update_list(bytes)?;
        let record = records
            .pop()
            .filter(|_| records.is_empty())
            .ok_or(CodecError::UnexpectedEof)?;
        Ok(UpdatePayload::Encrypted(record))
    } else {
        Ok(UpdatePayload::Plain(bytes.to_vec()))
    }
}

fn encode_file(w: &mut Writer, payload: &FilePayload) {
    match payload {
        FilePayload::BeginUpload {
            upload_id,
            filename,
            size,
            mime_type,
            encrypted,
        } => {
            w.write_u8(FILE_BEGIN_UPLOAD);
            w.write_varstring(upload_id.as_str());
            w.write_varstring(filename);
            w.write_varint(*size);
            w.write_varstring(mime_type);
            w.write_bool(*encrypted);
        }
        FilePayload::Chunk {
            upload_id,
            chunk_index,
            data,
            proof,
        } => {
            w.write_u8(FILE_CHUNK);
            w.write_varstring(upload_id.as_str());
            w.write_varint(u64::from(*chunk_index));
            w.write_varlen_bytes(data);
            match proof {
                None => w.write_bool(false),
                Some(hashes) => {
                    w.write_bool(true);
                    w.write_varint(hashes.len() as u64);
                    for hash in hashes {
                        w.write_bytes(hash);
                    }
                }
            }
        }
        FilePayload::CompleteUpload {
            upload_id,
            file_id,
        } => {
            w.write_u8(FILE_COMPLETE_UPLOAD);
            w.write_varstring(upload_id.as_str());
            match file_id {
                None => w.write_bool(false),
                Some(id) => {
                    w.write_bool(true);
                    w.write_varlen_bytes(id.as_bytes());
                }
            }
        }
        FilePayload::UploadAccepted {
            upload_id,
            file_id,
        } => {
            w.write_u8(FILE_UPLOAD_ACCEPTED);
            w.write_varstring(upload_id.as_str());
            w.write_varlen_bytes(file_id.as_bytes());
        }
        FilePayload::UploadRejected { upload_id, reason } => {
            w.write_u8(FILE_UPLOAD_REJECTED);
            w.write_varstring(upload_id.as_str());
            w.write_varstring(reason);
        }
        FilePayload::DownloadRequest { file_id } => {
            w.write_u8(FILE_DOWNLOAD_REQUEST);
            w.write_varlen_bytes(file_id.as_bytes());
        }
        FilePayload::DownloadChunk {
            file_id,
            chunk_index,
            data,
        } => {
            w.write_u8(FILE_DOWNLOAD_CHUNK);
            w.write_varlen_bytes(file_id.as_bytes());
            w.write_varint(u64::from(*chunk_index));
            w.write_varlen_bytes(data);
        }
        FilePayload::DownloadComplete { file_id } => {
            w.write_u8(FILE_DOWNLOAD_COMPLETE);
            w.write_varlen_bytes(file_id.as_bytes());
        }
    }
}

fn read_file_id(r: &mut Reader<'_>) -> Result<FileId, CodecError> {
    let bytes = r.read_varlen_bytes()?;
    let root: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CodecError::LengthOutOfBounds(32, bytes.len()))?;
    Ok(FileId::from_root(root))
}

fn read_merkle_hash(r: &mut Reader<'_>) -> Result<[u8; 32], CodecError> {
    let bytes = r.read_bytes(32)?;
    Ok(bytes.try_into().expect("read_bytes(32) returns 32 bytes"))
}

fn decode_file(r: &mut Reader<'_>) -> Result<FilePayload, CodecError> {
    let tag = r.read_u8()?;
    let payload = match tag {
        FILE_BEGIN_UPLOAD => FilePayload::BeginUpload {
            upload_id: UploadId::new(r.read_varstring()?),
            filename: r.read_varstring()?,
            size: r.read_varint()?,
            mime_type: r.read_varstring()?,
            encrypted: r.read_bool()?,
        },
        FILE_CHUNK => {
            let upload_id = UploadId::new(r.read_varstring()?);
            let chunk_index =
                u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
            let data = r.read_varlen_bytes()?.to_vec();
            let proof = if r.read_bool()? {
                let count = r.read_varint()?;
                let mut hashes = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
                for _ in 0..count {
                    hashes.push(read_merkle_hash(r)?);
                }
                Some(hashes)
            } else {
                None
            };
            FilePayload::Chunk {
                upload_id,
                chunk_index,
                data,
                proof,
            }
        }
        FILE_COMPLETE_UPLOAD => {
            let upload_id = UploadId::new(r.read_varstring()?);
            let file_id = if r.read_bool()? {
                Some(read_file_id(r)?)
            } else {
                None
            };
            FilePayload::CompleteUpload {
                upload_id,
                file_id,
            }
        }
        FILE_UPLOAD_ACCEPTED => FilePayload::UploadAccepted {
            upload_id: UploadId::new(r.read_varstring()?),
            file_id: read_file_id(r)?,
        },
        FILE_UPLOAD_REJECTED => FilePayload::UploadRejected {
            upload_id: UploadId::new(r.read_varstring()?),
            reason: r.read_varstring()?,
        },
        FILE_DOWNLOAD_REQUEST => FilePayload::DownloadRequest {
            file_id: read_file_id(r)?,
        },
        FILE_DOWNLOAD_CHUNK => {
            let file_id = read_file_id(r)?;
            let chunk_index =
                u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
            let data = r.read_varlen_bytes()?.to_vec();
            FilePayload::DownloadChunk {
                file_id,
                chunk_index,
                data,
            }
        }
        FILE_DOWNLOAD_COMPLETE => FilePayload::DownloadComplete {
            file_id: read_file_id(r)?,
        },
        other => return Err(CodecError::UnknownFilePayloadTag(other)),
    };
    Ok(payload)
}

fn encode_rpc(w: &mut Writer, rpc: &RpcMessage) {
    w.write_varstring(&rpc.method);
    w.write_u8(match rpc.direction {
        RpcDirection::Request => RPC_REQUEST,
        RpcDirection::Stream => RPC_STREAM,
        RpcDirection::Response => RPC_RESPONSE,
    });
    match &rpc.original_request_id {
        None => w.write_bool(false),
        Some(id) => {
            w.write_bool(true);
            w.write_varstring(id.as_str());
        }
    }
    w.write_varlen_bytes(&serde_json::to_vec(&rpc.payload).unwrap_or_else(|_| b"null".to_vec()));
}

fn decode_rpc(
    r: &mut Reader<'_>,
    document_id: teleportal_primitives::DocumentId,
) -> Result<RpcMessage, CodecError> {
    let method = r.read_varstring()?;
    let direction = match r.read_u8()? {
        RPC_REQUEST => RpcDirection::Request,
        RPC_STREAM => RpcDirection::Stream,
        RPC_RESPONSE => RpcDirection::Response,
        other => return Err(CodecError::UnknownRpcDirection(other)),
    };
    let original_request_id = if r.read_bool()? {
        Some(MessageId::new(r.read_varstring()?))
    } else {
        None
    };
    let payload_bytes = r.read_varlen_bytes()?;
    let payload = serde_json::from_slice(payload_bytes)
        .map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    Ok(RpcMessage {
        document_id,
        method,
        direction,
        original_request_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use teleportal_primitives::{DocumentId, EncryptedMessageId, Permission};

    fn round_trip(body: MessageBody) -> MessageBody {
        let encoded = encode_body(&body);
        decode_body(&encoded).expect("decode should succeed")
    }

    #[test]
    fn doc_sync_step1_plain_round_trips() {
        let body = MessageBody::Doc(DocMessage {
            document_id: DocumentId::new("doc-1"),
            encrypted: false,
            context: serde_json::Map::new(),
            payload: DocPayload::SyncStep1 {
                sv: StateVector::Plain(vec![1, 2, 3]),
            },
        });
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn doc_update_encrypted_round_trips() {
        let record = EncryptedMessageRecord {
            message_id: EncryptedMessageId::new("abc"),
            lamport_client_id: 4,
            counter: 9,
            payload: b"ciphertext".to_vec(),
        };
        let body = MessageBody::Doc(DocMessage {
            document_id: DocumentId::new("doc-2"),
            encrypted: true,
            context: serde_json::Map::new(),
            payload: DocPayload::Update {
                update: UpdatePayload::Encrypted(record),
            },
        });
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn awareness_round_trips() {
        let body = MessageBody::Awareness(AwarenessMessage {
            document_id: DocumentId::new("doc-3"),
            update: vec![9, 9, 9],
        });
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn ack_has_no_document_id_on_the_wire() {
        let body = MessageBody::Ack(AckMessage {
            message_id: MessageId::new("some-id"),
        });
        let encoded = encode_body(&body);
        // discriminator + varstring length byte + bytes, nothing more.
        assert_eq!(encoded[0], TAG_ACK);
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn rpc_milestone_create_requires_write() {
        let rpc = RpcMessage {
            document_id: DocumentId::new("doc-4"),
            method: "milestoneCreate".into(),
            direction: RpcDirection::Request,
            original_request_id: None,
            payload: json!({ "name": "v1" }),
        };
        assert_eq!(rpc.required_permission(), Some(Permission::Write));
        let body = MessageBody::Rpc(rpc);
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn file_chunk_with_proof_round_trips() {
        let body = MessageBody::File(FileMessage {
            document_id: DocumentId::new("doc-5"),
            payload: FilePayload::Chunk {
                upload_id: UploadId::new("up-1"),
                chunk_index: 3,
                data: vec![1; 10],
                proof: Some(vec![[7u8; 32], [8u8; 32]]),
            },
        });
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn decode_assigns_a_stable_content_hash_id() {
        let body = MessageBody::Ack(AckMessage {
            message_id: MessageId::new("x"),
        });
        let encoded = encode_body(&body);
        let m1 = decode(&encoded).unwrap();
        let m2 = decode(&encoded).unwrap();
        assert_eq!(m1.id, m2.id);
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        let bytes = [0xaa];
        assert_eq!(
            decode_body(&bytes),
            Err(CodecError::UnknownDiscriminator(0xaa))
        );
    }
}
