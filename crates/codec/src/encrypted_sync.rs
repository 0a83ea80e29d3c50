//! The three framed shapes of §4.A's encrypted-sync sub-codec, each
//! prefixed by a `version` varint (currently always 0). Plaintext
//! documents never touch this module — their sync payloads are opaque
//! bytes owned by the host's CRDT library.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use teleportal_primitives::{EncryptedMessageId, EncryptedMessageRecord, EncryptedStateVector};

use crate::bytes::{Reader, Writer};
use crate::error::CodecError;

const CURRENT_VERSION: u64 = 0;

fn check_version(reader: &mut Reader<'_>) -> Result<(), CodecError> {
    let version = reader.read_varint()?;
    if version != CURRENT_VERSION {
        return Err(CodecError::UnknownSubCodecVersion(version));
    }
    Ok(())
}

fn message_id_bytes(id: &EncryptedMessageId) -> Vec<u8> {
    BASE64
        .decode(id.as_str())
        .unwrap_or_else(|_| id.as_str().as_bytes().to_vec())
}

fn message_id_from_bytes(bytes: &[u8]) -> EncryptedMessageId {
    EncryptedMessageId::new(BASE64.encode(bytes))
}

/// *State vector*: `length` then `length` pairs of varint `(clientId, counter)`.
#[must_use]
pub fn encode_state_vector(sv: &EncryptedStateVector) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint(CURRENT_VERSION);
    w.write_varint(sv.len() as u64);
    for (&client_id, &counter) in sv {
        w.write_varint(u64::from(client_id));
        w.write_varint(u64::from(counter));
    }
    w.into_bytes()
}

pub fn decode_state_vector(bytes: &[u8]) -> Result<EncryptedStateVector, CodecError> {
    let mut r = Reader::new(bytes);
    check_version(&mut r)?;
    let len = r.read_varint()?;
    let mut sv = EncryptedStateVector::new();
    for _ in 0..len {
        let client_id = u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        let counter = u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        sv.insert(client_id, counter);
    }
    r.finish()?;
    Ok(sv)
}

/// *Update list*: `length` then `length` records
/// `(messageId-bytes varlen, clientId varint, counter varint, payload varlen)`.
#[must_use]
pub fn encode_update_list(records: &[EncryptedMessageRecord]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint(CURRENT_VERSION);
    w.write_varint(records.len() as u64);
    for record in records {
        w.write_varlen_bytes(&message_id_bytes(&record.message_id));
        w.write_varint(u64::from(record.lamport_client_id));
        w.write_varint(u64::from(record.counter));
        w.write_varlen_bytes(&record.payload);
    }
    w.into_bytes()
}

pub fn decode_update_list(bytes: &[u8]) -> Result<Vec<EncryptedMessageRecord>, CodecError> {
    let mut r = Reader::new(bytes);
    check_version(&mut r)?;
    let len = r.read_varint()?;
    let mut records = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    for _ in 0..len {
        let message_id = message_id_from_bytes(r.read_varlen_bytes()?);
        let lamport_client_id =
            u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        let counter = u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        let payload = r.read_varlen_bytes()?.to_vec();
        records.push(EncryptedMessageRecord {
            message_id,
            lamport_client_id,
            counter,
            payload,
        });
    }
    r.finish()?;
    Ok(records)
}

/// *Sync step 2*: a deduplicated `clientId` table (sequence index ->
/// clientId) followed by messages that reference the table by index
/// instead of repeating the full clientId.
#[must_use]
pub fn encode_sync_step2(records: &[EncryptedMessageRecord]) -> Vec<u8> {
    let mut table: Vec<u32> = Vec::new();
    let mut index_of = |client_id: u32, table: &mut Vec<u32>| -> usize {
        if let Some(pos) = table.iter().position(|&c| c == client_id) {
            pos
        } else {
            table.push(client_id);
            table.len() - 1
        }
    };

    let mut indices = Vec::with_capacity(records.len());
    for record in records {
        indices.push(index_of(record.lamport_client_id, &mut table));
    }

    let mut w = Writer::new();
    w.write_varint(CURRENT_VERSION);
    w.write_varint(table.len() as u64);
    for client_id in &table {
        w.write_varint(u64::from(*client_id));
    }
    w.write_varint(records.len() as u64);
    for (record, table_index) in records.iter().zip(indices) {
        w.write_varint(table_index as u64);
        w.write_varint(u64::from(record.counter));
        w.write_varlen_bytes(&message_id_bytes(&record.message_id));
        w.write_varlen_bytes(&record.payload);
    }
    w.into_bytes()
}

pub fn decode_sync_step2(bytes: &[u8]) -> Result<Vec<EncryptedMessageRecord>, CodecError> {
    let mut r = Reader::new(bytes);
    check_version(&mut r)?;

    let table_len = r.read_varint()?;
    let mut table = Vec::with_capacity(usize::try_from(table_len).unwrap_or(0));
    for _ in 0..table_len {
        table.push(u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?);
    }

    let message_count = r.read_varint()?;
    let mut records = Vec::with_capacity(usize::try_from(message_count).unwrap_or(0));
    for _ in 0..message_count {
        let table_index = usize::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        let lamport_client_id = *table
            .get(table_index)
            .ok_or(CodecError::TableIndexOutOfRange(table_index, table.len()))?;
        let counter = u32::try_from(r.read_varint()?).map_err(|_| CodecError::VarintTooLarge)?;
        let message_id = message_id_from_bytes(r.read_varlen_bytes()?);
        let payload = r.read_varlen_bytes()?.to_vec();
        records.push(EncryptedMessageRecord {
            message_id,
            lamport_client_id,
            counter,
            payload,
        });
    }
    r.finish()?;
    Ok(records)
}
