//! The CRDT library is an external collaborator (§1 Out of scope): this
//! crate only needs a narrow seam to diff a snapshot against a peer's
//! state vector and to merge an incoming update. [`LogEngine`] is a
//! reference implementation good enough to exercise the storage and
//! session layers in tests; it is not a real CRDT.

use teleportal_codec::bytes::{Reader, Writer};

/// Diffs and merges opaque plaintext CRDT bytes. A real deployment plugs
/// in whatever CRDT library produced the update stream; this crate never
/// interprets the bytes itself.
pub trait CrdtEngine: Send + Sync {
    /// Given the stored `snapshot` and a peer's `state_vector`, returns
    /// `(update, own_state_vector)`: the diff the peer is missing, and
    /// this side's own vector to send back.
    fn diff(&self, snapshot: &[u8], state_vector: &[u8]) -> (Vec<u8>, Vec<u8>);

    /// Applies `update` to `snapshot`, returning the new snapshot.
    fn merge(&self, snapshot: &[u8], update: &[u8]) -> Vec<u8>;
}

/// Treats the snapshot as a length-prefixed log of every update ever
/// applied, and the state vector as a single varint byte-offset into that
/// log. Diffing returns everything past the peer's offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEngine;

impl CrdtEngine for LogEngine {
    fn diff(&self, snapshot: &[u8], state_vector: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let offset = decode_offset(state_vector);
        let tail = snapshot.get(offset..).unwrap_or(&[]);

        let mut own_sv = Writer::new();
        own_sv.write_varint(snapshot.len() as u64);

        (tail.to_vec(), own_sv.into_bytes())
    }

    fn merge(&self, snapshot: &[u8], update: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(snapshot);
        w.write_varlen_bytes(update);
        w.into_bytes()
    }
}

fn decode_offset(state_vector: &[u8]) -> usize {
    let mut r = Reader::new(state_vector);
    r.read_varint().ok().and_then(|v| usize::try_from(v).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_diffs_to_nothing() {
        let engine = LogEngine;
        let (update, sv) = engine.diff(&[], &[]);
        assert!(update.is_empty());
        assert_eq!(sv, {
            let mut w = Writer::new();
            w.write_varint(0);
            w.into_bytes()
        });
    }

    #[test]
    fn merge_then_diff_round_trips_the_tail() {
        let engine = LogEngine;
        let snapshot = engine.merge(&[], b"first-update");
        let (update, _sv) = engine.diff(&snapshot, &[]);
        // diff against an empty peer vector returns the whole log,
        // length-prefixed.
        assert!(update.ends_with(b"first-update"));
    }
}
