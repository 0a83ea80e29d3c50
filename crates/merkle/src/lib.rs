//! Binary Merkle tree over fixed 64 KiB leaves (§4.B).
//!
//! Leaves are `SHA-256` of the raw chunk bytes (the empty chunk is valid,
//! producing the single-leaf tree for a zero-byte file). Internal nodes are
//! `SHA-256` of the concatenated left/right child hashes; an odd node count
//! at a level duplicates the last sibling rather than promoting it, so
//! every level (other than the root) has an even logical width.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fixed chunk size files are split into before hashing (§4.B).
pub const CHUNK_SIZE: usize = 65_536;

pub type Hash = [u8; 32];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("leaf index {0} out of range")]
    IndexOutOfRange(usize),
}

/// Number of 64 KiB chunks a file of `size` bytes is split into. A
/// zero-byte file is exactly one (empty) chunk.
#[must_use]
pub fn chunk_count(size: u64) -> u64 {
    if size == 0 {
        1
    } else {
        (size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64
    }
}

fn leaf_hash(chunk: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(chunk);
    hasher.finalize().into()
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// A built Merkle tree. `levels[0]` holds the leaf hashes, `levels[last]`
/// the single root hash.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Builds a tree over `chunks` in order. An empty chunk list is treated
    /// as a single empty leaf, matching the zero-byte-file case (§3 File).
    #[must_use]
    pub fn build<T: AsRef<[u8]>>(chunks: &[T]) -> Self {
        let leaves: Vec<Hash> = if chunks.is_empty() {
            vec![leaf_hash(&[])]
        } else {
            chunks.iter().map(|c| leaf_hash(c.as_ref())).collect()
        };

        let mut levels = vec![leaves];
        while levels.last().expect("levels is never empty").len() > 1 {
            let prev = levels.last().expect("levels is never empty");
            let mut next = Vec::with_capacity((prev.len() + 1) / 2);
            let mut i = 0;
            while i < prev.len() {
                let left = prev[i];
                let right = prev.get(i + 1).copied().unwrap_or(left);
                next.push(node_hash(&left, &right));
                i += 2;
            }
            levels.push(next);
        }

        Self { levels }
    }

    #[must_use]
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .expect("a tree always has at least one leaf and thus a root")
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    #[must_use]
    pub fn leaf(&self, index: usize) -> Option<Hash> {
        self.levels[0].get(index).copied()
    }

    /// The sibling path from leaf `index` up to (but excluding) the root.
    pub fn proof(&self, index: usize) -> Result<Vec<Hash>, MerkleError> {
        if index >= self.levels[0].len() {
            return Err(MerkleError::IndexOutOfRange(index));
        }

        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut cursor = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = cursor ^ 1;
            let sibling = level.get(sibling_index).copied().unwrap_or(level[cursor]);
            proof.push(sibling);
            cursor /= 2;
        }
        Ok(proof)
    }
}

/// Recomputes a root from `leaf` at `index` following `proof` and compares
/// it to `root`. Stateless — doesn't require the full tree.
#[must_use]
pub fn verify(root: Hash, leaf: Hash, index: usize, proof: &[Hash]) -> bool {
    let mut acc = leaf;
    let mut cursor = index;
    for sibling in proof {
        acc = if cursor % 2 == 0 {
            node_hash(&acc, sibling)
        } else {
            node_hash(sibling, &acc)
        };
        cursor /= 2;
    }
    acc == root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_byte_file_is_a_single_empty_leaf() {
        let chunks: Vec<&[u8]> = vec![];
        let tree = MerkleTree::build(&chunks);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(chunk_count(0), 1);
    }

    #[test]
    fn chunk_count_matches_ceil_division() {
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(chunk_count(200_000), 4);
    }

    #[test]
    fn every_leaf_proof_round_trips_to_the_root() {
        let chunks: Vec<Vec<u8>> = (0_u8..7).map(|n| vec![n; 13]).collect();
        let tree = MerkleTree::build(&chunks);
        let root = tree.root();

        for i in 0..tree.leaf_count() {
            let leaf = tree.leaf(i).unwrap();
            let proof = tree.proof(i).unwrap();
            assert!(verify(root, leaf, i, &proof), "leaf {i} failed to verify");
        }
    }

    #[test]
    fn odd_leaf_count_duplicates_the_last_sibling() {
        let chunks = [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let tree = MerkleTree::build(&chunks);
        // level 0 has 3 leaves -> level 1 duplicates leaf 2 against itself.
        assert_eq!(tree.levels[1].len(), 2);
        let root = tree.root();
        let proof = tree.proof(2).unwrap();
        assert!(verify(root, tree.leaf(2).unwrap(), 2, &proof));
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let chunks = [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()];
        let tree = MerkleTree::build(&chunks);
        let root = tree.root();
        let proof = tree.proof(1).unwrap();
        let wrong_leaf = leaf_hash(b"not-b");
        assert!(!verify(root, wrong_leaf, 1, &proof));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let chunks = [b"a".to_vec()];
        let tree = MerkleTree::build(&chunks);
        assert_eq!(tree.proof(5), Err(MerkleError::IndexOutOfRange(5)));
    }
}
