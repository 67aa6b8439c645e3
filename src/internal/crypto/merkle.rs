//! Merkle tree over a commit's `(path, blob_hash)` leaves.
//!
//! Leaves are sorted by path; a leaf hashes as
//! `SHA-256(path ‖ 0x00 ‖ blob_hash)`, internal nodes as the SHA-256 of the
//! concatenated child hashes, and an odd node duplicates the last entry of
//! its level. A proof is the sibling path from leaf to root with a side bit
//! per level; these are set-membership proofs only — they leak the leaf
//! count through the path length.

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;

/// Which side the sibling sits on at one proof level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Sibling path enabling single-leaf verification against the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: ObjectHash,
    pub siblings: Vec<(ObjectHash, Side)>,
}

impl MerkleProof {
    /// Rebuild the root from the leaf and sibling path, compare to `root`.
    pub fn verify(&self, root: ObjectHash) -> bool {
        let mut node = self.leaf;
        for (sibling, side) in &self.siblings {
            node = match side {
                Side::Left => pair_hash(*sibling, node),
                Side::Right => pair_hash(node, *sibling),
            };
        }
        node == root
    }
}

/// Hash of one `(path, blob_hash)` leaf.
pub fn leaf_hash(path: &str, blob_hash: ObjectHash) -> ObjectHash {
    let mut data = Vec::with_capacity(path.len() + 1 + 32);
    data.extend_from_slice(path.as_bytes());
    data.push(0x00);
    data.extend_from_slice(blob_hash.as_ref());
    ObjectHash::new(&data)
}

fn pair_hash(left: ObjectHash, right: ObjectHash) -> ObjectHash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_ref());
    data.extend_from_slice(right.as_ref());
    ObjectHash::new(&data)
}

/// Balanced binary hash tree retaining every level, leaves first.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    paths: Vec<String>,
    levels: Vec<Vec<ObjectHash>>,
}

impl MerkleTree {
    /// Build from `(path, blob_hash)` pairs; pairs are sorted by path here,
    /// so callers may pass them in any order.
    pub fn build(pairs: &[(String, ObjectHash)]) -> MerkleTree {
        let mut sorted: Vec<(String, ObjectHash)> = pairs.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let paths: Vec<String> = sorted.iter().map(|(path, _)| path.clone()).collect();
        let leaves: Vec<ObjectHash> = sorted
            .iter()
            .map(|(path, hash)| leaf_hash(path, *hash))
            .collect();

        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(pair_hash(left, right));
            }
            levels.push(next);
        }
        MerkleTree { paths, levels }
    }

    /// Top hash; the zero sentinel for an empty tree.
    pub fn root(&self) -> ObjectHash {
        match self.levels.last() {
            Some(level) if !level.is_empty() => level[0],
            _ => ObjectHash::zero(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Proof for the leaf at `path`, if present.
    pub fn prove(&self, path: &str) -> Option<MerkleProof> {
        let mut index = self.paths.iter().position(|p| p == path)?;
        let leaf = self.levels[0][index];
        let mut siblings = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_index, side) = if index % 2 == 0 {
                (index + 1, Side::Right)
            } else {
                (index - 1, Side::Left)
            };
            // Odd tail duplicates itself as its own sibling.
            let sibling = level
                .get(sibling_index)
                .copied()
                .unwrap_or(level[index]);
            siblings.push((sibling, side));
            index /= 2;
        }
        Some(MerkleProof { leaf, siblings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(n: usize) -> Vec<(String, ObjectHash)> {
        (0..n)
            .map(|i| {
                (
                    format!("semantic/fact-{i}.md"),
                    ObjectHash::new(format!("payload {i}").as_bytes()),
                )
            })
            .collect()
    }

    /// The root is independent of input order.
    #[test]
    fn test_root_order_independent(){
        let forward = pairs(5);
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(
            MerkleTree::build(&forward).root(),
            MerkleTree::build(&backward).root()
        );
    }

    /// Every leaf proves against the root, for even and odd leaf counts.
    #[test]
    fn test_proofs_verify() {
        for n in [1usize, 2, 3, 4, 5, 8, 13] {
            let pairs = pairs(n);
            let tree = MerkleTree::build(&pairs);
            assert_eq!(tree.leaf_count(), n);
            for (path, _) in &pairs {
                let proof = tree.prove(path).unwrap();
                assert!(proof.verify(tree.root()), "n={n} path={path}");
            }
        }
    }

    /// Flipping any bit of the leaf, a sibling, or the root breaks the proof.
    #[test]
    fn test_proof_soundness() {
        let pairs = pairs(6);
        let tree = MerkleTree::build(&pairs);
        let root = tree.root();
        let proof = tree.prove("semantic/fact-3.md").unwrap();

        let mut bad_leaf = proof.clone();
        bad_leaf.leaf.0[0] ^= 0x01;
        assert!(!bad_leaf.verify(root));

        let mut bad_sibling = proof.clone();
        bad_sibling.siblings[0].0.0[31] ^= 0x80;
        assert!(!bad_sibling.verify(root));

        let mut bad_root = root;
        bad_root.0[16] ^= 0x10;
        assert!(!proof.verify(bad_root));
    }

    /// A changed blob hash changes the root.
    #[test]
    fn test_root_tracks_content() {
        let a = pairs(4);
        let mut b = a.clone();
        b[2].1 = ObjectHash::new(b"tampered");
        assert_ne!(MerkleTree::build(&a).root(), MerkleTree::build(&b).root());
    }

    /// Unknown paths yield no proof; the empty tree has the zero root.
    #[test]
    fn test_edges() {
        let tree = MerkleTree::build(&pairs(3));
        assert!(tree.prove("episodic/absent.md").is_none());
        assert!(MerkleTree::build(&[]).root().is_zero());
    }
}
