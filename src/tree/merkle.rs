//! The append-only Merkle tree itself: in-memory node table, append,
//! inclusion-proof generation, and stateless proof verification
//! (`spec.md` §4.2).

use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::hash::{internal_hash, Hash32};
use crate::tree::node::TreeNode;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("leaf index {index} out of range for a tree with {leaf_count} leaves")]
    LeafIndexOutOfRange { index: u64, leaf_count: u64 },
}

/// Which side of the fold a proof step's hash sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofStep {
    pub hash: Hash32,
    pub side: Side,
}

/// A compact inclusion proof: fold `leaf_hash` through `steps` and
/// compare against `root_hash`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionProof {
    pub leaf_index: u64,
    pub leaf_hash: Hash32,
    pub steps: Vec<ProofStep>,
    pub root_hash: Hash32,
}

/// Verify a proof without any tree state: fold left-to-right, accept
/// iff the final accumulator equals `root_hash`.
pub fn verify_proof(leaf_hash: &Hash32, steps: &[ProofStep], root_hash: &Hash32) -> bool {
    let mut acc = *leaf_hash;
    for step in steps {
        acc = match step.side {
            Side::Left => internal_hash(&step.hash, &acc),
            Side::Right => internal_hash(&acc, &step.hash),
        };
    }
    acc == *root_hash
}

/// Snapshot of the tree's persisted summary fields (`spec.md` §4.3
/// `tree_state`), minus the anchor bookkeeping the store layers on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeState {
    pub root_hash: Hash32,
    pub leaf_count: u64,
}

/// The live, in-memory tree. `(level, index) -> hash` is the whole of
/// its state; everything else (height, root) is derived from
/// `leaf_count`.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    nodes: HashMap<(u32, u64), Hash32>,
    leaf_count: u64,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from a flat node list plus the leaf count, as
    /// loaded straight from the `tree_nodes`/`tree_state` tables.
    pub fn from_nodes(nodes: Vec<TreeNode>, leaf_count: u64) -> Self {
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            map.insert((node.level, node.index), node.hash);
        }
        Self { nodes: map, leaf_count }
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// `ceil(log2(max(leaf_count, 1)))`.
    pub fn height(&self) -> u32 {
        Self::height_for(self.leaf_count)
    }

    fn height_for(leaf_count: u64) -> u32 {
        if leaf_count <= 1 {
            return 0;
        }
        let mut height = 0u32;
        let mut capacity = 1u64;
        while capacity < leaf_count {
            capacity <<= 1;
            height += 1;
        }
        height
    }

    /// The root hash, i.e. the node at `(height, 0)`. For a single-leaf
    /// tree this is the leaf hash itself; for an empty tree there is no
    /// meaningful root and callers must not ask.
    pub fn root_hash(&self) -> Hash32 {
        assert!(self.leaf_count > 0, "an empty tree has no root hash");
        let height = self.height();
        *self
            .nodes
            .get(&(height, 0))
            .expect("root node missing for a populated tree")
    }

    pub fn state(&self) -> TreeState {
        TreeState {
            root_hash: self.root_hash(),
            leaf_count: self.leaf_count,
        }
    }

    /// Append `leaf` as the next leaf hash. Returns every node written
    /// or overwritten by the update, bottom-up, for the caller to
    /// persist within a single transaction.
    pub fn append(&mut self, leaf: Hash32) -> Vec<TreeNode> {
        let index = self.leaf_count;
        self.leaf_count += 1;

        let mut written = Vec::new();
        self.nodes.insert((0, index), leaf);
        written.push(TreeNode::new(0, index, leaf));

        let height = self.height();
        let mut level = 0u32;
        let mut idx = index;
        while level < height {
            let parent_index = idx / 2;
            let left_index = parent_index * 2;
            let right_index = left_index + 1;

            let left = *self
                .nodes
                .get(&(level, left_index))
                .expect("left child of the updated path always exists");
            let right = match self.nodes.get(&(level, right_index)) {
                Some(hash) => *hash,
                // Rightmost-path rule: the missing right child is a
                // copy of the left hash.
                None => left,
            };

            let parent = internal_hash(&left, &right);
            self.nodes.insert((level + 1, parent_index), parent);
            written.push(TreeNode::new(level + 1, parent_index, parent));

            level += 1;
            idx = parent_index;
        }

        written
    }

    /// Build an inclusion proof for `leaf_index` against the tree's
    /// current state.
    pub fn prove(&self, leaf_index: u64) -> Result<InclusionProof, TreeError> {
        if leaf_index >= self.leaf_count {
            return Err(TreeError::LeafIndexOutOfRange {
                index: leaf_index,
                leaf_count: self.leaf_count,
            });
        }

        let leaf_hash = *self
            .nodes
            .get(&(0, leaf_index))
            .expect("leaf must exist for an in-range index");

        let height = self.height();
        let mut steps = Vec::with_capacity(height as usize);
        let mut idx = leaf_index;

        for level in 0..height {
            let current = *self
                .nodes
                .get(&(level, idx))
                .expect("node on the proof path must exist");
            let sibling_index = idx ^ 1;
            let (hash, side) = match self.nodes.get(&(level, sibling_index)) {
                Some(sibling) if sibling_index > idx => (*sibling, Side::Right),
                Some(sibling) => (*sibling, Side::Left),
                None => (current, Side::Right),
            };
            steps.push(ProofStep { hash, side });
            idx /= 2;
        }

        Ok(InclusionProof {
            leaf_index,
            leaf_hash,
            steps,
            root_hash: self.root_hash(),
        })
    }
}
