//! Append-only authenticated Merkle tree (`spec.md` §4.2): append,
//! inclusion proofs, and stateless proof verification.

pub mod merkle;
pub mod node;

pub use merkle::{InclusionProof, MerkleTree, ProofStep, Side, TreeError, TreeState};
pub use node::TreeNode;
