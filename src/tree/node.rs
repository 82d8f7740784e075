//! A single `(level, index) -> hash` triple, the unit the persistent
//! store keeps one row per.

use crate::crypto::hash::Hash32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeNode {
    pub level: u32,
    pub index: u64,
    pub hash: Hash32,
}

impl TreeNode {
    pub fn new(level: u32, index: u64, hash: Hash32) -> Self {
        Self { level, index, hash }
    }
}
