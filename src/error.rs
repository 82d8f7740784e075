//! Crate-wide error taxonomy.
//!
//! Each component owns its own error enum; [`CoreError`] composes them so
//! that the local API surface (`Store`) can return a single error type
//! while individual modules stay decoupled from each other's failure
//! modes.

use thiserror::Error;

use crate::anchor::AnchorError;
use crate::canon::CanonError;
use crate::proof::ProofError;
use crate::store::StoreError;
use crate::tree::TreeError;

/// Root error type for the commitment-memory core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("canonicalization error: {0}")]
    Canon(#[from] CanonError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("anchor error: {0}")]
    Anchor(#[from] AnchorError),

    #[error("proof error: {0}")]
    Proof(#[from] ProofError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
