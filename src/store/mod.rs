//! Durable, crash-safe storage for commitments, tree nodes, tree
//! state, anchors, and configuration (`spec.md` §4.3).

pub mod sqlite;

pub use sqlite::{AnchorRecord, SqliteStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to obtain a pooled connection: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(
        "persisted tree root {persisted} does not match the root rebuilt from {leaf_count} leaves ({rebuilt})"
    )]
    Integrity {
        persisted: String,
        rebuilt: String,
        leaf_count: u64,
    },

    #[error("malformed stored data: {0}")]
    Malformed(String),
}
