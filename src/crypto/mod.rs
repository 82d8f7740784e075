//! Cryptographic primitives: domain-separated hashing and the
//! per-store secp256k1 identity used to sign commitments.

pub mod hash;
pub mod identity;

pub use hash::{double_sha256, internal_hash, leaf_hash, sha256, Hash32};
pub use identity::{Identity, IdentityError};
