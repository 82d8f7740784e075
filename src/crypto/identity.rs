//! The store's identity key: a persistent secp256k1 private key used to
//! sign every commitment, held in the data directory with owner-only
//! file permissions.
//!
//! Modelled as a per-store resource with explicit load/create, not a
//! process-wide singleton (`spec.md` §9 design note).

use std::fs;
use std::path::{Path, PathBuf};

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::{double_sha256, Hash32};

pub const KEY_FILE_NAME: &str = "identity.key.json";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity key file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write identity key file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identity key file is malformed: {0}")]
    Malformed(String),

    #[error("invalid secp256k1 key material: {0}")]
    InvalidKey(#[from] secp256k1::Error),
}

/// On-disk representation of the identity key file (`spec.md` §6).
#[derive(Debug, Serialize, Deserialize)]
struct IdentityKeyFile {
    #[serde(rename = "privateKey")]
    private_key: String,
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(rename = "createdAt")]
    created_at: u64,
    #[serde(rename = "keyType")]
    key_type: String,
}

/// A store's signing identity: a secp256k1 keypair plus the shared
/// verification context.
pub struct Identity {
    secp: Secp256k1<secp256k1::All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Identity {
    /// Load the identity key from `dir`, creating a fresh one if none
    /// exists yet.
    pub fn load_or_create(dir: &Path) -> Result<Self, IdentityError> {
        let path = dir.join(KEY_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            let identity = Self::generate();
            identity.save(&path)?;
            Ok(identity)
        }
    }

    pub(crate) fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = rand::rngs::OsRng;
        let (secret_key, public_key) = secp.generate_keypair(&mut rng);
        Self {
            secp,
            secret_key,
            public_key,
        }
    }

    fn load(path: &Path) -> Result<Self, IdentityError> {
        let contents = fs::read_to_string(path).map_err(|source| IdentityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IdentityKeyFile = serde_json::from_str(&contents)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;

        if file.key_type != "secp256k1" {
            return Err(IdentityError::Malformed(format!(
                "unsupported keyType: {}",
                file.key_type
            )));
        }

        let secret_bytes = hex::decode(&file.private_key)
            .map_err(|e| IdentityError::Malformed(format!("privateKey: {e}")))?;
        let secret_key = SecretKey::from_slice(&secret_bytes)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secp,
            secret_key,
            public_key,
        })
    }

    fn save(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| IdentityError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = IdentityKeyFile {
            private_key: hex::encode(self.secret_key.secret_bytes()),
            public_key: hex::encode(self.public_key.serialize()),
            created_at: crate::util::now_millis(),
            key_type: "secp256k1".to_string(),
        };
        let contents =
            serde_json::to_string_pretty(&file).map_err(|e| IdentityError::Malformed(e.to_string()))?;

        fs::write(path, contents).map_err(|source| IdentityError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        restrict_permissions(path).map_err(|source| IdentityError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }

    /// Hex-encoded compressed public key, exposed unchanged for
    /// third-party verification.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Sign `message_bytes` (the unsigned canonical image) using
    /// double-SHA-256 message hashing, compatible with standard
    /// Bitcoin-family signing. Returns the 64-byte compact signature.
    pub fn sign(&self, message_bytes: &[u8]) -> [u8; 64] {
        let digest = double_sha256(message_bytes);
        let message = Message::from_digest(digest);
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        signature.serialize_compact()
    }
}

/// Verify a compact signature over `message_bytes` under `public_key`.
pub fn verify(public_key: &PublicKey, message_bytes: &[u8], signature: &[u8]) -> bool {
    let secp = Secp256k1::verification_only();
    let digest: Hash32 = double_sha256(message_bytes);
    let message = Message::from_digest(digest);

    let Ok(sig) = ecdsa::Signature::from_compact(signature) else {
        return false;
    };
    secp.verify_ecdsa(&message, &sig, public_key).is_ok()
}

pub fn public_key_from_hex(hex_str: &str) -> Result<PublicKey, IdentityError> {
    let bytes = hex::decode(hex_str).map_err(|e| IdentityError::Malformed(e.to_string()))?;
    Ok(PublicKey::from_slice(&bytes)?)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
