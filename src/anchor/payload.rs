//! The fixed 79-byte on-chain anchor payload (`spec.md` §4.4).

use crate::crypto::hash::Hash32;

pub const PROTOCOL_ID: &[u8; 10] = b"BSV-ANCHOR";
pub const VERSION: u8 = 0x01;
pub const PAYLOAD_LEN: usize = 79;

/// Bit-exact 79-byte payload: protocol id, version, root hash,
/// commitment count (big-endian), previous anchor txid (or all-zero).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnchorPayload {
    pub root_hash: Hash32,
    pub commitment_count: u32,
    pub previous_anchor: [u8; 32],
}

impl AnchorPayload {
    pub fn genesis(root_hash: Hash32, commitment_count: u32) -> Self {
        Self {
            root_hash,
            commitment_count,
            previous_anchor: [0u8; 32],
        }
    }

    pub fn with_previous(root_hash: Hash32, commitment_count: u32, previous_anchor_txid: Hash32) -> Self {
        Self {
            root_hash,
            commitment_count,
            previous_anchor: previous_anchor_txid,
        }
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..10].copy_from_slice(PROTOCOL_ID);
        out[10] = VERSION;
        out[11..43].copy_from_slice(&self.root_hash);
        out[43..47].copy_from_slice(&self.commitment_count.to_be_bytes());
        out[47..79].copy_from_slice(&self.previous_anchor);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn layout_matches_the_fixed_byte_offsets() {
        let root = sha256(b"root");
        let prev = sha256(b"previous-txid");
        let payload = AnchorPayload::with_previous(root, 42, prev);
        let bytes = payload.to_bytes();

        assert_eq!(bytes.len(), PAYLOAD_LEN);
        assert_eq!(&bytes[0..10], PROTOCOL_ID);
        assert_eq!(bytes[10], VERSION);
        assert_eq!(&bytes[11..43], &root[..]);
        assert_eq!(&bytes[43..47], &42u32.to_be_bytes());
        assert_eq!(&bytes[47..79], &prev[..]);
    }

    #[test]
    fn genesis_anchor_has_all_zero_previous_field() {
        let root = sha256(b"root");
        let payload = AnchorPayload::genesis(root, 1);
        let bytes = payload.to_bytes();
        assert_eq!(&bytes[47..79], &[0u8; 32]);
    }
}
