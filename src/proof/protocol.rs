//! The five tagged proof-protocol message kinds (`spec.md` §6). The
//! transport that carries these bytes between peers is out of scope;
//! this module only defines the message shapes and their validation.

use serde::{Deserialize, Serialize};

use crate::commitment::CommitmentView;
use crate::crypto::hash::{to_hex, Hash32};
use crate::tree::{ProofStep, Side};

/// Hex-friendly mirror of `ProofStep`, since the wire format has no
/// notion of a raw `[u8; 32]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofStepView {
    pub hash: String,
    pub position: String,
}

impl From<&ProofStep> for ProofStepView {
    fn from(step: &ProofStep) -> Self {
        ProofStepView {
            hash: to_hex(&step.hash),
            position: match step.side {
                Side::Left => "left".to_string(),
                Side::Right => "right".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorReference {
    pub txid: String,
    #[serde(rename = "blockHeight", skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub timestamp: u64,
}

/// A proof file: the commitment (embedded verbatim), its inclusion
/// proof, and a minimal reference to the binding anchor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proof {
    pub commitment: CommitmentView,
    #[serde(rename = "leafIndex")]
    pub leaf_index: u64,
    pub siblings: Vec<ProofStepView>,
    #[serde(rename = "rootHash")]
    pub root_hash: String,
    pub anchor: AnchorReference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofErrorCode {
    NotFound,
    NotAnchored,
    InvalidRequest,
    Unauthorized,
    RateLimited,
    InternalError,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProofRequestOptions {
    #[serde(rename = "requireAnchored", default)]
    pub require_anchored: bool,
    #[serde(rename = "minConfirmations", skip_serializing_if = "Option::is_none")]
    pub min_confirmations: Option<u64>,
    #[serde(rename = "includePublicKey", default)]
    pub include_public_key: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofQuery {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "subjectContains", skip_serializing_if = "Option::is_none")]
    pub subject_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "commitmentId", skip_serializing_if = "Option::is_none")]
    pub commitment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<ProofQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ProofRequestOptions>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub proofs: Vec<Proof>,
    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProofErrorCode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofPush {
    #[serde(rename = "pushId")]
    pub push_id: String,
    pub proof: Proof,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofAck {
    #[serde(rename = "pushId")]
    pub push_id: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProofErrorCode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofErrorMessage {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "pushId", skip_serializing_if = "Option::is_none")]
    pub push_id: Option<String>,
    pub code: ProofErrorCode,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProofMessage {
    #[serde(rename = "PROOF_REQUEST")]
    Request(ProofRequest),
    #[serde(rename = "PROOF_RESPONSE")]
    Response(ProofResponse),
    #[serde(rename = "PROOF_PUSH")]
    Push(ProofPush),
    #[serde(rename = "PROOF_ACK")]
    Ack(ProofAck),
    #[serde(rename = "PROOF_ERROR")]
    Error(ProofErrorMessage),
}

/// Guarantee proofs are only ever embedded with real 32-byte hashes —
/// kept separate from `Proof` itself so callers that already hold a
/// `Hash32` don't have to round-trip through hex.
pub fn root_hash_hex(root: &Hash32) -> String {
    to_hex(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json_with_the_tagged_type_field() {
        let request = ProofMessage::Request(ProofRequest {
            request_id: "req-1".to_string(),
            commitment_id: Some("commit_abc".to_string()),
            query: None,
            options: None,
        });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""type":"PROOF_REQUEST""#));

        let decoded: ProofMessage = serde_json::from_str(&json).unwrap();
        match decoded {
            ProofMessage::Request(r) => assert_eq!(r.request_id, "req-1"),
            _ => panic!("expected a request variant"),
        }
    }

    #[test]
    fn error_codes_serialize_as_screaming_snake_case() {
        let code = ProofErrorCode::NotAnchored;
        assert_eq!(serde_json::to_string(&code).unwrap(), r#""NOT_ANCHORED""#);
    }
}
