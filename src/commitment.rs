//! The `Commitment` record (`spec.md` §3) and its `payload` structure.

use serde::{Deserialize, Serialize};

use crate::canon::CanonValue;

/// Closed set of commitment kinds. No semantics beyond filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentType {
    Agreement,
    Attestation,
    State,
    Custom,
}

impl CommitmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentType::Agreement => "agreement",
            CommitmentType::Attestation => "attestation",
            CommitmentType::State => "state",
            CommitmentType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for CommitmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agreement" => Ok(CommitmentType::Agreement),
            "attestation" => Ok(CommitmentType::Attestation),
            "state" => Ok(CommitmentType::State),
            "custom" => Ok(CommitmentType::Custom),
            other => Err(format!("unknown commitment type: {other}")),
        }
    }
}

/// The commitment's payload: required `subject`/`content`, optional
/// `counterparty`, optional arbitrary-value-tree `metadata`.
#[derive(Clone, Debug)]
pub struct Payload {
    pub subject: String,
    pub content: String,
    pub counterparty: Option<String>,
    pub metadata: Option<CanonValue>,
}

impl Payload {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
            counterparty: None,
            metadata: None,
        }
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn with_metadata(mut self, metadata: CanonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Render the payload as a nested canonical object. Optional fields
    /// absent from the struct are omitted entirely rather than written
    /// as `null`.
    pub fn to_canon(&self) -> CanonValue {
        let mut obj = CanonValue::object();
        obj.insert("subject", CanonValue::String(self.subject.clone()));
        obj.insert("content", CanonValue::String(self.content.clone()));
        if let Some(counterparty) = &self.counterparty {
            obj.insert("counterparty", CanonValue::String(counterparty.clone()));
        }
        if let Some(metadata) = &self.metadata {
            obj.insert("metadata", metadata.clone());
        }
        obj
    }
}

/// An immutable, signed, append-only commitment record.
#[derive(Clone, Debug)]
pub struct Commitment {
    pub id: String,
    pub kind: CommitmentType,
    pub payload: Payload,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    /// Hex-encoded 64-byte compact secp256k1 signature, empty before
    /// signing.
    pub signature: String,
    /// Populated exactly when the commitment has been inserted into
    /// the tree and persisted.
    pub leaf_hash: Option<String>,
    pub tree_index: Option<u64>,
}

impl Commitment {
    /// Render the canonical image with `signature` set as given. The
    /// top-level key order (`id, payload, signature, timestamp, type`)
    /// happens to be alphabetical, so the generic sorted-object
    /// canonicalizer produces the spec-mandated order without any
    /// special-casing.
    pub fn to_canon(&self, signature: &str) -> CanonValue {
        let mut obj = CanonValue::object();
        obj.insert("id", CanonValue::String(self.id.clone()));
        obj.insert("payload", self.payload.to_canon());
        obj.insert("signature", CanonValue::String(signature.to_string()));
        obj.insert("timestamp", CanonValue::Number(self.timestamp as i64));
        obj.insert("type", CanonValue::String(self.kind.as_str().to_string()));
        obj
    }

    /// The unsigned canonical image: the exact bytes signed to produce
    /// `signature`.
    pub fn unsigned_image(&self) -> Vec<u8> {
        self.to_canon("").to_canonical_string().into_bytes()
    }

    /// The signed canonical image: used to compute the leaf hash.
    pub fn signed_image(&self) -> Vec<u8> {
        self.to_canon(&self.signature).to_canonical_string().into_bytes()
    }
}

/// Request shape for `Store::commit` (`spec.md` §6): everything the
/// caller supplies before the store assigns `id`, `timestamp`,
/// `signature`, `leafHash`, and `treeIndex`.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub kind: CommitmentType,
    pub payload: Payload,
}

/// Query filters for `Store::query` (`spec.md` §4.3). AND-composed.
#[derive(Clone, Debug, Default)]
pub struct QueryFilter {
    pub kind: Option<CommitmentType>,
    pub subject_contains: Option<String>,
    pub counterparty: Option<String>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: u32,
    pub offset: u32,
}

impl QueryFilter {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new() -> Self {
        Self {
            limit: Self::MAX_LIMIT,
            ..Default::default()
        }
    }
}

/// Serializable summary used by the proof protocol and CLI (`spec.md`
/// §6). Distinct from `Commitment` mainly so JSON rendering doesn't
/// depend on `CanonValue`'s own (sorted, escaping-focused) writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitmentView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: u64,
    pub signature: String,
    #[serde(rename = "leafHash", skip_serializing_if = "Option::is_none")]
    pub leaf_hash: Option<String>,
    #[serde(rename = "treeIndex", skip_serializing_if = "Option::is_none")]
    pub tree_index: Option<u64>,
}

impl From<&Commitment> for CommitmentView {
    fn from(c: &Commitment) -> Self {
        CommitmentView {
            id: c.id.clone(),
            kind: c.kind.as_str().to_string(),
            subject: c.payload.subject.clone(),
            content: c.payload.content.clone(),
            counterparty: c.payload.counterparty.clone(),
            metadata: c.payload.metadata.as_ref().map(|m| m.to_json()),
            timestamp: c.timestamp,
            signature: c.signature.clone(),
            leaf_hash: c.leaf_hash.clone(),
            tree_index: c.tree_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Commitment {
        Commitment {
            id: "commit_aaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            kind: CommitmentType::Agreement,
            payload: Payload::new("code-review", "Review PR #42 for 100 sats")
                .with_counterparty("peerX"),
            timestamp: 1_700_000_000_000,
            signature: String::new(),
            leaf_hash: None,
            tree_index: None,
        }
    }

    #[test]
    fn unsigned_image_has_empty_signature_field() {
        let c = sample();
        let image = String::from_utf8(c.unsigned_image()).unwrap();
        assert!(image.contains(r#""signature":"""#));
    }

    #[test]
    fn key_order_is_fixed_top_level() {
        let c = sample();
        let image = String::from_utf8(c.unsigned_image()).unwrap();
        let id_pos = image.find("\"id\"").unwrap();
        let payload_pos = image.find("\"payload\"").unwrap();
        let signature_pos = image.find("\"signature\"").unwrap();
        let timestamp_pos = image.find("\"timestamp\"").unwrap();
        let type_pos = image.find("\"type\"").unwrap();
        assert!(id_pos < payload_pos);
        assert!(payload_pos < signature_pos);
        assert!(signature_pos < timestamp_pos);
        assert!(timestamp_pos < type_pos);
    }

    #[test]
    fn metadata_permutations_canonicalize_identically() {
        let mut m1 = CanonValue::object();
        m1.insert("b", CanonValue::Number(2));
        m1.insert("a", CanonValue::Number(1));

        let mut m2 = CanonValue::object();
        m2.insert("a", CanonValue::Number(1));
        m2.insert("b", CanonValue::Number(2));

        let mut c1 = sample();
        c1.payload.metadata = Some(m1);
        let mut c2 = sample();
        c2.payload.metadata = Some(m2);

        assert_eq!(c1.unsigned_image(), c2.unsigned_image());
    }
}
