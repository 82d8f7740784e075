//! Payload assembly, anchor-record construction, and the proof-binding
//! rule (`spec.md` §4.4) — all pure, synchronous logic. The external
//! collaborators (`Wallet`, `BlockExplorer`) are seams the core
//! depends on but does not implement beyond a `ManualWallet` stand-in
//! and a real `EsploraExplorer` client.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::anchor::payload::AnchorPayload;
use crate::crypto::hash::from_hex;
use crate::store::AnchorRecord;
use crate::tree::TreeState;

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("cannot anchor an empty tree")]
    EmptyTree,

    #[error("no commitments added since the most recent anchor")]
    NothingToAnchor,

    #[error("commitment count {0} exceeds the 32-bit payload field")]
    CommitmentCountOverflow(u64),

    #[error("invalid previous anchor txid: {0}")]
    InvalidPreviousTxid(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Explorer(#[from] ExplorerError),
}

/// Assemble the 79-byte anchor payload for the tree's current state.
/// Refuses an empty tree and refuses when nothing has been committed
/// since `last_anchor`.
pub fn build_payload(
    tree_state: TreeState,
    last_anchor: Option<&AnchorRecord>,
) -> Result<AnchorPayload, AnchorError> {
    if tree_state.leaf_count == 0 {
        return Err(AnchorError::EmptyTree);
    }
    if let Some(last) = last_anchor {
        if tree_state.leaf_count <= last.commitment_count {
            return Err(AnchorError::NothingToAnchor);
        }
    }

    let commitment_count = u32::try_from(tree_state.leaf_count)
        .map_err(|_| AnchorError::CommitmentCountOverflow(tree_state.leaf_count))?;

    match last_anchor {
        Some(last) => {
            let previous = from_hex(&last.txid)
                .map_err(|e| AnchorError::InvalidPreviousTxid(e.to_string()))?;
            Ok(AnchorPayload::with_previous(tree_state.root_hash, commitment_count, previous))
        }
        None => Ok(AnchorPayload::genesis(tree_state.root_hash, commitment_count)),
    }
}

/// Build the record to persist once a broadcast (or manual
/// `recordAnchor`) has produced a `txid`. `tree_state`/`last_anchor`
/// must be the same snapshot used for `build_payload` — the spec
/// requires `rootHash`/`commitmentCount` to reflect payload-assembly
/// time, not recording time.
pub fn next_anchor_record(
    tree_state: TreeState,
    last_anchor: Option<&AnchorRecord>,
    txid: String,
    timestamp: u64,
) -> AnchorRecord {
    AnchorRecord {
        anchor_index: last_anchor.map(|a| a.anchor_index + 1).unwrap_or(0),
        txid,
        root_hash: crate::crypto::hash::to_hex(&tree_state.root_hash),
        commitment_count: tree_state.leaf_count,
        previous_anchor: last_anchor.map(|a| a.txid.clone()),
        timestamp,
        block_height: None,
    }
}

/// The earliest anchor covering `tree_index`, i.e. the first anchor
/// (in ascending `anchorIndex` order — anchors are monotone in
/// `commitmentCount`) whose `commitmentCount > tree_index`. `None`
/// means the commitment is not yet anchored.
pub fn find_binding_anchor(anchors: &[AnchorRecord], tree_index: u64) -> Option<&AnchorRecord> {
    anchors.iter().find(|a| a.commitment_count > tree_index)
}

/// External collaborator that turns an anchor payload into a
/// broadcast, on-chain `txid`. Building, funding, and broadcasting a
/// transaction is out of scope for this core (`spec.md` §1
/// Non-goals); `ManualWallet` is the only concrete implementation
/// shipped, and it always asks the caller to supply the `txid` out of
/// band via `recordAnchor`.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// `fee_rate` is sats/byte; `None` leaves fee selection to the
    /// wallet's own defaults.
    async fn broadcast(
        &self,
        payload: &[u8; crate::anchor::payload::PAYLOAD_LEN],
        fee_rate: Option<f64>,
    ) -> Result<String, WalletError>;
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no wallet configured: {0}")]
    Unavailable(String),
}

pub struct ManualWallet;

#[async_trait]
impl Wallet for ManualWallet {
    async fn broadcast(
        &self,
        _payload: &[u8; crate::anchor::payload::PAYLOAD_LEN],
        _fee_rate: Option<f64>,
    ) -> Result<String, WalletError> {
        Err(WalletError::Unavailable(
            "broadcasting is out of scope for this core; publish the anchor payload out of band \
             and call recordAnchor(txid) to repair the local log"
                .to_string(),
        ))
    }
}

/// External collaborator that answers "is this txid confirmed, and at
/// what block height". A thin `reqwest` wrapper over a public Esplora
/// instance, not treated as the "external collaborator" the spec
/// excludes from core design — block explorers are a well-known public
/// HTTP API, not bespoke wallet logic.
#[async_trait]
pub trait BlockExplorer: Send + Sync {
    async fn confirmation_height(&self, txid: &str) -> Result<Option<u64>, ExplorerError>;
}

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response for txid {txid}: {detail}")]
    UnexpectedResponse { txid: String, detail: String },
}

#[derive(Debug, Clone)]
pub struct EsploraExplorer {
    client: reqwest::Client,
    base_url: String,
}

pub const ESPLORA_MAINNET_URL: &str = "https://blockstream.info/api";
pub const ESPLORA_TESTNET_URL: &str = "https://blockstream.info/testnet/api";

impl EsploraExplorer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(ESPLORA_MAINNET_URL)
    }

    pub fn testnet() -> Self {
        Self::new(ESPLORA_TESTNET_URL)
    }
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[async_trait]
impl BlockExplorer for EsploraExplorer {
    async fn confirmation_height(&self, txid: &str) -> Result<Option<u64>, ExplorerError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ExplorerError::UnexpectedResponse {
                txid: txid.to_string(),
                detail: format!("HTTP {}", resp.status()),
            });
        }

        let status: EsploraTxStatus = resp.json().await?;
        Ok(if status.confirmed { status.block_height } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::{sha256, to_hex};

    fn state(leaf_count: u64) -> TreeState {
        TreeState {
            root_hash: sha256(format!("root-{leaf_count}").as_bytes()),
            leaf_count,
        }
    }

    fn anchor(index: u64, count: u64, txid: &str) -> AnchorRecord {
        AnchorRecord {
            anchor_index: index,
            txid: txid.to_string(),
            root_hash: to_hex(&sha256(txid.as_bytes())),
            commitment_count: count,
            previous_anchor: None,
            timestamp: 1_700_000_000_000,
            block_height: None,
        }
    }

    #[test]
    fn building_a_payload_for_an_empty_tree_fails() {
        let err = build_payload(state(0), None).unwrap_err();
        assert!(matches!(err, AnchorError::EmptyTree));
    }

    #[test]
    fn building_a_payload_with_nothing_new_since_last_anchor_fails() {
        let last = anchor(0, 5, &"aa".repeat(32));
        let err = build_payload(state(5), Some(&last)).unwrap_err();
        assert!(matches!(err, AnchorError::NothingToAnchor));
    }

    #[test]
    fn genesis_payload_has_no_previous_anchor() {
        let payload = build_payload(state(3), None).unwrap();
        assert_eq!(payload.previous_anchor, [0u8; 32]);
        assert_eq!(payload.commitment_count, 3);
    }

    #[test]
    fn binding_rule_finds_the_first_anchor_covering_the_tree_index() {
        let anchors = vec![anchor(0, 2, "tx0"), anchor(1, 5, "tx1"), anchor(2, 9, "tx2")];
        assert_eq!(find_binding_anchor(&anchors, 0).unwrap().txid, "tx0");
        assert_eq!(find_binding_anchor(&anchors, 1).unwrap().txid, "tx0");
        assert_eq!(find_binding_anchor(&anchors, 4).unwrap().txid, "tx1");
        assert_eq!(find_binding_anchor(&anchors, 5).unwrap().txid, "tx2");
        assert!(find_binding_anchor(&anchors, 9).is_none());
    }

    #[test]
    fn next_anchor_record_chains_previous_txid_and_index() {
        let last = anchor(0, 5, "tx0");
        let record = next_anchor_record(state(8), Some(&last), "tx1".to_string(), 1_700_000_001_000);
        assert_eq!(record.anchor_index, 1);
        assert_eq!(record.previous_anchor, Some("tx0".to_string()));
        assert_eq!(record.commitment_count, 8);
    }

    #[tokio::test]
    async fn manual_wallet_always_refuses_to_broadcast() {
        let wallet = ManualWallet;
        let payload = [0u8; crate::anchor::payload::PAYLOAD_LEN];
        assert!(wallet.broadcast(&payload, None).await.is_err());
    }
}
