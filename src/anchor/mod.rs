//! On-chain anchor payload assembly, anchor recording, and the
//! proof-binding rule (`spec.md` §4.4).

pub mod engine;
pub mod payload;

pub use engine::{
    build_payload, find_binding_anchor, next_anchor_record, AnchorError, BlockExplorer, EsploraExplorer,
    ManualWallet, Wallet, WalletError,
};
pub use payload::{AnchorPayload, PAYLOAD_LEN};
