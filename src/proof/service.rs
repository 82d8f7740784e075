//! Per-peer rate limiting and request handling for the proof protocol
//! (`spec.md` §5–§6). The sliding-window + burst-token limiter is
//! ported from the teacher's API middleware rate limiter.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::commitment::QueryFilter;
use crate::proof::protocol::{
    Proof, ProofErrorCode, ProofErrorMessage, ProofMessage, ProofQuery, ProofRequest,
    ProofRequestOptions, ProofResponse,
};

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("commitment not found")]
    NotFound,

    #[error("commitment is not anchored")]
    NotAnchored,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProofError {
    pub fn code(&self) -> ProofErrorCode {
        match self {
            ProofError::NotFound => ProofErrorCode::NotFound,
            ProofError::NotAnchored => ProofErrorCode::NotAnchored,
            ProofError::InvalidRequest(_) => ProofErrorCode::InvalidRequest,
            ProofError::Internal(_) => ProofErrorCode::InternalError,
        }
    }
}

/// Rate limiter configuration: requests per rolling window, plus a
/// small burst allowance for momentary spikes.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            burst: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    burst_tokens: u32,
}

/// In-memory, per-peer sliding-window rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `Ok(())` if `peer_id` is within its quota (and consumes one
    /// unit of it); `Err` once the window and burst allowance are both
    /// exhausted.
    pub async fn check(&self, peer_id: &str) -> Result<(), RateLimitExceeded> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let entry = entries.entry(peer_id.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
            burst_tokens: self.config.burst,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
            entry.burst_tokens = self.config.burst;
        }

        if entry.count < self.config.max_requests {
            entry.count += 1;
            Ok(())
        } else if entry.burst_tokens > 0 {
            entry.burst_tokens -= 1;
            entry.count += 1;
            Ok(())
        } else {
            let elapsed = now.duration_since(entry.window_start).as_secs();
            Err(RateLimitExceeded {
                retry_after_secs: self.config.window.as_secs().saturating_sub(elapsed),
            })
        }
    }

    pub async fn evict_stale(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let expiry = self.config.window * 2;
        entries.retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

/// Validate a request's shape against `spec.md` §6: it must name a
/// commitment or carry a query, and a query's `limit` must be ≤ 100.
pub fn validate_request(request: &ProofRequest) -> Result<(), ProofError> {
    if request.commitment_id.is_none() && request.query.is_none() {
        return Err(ProofError::InvalidRequest(
            "request must specify commitmentId or query".to_string(),
        ));
    }
    if let Some(query) = &request.query {
        if query.limit > QueryFilter::MAX_LIMIT {
            return Err(ProofError::InvalidRequest(format!(
                "query.limit {} exceeds the maximum of {}",
                query.limit,
                QueryFilter::MAX_LIMIT
            )));
        }
    }
    Ok(())
}

pub fn proof_query_to_filter(query: &ProofQuery) -> Result<QueryFilter, ProofError> {
    let kind = match &query.kind {
        Some(k) => Some(k.parse().map_err(ProofError::InvalidRequest)?),
        None => None,
    };
    Ok(QueryFilter {
        kind,
        subject_contains: query.subject_contains.clone(),
        counterparty: query.counterparty.clone(),
        since: query.since,
        until: query.until,
        limit: query.limit.min(QueryFilter::MAX_LIMIT),
        offset: query.offset,
    })
}

/// Wraps rate limiting around dispatch to the core. `lookup` is the
/// caller-supplied bridge into `Store` so this module never depends on
/// `Store` directly.
pub struct ProofService {
    rate_limiter: RateLimiter,
}

impl ProofService {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config),
        }
    }

    pub async fn handle_request<F, Fut>(&self, peer_id: &str, request: ProofRequest, lookup: F) -> ProofMessage
    where
        F: FnOnce(ProofRequest) -> Fut,
        Fut: Future<Output = Result<ProofResponse, ProofError>>,
    {
        if self.rate_limiter.check(peer_id).await.is_err() {
            return error_message(Some(request.request_id.clone()), None, ProofErrorCode::RateLimited, "rate limit exceeded");
        }

        if let Err(e) = validate_request(&request) {
            return error_message(Some(request.request_id.clone()), None, e.code(), &e.to_string());
        }

        match lookup(request.clone()).await {
            Ok(mut response) => {
                if let Some(options) = &request.options {
                    response.proofs.retain(|p| meets_request_options(p, options));
                    response.total = response.proofs.len() as u64;
                    if request.commitment_id.is_some() && response.proofs.is_empty() {
                        return error_message(
                            Some(request.request_id),
                            None,
                            ProofErrorCode::NotAnchored,
                            "commitment is not confirmed to the required depth",
                        );
                    }
                }
                ProofMessage::Response(response)
            }
            Err(e) => error_message(Some(request.request_id), None, e.code(), &e.to_string()),
        }
    }
}

/// A query-backed `lookup` may surface a not-yet-anchored match as a
/// `Proof` whose `anchor.txid` is empty — `Proof` has no dedicated slot
/// for "no anchor yet" since a single-commitment lookup never produces
/// one otherwise (`Store::prove` returns `None` until a binding anchor
/// exists). `requireAnchored` suppresses exactly those sentinel entries.
fn is_anchored(proof: &Proof) -> bool {
    !proof.anchor.txid.is_empty()
}

/// `spec.md` §9 places the `minConfirmations` threshold check at the
/// proof-service boundary, not in the core. This core's `BlockExplorer`
/// only answers "what block was this txid confirmed in", not "what is
/// the chain tip" — so a recorded block height is treated as meeting
/// any positive threshold rather than computing an exact depth.
fn meets_confirmation_requirement(proof: &Proof, options: &ProofRequestOptions) -> bool {
    match options.min_confirmations {
        Some(min) if min > 0 => proof.anchor.block_height.is_some(),
        _ => true,
    }
}

fn meets_request_options(proof: &Proof, options: &ProofRequestOptions) -> bool {
    if options.require_anchored && !is_anchored(proof) {
        return false;
    }
    meets_confirmation_requirement(proof, options)
}

fn error_message(
    request_id: Option<String>,
    push_id: Option<String>,
    code: ProofErrorCode,
    message: &str,
) -> ProofMessage {
    ProofMessage::Error(ProofErrorMessage {
        request_id,
        push_id,
        code,
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(commitment_id: Option<&str>, query: Option<ProofQuery>) -> ProofRequest {
        ProofRequest {
            request_id: "req-1".to_string(),
            commitment_id: commitment_id.map(str::to_string),
            query,
            options: None,
        }
    }

    #[test]
    fn a_request_with_neither_commitment_id_nor_query_is_invalid() {
        let err = validate_request(&request(None, None)).unwrap_err();
        assert!(matches!(err, ProofError::InvalidRequest(_)));
    }

    #[test]
    fn a_query_limit_above_100_is_rejected() {
        let query = ProofQuery {
            kind: None,
            subject_contains: None,
            counterparty: None,
            since: None,
            until: None,
            limit: 101,
            offset: 0,
        };
        let err = validate_request(&request(None, Some(query))).unwrap_err();
        assert!(matches!(err, ProofError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn rate_limiter_allows_requests_within_quota_and_rejects_beyond_it() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
            burst: 0,
        });
        assert!(limiter.check("peer-a").await.is_ok());
        assert!(limiter.check("peer-a").await.is_ok());
        assert!(limiter.check("peer-a").await.is_err());
    }

    #[tokio::test]
    async fn rate_limiter_tracks_peers_independently() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            burst: 0,
        });
        assert!(limiter.check("peer-a").await.is_ok());
        assert!(limiter.check("peer-b").await.is_ok());
        assert!(limiter.check("peer-a").await.is_err());
    }

    #[tokio::test]
    async fn burst_tokens_allow_a_few_requests_past_the_base_quota() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            burst: 1,
        });
        assert!(limiter.check("peer-a").await.is_ok());
        assert!(limiter.check("peer-a").await.is_ok());
        assert!(limiter.check("peer-a").await.is_err());
    }

    #[tokio::test]
    async fn handle_request_surfaces_rate_limited_before_touching_the_core() {
        let service = ProofService::new(RateLimitConfig {
            max_requests: 0,
            window: Duration::from_secs(60),
            burst: 0,
        });
        let message = service
            .handle_request("peer-a", request(Some("commit_1"), None), |_| async {
                panic!("the core must not be invoked once rate-limited")
            })
            .await;
        match message {
            ProofMessage::Error(e) => assert_eq!(e.code, ProofErrorCode::RateLimited),
            _ => panic!("expected a PROOF_ERROR message"),
        }
    }

    fn proof_with_anchor(txid: &str, block_height: Option<u64>) -> Proof {
        use crate::commitment::CommitmentView;
        use crate::proof::protocol::AnchorReference;

        Proof {
            commitment: CommitmentView {
                id: "commit_1".to_string(),
                kind: "agreement".to_string(),
                subject: "s".to_string(),
                content: "c".to_string(),
                counterparty: None,
                metadata: None,
                timestamp: 1_700_000_000_000,
                signature: "ab".repeat(32),
                leaf_hash: Some("cd".repeat(16)),
                tree_index: Some(0),
            },
            leaf_index: 0,
            siblings: Vec::new(),
            root_hash: "ef".repeat(16),
            anchor: AnchorReference {
                txid: txid.to_string(),
                block_height,
                timestamp: 1_700_000_000_000,
            },
        }
    }

    fn unconfirmed_proof() -> Proof {
        proof_with_anchor("tx1", None)
    }

    #[tokio::test]
    async fn a_request_requiring_confirmations_rejects_a_proof_with_no_block_height() {
        let service = ProofService::new(RateLimitConfig::default());
        let mut req = request(Some("commit_1"), None);
        req.options = Some(ProofRequestOptions {
            require_anchored: true,
            min_confirmations: Some(1),
            include_public_key: false,
        });

        let message = service
            .handle_request("peer-a", req, |r| async move {
                Ok(ProofResponse {
                    request_id: r.request_id,
                    proofs: vec![unconfirmed_proof()],
                    public_key: None,
                    total: 1,
                    error: None,
                })
            })
            .await;

        match message {
            ProofMessage::Error(e) => assert_eq!(e.code, ProofErrorCode::NotAnchored),
            _ => panic!("expected a PROOF_ERROR message for an unconfirmed proof"),
        }
    }

    #[tokio::test]
    async fn require_anchored_suppresses_unanchored_matches_from_a_query() {
        let service = ProofService::new(RateLimitConfig::default());
        let query = ProofQuery {
            kind: None,
            subject_contains: None,
            counterparty: None,
            since: None,
            until: None,
            limit: 10,
            offset: 0,
        };
        let mut req = request(None, Some(query));
        req.options = Some(ProofRequestOptions {
            require_anchored: true,
            min_confirmations: None,
            include_public_key: false,
        });

        let message = service
            .handle_request("peer-a", req, |r| async move {
                Ok(ProofResponse {
                    request_id: r.request_id,
                    proofs: vec![proof_with_anchor("", None), proof_with_anchor("tx1", Some(700))],
                    public_key: None,
                    total: 2,
                    error: None,
                })
            })
            .await;

        match message {
            ProofMessage::Response(response) => {
                assert_eq!(response.proofs.len(), 1);
                assert_eq!(response.proofs[0].anchor.txid, "tx1");
                assert_eq!(response.total, 1);
            }
            _ => panic!("expected a PROOF_RESPONSE message"),
        }
    }

    #[tokio::test]
    async fn require_anchored_false_keeps_unanchored_matches() {
        let service = ProofService::new(RateLimitConfig::default());
        let query = ProofQuery {
            kind: None,
            subject_contains: None,
            counterparty: None,
            since: None,
            until: None,
            limit: 10,
            offset: 0,
        };
        let mut req = request(None, Some(query));
        req.options = Some(ProofRequestOptions {
            require_anchored: false,
            min_confirmations: None,
            include_public_key: false,
        });

        let message = service
            .handle_request("peer-a", req, |r| async move {
                Ok(ProofResponse {
                    request_id: r.request_id,
                    proofs: vec![proof_with_anchor("", None)],
                    public_key: None,
                    total: 1,
                    error: None,
                })
            })
            .await;

        match message {
            ProofMessage::Response(response) => assert_eq!(response.proofs.len(), 1),
            _ => panic!("expected a PROOF_RESPONSE message"),
        }
    }
}
