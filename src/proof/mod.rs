//! The proof request/response protocol: message shapes, per-peer rate
//! limiting, and request validation (`spec.md` §5–§6). Transport is
//! out of scope; this module only encodes/decodes messages and
//! dispatches validated requests to the core.

pub mod protocol;
pub mod service;

pub use protocol::{
    AnchorReference, Proof, ProofAck, ProofErrorCode, ProofErrorMessage, ProofMessage, ProofPush, ProofQuery,
    ProofRequest, ProofRequestOptions, ProofResponse, ProofStepView,
};
pub use service::{proof_query_to_filter, validate_request, ProofError, ProofService, RateLimitConfig, RateLimiter};
