//! The error taxonomy shared by every layer of the gateway.
//!
//! Each variant corresponds to one wire-visible kind. Layers return these
//! values directly; only the HTTP boundary ([`crate::server`]) translates a
//! kind into a status code, so the mapping lives in exactly one place.

use thiserror::Error;

/// Gateway-wide error type.
///
/// `RemoteUnavailable`/`RemoteRejected` carry the backend label so operators
/// can tell an unreachable canister from an unreachable RPC node.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request validation failed before reaching any backend.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid API key, or disallowed origin.
    #[error("{0}")]
    Unauthorized(String),

    /// Request body or content exceeds the configured bound.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Per-endpoint token bucket exhausted.
    #[error("{0}")]
    RateLimited(String),

    /// Transport to a backend failed (connect, DNS, TLS, broken pipe).
    #[error("{backend} unavailable: {detail}")]
    RemoteUnavailable {
        backend: &'static str,
        detail: String,
    },

    /// Backend accepted the call but refused it (canister reject, bad
    /// embedding response, LLM 4xx).
    #[error("{backend} rejected the request: {detail}")]
    RemoteRejected {
        backend: &'static str,
        detail: String,
    },

    /// The signer cannot pay gas. Never retried.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Chain call reverted; carries the decoded reason when one is present.
    #[error("chain call reverted: {0}")]
    Reverted(String),

    /// Request deadline or per-call timeout fired.
    #[error("{0}")]
    Timeout(String),

    /// Programming or invariant failure. Always logged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Wire-visible kind name, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "KindBadRequest",
            GatewayError::Unauthorized(_) => "KindUnauthorized",
            GatewayError::PayloadTooLarge(_) => "KindPayloadTooLarge",
            GatewayError::RateLimited(_) => "KindRateLimited",
            GatewayError::RemoteUnavailable { .. } => "KindRemoteUnavailable",
            GatewayError::RemoteRejected { .. } => "KindRemoteRejected",
            GatewayError::InsufficientFunds(_) => "KindInsufficientFunds",
            GatewayError::Reverted(_) => "KindReverted",
            GatewayError::Timeout(_) => "KindTimeout",
            GatewayError::Internal(_) => "KindInternal",
        }
    }

    /// Backend label for kinds that carry one.
    pub fn backend(&self) -> Option<&'static str> {
        match self {
            GatewayError::RemoteUnavailable { backend, .. }
            | GatewayError::RemoteRejected { backend, .. } => Some(backend),
            GatewayError::InsufficientFunds(_) | GatewayError::Reverted(_) => Some("monad"),
            _ => None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        GatewayError::BadRequest(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        GatewayError::Internal(detail.into())
    }
}
