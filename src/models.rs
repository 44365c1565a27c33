//! Core data models that flow through the gateway.
//!
//! The request lifecycle is:
//!
//! ```text
//! HTTP request → admission → pipeline
//!                               ├─ extract() → Metadata
//!                               ├─ VectorStore  → InsertOutcome / SearchHit
//!                               ├─ ChainLog     → AuditRecord (append-only)
//!                               └─ ChatModel    → reply conditioned on ContextBlocks
//! ```
//!
//! Wire field names follow the public API contract: `kinic_result`,
//! `monad_tx`, and the camel-cased on-chain record fields (`opType`,
//! `contentHash`) are part of the HTTP surface and must not drift.

use serde::{Deserialize, Serialize};

/// Operation type recorded on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Insert = 0,
    Search = 1,
}

impl OpType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Metadata derived from raw content by the extractor. This is the only form
/// ever written to the audit log; raw content never leaves the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Non-empty, at most 100 code points.
    pub title: String,
    /// At most 200 code points.
    pub summary: String,
    /// Comma-separated merged tag list, at most 200 code points.
    pub tags: String,
    /// `0x` + 64 lowercase hex digits of SHA-256 over the exact input.
    pub fingerprint: String,
}

/// Result of a vector-store insert as reported by the canister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A single hit from the vector store. `tag` is the full scoped tag
/// (`principal|tags` when the entry was written under a principal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    /// Relevance in `[0, 1]`.
    pub score: f32,
    pub tag: String,
}

/// One append-only entry of the on-chain audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Sequence index assigned by the contract, 0-based.
    pub id: u64,
    /// Ethereum address of the submitting wallet.
    pub user: String,
    #[serde(rename = "opType")]
    pub op_type: u8,
    pub title: String,
    pub summary: String,
    /// Comma list, optionally ending in `principal:<P>`.
    pub tags: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    pub timestamp: u64,
}

/// A retrieved memory rendered into the LLM prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    /// 1-based position in the rendered context.
    pub index: usize,
    pub relevance: f32,
    pub tag: String,
    pub text: String,
}

// ============ Request bodies ============

#[derive(Debug, Clone, Deserialize)]
pub struct InsertRequest {
    pub content: String,
    #[serde(default)]
    pub user_tags: Option<String>,
    #[serde(default)]
    pub principal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub principal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub principal: Option<String>,
}

/// Query against the chain-log cache. At least one of `tags`, `title`,
/// `summary` must be present; `op_type` and `limit` narrow the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonadSearchRequest {
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub op_type: Option<u8>,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ============ Response bodies ============

#[derive(Debug, Clone, Serialize)]
pub struct InsertResponse {
    pub kinic_result: InsertOutcome,
    /// `null` when the audit write failed after the durable vector insert.
    pub monad_tx: Option<String>,
    /// `"confirmed"` or `"chain_failed"` (machine-readable warning flag).
    pub chain_status: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub monad_tx: Option<String>,
    pub num_results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub memories_used: Vec<SearchHit>,
    pub num_memories: usize,
    pub monad_tx: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub vector: String,
    pub chain: String,
    pub canister: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatsResponse {
    pub total_memories_on_chain: u64,
    pub contract_address: String,
    pub agent_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    pub synced: bool,
    pub last_sync: Option<String>,
    pub total_memories: usize,
    pub insert_operations: usize,
    pub search_operations: usize,
    pub unique_tags: usize,
    pub unique_users: usize,
    pub most_active_user: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendingTag {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonadSearchResponse {
    pub results: Vec<AuditRecord>,
    pub num_results: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub synced: bool,
    pub added: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_record_uses_contract_field_names() {
        let record = AuditRecord {
            id: 3,
            user: "0xabc".into(),
            op_type: 1,
            title: "SEARCH: cats".into(),
            summary: "k=5; returned=2".into(),
            tags: "search,cats".into(),
            content_hash: "0x00".into(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["opType"], 1);
        assert_eq!(json["contentHash"], "0x00");
        assert!(json.get("op_type").is_none());
    }

    #[test]
    fn optional_request_fields_default_to_none() {
        let req: InsertRequest =
            serde_json::from_str(r#"{"content": "hello"}"#).unwrap();
        assert_eq!(req.content, "hello");
        assert!(req.user_tags.is_none());
        assert!(req.principal.is_none());
    }

    #[test]
    fn insert_outcome_omits_absent_id() {
        let outcome = InsertOutcome {
            stored: true,
            id: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("\"id\""));
    }
}
