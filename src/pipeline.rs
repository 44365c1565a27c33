//! The request pipeline: orchestrates extraction, the vector store, the
//! chain log, and the LLM for the three public flows.
//!
//! Ordering and failure policy are fixed here and nowhere else:
//!
//! | Flow | Order | Partial failure |
//! |------|-------|-----------------|
//! | insert | extract → vector insert → chain write | vector failure aborts; chain failure is flagged (`chain_status = "chain_failed"`), never raised — the vector write is durable and re-running would duplicate it |
//! | search | vector search → principal filter → chain write | chain failure logged, `monad_tx = null` |
//! | chat | vector search → LLM → chain write | LLM failure aborts before any chain write; chain failure logged |
//!
//! Every flow runs under a request deadline. Backends are reached through
//! trait seams so the flows are testable without a network.

use std::cmp::max;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::kinic::{VectorStore, MAX_CONTENT_BYTES};
use crate::llm::{ChatModel, SYSTEM_PROMPT};
use crate::metadata;
use crate::models::{
    ChatRequest, ChatResponse, ContextBlock, InsertRequest, InsertResponse, Metadata, OpType,
    SearchHit, SearchRequest, SearchResponse,
};
use crate::monad::ChainLog;
use crate::scope;

/// Total request deadlines; each exceeds the largest backend timeout plus a
/// safety margin.
const INSERT_DEADLINE: Duration = Duration::from_secs(30);
const SEARCH_DEADLINE: Duration = Duration::from_secs(30);
const CHAT_DEADLINE: Duration = Duration::from_secs(40);

/// Bounds on `top_k` per flow.
const SEARCH_K_MAX: usize = 50;
const CHAT_K_MAX: usize = 20;
const SEARCH_K_DEFAULT: usize = 5;
const CHAT_K_DEFAULT: usize = 3;

/// Minimum number of memories retrieved for a chat turn.
const CHAT_K_FLOOR: usize = 3;

pub struct Pipeline {
    vector: Arc<dyn VectorStore>,
    chain: Arc<dyn ChainLog>,
    llm: Arc<dyn ChatModel>,
}

impl Pipeline {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        chain: Arc<dyn ChainLog>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self { vector, chain, llm }
    }

    // ============ Flow I: insert ============

    pub async fn insert(&self, request: &InsertRequest) -> Result<InsertResponse, GatewayError> {
        tokio::time::timeout(INSERT_DEADLINE, self.insert_inner(request))
            .await
            .map_err(|_| GatewayError::Timeout("insert deadline exceeded".into()))?
    }

    async fn insert_inner(&self, request: &InsertRequest) -> Result<InsertResponse, GatewayError> {
        let content = request.content.as_str();
        if content.trim().is_empty() {
            return Err(GatewayError::bad_request("content must not be empty"));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(GatewayError::PayloadTooLarge(format!(
                "content exceeds {} bytes",
                MAX_CONTENT_BYTES
            )));
        }
        let principal = scope::checked_principal(request.principal.as_deref())?;

        let meta = metadata::extract(content, request.user_tags.as_deref())?;
        let vector_tag = scope::scope_vector_tag(principal, &meta.tags);

        // Vector write first; its failure aborts the flow before any audit
        // record exists.
        let outcome = self.vector.insert(&vector_tag, content).await?;
        info!(tag = %vector_tag, id = ?outcome.id, "stored in vector canister");

        let (monad_tx, chain_status) = self
            .audit_insert(principal, &meta)
            .await
            .map(|tx| (Some(tx), "confirmed"))
            .unwrap_or_else(|e| {
                warn!(error = %e, "audit write failed after durable vector insert");
                (None, "chain_failed")
            });

        Ok(InsertResponse {
            kinic_result: outcome,
            monad_tx,
            chain_status: chain_status.to_string(),
            metadata: meta,
        })
    }

    async fn audit_insert(
        &self,
        principal: Option<&str>,
        meta: &Metadata,
    ) -> Result<String, GatewayError> {
        let chain_tags = scope::scope_chain_tags(principal, &meta.tags);
        self.chain
            .write_log(
                OpType::Insert,
                &meta.title,
                &meta.summary,
                &chain_tags,
                &meta.fingerprint,
            )
            .await
    }

    // ============ Flow II: search ============

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, GatewayError> {
        tokio::time::timeout(SEARCH_DEADLINE, self.search_inner(request))
            .await
            .map_err(|_| GatewayError::Timeout("search deadline exceeded".into()))?
    }

    async fn search_inner(&self, request: &SearchRequest) -> Result<SearchResponse, GatewayError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(GatewayError::bad_request("query must not be empty"));
        }
        let k = request.top_k.unwrap_or(SEARCH_K_DEFAULT);
        if k == 0 || k > SEARCH_K_MAX {
            return Err(GatewayError::bad_request(format!(
                "top_k must be between 1 and {SEARCH_K_MAX}"
            )));
        }
        let principal = scope::checked_principal(request.principal.as_deref())?;

        let filtered = self.retrieve(query, k, principal).await?;

        // Compact audit record for the search itself. Its failure never
        // changes the HTTP outcome.
        let monad_tx = match self.audit_search(principal, query, k, filtered.len()).await {
            Ok(tx) => Some(tx),
            Err(e) => {
                warn!(error = %e, "audit write for search failed");
                None
            }
        };

        Ok(SearchResponse {
            num_results: filtered.len(),
            results: filtered,
            monad_tx,
        })
    }

    /// Raw retrieval plus principal post-filtering, shared by search & chat.
    ///
    /// Over-fetches `max(3k, 10)` so the filter can drop other principals'
    /// entries without starving the caller, and retries once on a transport
    /// failure (reads are safe to retry; writes never are).
    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        principal: Option<&str>,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        let k_raw = max(k * 3, 10);
        let hits = match self.vector.search(query, k_raw).await {
            Ok(hits) => hits,
            Err(GatewayError::RemoteUnavailable { backend, detail }) => {
                warn!(backend, %detail, "vector search transport failure, retrying once");
                self.vector.search(query, k_raw).await?
            }
            Err(e) => return Err(e),
        };

        Ok(hits
            .into_iter()
            .filter(|hit| scope::is_owned_by(&hit.tag, principal))
            .take(k)
            .collect())
    }

    async fn audit_search(
        &self,
        principal: Option<&str>,
        query: &str,
        k: usize,
        returned: usize,
    ) -> Result<String, GatewayError> {
        let title = format!("SEARCH: {}", metadata::truncate_points(query, 90));
        let summary = format!("k={}; returned={}", k, returned);

        let mut tags = vec!["search".to_string()];
        for keyword in metadata::auto_tags(query) {
            if !tags.contains(&keyword) {
                tags.push(keyword);
            }
        }
        let chain_tags = scope::scope_chain_tags(principal, &tags.join(","));

        self.chain
            .write_log(
                OpType::Search,
                &title,
                &summary,
                &chain_tags,
                &metadata::fingerprint(query),
            )
            .await
    }

    // ============ Flow III: chat ============

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        tokio::time::timeout(CHAT_DEADLINE, self.chat_inner(request))
            .await
            .map_err(|_| GatewayError::Timeout("chat deadline exceeded".into()))?
    }

    async fn chat_inner(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(GatewayError::bad_request("message must not be empty"));
        }
        let k = request.top_k.unwrap_or(CHAT_K_DEFAULT);
        if k == 0 || k > CHAT_K_MAX {
            return Err(GatewayError::bad_request(format!(
                "top_k must be between 1 and {CHAT_K_MAX}"
            )));
        }
        let principal = scope::checked_principal(request.principal.as_deref())?;

        // Retrieval reuses the search path without its audit write; the chat
        // turn below is recorded as the knowledge event instead.
        let hits = self
            .retrieve(message, max(k, CHAT_K_FLOOR), principal)
            .await?;

        let blocks: Vec<ContextBlock> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| ContextBlock {
                index: i + 1,
                relevance: hit.score,
                tag: hit.tag.clone(),
                text: hit.text.clone(),
            })
            .collect();

        let answer = self.llm.chat(SYSTEM_PROMPT, message, &blocks).await?;
        info!(
            memories = hits.len(),
            chars = answer.chars().count(),
            "chat reply generated"
        );

        let monad_tx = match self.audit_chat(principal, message, &answer).await {
            Ok(tx) => Some(tx),
            Err(e) => {
                warn!(error = %e, "audit write for chat failed");
                None
            }
        };

        Ok(ChatResponse {
            response: answer,
            num_memories: hits.len(),
            memories_used: hits,
            monad_tx,
        })
    }

    async fn audit_chat(
        &self,
        principal: Option<&str>,
        message: &str,
        answer: &str,
    ) -> Result<String, GatewayError> {
        let title = metadata::truncate_points(message, 100);
        let summary = metadata::truncate_points(answer, 200);

        let mut tags = metadata::auto_tags(message);
        if !tags.iter().any(|t| t == "chat") {
            tags.push("chat".to_string());
        }
        let chain_tags = scope::scope_chain_tags(principal, &tags.join(","));

        let fingerprint = metadata::fingerprint(&format!("{}\n---\n{}", message, answer));

        self.chain
            .write_log(OpType::Insert, &title, &summary, &chain_tags, &fingerprint)
            .await
    }
}
