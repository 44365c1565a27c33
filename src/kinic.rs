//! Kinic vector-canister client.
//!
//! Two remote legs per operation: the Kinic embedding service turns text
//! into a vector (`POST {embedding_api}/late-chunking`), then the memory
//! canister on the Internet Computer stores or searches by that vector.
//! The canister is agnostic to principal scoping; it stores whatever tag
//! string it is handed inside `tagged_text = "{tag}: {content}"`.
//!
//! Canister interface (candid):
//!
//! ```text
//! insert : (vec float32, text) -> (nat32)
//! search : (vec float32) -> (vec record { float32; text }) query
//! ```
//!
//! No retries here; the pipeline owns retry policy.

use async_trait::async_trait;
use candid::{Decode, Encode, Principal};
use ic_agent::identity::{BasicIdentity, Secp256k1Identity};
use ic_agent::{Agent, Identity};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::CanisterConfig;
use crate::error::GatewayError;
use crate::models::{InsertOutcome, SearchHit};

/// Maximum raw content size accepted by the store.
pub const MAX_CONTENT_BYTES: usize = 100 * 1024;

/// Seam over the semantic store so the pipeline can run against mocks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store `text` under the (already scoped) `tag`.
    async fn insert(&self, tag: &str, text: &str) -> Result<InsertOutcome, GatewayError>;

    /// Return up to `k_raw` hits ranked by similarity. No principal
    /// filtering happens at this layer.
    async fn search(&self, query: &str, k_raw: usize) -> Result<Vec<SearchHit>, GatewayError>;
}

pub struct KinicClient {
    agent: Agent,
    canister_id: Principal,
    http: reqwest::Client,
    embedding_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    chunks: Vec<EmbeddingChunk>,
}

#[derive(Deserialize)]
struct EmbeddingChunk {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl KinicClient {
    /// Build the long-lived client: one identity, one agent, one HTTP pool.
    ///
    /// The identity PEM is parsed with real ASN.1 support (SEC1 and PKCS#8);
    /// an unparseable key fails startup loudly rather than degrading to a
    /// random identity.
    pub fn new(config: &CanisterConfig) -> anyhow::Result<Self> {
        let canister_id = Principal::from_text(&config.canister_id)
            .map_err(|e| anyhow::anyhow!("invalid canister id '{}': {}", config.canister_id, e))?;

        let identity = parse_identity(&config.identity_pem)?;
        let agent = Agent::builder()
            .with_url(&config.ic_url)
            .with_boxed_identity(identity)
            .build()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            agent,
            canister_id,
            http,
            embedding_url: format!(
                "{}/late-chunking",
                config.embedding_api.trim_end_matches('/')
            ),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Fetch the embedding vector for `text` from the Kinic embedding API.
    ///
    /// The API late-chunks the input and returns one embedding per chunk;
    /// the first chunk's vector represents the whole text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let resp = self
            .http
            .post(&self.embedding_url)
            .json(&serde_json::json!({ "markdown": text }))
            .send()
            .await
            .map_err(|e| GatewayError::RemoteUnavailable {
                backend: "kinic",
                detail: format!("embedding API: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::RemoteRejected {
                backend: "kinic",
                detail: format!("embedding API returned {status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse =
            resp.json().await.map_err(|e| GatewayError::RemoteRejected {
                backend: "kinic",
                detail: format!("malformed embedding response: {e}"),
            })?;

        parsed
            .chunks
            .into_iter()
            .find_map(|c| c.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::RemoteRejected {
                backend: "kinic",
                detail: "embedding response contained no vectors".into(),
            })
    }

    fn classify_agent_error(err: ic_agent::AgentError) -> GatewayError {
        let detail = err.to_string();
        let lower = detail.to_lowercase();
        if lower.contains("reject") || lower.contains("certified") {
            GatewayError::RemoteRejected {
                backend: "kinic",
                detail,
            }
        } else {
            GatewayError::RemoteUnavailable {
                backend: "kinic",
                detail,
            }
        }
    }
}

/// Parse a PEM identity, trying secp256k1 (SEC1 or PKCS#8) then ed25519.
fn parse_identity(pem: &str) -> anyhow::Result<Box<dyn Identity>> {
    if pem.trim().is_empty() {
        anyhow::bail!("identity PEM is empty");
    }
    if let Ok(identity) = Secp256k1Identity::from_pem(pem.as_bytes()) {
        return Ok(Box::new(identity));
    }
    match BasicIdentity::from_pem(pem.as_bytes()) {
        Ok(identity) => Ok(Box::new(identity)),
        Err(e) => anyhow::bail!("identity PEM is neither secp256k1 nor ed25519: {e}"),
    }
}

#[async_trait]
impl VectorStore for KinicClient {
    async fn insert(&self, tag: &str, text: &str) -> Result<InsertOutcome, GatewayError> {
        if tag.is_empty() {
            return Err(GatewayError::bad_request("vector tag must not be empty"));
        }
        if text.len() > MAX_CONTENT_BYTES {
            return Err(GatewayError::PayloadTooLarge(format!(
                "content exceeds {} bytes",
                MAX_CONTENT_BYTES
            )));
        }

        let embedding = self.embed(text).await?;
        debug!(dim = embedding.len(), tag, "embedding obtained, inserting");

        let tagged_text = format!("{}: {}", tag, text);
        let arg = Encode!(&embedding, &tagged_text)
            .map_err(|e| GatewayError::internal(format!("candid encode: {e}")))?;

        let call = self
            .agent
            .update(&self.canister_id, "insert")
            .with_arg(arg)
            .call_and_wait();
        let bytes = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout("canister insert timed out".into()))?
            .map_err(Self::classify_agent_error)?;

        let memory_id = Decode!(&bytes, u32)
            .map_err(|e| GatewayError::RemoteRejected {
                backend: "kinic",
                detail: format!("unexpected insert response: {e}"),
            })?;

        Ok(InsertOutcome {
            stored: true,
            id: Some(memory_id.to_string()),
        })
    }

    async fn search(&self, query: &str, k_raw: usize) -> Result<Vec<SearchHit>, GatewayError> {
        let embedding = self.embed(query).await?;

        let arg = Encode!(&embedding)
            .map_err(|e| GatewayError::internal(format!("candid encode: {e}")))?;

        let call = self
            .agent
            .query(&self.canister_id, "search")
            .with_arg(arg)
            .call();
        let bytes = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout("canister search timed out".into()))?
            .map_err(Self::classify_agent_error)?;

        let raw = Decode!(&bytes, Vec<(f32, String)>)
            .map_err(|e| GatewayError::RemoteRejected {
                backend: "kinic",
                detail: format!("unexpected search response: {e}"),
            })?;

        let hits = raw
            .into_iter()
            .take(k_raw)
            .map(|(score, tagged_text)| decode_hit(score, &tagged_text))
            .collect();
        Ok(hits)
    }
}

/// Split the canister's `"{tag}: {text}"` encoding back into a hit.
fn decode_hit(score: f32, tagged_text: &str) -> SearchHit {
    let (tag, text) = match tagged_text.split_once(':') {
        Some((tag, rest)) => (tag.trim().to_string(), rest.trim().to_string()),
        None => (String::new(), tagged_text.trim().to_string()),
    };
    SearchHit {
        text,
        score: score.clamp(0.0, 1.0),
        tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hit_splits_tag_and_text() {
        let hit = decode_hit(0.91, "userA|pets,cats: cats are lovely");
        assert_eq!(hit.tag, "userA|pets,cats");
        assert_eq!(hit.text, "cats are lovely");
        assert!((hit.score - 0.91).abs() < 1e-6);
    }

    #[test]
    fn decode_hit_without_tag_keeps_text() {
        let hit = decode_hit(0.5, "just plain text");
        assert_eq!(hit.tag, "");
        assert_eq!(hit.text, "just plain text");
    }

    #[test]
    fn decode_hit_clamps_score() {
        assert_eq!(decode_hit(1.7, "t: x").score, 1.0);
        assert_eq!(decode_hit(-0.2, "t: x").score, 0.0);
    }

    #[test]
    fn empty_identity_pem_is_rejected() {
        assert!(parse_identity("").is_err());
        assert!(parse_identity("not a pem at all").is_err());
    }
}
