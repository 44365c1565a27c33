//! Context-conditioned reply generation via the Anthropic messages API.
//!
//! Retrieved memories are rendered into a stable block template and injected
//! ahead of the user's question. The combined prompt is kept under a token
//! budget by dropping the lowest-relevance blocks first.
//!
//! Retry strategy mirrors the house style for remote APIs: client errors
//! (4xx) fail immediately, server errors and transport failures back off
//! exponentially with jitter, capped at three attempts total.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::GatewayError;
use crate::models::ContextBlock;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ATTEMPTS: u32 = 3;

/// Persona for the memory-aware assistant.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI memory agent built on Monad blockchain with Kinic storage.

Your capabilities:
- You can store and retrieve information using semantic search
- All your interactions are logged on Monad blockchain for transparency
- You help users remember, organize, and retrieve information

When users ask questions:
1. Search your memory for relevant context
2. Provide accurate, helpful answers based on stored information
3. If you don't have relevant information, say so clearly
4. Suggest storing new information when appropriate

Be concise, helpful, and transparent about your capabilities.";

/// Seam over the reply generator so the pipeline can run against mocks.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        message: &str,
        context: &[ContextBlock],
    ) -> Result<String, GatewayError>;
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    context_token_budget: usize,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            context_token_budget: config.context_token_budget,
        })
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn chat(
        &self,
        system: &str,
        message: &str,
        context: &[ContextBlock],
    ) -> Result<String, GatewayError> {
        let selected = select_within_budget(context, self.context_token_budget, system, message);
        if selected.len() < context.len() {
            debug!(
                kept = selected.len(),
                dropped = context.len() - selected.len(),
                "context blocks dropped to fit token budget"
            );
        }
        let user_content = build_user_message(message, &selected);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": user_content }],
        });

        let mut last_err: Option<GatewayError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let base = Duration::from_millis(500 * (1 << (attempt - 1)));
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tokio::time::sleep(base + jitter).await;
            }

            let resp = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: MessagesResponse = response.json().await.map_err(|e| {
                            GatewayError::RemoteRejected {
                                backend: "llm",
                                detail: format!("malformed completion response: {e}"),
                            }
                        })?;
                        return parsed
                            .content
                            .into_iter()
                            .map(|part| part.text)
                            .find(|text| !text.is_empty())
                            .ok_or_else(|| GatewayError::RemoteRejected {
                                backend: "llm",
                                detail: "completion contained no text".into(),
                            });
                    }

                    let detail = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        // 4xx is not retryable.
                        return Err(GatewayError::RemoteRejected {
                            backend: "llm",
                            detail: format!("HTTP {status}: {detail}"),
                        });
                    }
                    warn!(%status, attempt, "LLM server error, backing off");
                    last_err = Some(GatewayError::RemoteUnavailable {
                        backend: "llm",
                        detail: format!("HTTP {status}: {detail}"),
                    });
                }
                Err(e) => {
                    warn!(error = %e, attempt, "LLM transport error, backing off");
                    last_err = Some(GatewayError::RemoteUnavailable {
                        backend: "llm",
                        detail: e.to_string(),
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::RemoteUnavailable {
            backend: "llm",
            detail: "completion failed after retries".into(),
        }))
    }
}

/// Stable render of one retrieved memory.
pub fn render_block(block: &ContextBlock) -> String {
    format!(
        "[Memory {}] (relevance: {:.2}, tags: {})\n{}",
        block.index, block.relevance, block.tag, block.text
    )
}

/// Combined user turn: memory context first, then the question.
pub fn build_user_message(message: &str, blocks: &[ContextBlock]) -> String {
    if blocks.is_empty() {
        return message.to_string();
    }
    let rendered: Vec<String> = blocks.iter().map(render_block).collect();
    format!(
        "Context from memory:\n{}\n\nUser question: {}",
        rendered.join("\n\n"),
        message
    )
}

/// Drop lowest-relevance blocks until the prompt fits the budget, keeping
/// the surviving blocks in their original order.
pub fn select_within_budget(
    blocks: &[ContextBlock],
    budget_tokens: usize,
    system: &str,
    message: &str,
) -> Vec<ContextBlock> {
    let fixed = approx_tokens(system) + approx_tokens(message);
    let mut selected: Vec<ContextBlock> = blocks.to_vec();

    loop {
        let total: usize = fixed
            + selected
                .iter()
                .map(|b| approx_tokens(&render_block(b)))
                .sum::<usize>();
        if total <= budget_tokens || selected.is_empty() {
            return selected;
        }
        let weakest = selected
            .iter()
            .enumerate()
            .min_by(|a, b| {
                a.1.relevance
                    .partial_cmp(&b.1.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        selected.remove(weakest);
    }
}

/// Rough token estimate (≈4 characters per token).
fn approx_tokens(s: &str) -> usize {
    s.chars().count() / 4 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: usize, relevance: f32, text: &str) -> ContextBlock {
        ContextBlock {
            index,
            relevance,
            tag: "test".into(),
            text: text.into(),
        }
    }

    #[test]
    fn block_template_is_stable() {
        let rendered = render_block(&block(1, 0.894, "ZKML enables verifiable inference."));
        assert_eq!(
            rendered,
            "[Memory 1] (relevance: 0.89, tags: test)\nZKML enables verifiable inference."
        );
    }

    #[test]
    fn user_message_without_context_is_passthrough() {
        assert_eq!(build_user_message("hello", &[]), "hello");
    }

    #[test]
    fn user_message_frames_context_then_question() {
        let msg = build_user_message("What is ZKML?", &[block(1, 0.9, "zk proofs for ML")]);
        assert!(msg.starts_with("Context from memory:\n[Memory 1]"));
        assert!(msg.ends_with("User question: What is ZKML?"));
    }

    #[test]
    fn budget_drops_lowest_relevance_first() {
        let blocks = vec![
            block(1, 0.9, &"a".repeat(400)),
            block(2, 0.2, &"b".repeat(400)),
            block(3, 0.7, &"c".repeat(400)),
        ];
        // Each block is ~110 tokens; a budget of 250 fits two plus overhead.
        let selected = select_within_budget(&blocks, 250, "sys", "question");
        let indices: Vec<usize> = selected.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn budget_keeps_order_of_survivors() {
        let blocks = vec![
            block(1, 0.3, &"a".repeat(200)),
            block(2, 0.8, &"b".repeat(200)),
            block(3, 0.5, &"c".repeat(200)),
        ];
        let selected = select_within_budget(&blocks, 130, "sys", "q");
        let indices: Vec<usize> = selected.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![2, 3]);
    }

    #[test]
    fn everything_fits_under_a_generous_budget() {
        let blocks = vec![block(1, 0.9, "short"), block(2, 0.1, "also short")];
        let selected = select_within_budget(&blocks, 10_000, "sys", "q");
        assert_eq!(selected.len(), 2);
    }
}
