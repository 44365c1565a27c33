//! Shared mock backends for pipeline and server tests.
//!
//! The mocks record every call so tests can assert ordering and payloads,
//! and they support scripted failures (fail the next N inserts/writes) to
//! exercise the partial-failure policy.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use memory_gateway::error::GatewayError;
use memory_gateway::kinic::VectorStore;
use memory_gateway::llm::ChatModel;
use memory_gateway::models::{AuditRecord, ContextBlock, InsertOutcome, OpType, SearchHit};
use memory_gateway::monad::ChainLog;

pub const MOCK_USER: &str = "0x00000000000000000000000000000000000000aa";
pub const MOCK_CONTRACT: &str = "0x00000000000000000000000000000000000000cc";

// ============ Vector store ============

#[derive(Default)]
pub struct MockVectorStore {
    /// Every (tag, text) pair inserted, in order.
    pub entries: Mutex<Vec<(String, String)>>,
    /// Every (query, k_raw) search call, in order.
    pub search_calls: Mutex<Vec<(String, usize)>>,
    /// Fail the next N inserts with `RemoteUnavailable`.
    pub fail_inserts: AtomicUsize,
    /// Fail the next N searches with `RemoteUnavailable`.
    pub unavailable_searches: AtomicUsize,
}

impl MockVectorStore {
    pub fn seed(&self, tag: &str, text: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((tag.to_string(), text.to_string()));
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn insert(&self, tag: &str, text: &str) -> Result<InsertOutcome, GatewayError> {
        if self.fail_inserts.load(Ordering::SeqCst) > 0 {
            self.fail_inserts.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::RemoteUnavailable {
                backend: "kinic",
                detail: "scripted insert failure".into(),
            });
        }
        let mut entries = self.entries.lock().unwrap();
        entries.push((tag.to_string(), text.to_string()));
        Ok(InsertOutcome {
            stored: true,
            id: Some((entries.len() - 1).to_string()),
        })
    }

    async fn search(&self, query: &str, k_raw: usize) -> Result<Vec<SearchHit>, GatewayError> {
        self.search_calls
            .lock()
            .unwrap()
            .push((query.to_string(), k_raw));
        if self.unavailable_searches.load(Ordering::SeqCst) > 0 {
            self.unavailable_searches.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::RemoteUnavailable {
                backend: "kinic",
                detail: "scripted search failure".into(),
            });
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .take(k_raw)
            .map(|(tag, text)| SearchHit {
                text: text.clone(),
                score: 0.9,
                tag: tag.clone(),
            })
            .collect())
    }
}

// ============ Chain log ============

#[derive(Default)]
pub struct MockChainLog {
    pub records: Mutex<Vec<AuditRecord>>,
    /// Fail the next N writes with `Reverted`.
    pub fail_writes: AtomicUsize,
    /// Make `event_ids` fail, forcing the cache's gap-scan fallback.
    pub fail_events: AtomicBool,
    /// Ids whose hydration fails (tests prefix consistency).
    pub fail_record_ids: Mutex<HashSet<u64>>,
}

impl MockChainLog {
    /// Append a record directly, as if someone else had written on chain.
    pub fn seed(&self, op_type: OpType, title: &str, summary: &str, tags: &str) {
        let mut records = self.records.lock().unwrap();
        let id = records.len() as u64;
        records.push(AuditRecord {
            id,
            user: MOCK_USER.to_string(),
            op_type: op_type.as_u8(),
            title: title.to_string(),
            summary: summary.to_string(),
            tags: tags.to_string(),
            content_hash: format!("0x{:064x}", id),
            timestamp: 1_700_000_000 + id,
        });
    }
}

#[async_trait]
impl ChainLog for MockChainLog {
    async fn write_log(
        &self,
        op_type: OpType,
        title: &str,
        summary: &str,
        tags: &str,
        fingerprint: &str,
    ) -> Result<String, GatewayError> {
        if self.fail_writes.load(Ordering::SeqCst) > 0 {
            self.fail_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::Reverted("scripted write failure".into()));
        }
        let mut records = self.records.lock().unwrap();
        let id = records.len() as u64;
        records.push(AuditRecord {
            id,
            user: MOCK_USER.to_string(),
            op_type: op_type.as_u8(),
            title: title.to_string(),
            summary: summary.to_string(),
            tags: tags.to_string(),
            content_hash: fingerprint.to_string(),
            timestamp: 1_700_000_000 + id,
        });
        Ok(format!("0x{:064x}", id))
    }

    async fn total(&self) -> Result<u64, GatewayError> {
        Ok(self.records.lock().unwrap().len() as u64)
    }

    async fn record(&self, id: u64) -> Result<AuditRecord, GatewayError> {
        if self.fail_record_ids.lock().unwrap().contains(&id) {
            return Err(GatewayError::RemoteUnavailable {
                backend: "monad",
                detail: format!("scripted hydration failure for id {id}"),
            });
        }
        self.records
            .lock()
            .unwrap()
            .get(id as usize)
            .cloned()
            .ok_or_else(|| GatewayError::RemoteRejected {
                backend: "monad",
                detail: format!("no record with id {id}"),
            })
    }

    async fn event_ids(&self, from_block: u64) -> Result<(Vec<u64>, u64), GatewayError> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(GatewayError::RemoteUnavailable {
                backend: "monad",
                detail: "scripted event scan failure".into(),
            });
        }
        let records = self.records.lock().unwrap();
        let latest = records.len() as u64;
        if latest < from_block {
            return Ok((Vec::new(), latest));
        }
        Ok(((0..records.len() as u64).collect(), latest))
    }

    async fn health(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn signer_address(&self) -> String {
        MOCK_USER.to_string()
    }

    fn contract_address(&self) -> String {
        MOCK_CONTRACT.to_string()
    }
}

// ============ Chat model ============

pub struct MockChatModel {
    pub reply: String,
    /// Every (message, context block count) call, in order.
    pub calls: Mutex<Vec<(String, usize)>>,
    pub fail: AtomicBool,
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self {
            reply: "Based on your memories, ZKML enables verifiable inference.".to_string(),
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl MockChatModel {
    pub fn with_reply(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(
        &self,
        _system: &str,
        message: &str,
        context: &[ContextBlock],
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((message.to_string(), context.len()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::RemoteUnavailable {
                backend: "llm",
                detail: "scripted completion failure".into(),
            });
        }
        Ok(self.reply.clone())
    }
}
