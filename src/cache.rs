//! In-memory projection of the on-chain audit log.
//!
//! The chain is authoritative; this projection is disposable and rebuilt by
//! appending records in ascending id order, so readers always see a prefix-
//! consistent view (never record `i+1` without record `i`). Refresh discovers
//! new ids through the `MemoryLogged` event stream when possible and falls
//! back to a `getTotalMemories`/`getMemory` gap scan.
//!
//! Many readers, one writer: queries take the read lock, `refresh` alone
//! takes the write lock and only while merging fetched records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::models::{AuditRecord, CacheStatsResponse, OpType, TrendingTag};
use crate::monad::ChainLog;
use crate::scope::CHAIN_PRINCIPAL_PREFIX;

pub struct MonadCache {
    chain: Arc<dyn ChainLog>,
    inner: RwLock<Projection>,
}

#[derive(Default)]
struct Projection {
    /// Dense, ascending by id: `records[i].id == i`.
    records: Vec<AuditRecord>,
    /// Lowercased tag token → record indices. `principal:*` tokens are
    /// excluded; the user index covers per-user lookups.
    tag_index: HashMap<String, Vec<usize>>,
    /// Lowercased wallet address → record indices.
    user_index: HashMap<String, Vec<usize>>,
    /// Next block to scan for events.
    next_block: u64,
    last_sync: Option<DateTime<Utc>>,
}

impl Projection {
    fn index_record(&mut self, record: &AuditRecord, position: usize) {
        for token in record.tags.split(',') {
            let token = token.trim().to_lowercase();
            if token.is_empty() || token.starts_with(CHAIN_PRINCIPAL_PREFIX) {
                continue;
            }
            self.tag_index.entry(token).or_default().push(position);
        }
        let user = record.user.to_lowercase();
        if !user.is_empty() {
            self.user_index.entry(user).or_default().push(position);
        }
    }
}

impl MonadCache {
    pub fn new(chain: Arc<dyn ChainLog>) -> Self {
        Self {
            chain,
            inner: RwLock::new(Projection::default()),
        }
    }

    /// Fetch records newer than the last seen id and append them.
    /// Returns how many records were added.
    pub async fn refresh(&self) -> Result<usize, GatewayError> {
        let (next_id, from_block) = {
            let inner = self.inner.read().await;
            (inner.records.len() as u64, inner.next_block)
        };

        // Event scan is the cheap path; the gap scan is the authority when
        // the log query fails.
        let (target, scanned_block) = match self.chain.event_ids(from_block).await {
            Ok((ids, latest)) => {
                let target = ids.last().map(|max| max + 1).unwrap_or(next_id);
                (target.max(next_id), Some(latest))
            }
            Err(e) => {
                debug!(error = %e, "event scan failed, falling back to total/getMemory gap");
                (self.chain.total().await?, None)
            }
        };

        // Hydrate strictly in id order; stop at the first failure so the
        // projection stays prefix-consistent.
        let mut fetched = Vec::new();
        for id in next_id..target {
            match self.chain.record(id).await {
                Ok(record) => fetched.push(record),
                Err(e) => {
                    warn!(id, error = %e, "failed to hydrate audit record, deferring rest");
                    break;
                }
            }
        }

        let added = fetched.len();
        let mut inner = self.inner.write().await;
        for record in fetched {
            let position = inner.records.len();
            inner.index_record(&record, position);
            inner.records.push(record);
        }
        // Only advance the event cursor once every discovered id has been
        // hydrated; otherwise the deferred records would fall out of the
        // scan window and never arrive.
        if let Some(latest) = scanned_block {
            if next_id + added as u64 >= target {
                inner.next_block = latest + 1;
            }
        }
        inner.last_sync = Some(Utc::now());
        debug!(added, total = inner.records.len(), "cache refreshed");
        Ok(added)
    }

    pub async fn stats(&self) -> CacheStatsResponse {
        let inner = self.inner.read().await;
        let inserts = inner
            .records
            .iter()
            .filter(|r| r.op_type == OpType::Insert.as_u8())
            .count();
        let searches = inner
            .records
            .iter()
            .filter(|r| r.op_type == OpType::Search.as_u8())
            .count();
        let most_active_user = inner
            .user_index
            .iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(a.0)))
            .map(|(user, _)| user.clone());

        CacheStatsResponse {
            synced: inner.last_sync.is_some(),
            last_sync: inner.last_sync.map(|t| t.to_rfc3339()),
            total_memories: inner.records.len(),
            insert_operations: inserts,
            search_operations: searches,
            unique_tags: inner.tag_index.len(),
            unique_users: inner.user_index.len(),
            most_active_user,
        }
    }

    /// Case-insensitive substring match against the raw `tags` field,
    /// most recent first.
    pub async fn search_by_tags(
        &self,
        needle: &str,
        limit: usize,
        op_type: Option<u8>,
    ) -> Vec<AuditRecord> {
        let needle = needle.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| op_type.map_or(true, |op| r.op_type == op))
            .filter(|r| r.tags.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring match on `title`, most recent first.
    pub async fn search_by_title(
        &self,
        needle: &str,
        limit: usize,
        op_type: Option<u8>,
    ) -> Vec<AuditRecord> {
        let needle = needle.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| op_type.map_or(true, |op| r.op_type == op))
            .filter(|r| r.title.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring match on `summary`, most recent first.
    pub async fn search_by_summary(
        &self,
        needle: &str,
        limit: usize,
        op_type: Option<u8>,
    ) -> Vec<AuditRecord> {
        let needle = needle.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| op_type.map_or(true, |op| r.op_type == op))
            .filter(|r| r.summary.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent records by descending id.
    pub async fn recent(&self, limit: usize, op_type: Option<u8>) -> Vec<AuditRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| op_type.map_or(true, |op| r.op_type == op))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Tags ranked by usage. `principal:*` markers never surface here.
    pub async fn trending_tags(&self, limit: usize) -> Vec<TrendingTag> {
        let inner = self.inner.read().await;
        let mut ranked: Vec<TrendingTag> = inner
            .tag_index
            .iter()
            .map(|(tag, ids)| TrendingTag {
                tag: tag.clone(),
                count: ids.len(),
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.tag.cmp(&b.tag)));
        ranked.truncate(limit);
        ranked
    }

    /// Number of records currently projected.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
