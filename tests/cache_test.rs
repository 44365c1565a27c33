//! Chain-log cache tests: projection completeness, prefix consistency,
//! query views, and trending-tag hygiene.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::MockChainLog;
use memory_gateway::cache::MonadCache;
use memory_gateway::models::OpType;
use memory_gateway::monad::ChainLog;

fn seeded_chain() -> Arc<MockChainLog> {
    let chain = Arc::new(MockChainLog::default());
    chain.seed(OpType::Insert, "ZKML paper", "verifiable ML", "ml,research,principal:X");
    chain.seed(OpType::Insert, "Agent memo", "agents and ML", "ml,ai,principal:Y");
    chain.seed(OpType::Search, "SEARCH: ai", "k=5; returned=2", "ai,principal:Z");
    chain
}

#[tokio::test]
async fn refresh_projects_every_record_up_to_total() {
    let chain = seeded_chain();
    let cache = MonadCache::new(chain.clone());

    let added = cache.refresh().await.unwrap();
    assert_eq!(added, 3);
    assert_eq!(cache.len().await, chain.total().await.unwrap() as usize);

    // A second refresh with nothing new is a no-op.
    assert_eq!(cache.refresh().await.unwrap(), 0);
    assert_eq!(cache.len().await, 3);
}

#[tokio::test]
async fn refresh_appends_only_new_records() {
    let chain = seeded_chain();
    let cache = MonadCache::new(chain.clone());
    cache.refresh().await.unwrap();

    chain.seed(OpType::Insert, "Late arrival", "s", "late,principal:X");
    let added = cache.refresh().await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(cache.len().await, 4);
}

#[tokio::test]
async fn refresh_falls_back_to_gap_scan_when_events_fail() {
    let chain = seeded_chain();
    chain.fail_events.store(true, Ordering::SeqCst);
    let cache = MonadCache::new(chain.clone());

    let added = cache.refresh().await.unwrap();
    assert_eq!(added, 3);
}

#[tokio::test]
async fn hydration_failure_keeps_the_projection_prefix_consistent() {
    let chain = seeded_chain();
    chain.fail_record_ids.lock().unwrap().insert(1);
    let cache = MonadCache::new(chain.clone());

    // Record 1 cannot be fetched: the projection must stop at record 0
    // rather than skip ahead.
    let added = cache.refresh().await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(cache.len().await, 1);

    // Once hydration succeeds the rest arrives in order.
    chain.fail_record_ids.lock().unwrap().clear();
    let added = cache.refresh().await.unwrap();
    assert_eq!(added, 2);
    assert_eq!(cache.len().await, 3);

    let recent = cache.recent(10, None).await;
    let ids: Vec<u64> = recent.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 1, 0]);
}

#[tokio::test]
async fn trending_never_surfaces_principal_markers() {
    let cache = MonadCache::new(seeded_chain());
    cache.refresh().await.unwrap();

    let trending = cache.trending_tags(3).await;
    let ranked: Vec<(&str, usize)> = trending
        .iter()
        .map(|t| (t.tag.as_str(), t.count))
        .collect();
    // ml and ai tie at 2 (alphabetical tie-break), research trails at 1.
    assert_eq!(ranked, vec![("ai", 2), ("ml", 2), ("research", 1)]);
    for tag in &trending {
        assert!(!tag.tag.starts_with("principal:"));
    }
}

#[tokio::test]
async fn stats_count_operations_tags_and_users() {
    let cache = MonadCache::new(seeded_chain());
    cache.refresh().await.unwrap();

    let stats = cache.stats().await;
    assert!(stats.synced);
    assert!(stats.last_sync.is_some());
    assert_eq!(stats.total_memories, 3);
    assert_eq!(stats.insert_operations, 2);
    assert_eq!(stats.search_operations, 1);
    // ml, research, ai — principal markers are not tags.
    assert_eq!(stats.unique_tags, 3);
    assert_eq!(stats.unique_users, 1);
    assert_eq!(stats.most_active_user.as_deref(), Some(helpers::MOCK_USER));
}

#[tokio::test]
async fn stats_before_any_refresh_report_unsynced() {
    let cache = MonadCache::new(Arc::new(MockChainLog::default()));
    let stats = cache.stats().await;
    assert!(!stats.synced);
    assert!(stats.last_sync.is_none());
    assert_eq!(stats.total_memories, 0);
}

#[tokio::test]
async fn tag_search_is_substring_and_case_insensitive() {
    let cache = MonadCache::new(seeded_chain());
    cache.refresh().await.unwrap();

    let hits = cache.search_by_tags("ML", 10, None).await;
    assert_eq!(hits.len(), 2);
    // Most recent first.
    assert!(hits[0].id > hits[1].id);

    let inserts_only = cache
        .search_by_tags("ml", 10, Some(OpType::Insert.as_u8()))
        .await;
    assert_eq!(inserts_only.len(), 2);

    let searches_only = cache
        .search_by_tags("ai", 10, Some(OpType::Search.as_u8()))
        .await;
    assert_eq!(searches_only.len(), 1);
    assert_eq!(searches_only[0].op_type, 1);
}

#[tokio::test]
async fn title_and_summary_search_match_substrings() {
    let cache = MonadCache::new(seeded_chain());
    cache.refresh().await.unwrap();

    let by_title = cache.search_by_title("zkml", 10, None).await;
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0].title, "ZKML paper");

    let by_summary = cache.search_by_summary("agents", 10, None).await;
    assert_eq!(by_summary.len(), 1);
    assert_eq!(by_summary[0].id, 1);

    assert!(cache.search_by_title("nonexistent", 10, None).await.is_empty());
}

#[tokio::test]
async fn recent_respects_limit_and_op_filter() {
    let cache = MonadCache::new(seeded_chain());
    cache.refresh().await.unwrap();

    let recent = cache.recent(2, None).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, 2);

    let recent_inserts = cache.recent(10, Some(OpType::Insert.as_u8())).await;
    assert_eq!(recent_inserts.len(), 2);
    assert!(recent_inserts.iter().all(|r| r.op_type == 0));
}
