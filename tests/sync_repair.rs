//! Integrity maintenance: sync-flag repair, dangling-reference cleanup,
//! embedding freshness and regeneration.

mod common;

use std::sync::Arc;

use chrono::Utc;

use common::Fixture;
use kgraph_rag::core::model::{EmbeddingInfo, Initiative, KnowledgeRecord, RecordKind, Relation, RelationType, Topic};
use kgraph_rag::integrity::{
    CancellationToken, FreshnessScanner, ReferenceCleaner, RegenerationMode, Regenerator, RepairOptions, SyncRepairer,
};
use kgraph_rag::search::vectordb::VectorMetadata;
use kgraph_rag::search::{SearchFilters, SqliteVectorStore, VectorStore};
use kgraph_rag::store::{RecordScope, RelationalStore, SqliteRecordStore};

fn relation(i: usize) -> KnowledgeRecord {
    let mut r = Relation::new(
        format!("r-{:03}", i),
        "t-1",
        RelationType::RelatedTo,
        format!("decision {}", i),
    );
    r.organization_id = Some("org-a".to_string());
    KnowledgeRecord::Relation(r)
}

fn topic(id: &str, org: &str) -> KnowledgeRecord {
    let mut t = Topic::new(id, format!("topic {}", id), "");
    t.organization_id = Some(org.to_string());
    KnowledgeRecord::Topic(t)
}

fn initiative(id: &str, org: &str, topics: &[&str]) -> Initiative {
    Initiative {
        id: id.to_string(),
        title: format!("initiative {}", id),
        organization_id: Some(org.to_string()),
        topic_ids: topics.iter().map(|t| t.to_string()).collect(),
        updated_at: Utc::now(),
    }
}

// =============================================================================
// Sync repair
// =============================================================================

#[tokio::test]
async fn test_repair_resets_flags_without_vectors() {
    let fx = Fixture::new(&["decision"]);
    for i in 0..90 {
        fx.add_indexed(relation(i)).await;
    }
    for i in 90..100 {
        fx.add_flagged_without_vector(relation(i)).await;
    }
    let repairer = SyncRepairer::new(fx.records.clone(), fx.vectors.clone(), Fixture::runner());

    let first = repairer.repair_sync_status(RecordKind::Relation, None).await.unwrap();
    assert_eq!(first.scanned, 100);
    assert_eq!(first.repaired, 10);
    assert!(first.errors.is_empty());

    let unsynced = fx
        .records
        .list(RecordKind::Relation, &RecordScope::default().synced(false))
        .await
        .unwrap();
    assert_eq!(unsynced.len(), 10);
    assert!(unsynced.iter().all(|r| r.id() >= "r-090"));

    let second = repairer.repair_sync_status(RecordKind::Relation, None).await.unwrap();
    assert_eq!(second.scanned, 90);
    assert_eq!(second.repaired, 0);
}

#[tokio::test]
async fn test_repair_reports_unreadable_flagged_records() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("records.db");
    let records = Arc::new(SqliteRecordStore::open(&db_path).unwrap());
    let vectors = Arc::new(SqliteVectorStore::open_in_memory().unwrap());

    for i in 0..3 {
        records.upsert(&relation(i)).unwrap();
        records.set_synced(RecordKind::Relation, &format!("r-{:03}", i), true).await.unwrap();
    }
    let metadata = VectorMetadata {
        organization_id: Some("org-a".to_string()),
        model_id: common::MODEL_ID.to_string(),
        version: common::MODEL_VERSION.to_string(),
    };
    vectors.save(RecordKind::Relation, "r-000", &[1.0, 0.0], &metadata).await.unwrap();
    vectors.save(RecordKind::Relation, "r-001", &[1.0, 0.0], &metadata).await.unwrap();

    // r-001 keeps its vector, r-002 has none; both bodies are broken on disk.
    let raw = rusqlite::Connection::open(&db_path).unwrap();
    raw.execute(
        "UPDATE records SET body = '{\"broken\":' WHERE kind = 'relation' AND id IN ('r-001', 'r-002')",
        [],
    )
    .unwrap();
    drop(raw);

    let repairer = SyncRepairer::new(records.clone(), vectors.clone(), Fixture::runner());
    let report = repairer.repair_sync_status(RecordKind::Relation, None).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.repaired, 1);
    let mut failed: Vec<&str> = report.errors.iter().map(|e| e.id.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["r-001", "r-002"]);
    assert!(report.errors.iter().all(|e| e.error.starts_with("data integrity warning")));

    let still_flagged = records
        .list_unreadable(RecordKind::Relation, &RecordScope::default().synced(true))
        .await
        .unwrap();
    assert_eq!(still_flagged.len(), 1);
    assert_eq!(still_flagged[0].id, "r-001");
    let counts = records.counts(RecordKind::Relation, None).unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.synced, 2);
}

#[tokio::test]
async fn test_repair_promotes_present_vectors() {
    let fx = Fixture::new(&["decision"]);
    fx.add_indexed(relation(1)).await;
    fx.records.set_synced(RecordKind::Relation, "r-001", false).await.unwrap();
    fx.add(relation(2));
    let repairer = SyncRepairer::new(fx.records.clone(), fx.vectors.clone(), Fixture::runner());

    let report = repairer
        .repair_sync_status_with(
            RecordKind::Relation,
            Some("org-a"),
            RepairOptions { promote_present: true },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.repaired, 0);
    assert_eq!(report.promoted, 1);
    assert_eq!(fx.records.counts(RecordKind::Relation, None).unwrap().synced, 1);
}

#[tokio::test]
async fn test_repair_honours_cancellation() {
    let fx = Fixture::new(&["decision"]);
    for i in 0..20 {
        fx.add_flagged_without_vector(relation(i)).await;
    }
    let repairer = SyncRepairer::new(fx.records.clone(), fx.vectors.clone(), Fixture::runner());
    let token = CancellationToken::new();
    token.cancel();

    let report = repairer
        .repair_sync_status_with(RecordKind::Relation, None, RepairOptions::default(), &token, None)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.repaired, 0);
}

// =============================================================================
// Dangling references
// =============================================================================

#[tokio::test]
async fn test_cleanup_removes_dangling_topic_refs_once() {
    let fx = Fixture::new(&["topic"]);
    fx.add(topic("t-1", "org-a"));
    fx.add(topic("t-2", "org-a"));
    fx.add(topic("t-b", "org-b"));
    fx.records
        .upsert_initiative(&initiative("i-1", "org-a", &["t-1", "t-gone"]))
        .unwrap();
    fx.records
        .upsert_initiative(&initiative("i-2", "org-a", &["t-1", "t-2"]))
        .unwrap();
    fx.records
        .upsert_initiative(&initiative("i-3", "org-a", &["t-b"]))
        .unwrap();
    let cleaner = ReferenceCleaner::new(fx.records.clone(), Fixture::runner());

    let dangling = cleaner.check_dangling_references(Some("org-a")).await.unwrap();
    let flagged: Vec<&str> = dangling.iter().map(|d| d.initiative_id.as_str()).collect();
    assert_eq!(flagged, vec!["i-1", "i-3"]);

    let report = cleaner.cleanup_dangling_references(Some("org-a")).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.cleaned, 2);
    assert_eq!(report.removed_refs, 2);

    let initiatives = fx.records.list_initiatives(Some("org-a")).await.unwrap();
    let i1 = initiatives.iter().find(|i| i.id == "i-1").unwrap();
    assert_eq!(i1.topic_ids, vec!["t-1"]);
    let i2 = initiatives.iter().find(|i| i.id == "i-2").unwrap();
    assert_eq!(i2.topic_ids, vec!["t-1", "t-2"]);

    let again = cleaner.cleanup_dangling_references(Some("org-a")).await.unwrap();
    assert_eq!(again.cleaned, 0);
    assert!(cleaner.check_dangling_references(Some("org-a")).await.unwrap().is_empty());
}

// =============================================================================
// Freshness and regeneration
// =============================================================================

#[tokio::test]
async fn test_freshness_classifies_stamps() {
    let fx = Fixture::new(&["topic"]);
    fx.add_indexed(topic("t-current", "org-a")).await;
    fx.add_indexed(topic("t-old", "org-a")).await;
    let old = EmbeddingInfo {
        model_id: common::MODEL_ID.to_string(),
        version: "0.9".to_string(),
    };
    fx.records.record_embedding(RecordKind::Topic, "t-old", &old).await.unwrap();
    fx.add(topic("t-new", "org-a"));

    let report = FreshnessScanner::new(fx.records.clone(), Fixture::stamp())
        .scan(RecordKind::Topic, Some("org-a"))
        .await
        .unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.current, 1);
    assert_eq!(report.outdated, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.unsynced, 1);
    assert_eq!(report.outdated_ids, vec!["t-old"]);
    assert_eq!(report.needs_regeneration(), 2);
}

#[tokio::test]
async fn test_regeneration_indexes_and_invalidates() {
    let fx = Fixture::new(&["topic"]);
    fx.add_indexed(topic("t-1", "org-a")).await;
    fx.add(topic("t-2", "org-a"));
    fx.add(topic("t-3", "org-a"));

    let engine = fx.engine();
    let filters = SearchFilters::for_organization("org-a");
    let before = engine.search("topic", &filters, 10, true).await.unwrap();
    assert_eq!(before.len(), 1);

    let regenerator = Regenerator::new(
        fx.embedder.clone(),
        fx.vectors.clone(),
        fx.records.clone(),
        Fixture::runner(),
        Fixture::stamp(),
    )
    .with_cache(fx.cache.clone());

    let report = regenerator
        .regenerate(
            RecordKind::Topic,
            Some("org-a"),
            RegenerationMode::Unsynced,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.selected, 2);
    assert_eq!(report.regenerated, 2);
    assert!(report.errors.is_empty());
    assert_eq!(fx.vectors.count(RecordKind::Topic, Some("org-a")).await.unwrap(), 3);
    assert_eq!(fx.records.counts(RecordKind::Topic, None).unwrap().synced, 3);

    let after = engine.search_detailed("topic", &filters, 10, true).await.unwrap();
    assert!(!after.cache_hit);
    assert_eq!(after.results.len(), 3);

    let outdated = regenerator
        .regenerate(
            RecordKind::Topic,
            Some("org-a"),
            RegenerationMode::Outdated,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outdated.scanned, 3);
    assert_eq!(outdated.selected, 0);
}
