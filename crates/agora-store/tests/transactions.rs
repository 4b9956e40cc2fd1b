//! Transaction runner integration tests.
//!
//! Each test opens its own SQLite file, so WAL isolation and the writer
//! permit behave as they do in production.
//!
//! Covers the runner's guarantees:
//!
//! 1. Commit on success
//! 2. Rollback when the body returns an error, panics, or is cancelled
//! 3. Every wait stops at the request deadline
//! 4. Expiry sweeps and the event outbox

use agora_core::RequestContext;
use agora_store::{
    AudienceTag, Database, FoldChange, NewNotification, NewPost, PoolConfig, Purged, StoreError,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn post(id: i64, audience: AudienceTag) -> NewPost {
    NewPost {
        id: Some(id),
        creator_id: 7,
        group_id: 0,
        audience,
        body: format!("post {id}"),
        image_id: None,
        created_at: Utc::now(),
    }
}

fn config(dir: &TempDir) -> PoolConfig {
    PoolConfig {
        max_connections: 4,
        acquire_timeout: Duration::from_secs(2),
        ..PoolConfig::file(dir.path().join("agora.db"))
    }
}

async fn open() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(config(&dir)).await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn commits_all_statements_on_success() {
    let (_dir, db) = open().await;
    db.run_tx(|tx| {
        Box::pin(async move {
            tx.insert_post(post(10, AudienceTag::Selected)).await?;
            tx.add_audience_member(10, 3).await?;
            tx.add_audience_member(10, 4).await?;
            Ok::<_, StoreError>(())
        })
    })
    .await
    .unwrap();

    assert_eq!(db.post(10).await.unwrap().id, 10);
    assert!(db.is_audience_member(10, 3).await.unwrap());
    assert!(db.is_audience_member(10, 4).await.unwrap());
}

#[tokio::test]
async fn constraint_violation_rolls_back_earlier_insert() {
    let (_dir, db) = open().await;
    let result = db
        .run_tx(|tx| {
            Box::pin(async move {
                tx.insert_post(post(200, AudienceTag::Selected)).await?;
                tx.add_audience_member(200, 5).await?;
                tx.add_audience_member(200, 5).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await;

    assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
    assert!(matches!(
        db.post(200).await,
        Err(StoreError::NotFound { entity: "post", id: 200 })
    ));
    assert!(!db.is_audience_member(200, 5).await.unwrap());
}

#[tokio::test]
async fn audience_rows_need_their_post() {
    let (_dir, db) = open().await;
    let mut tx = db.begin().await.unwrap();
    assert!(matches!(
        tx.add_audience_member(999, 1).await,
        Err(StoreError::ForeignKeyViolation { .. })
    ));
}

#[tokio::test]
async fn panic_in_body_rolls_back() {
    let (_dir, db) = open().await;
    let handle = {
        let db = db.clone();
        tokio::spawn(async move {
            db.run_tx(|tx| {
                Box::pin(async move {
                    tx.insert_post(post(31, AudienceTag::Public)).await?;
                    let bug = tx.post(31).await?.is_some();
                    assert!(!bug, "handler bug");
                    Ok::<_, StoreError>(())
                })
            })
            .await
        })
    };

    assert!(handle.await.unwrap_err().is_panic());
    assert!(db.post(31).await.is_err());
    // The writer permit came back with the dropped transaction.
    db.begin().await.unwrap().commit().await.unwrap();
}

#[tokio::test]
async fn cancelled_transaction_rolls_back() {
    let (_dir, db) = open().await;
    let run = db.run_tx(|tx| {
        Box::pin(async move {
            tx.insert_post(post(42, AudienceTag::Public)).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        })
    });

    let outcome = tokio::time::timeout(Duration::from_millis(50), run).await;
    assert!(outcome.is_err());
    assert!(db.post(42).await.is_err());
    db.begin().await.unwrap().commit().await.unwrap();
}

#[tokio::test]
async fn request_deadline_rolls_back_slow_body() {
    let (_dir, db) = open().await;
    let ctx = RequestContext::builder()
        .timeout(Duration::from_millis(100))
        .build();

    let result = db
        .run_tx_for(&ctx, |tx| {
            Box::pin(async move {
                tx.insert_post(post(55, AudienceTag::Public)).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, StoreError>(())
            })
        })
        .await;

    assert_eq!(result.unwrap_err(), StoreError::DeadlineExceeded);
    assert!(db.post(55).await.is_err());
}

#[tokio::test]
async fn waiting_for_the_writer_stops_at_request_deadline() {
    let (_dir, db) = open().await;
    let mut held = db.begin().await.unwrap();
    held.insert_post(post(1, AudienceTag::Public)).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ctx = RequestContext::builder()
        .timeout(Duration::from_millis(50))
        .build();
    let started = Instant::now();
    let result = {
        let ran = Arc::clone(&ran);
        db.run_tx_for(&ctx, move |tx| {
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                tx.insert_post(post(2, AudienceTag::Public)).await
            })
        })
        .await
    };

    assert_eq!(result.unwrap_err(), StoreError::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!ran.load(Ordering::SeqCst));

    held.commit().await.unwrap();
    assert!(db.post(1).await.is_ok());
    assert!(db.post(2).await.is_err());
}

#[tokio::test]
async fn passed_deadline_never_runs_body() {
    let (_dir, db) = open().await;
    let ctx = RequestContext::builder()
        .started_at(Instant::now() - Duration::from_secs(1))
        .timeout(Duration::from_millis(10))
        .build();

    let ran = Arc::new(AtomicBool::new(false));
    let result = {
        let ran = Arc::clone(&ran);
        db.run_tx_for(&ctx, move |tx| {
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                tx.insert_post(post(3, AudienceTag::Public)).await
            })
        })
        .await
    };

    assert_eq!(result.unwrap_err(), StoreError::DeadlineExceeded);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(
        db.connection_for(&ctx).await.unwrap_err(),
        StoreError::DeadlineExceeded
    );
}

#[tokio::test]
async fn explicit_begin_without_commit_rolls_back() {
    let (_dir, db) = open().await;
    {
        let mut tx = db.begin().await.unwrap();
        tx.insert_post(post(60, AudienceTag::Public)).await.unwrap();
        assert!(tx.post(60).await.unwrap().is_some());
    }
    assert!(db.post(60).await.is_err());

    let mut tx = db.begin().await.unwrap();
    tx.insert_post(post(61, AudienceTag::Public)).await.unwrap();
    tx.commit().await.unwrap();
    assert!(db.post(61).await.is_ok());
}

#[tokio::test]
async fn readers_only_see_committed_writes() {
    let (_dir, db) = open().await;
    let mut tx = db.begin().await.unwrap();
    tx.insert_post(post(70, AudienceTag::Public)).await.unwrap();
    assert!(tx.toggle_reaction(70, 1, Utc::now()).await.unwrap());

    let mut reader = db.connection().await.unwrap();
    assert!(reader.post(70).await.unwrap().is_none());

    tx.commit().await.unwrap();
    assert!(reader.post(70).await.unwrap().is_some());
    assert_eq!(reader.reaction_count(70).await.unwrap(), 1);
}

#[tokio::test]
async fn deleting_a_post_cascades() {
    let (_dir, db) = open().await;
    let mut tx = db.begin().await.unwrap();
    tx.insert_post(post(80, AudienceTag::Selected)).await.unwrap();
    tx.add_audience_member(80, 2).await.unwrap();
    tx.toggle_reaction(80, 2, Utc::now()).await.unwrap();
    tx.delete_post(80).await.unwrap();
    assert!(!tx.is_audience_member(80, 2).await.unwrap());
    assert_eq!(tx.reaction_count(80).await.unwrap(), 0);
    assert!(matches!(
        tx.delete_post(80).await,
        Err(StoreError::NotFound { entity: "post", id: 80 })
    ));
}

#[tokio::test]
async fn folds_into_the_newest_unseen_row() {
    let (_dir, db) = open().await;
    let now = Utc::now();
    let mut tx = db.begin().await.unwrap();
    let id = tx
        .insert_notification(NewNotification {
            recipient: 9,
            kind: "post_liked".into(),
            source_service: "posts".into(),
            source_entity: 5,
            needs_action: false,
            payload: [("post_id".to_string(), "5".to_string())].into(),
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            aggregated_actor: Some(1),
        })
        .await
        .unwrap();

    let since = now - chrono::Duration::hours(1);
    assert_eq!(
        tx.find_aggregation_target(9, "post_liked", 5, since).await.unwrap(),
        Some(id)
    );
    assert_eq!(tx.find_aggregation_target(9, "post_liked", 6, since).await.unwrap(), None);

    assert_eq!(tx.fold_actor(id, 2, now).await.unwrap(), FoldChange::Added);
    assert_eq!(tx.fold_actor(id, 2, now).await.unwrap(), FoldChange::AlreadyPresent);
    let row = tx.notification(id).await.unwrap().unwrap();
    assert_eq!(row.aggregated_count, Some(2));
    assert_eq!(row.aggregated_ids, vec![1, 2]);
    assert_eq!(row.payload["post_id"], "5");

    assert_eq!(tx.mark_seen(9, &[id]).await.unwrap(), 1);
    assert_eq!(tx.find_aggregation_target(9, "post_liked", 5, since).await.unwrap(), None);
}

#[tokio::test]
async fn notifications_must_expire_after_creation() {
    let (_dir, db) = open().await;
    let now = Utc::now();
    let mut tx = db.begin().await.unwrap();
    let result = tx
        .insert_notification(NewNotification {
            recipient: 1,
            kind: "follow_request".into(),
            source_service: "social".into(),
            source_entity: 1,
            needs_action: true,
            payload: Default::default(),
            created_at: now,
            expires_at: now,
            aggregated_actor: None,
        })
        .await;
    assert!(matches!(result, Err(StoreError::CheckViolation { .. })));
}

#[tokio::test]
async fn purge_drops_expired_delivery_markers() {
    let (_dir, db) = open().await;
    let now = Utc::now();
    let mut tx = db.begin().await.unwrap();
    assert!(tx.record_delivery("old", 1, now - chrono::Duration::seconds(1)).await.unwrap());
    assert!(tx.record_delivery("fresh", 1, now + chrono::Duration::days(1)).await.unwrap());
    assert!(!tx.record_delivery("fresh", 1, now + chrono::Duration::days(1)).await.unwrap());
    tx.commit().await.unwrap();
    assert_eq!(db.delivery_count().await.unwrap(), 2);

    let purged = db.purge_expired(now).await.unwrap();
    assert_eq!(
        purged,
        Purged {
            notifications: 0,
            deliveries: 1
        }
    );
    assert_eq!(db.delivery_count().await.unwrap(), 1);
    let mut conn = db.connection().await.unwrap();
    assert!(conn.was_delivered("fresh", 1).await.unwrap());
    assert!(!conn.was_delivered("old", 1).await.unwrap());
}

#[tokio::test]
async fn outbox_follows_the_writing_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(config(&dir)).await.unwrap();
    let now = Utc::now();

    let mut kept = db.begin().await.unwrap();
    let first = kept.append_event(b"first", now).await.unwrap();
    kept.commit().await.unwrap();

    let mut dropped = db.begin().await.unwrap();
    dropped.append_event(b"dropped", now).await.unwrap();
    dropped.rollback().await.unwrap();

    let mut kept = db.begin().await.unwrap();
    let second = kept.append_event(b"second", now).await.unwrap();
    kept.commit().await.unwrap();
    assert!(second > first);

    let mut conn = db.connection().await.unwrap();
    let pending = conn.pending_events(10).await.unwrap();
    let payloads: Vec<&[u8]> = pending.iter().map(|e| e.payload.as_slice()).collect();
    assert_eq!(payloads, [b"first".as_slice(), b"second".as_slice()]);
    drop(conn);

    // Records survive a restart until committed.
    db.close().await;
    let db = Database::connect(config(&dir)).await.unwrap();
    let mut tx = db.begin().await.unwrap();
    assert_eq!(tx.commit_events(first).await.unwrap(), 1);
    assert!(matches!(
        tx.commit_events(second + 10).await,
        Err(StoreError::NotFound { .. })
    ));
    tx.commit().await.unwrap();

    let mut conn = db.connection().await.unwrap();
    assert_eq!(conn.event_backlog().await.unwrap(), 1);
    assert_eq!(conn.pending_events(10).await.unwrap()[0].position, second);
}

#[tokio::test]
async fn aggregation_lookup_uses_its_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let db = Database::connect(config.clone()).await.unwrap();
    drop(db);

    let pool = sqlx::SqlitePool::connect(&config.url).await.unwrap();
    let plan: Vec<(i64, i64, i64, String)> = sqlx::query_as(
        "EXPLAIN QUERY PLAN SELECT id FROM notifications \
         WHERE recipient = 1 AND kind = 'post_liked' AND source_entity = 1 AND created_at >= 0 \
           AND seen = FALSE AND aggregated_count IS NOT NULL \
         ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(
        plan.iter()
            .any(|(_, _, _, detail)| detail.contains("notifications_aggregation_idx")),
        "{plan:?}"
    );
}
