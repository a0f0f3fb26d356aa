//! Store failure handling tests.
//!
//! Lock contention is transient and retried until the policy or the deadline
//! runs out; schema damage is permanent and surfaces after one attempt.

use reviewer_service::error::{AppError, ErrorKind};
use reviewer_service::models::{NewPullRequest, Team, TeamMember};
use reviewer_service::services::{OpContext, RetryPolicy, ReviewerStore, StoreConfig};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

async fn setup_store(retry: RetryPolicy, timeout: Duration) -> (ReviewerStore, TempDir) {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("resilience.db"));
    config.retry = retry;
    config.timeout = timeout;
    let store = ReviewerStore::connect(&config).await.unwrap();

    store
        .save_team(
            &OpContext::background(),
            &Team::new("backend", vec![TeamMember::new("u1", "Alice", true)]),
        )
        .await
        .unwrap();
    (store, dir)
}

#[tokio::test]
async fn test_missing_table_is_permanent() {
    let (store, _dir) = setup_store(
        RetryPolicy::new(5, Duration::from_secs(1)),
        Duration::from_secs(10),
    )
    .await;

    sqlx::query("DROP TABLE pull_requests")
        .execute(store.pool())
        .await
        .unwrap();

    let started = Instant::now();
    let err = store
        .list_pull_requests_for_reviewer(&OpContext::background(), "u1")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(err.to_string().contains("no such table"));
    // The first backoff alone would take a second.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_locked_database_exhausts_retries() {
    let (store, _dir) = setup_store(
        RetryPolicy::new(2, Duration::from_millis(10)),
        Duration::from_secs(10),
    )
    .await;

    // Hold the write lock on a second connection.
    let mut blocker = store.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *blocker)
        .await
        .unwrap();

    let err = store
        .set_user_active(&OpContext::background(), "u1", false)
        .await
        .unwrap_err();

    match err {
        AppError::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(source.kind(), ErrorKind::Transient);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
    drop(blocker);

    // Once the lock is gone the same call succeeds.
    let user = store
        .set_user_active(&OpContext::background(), "u1", false)
        .await
        .unwrap();
    assert!(!user.is_active);
}

#[tokio::test]
async fn test_deadline_bounds_retrying() {
    let (store, _dir) = setup_store(
        RetryPolicy::new(50, Duration::from_millis(20)),
        Duration::from_millis(300),
    )
    .await;

    let mut blocker = store.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *blocker)
        .await
        .unwrap();

    let started = Instant::now();
    let err = store
        .set_user_active(&OpContext::background(), "u1", false)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
}

#[tokio::test]
async fn test_caller_deadline_wins_over_store_timeout() {
    let (store, _dir) = setup_store(
        RetryPolicy::new(50, Duration::from_millis(20)),
        Duration::from_secs(30),
    )
    .await;

    let mut blocker = store.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *blocker)
        .await
        .unwrap();

    let started = Instant::now();
    let ctx = OpContext::with_timeout(Duration::from_millis(200));
    let err = store.set_user_active(&ctx, "u1", true).await.unwrap_err();

    assert!(matches!(err, AppError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
}

#[tokio::test]
async fn test_cancellation_stops_retrying() {
    let (store, _dir) = setup_store(
        RetryPolicy::new(50, Duration::from_millis(20)),
        Duration::from_secs(30),
    )
    .await;

    let mut blocker = store.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *blocker)
        .await
        .unwrap();

    let ctx = OpContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let err = store.set_user_active(&ctx, "u1", true).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_queue_under_default_settings() {
    let dir = tempdir().unwrap();
    let store = ReviewerStore::connect(&StoreConfig::new(dir.path().join("busy.db")))
        .await
        .unwrap();
    let members = ["a", "b", "c", "d", "e", "f"]
        .iter()
        .map(|id| TeamMember::new(*id, id.to_uppercase(), true))
        .collect();
    store
        .save_team(&OpContext::background(), &Team::new("core", members))
        .await
        .unwrap();

    for round in 0..3 {
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let ctx = OpContext::background();
                    let id = format!("pr-{round}-{i}");
                    let pr = store
                        .save_new_pull_request(&ctx, &NewPullRequest::new(id.as_str(), "Load", "a"))
                        .await?;
                    store
                        .reassign_reviewer(&ctx, &id, &pr.assigned_reviewers[0])
                        .await
                })
            })
            .collect();

        for task in tasks {
            if let Err(err) = task.await.unwrap() {
                panic!("write failed under contention: {err}");
            }
        }
    }

    let (created,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pull_requests")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(created, 48);
}
