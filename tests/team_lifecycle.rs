//! Team creation and membership tests.
//!
//! Team creation is all-or-nothing: the team row and every member row commit
//! together or not at all. A second creation with the same name is rejected
//! and leaves the existing members untouched.

use reviewer_service::error::{AppError, ErrorKind};
use reviewer_service::models::{Team, TeamMember};
use reviewer_service::services::{OpContext, RetryPolicy, ReviewerStore, StoreConfig};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

async fn setup_store() -> (ReviewerStore, TempDir) {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("teams.db"));
    config.retry = RetryPolicy::new(3, Duration::from_millis(5));
    let store = ReviewerStore::connect(&config).await.unwrap();
    (store, dir)
}

fn active_ids(team: &Team) -> Vec<&str> {
    team.members
        .iter()
        .filter(|m| m.is_active)
        .map(|m| m.user_id.as_str())
        .collect()
}

fn backend_team() -> Team {
    Team::new(
        "backend",
        vec![
            TeamMember::new("u1", "Alice", true),
            TeamMember::new("u2", "Bob", true),
            TeamMember::new("u3", "Carol", false),
        ],
    )
}

#[tokio::test]
async fn test_save_and_get_team() {
    let (store, _dir) = setup_store().await;
    let ctx = OpContext::background();

    store.save_team(&ctx, &backend_team()).await.unwrap();

    let team = store.get_team(&ctx, "backend").await.unwrap();
    assert_eq!(team, backend_team());
    assert_eq!(active_ids(&team), vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_team_without_members() {
    let (store, _dir) = setup_store().await;
    let ctx = OpContext::background();

    store.save_team(&ctx, &Team::new("empty", vec![])).await.unwrap();

    let team = store.get_team(&ctx, "empty").await.unwrap();
    assert!(team.members.is_empty());
}

#[tokio::test]
async fn test_duplicate_team_is_rejected_and_members_unchanged() {
    let (store, _dir) = setup_store().await;
    let ctx = OpContext::background();
    store.save_team(&ctx, &backend_team()).await.unwrap();

    let again = Team::new("backend", vec![TeamMember::new("u9", "Zed", true)]);
    let err = store.save_team(&ctx, &again).await.unwrap_err();
    assert!(matches!(err, AppError::TeamAlreadyExists { ref team_name } if team_name == "backend"));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(store.get_team(&ctx, "backend").await.unwrap(), backend_team());
    // The rejected payload's member was never written.
    assert!(matches!(
        store.set_user_active(&ctx, "u9", true).await,
        Err(AppError::UserNotFound { .. })
    ));
}

#[tokio::test]
async fn test_duplicate_member_rolls_back_whole_team() {
    let (store, _dir) = setup_store().await;
    let ctx = OpContext::background();

    let team = Team::new(
        "payments",
        vec![
            TeamMember::new("p1", "Pat", true),
            TeamMember::new("p2", "Sam", true),
            TeamMember::new("p1", "Pat again", true),
        ],
    );
    let err = store.save_team(&ctx, &team).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateKey { .. }));

    assert!(matches!(
        store.get_team(&ctx, "payments").await,
        Err(AppError::TeamNotFound { .. })
    ));

    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(users, 0);

    // Nothing was left behind, so a corrected payload goes through.
    let fixed = Team::new(
        "payments",
        vec![TeamMember::new("p1", "Pat", true), TeamMember::new("p2", "Sam", true)],
    );
    store.save_team(&ctx, &fixed).await.unwrap();
    assert_eq!(store.get_team(&ctx, "payments").await.unwrap().members.len(), 2);
}

#[tokio::test]
async fn test_get_unknown_team() {
    let (store, _dir) = setup_store().await;
    let err = store
        .get_team(&OpContext::background(), "nobody")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TeamNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_set_user_active_returns_updated_user() {
    let (store, _dir) = setup_store().await;
    let ctx = OpContext::background();
    store.save_team(&ctx, &backend_team()).await.unwrap();

    let user = store.set_user_active(&ctx, "u3", true).await.unwrap();
    assert_eq!(user.user_id, "u3");
    assert_eq!(user.username, "Carol");
    assert_eq!(user.team_name, "backend");
    assert!(user.is_active);

    let user = store.set_user_active(&ctx, "u1", false).await.unwrap();
    assert!(!user.is_active);

    let team = store.get_team(&ctx, "backend").await.unwrap();
    assert_eq!(active_ids(&team), vec!["u2", "u3"]);
}

#[tokio::test]
async fn test_set_unknown_user_active() {
    let (store, _dir) = setup_store().await;
    let err = store
        .set_user_active(&OpContext::background(), "ghost", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound { ref user_id } if user_id == "ghost"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creators_of_same_team() {
    let (store, _dir) = setup_store().await;

    let tasks: Vec<_> = ["x1", "x2"]
        .into_iter()
        .map(|member| {
            let store = store.clone();
            tokio::spawn(async move {
                let team = Team::new("racers", vec![TeamMember::new(member, "Racer", true)]);
                store.save_team(&OpContext::background(), &team).await
            })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => created += 1,
            Err(AppError::TeamAlreadyExists { team_name }) => {
                assert_eq!(team_name, "racers");
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!((created, rejected), (1, 1));

    // Only the winner's member was written.
    let team = store.get_team(&OpContext::background(), "racers").await.unwrap();
    assert_eq!(team.members.len(), 1);
    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(users, 1);
}
