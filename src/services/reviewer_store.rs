//! Persistence gateway for teams, users and pull requests.
//!
//! [`ReviewerStore`] is the only writer of durable state. Every public
//! operation narrows the caller's [`OpContext`] by the store timeout and runs
//! its store access through [`with_retry`]. Multi-row writes are single
//! transactions; a failed attempt drops its transaction, which rolls it back.

use crate::db;
use crate::db::pool::{DbPool, PoolSettings};
use crate::error::AppError;
use crate::models::pull_request::from_millis;
use crate::models::{
    NewPullRequest, PullRequest, PullRequestRecord, PullRequestStatus, PullRequestSummary,
    Reassignment, Team, TeamMember, User,
};
use crate::services::context::OpContext;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::reviewer_selection::{
    select_initial_reviewers, select_replacement, shuffle_candidates,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to open a [`ReviewerStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub pool: PoolSettings,
    /// Upper bound for one gateway operation, retries included.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Fixed seed for reviewer selection; entropy when unset.
    pub seed: Option<u64>,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pool: PoolSettings::default(),
            timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            seed: None,
        }
    }
}

/// Handle to the reviewer database. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct ReviewerStore {
    pool: DbPool,
    retry: RetryPolicy,
    timeout: Duration,
    seed: Option<u64>,
}

impl ReviewerStore {
    /// Open the database, apply migrations and build the store.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let pool = db::initialize(&config.db_path, &config.pool).await?;
        log::info!("[store] connected to {}", config.db_path.display());
        Ok(Self::with_pool(pool, config))
    }

    /// Wrap an already migrated pool.
    pub fn with_pool(pool: DbPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            retry: config.retry,
            timeout: config.timeout,
            seed: config.seed,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Close every pooled connection. Pending acquires fail with `PoolClosed`.
    pub async fn close(&self) {
        self.pool.close().await;
        log::info!("[store] closed");
    }

    fn scoped(&self, ctx: &OpContext) -> OpContext {
        ctx.child_with_timeout(self.timeout)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Round-trip to the database.
    pub async fn ping(&self, ctx: &OpContext) -> Result<(), AppError> {
        let ctx = self.scoped(ctx);
        with_retry(&ctx, &self.retry, "ping", || ping(&self.pool)).await
    }

    /// Create a team and all its members atomically.
    pub async fn save_team(&self, ctx: &OpContext, team: &Team) -> Result<(), AppError> {
        require_id(&team.team_name, "team_name")?;
        for member in &team.members {
            require_id(&member.user_id, "user_id")?;
        }

        let ctx = self.scoped(ctx);
        let exists = with_retry(&ctx, &self.retry, "save_team.exists", || {
            team_exists(&self.pool, &team.team_name)
        })
        .await?;
        if exists {
            return Err(AppError::TeamAlreadyExists {
                team_name: team.team_name.clone(),
            });
        }

        with_retry(&ctx, &self.retry, "save_team", || insert_team(&self.pool, team)).await?;

        log::info!(
            "[store] saved team {} with {} members",
            team.team_name,
            team.members.len()
        );
        Ok(())
    }

    /// Load a team with its members ordered by user id.
    pub async fn get_team(&self, ctx: &OpContext, team_name: &str) -> Result<Team, AppError> {
        require_id(team_name, "team_name")?;
        let ctx = self.scoped(ctx);
        with_retry(&ctx, &self.retry, "get_team", || fetch_team(&self.pool, team_name))
            .await?
            .ok_or_else(|| AppError::team_not_found(team_name))
    }

    /// Flip a user's availability and return the updated user.
    pub async fn set_user_active(
        &self,
        ctx: &OpContext,
        user_id: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        require_id(user_id, "user_id")?;
        let ctx = self.scoped(ctx);
        let user = with_retry(&ctx, &self.retry, "set_user_active", || {
            update_user_active(&self.pool, user_id, is_active)
        })
        .await?
        .ok_or_else(|| AppError::user_not_found(user_id))?;

        log::info!("[store] user {} is_active={}", user.user_id, user.is_active);
        Ok(user)
    }

    /// Create an OPEN pull request with reviewers picked from the author's team.
    pub async fn save_new_pull_request(
        &self,
        ctx: &OpContext,
        new_pr: &NewPullRequest,
    ) -> Result<PullRequest, AppError> {
        require_id(&new_pr.pull_request_id, "pull_request_id")?;
        require_id(&new_pr.author_id, "author_id")?;

        let ctx = self.scoped(ctx);
        let created_at = Utc::now().timestamp_millis();
        let pr = with_retry(&ctx, &self.retry, "save_new_pull_request", || {
            insert_pull_request(&self.pool, new_pr, created_at, self.rng())
        })
        .await?;

        log::info!(
            "[store] created pull request {} by {} with reviewers {:?}",
            pr.pull_request_id,
            pr.author_id,
            pr.assigned_reviewers
        );
        Ok(pr)
    }

    pub async fn get_pull_request(
        &self,
        ctx: &OpContext,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError> {
        require_id(pull_request_id, "pull_request_id")?;
        let ctx = self.scoped(ctx);
        let record = with_retry(&ctx, &self.retry, "get_pull_request", || {
            fetch_pull_request_by_id(&self.pool, pull_request_id)
        })
        .await?;

        record
            .ok_or_else(|| AppError::pull_request_not_found(pull_request_id))?
            .into_pull_request()
    }

    /// Move a pull request to `status`. Merging twice keeps the first `merged_at`.
    pub async fn set_pull_request_status(
        &self,
        ctx: &OpContext,
        pull_request_id: &str,
        status: PullRequestStatus,
        when: DateTime<Utc>,
    ) -> Result<PullRequest, AppError> {
        require_id(pull_request_id, "pull_request_id")?;
        // Stored with millisecond precision.
        let when = from_millis(when.timestamp_millis())?;

        let ctx = self.scoped(ctx);
        let pr = with_retry(&ctx, &self.retry, "set_pull_request_status", || {
            update_status(&self.pool, pull_request_id, status, when)
        })
        .await?;

        log::info!("[store] pull request {} is {}", pr.pull_request_id, pr.status);
        Ok(pr)
    }

    /// Replace `old_user_id` on an open pull request with another active
    /// member of that reviewer's team.
    pub async fn reassign_reviewer(
        &self,
        ctx: &OpContext,
        pull_request_id: &str,
        old_user_id: &str,
    ) -> Result<Reassignment, AppError> {
        require_id(pull_request_id, "pull_request_id")?;
        require_id(old_user_id, "old_user_id")?;

        let ctx = self.scoped(ctx);
        let reassignment = with_retry(&ctx, &self.retry, "reassign_reviewer", || {
            swap_reviewer(&self.pool, pull_request_id, old_user_id, self.rng())
        })
        .await?;

        log::info!(
            "[store] pull request {}: reviewer {} replaced by {}",
            pull_request_id,
            old_user_id,
            reassignment.replaced_by
        );
        Ok(reassignment)
    }

    /// Pull requests (open and merged) that list `user_id` as a reviewer,
    /// oldest first.
    pub async fn list_pull_requests_for_reviewer(
        &self,
        ctx: &OpContext,
        user_id: &str,
    ) -> Result<Vec<PullRequestSummary>, AppError> {
        require_id(user_id, "user_id")?;
        let ctx = self.scoped(ctx);
        let records = with_retry(&ctx, &self.retry, "list_pull_requests_for_reviewer", || {
            fetch_reviewer_pull_requests(&self.pool, user_id)
        })
        .await?;

        records
            .into_iter()
            .map(|r| r.into_pull_request().map(PullRequestSummary::from))
            .collect()
    }
}

fn require_id(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::invalid_input_field(
            format!("{} must not be empty", field),
            field,
        ));
    }
    Ok(())
}

fn expect_one_row(rows_affected: u64, operation: &str) -> Result<(), AppError> {
    if rows_affected != 1 {
        return Err(AppError::internal(format!(
            "{}: expected 1 affected row, got {}",
            operation, rows_affected
        )));
    }
    Ok(())
}

/// Start a transaction that holds the write lock from its first statement.
///
/// Deferred transactions that read before writing cannot wait for the lock:
/// SQLite fails the upgrade at once. `BEGIN IMMEDIATE` queues in the busy
/// handler instead, so concurrent writers serialize.
async fn begin_write(
    pool: &DbPool,
    operation: &str,
) -> Result<Transaction<'static, Sqlite>, AppError> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|e| AppError::store(operation, e))
}

const PULL_REQUEST_COLUMNS: &str = "pull_request_id, pull_request_name, author_id, status, assigned_reviewers, created_at, merged_at";

async fn ping(pool: &DbPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::store("ping", e))?;
    Ok(())
}

async fn team_exists(pool: &DbPool, team_name: &str) -> Result<bool, AppError> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?)")
            .bind(team_name)
            .fetch_one(pool)
            .await
            .map_err(|e| AppError::store("team_exists", e))?;
    Ok(exists)
}

/// Insert the team row and every member row in one transaction.
async fn insert_team(pool: &DbPool, team: &Team) -> Result<(), AppError> {
    let mut tx = begin_write(pool, "save_team.begin").await?;

    let result = sqlx::query("INSERT INTO teams (team_name) VALUES (?)")
        .bind(&team.team_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| match AppError::store("save_team.insert_team", e) {
            // Another caller created it after our existence check.
            AppError::DuplicateKey { .. } => AppError::TeamAlreadyExists {
                team_name: team.team_name.clone(),
            },
            other => other,
        })?;
    expect_one_row(result.rows_affected(), "save_team.insert_team")?;

    for member in &team.members {
        let result = sqlx::query(
            "INSERT INTO users (user_id, username, team_name, is_active) VALUES (?, ?, ?, ?)",
        )
        .bind(&member.user_id)
        .bind(&member.username)
        .bind(&team.team_name)
        .bind(member.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store("save_team.insert_member", e))?;
        expect_one_row(result.rows_affected(), "save_team.insert_member")?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::store("save_team.commit", e))?;
    Ok(())
}

async fn fetch_team(pool: &DbPool, team_name: &str) -> Result<Option<Team>, AppError> {
    if !team_exists(pool, team_name).await? {
        return Ok(None);
    }

    let members = sqlx::query_as::<_, TeamMember>(
        "SELECT user_id, username, is_active FROM users WHERE team_name = ? ORDER BY user_id",
    )
    .bind(team_name)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::store("get_team.members", e))?;

    Ok(Some(Team::new(team_name, members)))
}

async fn update_user_active(
    pool: &DbPool,
    user_id: &str,
    is_active: bool,
) -> Result<Option<User>, AppError> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET is_active = ?
        WHERE user_id = ?
        RETURNING user_id, username, team_name, is_active
        "#,
    )
    .bind(is_active)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::store("set_user_active", e))
}

async fn fetch_user(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<User>, AppError> {
    sqlx::query_as::<_, User>(
        "SELECT user_id, username, team_name, is_active FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::store("fetch_user", e))
}

/// Active members of `team_name`, or `TeamNotFound` if the team row is gone.
async fn fetch_active_members(
    conn: &mut SqliteConnection,
    team_name: &str,
) -> Result<Vec<TeamMember>, AppError> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?)")
            .bind(team_name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AppError::store("fetch_active_members.team", e))?;
    if !exists {
        return Err(AppError::team_not_found(team_name));
    }

    sqlx::query_as::<_, TeamMember>(
        "SELECT user_id, username, is_active FROM users WHERE team_name = ? AND is_active = 1 ORDER BY user_id",
    )
    .bind(team_name)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::store("fetch_active_members", e))
}

async fn fetch_pull_request(
    conn: &mut SqliteConnection,
    pull_request_id: &str,
) -> Result<Option<PullRequestRecord>, AppError> {
    sqlx::query_as::<_, PullRequestRecord>(&format!(
        "SELECT {} FROM pull_requests WHERE pull_request_id = ?",
        PULL_REQUEST_COLUMNS
    ))
    .bind(pull_request_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::store("fetch_pull_request", e))
}

async fn fetch_pull_request_by_id(
    pool: &DbPool,
    pull_request_id: &str,
) -> Result<Option<PullRequestRecord>, AppError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::store("get_pull_request.acquire", e))?;
    fetch_pull_request(&mut conn, pull_request_id).await
}

/// Existence check, author lookup, selection and insert in one transaction.
async fn insert_pull_request(
    pool: &DbPool,
    new_pr: &NewPullRequest,
    created_at: i64,
    mut rng: StdRng,
) -> Result<PullRequest, AppError> {
    let mut tx = begin_write(pool, "save_new_pull_request.begin").await?;

    if fetch_pull_request(&mut tx, &new_pr.pull_request_id)
        .await?
        .is_some()
    {
        return Err(AppError::PullRequestAlreadyExists {
            pull_request_id: new_pr.pull_request_id.clone(),
        });
    }

    let author = fetch_user(&mut tx, &new_pr.author_id)
        .await?
        .ok_or_else(|| AppError::user_not_found(&new_pr.author_id))?;

    let members = fetch_active_members(&mut tx, &author.team_name).await?;
    let reviewers = select_initial_reviewers(&members, &author.user_id, &mut rng);
    if reviewers.is_empty() {
        return Err(AppError::ReviewersNotFound {
            author_id: author.user_id,
        });
    }

    let pr = PullRequest {
        pull_request_id: new_pr.pull_request_id.clone(),
        pull_request_name: new_pr.pull_request_name.clone(),
        author_id: author.user_id,
        status: PullRequestStatus::Open,
        assigned_reviewers: reviewers,
        created_at: from_millis(created_at)?,
        merged_at: None,
    };

    let result = sqlx::query(
        r#"
        INSERT INTO pull_requests (pull_request_id, pull_request_name, author_id, status, assigned_reviewers, created_at, merged_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&pr.pull_request_id)
    .bind(&pr.pull_request_name)
    .bind(&pr.author_id)
    .bind(pr.status.as_str())
    .bind(pr.reviewers_json()?)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| match AppError::store("save_new_pull_request.insert", e) {
        AppError::DuplicateKey { .. } => AppError::PullRequestAlreadyExists {
            pull_request_id: pr.pull_request_id.clone(),
        },
        other => other,
    })?;
    expect_one_row(result.rows_affected(), "save_new_pull_request.insert")?;

    tx.commit()
        .await
        .map_err(|e| AppError::store("save_new_pull_request.commit", e))?;
    Ok(pr)
}

async fn update_status(
    pool: &DbPool,
    pull_request_id: &str,
    status: PullRequestStatus,
    when: DateTime<Utc>,
) -> Result<PullRequest, AppError> {
    let mut tx = begin_write(pool, "set_pull_request_status.begin").await?;

    let mut pr = fetch_pull_request(&mut tx, pull_request_id)
        .await?
        .ok_or_else(|| AppError::pull_request_not_found(pull_request_id))?
        .into_pull_request()?;

    if pr.transition_to(status, when)? {
        let result = sqlx::query(
            r#"
            UPDATE pull_requests
            SET status = ?, merged_at = COALESCE(merged_at, ?)
            WHERE pull_request_id = ?
            "#,
        )
        .bind(pr.status.as_str())
        .bind(pr.merged_at.map(|t| t.timestamp_millis()))
        .bind(pull_request_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store("set_pull_request_status.update", e))?;
        expect_one_row(result.rows_affected(), "set_pull_request_status.update")?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::store("set_pull_request_status.commit", e))?;
    Ok(pr)
}

/// Read, pick a replacement and write back in one transaction.
///
/// The update only matches while the row still holds the reviewer list read
/// at the start, so a concurrent swap turns into `ConcurrentModification`
/// and the whole unit is retried against fresh state.
async fn swap_reviewer(
    pool: &DbPool,
    pull_request_id: &str,
    old_user_id: &str,
    mut rng: StdRng,
) -> Result<Reassignment, AppError> {
    let mut tx = begin_write(pool, "reassign_reviewer.begin").await?;

    let record = fetch_pull_request(&mut tx, pull_request_id)
        .await?
        .ok_or_else(|| AppError::pull_request_not_found(pull_request_id))?;
    let previous_reviewers = record.assigned_reviewers.clone();
    let mut pr = record.into_pull_request()?;

    pr.ensure_reassignable()?;
    pr.reviewer_slot(old_user_id)?;

    let old_reviewer = fetch_user(&mut tx, old_user_id)
        .await?
        .ok_or_else(|| AppError::user_not_found(old_user_id))?;

    let mut candidates = fetch_active_members(&mut tx, &old_reviewer.team_name).await?;
    shuffle_candidates(&mut candidates, &mut rng);
    let replacement = select_replacement(
        &candidates,
        &pr.assigned_reviewers,
        old_user_id,
        &pr.author_id,
        &pr.pull_request_id,
    )?;
    pr.replace_reviewer(old_user_id, &replacement)?;

    let result = sqlx::query(
        r#"
        UPDATE pull_requests
        SET assigned_reviewers = ?
        WHERE pull_request_id = ? AND assigned_reviewers = ? AND status = 'OPEN'
        "#,
    )
    .bind(pr.reviewers_json()?)
    .bind(pull_request_id)
    .bind(&previous_reviewers)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::store("reassign_reviewer.update", e))?;

    if result.rows_affected() == 0 {
        log::warn!(
            "[store] pull request {} changed during reassignment",
            pull_request_id
        );
        return Err(AppError::ConcurrentModification {
            pull_request_id: pull_request_id.to_string(),
        });
    }

    tx.commit()
        .await
        .map_err(|e| AppError::store("reassign_reviewer.commit", e))?;

    Ok(Reassignment {
        pull_request: pr,
        replaced_by: replacement,
    })
}

async fn fetch_reviewer_pull_requests(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<PullRequestRecord>, AppError> {
    sqlx::query_as::<_, PullRequestRecord>(&format!(
        r#"
        SELECT {} FROM pull_requests pr
        WHERE EXISTS (
            SELECT 1 FROM json_each(pr.assigned_reviewers) r WHERE r.value = ?
        )
        ORDER BY pr.created_at ASC, pr.pull_request_id ASC
        "#,
        PULL_REQUEST_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::store("list_pull_requests_for_reviewer", e))
}
