//! REST API routes over the reviewer store.
//!
//! Each handler gives the store a fresh [`OpContext`] bounded by the
//! configured request timeout and maps [`AppError`] variants onto stable
//! error codes.

use crate::error::{AppError, ErrorKind};
use crate::models::{NewPullRequest, PullRequest, PullRequestStatus, PullRequestSummary, Team, User};
use crate::services::context::OpContext;
use crate::services::reviewer_store::ReviewerStore;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: ReviewerStore,
    pub request_timeout: Duration,
    /// Cancelled on server shutdown; every request context is a child of it.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(store: ReviewerStore, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn context(&self) -> OpContext {
        OpContext::with_timeout(self.request_timeout)
            .with_cancel_token(self.shutdown.child_token())
    }
}

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(pub AppError);

impl ApiErr {
    /// HTTP status and stable code for an error.
    pub fn status_and_code(err: &AppError) -> (StatusCode, &'static str) {
        match err {
            AppError::TeamAlreadyExists { .. } => (StatusCode::BAD_REQUEST, "TEAM_EXISTS"),
            AppError::PullRequestAlreadyExists { .. } => (StatusCode::CONFLICT, "PR_EXISTS"),
            AppError::PullRequestMerged { .. } => (StatusCode::CONFLICT, "PR_MERGED"),
            AppError::ReviewerNotAssigned { .. } => (StatusCode::CONFLICT, "NOT_ASSIGNED"),
            AppError::NoCandidate { .. } => (StatusCode::CONFLICT, "NO_CANDIDATE"),
            AppError::ReviewersNotFound { .. } => (StatusCode::CONFLICT, "NO_REVIEWERS"),
            AppError::DuplicateKey { .. } => (StatusCode::CONFLICT, "DUPLICATE_KEY"),
            AppError::InvalidStatusTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            AppError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            _ => match err.kind() {
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                ErrorKind::Transient | ErrorKind::Cancelled => {
                    (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = Self::status_and_code(&self.0);
        if status.is_server_error() {
            log::error!("[api] {}: {}", code, self.0);
        } else {
            log::warn!("[api] {}: {}", code, self.0);
        }
        (
            status,
            Json(ApiErrorEnvelope {
                error: ApiErrorBody {
                    code,
                    message: self.0.to_string(),
                },
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        Self(AppError::InvalidInput {
            message: rejection.body_text(),
            field: None,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiErr> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiErr(AppError::invalid_input_field(format!("{} is required", field), field)))
}

// ── Request and response types ───────────────────────────────────────────────

#[derive(Deserialize)]
struct TeamQuery {
    team_name: Option<String>,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct SetIsActiveRequest {
    user_id: String,
    is_active: bool,
}

#[derive(Deserialize)]
struct MergeRequest {
    pull_request_id: String,
}

#[derive(Deserialize)]
struct ReassignRequest {
    pull_request_id: String,
    old_user_id: String,
}

#[derive(Serialize)]
struct TeamResponse {
    team: Team,
}

#[derive(Serialize)]
struct UserResponse {
    user: User,
}

#[derive(Serialize)]
struct PullRequestResponse {
    pull_request: PullRequest,
}

#[derive(Serialize)]
struct ReassignResponse {
    pull_request: PullRequest,
    replaced_by: String,
}

#[derive(Serialize)]
struct ReviewResponse {
    user_id: String,
    pull_requests: Vec<PullRequestSummary>,
}

// ── Route builder ────────────────────────────────────────────────────────────

/// Build the team, user and pull request routes.
pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_review))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route("/health", get(health))
}

async fn add_team(
    State(state): State<ApiState>,
    body: Result<Json<Team>, JsonRejection>,
) -> Result<(StatusCode, Json<TeamResponse>), ApiErr> {
    let Json(team) = body?;
    state.store.save_team(&state.context(), &team).await?;
    Ok((StatusCode::CREATED, Json(TeamResponse { team })))
}

async fn get_team(
    State(state): State<ApiState>,
    Query(query): Query<TeamQuery>,
) -> Result<Json<Team>, ApiErr> {
    let team_name = required(query.team_name, "team_name")?;
    let team = state.store.get_team(&state.context(), &team_name).await?;
    Ok(Json(team))
}

async fn set_is_active(
    State(state): State<ApiState>,
    body: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiErr> {
    let Json(req) = body?;
    let user = state
        .store
        .set_user_active(&state.context(), &req.user_id, req.is_active)
        .await?;
    Ok(Json(UserResponse { user }))
}

async fn get_review(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ReviewResponse>, ApiErr> {
    let user_id = required(query.user_id, "user_id")?;
    let pull_requests = state
        .store
        .list_pull_requests_for_reviewer(&state.context(), &user_id)
        .await?;
    Ok(Json(ReviewResponse {
        user_id,
        pull_requests,
    }))
}

async fn create_pull_request(
    State(state): State<ApiState>,
    body: Result<Json<NewPullRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PullRequestResponse>), ApiErr> {
    let Json(new_pr) = body?;
    let pull_request = state
        .store
        .save_new_pull_request(&state.context(), &new_pr)
        .await?;
    Ok((StatusCode::CREATED, Json(PullRequestResponse { pull_request })))
}

/// Idempotent: merging a merged pull request returns it unchanged.
async fn merge_pull_request(
    State(state): State<ApiState>,
    body: Result<Json<MergeRequest>, JsonRejection>,
) -> Result<Json<PullRequestResponse>, ApiErr> {
    let Json(req) = body?;
    let pull_request = state
        .store
        .set_pull_request_status(
            &state.context(),
            &req.pull_request_id,
            PullRequestStatus::Merged,
            Utc::now(),
        )
        .await?;
    Ok(Json(PullRequestResponse { pull_request }))
}

async fn reassign_reviewer(
    State(state): State<ApiState>,
    body: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignResponse>, ApiErr> {
    let Json(req) = body?;
    let reassignment = state
        .store
        .reassign_reviewer(&state.context(), &req.pull_request_id, &req.old_user_id)
        .await?;
    Ok(Json(ReassignResponse {
        pull_request: reassignment.pull_request,
        replaced_by: reassignment.replaced_by,
    }))
}

async fn health(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiErr> {
    state.store.ping(&state.context()).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
