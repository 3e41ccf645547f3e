//! Poll endpoints.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_common::AppResult;
use tally_core::{CreatePollInput, PollForViewer, UpdatePollInput};
use validator::Validate;

use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::ApiResponse,
};

/// Poll option response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionResponse {
    pub id: String,
    pub text: String,
    pub order_index: i32,
    pub is_voted: bool,
}

/// Poll response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub allow_multiple_votes: bool,
    pub is_anonymous: bool,
    pub max_votes_per_user: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_at: String,
    pub options: Vec<PollOptionResponse>,
    pub is_expired: bool,
    pub can_vote: bool,
}

impl PollResponse {
    fn from_viewer(view: PollForViewer) -> Self {
        let PollForViewer {
            poll,
            options,
            user_votes,
            is_expired,
            can_vote,
        } = view;

        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            is_active: poll.is_active,
            allow_multiple_votes: poll.allow_multiple_votes,
            is_anonymous: poll.is_anonymous,
            max_votes_per_user: poll.max_votes_per_user,
            expires_at: poll.expires_at.map(|e| e.to_rfc3339()),
            created_at: poll.created_at.to_rfc3339(),
            options: options
                .into_iter()
                .map(|option| PollOptionResponse {
                    is_voted: user_votes.contains(&option.id),
                    id: option.id,
                    text: option.text,
                    order_index: option.order_index,
                })
                .collect(),
            is_expired,
            can_vote,
        }
    }
}

/// Create poll request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    #[validate(length(min = 3, max = 255))]
    pub title: String,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    #[validate(length(min = 2, max = 10))]
    pub options: Vec<String>,

    #[serde(default)]
    pub allow_multiple_votes: bool,

    #[serde(default)]
    pub is_anonymous: bool,

    #[serde(default = "default_max_votes")]
    #[validate(range(min = 1))]
    pub max_votes_per_user: i32,

    pub expires_at: Option<DateTime<Utc>>,
}

const fn default_max_votes() -> i32 {
    1
}

/// Create a new poll.
async fn create_poll(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreatePollRequest>,
) -> AppResult<ApiResponse<PollResponse>> {
    req.validate()?;

    let input = CreatePollInput {
        title: req.title,
        description: req.description,
        options: req.options,
        allow_multiple_votes: req.allow_multiple_votes,
        is_anonymous: req.is_anonymous,
        max_votes_per_user: req.max_votes_per_user,
        expires_at: req.expires_at,
    };

    let created = state.poll_service.create(&user.id, input).await?;
    let view = state
        .poll_service
        .get_for_viewer(&created.poll.id, Some(&user.id))
        .await?;

    Ok(ApiResponse::ok(PollResponse::from_viewer(view)))
}

/// Show poll request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowPollRequest {
    pub poll_id: String,
}

/// Get poll details, recording a view.
async fn show_poll(
    MaybeAuthUser(maybe_user): MaybeAuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowPollRequest>,
) -> AppResult<ApiResponse<PollResponse>> {
    let viewer_id = maybe_user.map(|u| u.id);
    let view = state
        .poll_service
        .get_for_viewer(&req.poll_id, viewer_id.as_deref())
        .await?;

    // Views are recorded liberally, with no eligibility check
    state
        .poll_service
        .record_view(&view.poll.id, viewer_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(PollResponse::from_viewer(view)))
}

/// List polls request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPollsRequest {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

const fn default_limit() -> u64 {
    20
}

/// Poll summary response, for listings.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummaryResponse {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_at: String,
    pub total_votes: u64,
}

/// List active polls with their vote counts.
async fn list_polls(
    State(state): State<AppState>,
    Json(req): Json<ListPollsRequest>,
) -> AppResult<ApiResponse<Vec<PollSummaryResponse>>> {
    let limit = req.limit.min(100);
    let polls = state.poll_service.list(limit, req.offset).await?;
    let listed = state.stats_service.attach_vote_counts(polls).await?;

    Ok(ApiResponse::ok(
        listed.into_iter().map(summary_response).collect(),
    ))
}

/// List the caller's own polls, including inactive ones.
async fn my_polls(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<PollSummaryResponse>>> {
    let polls = state.poll_service.list_by_user(&user.id).await?;
    let listed = state.stats_service.attach_vote_counts(polls).await?;

    Ok(ApiResponse::ok(
        listed.into_iter().map(summary_response).collect(),
    ))
}

fn summary_response(entry: tally_core::PollWithVoteCount) -> PollSummaryResponse {
    PollSummaryResponse {
        id: entry.poll.id,
        title: entry.poll.title,
        description: entry.poll.description,
        is_active: entry.poll.is_active,
        expires_at: entry.poll.expires_at.map(|e| e.to_rfc3339()),
        created_at: entry.poll.created_at.to_rfc3339(),
        total_votes: entry.total_votes,
    }
}

/// Update poll request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollRequest {
    pub poll_id: String,

    #[validate(length(min = 3, max = 255))]
    pub title: Option<String>,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,

    pub is_active: Option<bool>,
}

/// Update a poll (creator only).
async fn update_poll(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdatePollRequest>,
) -> AppResult<ApiResponse<PollResponse>> {
    req.validate()?;

    let input = UpdatePollInput {
        title: req.title,
        description: req.description,
        expires_at: req.expires_at,
        is_active: req.is_active,
    };

    let poll = state
        .poll_service
        .update(&user.id, &req.poll_id, input)
        .await?;
    let view = state
        .poll_service
        .get_for_viewer(&poll.id, Some(&user.id))
        .await?;

    Ok(ApiResponse::ok(PollResponse::from_viewer(view)))
}

/// Delete poll request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePollRequest {
    pub poll_id: String,
}

/// Delete poll response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePollResponse {
    pub ok: bool,
}

/// Delete a poll and everything under it (creator only).
async fn delete_poll(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<DeletePollRequest>,
) -> AppResult<ApiResponse<DeletePollResponse>> {
    state.poll_service.delete(&user.id, &req.poll_id).await?;

    Ok(ApiResponse::ok(DeletePollResponse { ok: true }))
}

/// Poll stats request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatsRequest {
    pub poll_id: String,
}

/// Per-option stats response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionStatResponse {
    pub option_id: String,
    pub text: String,
    pub vote_count: u64,
    pub percentage: f64,
}

/// Poll stats response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatsResponse {
    pub poll_id: String,
    pub total_votes: u64,
    pub total_views: u64,
    pub unique_voters: u64,
    pub options: Vec<OptionStatResponse>,
}

/// Get a poll's voting statistics.
async fn poll_stats(
    MaybeAuthUser(maybe_user): MaybeAuthUser,
    State(state): State<AppState>,
    Json(req): Json<PollStatsRequest>,
) -> AppResult<ApiResponse<PollStatsResponse>> {
    let viewer_id = maybe_user.map(|u| u.id);
    let stats = state
        .stats_service
        .poll_stats(&req.poll_id, viewer_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(PollStatsResponse {
        poll_id: stats.poll_id,
        total_votes: stats.total_votes,
        total_views: stats.total_views,
        unique_voters: stats.unique_voters,
        options: stats
            .options
            .into_iter()
            .map(|option| OptionStatResponse {
                option_id: option.option_id,
                text: option.text,
                vote_count: option.vote_count,
                percentage: option.percentage,
            })
            .collect(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_poll))
        .route("/show", post(show_poll))
        .route("/list", post(list_polls))
        .route("/mine", post(my_polls))
        .route("/update", post(update_poll))
        .route("/delete", post(delete_poll))
        .route("/stats", post(poll_stats))
}
