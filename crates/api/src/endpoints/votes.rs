//! Vote endpoints.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tally_common::AppResult;
use tally_core::Voter;

use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::ApiResponse,
};

/// Vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
}

/// Vote response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub created_at: String,
}

/// Best-effort client origin, recorded on anonymous votes.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Cast a vote.
///
/// The voter identity comes from the caller's token, never the body.
async fn vote(
    MaybeAuthUser(maybe_user): MaybeAuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VoteRequest>,
) -> AppResult<ApiResponse<VoteResponse>> {
    let voter = match maybe_user {
        Some(user) => Voter::User(user.id),
        None => Voter::Anonymous {
            ip: client_ip(&headers),
        },
    };

    let vote = state
        .vote_service
        .submit(&req.poll_id, &req.option_id, voter)
        .await?;

    Ok(ApiResponse::ok(VoteResponse {
        id: vote.id,
        poll_id: vote.poll_id,
        option_id: vote.option_id,
        created_at: vote.created_at.to_rfc3339(),
    }))
}

/// Unvote response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnvoteResponse {
    pub ok: bool,
}

/// Retract the caller's own vote for one option.
async fn unvote(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> AppResult<ApiResponse<UnvoteResponse>> {
    state
        .vote_service
        .retract(&req.poll_id, &req.option_id, &user.id)
        .await?;

    Ok(ApiResponse::ok(UnvoteResponse { ok: true }))
}

/// Can-vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanVoteRequest {
    pub poll_id: String,
}

/// Can-vote response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanVoteResponse {
    pub can_vote: bool,
}

/// Check whether the caller may cast another vote on a poll.
async fn can_vote(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CanVoteRequest>,
) -> AppResult<ApiResponse<CanVoteResponse>> {
    let can_vote = state.vote_service.can_vote(&req.poll_id, &user.id).await?;

    Ok(ApiResponse::ok(CanVoteResponse { can_vote }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vote", post(vote))
        .route("/unvote", post(unvote))
        .route("/can-vote", post(can_vote))
}
