//! Signature challenge handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use mixtape_consensus::{
    ActiveChallengeEntry, ChallengeId, ChallengeView, MemberId, QueryWindow, TrackId,
};
use serde::Deserialize;

/// Create challenge request
#[derive(Debug, Deserialize)]
pub struct CreateChallengeRequest {
    pub challenger_id: String,
}

/// Cast vote request
#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub voter_id: String,
    pub agree: bool,
}

/// Batch active-challenge lookup request
#[derive(Debug, Deserialize)]
pub struct ActiveChallengesRequest {
    pub track_ids: Vec<String>,
    #[serde(default)]
    pub viewer_id: Option<String>,
}

/// Viewer used to fill in `viewer_vote`; anonymous when absent.
#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    #[serde(default)]
    pub viewer_id: Option<String>,
}

/// History paging, `limit = 0` returns everything
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub viewer_id: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn viewer(viewer_id: Option<String>) -> MemberId {
    MemberId::new(viewer_id.unwrap_or_default())
}

/// Open a challenge on a track
pub async fn create_challenge(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    body: Result<Json<CreateChallengeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ChallengeView>)> {
    let Json(request) = body?;
    let view = state
        .engine
        .create_challenge(
            &TrackId::new(track_id),
            &MemberId::new(request.challenger_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Record or replace an admin's vote on the track's active challenge
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    body: Result<Json<CastVoteRequest>, JsonRejection>,
) -> ApiResult<Json<ChallengeView>> {
    let Json(request) = body?;
    let view = state
        .engine
        .cast_vote(
            &TrackId::new(track_id),
            &MemberId::new(request.voter_id),
            request.agree,
        )
        .await?;
    Ok(Json(view))
}

/// Active challenge for one track
pub async fn get_active_challenge(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
) -> ApiResult<Json<ActiveChallengeEntry>> {
    let Query(query) = query?;
    let track_id = TrackId::new(track_id);
    let challenge = state
        .engine
        .active_challenge(&track_id, &viewer(query.viewer_id))
        .await?;
    Ok(Json(ActiveChallengeEntry {
        track_id,
        challenge,
    }))
}

/// Active challenges for several tracks, in request order
pub async fn list_active_challenges(
    State(state): State<AppState>,
    body: Result<Json<ActiveChallengesRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<ActiveChallengeEntry>>> {
    let Json(request) = body?;
    let track_ids: Vec<TrackId> = request.track_ids.into_iter().map(TrackId::new).collect();
    let entries = state
        .engine
        .active_challenges(&track_ids, &viewer(request.viewer_id))
        .await?;
    Ok(Json(entries))
}

/// Challenge history for a track, newest first
pub async fn list_track_challenges(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChallengeView>>> {
    let Query(query) = query?;
    let window = QueryWindow {
        limit: query.limit,
        offset: query.offset,
    };
    let views = state
        .engine
        .challenge_history(&TrackId::new(track_id), window, &viewer(query.viewer_id))
        .await?;
    Ok(Json(views))
}

/// A single challenge by id
pub async fn get_challenge(
    State(state): State<AppState>,
    Path(challenge_id): Path<String>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
) -> ApiResult<Json<ChallengeView>> {
    let Query(query) = query?;
    if challenge_id.trim().is_empty() {
        return Err(ApiError::Validation("challenge id must not be empty".into()));
    }
    let view = state
        .engine
        .challenge(&ChallengeId::new(challenge_id), &viewer(query.viewer_id))
        .await?;
    Ok(Json(view))
}
