use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;

use tally_types::api::{Claims, VoteRequest, VoteResponse};

use crate::error::ApiError;
use crate::state::{AppState, with_db};

/// Toggle the caller's vote on a post. Re-sending the same sign cancels the
/// vote, the opposite sign switches it.
pub async fn vote(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    let voter_id = claims.sub.to_string();
    let (row, vote_status) =
        with_db(&state, move |db| db.apply_vote(&voter_id, post_id, req.value)).await?;

    debug!(post_id, voter = %claims.sub, score = row.score, "vote recorded");
    Ok(Json(VoteResponse {
        post: row.into_post(),
        vote_status,
    }))
}
