use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};

use tally_db::feed::PageRequest;
use tally_db::models::PostRow;
use tally_types::TallyError;
use tally_types::api::{Claims, CreatePostRequest, DeletePostResponse, FeedResponse, UpdatePostRequest};
use tally_types::models::Post;

use crate::error::ApiError;
use crate::loaders::RequestLoaders;
use crate::middleware::Viewer;
use crate::state::{AppState, with_db};

const MAX_TITLE_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Id of the last post from the previous page.
    pub cursor: Option<i64>,
}

fn default_limit() -> i64 {
    20
}

pub async fn feed(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    let request = PageRequest::new(query.limit, query.cursor)?;
    let page = with_db(&state, move |db| db.feed_page(&request)).await?;

    let posts: Vec<Post> = page.items.into_iter().map(PostRow::into_post).collect();
    let next_cursor = posts.last().map(|p| p.id);

    let loaders = RequestLoaders::new(&state, viewer.id());
    let items = loaders.render_all(posts).await?;

    let (vote_batches, author_batches) = loaders.batches_issued();
    debug!(
        items = items.len(),
        has_more = page.has_more,
        vote_batches,
        author_batches,
        "feed page resolved"
    );

    Ok(Json(FeedResponse {
        items,
        has_more: page.has_more,
        next_cursor,
    }))
}

pub async fn get_post(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = with_db(&state, move |db| db.get_post(post_id))
        .await?
        .ok_or(TallyError::PostNotFound)?;

    let loaders = RequestLoaders::new(&state, viewer.id());
    Ok(Json(loaders.render(row.into_post()).await?))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    let body = req.body.trim().to_string();
    validate_title(&title)?;
    validate_body(&body)?;

    let author_id = claims.sub.to_string();
    let row = with_db(&state, move |db| db.insert_post(&author_id, &title, &body)).await?;
    info!(post_id = row.id, author = %claims.sub, "post created");

    Ok((StatusCode::CREATED, Json(row.into_post())))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.map(|t| t.trim().to_string());
    let body = req.body.map(|b| b.trim().to_string());
    if let Some(title) = title.as_deref().filter(|t| !t.is_empty()) {
        validate_title(title)?;
    }
    if let Some(body) = body.as_deref() {
        validate_body(body)?;
    }

    let author_id = claims.sub.to_string();
    let row = with_db(&state, move |db| {
        db.update_post(post_id, &author_id, title.as_deref(), body.as_deref())
    })
    .await?
    .ok_or(TallyError::PostNotFound)?;

    Ok(Json(row.into_post()))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let author_id = claims.sub.to_string();
    let deleted = with_db(&state, move |db| db.delete_post(post_id, &author_id)).await?;
    if deleted {
        info!(post_id, author = %claims.sub, "post deleted");
    }

    Ok(Json(DeletePostResponse { deleted }))
}

fn validate_title(title: &str) -> Result<(), TallyError> {
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_CHARS {
        return Err(TallyError::InvalidInput(format!(
            "title must be 1-{} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(())
}

fn validate_body(body: &str) -> Result<(), TallyError> {
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(TallyError::InvalidInput(format!(
            "body must be at most {} characters",
            MAX_BODY_CHARS
        )));
    }
    Ok(())
}
