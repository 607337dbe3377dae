use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Post, TextSnippet, VoteStatus};

// -- JWT Claims --

/// JWT claims issued at login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletePostResponse {
    pub deleted: bool,
}

/// Public author fields. Credentials never leave the db layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: Uuid,
    pub username: String,
}

/// A post as rendered for one viewer.
#[derive(Debug, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub text_snippet: TextSnippet,
    pub vote_status: VoteStatus,
    /// `None` when the author row no longer exists.
    pub author: Option<Author>,
}

// -- Feed --

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub items: Vec<PostView>,
    pub has_more: bool,
    pub next_cursor: Option<i64>,
}

// -- Votes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    pub value: i64,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub post: Post,
    pub vote_status: VoteStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
