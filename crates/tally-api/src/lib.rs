pub mod auth;
pub mod error;
pub mod loaders;
pub mod middleware;
pub mod posts;
pub mod state;
pub mod votes;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post},
};

pub use state::{AppState, AppStateInner};

/// All routes. Public reads resolve the viewer from an optional token;
/// mutations go through `require_auth`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/posts", get(posts::feed))
        .route("/posts/{post_id}", get(posts::get_post))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}", patch(posts::update_post).delete(posts::delete_post))
        .route("/posts/{post_id}/vote", post(votes::vote))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> &'static str {
    "OK"
}
