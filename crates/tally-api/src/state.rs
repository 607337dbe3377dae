use std::sync::Arc;

use tally_db::Database;
use tally_types::TallyError;
use tracing::error;

pub type AppState = Arc<AppStateInner>;

/// Process-wide state: one database handle shared by every request.
pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

/// Run a blocking database call off the async runtime.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, TallyError>
where
    F: FnOnce(&Database) -> Result<T, TallyError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            TallyError::StorageUnavailable(e.to_string())
        })?
}
