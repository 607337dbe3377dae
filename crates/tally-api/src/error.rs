use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tally_types::TallyError;
use tally_types::api::ErrorBody;
use tracing::error;

/// HTTP face of [`TallyError`].
#[derive(Debug)]
pub struct ApiError(pub TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TallyError>() {
            Ok(err) => Self(err),
            Err(err) => Self(TallyError::StorageUnavailable(format!("{:#}", err))),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            TallyError::Unauthenticated | TallyError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            TallyError::InvalidVoteValue | TallyError::InvalidPageSize | TallyError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            TallyError::PostNotFound => StatusCode::NOT_FOUND,
            TallyError::VoteConflict | TallyError::UsernameTaken => StatusCode::CONFLICT,
            TallyError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
