use thiserror::Error;

/// Failures surfaced by the voting and feed core.
///
/// `Clone` is required so a single batch failure can be handed to every
/// caller waiting on that batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username already taken")]
    UsernameTaken,

    #[error("vote value must be nonzero")]
    InvalidVoteValue,

    #[error("page size must be positive")]
    InvalidPageSize,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("post not found")]
    PostNotFound,

    #[error("vote could not be applied due to concurrent writes")]
    VoteConflict,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}
