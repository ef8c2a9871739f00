use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid conversation participants")]
    InvalidParticipants,
    #[error("{0}")]
    Validation(String),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("account {0} not found")]
    NotFound(String),
}
