use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by webhook registration and deletion.
///
/// Validation and conflict errors are detected before any cluster mutation
/// and carry no side effects. Collaborator errors may follow a partial
/// mutation; in that case the compensating cleanup has already been attempted
/// and its outcome is folded into the message.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Collaborator(String),

    #[error("unable to generate a unique monitor trigger name")]
    GenerationExhausted,
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Validation(_) | WebhookError::Conflict(_) => StatusCode::BAD_REQUEST,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Collaborator(_) | WebhookError::GenerationExhausted => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Wrap a failed cluster or provider call.
    pub fn collaborator(err: impl std::fmt::Display) -> Self {
        WebhookError::Collaborator(err.to_string())
    }

    /// Report a compensating-delete failure alongside the original error
    /// rather than masking either.
    pub fn with_cleanup_failure(self, cleanup_err: impl std::fmt::Display) -> Self {
        WebhookError::Collaborator(format!(
            "{}. Also failed to clean up partially created resources: {}",
            self, cleanup_err
        ))
    }
}

impl From<kube::Error> for WebhookError {
    fn from(err: kube::Error) -> Self {
        WebhookError::Collaborator(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;
