//! Error taxonomy for the match engine.
//!
//! Every variant here is a user-displayable failure: illegal actions get a
//! clear message and an appropriate HTTP status, and none of them ever takes
//! down a match's background state.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Requested lifecycle move is not legal from the current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Acting participant is not authorized for this action on this match.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The action was repeated on a match that has already moved on.
    #[error("this match has moved on, refresh: {0}")]
    AlreadyResolved(String),

    /// A participant tried to challenge themselves.
    #[error("cannot challenge yourself")]
    SelfChallenge,

    /// A manual submission arrived with no items selected.
    #[error("submission must contain at least one item")]
    EmptySubmission,

    /// The grading function exhausted its retries.
    #[error("grading unavailable after retries")]
    GradingUnavailable,

    /// Unknown match code.
    #[error("no match with code {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidTransition(_) | EngineError::AlreadyResolved(_) => {
                StatusCode::CONFLICT
            }
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::SelfChallenge | EngineError::EmptySubmission => StatusCode::BAD_REQUEST,
            EngineError::GradingUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Stable machine-readable tag for clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::AlreadyResolved(_) => "already_resolved",
            EngineError::SelfChallenge => "self_challenge",
            EngineError::EmptySubmission => "empty_submission",
            EngineError::GradingUnavailable => "grading_unavailable",
            EngineError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            EngineError::InvalidTransition("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            EngineError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(EngineError::SelfChallenge.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            EngineError::NotFound("ZZZZ".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
