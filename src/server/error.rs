use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;

use super::ApiResponse;
use crate::chat::ChatError;
use crate::relay::RelayError;
use crate::signup::SignupError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Assistant or relay failures; the client only sees a generic message
    #[error("{0} request failed")]
    Upstream(&'static str),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!(error = %e, "request failed");
        }

        let status = self.status();
        (status, Json(ApiResponse::<()>::err(self.to_string()))).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<SignupError> for ApiError {
    fn from(e: SignupError) -> Self {
        match e {
            SignupError::EmailTaken(_) => ApiError::Conflict(e.to_string()),
            SignupError::Database(e) => ApiError::Internal(e.into()),
            SignupError::Storage(e) => ApiError::Internal(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        error!(error = %e, "assistant request failed");
        ApiError::Upstream("Assistant")
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            other => {
                error!(error = %other, "contact relay failed");
                ApiError::Upstream("Contact relay")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::RunStatus;
    use crate::invites::InvalidReason;

    #[test]
    fn test_signup_errors_map_to_client_statuses() {
        let taken: ApiError = SignupError::EmailTaken("a@b.com".to_string()).into();
        assert_eq!(taken.status(), StatusCode::CONFLICT);

        let invalid: ApiError = SignupError::InvalidInviteCode {
            code: "NOPE0000".to_string(),
            reason: InvalidReason::NotFound,
        }
        .into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let storage: ApiError = SignupError::Storage(anyhow::anyhow!("disk full")).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.to_string(), "Internal server error");
    }

    #[test]
    fn test_upstream_details_are_hidden() {
        let err: ApiError = ChatError::RunEnded(RunStatus::Failed).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Assistant request failed");
    }
}
