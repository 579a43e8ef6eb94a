use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use posts::{FeedbackError, QueryError, StoreError, ValidationError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedPayload(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            AppError::Query(QueryError::MalformedQuery(_)) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_QUERY")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Feedback(err) => match err {
                FeedbackError::InvalidFeedbackType(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_FEEDBACK_TYPE")
                }
                FeedbackError::InvalidAction(_) => (StatusCode::BAD_REQUEST, "INVALID_ACTION"),
                FeedbackError::UnknownPost(_) => (StatusCode::NOT_FOUND, "UNKNOWN_POST"),
                FeedbackError::UnknownUser(_) => (StatusCode::NOT_FOUND, "UNKNOWN_USER"),
                FeedbackError::Underflow { .. } => (StatusCode::CONFLICT, "UNDERFLOW"),
                FeedbackError::PartialFailure { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "PARTIAL_FAILURE")
                }
                FeedbackError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
            AppError::Store(err) => match err {
                StoreError::UnknownPost(_) => (StatusCode::NOT_FOUND, "UNKNOWN_POST"),
                StoreError::UnknownUser(_) => (StatusCode::NOT_FOUND, "UNKNOWN_USER"),
                StoreError::Underflow => (StatusCode::CONFLICT, "UNDERFLOW"),
                StoreError::Corrupt { .. } | StoreError::Backend(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            error!(%code, "{self}");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}
