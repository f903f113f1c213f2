use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use rollcall_core::{MarkError, Rejection};
use rollcall_types::api::ErrorBody;

/// Every failure a handler can return. All but `Internal` are expected
/// business outcomes and are shown to the caller as-is.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Rejected(r) => match r {
                Rejection::NotAStudent | Rejection::NotEnrolled => StatusCode::FORBIDDEN,
                Rejection::InvalidToken => StatusCode::NOT_FOUND,
                Rejection::LessonNotActive
                | Rejection::AlreadyMarked
                | Rejection::DeviceAlreadyUsed => StatusCode::BAD_REQUEST,
            },
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Rejected(r) => r.code(),
            ApiError::NotFound => "NotFound",
            ApiError::Forbidden => "Forbidden",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Internal(_) => "Internal",
        }
    }
}

impl From<MarkError> for ApiError {
    fn from(err: MarkError) -> Self {
        match err {
            MarkError::Rejected(r) => ApiError::Rejected(r),
            MarkError::Store(e) => ApiError::Internal(e),
        }
    }
}

/// Malformed or incomplete request bodies.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// A path id that does not parse names nothing that exists.
impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::NotFound
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!("Request failed: {:#}", e);
        }

        let body = ErrorBody {
            // Display for Internal is a fixed string; the cause stays in the log.
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_documented_statuses() {
        let cases = [
            (Rejection::NotAStudent, StatusCode::FORBIDDEN),
            (Rejection::NotEnrolled, StatusCode::FORBIDDEN),
            (Rejection::InvalidToken, StatusCode::NOT_FOUND),
            (Rejection::LessonNotActive, StatusCode::BAD_REQUEST),
            (Rejection::AlreadyMarked, StatusCode::BAD_REQUEST),
            (Rejection::DeviceAlreadyUsed, StatusCode::BAD_REQUEST),
        ];
        for (rejection, status) in cases {
            assert_eq!(ApiError::from(rejection).status(), status, "{:?}", rejection);
        }
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = ApiError::Internal(anyhow::anyhow!("database is locked at /var/lib/x.db"));
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_failure_becomes_internal() {
        let err: ApiError = MarkError::Store(anyhow::anyhow!("io")).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
