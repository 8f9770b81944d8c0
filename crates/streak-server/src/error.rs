use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use streak_shared::protocol::ErrorBody;
use streak_shared::{ErrorKind, SyncError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing or invalid x-user-id header")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ServerError::Unauthenticated => (StatusCode::UNAUTHORIZED, ErrorKind::Permanent),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidInput),
            ServerError::Sync(err) => {
                let status = match err {
                    SyncError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::Permanent(_) => StatusCode::FORBIDDEN,
                    SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    SyncError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
                    SyncError::Conflict(_) => StatusCode::CONFLICT,
                    SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind())
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };

        (status, axum::Json(body)).into_response()
    }
}
