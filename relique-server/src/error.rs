use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relique::ErrorKind;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<relique::Error> for AppError {
    fn from(e: relique::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => AppError::NotFound(e.to_string()),
            ErrorKind::Invalid => AppError::BadRequest(e.to_string()),
            ErrorKind::Transport => AppError::ServiceUnavailable(e.to_string()),
            _ => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: relique::Error) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn test_error_kind_to_status() {
        use relique::Error;

        assert_eq!(status(Error::NotFound("job x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::Invalid("path".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Error::Transport("ssh".into()).context("client 'c1' is unreachable")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(Error::Fatal("pool".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
