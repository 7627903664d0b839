use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Inference or knowledge service unreachable or failing
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Unauthorized(_) => "Unauthorized",
            Self::BadRequest(_) => "BadRequest",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::Internal(_) => "InternalError",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let error_type = self.kind();
        let (status, message) = match self {
            EngineError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg)
            }
            EngineError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized: {}", msg);
                (StatusCode::FORBIDDEN, msg)
            }
            EngineError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, msg)
            }
            EngineError::UpstreamUnavailable(msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            EngineError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::NotFound("t".into()), StatusCode::NOT_FOUND),
            (EngineError::Unauthorized("t".into()), StatusCode::FORBIDDEN),
            (EngineError::BadRequest("t".into()), StatusCode::BAD_REQUEST),
            (EngineError::upstream("llm down"), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::Internal("t".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
