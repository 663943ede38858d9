//! Error types for the media optimizer

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;
use transform_cache::{CacheError, PipelineError};

#[derive(Debug)]
pub enum OptimizerError {
    BadRequest(String),
    Cache(CacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl OptimizerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OptimizerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OptimizerError::Cache(CacheError::Pipeline(PipelineError::Unsupported(_))) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            OptimizerError::Cache(CacheError::Pipeline(PipelineError::Upstream(_))) => {
                StatusCode::BAD_GATEWAY
            }
            OptimizerError::Cache(CacheError::LockTimeout { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to clients
    pub fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "Timed out waiting for transform".to_string(),
            _ => match self {
                OptimizerError::Cache(CacheError::Pipeline(err)) => err.to_string(),
                other => other.to_string(),
            },
        }
    }
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerError::BadRequest(msg) => write!(f, "{}", msg),
            OptimizerError::Cache(err) => write!(f, "Cache error: {}", err),
            OptimizerError::Io(err) => write!(f, "IO error: {}", err),
            OptimizerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for OptimizerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OptimizerError::Cache(err) => Some(err),
            OptimizerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for OptimizerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        (status, axum::Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<CacheError> for OptimizerError {
    fn from(err: CacheError) -> Self {
        OptimizerError::Cache(err)
    }
}

impl From<PipelineError> for OptimizerError {
    fn from(err: PipelineError) -> Self {
        OptimizerError::Cache(CacheError::Pipeline(err))
    }
}

impl From<std::io::Error> for OptimizerError {
    fn from(err: std::io::Error) -> Self {
        OptimizerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for OptimizerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        OptimizerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                OptimizerError::BadRequest("missing url".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::Unsupported("text/html".to_string()).into(),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                PipelineError::Upstream("origin returned 404".to_string()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CacheError::LockTimeout {
                    fingerprint: "image-abc".to_string(),
                    waited: Duration::from_secs(90),
                }
                .into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CacheError::Store("connection refused".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{}", err);
        }
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err: OptimizerError = CacheError::Store("redis at 10.0.0.3 refused".to_string()).into();
        assert_eq!(err.public_message(), "Internal server error");

        let err: OptimizerError = PipelineError::Unsupported("text/html".to_string()).into();
        assert!(err.public_message().contains("text/html"));
    }

    #[test]
    fn test_config_error_display() {
        let err = OptimizerError::Config("invalid PORT".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid PORT");
    }
}
