use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("json error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct ErrorBodyWire {
        message: String,
    }

    #[tokio::test]
    async fn upstream_errors_render_as_500_with_message() {
        let response = AppError::Upstream("status 503".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 16)
            .await
            .expect("body should be readable");
        let mut bytes = bytes.to_vec();
        let body: ErrorBodyWire =
            simd_json::serde::from_slice(&mut bytes).expect("body should be json");
        assert_eq!(body.message, "upstream error: status 503");
    }

    #[test]
    fn invalid_arguments_map_to_bad_request() {
        let error = AppError::InvalidArgument("unknown sort key".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }
}
