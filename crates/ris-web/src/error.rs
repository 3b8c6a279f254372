//! 错误到 HTTP 响应的映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ris_core::RisError;
use serde_json::json;
use tracing::{error, warn};

/// 处理器返回的错误
#[derive(Debug)]
pub struct ApiError(pub RisError);

impl From<RisError> for ApiError {
    fn from(err: RisError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RisError::Validation(_) => StatusCode::BAD_REQUEST,
            RisError::NotFound { .. } => StatusCode::NOT_FOUND,
            RisError::InvalidState { .. } | RisError::ConcurrencyConflict { .. } => {
                StatusCode::CONFLICT
            }
            RisError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            RisError::Storage(_) | RisError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            RisError::Validation(_) => "validation",
            RisError::NotFound { .. } => "not_found",
            RisError::InvalidState { .. } => "invalid_state",
            RisError::ConcurrencyConflict { .. } => "concurrency_conflict",
            RisError::ExternalService { .. } => "external_service",
            RisError::Storage(_) => "storage",
            RisError::Config(_) => "config",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            RisError::Storage(detail) | RisError::Config(detail) => {
                error!("Request failed with internal error: {}", detail);
                "服务器内部错误".to_string()
            }
            RisError::InvalidState { .. } | RisError::ConcurrencyConflict { .. } => {
                warn!("Request rejected: {}", self.0);
                self.0.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": true,
            "kind": self.kind(),
            "message": message,
            "status": status.as_u16(),
            "retryable": self.0.is_retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_conflict_is_retryable_409() {
        let response = ApiError(RisError::conflict("report", "r-1")).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "concurrency_conflict");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_storage_error_hides_details() {
        let response =
            ApiError(RisError::Storage("password authentication failed".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("password"));
        assert_eq!(body["retryable"], false);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RisError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (RisError::not_found("order", 1), StatusCode::NOT_FOUND),
            (RisError::invalid_state("order", "Approved", "Cancel"), StatusCode::CONFLICT),
            (
                RisError::ExternalService {
                    service: "signing",
                    message: "down".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
