use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mediaflow_service::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        ServiceError::UrlNotSupported(url) => json_error(
            StatusCode::BAD_REQUEST,
            "url_not_supported",
            format!("url not supported: {url}"),
        ),
        ServiceError::JobNotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        ServiceError::Timeout { .. } => json_error(StatusCode::INTERNAL_SERVER_ERROR, "timeout", err.to_string()),
        ServiceError::Queue(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", e.to_string()),
        ServiceError::Storage(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string()),
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mediaflow_core::{DomainError, StorageError};
    use mediaflow_queue::QueueError;

    use super::*;

    async fn status_and_code(err: ServiceError) -> (StatusCode, String) {
        let response = service_error_to_response(err);
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, body["error"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn client_errors_are_bad_requests() {
        assert_eq!(
            status_and_code(ServiceError::Validation(DomainError::UnsupportedJobType("x".into()))).await,
            (StatusCode::BAD_REQUEST, "validation_error".to_string())
        );
        assert_eq!(
            status_and_code(ServiceError::UrlNotSupported("ftp://x".into())).await,
            (StatusCode::BAD_REQUEST, "url_not_supported".to_string())
        );
    }

    #[tokio::test]
    async fn backend_failures_are_internal_errors() {
        let timeout = ServiceError::Timeout {
            operation: "metadata lookup",
            after: Duration::from_secs(1),
        };
        assert_eq!(
            status_and_code(timeout).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "timeout".to_string())
        );
        assert_eq!(
            status_and_code(ServiceError::Queue(QueueError::backend("down"))).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "queue_error".to_string())
        );
        assert_eq!(
            status_and_code(ServiceError::Storage(StorageError::backend("down"))).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_error".to_string())
        );
    }
}
