use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use mediaflow_core::{JobId, JobParams};

use crate::app::dto::SubmissionResponse;
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job))
        .route("/:id", get(get_job))
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<JobParams>, JsonRejection>,
) -> axum::response::Response {
    let Json(params) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_body",
                format!("failed to unmarshal json request body: {}", rejection.body_text()),
            );
        }
    };

    let submission = match services.jobs.create_job(params).await {
        Ok(s) => s,
        Err(e) => return errors::service_error_to_response(e),
    };

    let response = SubmissionResponse::from(&submission);
    if submission.is_new() {
        info!(job_id = %response.id, "job accepted");
        (StatusCode::ACCEPTED, Json(response)).into_response()
    } else {
        (StatusCode::OK, Json(response)).into_response()
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{e}")),
    };

    match services.jobs.get_job(&id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::service_error_to_response(e),
    }
}
