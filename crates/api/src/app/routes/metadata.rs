use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::app::dto::MetadataQuery;
use crate::app::errors;
use crate::app::services::AppServices;

/// Wait applied by the long-polling variant.
pub const LONG_POLL_WAIT: Duration = Duration::from_secs(5 * 60);

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_metadata))
        .route("/long-polling", get(get_metadata_long_polling))
}

pub async fn get_metadata(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<MetadataQuery>,
) -> axum::response::Response {
    let wait = services.metadata_wait;
    lookup(&services, query, wait).await
}

pub async fn get_metadata_long_polling(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<MetadataQuery>,
) -> axum::response::Response {
    lookup(&services, query, LONG_POLL_WAIT).await
}

/// The lookup keeps running after `wait` elapses; a later request is
/// answered from the cache.
async fn lookup(services: &AppServices, query: MetadataQuery, wait: Duration) -> axum::response::Response {
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "missing_url", "url query parameter is required");
    };

    match tokio::time::timeout(wait, services.jobs.get_metadata(&url)).await {
        Ok(Ok(metadata)) => Json(metadata).into_response(),
        Ok(Err(e)) => errors::service_error_to_response(e),
        Err(_) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response(),
    }
}
