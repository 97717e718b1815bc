use axum::{Router, routing::get};

pub mod jobs;
pub mod metadata;
pub mod system;

/// Router for all resource endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/stats", get(system::stats))
        .nest("/jobs", jobs::router())
        .nest("/metadata", metadata::router())
}
