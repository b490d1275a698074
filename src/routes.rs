use axum::{routing::post, Router};

use crate::{billing, conflicts, internal, requests};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/zip-change/submit", post(requests::submit_request))
        .route(
            "/api/zip-change/check-conflicts",
            post(conflicts::check_conflicts),
        )
        .route("/api/zip-change/resolve", post(requests::resolve_request))
        .route("/api/billing/provision", post(billing::provision_billing))
        .route("/api/billing/activate", post(billing::activate))
        .route("/api/internal/login", post(internal::internal_login))
        .route(
            "/api/internal/preview-token",
            post(internal::issue_preview_token),
        )
}
