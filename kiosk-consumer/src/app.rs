use std::future::ready;

use axum::{routing::get, Router};
use kiosk_common::health::Liveness;

pub async fn index() -> &'static str {
    "kiosk consumer"
}

/// Probe routes for the orchestrator. `/metrics` is added on top by the caller.
pub fn app(liveness: Liveness) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}
