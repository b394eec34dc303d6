use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::metrics_consts::{
    EMPTY_POLLS, INTERACTIONS_WRITTEN, LOOKUP_MISSES, MALFORMED_PAYLOADS, RECORDS_RECEIVED,
    RECORDS_REJECTED, REFERENCE_CACHE, SOURCE_TRANSPORT_ERRORS, STORE_FAILURES,
    STORE_UNAVAILABLE,
};

const HTTP_REQUESTS: &str = "http_requests_total";
const HTTP_REQUEST_DURATION: &str = "http_requests_duration_seconds";

/// Only health and scrape routes are served, so anything else shares one label value.
const UNMATCHED_PATH: &str = "unmatched";

/// Bind a `TcpListener` on `bind` and serve `router` until it fails.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the global recorder and expose it as `/metrics` on `router`.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let handle = setup_metrics_recorder()?;
    Ok(with_metrics_route(router, handle))
}

/// Add `/metrics`, rendering `handle`, plus request tracking for every route.
pub fn with_metrics_route(router: Router, handle: PrometheusHandle) -> Router {
    router
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = recorder_builder()?.install_recorder()?;
    describe_kiosk_metrics();
    Ok(handle)
}

fn recorder_builder() -> Result<PrometheusBuilder, BuildError> {
    const HTTP_LATENCY_SECONDS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(HTTP_REQUEST_DURATION.to_owned()),
        HTTP_LATENCY_SECONDS,
    )
}

/// Register help text for the ingestion metrics with the current recorder.
pub fn describe_kiosk_metrics() {
    describe_counter!(RECORDS_RECEIVED, Unit::Count, "Records handed to the pipeline");
    describe_counter!(
        RECORDS_REJECTED,
        Unit::Count,
        "Records that failed validation, by reason"
    );
    describe_counter!(
        INTERACTIONS_WRITTEN,
        Unit::Count,
        "Interaction rows committed, by kind"
    );
    describe_counter!(
        LOOKUP_MISSES,
        Unit::Count,
        "Records skipped because no reference row matched their value"
    );
    describe_counter!(
        REFERENCE_CACHE,
        Unit::Count,
        "Reference id cache hits and misses"
    );
    describe_counter!(
        STORE_FAILURES,
        Unit::Count,
        "Store errors during lookup or write"
    );
    describe_gauge!(
        STORE_UNAVAILABLE,
        "1 while consecutive store failures are at or above the threshold"
    );
    describe_counter!(EMPTY_POLLS, Unit::Count, "Polls that returned no record");
    describe_counter!(
        SOURCE_TRANSPORT_ERRORS,
        Unit::Count,
        "Source polls that failed in transport"
    );
    describe_counter!(
        MALFORMED_PAYLOADS,
        Unit::Count,
        "Messages that could not be decoded into a record"
    );
    describe_counter!(HTTP_REQUESTS, Unit::Count, "HTTP requests served");
    describe_histogram!(
        HTTP_REQUEST_DURATION,
        Unit::Seconds,
        "HTTP request handling time"
    );
}

fn path_label(req: &Request<Body>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_PATH.to_owned(), |path| path.as_str().to_owned())
}

/// Count and time every request by method, route and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = path_label(&req);
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}
