//! HTTP request metrics middleware.
//!
//! Tracks request counts, durations and in-flight requests per endpoint.

use std::time::Instant;

use {
    axum::{body::Body, http::Request, middleware::Next, response::Response},
    cardvault_metrics::{counter, gauge, histogram, http as http_metrics, labels},
};

/// Middleware that records:
/// - `cardvault_http_requests_total` by endpoint, method and status
/// - `cardvault_http_request_duration_seconds`
/// - `cardvault_http_requests_in_flight`
pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = normalize_path(request.uri().path());

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint.clone(), labels::METHOD => method.clone())
        .increment(1.0);

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status.clone()
    )
    .increment(1);

    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status
    )
    .record(duration);

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint, labels::METHOD => method)
        .decrement(1.0);

    response
}

/// Replace card ids with `{id}` so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    let normalized = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{normalized}")
}
