//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Every request gets a correlation id (the client's `X-Request-Id` or a
//! fresh UUIDv7), a `http_request` span carrying it, Prometheus metrics
//! under the matched route template, and a completion log line. The id is
//! echoed on the response.

use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use gatehouse_core::new_correlation_id;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::with_metrics;
use crate::constants::REQUEST_ID_HEADER;

/// Correlation id assigned to the request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// Route label of requests that matched no route.
pub(crate) const UNMATCHED_ROUTE: &str = "unmatched";

/// The route template the request matched, e.g. `/v1/object/:table/:id`.
/// Labels stay bounded by the route table whatever the client sends.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

fn correlation_id_from(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(new_correlation_id)
}

/// Observability middleware for Axum.
pub async fn observability_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);
    let correlation_id = correlation_id_from(&request);
    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = info_span!(
        "http_request",
        correlation_id = %correlation_id,
        http.method = %method,
        http.target = %path,
        http.route = %route,
    );

    let mut response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    with_metrics(|m| {
        m.record_http_request(
            method.as_str(),
            &route,
            status.as_u16(),
            duration.as_secs_f64(),
        )
    });

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::metrics::METRICS;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn requests_counted(method: &str, route: &str, status: &str) -> Result<f64, String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        Ok(metrics
            .http_requests_total
            .with_label_values(&[method, route, status])
            .get())
    }

    #[tokio::test]
    async fn test_metrics_are_labelled_by_route_template() -> Result<(), String> {
        let nested = Router::new().route("/widgets/:slug/:id", get(|| async { "ok" }));
        let app = Router::new()
            .nest("/v9", nested)
            .layer(axum::middleware::from_fn(observability_middleware));

        let template = "/v9/widgets/:slug/:id";
        let before = requests_counted("GET", template, "200")?;
        let unmatched_before = requests_counted("GET", UNMATCHED_ROUTE, "404")?;

        // Ids of any shape, including ones no pattern would recognise.
        for uri in ["/v9/widgets/orders/abc", "/v9/widgets/menus/x-1-y", "/v9/widgets/a/1234"] {
            let request = axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .map_err(|e| e.to_string())?;
            app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
        }
        for i in 0..3 {
            let request = axum::http::Request::builder()
                .uri(format!("/v9/nowhere/{}", i))
                .body(Body::empty())
                .map_err(|e| e.to_string())?;
            app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
        }

        assert!(requests_counted("GET", template, "200")? >= before + 3.0);
        assert!(requests_counted("GET", UNMATCHED_ROUTE, "404")? >= unmatched_before + 3.0);
        assert_eq!(requests_counted("GET", "/v9/widgets/orders/abc", "200")?, 0.0);
        assert_eq!(requests_counted("GET", "/v9/nowhere/0", "404")?, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() -> Result<(), String> {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(observability_middleware));

        let request = axum::http::Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "req-123")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some("req-123")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() -> Result<(), String> {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(observability_middleware));

        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or("missing request id")?;
        assert!(uuid::Uuid::parse_str(id).is_ok());
        Ok(())
    }
}
