use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ApiConfig;
use crate::constants::{
    API_KEY_HEADER, ENVIRONMENT_ID_HEADER, PROJECT_ID_HEADER, REQUEST_ID_HEADER, RESOURCE_ID_HEADER,
};

/// CORS for browser clients. An empty origin list allows any origin;
/// `*.example.com` entries allow its https subdomains.
pub fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .expose_headers([
            HeaderName::from_static(REQUEST_ID_HEADER),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        return cors.allow_origin(Any).allow_headers(Any);
    }

    tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
    let allowed = config.clone();
    let origins = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin.to_str().is_ok_and(|o| allowed.is_origin_allowed(o))
    });
    let cors = cors.allow_origin(origins).allow_headers([
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(API_KEY_HEADER),
        HeaderName::from_static(PROJECT_ID_HEADER),
        HeaderName::from_static(ENVIRONMENT_ID_HEADER),
        HeaderName::from_static(RESOURCE_ID_HEADER),
        HeaderName::from_static(REQUEST_ID_HEADER),
    ]);
    if config.cors_allow_credentials {
        cors.allow_credentials(true)
    } else {
        cors
    }
}
