//! OpenAPI Specification for the Gatehouse gateway
//!
//! Generated from the route annotations with utoipa and served at
//! `/openapi.json`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::backends::PoolStatus;
use crate::constants::API_KEY_HEADER;
use crate::error::{ApiError, Envelope, ErrorCode};
use crate::routes::entity::EntityPayload;
use crate::routes::health::{HealthDetails, HealthResponse, HealthStatus};
use crate::routes::object::ObjectPayload;
use crate::routes::{field, health, menu, object, relation, table};
use crate::telemetry::metrics;

/// OpenAPI document for the gateway.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gatehouse API",
        version = "0.1.0",
        description = "Multi-tenant request-dispatch gateway in front of the object-builder, function, auth and company services",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local Development")
    ),
    tags(
        (name = "Objects", description = "Object reads (cached) and writes (hooked)"),
        (name = "Tables", description = "Table definitions"),
        (name = "Menus", description = "Menu entries"),
        (name = "Fields", description = "Table fields"),
        (name = "Relations", description = "Relations between tables (engine A only)"),
        (name = "Health", description = "Liveness and readiness"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        // === Object Routes ===
        object::get_single_slim,
        object::get_single_object,
        object::get_list_objects,
        object::create_object,
        object::update_object,
        object::delete_object,

        // === Table Routes ===
        table::create_table,
        table::update_table,
        table::delete_table,

        // === Menu Routes ===
        menu::create_menu,
        menu::update_menu,
        menu::delete_menu,

        // === Field Routes ===
        field::create_field,
        field::update_field,
        field::delete_field,

        // === Relation Routes ===
        relation::create_relation,
        relation::delete_relation,

        // === Public Routes ===
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            // === Envelope and Errors ===
            Envelope, ApiError, ErrorCode,

            // === Request Bodies ===
            ObjectPayload, EntityPayload,

            // === Health ===
            HealthResponse, HealthStatus, HealthDetails, PoolStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Session token checked by the auth service"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
