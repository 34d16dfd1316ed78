//! Gatehouse Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing-subscriber` and Prometheus metrics
//! for the gateway.

pub mod logging;
pub mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat, TelemetryConfig};
pub use metrics::{metrics_handler, with_metrics, GatehouseMetrics, METRICS};
pub use middleware::{observability_middleware, CorrelationId};
