//! # Middleware Module
//!
//! Cross-cutting request instrumentation. Request logging itself is handled
//! by tracing-actix-web's `TracingLogger`; this module only carries the
//! metrics collector that feeds the /api/v1/metrics counters.

pub mod metrics;

pub use metrics::MetricsMiddleware;
