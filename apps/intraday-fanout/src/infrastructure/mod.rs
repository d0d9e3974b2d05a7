//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Massive WebSocket client adapters and the upstream connection manager.
pub mod massive;

/// Configuration loading.
pub mod config;

/// Chart WebSocket, health, and metrics HTTP endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
