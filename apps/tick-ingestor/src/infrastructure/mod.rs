//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Kite ticker WebSocket client and wire codec.
pub mod kite;

/// PostgreSQL and in-memory persistence adapters.
pub mod persistence;

/// Instrument catalog loading from lookup CSV files.
pub mod catalog;

/// Operator notification adapters.
pub mod notify;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
