//! UniFi Protect Exporter Library
//!
//! Polls a UniFi Protect console and publishes its state as Prometheus
//! metrics. Can be embedded in other Rust programs, or run as a standalone
//! binary with the `protect-exporter` executable.
//!
//! # Architecture
//!
//! - **Upstream**: one shared, lazily connected session to the console behind
//!   a concurrency gate ([`upstream::UpstreamGate`])
//! - **Metrics**: an idempotent, namespaced instrument registry
//!   ([`metrics::MetricRegistry`])
//! - **Collectors**: tiered tasks that turn upstream state into metrics, with
//!   failure escalation ([`collector::Scheduler`])
//! - **Server**: `/metrics` and `/health` over axum ([`server::create_router`])
//! - **Config**: layered YAML / environment settings ([`config::Settings`])

pub mod collector;
pub mod config;
pub mod metrics;
pub mod server;
pub mod upstream;

pub use collector::{Collector, CollectorError, ErrorCategory, Scheduler, Tier};
pub use config::{ConfigError, Settings};
pub use metrics::{MetricRegistry, MetricsError};
pub use server::{AppState, create_router};
pub use upstream::{MemoryConnector, ProtectConnector, UpstreamGate};
