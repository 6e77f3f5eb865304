//! Collector Layer
//!
//! Independently scheduled, independently failing collection tasks that turn
//! upstream state into metrics. Each enabled collector runs in its own Tokio
//! task.
//!
//! # Architecture
//!
//! - [`Collector`]: one unit of collection work, identified by a
//!   [`CollectorDescriptor`]
//! - [`CollectorRunner`]: wraps a collector with timing, health tracking and
//!   the escalation policy
//! - [`Scheduler`]: owns the runners and their interval tasks
//! - [`CollectorError`]: categorized failure, see [`classify`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use protect_exporter::collector::{self, CollectorContext, Scheduler};
//! use protect_exporter::config::Settings;
//! use protect_exporter::metrics::MetricRegistry;
//! use protect_exporter::upstream::{Bootstrap, MemoryConnector, UpstreamGate};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = MemoryConnector::new(Bootstrap::default());
//! let ctx = CollectorContext {
//!     gate: Arc::new(UpstreamGate::new(Arc::new(connector), 5)),
//!     metrics: Arc::new(MetricRegistry::default()),
//!     settings: Arc::new(Settings::default()),
//! };
//! let scheduler = Scheduler::new(&collector::default_factories(), ctx)?;
//! scheduler.start().await;
//! scheduler.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
mod error;
pub mod event;
mod runner;
mod scheduler;
pub mod sensor;
pub mod system;
mod traits;

pub use error::{CollectorError, ErrorCategory, classify};
pub use runner::{
    CollectorRunner, CollectorStatus, DEFAULT_COLLECTOR_TIMEOUT, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    RunOutcome, RunnerOptions,
};
pub use scheduler::{DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, Scheduler};
pub use traits::{Collector, CollectorContext, CollectorDescriptor, CollectorFactory, Tier};

/// Every collector variant shipped with the exporter.
pub fn default_factories() -> Vec<CollectorFactory> {
    vec![
        system::factory(),
        camera::factory(),
        sensor::factory(),
        event::factory(),
    ]
}
