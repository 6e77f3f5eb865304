//! Metric Layer
//!
//! Named, labeled Prometheus instruments shared by all collectors.
//!
//! # Components
//!
//! - [`MetricRegistry`]: idempotent creation and lookup of instruments under one namespace
//! - [`MetricSpec`]: name, help text, and fixed label set of an instrument
//! - [`names`]: metric and label name constants

mod registry;

pub mod names;

pub use registry::{
    DEFAULT_BUCKETS, DEFAULT_NAMESPACE, InfoVec, Instrument, MetricKind, MetricRegistry,
    MetricSpec, MetricsError,
};
