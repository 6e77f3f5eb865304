//! Core collector traits and types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::Settings;
use crate::metrics::{MetricRegistry, MetricsError};
use crate::upstream::UpstreamGate;

use super::error::CollectorError;

/// Polling tier; maps to one of the configured update intervals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    Fast,
    Medium,
    Slow,
}

/// Identity of a collector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorDescriptor {
    /// Unique name, used in labels, logs and the enable/disable lists.
    pub name: &'static str,
    pub description: &'static str,
    pub tier: Tier,
}

/// Core collector trait.
///
/// One call to [`collect`](Collector::collect) is one collection cycle: read
/// from the upstream gate and write the results into metric instruments.
/// Timing, health tracking and escalation belong to the
/// [`CollectorRunner`](super::CollectorRunner) that wraps the collector.
///
/// Implementations must:
/// - skip an individual malformed item instead of failing the whole cycle
/// - leave a metric unwritten when its upstream value is absent, never
///   substituting zero
/// - never emit an empty label value; use
///   [`UNKNOWN`](crate::metrics::names::UNKNOWN) instead
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    fn descriptor(&self) -> &CollectorDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    fn description(&self) -> &'static str {
        self.descriptor().description
    }

    fn tier(&self) -> Tier {
        self.descriptor().tier
    }

    /// Perform one collection cycle.
    async fn collect(&self) -> Result<(), CollectorError>;
}

/// Shared handles every collector is built from.
#[derive(Clone)]
pub struct CollectorContext {
    pub gate: Arc<UpstreamGate>,
    pub metrics: Arc<MetricRegistry>,
    pub settings: Arc<Settings>,
}

impl std::fmt::Debug for CollectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorContext")
            .field("gate", &self.gate)
            .field("namespace", &self.metrics.namespace())
            .finish_non_exhaustive()
    }
}

type BuildFn = fn(&CollectorContext) -> Result<Arc<dyn Collector>, MetricsError>;

/// A collector variant known to the scheduler: its descriptor plus a
/// constructor. Building registers the collector's instruments.
#[derive(Clone, Copy)]
pub struct CollectorFactory {
    descriptor: CollectorDescriptor,
    build: BuildFn,
}

impl CollectorFactory {
    pub const fn new(descriptor: CollectorDescriptor, build: BuildFn) -> Self {
        Self { descriptor, build }
    }

    pub fn descriptor(&self) -> &CollectorDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Instantiate the collector.
    ///
    /// # Errors
    /// Returns `MetricsError` if one of its instruments clashes with an
    /// existing registration.
    pub fn build(&self, ctx: &CollectorContext) -> Result<Arc<dyn Collector>, MetricsError> {
        (self.build)(ctx)
    }
}

impl std::fmt::Debug for CollectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorFactory")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!(Tier::from_str("FAST").unwrap(), Tier::Fast);
        assert_eq!(Tier::from_str("medium").unwrap(), Tier::Medium);
        assert!(Tier::from_str("hourly").is_err());
        assert_eq!(Tier::Slow.to_string(), "slow");
    }

    #[test]
    fn test_tier_serde() {
        let tier: Tier = serde_json::from_str("\"slow\"").unwrap();
        assert_eq!(tier, Tier::Slow);
        assert_eq!(serde_json::to_string(&Tier::Fast).unwrap(), "\"fast\"");
    }
}
