//! The per-collector `update()` wrapper.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use prometheus::{CounterVec, GaugeVec, HistogramVec};
use serde::Serialize;
use tracing::Instrument;
use tracing::field::Empty;

use crate::config::Settings;
use crate::metrics::names::{self, labels};
use crate::metrics::{MetricRegistry, MetricSpec, MetricsError};

use super::error::{CollectorError, ErrorCategory};
use super::traits::{Collector, Tier};

/// Default consecutive failures before a collector is considered fatal.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Default deadline for a single collection cycle.
pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-runner knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    pub max_consecutive_failures: u32,
    pub timeout: Duration,
    pub update_interval: Duration,
    pub buckets: Vec<f64>,
}

impl RunnerOptions {
    /// Options for a collector of `tier` under `settings`.
    pub fn from_settings(settings: &Settings, tier: Tier) -> Self {
        Self {
            max_consecutive_failures: settings.monitoring.max_consecutive_failures,
            timeout: Duration::from_secs(settings.collectors.collector_timeout),
            update_interval: settings.update_intervals.for_tier(tier),
            buckets: settings.monitoring.histogram_buckets.clone(),
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            timeout: DEFAULT_COLLECTOR_TIMEOUT,
            update_interval: Duration::from_secs(60),
            buckets: crate::metrics::DEFAULT_BUCKETS.to_vec(),
        }
    }
}

/// Result of a non-fatal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success { duration: Duration },
    /// Failed below the escalation threshold; the error is absorbed.
    Failed(ErrorCategory),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Mutable runtime state. `consecutive_failures` and `last_error` change
/// together under one lock.
#[derive(Debug, Default)]
struct RunState {
    last_update: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    total_collections: u64,
    last_error: Option<CollectorError>,
}

#[derive(Clone)]
struct RunnerMetrics {
    duration: HistogramVec,
    errors: CounterVec,
    last_update: GaugeVec,
}

impl RunnerMetrics {
    fn register(registry: &MetricRegistry, buckets: Vec<f64>) -> Result<Self, MetricsError> {
        Ok(Self {
            duration: registry.histogram(
                MetricSpec::new(
                    names::COLLECTOR_DURATION_SECONDS,
                    "Time spent collecting metrics",
                )
                .labels(&[labels::COLLECTOR])
                .unit("seconds")
                .buckets(buckets),
            )?,
            errors: registry.counter(
                MetricSpec::new(
                    names::COLLECTOR_ERRORS_TOTAL,
                    "Total number of collection errors",
                )
                .labels(&[labels::COLLECTOR, labels::ERROR_CATEGORY])
                .unit("errors"),
            )?,
            last_update: registry.gauge(
                MetricSpec::new(
                    names::COLLECTOR_LAST_UPDATE_SECONDS,
                    "Unix timestamp of the last successful collection",
                )
                .labels(&[labels::COLLECTOR])
                .unit("seconds"),
            )?,
        })
    }
}

/// Serializable snapshot of a runner's health.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub description: String,
    pub tier: Tier,
    pub enabled: bool,
    pub healthy: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub seconds_since_update: Option<f64>,
    pub consecutive_failures: u32,
    pub total_collections: u64,
    pub update_interval_seconds: u64,
    pub last_error: Option<String>,
    pub last_error_category: Option<ErrorCategory>,
}

/// Wraps a [`Collector`] with timing, tracing, error accounting and the
/// escalation policy.
pub struct CollectorRunner {
    collector: Arc<dyn Collector>,
    options: RunnerOptions,
    state: Mutex<RunState>,
    metrics: RunnerMetrics,
}

impl CollectorRunner {
    /// Wrap `collector`, registering the self-monitoring instruments.
    pub fn new(
        collector: Arc<dyn Collector>,
        options: RunnerOptions,
        registry: &MetricRegistry,
    ) -> Result<Self, MetricsError> {
        let metrics = RunnerMetrics::register(registry, options.buckets.clone())?;

        tracing::info!(
            collector = collector.name(),
            tier = %collector.tier(),
            update_interval_secs = options.update_interval.as_secs(),
            "Initialized collector"
        );

        Ok(Self {
            collector,
            options,
            state: Mutex::new(RunState::default()),
            metrics,
        })
    }

    pub fn name(&self) -> &'static str {
        self.collector.name()
    }

    pub fn tier(&self) -> Tier {
        self.collector.tier()
    }

    pub fn update_interval(&self) -> Duration {
        self.options.update_interval
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run one collection cycle.
    ///
    /// Failures below the threshold are absorbed into
    /// [`RunOutcome::Failed`]. The failure that brings `consecutive_failures`
    /// up to `max_consecutive_failures` is returned as `Err`; callers treat
    /// it as fatal.
    pub async fn update(&self) -> Result<RunOutcome, CollectorError> {
        let name = self.name();
        let span = tracing::info_span!(
            "collector.update",
            collector.name = name,
            collector.success = Empty,
            collector.consecutive_failures = Empty,
            error.category = Empty,
            error.message = Empty,
        );

        let start = Instant::now();
        tracing::debug!(parent: &span, collector = name, "Running collection");

        let result = match tokio::time::timeout(
            self.options.timeout,
            self.collector.collect().instrument(span.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CollectorError::timeout(format!(
                "collection exceeded {}s",
                self.options.timeout.as_secs()
            ))),
        };
        let duration = start.elapsed();

        match result {
            Ok(()) => {
                let now = Utc::now();
                let total = {
                    let mut state = self.lock_state();
                    state.last_update = Some(now);
                    state.consecutive_failures = 0;
                    state.last_error = None;
                    state.total_collections += 1;
                    state.total_collections
                };

                self.metrics
                    .duration
                    .with_label_values(&[name])
                    .observe(duration.as_secs_f64());
                self.metrics
                    .last_update
                    .with_label_values(&[name])
                    .set(now.timestamp() as f64);

                span.record("collector.success", true);
                tracing::debug!(
                    parent: &span,
                    collector = name,
                    duration_ms = duration.as_millis() as u64,
                    total_collections = total,
                    "Collection succeeded"
                );
                Ok(RunOutcome::Success { duration })
            }
            Err(err) => {
                let err = match err.collector() {
                    Some(_) => err,
                    None => err.with_collector(name),
                };
                let category = err.category();

                let failures = {
                    let mut state = self.lock_state();
                    state.consecutive_failures += 1;
                    state.last_error = Some(err.clone());
                    state.consecutive_failures
                };

                let category_label: &'static str = category.into();
                self.metrics
                    .errors
                    .with_label_values(&[name, category_label])
                    .inc();

                span.record("collector.success", false);
                span.record("collector.consecutive_failures", failures);
                span.record("error.category", category_label);
                span.record("error.message", err.message());

                if failures >= self.options.max_consecutive_failures {
                    tracing::error!(
                        parent: &span,
                        collector = name,
                        consecutive_failures = failures,
                        max_failures = self.options.max_consecutive_failures,
                        error = %err,
                        "Collector exceeded max consecutive failures"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    parent: &span,
                    collector = name,
                    error = %err,
                    error_category = %category,
                    consecutive_failures = failures,
                    duration_ms = duration.as_millis() as u64,
                    "Collection failed"
                );
                Ok(RunOutcome::Failed(category))
            }
        }
    }

    /// Healthy while below the failure threshold and no error is pending.
    pub fn is_healthy(&self) -> bool {
        let state = self.lock_state();
        state.consecutive_failures < self.options.max_consecutive_failures
            && state.last_error.is_none()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_state().consecutive_failures
    }

    pub fn total_collections(&self) -> u64 {
        self.lock_state().total_collections
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_update
    }

    pub fn last_error(&self) -> Option<CollectorError> {
        self.lock_state().last_error.clone()
    }

    pub fn status(&self) -> CollectorStatus {
        let now = Utc::now();
        let state = self.lock_state();
        let healthy = state.consecutive_failures < self.options.max_consecutive_failures
            && state.last_error.is_none();

        CollectorStatus {
            name: self.name().to_string(),
            description: self.collector.description().to_string(),
            tier: self.tier(),
            enabled: true,
            healthy,
            last_update: state.last_update,
            seconds_since_update: state
                .last_update
                .map(|t| (now - t).num_milliseconds() as f64 / 1000.0),
            consecutive_failures: state.consecutive_failures,
            total_collections: state.total_collections,
            update_interval_seconds: self.options.update_interval.as_secs(),
            last_error: state.last_error.as_ref().map(ToString::to_string),
            last_error_category: state.last_error.as_ref().map(CollectorError::category),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CollectorRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRunner")
            .field("name", &self.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorDescriptor;
    use std::collections::VecDeque;

    const DESCRIPTOR: CollectorDescriptor = CollectorDescriptor {
        name: "scripted",
        description: "Replays scripted results",
        tier: Tier::Fast,
    };

    /// Collector that replays a script of results, then succeeds.
    struct ScriptedCollector {
        script: Mutex<VecDeque<Result<(), CollectorError>>>,
        delay: Duration,
    }

    impl ScriptedCollector {
        fn new(script: Vec<Result<(), CollectorError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl Collector for ScriptedCollector {
        fn descriptor(&self) -> &CollectorDescriptor {
            &DESCRIPTOR
        }

        async fn collect(&self) -> Result<(), CollectorError> {
            tokio::time::sleep(self.delay).await;
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn runner(script: Vec<Result<(), CollectorError>>, max: u32) -> (CollectorRunner, MetricRegistry) {
        let registry = MetricRegistry::default();
        let options = RunnerOptions {
            max_consecutive_failures: max,
            ..Default::default()
        };
        let runner =
            CollectorRunner::new(Arc::new(ScriptedCollector::new(script)), options, &registry)
                .unwrap();
        (runner, registry)
    }

    fn connection_error() -> CollectorError {
        CollectorError::foreign("connection reset by peer")
    }

    #[tokio::test]
    async fn test_success_updates_state_and_metrics() {
        let (runner, registry) = runner(vec![], 3);
        assert!(runner.last_update().is_none());

        let outcome = runner.update().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(runner.total_collections(), 1);
        assert_eq!(runner.consecutive_failures(), 0);
        assert!(runner.last_update().is_some());
        assert!(runner.is_healthy());

        assert_eq!(
            registry.sample(names::COLLECTOR_DURATION_SECONDS, &[("collector", "scripted")]),
            Some(1.0)
        );
        assert!(
            registry
                .sample(names::COLLECTOR_LAST_UPDATE_SECONDS, &[("collector", "scripted")])
                .unwrap()
                > 0.0
        );
    }

    #[tokio::test]
    async fn test_failures_counted_then_reset() {
        let (runner, registry) = runner(
            vec![
                Err(connection_error()),
                Err(connection_error()),
                Err(connection_error()),
            ],
            5,
        );

        assert_eq!(
            runner.update().await.unwrap(),
            RunOutcome::Failed(ErrorCategory::Connection)
        );
        runner.update().await.unwrap();
        runner.update().await.unwrap();
        assert_eq!(runner.consecutive_failures(), 3);
        assert!(!runner.is_healthy());
        assert_eq!(runner.total_collections(), 0);

        let err = runner.last_error().unwrap();
        assert_eq!(err.collector(), Some("scripted"));
        assert_eq!(
            registry.sample(
                names::COLLECTOR_ERRORS_TOTAL,
                &[("collector", "scripted"), ("error_category", "connection")]
            ),
            Some(3.0)
        );
        // Failed runs do not count as timed successes.
        assert_eq!(
            registry.sample(names::COLLECTOR_DURATION_SECONDS, &[("collector", "scripted")]),
            None
        );

        runner.update().await.unwrap();
        assert_eq!(runner.consecutive_failures(), 0);
        assert!(runner.last_error().is_none());
        assert!(runner.is_healthy());
        assert_eq!(runner.total_collections(), 1);
    }

    #[tokio::test]
    async fn test_escalates_at_threshold() {
        let script = (0..3).map(|_| Err(connection_error())).collect();
        let (runner, _registry) = runner(script, 3);

        assert!(runner.update().await.is_ok());
        assert!(runner.update().await.is_ok());
        let err = runner.update().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(runner.consecutive_failures(), 3);
        assert!(!runner.is_healthy());
    }

    #[tokio::test]
    async fn test_explicit_category_survives() {
        let (runner, registry) = runner(
            vec![Err(CollectorError::not_available("/api/timeout"))],
            3,
        );

        assert_eq!(
            runner.update().await.unwrap(),
            RunOutcome::Failed(ErrorCategory::NotAvailable)
        );
        assert_eq!(
            registry.sample(
                names::COLLECTOR_ERRORS_TOTAL,
                &[("collector", "scripted"), ("error_category", "not_available")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_collect_times_out() {
        let registry = MetricRegistry::default();
        let collector = ScriptedCollector {
            script: Mutex::new(VecDeque::new()),
            delay: Duration::from_secs(300),
        };
        let options = RunnerOptions {
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let runner = CollectorRunner::new(Arc::new(collector), options, &registry).unwrap();

        assert_eq!(
            runner.update().await.unwrap(),
            RunOutcome::Failed(ErrorCategory::Timeout)
        );
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (runner, _registry) = runner(vec![Err(CollectorError::validation("bad shape"))], 10);
        runner.update().await.unwrap();

        let status = runner.status();
        assert_eq!(status.name, "scripted");
        assert_eq!(status.tier, Tier::Fast);
        assert!(!status.healthy);
        assert!(status.last_update.is_none());
        assert!(status.seconds_since_update.is_none());
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.update_interval_seconds, 60);
        assert_eq!(status.last_error.as_deref(), Some("validation error: bad shape"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_error_category"], "validation");
        assert_eq!(json["tier"], "fast");
    }
}
