//! Scheduler owning one fixed-period task per enabled collector.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::metrics::MetricsError;

use super::error::{CollectorError, ErrorCategory};
use super::runner::{CollectorRunner, CollectorStatus, RunnerOptions};
use super::traits::{CollectorContext, CollectorFactory, Tier};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    /// Collector name.
    pub name: String,
    pub tier: Tier,
    pub interval_seconds: u64,
    /// Schedule description.
    pub schedule: String,
}

/// Runs every enabled collector on its tier's interval.
///
/// Built from an explicit factory list; a collector is enabled unless it is
/// in `disable_collectors`, and, when `enabled_collectors` is set, only if it
/// is listed there. Each runner gets its own task, so a slow collector never
/// delays another. Runs of one collector never overlap: a tick that comes
/// due while a run is in progress is delayed, not queued.
pub struct Scheduler {
    ctx: CollectorContext,
    runners: Vec<Arc<CollectorRunner>>,
    jobs: Vec<JobInfo>,
    tasks: Mutex<JoinSet<Result<(), CollectorError>>>,
}

impl Scheduler {
    /// Build runners for every enabled factory. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// # Errors
    /// Returns `MetricsError` if a collector's instruments cannot be
    /// registered.
    pub fn new(factories: &[CollectorFactory], ctx: CollectorContext) -> Result<Self, MetricsError> {
        let settings = Arc::clone(&ctx.settings);

        let known: BTreeSet<&str> = factories.iter().map(CollectorFactory::name).collect();
        let configured = settings
            .collectors
            .enabled_collectors
            .iter()
            .flatten()
            .chain(settings.collectors.disable_collectors.iter());
        for name in configured {
            if !known.contains(name.as_str()) {
                tracing::warn!(collector = %name, "Unknown collector in configuration");
            }
        }

        let mut runners = Vec::new();
        let mut jobs = Vec::new();
        for factory in factories {
            let descriptor = factory.descriptor();
            if !settings.is_collector_enabled(descriptor.name) {
                tracing::info!(collector = descriptor.name, "Collector disabled");
                continue;
            }

            let options = RunnerOptions::from_settings(&settings, descriptor.tier);
            let collector = factory.build(&ctx)?;
            let runner = CollectorRunner::new(collector, options, &ctx.metrics)?;

            jobs.push(JobInfo {
                name: descriptor.name.to_string(),
                tier: descriptor.tier,
                interval_seconds: runner.update_interval().as_secs(),
                schedule: format!(
                    "every {}",
                    humantime::format_duration(runner.update_interval())
                ),
            });
            runners.push(Arc::new(runner));
        }

        if runners.is_empty() {
            tracing::warn!("No collectors enabled");
        }

        Ok(Self {
            ctx,
            runners,
            jobs,
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// Spawn one task per runner. The first run of each is immediate.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        for runner in &self.runners {
            tasks.spawn(run_schedule(Arc::clone(runner)));
            tracing::info!(
                collector = runner.name(),
                interval_secs = runner.update_interval().as_secs(),
                "Collector scheduled"
            );
        }
        tracing::info!(job_count = self.runners.len(), "Collector scheduler started");
    }

    /// Wait until a collector escalates.
    ///
    /// Returns the fatal error of the first collector to exceed its failure
    /// threshold, or `Ok(())` once every task has ended without one (only
    /// after shutdown).
    pub async fn wait(&self) -> Result<(), CollectorError> {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    return Err(CollectorError::new(
                        ErrorCategory::ClientError,
                        format!("collector task panicked: {e}"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn runners(&self) -> &[Arc<CollectorRunner>] {
        &self.runners
    }

    /// Health snapshot of every scheduled collector.
    pub fn statuses(&self) -> Vec<CollectorStatus> {
        self.runners.iter().map(|r| r.status()).collect()
    }

    /// Whether every scheduled collector is healthy.
    pub fn is_healthy(&self) -> bool {
        self.runners.iter().all(|r| r.is_healthy())
    }

    /// List all scheduled jobs.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs.clone()
    }

    /// Get the number of scheduled jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Gracefully shutdown with default timeout.
    pub async fn shutdown(&self) -> Result<(), CollectorError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Abort every task, then close the upstream session.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), CollectorError> {
        let job_count = self.jobs.len();

        let drained = tokio::time::timeout(timeout, async {
            let mut tasks = self.tasks.lock().await;
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(job_count, "Collector scheduler shutdown timed out");
        }

        let closed = tokio::time::timeout(timeout, self.ctx.gate.close())
            .await
            .unwrap_or_else(|_| Err(CollectorError::timeout("closing upstream session timed out")));
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "Failed to close upstream session");
        }

        tracing::info!(job_count, timed_out = drained.is_err(), "Collector scheduler shutdown complete");
        closed
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_count", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

/// Drive one runner until it escalates.
async fn run_schedule(runner: Arc<CollectorRunner>) -> Result<(), CollectorError> {
    let mut ticker = tokio::time::interval(runner.update_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = runner.update().await {
            tracing::error!(collector = runner.name(), error = %err, "Collector stopped");
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Collector, CollectorDescriptor};
    use crate::config::Settings;
    use crate::metrics::MetricRegistry;
    use crate::upstream::{Bootstrap, MemoryConnector, UpstreamGate};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::OnceLock;

    /// Run counts per collector name, shared by the test collectors below.
    fn runs() -> &'static StdMutex<HashMap<&'static str, usize>> {
        static RUNS: OnceLock<StdMutex<HashMap<&'static str, usize>>> = OnceLock::new();
        RUNS.get_or_init(Default::default)
    }

    fn run_count(name: &'static str) -> usize {
        runs().lock().unwrap().get(name).copied().unwrap_or(0)
    }

    struct CountingCollector {
        descriptor: CollectorDescriptor,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Collector for CountingCollector {
        fn descriptor(&self) -> &CollectorDescriptor {
            &self.descriptor
        }

        async fn collect(&self) -> Result<(), CollectorError> {
            *runs().lock().unwrap().entry(self.descriptor.name).or_default() += 1;
            if self.fail {
                Err(CollectorError::foreign("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    macro_rules! counting_factory {
        ($name:literal, $tier:expr, $fail:expr) => {
            CollectorFactory::new(
                CollectorDescriptor {
                    name: $name,
                    description: "counts runs",
                    tier: $tier,
                },
                |_ctx| {
                    Ok(Arc::new(CountingCollector {
                        descriptor: CollectorDescriptor {
                            name: $name,
                            description: "counts runs",
                            tier: $tier,
                        },
                        fail: $fail,
                    }) as Arc<dyn Collector>)
                },
            )
        };
    }

    fn context(settings: Settings) -> (CollectorContext, MemoryConnector) {
        let connector = MemoryConnector::new(Bootstrap::default());
        let ctx = CollectorContext {
            gate: Arc::new(UpstreamGate::new(Arc::new(connector.clone()), 5)),
            metrics: Arc::new(MetricRegistry::default()),
            settings: Arc::new(settings),
        };
        (ctx, connector)
    }

    #[test]
    fn test_enable_resolution() {
        let mut settings = Settings::default();
        settings.collectors.enabled_collectors =
            Some(["sched_a".to_string(), "sched_b".to_string()].into());
        settings.collectors.disable_collectors = ["sched_b".to_string()].into();
        let (ctx, _) = context(settings);

        let factories = [
            counting_factory!("sched_a", Tier::Fast, false),
            counting_factory!("sched_b", Tier::Fast, false),
            counting_factory!("sched_c", Tier::Fast, false),
        ];
        let scheduler = Scheduler::new(&factories, ctx).unwrap();

        let names: Vec<String> = scheduler.list_jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec!["sched_a"]);
        assert_eq!(scheduler.job_count(), 1);
    }

    #[test]
    fn test_job_intervals_follow_tier() {
        let (ctx, _) = context(Settings::default());
        let factories = [
            counting_factory!("tier_fast", Tier::Fast, false),
            counting_factory!("tier_medium", Tier::Medium, false),
            counting_factory!("tier_slow", Tier::Slow, false),
        ];
        let scheduler = Scheduler::new(&factories, ctx).unwrap();

        let jobs = scheduler.list_jobs();
        assert_eq!(jobs[0].interval_seconds, 60);
        assert_eq!(jobs[1].interval_seconds, 300);
        assert_eq!(jobs[2].interval_seconds, 900);
        assert_eq!(jobs[2].schedule, "every 15m");
    }

    #[tokio::test(start_paused = true)]
    async fn test_runners_tick_independently() {
        let (ctx, _) = context(Settings::default());
        let factories = [
            counting_factory!("tick_fast", Tier::Fast, false),
            counting_factory!("tick_slow", Tier::Slow, false),
        ];
        let scheduler = Scheduler::new(&factories, ctx).unwrap();
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(150)).await;

        // First run is immediate, then every 60s / 900s.
        assert_eq!(run_count("tick_fast"), 3);
        assert_eq!(run_count("tick_slow"), 1);
        assert!(scheduler.is_healthy());
        assert_eq!(scheduler.statuses()[0].total_collections, 3);

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_reported_by_wait() {
        let mut settings = Settings::default();
        settings.monitoring.max_consecutive_failures = 3;
        let (ctx, _) = context(settings);
        let factories = [
            counting_factory!("esc_broken", Tier::Fast, true),
            counting_factory!("esc_fine", Tier::Fast, false),
        ];
        let scheduler = Scheduler::new(&factories, ctx).unwrap();
        scheduler.start().await;

        let err = scheduler.wait().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(err.collector(), Some("esc_broken"));
        assert_eq!(run_count("esc_broken"), 3);
        assert!(!scheduler.is_healthy());

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_gate() {
        let (ctx, connector) = context(Settings::default());
        let gate = Arc::clone(&ctx.gate);
        let scheduler = Scheduler::new(&[], ctx).unwrap();

        gate.get_snapshot().await.unwrap();
        scheduler.start().await;
        scheduler.shutdown().await.unwrap();

        assert_eq!(connector.close_count(), 1);
        assert!(scheduler.wait().await.is_ok());
    }
}
