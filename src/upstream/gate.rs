//! Bounded-concurrency, single-session access to the upstream API.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use prometheus::{CounterVec, HistogramVec};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::Instrument;

use crate::collector::{CollectorError, ErrorCategory};
use crate::metrics::names::{self, labels};
use crate::metrics::{MetricRegistry, MetricSpec, MetricsError};

use super::session::{UpstreamConnector, UpstreamSession};
use super::types::{Bootstrap, Entity, Nvr};

/// Default number of simultaneous upstream calls.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

#[derive(Clone)]
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

/// Gate shared by every collector in front of the upstream API.
///
/// - At most `concurrency_limit` calls are in flight; extra callers wait for
///   a permit.
/// - One session, created lazily by the first caller. The mutex covers
///   creation only, so concurrent first callers connect once and later
///   callers use the session without serializing.
/// - [`get_snapshot`](Self::get_snapshot) always refetches; the cached copy
///   is only a record of the last refresh.
pub struct UpstreamGate {
    connector: Arc<dyn UpstreamConnector>,
    permits: Semaphore,
    concurrency_limit: usize,
    session: Mutex<Option<Arc<dyn UpstreamSession>>>,
    snapshot: RwLock<Option<Arc<Bootstrap>>>,
    api_calls: AtomicU64,
    metrics: Option<ApiMetrics>,
}

impl UpstreamGate {
    pub fn new(connector: Arc<dyn UpstreamConnector>, concurrency_limit: usize) -> Self {
        let concurrency_limit = concurrency_limit.max(1);
        tracing::debug!(concurrency_limit, "Initialized upstream gate");
        Self {
            connector,
            permits: Semaphore::new(concurrency_limit),
            concurrency_limit,
            session: Mutex::new(None),
            snapshot: RwLock::new(None),
            api_calls: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Record per-endpoint request counts and latencies in `registry`.
    pub fn with_metrics(mut self, registry: &MetricRegistry) -> Result<Self, MetricsError> {
        let requests = registry.counter(
            MetricSpec::new(names::API_REQUESTS_TOTAL, "Total number of API requests")
                .labels(&[labels::ENDPOINT, labels::STATUS])
                .unit("requests"),
        )?;
        let duration = registry.histogram(
            MetricSpec::new(names::API_REQUEST_DURATION_SECONDS, "API request duration")
                .labels(&[labels::ENDPOINT])
                .unit("seconds"),
        )?;
        self.metrics = Some(ApiMetrics { requests, duration });
        Ok(self)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Total upstream calls made through the gate.
    pub fn api_call_count(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    /// Fetch a fresh full snapshot and make it the cached one.
    pub async fn get_snapshot(&self) -> Result<Arc<Bootstrap>, CollectorError> {
        let snapshot = self
            .call("bootstrap", |session| async move { session.refresh().await })
            .await?;

        tracing::debug!(
            nvr_name = %snapshot.nvr.name,
            camera_count = snapshot.cameras.len(),
            sensor_count = snapshot.sensors.len(),
            "Fetched bootstrap"
        );

        *self.snapshot.write().await = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// NVR information from the session's current state.
    pub async fn get_root_info(&self) -> Result<Nvr, CollectorError> {
        self.call("nvr", |session| async move {
            Ok(session.bootstrap().await.nvr.clone())
        })
        .await
    }

    /// All entities of one kind from the session's current state.
    pub async fn get_entities<E: Entity>(&self) -> Result<Vec<E>, CollectorError> {
        let endpoint: &'static str = E::KIND.into();
        let entities = self
            .call(endpoint, |session| async move {
                Ok(E::select(&*session.bootstrap().await))
            })
            .await?;
        tracing::debug!(kind = %E::KIND, count = entities.len(), "Fetched entities");
        Ok(entities)
    }

    /// The snapshot stored by the last [`get_snapshot`](Self::get_snapshot).
    pub async fn cached_snapshot(&self) -> Option<Arc<Bootstrap>> {
        self.snapshot.read().await.clone()
    }

    /// Whether a session is currently open.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Close the session and drop the cached snapshot.
    ///
    /// Idempotent. A later call reconnects lazily.
    pub async fn close(&self) -> Result<(), CollectorError> {
        let session = self.session.lock().await.take();
        *self.snapshot.write().await = None;

        match session {
            Some(session) => {
                tracing::debug!("Closing upstream session");
                session.close().await
            }
            None => Ok(()),
        }
    }

    async fn call<T, F, Fut>(&self, endpoint: &str, op: F) -> Result<T, CollectorError>
    where
        F: FnOnce(Arc<dyn UpstreamSession>) -> Fut,
        Fut: Future<Output = Result<T, CollectorError>>,
    {
        let span = tracing::debug_span!("upstream", api.endpoint = endpoint);
        async {
            let _permit = self.permits.acquire().await.map_err(|_| {
                CollectorError::new(ErrorCategory::Connection, "upstream gate closed")
            })?;

            let start = Instant::now();
            self.api_calls.fetch_add(1, Ordering::Relaxed);
            let result = match self.session().await {
                Ok(session) => match op(Arc::clone(&session)).await {
                    Err(err) if err.category() == ErrorCategory::Authentication => {
                        self.invalidate(&session).await;
                        Err(err)
                    }
                    other => other,
                },
                Err(err) => Err(err),
            };

            if let Some(metrics) = &self.metrics {
                let status: &'static str = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.category().into(),
                };
                metrics
                    .requests
                    .with_label_values(&[endpoint, status])
                    .inc();
                metrics
                    .duration
                    .with_label_values(&[endpoint])
                    .observe(start.elapsed().as_secs_f64());
            }

            result.map_err(|err| err.with_context("endpoint", endpoint))
        }
        .instrument(span)
        .await
    }

    async fn session(&self) -> Result<Arc<dyn UpstreamSession>, CollectorError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        tracing::debug!("Creating upstream session");
        let session = self.connector.connect().await?;
        let nvr = session.bootstrap().await.nvr.clone();
        tracing::info!(
            nvr_name = %nvr.name,
            version = nvr.version.as_deref().unwrap_or("unknown"),
            "Connected to UniFi Protect"
        );

        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Forget a session the upstream rejected, so the next call logs in
    /// again. A session already replaced by another caller is left alone.
    async fn invalidate(&self, rejected: &Arc<dyn UpstreamSession>) {
        let mut slot = self.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, rejected))
        {
            *slot = None;
            tracing::warn!("Upstream session rejected; logging in again on next call");
        }
    }
}

impl std::fmt::Debug for UpstreamGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamGate")
            .field("concurrency_limit", &self.concurrency_limit)
            .field("api_calls", &self.api_call_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::memory::MemoryConnector;
    use crate::upstream::types::{Camera, Nvr};
    use std::time::Duration;

    fn bootstrap() -> Bootstrap {
        Bootstrap {
            nvr: Nvr {
                id: "nvr123".to_string(),
                name: "Test NVR".to_string(),
                ..Default::default()
            },
            cameras: vec![
                Camera {
                    id: Some("cam1".to_string()),
                    ..Default::default()
                },
                Camera {
                    id: Some("cam2".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let connector = MemoryConnector::new(bootstrap()).with_latency(Duration::from_millis(20));
        let gate = Arc::new(UpstreamGate::new(Arc::new(connector.clone()), 5));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let gate = Arc::clone(&gate);
            tasks.spawn(async move { gate.get_snapshot().await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(connector.refresh_count(), 20);
        assert!(connector.max_in_flight() <= 5);
        assert!(connector.max_in_flight() >= 2);
        assert_eq!(gate.api_call_count(), 20);
    }

    #[tokio::test]
    async fn test_single_session_for_concurrent_first_callers() {
        let connector = MemoryConnector::new(bootstrap()).with_latency(Duration::from_millis(20));
        let gate = Arc::new(UpstreamGate::new(Arc::new(connector.clone()), 10));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let gate = Arc::clone(&gate);
            tasks.spawn(async move { gate.get_root_info().await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap().id, "nvr123");
        }

        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_always_refetches() {
        let connector = MemoryConnector::new(bootstrap());
        let gate = UpstreamGate::new(Arc::new(connector.clone()), 5);

        assert!(gate.cached_snapshot().await.is_none());
        gate.get_snapshot().await.unwrap();
        gate.get_snapshot().await.unwrap();
        assert_eq!(connector.refresh_count(), 2);

        let mut changed = bootstrap();
        changed.cameras.pop();
        connector.set_bootstrap(changed);

        // Entity reads use the session's current state, not a new fetch.
        assert_eq!(gate.get_entities::<Camera>().await.unwrap().len(), 2);
        let snapshot = gate.get_snapshot().await.unwrap();
        assert_eq!(snapshot.cameras.len(), 1);
        assert_eq!(gate.get_entities::<Camera>().await.unwrap().len(), 1);
        assert_eq!(gate.cached_snapshot().await.unwrap().cameras.len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_reconnects() {
        let connector = MemoryConnector::new(bootstrap());
        let gate = UpstreamGate::new(Arc::new(connector.clone()), 5);

        gate.close().await.unwrap();
        assert_eq!(connector.close_count(), 0);

        gate.get_snapshot().await.unwrap();
        assert!(gate.is_connected().await);

        gate.close().await.unwrap();
        gate.close().await.unwrap();
        assert_eq!(connector.close_count(), 1);
        assert!(!gate.is_connected().await);
        assert!(gate.cached_snapshot().await.is_none());

        gate.get_root_info().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let connector = MemoryConnector::new(bootstrap());
        connector.fail_with(CollectorError::authentication("Authentication failed"));
        let gate = UpstreamGate::new(Arc::new(connector.clone()), 5);

        let err = gate.get_root_info().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert_eq!(err.context()["endpoint"], "nvr");
        assert!(!gate.is_connected().await);

        connector.clear_failure();
        gate.get_root_info().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_session_is_replaced() {
        let connector = MemoryConnector::new(bootstrap());
        let gate = UpstreamGate::new(Arc::new(connector.clone()), 5);
        gate.get_snapshot().await.unwrap();

        // Other failures keep the session.
        connector.fail_with(CollectorError::timeout("refresh timeout"));
        gate.get_snapshot().await.unwrap_err();
        assert!(gate.is_connected().await);

        connector.fail_with(CollectorError::authentication("401 Unauthorized"));
        let err = gate.get_snapshot().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert!(!gate.is_connected().await);
        assert_eq!(connector.connect_count(), 1);

        connector.clear_failure();
        gate.get_snapshot().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert!(gate.is_connected().await);
    }

    #[tokio::test]
    async fn test_api_metrics() {
        let registry = MetricRegistry::default();
        let connector = MemoryConnector::new(bootstrap());
        let gate = UpstreamGate::new(Arc::new(connector.clone()), 5)
            .with_metrics(&registry)
            .unwrap();

        gate.get_snapshot().await.unwrap();
        connector.fail_with(CollectorError::timeout("refresh timeout"));
        gate.get_snapshot().await.unwrap_err();

        assert_eq!(
            registry.sample(
                names::API_REQUESTS_TOTAL,
                &[("endpoint", "bootstrap"), ("status", "ok")]
            ),
            Some(1.0)
        );
        assert_eq!(
            registry.sample(
                names::API_REQUESTS_TOTAL,
                &[("endpoint", "bootstrap"), ("status", "timeout")]
            ),
            Some(1.0)
        );
        assert_eq!(
            registry.sample(
                names::API_REQUEST_DURATION_SECONDS,
                &[("endpoint", "bootstrap")]
            ),
            Some(2.0)
        );
    }
}
