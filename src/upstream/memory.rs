//! In-process upstream serving a scripted bootstrap.
//!
//! Used by tests and embedders that drive collectors without an NVR. Records how it
//! is driven (connects, refreshes, peak concurrency) so callers can assert on
//! the gate's behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::collector::CollectorError;

use super::session::{UpstreamConnector, UpstreamSession};
use super::types::Bootstrap;

#[derive(Default)]
struct MemoryState {
    bootstrap: Mutex<Bootstrap>,
    failure: Mutex<Option<CollectorError>>,
    latency: Mutex<Duration>,
    connects: AtomicUsize,
    refreshes: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryState {
    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(&self) -> Option<CollectorError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn bootstrap(&self) -> Bootstrap {
        self.bootstrap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Connector backed by an in-memory [`Bootstrap`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new(bootstrap: Bootstrap) -> Self {
        let connector = Self::default();
        connector.set_bootstrap(bootstrap);
        connector
    }

    /// Delay applied to every connect and refresh.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        *self
            .state
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    /// Replace the state served by subsequent refreshes.
    pub fn set_bootstrap(&self, bootstrap: Bootstrap) {
        *self
            .state
            .bootstrap
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = bootstrap;
    }

    /// Make every connect and refresh fail with `err` until cleared.
    pub fn fail_with(&self, err: CollectorError) {
        *self
            .state
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub fn clear_failure(&self) {
        *self
            .state
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Highest number of refreshes observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("connects", &self.connect_count())
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn UpstreamSession>, CollectorError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.state.latency()).await;

        if let Some(err) = self.state.failure() {
            return Err(err);
        }

        Ok(Arc::new(MemorySession {
            current: RwLock::new(Arc::new(self.state.bootstrap())),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
    current: RwLock<Arc<Bootstrap>>,
}

#[async_trait::async_trait]
impl UpstreamSession for MemorySession {
    async fn refresh(&self) -> Result<Arc<Bootstrap>, CollectorError> {
        self.state.refreshes.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.state.latency()).await;
        let result = match self.state.failure() {
            Some(err) => Err(err),
            None => {
                let fresh = Arc::new(self.state.bootstrap());
                *self.current.write().await = Arc::clone(&fresh);
                Ok(fresh)
            }
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn bootstrap(&self) -> Arc<Bootstrap> {
        Arc::clone(&*self.current.read().await)
    }

    async fn close(&self) -> Result<(), CollectorError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
