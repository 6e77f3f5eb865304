//! Upstream connection traits.

use std::sync::Arc;

use crate::collector::CollectorError;

use super::types::Bootstrap;

/// Opens authenticated sessions to the upstream API.
#[async_trait::async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Authenticate and load the initial bootstrap.
    ///
    /// # Errors
    /// Authentication failures carry [`ErrorCategory::Authentication`],
    /// transport failures [`ErrorCategory::Connection`] or
    /// [`ErrorCategory::Timeout`].
    ///
    /// [`ErrorCategory::Authentication`]: crate::collector::ErrorCategory::Authentication
    /// [`ErrorCategory::Connection`]: crate::collector::ErrorCategory::Connection
    /// [`ErrorCategory::Timeout`]: crate::collector::ErrorCategory::Timeout
    async fn connect(&self) -> Result<Arc<dyn UpstreamSession>, CollectorError>;
}

/// A live, authenticated session.
#[async_trait::async_trait]
pub trait UpstreamSession: Send + Sync + 'static {
    /// Re-fetch the full bootstrap from upstream and make it current.
    async fn refresh(&self) -> Result<Arc<Bootstrap>, CollectorError>;

    /// The bootstrap loaded by the last connect or refresh.
    async fn bootstrap(&self) -> Arc<Bootstrap>;

    /// Log out and release resources.
    async fn close(&self) -> Result<(), CollectorError>;
}
