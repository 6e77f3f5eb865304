//! HTTP connector for a UniFi OS console running Protect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::collector::{CollectorError, ErrorCategory};
use crate::config::{Secret, Settings};

use super::session::{UpstreamConnector, UpstreamSession};
use super::types::{Bootstrap, ProtectEvent};

const LOGIN_PATH: &str = "/api/auth/login";
const LOGOUT_PATH: &str = "/api/auth/logout";
const BOOTSTRAP_PATH: &str = "/proxy/protect/api/bootstrap";
const EVENTS_PATH: &str = "/proxy/protect/api/events";
const CSRF_HEADER: &str = "x-csrf-token";

/// How far back the events query reaches on each refresh.
pub const DEFAULT_EVENT_WINDOW: Duration = Duration::from_secs(3600);

/// Backoff between retries of one request; doubled per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Connector that logs in with username and password.
#[derive(Clone)]
pub struct ProtectConnector {
    base_url: String,
    username: String,
    password: Secret,
    verify_ssl: bool,
    timeout: Duration,
    max_retries: u32,
    event_window: Duration,
}

impl ProtectConnector {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: Secret) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            verify_ssl: false,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            event_window: DEFAULT_EVENT_WINDOW,
        }
    }

    /// Build from the `unifi` and `api` sections of the settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let unifi = &settings.unifi;
        Self::new(
            format!("https://{}:{}", unifi.host, unifi.port),
            unifi.username.clone(),
            unifi.password.clone(),
        )
        .with_verify_ssl(unifi.verify_ssl)
        .with_timeout(Duration::from_secs(settings.api.timeout))
        .with_max_retries(settings.api.max_retries)
    }

    #[must_use]
    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_event_window(mut self, window: Duration) -> Self {
        self.event_window = window;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_client(&self) -> Result<Client, CollectorError> {
        Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .timeout(self.timeout)
            .build()
            .map_err(CollectorError::from)
    }
}

impl std::fmt::Debug for ProtectConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectConnector")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for ProtectConnector {
    async fn connect(&self) -> Result<Arc<dyn UpstreamSession>, CollectorError> {
        let client = self.build_client()?;

        tracing::debug!(
            base_url = %self.base_url,
            verify_ssl = self.verify_ssl,
            "Logging in to UniFi OS"
        );
        let response = client
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password.expose(),
                "rememberMe": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let err = match ErrorCategory::from_status(status) {
                ErrorCategory::Authentication => {
                    CollectorError::authentication("UniFi OS rejected the credentials")
                }
                category => CollectorError::new(category, format!("login failed with HTTP {status}")),
            };
            return Err(err.with_context("status", status));
        }

        let csrf_token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let session = ProtectSession {
            client,
            base_url: self.base_url.clone(),
            csrf_token,
            max_retries: self.max_retries,
            event_window: self.event_window,
            current: RwLock::new(Arc::new(Bootstrap::default())),
        };
        session.refresh().await?;
        Ok(Arc::new(session))
    }
}

struct ProtectSession {
    client: Client,
    base_url: String,
    csrf_token: Option<String>,
    max_retries: u32,
    event_window: Duration,
    current: RwLock<Arc<Bootstrap>>,
}

impl ProtectSession {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.csrf_token {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    /// GET `path` and decode the body, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CollectorError> {
        let mut attempt = 0;
        loop {
            let result = async {
                let response = self.request(Method::GET, path).query(query).send().await?;
                let response = check_status(response, path)?;
                Ok::<T, CollectorError>(response.json::<T>().await?)
            }
            .await;

            match result {
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    attempt += 1;
                    let backoff = RETRY_BACKOFF * 2u32.saturating_pow(attempt - 1);
                    tracing::debug!(
                        path,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying upstream request"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait::async_trait]
impl UpstreamSession for ProtectSession {
    async fn refresh(&self) -> Result<Arc<Bootstrap>, CollectorError> {
        let mut bootstrap: Bootstrap = self.get_json(BOOTSTRAP_PATH, &[]).await?;

        let end = Utc::now().timestamp_millis();
        let start = end - self.event_window.as_millis() as i64;
        bootstrap.events = self
            .get_json::<Vec<ProtectEvent>>(
                EVENTS_PATH,
                &[("start", start.to_string()), ("end", end.to_string())],
            )
            .await?;

        let bootstrap = Arc::new(bootstrap);
        *self.current.write().await = Arc::clone(&bootstrap);
        Ok(bootstrap)
    }

    async fn bootstrap(&self) -> Arc<Bootstrap> {
        Arc::clone(&*self.current.read().await)
    }

    async fn close(&self) -> Result<(), CollectorError> {
        let response = self.request(Method::POST, LOGOUT_PATH).send().await?;
        check_status(response, LOGOUT_PATH)?;
        tracing::debug!("Logged out of UniFi OS");
        Ok(())
    }
}

fn check_status(response: Response, path: &str) -> Result<Response, CollectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let err = match ErrorCategory::from_status(code) {
        ErrorCategory::NotAvailable => CollectorError::not_available(path),
        category => CollectorError::new(category, format!("{path} returned HTTP {code}"))
            .with_context("endpoint", path),
    };
    Err(err.with_context("status", code))
}

fn is_transient(err: &CollectorError) -> bool {
    matches!(
        err.category(),
        ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::ServerError
            | ErrorCategory::RateLimit
    )
}
