//! MEGA API client with request/response handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::error::ApiErrorCode;
use super::transport::Transport;
use crate::error::{MegaError, Result};

/// Tunables for command requests.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Attempts per command while the service answers with a transient code.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single round trip.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(32),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// MEGA API client.
///
/// Cheap to clone; clones share the transport and the request-id sequence.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    request_id: Arc<AtomicU64>,
    session_id: Option<String>,
    folder_handle: Option<String>,
    config: ApiConfig,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("authenticated", &self.session_id.is_some())
            .field("folder_handle", &self.folder_handle)
            .finish()
    }
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            request_id: Arc::new(AtomicU64::new(rand::random::<u32>() as u64)),
            session_id: None,
            folder_handle: None,
            config: ApiConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the session ID for authenticated requests.
    pub fn set_session_id(&mut self, sid: String) {
        self.session_id = Some(sid);
    }

    pub fn clear_session_id(&mut self) {
        self.session_id = None;
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Scope anonymous requests to a public folder (`n=` query parameter).
    pub fn set_folder_handle(&mut self, handle: impl Into<String>) {
        self.folder_handle = Some(handle.into());
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn query(&self) -> String {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let mut query = format!("id={}", id);
        if let Some(sid) = &self.session_id {
            query.push_str("&sid=");
            query.push_str(sid);
        }
        if let Some(n) = &self.folder_handle {
            query.push_str("&n=");
            query.push_str(n);
        }
        query
    }

    /// Make a single API request.
    ///
    /// A negative numeric answer becomes an error; transient codes (`EAGAIN`
    /// and friends) are retried with exponential backoff first.
    pub async fn request(&self, request: Value) -> Result<Value> {
        let action = action_of(&request);
        let body = serde_json::to_string(&[&request])?;
        let response = self.send(&action, body).await?;
        match response {
            Value::Array(mut items) if !items.is_empty() => {
                let first = items.swap_remove(0);
                match first.as_i64() {
                    Some(code) if code < 0 => Err(ApiErrorCode::from(code).into_error(code)),
                    _ => Ok(first),
                }
            }
            _ => Err(MegaError::InvalidResponse),
        }
    }

    /// Send several commands in one round trip.
    ///
    /// Per-command failures are returned in place as negative integers.
    pub async fn request_batch(&self, requests: Vec<Value>) -> Result<Vec<Value>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let action = requests.first().map(action_of).unwrap_or_default();
        let body = serde_json::to_string(&requests)?;
        match self.send(&action, body).await? {
            Value::Array(items) if items.len() == requests.len() => Ok(items),
            _ => Err(MegaError::InvalidResponse),
        }
    }

    async fn send(&self, action: &str, body: String) -> Result<Value> {
        let mut delay = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let query = self.query();
            debug!(action, attempt, "api request");

            let outcome = match timeout(
                self.config.request_timeout,
                self.transport.post_command(&query, body.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => return Err(MegaError::Network("request timed out".to_string())),
            };

            let transient = match outcome {
                Ok(text) => {
                    let response: Value =
                        serde_json::from_str(&text).map_err(|_| MegaError::InvalidResponse)?;
                    match whole_batch_code(&response) {
                        Some(code) if ApiErrorCode::from(code).is_transient() => code,
                        Some(code) => {
                            debug!(action, code, "api error");
                            return Err(ApiErrorCode::from(code).into_error(code));
                        }
                        None => return Ok(response),
                    }
                }
                Err(MegaError::RateLimited) => ApiErrorCode::RateLimit as i64,
                Err(e) => return Err(e),
            };

            if attempt >= self.config.max_attempts {
                warn!(action, attempts = attempt, "service still busy, giving up");
                return Err(ApiErrorCode::from(transient).into_error(transient));
            }
            debug!(action, code = transient, delay_ms = delay.as_millis() as u64, "retrying");
            sleep(delay).await;
            delay = (delay * 2).min(self.config.max_backoff);
        }
    }
}

fn action_of(request: &Value) -> String {
    request
        .get("a")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// A bare negative number, or a one-element array holding one, fails the
/// whole request.
fn whole_batch_code(response: &Value) -> Option<i64> {
    match response {
        Value::Number(n) => n.as_i64().filter(|c| *c < 0),
        Value::Array(items) if items.len() == 1 => items[0].as_i64().filter(|c| *c < 0),
        _ => None,
    }
}
