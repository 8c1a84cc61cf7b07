//! Adapter interfaces for external services.
//!
//! Every adapter talks HTTP through one shared [`HttpClient`] per router.
//! Outbound requests are built from scratch and carry only the forwarded
//! `Authorization` credential plus the protocol headers the call itself
//! needs, so inbound pipeline metadata never leaks to a service.

pub mod derivative;
pub mod mapping;
pub mod proxy;
pub mod triplestore;

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, HttpSettings};
use crate::core::error::{Result, SyncError};

// Re-export the service contracts
pub use derivative::{Derivative, DerivativeService, DerivativeSink, HttpDerivativeService, HttpUploader};
pub use mapping::{HttpMappingDirectory, Mapping, MappingDirectory};
pub use proxy::{HttpWriteProxy, ProxyResponse, WriteProxy};
pub use triplestore::{HttpRdfSource, HttpTriplestore, RdfSource, Triplestore};

/// Result of a call whose failure statuses may mean "already done"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),

    /// The service reported it is already in the requested state
    Converged,
}

/// Statuses an adapter operation treats as convergence instead of failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceRule {
    #[serde(default)]
    pub statuses: Vec<u16>,
}

impl ConvergenceRule {
    pub fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: statuses.to_vec(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }
}

/// Pooled HTTP client shared read-only across the stages of a router
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// Ceiling on waiting for a pooled connection and the full exchange
    deadline: Duration,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .timeout(Duration::from_millis(settings.socket_timeout_ms))
            .pool_max_idle_per_host(settings.max_connections)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let deadline = Duration::from_millis(
            settings.connection_request_timeout_ms + settings.socket_timeout_ms,
        );

        Ok(Self { client, deadline })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, converting timeouts and transport errors into
    /// retryable failures
    pub async fn send(&self, call: &str, request: RequestBuilder) -> Result<Response> {
        match tokio::time::timeout(self.deadline, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_builder() => Err(SyncError::Rejected {
                call: call.to_string(),
                status: 0,
                message: e.to_string(),
            }),
            Ok(Err(e)) => Err(SyncError::transient(call, e.to_string())),
            Err(_) => Err(SyncError::transient(
                call,
                format!("no response within {:?}", self.deadline),
            )),
        }
    }
}

/// Map a non-success status to the error taxonomy
pub fn status_error(call: &str, status: StatusCode, body: &str) -> SyncError {
    let message = format!("{status}: {}", body.trim());
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SyncError::transient(call, message)
    } else {
        SyncError::Rejected {
            call: call.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

/// Check a response: success passes through, a convergence status becomes
/// [`Outcome::Converged`], anything else is an error
pub async fn check(
    call: &str,
    response: Response,
    convergence: &ConvergenceRule,
) -> Result<Outcome<Response>> {
    let status = response.status();
    if !status.is_success() && convergence.matches(status.as_u16()) {
        return Ok(Outcome::Converged);
    }
    success(call, response).await.map(Outcome::Done)
}

/// Check a response of a call that has no "already done" answer
pub async fn success(call: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(call, status, &body))
}

/// Join a relative path onto a normalized base
pub fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Find the target of the first `Link` header entry with the given rel
pub fn link_target(response: &Response, rel: &str) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|entry| parse_link(entry, rel))
}

fn parse_link(entry: &str, rel: &str) -> Option<String> {
    let mut parts = entry.split(';');
    let target = parts.next()?.trim();
    let target = target.strip_prefix('<')?.strip_suffix('>')?;

    let has_rel = parts.any(|param| {
        let Some((key, value)) = param.split_once('=') else {
            return false;
        };
        key.trim().eq_ignore_ascii_case("rel")
            && value
                .trim()
                .trim_matches('"')
                .split_whitespace()
                .any(|r| r == rel)
    });

    has_rel.then(|| target.to_string())
}
