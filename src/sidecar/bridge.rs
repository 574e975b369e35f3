//! Forwarding host requests to the running sidecar over loopback HTTP.
//!
//! The bridge is payload-agnostic: it hands back the raw response body and
//! leaves decoding to the caller. It only reads supervisor state, never
//! changes it, and never retries.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;

use crate::sidecar::config::{SidecarConfig, SidecarEndpoint};
use crate::sidecar::error::BridgeError;
use crate::sidecar::manager::SidecarSupervisor;
use crate::sidecar::state::{Phase, SupervisorState};

/// A request to forward to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Relative endpoint path, e.g. "/api/data".
    pub path: String,
    /// HTTP method; GET when `None`.
    pub method: Option<String>,
    /// Request body, sent as JSON.
    pub body: Option<String>,
}

impl ApiRequest {
    /// A GET request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: None,
            body: None,
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn method(&self) -> Result<Method, BridgeError> {
        match self.method.as_deref() {
            None => Ok(Method::GET),
            Some(raw) => Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(
                |_| BridgeError::InvalidMethod {
                    method: raw.to_string(),
                },
            ),
        }
    }
}

/// Proxies calls into the sidecar while it is Running.
pub struct ApiBridge {
    state: watch::Receiver<SupervisorState>,
    host: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl ApiBridge {
    /// Create a bridge reading the given supervisor's state.
    pub fn new(supervisor: &SidecarSupervisor) -> Self {
        Self::from_receiver(supervisor.subscribe(), supervisor.config())
    }

    pub(crate) fn from_receiver(
        state: watch::Receiver<SupervisorState>,
        config: &SidecarConfig,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            state,
            host: config.host.clone(),
            timeout: config.request_timeout,
            http_client,
        }
    }

    /// Forward a request and return the raw response body.
    pub async fn forward(&self, request: &ApiRequest) -> Result<String, BridgeError> {
        let endpoint = self.running_endpoint()?;
        let method = request.method()?;
        let url = endpoint.url_for(&request.path);

        tracing::debug!("Forwarding {} {}", method, url);

        let mut builder = self
            .http_client
            .request(method, &url)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(BridgeError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn running_endpoint(&self) -> Result<SidecarEndpoint, BridgeError> {
        let state = self.state.borrow();
        match (state.phase(), state.port()) {
            (Phase::Running, Some(port)) => Ok(SidecarEndpoint {
                host: self.host.clone(),
                port,
            }),
            _ => Err(BridgeError::NotRunning),
        }
    }

    fn classify(&self, error: reqwest::Error) -> BridgeError {
        if error.is_timeout() {
            BridgeError::RequestTimedOut {
                timeout: self.timeout,
            }
        } else {
            BridgeError::ConnectionFailed {
                reason: error.to_string(),
            }
        }
    }
}
