//! Wire transports for JSON-RPC tool calls.

use crate::config::ToolClientConfig;
use crate::directory::CustomerDirectory;
use crate::errors::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Unique request id.
    pub id: String,
    /// The method, i.e. the tool name or `tools/list`.
    pub method: String,
    /// Named parameters.
    pub params: Value,
}

impl RpcRequest {
    /// Creates a new request with a fresh id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Sends one request and returns the decoded response envelope.
///
/// Implementations report HTTP-level failures as [`ToolError`]; the
/// envelope itself (`result` / `error`) is interpreted by the client.
#[async_trait]
pub trait ToolTransport: Send + Sync + std::fmt::Debug {
    /// Sends `request` with `bearer` as the `Authorization` token.
    async fn send(
        &self,
        request: &RpcRequest,
        bearer: &str,
        timeout: Duration,
    ) -> Result<Value, ToolError>;
}

/// HTTPS transport over a pooled, keep-alive `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, config: &ToolClientConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(config.keep_alive_interval())
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(config.pool_idle_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ToolError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn send(
        &self,
        request: &RpcRequest,
        bearer: &str,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| classify(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| classify(&e, timeout))?;
        serde_json::from_slice(&body).map_err(|e| ToolError::InvalidResponse(e.to_string()))
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> ToolError {
    if error.is_timeout() {
        ToolError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        ToolError::Transport(error.to_string())
    }
}

/// In-process transport backed by a [`CustomerDirectory`].
///
/// Speaks the same envelope as the remote endpoint, so the client and the
/// pipeline can be exercised without a network.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    directory: Arc<CustomerDirectory>,
    expected_token: Option<String>,
}

impl LocalTransport {
    /// Creates a transport that accepts any bearer token.
    #[must_use]
    pub fn new(directory: Arc<CustomerDirectory>) -> Self {
        Self {
            directory,
            expected_token: None,
        }
    }

    /// Requires `token` on every request; anything else is answered with 401.
    #[must_use]
    pub fn with_expected_token(mut self, token: impl Into<String>) -> Self {
        self.expected_token = Some(token.into());
        self
    }

    /// The backing directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<CustomerDirectory> {
        &self.directory
    }
}

#[async_trait]
impl ToolTransport for LocalTransport {
    async fn send(
        &self,
        request: &RpcRequest,
        bearer: &str,
        _timeout: Duration,
    ) -> Result<Value, ToolError> {
        if let Some(expected) = &self.expected_token {
            if expected != bearer {
                return Err(ToolError::Status {
                    status: 401,
                    body: "invalid bearer token".to_string(),
                });
            }
        }

        debug!(method = %request.method, "Dispatching tool call in-process");
        let envelope = match self.directory.dispatch(&request.method, &request.params) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "error": {"code": code, "message": message}
            }),
        };
        Ok(envelope)
    }
}
