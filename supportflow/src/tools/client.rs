//! Authenticated JSON-RPC client for the remote tool endpoint.

use super::catalog::{
    CreateTicketParams, Customer, CustomerStatus, GetCustomerHistoryParams, GetCustomerParams,
    ListCustomersParams, Ticket, ToolDescriptor, ToolResponse, UpdateAck, UpdateCustomerParams,
};
use super::transport::{HttpTransport, RpcRequest, ToolTransport};
use crate::auth::{derive_audience, TokenProvider};
use crate::cancellation::CancellationToken;
use crate::config::ToolClientConfig;
use crate::errors::ToolError;
use crate::retry::retry_if;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Calls allow-listed tools on one endpoint.
///
/// Safe to share across sessions: tokens come from the shared
/// [`TokenProvider`] and the transport pools its connections.
#[derive(Debug)]
pub struct ToolClient {
    endpoint: String,
    audience: String,
    allow_list: BTreeSet<ToolDescriptor>,
    tokens: Arc<TokenProvider>,
    transport: Arc<dyn ToolTransport>,
    config: ToolClientConfig,
}

impl ToolClient {
    /// Creates a client that talks HTTPS to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        allow_list: BTreeSet<ToolDescriptor>,
        tokens: Arc<TokenProvider>,
        config: ToolClientConfig,
    ) -> Result<Self, ToolError> {
        let endpoint = endpoint.into();
        let transport = HttpTransport::new(endpoint.clone(), &config)?;
        Ok(Self::with_transport(
            endpoint,
            allow_list,
            tokens,
            config,
            Arc::new(transport),
        ))
    }

    /// Creates a client over an explicit transport.
    #[must_use]
    pub fn with_transport(
        endpoint: impl Into<String>,
        allow_list: BTreeSet<ToolDescriptor>,
        tokens: Arc<TokenProvider>,
        config: ToolClientConfig,
        transport: Arc<dyn ToolTransport>,
    ) -> Self {
        let endpoint = endpoint.into();
        let audience = derive_audience(&endpoint, &config.mount_path);
        Self {
            endpoint,
            audience,
            allow_list,
            tokens,
            transport,
            config,
        }
    }

    /// The endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The token audience derived from the endpoint.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// The tools this client may call.
    #[must_use]
    pub fn allow_list(&self) -> &BTreeSet<ToolDescriptor> {
        &self.allow_list
    }

    /// Returns true if `tool` is on the allow-list.
    #[must_use]
    pub fn is_allowed(&self, tool: ToolDescriptor) -> bool {
        self.allow_list.contains(&tool)
    }

    /// Resolves a wire name against the catalog and the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotAllowed`] for unknown or filtered names.
    pub fn resolve(&self, name: &str) -> Result<ToolDescriptor, ToolError> {
        ToolDescriptor::from_name(name)
            .filter(|tool| self.is_allowed(*tool))
            .ok_or_else(|| ToolError::not_allowed(name))
    }

    /// Lists the tools the endpoint advertises that are also allow-listed.
    ///
    /// # Errors
    ///
    /// Returns the transport or credential error of the `tools/list` call.
    pub async fn list_tools(&self) -> Result<BTreeSet<ToolDescriptor>, ToolError> {
        let result = self.call("tools/list", json!({}), self.config.timeout()).await?;

        let advertised = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidResponse("tools/list returned no tools array".into()))?;

        Ok(advertised
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str))
            .filter_map(ToolDescriptor::from_name)
            .filter(|tool| self.is_allowed(*tool))
            .collect())
    }

    /// Fails unless every allow-listed tool is advertised by the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::CatalogMismatch`] naming the missing tools.
    pub async fn verify_catalog(&self) -> Result<(), ToolError> {
        let available = self.list_tools().await?;
        let missing: Vec<String> = self
            .allow_list
            .difference(&available)
            .map(|tool| tool.name().to_string())
            .collect();

        if missing.is_empty() {
            info!(endpoint = %self.endpoint, tools = available.len(), "Tool catalog verified");
            Ok(())
        } else {
            Err(ToolError::CatalogMismatch { missing })
        }
    }

    /// Invokes a tool by wire name.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn invoke_named(
        &self,
        name: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse, ToolError> {
        let tool = self.resolve(name)?;
        self.invoke(tool, params, timeout).await
    }

    /// Invokes a tool.
    ///
    /// Each attempt gets a fresh token and its own timeout (the configured
    /// default when `timeout` is `None`). Transport failures are retried;
    /// HTTP 4xx, JSON-RPC errors and `{error}` rejections are not.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotAllowed`] without any network traffic for
    /// tools outside the allow-list, otherwise the last attempt's error.
    pub async fn invoke(
        &self,
        tool: ToolDescriptor,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse, ToolError> {
        if !self.is_allowed(tool) {
            warn!(tool = %tool, "Rejected call to tool outside allow-list");
            return Err(ToolError::not_allowed(tool.name()));
        }

        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let started = Instant::now();
        let result = self.call(tool.name(), params, timeout).await?;
        let response = ToolResponse::from_value(result);

        debug!(
            tool = %tool,
            rejected = response.is_rejected(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Tool call completed"
        );
        Ok(response)
    }

    /// Invokes a tool, aborting if `cancel` fires first.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Cancelled`] on cancellation, otherwise as
    /// [`ToolClient::invoke`].
    pub async fn invoke_with_cancel(
        &self,
        tool: ToolDescriptor,
        params: Value,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolResponse, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                reason: cancel.reason_or_default(),
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(tool = %tool, "Tool call aborted by cancellation");
                Err(ToolError::Cancelled { reason: cancel.reason_or_default() })
            }
            result = self.invoke(tool, params, timeout) => result,
        }
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, ToolError> {
        retry_if(
            &self.config.retry,
            method,
            || self.call_once(method, params.clone(), timeout),
            ToolError::is_retryable,
        )
        .await
    }

    async fn call_once(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, ToolError> {
        let bearer = self.tokens.get_token(&self.audience).await?;
        let request = RpcRequest::new(method, params);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let envelope = match tokio::time::timeout(timeout, self.transport.send(&request, &bearer, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout { timeout_ms }),
        };

        let envelope = match envelope {
            Err(ToolError::Status { status: 401, body }) => {
                self.tokens.invalidate(&self.audience).await;
                return Err(ToolError::Status { status: 401, body });
            }
            other => other?,
        };

        unwrap_envelope(envelope)
    }

    /// Calls `get_customer`; `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn get_customer(&self, customer_id: i64) -> Result<ToolResponse<Option<Customer>>, ToolError> {
        self.typed(ToolDescriptor::GetCustomer, &GetCustomerParams { customer_id })
            .await
    }

    /// Calls `list_customers`.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn list_customers(
        &self,
        status: CustomerStatus,
        limit: u32,
    ) -> Result<ToolResponse<Vec<Customer>>, ToolError> {
        self.typed(
            ToolDescriptor::ListCustomers,
            &ListCustomersParams::new(status).with_limit(limit),
        )
        .await
    }

    /// Calls `update_customer`.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn update_customer(
        &self,
        customer_id: i64,
        field_name: impl Into<String>,
        field_value: Value,
    ) -> Result<ToolResponse<UpdateAck>, ToolError> {
        self.typed(
            ToolDescriptor::UpdateCustomer,
            &UpdateCustomerParams {
                customer_id,
                field_name: field_name.into(),
                field_value,
            },
        )
        .await
    }

    /// Calls `create_ticket`.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn create_ticket(
        &self,
        customer_id: i64,
        issue: impl Into<String>,
        priority: impl Into<String>,
    ) -> Result<ToolResponse<Ticket>, ToolError> {
        self.typed(
            ToolDescriptor::CreateTicket,
            &CreateTicketParams {
                customer_id,
                issue: issue.into(),
                priority: priority.into(),
            },
        )
        .await
    }

    /// Calls `get_customer_history`.
    ///
    /// # Errors
    ///
    /// See [`ToolClient::invoke`].
    pub async fn get_customer_history(&self, customer_id: i64) -> Result<ToolResponse<Vec<Ticket>>, ToolError> {
        self.typed(
            ToolDescriptor::GetCustomerHistory,
            &GetCustomerHistoryParams { customer_id },
        )
        .await
    }

    async fn typed<P, T>(&self, tool: ToolDescriptor, params: &P) -> Result<ToolResponse<T>, ToolError>
    where
        P: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| ToolError::InvalidParams {
            name: tool.name().to_string(),
            reason: e.to_string(),
        })?;
        self.invoke(tool, params, None).await?.decode()
    }
}

/// Extracts the tool result from a JSON-RPC envelope.
///
/// A top-level `error` object is a protocol error. A top-level `error`
/// string is the tool's own rejection and is passed through as the result.
fn unwrap_envelope(mut envelope: Value) -> Result<Value, ToolError> {
    match envelope.get("error") {
        Some(Value::Object(err)) => {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(-32603);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ToolError::Rpc { code, message });
        }
        Some(Value::String(_)) => return Ok(envelope),
        _ => {}
    }

    match envelope.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ToolError::InvalidResponse(
            "response has neither result nor error".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticTokenSource, TokenSource};
    use crate::directory::CustomerDirectory;
    use crate::retry::{JitterStrategy, RetryConfig};
    use crate::testing::FlakyTransport;
    use crate::tools::LocalTransport;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(retries: usize) -> ToolClientConfig {
        ToolClientConfig::default().with_retry(
            RetryConfig::new()
                .with_max_retries(retries)
                .with_base_delay_ms(1)
                .with_jitter(JitterStrategy::None),
        )
    }

    fn tokens(token: &str) -> Arc<TokenProvider> {
        let source: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::new(token));
        Arc::new(TokenProvider::new(source))
    }

    fn all_tools() -> BTreeSet<ToolDescriptor> {
        ToolDescriptor::ALL.into_iter().collect()
    }

    fn local_client(allow: BTreeSet<ToolDescriptor>) -> ToolClient {
        ToolClient::with_transport(
            "https://tools.example/mcp/",
            allow,
            tokens("tkn"),
            fast_config(2),
            Arc::new(LocalTransport::new(Arc::new(CustomerDirectory::with_sample_data()))),
        )
    }

    #[test]
    fn test_audience_derived_from_endpoint() {
        let client = local_client(all_tools());
        assert_eq!(client.audience(), "https://tools.example");
    }

    #[test]
    fn test_unwrap_envelope_variants() {
        assert_eq!(unwrap_envelope(json!({"result": [1]})).unwrap(), json!([1]));
        assert_eq!(
            unwrap_envelope(json!({"error": "Invalid priority."})).unwrap(),
            json!({"error": "Invalid priority."})
        );
        assert!(matches!(
            unwrap_envelope(json!({"error": {"code": -32601, "message": "nope"}})),
            Err(ToolError::Rpc { code: -32601, .. })
        ));
        assert!(matches!(
            unwrap_envelope(json!({"id": "1"})),
            Err(ToolError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_typed_helpers_over_local_transport() {
        let client = local_client(all_tools());

        let customer = client.get_customer(3).await.unwrap().success().unwrap().unwrap();
        assert_eq!(customer.id, 3);

        let missing = client.get_customer(999).await.unwrap().success().unwrap();
        assert!(missing.is_none());

        let history = client.get_customer_history(3).await.unwrap().success().unwrap();
        assert_eq!(history.len(), 3);

        let rejected = client.update_customer(5, "status", json!("vip")).await.unwrap();
        assert_eq!(
            rejected,
            ToolResponse::Rejected {
                reason: "Invalid status value.".to_string()
            }
        );

        let ticket = client
            .create_ticket(3, "Refund request", "medium")
            .await
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(ticket.status, "open");
    }

    #[tokio::test]
    async fn test_tool_outside_allow_list_fails_fast() {
        let flaky = Arc::new(FlakyTransport::failing(0, ToolError::Transport("unused".into())));
        let client = ToolClient::with_transport(
            "https://tools.example/mcp/",
            [ToolDescriptor::GetCustomer].into_iter().collect(),
            tokens("tkn"),
            fast_config(2),
            flaky.clone(),
        );

        let err = client
            .invoke(ToolDescriptor::UpdateCustomer, json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotAllowed { ref name } if name == "update_customer"));

        let err = client.invoke_named("drop_tables", json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolError::NotAllowed { .. }));
        assert_eq!(flaky.sends(), 0);
    }

    #[tokio::test]
    async fn test_transport_errors_retried_exactly_max_retries() {
        let flaky = Arc::new(FlakyTransport::failing(
            usize::MAX,
            ToolError::Transport("connection reset".into()),
        ));
        let client = ToolClient::with_transport(
            "https://tools.example/mcp/",
            all_tools(),
            tokens("tkn"),
            fast_config(2),
            flaky.clone(),
        );

        let err = client
            .invoke(ToolDescriptor::GetCustomer, json!({"customer_id": 1}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
        assert_eq!(flaky.sends(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let flaky = Arc::new(FlakyTransport::failing(
            1,
            ToolError::Status {
                status: 503,
                body: "unavailable".into(),
            },
        ));
        let client = ToolClient::with_transport(
            "https://tools.example/mcp/",
            all_tools(),
            tokens("tkn"),
            fast_config(2),
            flaky.clone(),
        );

        let response = client
            .invoke(ToolDescriptor::GetCustomer, json!({"customer_id": 1}), None)
            .await
            .unwrap();
        assert!(!response.is_rejected());
        assert_eq!(flaky.sends(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let flaky = Arc::new(FlakyTransport::failing(0, ToolError::Transport("unused".into())));
        let client = ToolClient::with_transport(
            "https://tools.example/mcp/",
            all_tools(),
            tokens("tkn"),
            fast_config(2),
            flaky.clone(),
        );

        let response = client
            .invoke(
                ToolDescriptor::UpdateCustomer,
                json!({"customer_id": 5, "field_name": "status", "field_value": "vip"}),
                None,
            )
            .await
            .unwrap();
        assert!(response.is_rejected());
        assert_eq!(flaky.sends(), 1);
    }

    #[tokio::test]
    async fn test_http_4xx_not_retried_and_5xx_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "get_customer"})))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "list_customers"})))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = ToolClient::new(
            format!("{}/mcp/", server.uri()),
            all_tools(),
            tokens("tkn"),
            fast_config(2),
        )
        .unwrap();

        let err = client.get_customer(1).await.unwrap_err();
        assert!(matches!(err, ToolError::Status { status: 400, .. }));

        let err = client
            .list_customers(CustomerStatus::Active, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_http_sends_bearer_and_parses_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer tkn"))
            .and(body_partial_json(json!({
                "jsonrpc": "2.0",
                "method": "get_customer_history",
                "params": {"customer_id": 3}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "result": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ToolClient::new(
            format!("{}/mcp/", server.uri()),
            all_tools(),
            tokens("tkn"),
            fast_config(0),
        )
        .unwrap();

        let history = client.get_customer_history(3).await.unwrap().success().unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_per_call_timeout_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(2)
            .mount(&server)
            .await;

        let client = ToolClient::new(
            format!("{}/mcp/", server.uri()),
            all_tools(),
            tokens("tkn"),
            fast_config(1),
        )
        .unwrap();

        let err = client
            .invoke(
                ToolDescriptor::GetCustomer,
                json!({"customer_id": 1}),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_token() {
        let directory = Arc::new(CustomerDirectory::with_sample_data());
        let provider = tokens("stale");
        let client = ToolClient::with_transport(
            "https://tools.example/mcp/",
            all_tools(),
            provider.clone(),
            fast_config(2),
            Arc::new(LocalTransport::new(directory).with_expected_token("fresh")),
        );

        let err = client.get_customer(1).await.unwrap_err();
        assert!(matches!(err, ToolError::Status { status: 401, .. }));

        // Static source hands back the same token, but the cache was dropped.
        client.get_customer(1).await.unwrap_err();
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_list_tools_intersects_allow_list() {
        let client = local_client(
            [ToolDescriptor::GetCustomer, ToolDescriptor::CreateTicket]
                .into_iter()
                .collect(),
        );
        let tools = client.list_tools().await.unwrap();
        assert_eq!(
            tools.into_iter().collect::<Vec<_>>(),
            vec![ToolDescriptor::GetCustomer, ToolDescriptor::CreateTicket]
        );
        client.verify_catalog().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_catalog_reports_missing_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"tools": [{"name": "get_customer"}]}
            })))
            .mount(&server)
            .await;

        let client = ToolClient::new(
            format!("{}/mcp/", server.uri()),
            [ToolDescriptor::GetCustomer, ToolDescriptor::CreateTicket]
                .into_iter()
                .collect(),
            tokens("tkn"),
            fast_config(0),
        )
        .unwrap();

        let err = client.verify_catalog().await.unwrap_err();
        assert!(matches!(err, ToolError::CatalogMismatch { ref missing } if missing == &vec!["create_ticket".to_string()]));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = ToolClient::new(
            format!("{}/mcp/", server.uri()),
            all_tools(),
            tokens("tkn"),
            fast_config(0),
        )
        .unwrap();

        let cancel = Arc::new(CancellationToken::new());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel("user disconnected");
        });

        let started = Instant::now();
        let err = client
            .invoke_with_cancel(
                ToolDescriptor::GetCustomer,
                json!({"customer_id": 1}),
                None,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Cancelled { ref reason } if reason == "user disconnected"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
