//! Fixtures for running stages and pipelines against in-process services.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::{StaticTokenSource, TokenProvider, TokenSource};
use crate::cancellation::CancellationToken;
use crate::config::ToolClientConfig;
use crate::context::{Services, StageContext};
use crate::core::StageOutput;
use crate::directory::CustomerDirectory;
use crate::generation::GenerationBackend;
use crate::pipeline::{GenerationConfig, StageSpec};
use crate::retry::{JitterStrategy, RetryConfig};
use crate::stages::Stage;
use crate::state::StateStore;
use crate::tools::{LocalTransport, ToolClient, ToolDescriptor};

/// Endpoint reported by in-process tool clients.
pub const SAMPLE_ENDPOINT: &str = "https://tools.test/mcp/";

/// Builds a tool client serving `directory` in-process, with every tool
/// allowed and millisecond retry delays.
#[must_use]
pub fn local_tool_client(directory: Arc<CustomerDirectory>) -> Arc<ToolClient> {
    let source: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::new("test-token"));
    let config = ToolClientConfig::default().with_retry(
        RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None),
    );
    Arc::new(ToolClient::with_transport(
        SAMPLE_ENDPOINT,
        ToolDescriptor::ALL.into_iter().collect(),
        Arc::new(TokenProvider::new(source)),
        config,
        Arc::new(LocalTransport::new(directory)),
    ))
}

/// Builds a tool client over the sample customer directory.
#[must_use]
pub fn sample_tool_client() -> Arc<ToolClient> {
    local_tool_client(Arc::new(CustomerDirectory::with_sample_data()))
}

/// Runs a single stage outside a pipeline.
#[derive(Debug, Default)]
pub struct StageHarness {
    /// Session state the stage sees.
    pub state: StateStore,
    /// Shared services.
    pub services: Services,
    /// Cancellation token handed to the stage.
    pub cancel: CancellationToken,
    capabilities: BTreeSet<ToolDescriptor>,
    generation: Option<GenerationConfig>,
}

impl StageHarness {
    /// Creates a harness with empty state and no services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a harness whose tool client serves the sample directory.
    #[must_use]
    pub fn with_sample_tools() -> Self {
        Self::new().with_tools(sample_tool_client())
    }

    /// Adds a state entry.
    #[must_use]
    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.set(key, value);
        self
    }

    /// Sets the tool client.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolClient>) -> Self {
        self.services = self.services.with_tools(tools);
        self
    }

    /// Sets the generation backend.
    #[must_use]
    pub fn with_generation(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.services = self.services.with_generation(backend);
        self
    }

    /// Sets the stage's tool capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        self.capabilities = tools.into_iter().collect();
        self
    }

    /// Sets the stage's generation settings.
    #[must_use]
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    /// Builds the spec the harness runs `stage` under.
    #[must_use]
    pub fn spec_for(&self, stage: Arc<dyn Stage>) -> StageSpec {
        let name = stage.name().to_string();
        let mut spec = StageSpec::new(name, stage).with_capabilities(self.capabilities.iter().copied());
        if let Some(config) = &self.generation {
            spec = spec.with_generation(config.clone());
        }
        spec
    }

    /// Runs `stage` once.
    pub async fn run(&self, stage: Arc<dyn Stage>) -> StageOutput {
        let spec = self.spec_for(stage);
        self.run_spec(&spec).await
    }

    /// Runs a prepared spec once.
    pub async fn run_spec(&self, spec: &StageSpec) -> StageOutput {
        let ctx = StageContext::new("test-session", spec, &self.state, &self.services, &self.cancel);
        spec.runner.execute(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PromptCaptureStage;
    use serde_json::json;

    #[test]
    fn test_spec_carries_capabilities() {
        let harness = StageHarness::new().with_capabilities([ToolDescriptor::GetCustomer]);
        let spec = harness.spec_for(Arc::new(PromptCaptureStage::new("ask")));
        assert_eq!(spec.name, "prompt_capture");
        assert!(spec.capabilities.contains(&ToolDescriptor::GetCustomer));
    }

    #[tokio::test]
    async fn test_sample_client_serves_directory() {
        let client = sample_tool_client();
        let history = client.get_customer_history(3).await.unwrap().success().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(client.invoke(ToolDescriptor::GetCustomer, json!({"customer_id": 2}), None)
            .await
            .unwrap()
            .success()
            .unwrap()["id"], 2);
    }
}
