//! The view of a session a stage gets while it runs.

use super::Services;
use crate::cancellation::CancellationToken;
use crate::errors::ToolError;
use crate::pipeline::StageSpec;
use crate::state::StateStore;
use crate::tools::{ToolDescriptor, ToolResponse};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Read-only context for one stage execution.
///
/// State is borrowed immutably; a stage reports its writes through its
/// [`crate::core::StageOutput`] and the executor applies them.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    session_id: &'a str,
    spec: &'a StageSpec,
    state: &'a StateStore,
    services: &'a Services,
    cancel: &'a CancellationToken,
}

impl<'a> StageContext<'a> {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        session_id: &'a str,
        spec: &'a StageSpec,
        state: &'a StateStore,
        services: &'a Services,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session_id,
            spec,
            state,
            services,
            cancel,
        }
    }

    /// The session id.
    #[must_use]
    pub fn session_id(&self) -> &'a str {
        self.session_id
    }

    /// The running stage's name.
    #[must_use]
    pub fn stage_name(&self) -> &'a str {
        &self.spec.name
    }

    /// The running stage's spec.
    #[must_use]
    pub fn spec(&self) -> &'a StageSpec {
        self.spec
    }

    /// The session state.
    #[must_use]
    pub fn state(&self) -> &'a StateStore {
        self.state
    }

    /// Shared services.
    #[must_use]
    pub fn services(&self) -> &'a Services {
        self.services
    }

    /// The session cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &'a CancellationToken {
        self.cancel
    }

    /// Returns true if the session was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true if the stage declared `tool` in its capability set.
    #[must_use]
    pub fn may_call(&self, tool: ToolDescriptor) -> bool {
        self.spec.capabilities.contains(&tool)
    }

    /// Calls a tool on behalf of this stage.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotPermitted`] if the stage did not declare the
    /// tool, [`ToolError::NotAllowed`] if no tool client is configured, and
    /// otherwise whatever the client returns.
    pub async fn invoke_tool(
        &self,
        tool: ToolDescriptor,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse, ToolError> {
        if !self.may_call(tool) {
            warn!(stage = %self.spec.name, tool = %tool, "Stage called undeclared tool");
            return Err(ToolError::not_permitted(&self.spec.name, tool.name()));
        }
        let client = self
            .services
            .tools
            .as_ref()
            .ok_or_else(|| ToolError::not_allowed(tool.name()))?;
        client.invoke_with_cancel(tool, params, timeout, self.cancel).await
    }

    /// Calls a tool by wire name on behalf of this stage.
    ///
    /// # Errors
    ///
    /// See [`StageContext::invoke_tool`]; unknown names are `NotAllowed`.
    pub async fn invoke_tool_named(
        &self,
        name: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse, ToolError> {
        let tool = ToolDescriptor::from_name(name).ok_or_else(|| ToolError::not_allowed(name))?;
        self.invoke_tool(tool, params, timeout).await
    }
}
