//! Shared collaborators handed to every stage.

use crate::config::DEFAULT_MODEL;
use crate::generation::GenerationBackend;
use crate::tools::ToolClient;
use std::sync::Arc;

/// Process-wide collaborators, built once at startup and shared by every
/// session. There are no module-level singletons; stages reach the tool
/// client and the generation backend only through this value.
#[derive(Debug, Clone)]
pub struct Services {
    /// The remote tool client.
    pub tools: Option<Arc<ToolClient>>,
    /// The text-generation backend.
    pub generation: Option<Arc<dyn GenerationBackend>>,
    /// Model used when a stage does not name one.
    pub default_model: String,
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl Services {
    /// Creates an empty set of services.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: None,
            generation: None,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Sets the tool client.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolClient>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Sets the generation backend.
    #[must_use]
    pub fn with_generation(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.generation = Some(backend);
        self
    }

    /// Sets the default model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}
