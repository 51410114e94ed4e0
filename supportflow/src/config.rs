//! Runtime configuration.
//!
//! Everything is read from environment variables once at startup.
//! [`AppConfig::from_lookup`] takes the lookup function explicitly so tests
//! never touch the process environment.

use crate::errors::ConfigError;
use crate::retry::RetryConfig;
use crate::tools::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// Default generation model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default OpenAI-compatible API base.
pub const DEFAULT_GENERATION_API_BASE: &str = "https://api.openai.com/v1";

/// Settings for the remote tool client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolClientConfig {
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// TCP keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle pooled connections kept per host.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
    /// How long an idle pooled connection is kept, in seconds.
    #[serde(default = "default_pool_idle_secs")]
    pub pool_idle_secs: u64,
    /// Path segment the tool server is mounted under.
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Retry policy for transport failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_idle_connections() -> usize {
    8
}

fn default_pool_idle_secs() -> u64 {
    90
}

fn default_mount_path() -> String {
    "/mcp".to_string()
}

impl Default for ToolClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_idle_connections: default_max_idle_connections(),
            pool_idle_secs: default_pool_idle_secs(),
            mount_path: default_mount_path(),
            retry: RetryConfig::default(),
        }
    }
}

impl ToolClientConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the mount path.
    #[must_use]
    pub fn with_mount_path(mut self, path: impl Into<String>) -> Self {
        self.mount_path = path.into();
        self
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Keep-alive interval.
    #[must_use]
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle connection lifetime.
    #[must_use]
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_secs)
    }
}

/// Where bearer tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSourceKind {
    /// OIDC identity tokens from the instance metadata server.
    Metadata,
    /// A fixed token.
    Static(String),
}

/// Process-wide configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Generation model identifier.
    pub model: String,
    /// Tool endpoint URL.
    pub mcp_server_url: String,
    /// Token source.
    pub token_source: TokenSourceKind,
    /// Tools the process may call.
    pub allow_list: BTreeSet<ToolDescriptor>,
    /// Tool client settings.
    pub tool_client: ToolClientConfig,
    /// Wall-clock budget per session.
    pub session_timeout: Option<Duration>,
    /// Refresh tokens this long before they expire.
    pub token_refresh_guard: Duration,
    /// OpenAI-compatible API base.
    pub generation_api_base: String,
    /// API key for the generation backend.
    pub generation_api_key: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("mcp_server_url", &self.mcp_server_url)
            .field(
                "token_source",
                &match self.token_source {
                    TokenSourceKind::Metadata => "metadata",
                    TokenSourceKind::Static(_) => "static",
                },
            )
            .field("allow_list", &self.allow_list)
            .field("tool_client", &self.tool_client)
            .field("session_timeout", &self.session_timeout)
            .field("token_refresh_guard", &self.token_refresh_guard)
            .field("generation_api_base", &self.generation_api_base)
            .field("generation_api_key", &self.generation_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `MCP_SERVER_URL` is unset, and
    /// [`ConfigError::Invalid`] for values that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mcp_server_url = get("MCP_SERVER_URL").ok_or_else(|| ConfigError::missing("MCP_SERVER_URL"))?;
        if !mcp_server_url.starts_with("http://") && !mcp_server_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "MCP_SERVER_URL",
                mcp_server_url,
                "expected an http(s) URL",
            ));
        }

        let token_source = match get("TOKEN_SOURCE").as_deref() {
            None | Some("metadata") => TokenSourceKind::Metadata,
            Some("static") => {
                TokenSourceKind::Static(get("MCP_LOGIN").ok_or_else(|| ConfigError::missing("MCP_LOGIN"))?)
            }
            Some(other) => {
                return Err(ConfigError::invalid(
                    "TOKEN_SOURCE",
                    other,
                    "expected 'metadata' or 'static'",
                ))
            }
        };

        let allow_list = match get("TOOL_ALLOW_LIST") {
            None => ToolDescriptor::ALL.into_iter().collect(),
            Some(raw) => parse_allow_list(&raw)?,
        };

        let mut retry = RetryConfig::default();
        if let Some(retries) = parse_opt::<usize>(&get, "TOOL_MAX_RETRIES")? {
            retry = retry.with_max_retries(retries);
        }

        let mut tool_client = ToolClientConfig::default().with_retry(retry);
        if let Some(secs) = parse_opt::<u64>(&get, "TOOL_TIMEOUT_SECS")? {
            tool_client = tool_client.with_timeout_secs(positive("TOOL_TIMEOUT_SECS", secs)?);
        }
        if let Some(secs) = parse_opt::<u64>(&get, "TOOL_KEEP_ALIVE_SECS")? {
            tool_client = tool_client.with_keep_alive_secs(positive("TOOL_KEEP_ALIVE_SECS", secs)?);
        }

        let session_timeout = parse_opt::<u64>(&get, "SESSION_TIMEOUT_SECS")?
            .map(|secs| positive("SESSION_TIMEOUT_SECS", secs).map(Duration::from_secs))
            .transpose()?;

        let token_refresh_guard = Duration::from_secs(
            parse_opt::<u64>(&get, "TOKEN_REFRESH_GUARD_SECS")?.unwrap_or(60),
        );

        Ok(Self {
            model: get("MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            mcp_server_url,
            token_source,
            allow_list,
            tool_client,
            session_timeout,
            token_refresh_guard,
            generation_api_base: get("GENERATION_API_BASE")
                .unwrap_or_else(|| DEFAULT_GENERATION_API_BASE.to_string()),
            generation_api_key: get("GENERATION_API_KEY").or_else(|| get("OPENAI_API_KEY")),
        })
    }
}

fn parse_allow_list(raw: &str) -> Result<BTreeSet<ToolDescriptor>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            ToolDescriptor::from_name(name)
                .ok_or_else(|| ConfigError::invalid("TOOL_ALLOW_LIST", name, "unknown tool"))
        })
        .collect()
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string()))
        })
        .transpose()
}

fn positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(key, "0", "must be greater than zero"))
    } else {
        Ok(value)
    }
}
