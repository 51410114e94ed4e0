//! Runs one customer-support request through the routed pipeline.
//!
//! ```text
//! supportflow --customer-id 3 --ask "show my tickets" [--pipeline routed|sequential]
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use supportflow::auth::{MetadataTokenSource, StaticTokenSource, TokenProvider, TokenSource};
use supportflow::cancellation::CancellationToken;
use supportflow::config::{AppConfig, TokenSourceKind};
use supportflow::context::Services;
use supportflow::generation::OpenAiChatBackend;
use supportflow::observability::{init_tracing, LogFormat};
use supportflow::pipeline::PipelineExecutor;
use supportflow::pipelines::{routed_support, sequential_support};
use supportflow::state::{Session, StateStore};
use supportflow::tools::ToolClient;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Args {
    customer_id: Option<i64>,
    ask: Option<String>,
    session_id: Option<String>,
    sequential: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| anyhow!("{flag} needs a value"));
        match flag.as_str() {
            "--customer-id" => {
                let raw = value()?;
                parsed.customer_id = Some(raw.parse().with_context(|| format!("invalid customer id '{raw}'"))?);
            }
            "--ask" => parsed.ask = Some(value()?),
            "--session-id" => parsed.session_id = Some(value()?),
            "--pipeline" => match value()?.as_str() {
                "routed" => parsed.sequential = false,
                "sequential" => parsed.sequential = true,
                other => bail!("unknown pipeline '{other}'"),
            },
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .map(|raw| raw.parse::<LogFormat>())
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or_default();
    init_tracing(log_format, "info");

    let args = parse_args(std::env::args().skip(1))?;
    let ask = args.ask.context("--ask is required")?;
    let config = AppConfig::from_env().context("loading configuration")?;
    info!(?config, "Configuration loaded");

    let source: Arc<dyn TokenSource> = match &config.token_source {
        TokenSourceKind::Metadata => {
            Arc::new(MetadataTokenSource::new().context("building metadata token source")?)
        }
        TokenSourceKind::Static(token) => Arc::new(StaticTokenSource::new(token.clone())),
    };
    let tokens = Arc::new(TokenProvider::new(source).with_refresh_guard(config.token_refresh_guard));

    let client = ToolClient::new(
        config.mcp_server_url.clone(),
        config.allow_list.clone(),
        tokens,
        config.tool_client.clone(),
    )
    .context("building tool client")?;
    client.verify_catalog().await.context("verifying tool catalog")?;

    let backend = OpenAiChatBackend::new(
        config.generation_api_base.clone(),
        config.generation_api_key.clone(),
    )
    .context("building generation backend")?;

    let services = Services::new()
        .with_tools(Arc::new(client))
        .with_generation(Arc::new(backend))
        .with_default_model(config.model.clone());
    let executor = PipelineExecutor::new(Arc::new(services)).with_session_timeout(config.session_timeout);

    let pipeline = if args.sequential {
        sequential_support(config.allow_list.clone())?
    } else {
        routed_support()?
    };

    let mut state = StateStore::new();
    state.set("ask", ask);
    if let Some(id) = args.customer_id {
        state.set("customer_id", id);
    }
    let mut session = match args.session_id {
        Some(id) => Session::with_id(id, state),
        None => Session::new(state),
    };

    let cancel = Arc::new(CancellationToken::new());
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                cancel.cancel("interrupted");
            }
        });
    }

    match executor.run(&mut session, &pipeline, &cancel).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(descriptor) => {
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            Err(descriptor.into())
        }
    }
}
