pub mod agent_engine;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;
pub mod retry;

#[cfg(test)]
pub mod testing;

use tokio::io::BufReader;

use crate::agent_engine::engine::{Components, ResolutionLoop};
use crate::agent_engine::state::LoopConfig;
use crate::agent_engine::trigger::{spawn_line_trigger, trigger_channel};
use crate::bridge::stdio::BridgeServer;
use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::errors::BubbleResult;
use crate::executor::dispatcher::JsonLineSink;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::perception::screenshot::{FileCapture, ScreenCapture};

/// Logs go to stderr; stdout carries protocol lines and emitted actions.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> BubbleResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let config = config::load_config(cli.config.as_deref())?;
    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::Serve => serve(&config).await,
        Command::Run { goal, screenshot } => {
            let capture: Box<dyn ScreenCapture> = match screenshot {
                Some(path) => Box::new(FileCapture::new(path)),
                None => screen_capture()?,
            };
            run_interactive(&config, goal, capture.as_ref()).await
        }
    }
}

fn screen_capture() -> BubbleResult<Box<dyn ScreenCapture>> {
    #[cfg(feature = "screen-capture")]
    {
        Ok(Box::new(crate::perception::screenshot::XcapCapture))
    }
    #[cfg(not(feature = "screen-capture"))]
    {
        Err(crate::errors::BubbleError::Config(
            "built without the `screen-capture` feature; pass --screenshot <path>".into(),
        ))
    }
}

fn check_config(config: &AppConfig) -> BubbleResult<()> {
    let registry = ProviderRegistry::from_config(config)?;
    let mut roles = serde_json::Map::new();
    for role in [Role::Proposer, Role::Grounder] {
        let (provider, call) = registry.call_config_for_role(role)?;
        roles.insert(
            role.as_str().to_string(),
            serde_json::json!({
                "provider": provider.name(),
                "model": call.model,
                "temperature": call.temperature,
            }),
        );
    }
    let summary = serde_json::json!({
        "providers": registry.list_names(),
        "roles": roles,
        "perception": {
            "endpoint": config.perception.endpoint,
            "api_name": config.perception.api_name,
            "bbox_space": config.perception.bbox_space,
        },
        "agent": config.agent,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(config: &AppConfig) -> BubbleResult<()> {
    let components = Components::from_config(config)?;
    let mut server = BridgeServer::new(
        components,
        LoopConfig::from_agent(&config.agent),
        config.agent.on_proposal_error,
    );
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), ctrl_c)
        .await
}

async fn run_interactive(config: &AppConfig, goal: String, capture: &dyn ScreenCapture) -> BubbleResult<()> {
    let components = Components::from_config(config)?;
    let mut engine = ResolutionLoop::new(
        goal,
        components,
        LoopConfig::from_agent(&config.agent),
        config.agent.on_proposal_error,
    );
    let (handle, mut listener) = trigger_channel();
    let _trigger = spawn_line_trigger(BufReader::new(tokio::io::stdin()), handle);
    let sink = JsonLineSink::new(tokio::io::stdout());

    tracing::info!("press Enter to resolve the next action (Ctrl+D to quit)");
    tokio::select! {
        result = engine.run(&mut listener, capture, &sink) => {
            let reason = result?;
            tracing::info!(reason = ?reason, "run finished");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }
    Ok(())
}
