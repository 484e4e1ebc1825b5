//! mission-control - call remote MCP tools after a browser OAuth login

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mission_control::{
    Agent, AuthStatus,
    cli::{AuthCommand, Cli, Command, ToolsCommand},
    config::Config,
    oauth::{OAuthFlow, open_store},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    match cli.command {
        Command::Auth(cmd) => run_auth_command(cmd, config).await,
        Command::Tools(cmd) => run_tools_command(cmd, config).await,
    }
}

/// Authentication commands work on the token store alone; no MCP server is started
async fn run_auth_command(cmd: AuthCommand, config: Config) -> anyhow::Result<()> {
    let store = open_store(&config.storage).context("Failed to open token store")?;

    match cmd {
        AuthCommand::Login => {
            if config.oauth.client_id.trim().is_empty() {
                bail!("HUBSPOT_CLIENT_ID is required (or set oauth.client_id)");
            }

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let flow = OAuthFlow::new(config.oauth, store)?;
            let token = flow.login(&cancel).await?;
            println!("✅ Successfully authenticated");
            println!("   Token expires at: {}", token.expires_at.to_rfc3339());
            Ok(())
        }

        AuthCommand::Status => {
            let token = store.load()?;
            let status = AuthStatus::of(token.as_ref(), config.oauth.refresh_lookahead);
            if status.authenticated {
                println!("✅ {}", status.message);
            } else {
                println!("❌ {}", status.message);
            }
            if let Some(expires_at) = status.expires_at {
                println!("   Expires at: {}", expires_at.to_rfc3339());
            }
            println!("   Storage: {}", store.name());
            Ok(())
        }

        AuthCommand::Logout => {
            store.delete()?;
            println!("✅ Logged out");
            Ok(())
        }
    }
}

async fn run_tools_command(cmd: ToolsCommand, config: Config) -> anyhow::Result<()> {
    // Reject bad input before starting a server process
    let arguments = match &cmd {
        ToolsCommand::Call { input, .. } => Some(parse_tool_input(input)?),
        ToolsCommand::List => None,
    };

    let agent = Agent::connect(config).context("Failed to start agent")?;

    let result = match cmd {
        ToolsCommand::List => list_tools(&agent).await,
        ToolsCommand::Call { name, .. } => {
            let arguments = arguments.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            call_tool(&agent, &name, arguments).await
        }
    };

    if let Err(e) = agent.close().await {
        debug!(error = %e, "Agent shutdown");
    }
    result
}

async fn list_tools(agent: &Agent) -> anyhow::Result<()> {
    let tools = agent.list_tools().await?;
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Found {} tool(s):\n", tools.len());
    for tool in &tools {
        println!("🔧 {}", tool.name);
        if let Some(ref description) = tool.description {
            println!("   {description}");
        }
        if !tool.input_schema.is_null() {
            let schema = serde_json::to_string_pretty(&tool.input_schema)?;
            println!("   Input schema:");
            for line in schema.lines() {
                println!("     {line}");
            }
        }
        println!();
    }
    Ok(())
}

async fn call_tool(agent: &Agent, name: &str, arguments: Value) -> anyhow::Result<()> {
    let result = agent.call_tool(name, arguments).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_tool_input(input: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(input).context("--input is not valid JSON")?;
    if !value.is_object() {
        bail!("--input must be a JSON object");
    }
    Ok(value)
}
