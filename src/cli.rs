//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{AuthMode, Config};

/// Call remote MCP tools after a browser OAuth login
#[derive(Parser, Debug)]
#[command(name = "mission-control")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MISSION_CONTROL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// MCP server URL (HTTP transport)
    #[arg(long, global = true)]
    pub mcp_url: Option<String>,

    /// MCP server command line (stdio transport; wins over the URL)
    #[arg(long, global = true)]
    pub mcp_command: Option<String>,

    /// How the access token reaches the MCP server
    #[arg(long, value_enum, global = true)]
    pub auth_mode: Option<AuthMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "MISSION_CONTROL_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MISSION_CONTROL_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply flag overrides on top of file and environment configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref url) = self.mcp_url {
            config.mcp.url.clone_from(url);
            config.mcp.command = None;
        }
        if let Some(ref command) = self.mcp_command {
            config.mcp.command = Some(command.clone());
        }
        if let Some(mode) = self.auth_mode {
            config.mcp.auth_mode = mode;
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authentication commands
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Remote tool commands
    #[command(subcommand)]
    Tools(ToolsCommand),
}

/// Authentication subcommands
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in through the browser (Ctrl-C cancels)
    Login,

    /// Show whether a usable token is stored
    Status,

    /// Delete the stored token
    Logout,
}

/// Tool subcommands
#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// List the tools the MCP server offers
    List,

    /// Call a tool and print its result
    Call {
        /// Tool name
        #[arg(short, long)]
        name: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
}
