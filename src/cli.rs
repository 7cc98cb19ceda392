//! Command-line interface definition for mcp-conformance
//!
//! This module defines the CLI structure using clap's derive API. The only
//! command is `check`, which drives one server through the protocol lifecycle
//! and prints a record per step.

use clap::{Parser, Subcommand};

/// mcp-conformance - Conformance client for MCP servers
///
/// Connects to a Model Context Protocol server over stdio, a container
/// runtime, or HTTP and exercises the protocol lifecycle.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-conformance")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mcp-conformance.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the lifecycle smoke sequence against one server
    Check {
        /// Transport to use (stdio, docker, http)
        #[arg(short, long)]
        transport: Option<String>,

        /// Server command line for the stdio transport
        #[arg(short, long)]
        server: Option<String>,

        /// Image for the docker transport
        #[arg(long)]
        image: Option<String>,

        /// Endpoint URL for the http transport
        #[arg(long)]
        url: Option<String>,

        /// Protocol version to negotiate (2024-11-05, 2025-03-26)
        #[arg(short = 'p', long)]
        protocol_version: Option<String>,

        /// Retry unknown tool methods under alternative names
        #[arg(long)]
        fallback_probing: bool,

        /// Tool to invoke after listing tools
        #[arg(long)]
        tool: Option<String>,

        /// JSON params for `--tool`
        #[arg(long, requires = "tool")]
        tool_params: Option<String>,

        /// Print records as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("mcp-conformance.yaml".to_string()),
            verbose: false,
            command: Commands::Check {
                transport: None,
                server: None,
                image: None,
                url: None,
                protocol_version: None,
                fallback_probing: false,
                tool: None,
                tool_params: None,
                json: false,
            },
        }
    }
}
