//! mcp-conformance - Conformance client for MCP servers
//!
//! Main entry point for the `mcp-conformance` binary.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_conformance::cli::{Cli, Commands};
use mcp_conformance::commands::check::{self, ToolProbe};
use mcp_conformance::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("mcp-conformance.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Check {
            tool,
            tool_params,
            json,
            ..
        } => {
            let probe = ToolProbe::from_cli(tool, tool_params)?;
            let passed = check::run_check(config, probe, json).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mcp_conformance=debug"
    } else {
        "mcp_conformance=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
