//! Configuration management for mcp-conformance
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, `MCP_CONFORMANCE_*`
//! environment variables, command-line flags.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConformanceError, Result};
use crate::mcp::transport::TransportKind;
use crate::mcp::types::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which server to test and how to reach it
    #[serde(default)]
    pub server: ServerConfig,
    /// Time bounds for every blocking wait
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Client-side protocol behavior
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport backend
    #[serde(default)]
    pub transport: TransportKind,

    /// Protocol version to negotiate
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Export `MCP_DEBUG=1` to the server
    #[serde(default)]
    pub debug: bool,

    /// Settings for the stdio transport
    #[serde(default)]
    pub stdio: StdioConfig,

    /// Settings for the docker transport
    #[serde(default)]
    pub docker: DockerConfig,

    /// Settings for the http transport
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_protocol_version() -> String {
    LATEST_PROTOCOL_VERSION.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            protocol_version: default_protocol_version(),
            debug: false,
            stdio: StdioConfig::default(),
            docker: DockerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Local subprocess server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Command line, split with shell quoting rules
    #[serde(default)]
    pub command: String,

    /// Extra environment for the child
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Containerized server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Runtime binary (`docker`, `podman`, ...)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Image reference
    #[serde(default)]
    pub image: String,

    /// Arguments after the image
    #[serde(default)]
    pub args: Vec<String>,

    /// Network to attach to
    #[serde(default)]
    pub network: Option<String>,

    /// Host directory to bind-mount
    #[serde(default)]
    pub mount_host: Option<PathBuf>,

    /// Mount point inside the container
    #[serde(default = "default_mount_target")]
    pub mount_target: String,

    /// Extra container environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Prefix of generated container names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Pull missing images
    #[serde(default = "default_pull")]
    pub pull: bool,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_mount_target() -> String {
    "/workspace".to_string()
}

fn default_name_prefix() -> String {
    "mcp-conformance".to_string()
}

fn default_pull() -> bool {
    true
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: String::new(),
            args: Vec::new(),
            network: None,
            mount_host: None,
            mount_target: default_mount_target(),
            env: BTreeMap::new(),
            name_prefix: default_name_prefix(),
            pull: default_pull(),
        }
    }
}

/// HTTP server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint receiving JSON-RPC POSTs
    #[serde(default)]
    pub url: String,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Time bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One request/response exchange (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_seconds: u64,

    /// Each stage of the stop sequence (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Runtime reachability probe (seconds)
    #[serde(default = "default_probe_timeout")]
    pub runtime_probe_seconds: u64,

    /// Other runtime commands such as pulls (seconds)
    #[serde(default = "default_runtime_command_timeout")]
    pub runtime_command_seconds: u64,

    /// Write retries after a broken pipe
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Pause between write retries (milliseconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Stderr lines kept per server
    #[serde(default = "default_stderr_lines")]
    pub stderr_buffer_lines: usize,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    2
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_runtime_command_timeout() -> u64 {
    120
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    100
}

fn default_stderr_lines() -> usize {
    crate::mcp::transport::stderr::DEFAULT_STDERR_CAPACITY
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
            runtime_probe_seconds: default_probe_timeout(),
            runtime_command_seconds: default_runtime_command_timeout(),
            write_retries: default_write_retries(),
            retry_delay_ms: default_retry_delay(),
            stderr_buffer_lines: default_stderr_lines(),
        }
    }
}

/// Client-side protocol behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Capabilities sent in `initialize`
    #[serde(default = "default_capabilities")]
    pub capabilities: Value,

    /// Pause between `tools/result` polls (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up on an async tool call after this long (seconds)
    #[serde(default = "default_async_timeout")]
    pub async_timeout_seconds: u64,

    /// Retry unknown tool methods under alternative names
    #[serde(default)]
    pub fallback_probing: bool,
}

fn default_capabilities() -> Value {
    serde_json::json!({"tools": {"asyncSupported": true}})
}

fn default_poll_interval() -> u64 {
    500
}

fn default_async_timeout() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
            poll_interval_ms: default_poll_interval(),
            async_timeout_seconds: default_async_timeout(),
            fallback_probing: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli)?;

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConformanceError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ConformanceError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(transport) = std::env::var("MCP_CONFORMANCE_TRANSPORT") {
            match transport.parse() {
                Ok(kind) => self.server.transport = kind,
                Err(e) => tracing::warn!("Invalid MCP_CONFORMANCE_TRANSPORT: {}", e),
            }
        }

        if let Ok(version) = std::env::var("MCP_CONFORMANCE_PROTOCOL_VERSION") {
            self.server.protocol_version = version;
        }

        if let Ok(command) = std::env::var("MCP_CONFORMANCE_SERVER_COMMAND") {
            self.server.stdio.command = command;
        }

        if let Ok(image) = std::env::var("MCP_CONFORMANCE_DOCKER_IMAGE") {
            self.server.docker.image = image;
        }

        if let Ok(runtime) = std::env::var("MCP_CONFORMANCE_DOCKER_RUNTIME") {
            self.server.docker.runtime = runtime;
        }

        if let Ok(url) = std::env::var("MCP_CONFORMANCE_HTTP_URL") {
            self.server.http.url = url;
        }

        if let Ok(timeout) = std::env::var("MCP_CONFORMANCE_REQUEST_TIMEOUT") {
            match timeout.parse() {
                Ok(v) => self.timeouts.request_seconds = v,
                Err(_) => tracing::warn!("Invalid MCP_CONFORMANCE_REQUEST_TIMEOUT: {}", timeout),
            }
        }

        if let Ok(flag) = std::env::var("MCP_CONFORMANCE_FALLBACK_PROBING") {
            match parse_bool(&flag) {
                Some(v) => self.client.fallback_probing = v,
                None => tracing::warn!("Invalid MCP_CONFORMANCE_FALLBACK_PROBING: {}", flag),
            }
        }

        if let Ok(flag) = std::env::var("MCP_CONFORMANCE_DEBUG") {
            match parse_bool(&flag) {
                Some(v) => self.server.debug = v,
                None => tracing::warn!("Invalid MCP_CONFORMANCE_DEBUG: {}", flag),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        let crate::cli::Commands::Check {
            transport,
            server,
            image,
            url,
            protocol_version,
            fallback_probing,
            ..
        } = &cli.command;

        if let Some(t) = transport {
            self.server.transport = t.parse().map_err(ConformanceError::Config)?;
        }
        if let Some(command) = server {
            self.server.stdio.command = command.clone();
        }
        if let Some(image) = image {
            self.server.docker.image = image.clone();
        }
        if let Some(url) = url {
            self.server.http.url = url.clone();
        }
        if let Some(version) = protocol_version {
            self.server.protocol_version = version.clone();
        }
        if *fallback_probing {
            self.client.fallback_probing = true;
        }
        Ok(())
    }

    /// Validate the configuration
    ///
    /// Checks that the selected transport has what it needs and that every
    /// bound is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::Config`] naming the first problem found
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.server.protocol_version.as_str()) {
            return Err(ConformanceError::Config(format!(
                "Unsupported protocol_version: {}. Must be one of: {}",
                self.server.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            ))
            .into());
        }

        match self.server.transport {
            TransportKind::Stdio => {
                if self.server.stdio.command.trim().is_empty() {
                    return Err(ConformanceError::Config(
                        "server.stdio.command is required for the stdio transport".to_string(),
                    )
                    .into());
                }
                shell_words::split(&self.server.stdio.command).map_err(|e| {
                    ConformanceError::Config(format!("server.stdio.command: {}", e))
                })?;
            }
            TransportKind::Docker => {
                if self.server.docker.image.trim().is_empty() {
                    return Err(ConformanceError::Config(
                        "server.docker.image is required for the docker transport".to_string(),
                    )
                    .into());
                }
                if self.server.docker.runtime.trim().is_empty() {
                    return Err(ConformanceError::Config(
                        "server.docker.runtime cannot be empty".to_string(),
                    )
                    .into());
                }
            }
            TransportKind::Http => {
                let url = url::Url::parse(&self.server.http.url).map_err(|e| {
                    ConformanceError::Config(format!(
                        "server.http.url `{}` is not a valid URL: {}",
                        self.server.http.url, e
                    ))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConformanceError::Config(format!(
                        "server.http.url must use http or https, got {}",
                        url.scheme()
                    ))
                    .into());
                }
            }
        }

        if self.timeouts.request_seconds == 0 {
            return Err(ConformanceError::Config(
                "timeouts.request_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.timeouts.shutdown_grace_seconds == 0 {
            return Err(ConformanceError::Config(
                "timeouts.shutdown_grace_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.poll_interval_ms == 0 {
            return Err(ConformanceError::Config(
                "client.poll_interval_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.async_timeout_seconds == 0 {
            return Err(ConformanceError::Config(
                "client.async_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if !self.client.capabilities.is_object() {
            return Err(ConformanceError::Config(
                "client.capabilities must be a mapping".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timeouts: TimeoutConfig::default(),
            client: ClientConfig::default(),
        }
    }
}
