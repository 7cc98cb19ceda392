//! `check` command: the lifecycle smoke sequence
//!
//! Runs, in order: start + initialize, ping, the list operations the server
//! advertises, an optional tool invocation, and shutdown. Each step yields a
//! [`TestRecord`]; a failed start ends the sequence early.

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{ConformanceError, Result};
use crate::mcp::server::ServerHarness;
use crate::report::{all_passed, Stopwatch, TestRecord};

/// A tool to invoke during the sequence.
#[derive(Debug, Clone)]
pub struct ToolProbe {
    /// Tool name, used as the JSON-RPC method.
    pub name: String,
    /// Params sent with the call.
    pub params: Value,
}

impl ToolProbe {
    /// Parse `--tool` / `--tool-params`.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::Config`] if the params are not JSON.
    pub fn from_cli(name: Option<String>, params: Option<String>) -> Result<Option<Self>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let params = match params {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                ConformanceError::Config(format!("--tool-params is not valid JSON: {}", e))
            })?,
            None => json!({}),
        };
        Ok(Some(Self { name, params }))
    }
}

fn advertises(negotiated: &Value, section: &str) -> bool {
    negotiated
        .get("capabilities")
        .and_then(|c| c.get(section))
        .is_some()
}

/// Drive `harness` through the sequence and collect the records.
pub async fn run_sequence(harness: &ServerHarness, probe: Option<&ToolProbe>) -> Vec<TestRecord> {
    let mut records = Vec::new();
    let adapter = harness.adapter();

    let watch = Stopwatch::start("initialize");
    let negotiated = match harness.start().await {
        Ok(n) => {
            let detail = serde_json::to_value(&n).unwrap_or(Value::Null);
            records.push(
                watch
                    .finish(Ok(format!(
                        "negotiated {} with {} {}",
                        n.protocol_version, n.server_info.name, n.server_info.version
                    )))
                    .with_detail(detail.clone()),
            );
            detail
        }
        Err(e) => {
            records.push(watch.finish(Err(e)));
            return records;
        }
    };

    let watch = Stopwatch::start("ping");
    records.push(watch.finish(adapter.ping().await.map(|_| "pong".to_string())));

    if advertises(&negotiated, "tools") {
        let watch = Stopwatch::start("tools/list");
        records.push(
            watch.finish(
                adapter
                    .list_tools()
                    .await
                    .map(|tools| format!("{} tools", tools.len())),
            ),
        );
    } else {
        records.push(TestRecord::skipped("tools/list", "server does not advertise tools"));
    }

    if advertises(&negotiated, "resources") {
        let watch = Stopwatch::start("resources/list");
        records.push(
            watch.finish(
                adapter
                    .list_resources()
                    .await
                    .map(|r| format!("{} resources", r.len())),
            ),
        );
    } else {
        records.push(TestRecord::skipped(
            "resources/list",
            "server does not advertise resources",
        ));
    }

    if advertises(&negotiated, "prompts") {
        let watch = Stopwatch::start("prompts/list");
        records.push(
            watch.finish(
                adapter
                    .list_prompts()
                    .await
                    .map(|p| format!("{} prompts", p.len())),
            ),
        );
    } else {
        records.push(TestRecord::skipped(
            "prompts/list",
            "server does not advertise prompts",
        ));
    }

    if let Some(probe) = probe {
        let name = format!("invoke:{}", probe.name);
        let watch = Stopwatch::start(&name);
        let outcome = adapter.invoke_tool(&probe.name, probe.params.clone()).await;
        let record = match outcome {
            Ok(result) => watch
                .finish(Ok(format!(
                    "returned{}",
                    if adapter.supports_async() { " (async negotiated)" } else { "" }
                )))
                .with_detail(result),
            Err(e) => watch.finish(Err(e)),
        };
        records.push(record);
        for warning in adapter.compliance_warnings() {
            records.push(
                TestRecord::failed(
                    &format!("compliance:{}", warning.tool),
                    std::time::Duration::ZERO,
                    warning.message.clone(),
                )
                .with_detail(json!({"attempted_method": warning.attempted_method})),
            );
        }
    }

    let watch = Stopwatch::start("shutdown");
    let stopped = harness.stop().await.map(|_| "server stopped".to_string());
    records.push(watch.finish(stopped));

    records
}

/// Entry point for `mcp-conformance check`.
///
/// Returns whether every check passed or was skipped.
///
/// # Errors
///
/// Returns configuration errors; server misbehavior is reported in the
/// records, not as an error.
pub async fn run_check(config: Config, probe: Option<ToolProbe>, json_output: bool) -> Result<bool> {
    let harness = ServerHarness::from_config(&config)?;
    tracing::info!(
        transport = %config.server.transport,
        version = %config.server.protocol_version,
        "running lifecycle checks"
    );

    let records = run_sequence(&harness, probe.as_ref()).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", record.to_line());
        }
    }

    Ok(all_passed(&records))
}
