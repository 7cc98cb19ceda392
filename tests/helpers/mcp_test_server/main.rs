//! MCP test server binary for integration tests
//!
//! This binary implements a small MCP server that communicates over
//! stdin/stdout using newline-delimited JSON. It is used exclusively by
//! integration tests to exercise the stdio and docker transports and the
//! protocol adapters without a real external server.
//!
//! # Handled Methods
//!
//! - `initialize` -- echoes the requested protocol version when it is one of
//!   the supported revisions and advertises `tools.asyncSupported` unless
//!   `MCP_TEST_SERVER_NO_ASYNC` is set. Adds `sessionId` to the result when
//!   `MCP_TEST_SERVER_SESSION` is set.
//! - `notifications/initialized` -- swallowed.
//! - `ping`, `shutdown` -- empty result. `exit` ends the process.
//! - `tools/list`, `tools/call`, `resources/list`, `resources/read`,
//!   `prompts/list`, `prompts/get`.
//! - bare tool methods: `echo`, `long_task`, `fail_task`, and
//!   `tools/legacy_tool` (reachable only under the prefixed name).
//! - `tools/result`, `tools/cancel` -- async operation polling.
//! - JSON arrays -- processed as batches.
//! - Everything else -- `-32601 Method not found`.
//!
//! Every request is also logged to stderr as `recv <method>`.
//!
//! # Fake container runtime
//!
//! When the first argument is a runtime subcommand (`version`, `network`,
//! `image`, `pull`, `run`, `logs`, `stop`, `kill`, `rm`) the binary behaves like a
//! minimal docker CLI. `run` skips the runtime flags, applies `-e K=V`
//! pairs, and then serves MCP on stdio like the plain binary.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

const SUPPORTED: &[&str] = &["2024-11-05", "2025-03-26"];

/// Settings visible to the server: the process environment overlaid with
/// any `-e` pairs from a fake `run`.
struct Env {
    overrides: HashMap<String, String>,
}

impl Env {
    fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).map(|v| !v.is_empty() && v != "0").unwrap_or(false)
    }
}

struct Operation {
    polls_left: u64,
    fail: bool,
    cancelled: bool,
}

struct Server {
    env: Env,
    operations: HashMap<String, Operation>,
    next_op: u64,
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let overrides = match args.first().map(String::as_str) {
        Some("version") => {
            println!("fake-runtime 1.0.0");
            return;
        }
        Some("network") => {
            // Networks never exist up front, so `create` is exercised.
            let code = if args.get(1).map(String::as_str) == Some("create") { 0 } else { 1 };
            std::process::exit(code);
        }
        Some("image") | Some("pull") | Some("stop") | Some("kill") | Some("rm") => return,
        Some("logs") => {
            println!("logs for {}", args.get(1).map(String::as_str).unwrap_or(""));
            return;
        }
        Some("run") => parse_run_args(&args[1..]),
        _ => HashMap::new(),
    };

    let mut server = Server {
        env: Env { overrides },
        operations: HashMap::new(),
        next_op: 1,
    };
    server.serve();
}

/// Collect `-e K=V` pairs from `run` flags up to the image name.
fn parse_run_args(args: &[String]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-i" => i += 1,
            "--name" | "--network" | "-v" => i += 2,
            "-e" => {
                if let Some((k, v)) = args.get(i + 1).and_then(|kv| kv.split_once('=')) {
                    env.insert(k.to_string(), v.to_string());
                }
                i += 2;
            }
            _ => break,
        }
    }
    env
}

impl Server {
    fn serve(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();

        eprintln!("mcp_test_server: ready");
        if self.env.flag("MCP_DEBUG") {
            eprintln!(
                "mcp_test_server: protocol version from env {}",
                self.env.get("MCP_PROTOCOL_VERSION").unwrap_or_default()
            );
        }

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    write_line(&mut out, &make_error(&Value::Null, -32700, "Parse error"));
                    continue;
                }
            };

            if let Value::Array(items) = message {
                let replies: Vec<Value> = items.iter().filter_map(|m| self.handle(m)).collect();
                if !replies.is_empty() {
                    write_line(&mut out, &Value::Array(replies));
                }
                continue;
            }

            if message.get("method").and_then(Value::as_str) == Some("exit") {
                eprintln!("mcp_test_server: exit");
                std::process::exit(0);
            }

            if let Some(reply) = self.handle(&message) {
                write_line(&mut out, &reply);
            }
        }
    }

    /// Answer one message; `None` for notifications.
    fn handle(&mut self, message: &Value) -> Option<Value> {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        eprintln!("recv {}", method);

        let id = match message.get("id") {
            Some(id) if !id.is_null() => id.clone(),
            _ => return None,
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let reply = match method {
            "initialize" => self.initialize(&id, &params),
            "ping" | "shutdown" => make_result(&id, json!({})),
            "tools/list" => make_result(&id, tools_list()),
            "tools/call" => tools_call(&id, &params),
            "resources/list" => make_result(
                &id,
                json!({"resources": [{"uri": "mem://greeting", "name": "greeting"}]}),
            ),
            "resources/read" => make_result(
                &id,
                json!({"contents": [{"uri": params["uri"], "text": "hello"}]}),
            ),
            "prompts/list" => make_result(&id, json!({"prompts": [{"name": "greet"}]})),
            "prompts/get" => make_result(
                &id,
                json!({"messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}]}),
            ),
            "echo" => make_result(&id, json!({"content": [{"type": "text", "text": params["text"]}]})),
            "tools/legacy_tool" => make_result(&id, json!({"legacy": true})),
            "long_task" | "fail_task" => self.start_task(&id, &params, method == "fail_task"),
            "tools/result" => self.poll(&id, &params),
            "tools/cancel" => self.cancel(&id, &params),
            "slow" => {
                let ms = params["ms"].as_u64().unwrap_or(5_000);
                std::thread::sleep(std::time::Duration::from_millis(ms));
                make_result(&id, json!({}))
            }
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };
        Some(reply)
    }

    fn initialize(&self, id: &Value, params: &Value) -> Value {
        let requested = params["protocolVersion"].as_str().unwrap_or("");
        let version = if SUPPORTED.contains(&requested) {
            requested.to_string()
        } else {
            "2025-03-26".to_string()
        };
        let mut result = json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {"asyncSupported": !self.env.flag("MCP_TEST_SERVER_NO_ASYNC")},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {"name": "mcp_test_server", "version": "1.0.0"}
        });
        if let Some(session) = self.env.get("MCP_TEST_SERVER_SESSION") {
            result["sessionId"] = json!(session);
        }
        make_result(id, result)
    }

    fn start_task(&mut self, id: &Value, params: &Value, fail: bool) -> Value {
        if params["async"] != json!(true) {
            return make_result(id, json!({"value": 42}));
        }
        let op_id = format!("op-{}", self.next_op);
        self.next_op += 1;
        self.operations.insert(
            op_id.clone(),
            Operation {
                polls_left: params["steps"].as_u64().unwrap_or(2),
                fail,
                cancelled: false,
            },
        );
        make_result(id, json!({"operationId": op_id}))
    }

    fn poll(&mut self, id: &Value, params: &Value) -> Value {
        let op_id = params["operationId"].as_str().unwrap_or("");
        let Some(op) = self.operations.get_mut(op_id) else {
            return make_error(id, -32602, &format!("unknown operation {}", op_id));
        };
        if op.cancelled {
            return make_result(id, json!({"status": "cancelled"}));
        }
        if op.polls_left > 0 {
            op.polls_left -= 1;
            return make_result(id, json!({"status": "running"}));
        }
        if op.fail {
            make_result(
                id,
                json!({"status": "failed", "error": {"code": -32603, "message": "task failed"}}),
            )
        } else {
            make_result(id, json!({"status": "completed", "result": {"value": 42}}))
        }
    }

    fn cancel(&mut self, id: &Value, params: &Value) -> Value {
        let op_id = params["operationId"].as_str().unwrap_or("");
        match self.operations.get_mut(op_id) {
            Some(op) => {
                op.cancelled = true;
                make_result(id, json!({}))
            }
            None => make_error(id, -32602, &format!("unknown operation {}", op_id)),
        }
    }
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echoes the text argument",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {
                "name": "long_task",
                "description": "Completes after a few polls when called asynchronously",
                "inputSchema": {"type": "object"}
            }
        ]
    })
}

fn tools_call(id: &Value, params: &Value) -> Value {
    match params["name"].as_str() {
        Some("echo") => make_result(
            id,
            json!({"content": [{"type": "text", "text": params["arguments"]["text"]}]}),
        ),
        Some(other) => make_error(id, -32602, &format!("Unknown tool: {}", other)),
        None => make_error(id, -32602, "Missing tool name"),
    }
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn make_error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn write_line(out: &mut impl Write, value: &Value) {
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}
