//! A minimal, genuinely MCP-speaking peer process used to drive end-to-end
//! scenarios against a real child process instead of an in-process mock.
//! Behavior is selected by the `FAKE_PEER_MODE`
//! environment variable so one binary covers every scenario the `tests`
//! crate needs.
//!
//! Modes:
//! - `echo` (default): accepts any `initialize`, declares
//!   tools/resources/prompts, serves one `echo` tool that returns its
//!   `message` argument back in the result content.
//! - `fallback`: rejects `initialize` for any protocol version except
//!   `2024-09-24`, simulating a legacy peer a host must fall back to.
//! - `crash`: behaves like `echo`, but exits with code 139 (as if killed
//!   by SIGSEGV) a short time after the handshake completes. Honors
//!   `FAKE_PEER_CRASH_COUNTER_FILE` so a test can bound how many restarts
//!   crash before the peer starts behaving normally, modeling "latch
//!   after N attempts" vs. "eventually recovers".
//! - `benign_exit`: exits 1 immediately after `initialized`, a code treated
//!   as a non-crash (no reconnect attempt expected).
//! - `noisy`: emits benign package-manager-style stderr lines, a
//!   non-JSON stdout line, and a malformed-JSON stdout line before
//!   settling into `echo` behavior.

use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

fn main() {
    let mode = std::env::var("FAKE_PEER_MODE").unwrap_or_else(|_| "echo".to_string());

    match mode.as_str() {
        "noisy" => {
            eprintln!("npm WARN deprecated fake-peer@0.0.0");
            eprintln!("found 0 vulnerabilities");
            println!("Fake MCP server starting up...");
            println!("{{not valid json");
            eprintln!("running on stdio");
        }
        "crash" => {
            if let Ok(path) = std::env::var("FAKE_PEER_CRASH_COUNTER_FILE") {
                let count = read_and_increment_counter(&path);
                let crash_budget: u32 = std::env::var("FAKE_PEER_CRASH_BUDGET")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(u32::MAX);
                if count <= crash_budget {
                    run_until_connected_then_crash();
                    return;
                }
            } else {
                run_until_connected_then_crash();
                return;
            }
        }
        "benign_exit" => {
            run_handshake_then_exit(1);
            return;
        }
        _ => {}
    }

    run_loop(&mode);
}

fn read_and_increment_counter(path: &str) -> u32 {
    let current: u32 = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let next = current + 1;
    let _ = std::fs::write(path, next.to_string());
    next
}

fn write_response(id: &Value, result: Option<Value>, error: Option<Value>) {
    let mut envelope = serde_json::Map::new();
    envelope.insert("jsonrpc".to_string(), json!("2.0"));
    envelope.insert("id".to_string(), id.clone());
    if let Some(result) = result {
        envelope.insert("result".to_string(), result);
    }
    if let Some(error) = error {
        envelope.insert("error".to_string(), error);
    }
    let line = serde_json::to_string(&Value::Object(envelope)).unwrap();
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = handle.write_all(line.as_bytes());
    let _ = handle.write_all(b"\n");
    let _ = handle.flush();
}

fn initialize_result(version: &str, with_prompts: bool) -> Value {
    let mut capabilities = json!({"tools": {}, "resources": {}});
    if with_prompts {
        capabilities["prompts"] = json!({});
    }
    json!({
        "protocolVersion": version,
        "capabilities": capabilities,
        "serverInfo": {"name": "fake-peer", "version": "0.0.0"},
    })
}

/// Handle one line of input for the shared `echo`-family behavior. Returns
/// `false` if the caller should stop reading (peer deciding to exit).
fn handle_line(line: &str, accepted_version: Option<&str>) -> bool {
    let Ok(msg) = serde_json::from_str::<Value>(line) else {
        return true;
    };
    let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
    let id = msg.get("id").cloned();

    match method {
        "initialize" => {
            let requested = msg
                .get("params")
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or("2025-03-26");
            if let Some(id) = id {
                if let Some(accepted) = accepted_version {
                    if requested != accepted {
                        write_response(
                            &id,
                            None,
                            Some(json!({"code": -32602, "message": format!("unsupported protocolVersion {requested}")})),
                        );
                        return true;
                    }
                    write_response(&id, Some(initialize_result(accepted, false)), None);
                } else {
                    write_response(&id, Some(initialize_result(requested, true)), None);
                }
            }
        }
        "initialized" => {}
        "tools/list" => {
            if let Some(id) = id {
                write_response(
                    &id,
                    Some(json!({
                        "tools": [{
                            "name": "echo",
                            "inputSchema": {"type": "object", "properties": {"message": {"type": "string"}}},
                        }]
                    })),
                    None,
                );
            }
        }
        "tools/call" => {
            if let Some(id) = id {
                let args = msg
                    .get("params")
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let message = args.get("message").cloned().unwrap_or(Value::Null);
                write_response(
                    &id,
                    Some(json!({"content": [{"type": "text", "text": message}]})),
                    None,
                );
            }
        }
        "resources/list" => {
            if let Some(id) = id {
                write_response(&id, Some(json!({"resources": []})), None);
            }
        }
        "prompts/list" => {
            if let Some(id) = id {
                write_response(&id, Some(json!({"prompts": []})), None);
            }
        }
        "shutdown" => return false,
        other if !other.is_empty() => {
            if let Some(id) = id {
                write_response(&id, None, Some(json!({"code": -32601, "message": format!("method not found: {other}")})));
            }
        }
        _ => {}
    }
    true
}

fn run_loop(mode: &str) {
    let accepted_version = if mode == "fallback" { Some("2024-09-24") } else { None };
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !handle_line(trimmed, accepted_version) {
            break;
        }
    }
}

fn run_until_connected_then_crash() {
    let stdin = io::stdin();
    let mut saw_initialized = false;
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        handle_line(trimmed, None);
        if trimmed.contains("\"initialized\"") {
            saw_initialized = true;
            break;
        }
    }
    if saw_initialized {
        std::thread::sleep(std::time::Duration::from_millis(150));
    }
    std::process::exit(139);
}

fn run_handshake_then_exit(code: i32) {
    let stdin = io::stdin();
    let mut saw_initialized = false;
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        handle_line(trimmed, None);
        if trimmed.contains("\"initialized\"") {
            saw_initialized = true;
            break;
        }
    }
    if saw_initialized {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    std::process::exit(code);
}
