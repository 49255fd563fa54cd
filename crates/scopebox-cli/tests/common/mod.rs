//! Shared E2E helpers for `scopebox` binary tests.

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

/// Default timeout for one binary run, and for one reply.
pub const TIMEOUT_BASIC: Duration = Duration::from_secs(20);

/// MCP revision sent in the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

fn isolated_env_keys() -> Vec<String> {
    std::env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("SCOPEBOX_") || key == "RUST_LOG")
        .collect()
}

/// Builds a `scopebox` command rooted in a fresh temp project directory.
///
/// Config and env layers are isolated from the developer's machine.
/// Returns (command, _guard); keep the guard alive for the test's duration.
pub fn scopebox_cmd() -> (assert_cmd::Command, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create temp project dir");
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("scopebox");
    cmd.timeout(TIMEOUT_BASIC);
    for key in isolated_env_keys() {
        cmd.env_remove(key);
    }
    cmd.args(["-C", tmp.path().to_str().expect("valid utf8")]);
    (cmd, tmp)
}

/// A running `scopebox` that has completed the MCP handshake.
///
/// Replies are read on a background thread; the child is killed on drop.
pub struct McpProcess {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<Value>,
    next_id: u64,
    /// `initialize` result.
    pub server_info: Value,
}

impl McpProcess {
    /// Starts the binary in `project` with extra CLI `args`.
    pub fn spawn(project: &Path, args: &[&str]) -> Self {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_scopebox"));
        for key in isolated_env_keys() {
            cmd.env_remove(key);
        }
        cmd.args(["-C", project.to_str().expect("valid utf8")])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().expect("spawn scopebox");
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let (tx, replies) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let message: Value = serde_json::from_str(&line).expect("stdout line is JSON");
                if tx.send(message).is_err() {
                    break;
                }
            }
        });

        let mut process = Self {
            child,
            stdin,
            replies,
            next_id: 0,
            server_info: Value::Null,
        };
        let init = process.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "scopebox-e2e", "version": "0.0.0" },
            }),
        );
        process.server_info = init["result"].clone();
        process.notify("notifications/initialized");
        process
    }

    fn send(&mut self, message: &Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).expect("write request");
        self.stdin.flush().expect("flush request");
    }

    /// Sends a notification (no reply expected).
    pub fn notify(&mut self, method: &str) {
        self.send(&json!({ "jsonrpc": "2.0", "method": method }));
    }

    /// Sends a request and waits for the reply with the same id.
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }));
        loop {
            let message = self
                .replies
                .recv_timeout(TIMEOUT_BASIC)
                .unwrap_or_else(|e| panic!("no reply to {method} (id {id}): {e}"));
            if message["id"] == json!(id) {
                return message;
            }
        }
    }

    /// `tools/call` shorthand returning the `result` object.
    pub fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let reply = self.request("tools/call", json!({ "name": name, "arguments": arguments }));
        assert!(reply.get("error").is_none(), "protocol error: {reply}");
        reply["result"].clone()
    }
}

impl Drop for McpProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
