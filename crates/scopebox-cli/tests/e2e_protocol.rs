//! E2E tests for the `scopebox` binary over stdin/stdout.
//!
//! Protocol traffic is on stdout; logs are on stderr.

mod common;

use common::{scopebox_cmd, McpProcess};
use predicates::str::contains;
use serde_json::json;

#[test]
fn empty_stdin_exits_gracefully() {
    let (mut cmd, _guard) = scopebox_cmd();
    cmd.write_stdin("").assert().success().stdout("");
}

#[test]
fn version_flag() {
    let (mut cmd, _guard) = scopebox_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn handshake_and_tool_listing() {
    let project = tempfile::tempdir().expect("temp project");
    let mut mcp = McpProcess::spawn(project.path(), &[]);

    assert_eq!(mcp.server_info["serverInfo"]["name"], json!("scopebox"));
    assert!(mcp.server_info["capabilities"]["tools"].is_object());

    let listed = mcp.request("tools/list", json!({}));
    let names: Vec<&str> = listed["result"]["tools"]
        .as_array()
        .expect("tool array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, scopebox_cli::protocol::TOOL_NAMES);

    let pong = mcp.request("ping", json!({}));
    assert_eq!(pong["result"], json!({}));
}

#[test]
fn unknown_tool_is_a_protocol_error() {
    let project = tempfile::tempdir().expect("temp project");
    let mut mcp = McpProcess::spawn(project.path(), &[]);

    let reply = mcp.request("tools/call", json!({ "name": "format_disk", "arguments": {} }));
    assert_eq!(reply["error"]["code"], json!(-32601));
    assert!(reply.get("result").is_none());
}

#[test]
fn execute_reads_granted_project_file() {
    let project = tempfile::tempdir().expect("temp project");
    std::fs::write(project.path().join("notes.txt"), "scoped hello").expect("write fixture");
    let code = format!(
        "return requestFileSystem({:?}, function(fs) return fs.access(\"notes.txt\").read() end)",
        project.path().display().to_string()
    );

    let mut mcp = McpProcess::spawn(project.path(), &[]);
    let result = mcp.call_tool("execute", json!({ "code": code }));

    assert_eq!(result["isError"], json!(false), "{result}");
    assert_eq!(result["structuredContent"]["lastValue"], json!("scoped hello"));
}

#[test]
fn escape_attempt_is_a_tool_error() {
    let project = tempfile::tempdir().expect("temp project");
    let code = format!(
        "requestFileSystem({:?}, function(fs) return fs.access(\"../../etc/passwd\").read() end)",
        project.path().display().to_string()
    );

    let mut mcp = McpProcess::spawn(project.path(), &[]);
    let result = mcp.call_tool("execute", json!({ "code": code }));

    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["structuredContent"]["errorKind"], json!("AccessDenied"));
}

#[test]
fn session_state_survives_between_calls() {
    let project = tempfile::tempdir().expect("temp project");
    let mut mcp = McpProcess::spawn(project.path(), &[]);

    let created = mcp.call_tool("create_session", json!({}));
    let id = created["structuredContent"]["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    mcp.call_tool("execute_in_session", json!({ "sessionId": id, "code": "t = {n = 1}" }));
    let failed = mcp.call_tool(
        "execute_in_session",
        json!({ "sessionId": id, "code": "t.n = 2\nerror('stop')" }),
    );
    assert_eq!(failed["isError"], json!(true));

    let after = mcp.call_tool("execute_in_session", json!({ "sessionId": id, "code": "t.n" }));
    assert_eq!(after["structuredContent"]["lastValue"], json!("1"));
}

#[test]
fn exec_log_records_executions() {
    let project = tempfile::tempdir().expect("temp project");
    let log_dir = project.path().join("exec-logs");
    let mut mcp = McpProcess::spawn(
        project.path(),
        &["--exec-log-dir", log_dir.to_str().expect("valid utf8")],
    );

    mcp.call_tool("execute", json!({ "code": "return 1 + 1" }));
    mcp.call_tool("execute", json!({ "code": "os.exit(1)" }));

    let log = std::fs::read_to_string(log_dir.join("executions.jsonl")).expect("log written");
    let mut seqs: Vec<u64> = log
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).expect("log line is JSON"))
        .map(|entry| entry["seq"].as_u64().expect("seq"))
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn config_file_limits_apply() {
    let project = tempfile::tempdir().expect("temp project");
    let config = project.path().join("scopebox.toml");
    std::fs::write(&config, "[engine]\nmax_instructions = 10000\n").expect("write config");

    let mut mcp = McpProcess::spawn(
        project.path(),
        &["--config", config.to_str().expect("valid utf8")],
    );
    let result = mcp.call_tool("execute", json!({ "code": "while true do end" }));

    assert_eq!(result["structuredContent"]["errorKind"], json!("RuntimeError"));
}

#[test]
fn bad_config_file_fails_startup() {
    let (mut cmd, guard) = scopebox_cmd();
    let config = guard.path().join("broken.toml");
    std::fs::write(&config, "[engine\n").expect("write config");
    cmd.args(["--config", config.to_str().expect("valid utf8")]);

    cmd.write_stdin("")
        .assert()
        .failure()
        .stderr(contains("failed to parse config file"));
}
