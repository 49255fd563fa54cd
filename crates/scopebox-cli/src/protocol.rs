//! MCP server front end over stdio.
//!
//! ```text
//! client ──stdin──► rmcp service ──► Server::call_tool ──► Sandbox
//!        ◄─stdout──              ◄── CallToolResult ◄────┘
//! ```
//!
//! rmcp owns the JSON-RPC framing, the handshake and request dispatch.
//! Protocol errors cover only bad requests (unknown tool, missing
//! arguments). Anything the sandbox reports, from a rejected snippet to an
//! unknown session, comes back as a tool result with `isError: true`.

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorCode, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, ServerInitializeError};
use rmcp::{ErrorData, RoleServer, ServerHandler, ServiceExt};
use scopebox_lua::{ExecutionResult, Sandbox, SessionId, API_REFERENCE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Tool names accepted by `tools/call`, in listing order.
pub const TOOL_NAMES: [&str; 6] = [
    "execute",
    "create_session",
    "execute_in_session",
    "delete_session",
    "list_sessions",
    "get_api_reference",
];

const INSTRUCTIONS: &str = "Run Lua snippets with scoped file, process and network grants. \
                            Call get_api_reference for the snippet API.";

/// Failures of the MCP service itself.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("MCP initialization failed: {0}")]
    Initialize(#[from] ServerInitializeError),

    #[error("MCP service task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Deserialize)]
struct CodeArgs {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCodeArgs {
    session_id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    session_id: String,
}

/// MCP tool handler backed by a [`Sandbox`].
#[derive(Debug, Clone)]
pub struct Server {
    sandbox: Arc<Sandbox>,
}

impl Server {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    /// Serves MCP on stdin/stdout until the client disconnects.
    ///
    /// A client that closes the stream before the handshake is not an error.
    ///
    /// # Errors
    ///
    /// Fails if the handshake breaks or the service task dies.
    pub async fn run_stdio(self) -> Result<(), ProtocolError> {
        let service = match self.serve(rmcp::transport::stdio()).await {
            Ok(service) => service,
            Err(ServerInitializeError::ConnectionClosed(context)) => {
                info!(context = %context, "Client closed before initialization");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let reason = service.waiting().await?;
        debug!(reason = ?reason, "MCP service stopped");
        Ok(())
    }

    /// Runs one tool call. Unknown tools and malformed arguments are
    /// protocol errors; everything else is a tool result.
    ///
    /// # Errors
    ///
    /// [`ErrorData`] with `-32601` for unknown tools, `-32602` for bad
    /// arguments.
    pub async fn dispatch_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(tool = name, "Tool call");
        match name {
            "execute" => {
                let args: CodeArgs = parse_args(arguments)?;
                let result = self.sandbox.execute(&args.code).await;
                execution_result(&result)
            }
            "create_session" => Ok(match self.sandbox.create_session() {
                Ok(id) => CallToolResult::structured(json!({ "sessionId": id })),
                Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
            }),
            "execute_in_session" => {
                let args: SessionCodeArgs = parse_args(arguments)?;
                let Ok(id) = args.session_id.parse::<SessionId>() else {
                    return Ok(session_not_found(&args.session_id));
                };
                match self.sandbox.execute_in_session(id, &args.code).await {
                    Ok(result) => execution_result(&result),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
                }
            }
            "delete_session" => {
                let args: SessionArgs = parse_args(arguments)?;
                let deleted = args
                    .session_id
                    .parse::<SessionId>()
                    .is_ok_and(|id| self.sandbox.delete_session(id));
                Ok(CallToolResult::structured(json!({ "deleted": deleted })))
            }
            "list_sessions" => {
                let sessions: Vec<Value> = self
                    .sandbox
                    .list_sessions()
                    .into_iter()
                    .filter_map(|id| self.sandbox.session_info(id))
                    .map(|info| json!(info))
                    .collect();
                Ok(CallToolResult::structured(json!({ "sessions": sessions })))
            }
            "get_api_reference" => Ok(CallToolResult::success(vec![Content::text(API_REFERENCE)])),
            other => Err(ErrorData::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("unknown tool '{other}'"),
                None,
            )),
        }
    }
}

impl ServerHandler for Server {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info.name = "scopebox".into();
        info.server_info.version = env!("CARGO_PKG_VERSION").into();
        info.instructions = Some(INSTRUCTIONS.into());
        info
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(tool_definitions()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.dispatch_tool(&request.name, request.arguments).await
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Option<JsonObject>) -> Result<T, ErrorData> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| ErrorData::invalid_params(e.to_string(), None))
}

fn execution_result(result: &ExecutionResult) -> Result<CallToolResult, ErrorData> {
    let payload = serde_json::to_value(result).map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
    Ok(if result.success {
        CallToolResult::structured(payload)
    } else {
        CallToolResult::structured_error(payload)
    })
}

fn session_not_found(raw: &str) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "SessionNotFound: no active session '{raw}'"
    ))])
}

fn object_schema(schema: Value) -> Arc<JsonObject> {
    match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

fn tool_definitions() -> Vec<Tool> {
    let code = json!({ "type": "string", "description": "Lua source to run" });
    let session_id = json!({ "type": "string", "description": "Id returned by create_session" });
    let empty = || object_schema(json!({ "type": "object", "properties": {} }));
    vec![
        Tool::new(
            "execute",
            "Run a snippet on a fresh interpreter.",
            object_schema(json!({
                "type": "object",
                "properties": { "code": code },
                "required": ["code"],
            })),
        ),
        Tool::new(
            "create_session",
            "Create a session whose global bindings persist across calls.",
            empty(),
        ),
        Tool::new(
            "execute_in_session",
            "Run a snippet inside an existing session.",
            object_schema(json!({
                "type": "object",
                "properties": { "sessionId": session_id, "code": code },
                "required": ["sessionId", "code"],
            })),
        ),
        Tool::new(
            "delete_session",
            "Delete a session and free its interpreter.",
            object_schema(json!({
                "type": "object",
                "properties": { "sessionId": session_id },
                "required": ["sessionId"],
            })),
        ),
        Tool::new("list_sessions", "List live sessions with their creation time.", empty()),
        Tool::new(
            "get_api_reference",
            "Markdown reference of the snippet API and grant functions.",
            empty(),
        ),
    ]
}
