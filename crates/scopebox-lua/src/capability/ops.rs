//! Resource operations shared by ambient functions and handles.
//!
//! `frame = None` resolves against the whole stack (ambient form);
//! `frame = Some(id)` pins the operation to the grant that created the
//! handle.

use super::context::CallContext;
use super::handles;
use crate::blocking::block_on;
use crate::error::{ErrorKind, Fault};
use crate::exec::{run_process, ProcessError, ProcessRequest};
use crate::fs_tools::{self, FsError, GrepMatch};
use crate::http::{self, HttpError, HttpRequest};
use mlua::{Lua, Table};
use scopebox_auth::{FrameId, GrantError, GrantKind, RootSandbox, SandboxPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolves `path` to the grant whose root covers it.
pub(super) fn authorize_path(
    ctx: &CallContext,
    frame: Option<FrameId>,
    operation: &str,
    path: &str,
) -> mlua::Result<(FrameId, RootSandbox)> {
    ctx.authorize(frame, GrantKind::FileSystem, operation, path, |grant| {
        grant
            .scope()
            .sandbox()
            .filter(|sandbox| sandbox.validate_write(path).is_ok())
            .cloned()
    })
}

/// Boundary violations become terminal `AccessDenied`; the rest are plain
/// Lua runtime errors the snippet may catch.
pub(super) fn fs_error(ctx: &CallContext, path: &str, err: FsError) -> mlua::Error {
    match err {
        FsError::Sandbox(e) if e.is_boundary_violation() => ctx.deny(GrantError::OutOfScope {
            kind: GrantKind::FileSystem,
            resource: path.to_string(),
        }),
        other => mlua::Error::RuntimeError(other.to_string()),
    }
}

pub(super) fn access(
    lua: &Lua,
    ctx: &Arc<CallContext>,
    frame: Option<FrameId>,
    path: String,
) -> mlua::Result<Table> {
    let (frame, _) = authorize_path(ctx, frame, "access", &path)?;
    handles::file_handle(lua, ctx, frame, path)
}

pub(super) fn grep(
    lua: &Lua,
    ctx: &CallContext,
    frame: Option<FrameId>,
    pattern: String,
    path: String,
) -> mlua::Result<Table> {
    let (_, sandbox) = authorize_path(ctx, frame, "grep", &path)?;
    let matches = fs_tools::grep_path(&pattern, &path, &sandbox).map_err(|e| fs_error(ctx, &path, e))?;
    matches_to_lua(lua, matches)
}

pub(super) fn grep_recursive(
    lua: &Lua,
    ctx: &CallContext,
    frame: Option<FrameId>,
    pattern: String,
    dir: String,
    include: Option<String>,
) -> mlua::Result<Table> {
    let (_, sandbox) = authorize_path(ctx, frame, "grepRecursive", &dir)?;
    let matches = fs_tools::grep_recursive(&pattern, &dir, include.as_deref(), &sandbox)
        .map_err(|e| fs_error(ctx, &dir, e))?;
    matches_to_lua(lua, matches)
}

pub(super) fn find(
    lua: &Lua,
    ctx: &CallContext,
    frame: Option<FrameId>,
    dir: String,
    pattern: String,
) -> mlua::Result<Table> {
    let (_, sandbox) = authorize_path(ctx, frame, "find", &dir)?;
    let found = fs_tools::find_files(&dir, &pattern, &sandbox).map_err(|e| fs_error(ctx, &dir, e))?;
    lua.create_sequence_from(found)
}

pub(super) fn exec(
    lua: &Lua,
    ctx: &CallContext,
    frame: Option<FrameId>,
    program: String,
    args: Vec<String>,
) -> mlua::Result<Table> {
    ctx.authorize(frame, GrantKind::Process, "exec", &program, |grant| {
        grant.scope().permits_command(&program).then_some(())
    })?;

    let cwd = ctx.process_cwd();
    let request = ProcessRequest {
        program: &program,
        args: &args,
        cwd: &cwd,
        timeout: ctx.limits.exec_timeout,
        max_output_bytes: ctx.limits.max_process_output_bytes,
    };
    let outcome = block_on(run_process(request))
        .map_err(|e| mlua::Error::RuntimeError(format!("exec: runtime unavailable: {e}")))?;

    match outcome {
        Ok(output) => {
            let result = lua.create_table()?;
            result.set("ok", output.success)?;
            result.set("stdout", output.stdout)?;
            result.set("stderr", output.stderr)?;
            result.set("exitCode", output.exit_code)?;
            Ok(result)
        }
        Err(e @ ProcessError::TimedOut { .. }) => Err(ctx.fail(Fault::new(ErrorKind::ProcessTimeout, e.to_string()))),
        Err(e) => Err(mlua::Error::RuntimeError(format!("exec: {e}"))),
    }
}

pub(super) fn http_request(
    lua: &Lua,
    ctx: &CallContext,
    frame: Option<FrameId>,
    method: reqwest::Method,
    url: String,
    body: Option<String>,
    headers: Option<BTreeMap<String, String>>,
) -> mlua::Result<Table> {
    ctx.ensure_open()?;
    let operation = if method == reqwest::Method::GET {
        "httpGet"
    } else {
        "httpPost"
    };
    let target = http::parse_target(&url).map_err(|e| mlua::Error::RuntimeError(format!("{operation}: {e}")))?;
    ctx.authorize(frame, GrantKind::Network, operation, &target.host, |grant| {
        grant.scope().permits_host(&target.host).then_some(())
    })?;

    let request = HttpRequest {
        method,
        target,
        body,
        headers: headers.map(|h| h.into_iter().collect()).unwrap_or_default(),
        timeout: ctx.limits.http_timeout,
        max_body_bytes: ctx.limits.max_http_body_bytes,
    };
    let outcome = block_on(http::send(&ctx.http, request))
        .map_err(|e| mlua::Error::RuntimeError(format!("{operation}: runtime unavailable: {e}")))?;

    let result = lua.create_table()?;
    match outcome {
        Ok(response) => {
            let headers = lua.create_table()?;
            for (name, value) in response.headers {
                headers.set(name, value)?;
            }
            result.set("ok", (200..300).contains(&response.status))?;
            result.set("status", response.status)?;
            result.set("body", response.body)?;
            result.set("headers", headers)?;
            result.set("truncated", response.truncated)?;
        }
        Err(e @ HttpError::TimedOut { .. }) => {
            return Err(ctx.fail(Fault::new(ErrorKind::NetworkTimeout, e.to_string())));
        }
        Err(HttpError::Transport { kind, message }) => {
            result.set("ok", false)?;
            result.set("error", message)?;
            result.set("errorKind", kind)?;
        }
    }
    Ok(result)
}

fn matches_to_lua(lua: &Lua, matches: Vec<GrepMatch>) -> mlua::Result<Table> {
    let result = lua.create_table()?;
    for (i, m) in matches.into_iter().enumerate() {
        let entry = lua.create_table()?;
        entry.set("path", m.path)?;
        entry.set("line", m.line_number)?;
        entry.set("text", m.line)?;
        result.raw_set(i + 1, entry)?;
    }
    Ok(result)
}
