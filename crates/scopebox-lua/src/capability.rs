//! Capability API exposed to snippets.
//!
//! # Entry points
//!
//! | Lua | Grant pushed | Handle |
//! |-----|--------------|--------|
//! | `requestFileSystem(root, fn)` | `FileSystem` | `fs` |
//! | `requestExecPermission({cmds}, fn)` | `Process` | `proc` |
//! | `requestNetwork({hosts}, fn)` | `Network` | `net` |
//!
//! Each entry point pushes a grant, calls the block with a handle, and
//! pops the grant through a [`FrameGuard`](context::FrameGuard) on every
//! exit path. The ambient functions (`access`, `grep`, `exec`, ...) search
//! the live grants innermost first.
//!
//! All of these names are injected into the environment for one call and
//! removed again afterwards.

pub(crate) mod context;
mod handles;
mod ops;

pub(crate) use context::{CallContext, CallLimits};

use mlua::{Function, Lua, MultiValue, Table, Value};
use scopebox_auth::{GrantScope, RootSandbox, SandboxPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Names injected per call.
pub(crate) const API_NAMES: &[&str] = &[
    "requestFileSystem",
    "requestExecPermission",
    "requestNetwork",
    "access",
    "grep",
    "grepRecursive",
    "find",
    "exec",
    "httpGet",
    "httpPost",
];

/// Standard functions that catch Lua errors.
const PROTECTED_CALLS: &[&str] = &["pcall", "xpcall"];

/// Replaces `pcall`/`xpcall` in `env` with versions that re-raise a
/// terminal fault of the call instead of returning it to the snippet.
pub(crate) fn inject_protected_calls(lua: &Lua, env: &Table, ctx: &Arc<CallContext>) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in PROTECTED_CALLS {
        let original: Function = globals.get(*name)?;
        let c = Arc::clone(ctx);
        let guarded = lua.create_function(move |_, args: MultiValue| {
            let results = original.call::<MultiValue>(args)?;
            c.check_fault()?;
            Ok(results)
        })?;
        ctx.mark_ephemeral(guarded.to_pointer());
        env.raw_set(*name, guarded)?;
    }
    Ok(())
}

/// Puts the unguarded `pcall`/`xpcall` back into `env`.
pub(crate) fn restore_protected_calls(lua: &Lua, env: &Table) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in PROTECTED_CALLS {
        env.raw_set(*name, globals.get::<Value>(*name)?)?;
    }
    Ok(())
}

/// Inert stand-in for a handle or API function that outlived its call.
///
/// Calling it, or indexing it, raises a `CapabilityError`.
pub(crate) fn inert_stub(lua: &Lua, stale: &Value) -> mlua::Result<Value> {
    let raise = lua.create_function(|_, _: MultiValue| Err::<(), _>(context::stale_use()))?;
    match stale {
        Value::Table(_) => {
            let meta = lua.create_table()?;
            for event in ["__index", "__newindex", "__call"] {
                meta.raw_set(event, raise.clone())?;
            }
            let stub = lua.create_table()?;
            stub.set_metatable(Some(meta));
            Ok(Value::Table(stub))
        }
        _ => Ok(Value::Function(raise)),
    }
}

/// Installs the capability API into `env` for the call owning `ctx`.
pub(crate) fn inject(lua: &Lua, env: &Table, ctx: &Arc<CallContext>) -> mlua::Result<()> {
    let set = |name: &str, func: Function| -> mlua::Result<()> {
        ctx.mark_ephemeral(func.to_pointer());
        env.raw_set(name, func)
    };

    let c = Arc::clone(ctx);
    set(
        "requestFileSystem",
        lua.create_function(move |lua, (root, block): (String, Function)| {
            c.ensure_open()?;
            let sandbox = RootSandbox::new(&root)
                .map_err(|e| mlua::Error::RuntimeError(format!("requestFileSystem: {e}")))?;
            let root_display = sandbox.root().display().to_string();
            let guard = c.push(GrantScope::Root(sandbox));
            tracing::debug!(frame = %guard.frame(), root = %root_display, "file-system grant pushed");
            let handle = handles::fs_handle(lua, &c, guard.frame(), root_display)?;
            block.call::<MultiValue>(handle)
        })?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "requestExecPermission",
        lua.create_function(move |lua, (commands, block): (Vec<String>, Function)| {
            c.ensure_open()?;
            let guard = c.push(GrantScope::commands(commands));
            tracing::debug!(frame = %guard.frame(), "process grant pushed");
            let handle = handles::proc_handle(lua, &c, guard.frame())?;
            block.call::<MultiValue>(handle)
        })?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "requestNetwork",
        lua.create_function(move |lua, (hosts, block): (Vec<String>, Function)| {
            c.ensure_open()?;
            let guard = c.push(GrantScope::hosts(hosts));
            tracing::debug!(frame = %guard.frame(), "network grant pushed");
            let handle = handles::net_handle(lua, &c, guard.frame())?;
            block.call::<MultiValue>(handle)
        })?,
    )?;

    // ambient forms

    let c = Arc::clone(ctx);
    set(
        "access",
        lua.create_function(move |lua, path: String| ops::access(lua, &c, None, path))?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "grep",
        lua.create_function(move |lua, (pattern, path): (String, String)| {
            ops::grep(lua, &c, None, pattern, path)
        })?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "grepRecursive",
        lua.create_function(
            move |lua, (pattern, dir, include): (String, String, Option<String>)| {
                ops::grep_recursive(lua, &c, None, pattern, dir, include)
            },
        )?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "find",
        lua.create_function(move |lua, (dir, pattern): (String, String)| ops::find(lua, &c, None, dir, pattern))?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "exec",
        lua.create_function(move |lua, (program, args): (String, Option<Vec<String>>)| {
            ops::exec(lua, &c, None, program, args.unwrap_or_default())
        })?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "httpGet",
        lua.create_function(
            move |lua, (url, headers): (String, Option<BTreeMap<String, String>>)| {
                ops::http_request(lua, &c, None, reqwest::Method::GET, url, None, headers)
            },
        )?,
    )?;

    let c = Arc::clone(ctx);
    set(
        "httpPost",
        lua.create_function(
            move |lua, (url, body, headers): (String, String, Option<BTreeMap<String, String>>)| {
                ops::http_request(lua, &c, None, reqwest::Method::POST, url, Some(body), headers)
            },
        )?,
    )?;

    Ok(())
}
