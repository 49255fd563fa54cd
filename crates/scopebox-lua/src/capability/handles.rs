//! Handle tables passed to `requestX` blocks and returned by `access`.
//!
//! A handle is a plain Lua table of closures. Each closure carries the
//! [`CallContext`] and the [`FrameId`] of the grant it was made from, and
//! re-authorizes on every invocation, so a handle kept past its block
//! fails with `CapabilityError`. Both `h.op(x)` and `h:op(x)` work.

use super::context::CallContext;
use super::ops;
use crate::fs_tools;
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, MultiValue, Table};
use scopebox_auth::{FrameId, SandboxPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// `fs` handle for a `requestFileSystem` block.
pub(super) fn fs_handle(lua: &Lua, ctx: &Arc<CallContext>, frame: FrameId, root: String) -> mlua::Result<Table> {
    let handle = new_handle(lua, ctx)?;
    let this = handle.to_pointer() as usize;
    handle.set("root", root)?;

    let c = Arc::clone(ctx);
    handle.set(
        "access",
        method(lua, ctx, this, move |lua, path: String| ops::access(lua, &c, Some(frame), path))?,
    )?;
    let c = Arc::clone(ctx);
    handle.set(
        "grep",
        method(lua, ctx, this, move |lua, (pattern, path): (String, String)| {
            ops::grep(lua, &c, Some(frame), pattern, path)
        })?,
    )?;
    let c = Arc::clone(ctx);
    handle.set(
        "grepRecursive",
        method(
            lua,
            ctx,
            this,
            move |lua, (pattern, dir, include): (String, String, Option<String>)| {
                ops::grep_recursive(lua, &c, Some(frame), pattern, dir, include)
            },
        )?,
    )?;
    let c = Arc::clone(ctx);
    handle.set(
        "find",
        method(lua, ctx, this, move |lua, (dir, pattern): (String, String)| {
            ops::find(lua, &c, Some(frame), dir, pattern)
        })?,
    )?;
    Ok(handle)
}

/// `proc` handle for a `requestExecPermission` block.
pub(super) fn proc_handle(lua: &Lua, ctx: &Arc<CallContext>, frame: FrameId) -> mlua::Result<Table> {
    let handle = new_handle(lua, ctx)?;
    let this = handle.to_pointer() as usize;

    let c = Arc::clone(ctx);
    handle.set(
        "exec",
        method(lua, ctx, this, move |lua, (program, args): (String, Option<Vec<String>>)| {
            ops::exec(lua, &c, Some(frame), program, args.unwrap_or_default())
        })?,
    )?;
    Ok(handle)
}

/// `net` handle for a `requestNetwork` block.
pub(super) fn net_handle(lua: &Lua, ctx: &Arc<CallContext>, frame: FrameId) -> mlua::Result<Table> {
    let handle = new_handle(lua, ctx)?;
    let this = handle.to_pointer() as usize;

    let c = Arc::clone(ctx);
    handle.set(
        "httpGet",
        method(
            lua,
            ctx,
            this,
            move |lua, (url, headers): (String, Option<BTreeMap<String, String>>)| {
                ops::http_request(lua, &c, Some(frame), reqwest::Method::GET, url, None, headers)
            },
        )?,
    )?;
    let c = Arc::clone(ctx);
    handle.set(
        "httpPost",
        method(
            lua,
            ctx,
            this,
            move |lua, (url, body, headers): (String, String, Option<BTreeMap<String, String>>)| {
                ops::http_request(lua, &c, Some(frame), reqwest::Method::POST, url, Some(body), headers)
            },
        )?,
    )?;
    Ok(handle)
}

/// File handle returned by `access(path)`.
///
/// Every operation re-checks the frame and re-validates the path, so a
/// symlink swapped in after `access` is still caught.
pub(super) fn file_handle(lua: &Lua, ctx: &Arc<CallContext>, frame: FrameId, path: String) -> mlua::Result<Table> {
    let handle = new_handle(lua, ctx)?;
    let this = handle.to_pointer() as usize;
    handle.set("path", path.as_str())?;

    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "read",
        method(lua, ctx, this, move |_, ()| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "read", &p)?;
            fs_tools::read_file(&p, &sandbox).map_err(|e| ops::fs_error(&c, &p, e))
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "write",
        method(lua, ctx, this, move |_, content: String| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "write", &p)?;
            fs_tools::write_file(&p, &content, false, &sandbox).map_err(|e| ops::fs_error(&c, &p, e))
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "append",
        method(lua, ctx, this, move |_, content: String| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "append", &p)?;
            fs_tools::write_file(&p, &content, true, &sandbox).map_err(|e| ops::fs_error(&c, &p, e))
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "list",
        method(lua, ctx, this, move |lua, ()| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "list", &p)?;
            let entries = fs_tools::list_dir(&p, &sandbox).map_err(|e| ops::fs_error(&c, &p, e))?;
            let result = lua.create_table()?;
            for (i, entry) in entries.into_iter().enumerate() {
                let row = lua.create_table()?;
                row.set("name", entry.name)?;
                row.set("isDirectory", entry.is_dir)?;
                row.set("size", entry.size)?;
                result.raw_set(i + 1, row)?;
            }
            Ok(result)
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "exists",
        method(lua, ctx, this, move |_, ()| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "exists", &p)?;
            match sandbox.validate_read(&p) {
                Ok(_) => Ok(true),
                Err(e) if e.is_boundary_violation() => Err(ops::fs_error(&c, &p, e.into())),
                Err(_) => Ok(false),
            }
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path.clone());
    handle.set(
        "isDirectory",
        method(lua, ctx, this, move |_, ()| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "isDirectory", &p)?;
            match sandbox.validate_read(&p) {
                Ok(canonical) => Ok(canonical.is_dir()),
                Err(e) if e.is_boundary_violation() => Err(ops::fs_error(&c, &p, e.into())),
                Err(_) => Ok(false),
            }
        })?,
    )?;
    let (c, p) = (Arc::clone(ctx), path);
    handle.set(
        "mkdirs",
        method(lua, ctx, this, move |_, ()| {
            let (_, sandbox) = ops::authorize_path(&c, Some(frame), "mkdirs", &p)?;
            fs_tools::make_dirs(&p, &sandbox).map_err(|e| ops::fs_error(&c, &p, e))
        })?,
    )?;
    Ok(handle)
}

fn new_handle(lua: &Lua, ctx: &CallContext) -> mlua::Result<Table> {
    let handle = lua.create_table()?;
    ctx.mark_ephemeral(handle.to_pointer());
    Ok(handle)
}

/// Wraps `f` as a handle member, dropping a leading `self` argument.
pub(super) fn method<A, R, F>(lua: &Lua, ctx: &CallContext, this: usize, f: F) -> mlua::Result<Function>
where
    A: FromLuaMulti,
    R: IntoLuaMulti,
    F: Fn(&Lua, A) -> mlua::Result<R> + Send + 'static,
{
    let func = lua.create_function(move |lua, args: MultiValue| {
        let args = A::from_lua_multi(strip_self(args, this), lua)?;
        f(lua, args)
    })?;
    ctx.mark_ephemeral(func.to_pointer());
    Ok(func)
}

fn strip_self(mut args: MultiValue, this: usize) -> MultiValue {
    if this != 0 && args.front().is_some_and(|v| v.to_pointer() as usize == this) {
        args.pop_front();
    }
    args
}
