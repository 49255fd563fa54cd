//! Snippet evaluation.
//!
//! One evaluation:
//!
//! 1. inject `print` and the capability API into the environment table
//! 2. compile, preferring a form that returns the final expression
//! 3. run under an instruction-count hook
//! 4. close the call context, scrub per-call values from the environment
//! 5. on failure, restore every table reachable from the environment to
//!    its state before the call
//!
//! Evaluation is synchronous and must run on a blocking-pool thread:
//! capability callbacks park that thread while process and HTTP futures
//! complete (see [`crate::blocking`]).

use crate::capability::{self, CallContext, CallLimits};
use crate::config::EngineConfig;
use crate::env::{build_base_env, create_print, OutputBuffer};
use crate::error::{EngineError, ErrorKind, Fault};
use crate::render::{format_lua_error, render_value};
use crate::result::ExecutionResult;
use mlua::{Function, HookTriggers, Lua, MultiValue, RegistryKey, Table, Value};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Chunk name used in Lua error messages.
const CHUNK_NAME: &str = "=snippet";

/// Leading tokens that make a line continue the previous statement.
const CONTINUATION_PREFIXES: &[&str] = &[
    "(", "[", "{", ".", ":", "+", "-", "*", "/", "%", "^", "=", "<", ">", "~", ",", "&", "|", "\"", "'", "and ", "or ",
];

/// A Lua VM plus the environment table snippets run in.
pub struct Interpreter {
    lua: Lua,
    env: RegistryKey,
}

impl Interpreter {
    fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let lua = Lua::new();
        if config.max_memory_bytes > 0 {
            lua.set_memory_limit(config.max_memory_bytes)?;
        }
        let env = build_base_env(&lua)?;
        let env = lua.create_registry_value(env)?;
        Ok(Self { lua, env })
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("used_memory", &self.lua.used_memory())
            .finish_non_exhaustive()
    }
}

/// What happens to top-level bindings after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Persistence {
    /// The interpreter is thrown away; nothing to keep.
    Discard,
    /// Keep bindings on success, roll back on failure.
    Commit,
}

enum Outcome {
    Returned(MultiValue),
    Parse(mlua::Error),
    Failed(mlua::Error),
}

/// Drives interpreter evaluations.
#[derive(Debug)]
pub struct ExecutionEngine {
    config: EngineConfig,
    http: reqwest::Client,
    evaluations: AtomicU64,
}

impl ExecutionEngine {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let http = crate::http::build_client()?;
        Ok(Self {
            config,
            http,
            evaluations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of interpreter evaluations started so far.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Creates a VM with a fresh, empty environment.
    ///
    /// # Errors
    ///
    /// Fails if the VM or its environment cannot be set up.
    pub fn new_interpreter(&self) -> Result<Interpreter, EngineError> {
        Interpreter::new(&self.config)
    }

    /// Evaluates `code` on a fresh interpreter. No state survives the call.
    ///
    /// The code is not validated here; [`Sandbox::execute`](crate::Sandbox::execute)
    /// validates before calling this.
    pub async fn execute(self: &Arc<Self>, code: &str) -> ExecutionResult {
        let engine = Arc::clone(self);
        let code = code.to_string();
        run_blocking(move || match engine.new_interpreter() {
            Ok(interpreter) => engine.evaluate(&interpreter, &code, Persistence::Discard),
            Err(e) => ExecutionResult::failure(ErrorKind::RuntimeError, e.to_string(), String::new()),
        })
        .await
    }

    /// Evaluates `code` against `interpreter`'s environment.
    pub(crate) fn evaluate(&self, interpreter: &Interpreter, code: &str, persistence: Persistence) -> ExecutionResult {
        let call = self.evaluations.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let lua = &interpreter.lua;

        let env: Table = match lua.registry_value(&interpreter.env) {
            Ok(env) => env,
            Err(e) => {
                return ExecutionResult::failure(
                    ErrorKind::RuntimeError,
                    format!("interpreter environment unavailable: {}", format_lua_error(&e)),
                    String::new(),
                )
            }
        };

        let snapshot = match persistence {
            Persistence::Discard => None,
            Persistence::Commit => match BindingsSnapshot::capture(&env) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    return ExecutionResult::failure(
                        ErrorKind::RuntimeError,
                        format!("cannot snapshot session bindings: {}", format_lua_error(&e)),
                        String::new(),
                    )
                }
            },
        };

        let output = Arc::new(Mutex::new(OutputBuffer::new(self.config.max_output_bytes)));
        let ctx = CallContext::new(CallLimits::from(&self.config), self.http.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(lua, &env, &ctx, &output, code)));
        lua.remove_hook();
        ctx.close();

        let printed = output.lock().render();
        let result = match (outcome, ctx.fault()) {
            (Err(payload), _) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(call, error = %message, "interpreter fault");
                ExecutionResult::failure(ErrorKind::RuntimeError, format!("interpreter fault: {message}"), printed)
            }
            (Ok(_), Some(fault)) => ExecutionResult::from((fault, printed)),
            (Ok(Outcome::Returned(values)), None) => {
                let last_value = values
                    .into_iter()
                    .next()
                    .filter(|v| !matches!(v, Value::Nil))
                    .map(|v| render_value(&v));
                let mut text = printed;
                if let Some(ref value) = last_value {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(value);
                }
                ExecutionResult::success(text, last_value)
            }
            (Ok(Outcome::Parse(e)), None) => {
                ExecutionResult::failure(ErrorKind::ParseError, format_lua_error(&e), printed)
            }
            (Ok(Outcome::Failed(e)), None) => match fault_of(&e) {
                // raised by a closure of an earlier, already closed call
                Some(fault) => ExecutionResult::from((fault, printed)),
                None => ExecutionResult::failure(ErrorKind::RuntimeError, format_lua_error(&e), printed),
            },
        };

        if let Err(e) = scrub(lua, &env, &ctx) {
            tracing::warn!(call, error = %format_lua_error(&e), "failed to scrub call values from environment");
        }
        if !result.success {
            if let Some(snapshot) = snapshot {
                if let Err(e) = snapshot.restore() {
                    tracing::warn!(call, error = %format_lua_error(&e), "failed to roll back session bindings");
                }
            }
        }

        tracing::debug!(
            call,
            success = result.success,
            error_kind = ?result.error_kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "evaluation finished"
        );
        result
    }

    fn run(
        &self,
        lua: &Lua,
        env: &Table,
        ctx: &Arc<CallContext>,
        output: &Arc<Mutex<OutputBuffer>>,
        code: &str,
    ) -> Outcome {
        let setup = || -> mlua::Result<()> {
            let print = create_print(lua, Arc::clone(output))?;
            ctx.mark_ephemeral(print.to_pointer());
            env.raw_set("print", print)?;
            capability::inject_protected_calls(lua, env, ctx)?;
            capability::inject(lua, env, ctx)
        };
        if let Err(e) = setup() {
            return Outcome::Failed(e);
        }

        let func = match compile(lua, env, code) {
            Ok(func) => func,
            Err(e) => return Outcome::Parse(e),
        };

        let limit = self.config.max_instructions.max(1);
        let hook_ctx = Arc::clone(ctx);
        lua.set_hook(HookTriggers::new().every_nth_instruction(limit), move |_lua, _debug| {
            Err(hook_ctx.fail(Fault::new(
                ErrorKind::RuntimeError,
                format!("instruction limit exceeded ({limit})"),
            )))
        });

        match func.call::<MultiValue>(()) {
            Ok(values) => Outcome::Returned(values),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Runs a synchronous evaluation on the blocking pool.
///
/// A panic or cancellation of the worker is reported as a failed result.
pub(crate) async fn run_blocking<F>(f: F) -> ExecutionResult
where
    F: FnOnce() -> ExecutionResult + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "evaluation worker failed");
            ExecutionResult::failure(ErrorKind::RuntimeError, format!("interpreter fault: {e}"), String::new())
        }
    }
}

/// Compiles `code`, preferring forms that return its final expression:
/// `return <code>`, then the last line as a return statement, then as is.
///
/// The last-line form is only tried when everything before that line is a
/// complete chunk, so a line inside a long string or comment is never
/// rewritten.
fn compile(lua: &Lua, env: &Table, code: &str) -> mlua::Result<Function> {
    let load = |source: &str| {
        lua.load(source)
            .set_name(CHUNK_NAME)
            .set_environment(env.clone())
            .into_function()
    };

    if let Ok(func) = load(&format!("return {code}")) {
        return Ok(func);
    }
    if let Some((head, last)) = split_last_line(code) {
        if load(head).is_ok() {
            if let Ok(func) = load(&format!("{head}\nreturn {last}")) {
                return Ok(func);
            }
        }
    }
    load(code)
}

/// Splits off the last non-blank line if it can stand alone as an
/// expression.
fn split_last_line(code: &str) -> Option<(&str, &str)> {
    let (head, last) = code.trim_end().rsplit_once('\n')?;
    let last = last.trim();
    if head.trim().is_empty() || last.is_empty() || CONTINUATION_PREFIXES.iter().any(|p| last.starts_with(p)) {
        return None;
    }
    Some((head, last))
}

struct TableSnapshot {
    table: Table,
    entries: Vec<(Value, Value)>,
    metatable: Option<Table>,
}

/// Raw contents of every table reachable from a session environment.
///
/// Reachability follows keys, values and metatables. Closure upvalues are
/// not followed.
struct BindingsSnapshot {
    tables: Vec<TableSnapshot>,
}

impl BindingsSnapshot {
    fn capture(env: &Table) -> mlua::Result<Self> {
        let mut seen = HashSet::from([env.to_pointer()]);
        let mut pending = vec![env.clone()];
        let mut tables = Vec::new();

        while let Some(table) = pending.pop() {
            let entries = table.pairs::<Value, Value>().collect::<mlua::Result<Vec<_>>>()?;
            let metatable = table.metatable();
            for (key, value) in &entries {
                visit(key, &mut seen, &mut pending);
                visit(value, &mut seen, &mut pending);
            }
            if let Some(meta) = &metatable {
                if seen.insert(meta.to_pointer()) {
                    pending.push(meta.clone());
                }
            }
            tables.push(TableSnapshot {
                table,
                entries,
                metatable,
            });
        }
        Ok(Self { tables })
    }

    /// Puts every captured table back in place. Tables created by the
    /// failed call become unreachable.
    fn restore(self) -> mlua::Result<()> {
        for TableSnapshot {
            table,
            entries,
            metatable,
        } in self.tables
        {
            let keys = table
                .pairs::<Value, Value>()
                .map(|pair| pair.map(|(key, _)| key))
                .collect::<mlua::Result<Vec<_>>>()?;
            for key in keys {
                table.raw_set(key, Value::Nil)?;
            }
            for (key, value) in entries {
                table.raw_set(key, value)?;
            }
            table.set_metatable(metatable);
        }
        Ok(())
    }
}

fn visit(value: &Value, seen: &mut HashSet<*const c_void>, pending: &mut Vec<Table>) {
    if let Value::Table(table) = value {
        if seen.insert(table.to_pointer()) {
            pending.push(table.clone());
        }
    }
}

/// Removes `print` and the capability API, restores the plain protected
/// calls, and swaps any top-level binding that holds a handle or closure of
/// the finished call for an inert stub.
fn scrub(lua: &Lua, env: &Table, ctx: &CallContext) -> mlua::Result<()> {
    capability::restore_protected_calls(lua, env)?;
    for name in capability::API_NAMES.iter().copied().chain(["print"]) {
        env.raw_set(name, Value::Nil)?;
    }
    let stale = env
        .pairs::<Value, Value>()
        .filter_map(|pair| match pair {
            Ok((key, value)) if ctx.is_ephemeral(value.to_pointer()) => Some(Ok((key, value))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<mlua::Result<Vec<_>>>()?;
    for (key, value) in stale {
        env.raw_set(key, capability::inert_stub(lua, &value)?)?;
    }
    Ok(())
}

/// A [`Fault`] carried inside a Lua error, if any.
fn fault_of(err: &mlua::Error) -> Option<Fault> {
    match err {
        mlua::Error::CallbackError { cause, .. } => fault_of(cause),
        mlua::Error::WithContext { cause, .. } => fault_of(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<Fault>().cloned(),
        _ => None,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
