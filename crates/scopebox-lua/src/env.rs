//! Whitelist-only snippet environment.
//!
//! Snippets never see the VM globals. Each interpreter gets an explicit
//! environment table holding copies of the safe standard library entries;
//! `print` and the capability API are injected per call on top of it.
//!
//! Not present: `io`, `load`, `loadfile`, `dofile`, `require`, `package`,
//! `debug`, `collectgarbage`, `coroutine`, and every `os` function except
//! the clock ones.

use crate::render::lua_display;
use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Core functions copied from the VM globals.
const SAFE_FUNCTIONS: &[&str] = &[
    "tostring",
    "tonumber",
    "type",
    "pairs",
    "ipairs",
    "next",
    "select",
    "error",
    "pcall",
    "xpcall",
    "assert",
    "rawget",
    "rawset",
    "rawlen",
    "rawequal",
    "setmetatable",
    "getmetatable",
];

/// Libraries copied whole.
const SAFE_LIBRARIES: &[&str] = &["math", "string", "table", "utf8"];

/// `os` members that only read clocks.
const SAFE_OS_FUNCTIONS: &[&str] = &["time", "clock", "date", "difftime"];

/// Builds a fresh environment table with the safe standard library.
pub(crate) fn build_base_env(lua: &Lua) -> LuaResult<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();

    for name in SAFE_FUNCTIONS.iter().chain(SAFE_LIBRARIES) {
        let val: Value = globals.get(*name)?;
        if !matches!(val, Value::Nil) {
            env.set(*name, val)?;
        }
    }

    if let Value::Table(os) = globals.get::<Value>("os")? {
        let safe_os = lua.create_table()?;
        for name in SAFE_OS_FUNCTIONS {
            safe_os.set(*name, os.get::<Value>(*name)?)?;
        }
        env.set("os", safe_os)?;
    }

    if let Value::Table(table_lib) = globals.get::<Value>("table")? {
        env.set("unpack", table_lib.get::<Value>("unpack")?)?;
    }

    Ok(env)
}

/// `print` output captured for one call.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    lines: Vec<String>,
    size: usize,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            lines: Vec::new(),
            size: 0,
            limit,
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        // joining newline, only between lines
        let separator = usize::from(!self.lines.is_empty());
        let line_len = line.len() + separator;
        if self.size + line_len > self.limit {
            self.truncated = true;
            return;
        }
        self.size += line_len;
        self.lines.push(line);
    }

    /// Joined output, with a marker line if anything was dropped.
    pub(crate) fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.truncated {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[output truncated at {} bytes]", self.limit));
        }
        out
    }
}

/// Creates the capturing `print` for one call.
pub(crate) fn create_print(lua: &Lua, output: Arc<Mutex<OutputBuffer>>) -> LuaResult<mlua::Function> {
    lua.create_function(move |_, args: MultiValue| {
        let line = args.iter().map(lua_display).collect::<Vec<_>>().join("\t");
        output.lock().push(line);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_env_has_safe_functions_only() {
        let lua = Lua::new();
        let env = build_base_env(&lua).expect("build env");

        for name in ["print", "io", "load", "loadfile", "dofile", "require", "package", "debug", "collectgarbage", "coroutine"] {
            assert!(
                matches!(env.get::<Value>(name).expect("get"), Value::Nil),
                "{name} must not be in the base env"
            );
        }
        for name in ["tostring", "pairs", "pcall", "math", "string", "table", "unpack"] {
            assert!(
                !matches!(env.get::<Value>(name).expect("get"), Value::Nil),
                "{name} should be in the base env"
            );
        }
    }

    #[test]
    fn os_subset_only_reads_clocks() {
        let lua = Lua::new();
        let env = build_base_env(&lua).expect("build env");
        let os: Table = env.get("os").expect("os subset");
        assert!(!matches!(os.get::<Value>("time").expect("get"), Value::Nil));
        for name in ["execute", "exit", "remove", "rename", "getenv", "tmpname"] {
            assert!(matches!(os.get::<Value>(name).expect("get"), Value::Nil), "os.{name}");
        }
    }

    #[test]
    fn output_buffer_caps_size() {
        let mut buf = OutputBuffer::new(8);
        buf.push("abc".into());
        buf.push("defg".into());
        buf.push("overflow".into());
        let out = buf.render();
        assert!(out.starts_with("abc\ndefg"));
        assert!(out.contains("truncated"));
    }

    #[test]
    fn output_that_fits_exactly_is_not_truncated() {
        let mut buf = OutputBuffer::new(8);
        buf.push("abc".into());
        buf.push("defg".into());
        assert_eq!(buf.render(), "abc\ndefg");

        let mut single = OutputBuffer::new(3);
        single.push("abc".into());
        assert_eq!(single.render(), "abc");
    }

    #[test]
    fn captured_print_joins_with_tabs() {
        let lua = Lua::new();
        let output = Arc::new(Mutex::new(OutputBuffer::new(1024)));
        let print = create_print(&lua, Arc::clone(&output)).expect("create print");
        print.call::<()>((1, "two", true)).expect("call print");
        assert_eq!(output.lock().render(), "1\ttwo\ttrue");
    }
}
