//! Rendering Lua values and errors as text.

use mlua::Value;

/// Nesting depth past which tables render as `"<table>"`.
const MAX_JSON_DEPTH: usize = 32;

/// Display form used by the captured `print`.
pub(crate) fn lua_display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Table(_) => format!("table: {:p}", value.to_pointer()),
        Value::Function(_) => format!("function: {:p}", value.to_pointer()),
        _ => format!("{}: {:p}", value.type_name(), value.to_pointer()),
    }
}

/// Rendered form of a snippet's final value.
///
/// Tables become JSON when they contain only JSON-representable data.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::Table(_) => match lua_to_json(value, 0) {
            Some(json) => serde_json::to_string(&json).unwrap_or_else(|_| "<table>".to_string()),
            None => "<table>".to_string(),
        },
        other => lua_display(other),
    }
}

/// Converts a Lua value into JSON.
///
/// Sequences become arrays, other tables objects with string keys.
/// Returns `None` for functions, userdata, cycles and over-deep nesting.
pub(crate) fn lua_to_json(value: &Value, depth: usize) -> Option<serde_json::Value> {
    if depth > MAX_JSON_DEPTH {
        return None;
    }
    match value {
        Value::Nil => Some(serde_json::Value::Null),
        Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
        Value::Integer(i) => Some(serde_json::Value::Number((*i).into())),
        Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
        Value::String(s) => Some(serde_json::Value::String(s.to_string_lossy().to_string())),
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut arr = Vec::with_capacity(len);
                for i in 1..=len {
                    let v: Value = table.raw_get(i).ok()?;
                    arr.push(lua_to_json(&v, depth + 1)?);
                }
                Some(serde_json::Value::Array(arr))
            } else {
                let mut map = serde_json::Map::new();
                for pair in table.pairs::<Value, Value>() {
                    let (k, v) = pair.ok()?;
                    let key = match &k {
                        Value::String(s) => s.to_string_lossy().to_string(),
                        Value::Integer(i) => i.to_string(),
                        _ => return None,
                    };
                    map.insert(key, lua_to_json(&v, depth + 1)?);
                }
                Some(serde_json::Value::Object(map))
            }
        }
        _ => None,
    }
}

/// Formats an `mlua::Error` for callers, unwrapping callback layers.
pub(crate) fn format_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        mlua::Error::MemoryError(msg) => format!("memory limit exceeded: {msg}"),
        _ => err.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}.0", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn eval(lua: &Lua, code: &str) -> Value {
        lua.load(code).eval::<Value>().expect("test chunk should evaluate")
    }

    #[test]
    fn display_scalars() {
        let lua = Lua::new();
        assert_eq!(lua_display(&eval(&lua, "return 84")), "84");
        assert_eq!(lua_display(&eval(&lua, "return 2.0")), "2.0");
        assert_eq!(lua_display(&eval(&lua, "return 1.5")), "1.5");
        assert_eq!(lua_display(&eval(&lua, "return true")), "true");
        assert_eq!(lua_display(&eval(&lua, "return 'hi'")), "hi");
        assert_eq!(lua_display(&Value::Nil), "nil");
    }

    #[test]
    fn display_table_is_address() {
        let lua = Lua::new();
        assert!(lua_display(&eval(&lua, "return {}")).starts_with("table: "));
    }

    #[test]
    fn render_sequence_as_json_array() {
        let lua = Lua::new();
        assert_eq!(render_value(&eval(&lua, "return {1, 2, 3}")), "[1,2,3]");
    }

    #[test]
    fn render_map_as_json_object() {
        let lua = Lua::new();
        assert_eq!(render_value(&eval(&lua, "return {a = 'x'}")), r#"{"a":"x"}"#);
    }

    #[test]
    fn render_cyclic_table_does_not_overflow() {
        let lua = Lua::new();
        let value = eval(&lua, "local t = {} t.self = t return t");
        assert_eq!(render_value(&value), "<table>");
    }

    #[test]
    fn render_table_with_function_falls_back() {
        let lua = Lua::new();
        let value = eval(&lua, "return {f = function() end}");
        assert_eq!(render_value(&value), "<table>");
    }

    #[test]
    fn format_syntax_error() {
        let lua = Lua::new();
        let err = lua
            .load("x = = 1")
            .exec()
            .expect_err("invalid syntax should fail");
        assert!(!format_lua_error(&err).is_empty());
    }

    #[test]
    fn format_runtime_error_keeps_message() {
        let lua = Lua::new();
        let err = lua
            .load("error('boom')")
            .exec()
            .expect_err("error() should fail");
        assert!(format_lua_error(&err).contains("boom"));
    }
}
