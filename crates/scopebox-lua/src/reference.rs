//! Snippet-facing API reference returned by `get_api_reference`.

pub const API_REFERENCE: &str = r#"# scopebox snippet API

Snippets are Lua 5.4. The value of the final expression (if any) is
returned as `lastValue` and appended to the output. `print` output is
captured.

## Available standard library

`tostring tonumber type pairs ipairs next select error pcall xpcall assert
rawget rawset rawlen rawequal setmetatable getmetatable unpack`, the `math`,
`string`, `table` and `utf8` libraries, and `os.time os.clock os.date
os.difftime`. There is no `io`, `load`, `require`, `debug` or `coroutine`.

## Capabilities

Resources are reachable only inside a grant block. Grants end when the block
returns or fails. A handle kept past its block raises `CapabilityError`,
including in later session calls. Blocks nest: an outer handle stays usable
inside an inner block, since its own grant is still live.

### File system

```lua
requestFileSystem("/path/to/project", function(fs)
  local f = fs.access("notes/todo.txt")   -- or access(...)
  f.write("hello\n")
  f.append("more\n")
  print(f.read())
  print(f.exists(), f.isDirectory())
  fs.access("out/reports").mkdirs()
  for _, e in ipairs(fs.access(".").list()) do print(e.name, e.isDirectory, e.size) end
  for _, m in ipairs(fs.grep("TODO", "notes")) do print(m.path, m.line, m.text) end
  local hits = fs.grepRecursive("fn main", "src", "**/*.rs")
  local files = fs.find("src", "**/*.rs")
end)
```

Paths are relative to the root (absolute paths must lie under it). `..`
and symlinks that leave the root fail with `AccessDenied`.

### Processes

```lua
requestExecPermission({"ls", "git"}, function(proc)
  local r = proc.exec("ls", {"-la"})      -- or exec(...)
  print(r.ok, r.exitCode, r.stdout, r.stderr)
end)
```

Programs run directly (no shell) with a cleared environment. The working
directory is the innermost file-system root, if any. A process that
exceeds the time limit is killed and the call fails with `ProcessTimeout`.

### Network

```lua
requestNetwork({"api.example.com"}, function(net)
  local r = net.httpGet("https://api.example.com/v1/items", {Accept = "application/json"})
  print(r.ok, r.status, r.body, r.headers["content-type"], r.truncated)
  local p = net.httpPost("https://api.example.com/v1/items", "{}", {["Content-Type"] = "application/json"})
end)
```

Only `http`/`https`; the host must be listed exactly. Redirects are not
followed. Transport failures return `{ok = false, error, errorKind}`;
timeouts fail the call with `NetworkTimeout`.

## Errors

| Kind | Meaning |
|------|---------|
| `ValidationRejected` | source matched a forbidden pattern; nothing ran |
| `CapabilityError` | no grant of the needed kind, or a stale handle |
| `AccessDenied` | a grant exists but the resource is outside it |
| `ProcessTimeout` / `NetworkTimeout` | time limit exceeded |
| `ParseError` | the snippet did not compile |
| `RuntimeError` | the snippet failed while running |

`CapabilityError`, `AccessDenied` and timeouts end the call even when
caught with `pcall`.

## Sessions

In a session, global assignments persist between calls (`x = 42`, then
`x * 2`). A failed call leaves the previous bindings untouched, including
fields of tables reachable from globals. Locals captured by closures are not
rolled back. Grants never persist.
"#;
