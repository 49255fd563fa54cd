//! File operations behind `FileSystem` grants.
//!
//! Every function takes the grant's [`SandboxPolicy`] and validates the
//! path before any I/O. Results name files relative to the sandbox root.
//!
//! | Lua API | Function |
//! |---------|----------|
//! | `file.read()` | [`read_file`] |
//! | `file.write(s)` / `file.append(s)` | [`write_file`] |
//! | `file.list()` | [`list_dir`] |
//! | `file.mkdirs()` | [`make_dirs`] |
//! | `grep(pattern, path)` | [`grep_path`] |
//! | `grepRecursive(pattern, dir, glob?)` | [`grep_recursive`] |
//! | `find(dir, glob)` | [`find_files`] |

use regex::Regex;
use scopebox_auth::{SandboxError, SandboxPolicy};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Maximum directory recursion depth for grep and find.
const MAX_WALK_DEPTH: usize = 32;

/// Maximum number of grep matches to collect.
const MAX_GREP_MATCHES: usize = 10_000;

/// Maximum number of paths `find` returns.
const MAX_FIND_RESULTS: usize = 10_000;

/// Failure of a file operation.
#[derive(Debug, Error)]
pub(crate) enum FsError {
    /// Path validation failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// I/O or argument failure after validation.
    #[error("{0}")]
    Io(String),
}

/// One line matched by grep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GrepMatch {
    pub(crate) path: String,
    pub(crate) line_number: usize,
    pub(crate) line: String,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirEntry {
    pub(crate) name: String,
    pub(crate) is_dir: bool,
    pub(crate) size: u64,
}

/// Reads a whole file as UTF-8.
pub(crate) fn read_file(path: &str, sandbox: &dyn SandboxPolicy) -> Result<String, FsError> {
    let canonical = sandbox.validate_read(path)?;
    if !canonical.is_file() {
        return Err(FsError::Io(format!("not a file: {path}")));
    }
    std::fs::read_to_string(&canonical).map_err(|e| FsError::Io(format!("read failed: {path} ({e})")))
}

/// Writes (or appends) content, creating parent directories.
///
/// Plain writes go through a temp file in the target directory and are
/// renamed into place.
pub(crate) fn write_file(
    path: &str,
    content: &str,
    append: bool,
    sandbox: &dyn SandboxPolicy,
) -> Result<usize, FsError> {
    let target = sandbox.validate_write(path)?;
    if target.is_dir() {
        return Err(FsError::Io(format!("is a directory: {path}")));
    }

    let parent = target
        .parent()
        .ok_or_else(|| FsError::Io(format!("cannot determine parent directory: {path}")))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| FsError::Io(format!("cannot create parent directory: {path} ({e})")))?;

    if append {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(|e| FsError::Io(format!("open failed: {path} ({e})")))?;
        file.write_all(content.as_bytes())
            .map_err(|e| FsError::Io(format!("append failed: {path} ({e})")))?;
        return Ok(content.len());
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| FsError::Io(format!("temp file creation failed: {path} ({e})")))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| FsError::Io(format!("write failed: {path} ({e})")))?;
    temp.persist(&target)
        .map_err(|e| FsError::Io(format!("rename failed: {path} ({e})")))?;

    Ok(content.len())
}

/// Lists a directory, sorted by name.
pub(crate) fn list_dir(path: &str, sandbox: &dyn SandboxPolicy) -> Result<Vec<DirEntry>, FsError> {
    let canonical = sandbox.validate_read(path)?;
    if !canonical.is_dir() {
        return Err(FsError::Io(format!("not a directory: {path}")));
    }

    let entries = std::fs::read_dir(&canonical)
        .map_err(|e| FsError::Io(format!("cannot read directory: {path} ({e})")))?;

    let mut listed: Vec<DirEntry> = entries
        .flatten()
        .map(|entry| {
            let metadata = entry.metadata().ok();
            DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.as_ref().is_some_and(|m| m.is_dir()),
                size: metadata.map_or(0, |m| m.len()),
            }
        })
        .collect();
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listed)
}

/// Creates a directory and its parents.
pub(crate) fn make_dirs(path: &str, sandbox: &dyn SandboxPolicy) -> Result<(), FsError> {
    let target = sandbox.validate_write(path)?;
    std::fs::create_dir_all(&target).map_err(|e| FsError::Io(format!("mkdir failed: {path} ({e})")))
}

/// Greps one file, or the files directly inside one directory.
pub(crate) fn grep_path(
    pattern: &str,
    path: &str,
    sandbox: &dyn SandboxPolicy,
) -> Result<Vec<GrepMatch>, FsError> {
    let re = compile_regex(pattern)?;
    let canonical = sandbox.validate_read(path)?;
    let mut matches = Vec::new();

    if canonical.is_file() {
        grep_file(&re, &canonical, sandbox.root(), &mut matches)?;
    } else if canonical.is_dir() {
        walk_files(&canonical, sandbox.root(), 1, |file| {
            if let Err(e) = grep_file(&re, file, sandbox.root(), &mut matches) {
                tracing::debug!(path = %file.display(), error = %e, "grep: skip");
            }
            matches.len() < MAX_GREP_MATCHES
        });
    } else {
        return Err(FsError::Io(format!("not a file or directory: {path}")));
    }

    Ok(matches)
}

/// Greps every text file under `dir`, optionally filtered by a glob on the
/// path relative to `dir`.
pub(crate) fn grep_recursive(
    pattern: &str,
    dir: &str,
    include: Option<&str>,
    sandbox: &dyn SandboxPolicy,
) -> Result<Vec<GrepMatch>, FsError> {
    let re = compile_regex(pattern)?;
    let include = include.map(compile_glob).transpose()?;
    let base = sandbox.validate_read(dir)?;
    if !base.is_dir() {
        return Err(FsError::Io(format!("not a directory: {dir}")));
    }

    let mut matches = Vec::new();
    walk_files(&base, sandbox.root(), MAX_WALK_DEPTH, |file| {
        if let Some(ref glob) = include {
            let relative = file.strip_prefix(&base).unwrap_or(file);
            if !glob.is_match(relative) {
                return true;
            }
        }
        if let Err(e) = grep_file(&re, file, sandbox.root(), &mut matches) {
            tracing::debug!(path = %file.display(), error = %e, "grep: skip");
        }
        matches.len() < MAX_GREP_MATCHES
    });

    Ok(matches)
}

/// Finds files under `dir` whose path relative to `dir` matches `pattern`.
///
/// Rejects patterns containing `..`.
pub(crate) fn find_files(
    dir: &str,
    pattern: &str,
    sandbox: &dyn SandboxPolicy,
) -> Result<Vec<String>, FsError> {
    if pattern.contains("..") {
        return Err(FsError::Io("glob pattern must not contain '..'".to_string()));
    }
    let glob = compile_glob(pattern)?;
    let base = sandbox.validate_read(dir)?;
    if !base.is_dir() {
        return Err(FsError::Io(format!("not a directory: {dir}")));
    }

    let mut results = Vec::new();
    walk_files(&base, sandbox.root(), MAX_WALK_DEPTH, |file| {
        let relative = file.strip_prefix(&base).unwrap_or(file);
        if glob.is_match(relative) {
            results.push(relative_to_root(file, sandbox.root()));
        }
        results.len() < MAX_FIND_RESULTS
    });

    results.sort();
    Ok(results)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn compile_regex(pattern: &str) -> Result<Regex, FsError> {
    Regex::new(pattern).map_err(|e| FsError::Io(format!("invalid regex: {pattern} ({e})")))
}

fn compile_glob(pattern: &str) -> Result<globset::GlobMatcher, FsError> {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| FsError::Io(format!("invalid glob '{pattern}': {e}")))
}

fn relative_to_root(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Visits regular files under `base` up to `max_depth`.
///
/// Any entry that canonicalizes outside `root` is skipped, so a symlink
/// inside the tree cannot lead the walk out of the sandbox. `visit`
/// returns `false` to stop early.
fn walk_files(base: &Path, root: &Path, max_depth: usize, mut visit: impl FnMut(&Path) -> bool) {
    let walker = walkdir::WalkDir::new(base)
        .max_depth(max_depth)
        .sort_by_file_name();

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() && !entry.file_type().is_symlink() {
            continue;
        }
        let canonical = match entry.path().canonicalize() {
            Ok(c) if c.starts_with(root) && c.is_file() => c,
            _ => continue,
        };
        if !visit(&canonical) {
            break;
        }
    }
}

/// Appends matching lines of one file. Binary files (null byte in the
/// first 512 bytes) are skipped silently.
fn grep_file(re: &Regex, path: &Path, root: &Path, matches: &mut Vec<GrepMatch>) -> Result<(), FsError> {
    let mut file =
        std::fs::File::open(path).map_err(|e| FsError::Io(format!("open failed: {} ({e})", path.display())))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| FsError::Io(format!("read failed: {} ({e})", path.display())))?;
    if bytes.iter().take(512).any(|&b| b == 0) {
        return Ok(());
    }

    let content = String::from_utf8_lossy(&bytes);
    let display = relative_to_root(path, root);
    for (i, line) in content.lines().enumerate() {
        if matches.len() >= MAX_GREP_MATCHES {
            break;
        }
        if re.is_match(line) {
            matches.push(GrepMatch {
                path: display.clone(),
                line_number: i + 1,
                line: line.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopebox_auth::RootSandbox;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, RootSandbox) {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path();
        fs::write(root.join("a.txt"), "alpha\nbeta\ngamma\n").expect("write a.txt");
        fs::create_dir_all(root.join("src/nested")).expect("create src/nested");
        fs::write(root.join("src/main.rs"), "fn main() {}\n// alpha\n").expect("write main.rs");
        fs::write(root.join("src/nested/lib.rs"), "pub fn alpha() {}\n").expect("write lib.rs");
        fs::write(root.join("src/blob.bin"), b"alpha\0\0\0").expect("write blob");
        let sandbox = RootSandbox::new(root).expect("create sandbox");
        (tmp, sandbox)
    }

    #[test]
    fn read_existing_file() {
        let (_tmp, sb) = fixture();
        assert_eq!(read_file("a.txt", &sb).expect("read a.txt"), "alpha\nbeta\ngamma\n");
    }

    #[test]
    fn read_directory_is_io_error() {
        let (_tmp, sb) = fixture();
        assert!(matches!(read_file("src", &sb), Err(FsError::Io(_))));
    }

    #[test]
    fn read_outside_is_sandbox_error() {
        let (_tmp, sb) = fixture();
        match read_file("../outside.txt", &sb) {
            Err(FsError::Sandbox(e)) => assert!(e.is_boundary_violation()),
            other => panic!("expected sandbox error, got {other:?}"),
        }
    }

    #[test]
    fn write_then_append() {
        let (tmp, sb) = fixture();
        write_file("out/new.txt", "one", false, &sb).expect("write new file");
        write_file("out/new.txt", "two", true, &sb).expect("append");
        let content = fs::read_to_string(tmp.path().join("out/new.txt")).expect("read back");
        assert_eq!(content, "onetwo");
    }

    #[test]
    fn write_over_directory_fails() {
        let (_tmp, sb) = fixture();
        assert!(write_file("src", "x", false, &sb).is_err());
    }

    #[test]
    fn list_sorted_with_kinds() {
        let (_tmp, sb) = fixture();
        let entries = list_dir("", &sb).expect("list root");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "src"]);
        assert!(entries[1].is_dir);
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn mkdirs_creates_nested() {
        let (tmp, sb) = fixture();
        make_dirs("x/y/z", &sb).expect("mkdirs");
        assert!(tmp.path().join("x/y/z").is_dir());
    }

    #[test]
    fn grep_single_file() {
        let (_tmp, sb) = fixture();
        let matches = grep_path("^b", "a.txt", &sb).expect("grep a.txt");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, 2);
        assert_eq!(matches[0].line, "beta");
        assert_eq!(matches[0].path, "a.txt");
    }

    #[test]
    fn grep_directory_is_shallow() {
        let (_tmp, sb) = fixture();
        let matches = grep_path("alpha", "src", &sb).expect("grep src");
        let paths: Vec<_> = matches.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs"]);
    }

    #[test]
    fn grep_recursive_skips_binary_and_filters_glob() {
        let (_tmp, sb) = fixture();
        let all = grep_recursive("alpha", "", None, &sb).expect("grep all");
        let paths: Vec<_> = all.iter().map(|m| m.path.as_str()).collect();
        assert!(paths.contains(&"a.txt"));
        assert!(paths.contains(&"src/nested/lib.rs"));
        assert!(!paths.contains(&"src/blob.bin"));

        let rs_only = grep_recursive("alpha", "src", Some("**/*.rs"), &sb).expect("grep rs");
        assert_eq!(rs_only.len(), 2);
    }

    #[test]
    fn grep_invalid_regex() {
        let (_tmp, sb) = fixture();
        assert!(matches!(grep_path("(", "a.txt", &sb), Err(FsError::Io(_))));
    }

    #[test]
    fn find_by_glob() {
        let (_tmp, sb) = fixture();
        let found = find_files("src", "**/*.rs", &sb).expect("find rs files");
        assert_eq!(found, vec!["src/main.rs", "src/nested/lib.rs"]);
    }

    #[test]
    fn find_rejects_dotdot_pattern() {
        let (_tmp, sb) = fixture();
        assert!(find_files("", "../*", &sb).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn walk_skips_symlink_leaving_root() {
        let (tmp, sb) = fixture();
        let outside = TempDir::new().expect("create outside dir");
        fs::write(outside.path().join("secret.rs"), "alpha secret").expect("write secret");
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("src/escape"))
            .expect("create escaping symlink");

        let found = find_files("", "**/*.rs", &sb).expect("find");
        assert!(found.iter().all(|p| !p.contains("secret")));
        let matches = grep_recursive("secret", "", None, &sb).expect("grep");
        assert!(matches.is_empty());
    }
}
