//! File system root sandbox.
//!
//! [`RootSandbox`] is the scope of a `FileSystem` grant: every path a
//! snippet names is resolved against the root chosen by
//! `requestFileSystem(root, ...)`.
//!
//! # Resolution
//!
//! ```text
//! "sub/../a.txt"  ─ join root ─► /r/sub/../a.txt
//!                 ─ lexical clean ─► /r/a.txt            (.. removed)
//!                 ─ deepest existing ancestor ─► /r      (canonicalized)
//!                 ─ boundary check ─► /r starts_with /r  ✓
//!                 ─ result ─► /r/a.txt
//! ```
//!
//! Lexical cleaning runs first so that a non-existent component can never
//! smuggle a `..` past the ancestor walk. Canonicalizing the deepest
//! existing ancestor then resolves symlinks that point outside the root.
//!
//! ## Known Limitations
//!
//! Resolution is a check-then-use sequence. Between the boundary check and
//! the I/O a local attacker could swap a directory for a symlink (TOCTOU).
//! File handles re-resolve on every operation, which narrows but does not
//! close that window.

use crate::resource::{SandboxError, SandboxPolicy};
use path_clean::PathClean;
use std::path::{Path, PathBuf};

/// Sandbox rooted at a canonical directory.
///
/// # Example
///
/// ```no_run
/// use scopebox_auth::{RootSandbox, SandboxPolicy};
///
/// let sandbox = RootSandbox::new("/srv/data").expect("sandbox init");
/// assert!(sandbox.validate_write("notes/today.txt").is_ok());
/// assert!(sandbox.validate_write("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSandbox {
    root: PathBuf,
}

impl RootSandbox {
    /// Creates a sandbox rooted at `root`.
    ///
    /// The path is canonicalized to resolve symlinks.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Init`] if the path cannot be canonicalized
    /// or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            SandboxError::Init(format!("cannot canonicalize '{}': {e}", root.display()))
        })?;

        if !canonical.is_dir() {
            return Err(SandboxError::Init(format!(
                "not a directory: '{}'",
                root.display()
            )));
        }

        Ok(Self { root: canonical })
    }

    /// Renders `absolute` relative to the root, for messages shown to snippets.
    #[must_use]
    pub fn display_relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| absolute.display().to_string())
    }

    fn outside(&self, path: &str) -> SandboxError {
        SandboxError::OutsideBoundary {
            path: path.to_string(),
            root: self.root.display().to_string(),
        }
    }
}

impl SandboxPolicy for RootSandbox {
    fn root(&self) -> &Path {
        &self.root
    }

    fn validate_read(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let absolute = resolve_absolute(path, &self.root);
        if !absolute.starts_with(&self.root) {
            return Err(self.outside(path));
        }

        let canonical = absolute
            .canonicalize()
            .map_err(|e| SandboxError::NotFound {
                path: path.to_string(),
                source: e,
            })?;

        if !canonical.starts_with(&self.root) {
            return Err(self.outside(path));
        }

        Ok(canonical)
    }

    fn validate_write(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let absolute = resolve_absolute(path, &self.root);
        if !absolute.starts_with(&self.root) {
            return Err(self.outside(path));
        }

        let mut ancestor = absolute.as_path();
        loop {
            // symlink_metadata so a dangling link still counts as existing
            if ancestor.symlink_metadata().is_ok() {
                let canonical_ancestor = ancestor.canonicalize().map_err(|_| self.outside(path))?;
                if !canonical_ancestor.starts_with(&self.root) {
                    return Err(self.outside(path));
                }
                let suffix = absolute.strip_prefix(ancestor).unwrap_or(Path::new(""));
                if suffix.as_os_str().is_empty() {
                    return Ok(canonical_ancestor);
                }
                return Ok(canonical_ancestor.join(suffix));
            }
            match ancestor.parent() {
                Some(p) if !p.as_os_str().is_empty() => ancestor = p,
                _ => return Err(self.outside(path)),
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Resolves a path to absolute, relative to the given root, with `.` and
/// `..` components removed lexically.
fn resolve_absolute(path: &str, root: &Path) -> PathBuf {
    let requested = Path::new(path);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    joined.clean()
}

// ─── Tests ──────────────────────────────────────────────────────────
