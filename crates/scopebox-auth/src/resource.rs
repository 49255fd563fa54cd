//! Resource boundary policy.
//!
//! Controls *where* a file-system grant may reach. The same trait is
//! implemented by [`RootSandbox`](crate::RootSandbox) for real roots and by
//! test doubles for contract tests.
//!
//! # Security
//!
//! Implementations must normalize `..` components and canonicalize
//! symlinks before the boundary check.

use std::path::{Path, PathBuf};
use thiserror::Error;

// ─── Error ──────────────────────────────────────────────────────────

/// Errors from sandbox path validation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Path resolves outside the sandbox boundary.
    #[error("access denied: '{path}' is outside sandbox root '{root}'")]
    OutsideBoundary { path: String, root: String },

    /// Path does not exist (for read operations).
    #[error("path not found: {path} ({source})")]
    NotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Sandbox initialization failed.
    #[error("sandbox init failed: {0}")]
    Init(String),
}

impl SandboxError {
    /// Returns `true` when the error is a boundary violation rather
    /// than an I/O condition.
    #[must_use]
    pub fn is_boundary_violation(&self) -> bool {
        matches!(self, Self::OutsideBoundary { .. })
    }
}

// ─── Trait ───────────────────────────────────────────────────────────

/// Resource boundary policy for file operations.
///
/// Every path a snippet names goes through this trait before any I/O.
pub trait SandboxPolicy: Send + Sync + std::fmt::Debug {
    /// The effective sandbox boundary.
    ///
    /// All file operations must resolve to paths under this root.
    fn root(&self) -> &Path;

    /// Validates an existing path for reading.
    ///
    /// Resolves relative paths against `root()`, canonicalizes,
    /// and verifies the result is under `root()`.
    fn validate_read(&self, path: &str) -> Result<PathBuf, SandboxError>;

    /// Validates a (potentially new) path for writing.
    ///
    /// For paths that don't exist yet, walks up to the deepest
    /// existing ancestor and validates that.
    fn validate_write(&self, path: &str) -> Result<PathBuf, SandboxError>;
}
