//! Capability grants.
//!
//! A [`CapabilityGrant`] authorizes exactly one resource kind within one
//! scope. Grants are created when a `requestX` block is entered and are
//! destroyed when that block exits; the [`FrameId`] they carry is how a
//! handle proves its grant is still alive.
//!
//! | Kind | Scope | Matching |
//! |------|-------|----------|
//! | [`GrantKind::FileSystem`] | [`GrantScope::Root`] | path resolves under the root |
//! | [`GrantKind::Process`] | [`GrantScope::Commands`] | exact executable name |
//! | [`GrantKind::Network`] | [`GrantScope::Hosts`] | exact host, case-insensitive |

use crate::resource::SandboxPolicy;
use crate::sandbox::RootSandbox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Resource kind a grant authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    FileSystem,
    Process,
    Network,
}

impl GrantKind {
    /// Name of the Lua entry point that creates grants of this kind.
    #[must_use]
    pub fn request_fn(self) -> &'static str {
        match self {
            Self::FileSystem => "requestFileSystem",
            Self::Process => "requestExecPermission",
            Self::Network => "requestNetwork",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSystem => f.write_str("file system"),
            Self::Process => f.write_str("process"),
            Self::Network => f.write_str("network"),
        }
    }
}

/// Identifier of the scope stack frame that created a grant.
///
/// Allocated monotonically per stack, so a popped frame id is never
/// reused within the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a grant covers.
#[derive(Debug, Clone)]
pub enum GrantScope {
    /// Directory tree under a canonical root.
    Root(RootSandbox),
    /// Executable names allowed to be spawned.
    Commands(BTreeSet<String>),
    /// Destination hosts, stored lowercase.
    Hosts(BTreeSet<String>),
}

impl GrantScope {
    /// Builds a command allowlist. Names are kept verbatim.
    pub fn commands<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Commands(names.into_iter().map(Into::into).collect())
    }

    /// Builds a host allowlist. Hosts are lowercased.
    pub fn hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Hosts(
            hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .collect(),
        )
    }

    /// The resource kind this scope belongs to.
    #[must_use]
    pub fn kind(&self) -> GrantKind {
        match self {
            Self::Root(_) => GrantKind::FileSystem,
            Self::Commands(_) => GrantKind::Process,
            Self::Hosts(_) => GrantKind::Network,
        }
    }

    /// Exact-match check for a command name.
    #[must_use]
    pub fn permits_command(&self, program: &str) -> bool {
        matches!(self, Self::Commands(set) if set.contains(program))
    }

    /// Exact, case-insensitive check for a host.
    #[must_use]
    pub fn permits_host(&self, host: &str) -> bool {
        matches!(self, Self::Hosts(set) if set.contains(&host.to_ascii_lowercase()))
    }

    /// The root sandbox of a file-system scope.
    #[must_use]
    pub fn sandbox(&self) -> Option<&RootSandbox> {
        match self {
            Self::Root(sandbox) => Some(sandbox),
            _ => None,
        }
    }
}

impl fmt::Display for GrantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(sandbox) => write!(f, "root {}", sandbox.root().display()),
            Self::Commands(set) => write!(f, "commands {set:?}"),
            Self::Hosts(set) => write!(f, "hosts {set:?}"),
        }
    }
}

/// An active, scope-bound permission.
#[derive(Debug, Clone)]
pub struct CapabilityGrant {
    frame: FrameId,
    scope: GrantScope,
}

impl CapabilityGrant {
    pub(crate) fn new(frame: FrameId, scope: GrantScope) -> Self {
        Self { frame, scope }
    }

    #[must_use]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    #[must_use]
    pub fn kind(&self) -> GrantKind {
        self.scope.kind()
    }

    #[must_use]
    pub fn scope(&self) -> &GrantScope {
        &self.scope
    }
}
