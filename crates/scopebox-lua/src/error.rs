//! Error taxonomy for snippet execution.
//!
//! Every failed [`ExecutionResult`](crate::ExecutionResult) carries an
//! [`ErrorKind`]. Setup failures of the engine itself surface as
//! [`EngineError`]; unknown session ids as [`SessionError`].

use crate::session::SessionId;
use scopebox_auth::GrantError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Validator hit; the interpreter never ran.
    ValidationRejected,
    /// No live grant of the needed kind.
    CapabilityError,
    /// A grant exists but the resource is outside it.
    AccessDenied,
    /// A spawned process exceeded its timeout.
    ProcessTimeout,
    /// An HTTP request exceeded its timeout.
    NetworkTimeout,
    /// The snippet did not compile.
    ParseError,
    /// The snippet failed while running.
    RuntimeError,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationRejected => "ValidationRejected",
            Self::CapabilityError => "CapabilityError",
            Self::AccessDenied => "AccessDenied",
            Self::ProcessTimeout => "ProcessTimeout",
            Self::NetworkTimeout => "NetworkTimeout",
            Self::ParseError => "ParseError",
            Self::RuntimeError => "RuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&GrantError> for ErrorKind {
    fn from(err: &GrantError) -> Self {
        if err.is_capability_error() {
            Self::CapabilityError
        } else {
            Self::AccessDenied
        }
    }
}

/// A terminal failure recorded while a call runs.
///
/// Raised into Lua as an external error and also kept on the call context,
/// so a snippet that swallows it with `pcall` still fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<GrantError> for Fault {
    fn from(err: GrantError) -> Self {
        Self::new(ErrorKind::from(&err), err.to_string())
    }
}

/// The engine could not be set up.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Lua state or environment construction failed.
    #[error("interpreter setup failed: {0}")]
    Lua(#[from] mlua::Error),

    /// HTTP client construction failed.
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Validator catalogue failed to compile.
    #[error(transparent)]
    Validator(#[from] crate::validate::ValidatorError),
}

/// Session lookup failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Unknown id, or the session was deleted.
    #[error("SessionNotFound: no active session '{0}'")]
    NotFound(SessionId),
}
