//! Grant lookup errors.
//!
//! Two distinct failures, both terminal for the call that hits them:
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | [`GrantError::NoGrant`] / [`GrantError::Expired`] | no live grant of the needed kind |
//! | [`GrantError::OutOfScope`] | a grant exists but the resource is outside it |

use crate::grant::{FrameId, GrantKind};
use thiserror::Error;

/// Failure to find a live, covering grant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantError {
    /// No active grant of the needed kind.
    #[error("capability error: {operation} requires an active {kind} grant (use {})", .kind.request_fn())]
    NoGrant {
        kind: GrantKind,
        operation: String,
    },

    /// The handle's frame has already been popped.
    #[error("capability error: {kind} handle from frame {frame} used after its block exited")]
    Expired { kind: GrantKind, frame: FrameId },

    /// A grant exists but does not cover the resource.
    #[error("access denied: {resource} is outside the active {kind} grant")]
    OutOfScope { kind: GrantKind, resource: String },
}

impl GrantError {
    /// `true` for the "no usable grant" family, `false` for scope denials.
    #[must_use]
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Self::NoGrant { .. } | Self::Expired { .. })
    }

    #[must_use]
    pub fn kind(&self) -> GrantKind {
        match self {
            Self::NoGrant { kind, .. } | Self::Expired { kind, .. } | Self::OutOfScope { kind, .. } => {
                *kind
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_grant_names_request_function() {
        let err = GrantError::NoGrant {
            kind: GrantKind::Process,
            operation: "exec".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("capability error"), "got: {msg}");
        assert!(msg.contains("requestExecPermission"), "got: {msg}");
        assert!(err.is_capability_error());
    }

    #[test]
    fn expired_is_capability_error() {
        let err = GrantError::Expired {
            kind: GrantKind::FileSystem,
            frame: FrameId(1),
        };
        assert!(err.is_capability_error());
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn out_of_scope_is_access_denied() {
        let err = GrantError::OutOfScope {
            kind: GrantKind::Network,
            resource: "evil.test".into(),
        };
        assert!(!err.is_capability_error());
        assert!(err.to_string().starts_with("access denied"));
        assert_eq!(err.kind(), GrantKind::Network);
    }
}
