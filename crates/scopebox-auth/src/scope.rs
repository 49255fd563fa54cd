//! Call-local scope stack.
//!
//! Every execution call owns exactly one [`ScopeStack`]. `requestX` blocks
//! push a frame on entry and pop it on exit; resource primitives search the
//! live frames innermost first.
//!
//! ```text
//! requestFileSystem("/a", fs1)      push #0 Root(/a)
//!   requestExecPermission({"ls"})   push #1 Commands{ls}
//!     exec("ls")                    ── finds #1
//!     fs1.access("x")               ── #0 live ✓
//!   (exit)                          pop #1
//! (exit)                            pop #0
//! fs1.access("x")                   ── #0 gone → Expired
//! ```

use crate::error::GrantError;
use crate::grant::{CapabilityGrant, FrameId, GrantKind, GrantScope};

/// Ordered set of the grants active in one call.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<CapabilityGrant>,
    next_frame: u64,
}

impl ScopeStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a new grant and returns its frame id.
    pub fn push(&mut self, scope: GrantScope) -> FrameId {
        let frame = FrameId(self.next_frame);
        self.next_frame += 1;
        tracing::debug!(frame = %frame, kind = %scope.kind(), scope = %scope, "grant pushed");
        self.frames.push(CapabilityGrant::new(frame, scope));
        frame
    }

    /// Pops the grant created for `frame`.
    ///
    /// Frames normally leave in LIFO order. If `frame` is not on top, it is
    /// still removed so that a grant can never outlive its block.
    pub fn pop(&mut self, frame: FrameId) -> Option<CapabilityGrant> {
        let index = self.frames.iter().rposition(|g| g.frame() == frame)?;
        if index + 1 != self.frames.len() {
            tracing::warn!(frame = %frame, depth = self.frames.len(), "grant popped out of order");
        }
        let grant = self.frames.remove(index);
        tracing::debug!(frame = %frame, kind = %grant.kind(), "grant popped");
        Some(grant)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `true` while the frame's block has not exited.
    #[must_use]
    pub fn is_live(&self, frame: FrameId) -> bool {
        self.frames.iter().any(|g| g.frame() == frame)
    }

    /// The live grant for `frame`.
    ///
    /// # Errors
    ///
    /// [`GrantError::Expired`] once the frame has been popped.
    pub fn live(&self, frame: FrameId, kind: GrantKind) -> Result<&CapabilityGrant, GrantError> {
        self.frames
            .iter()
            .find(|g| g.frame() == frame && g.kind() == kind)
            .ok_or(GrantError::Expired { kind, frame })
    }

    /// Innermost live grant of `kind`, if any.
    #[must_use]
    pub fn innermost(&self, kind: GrantKind) -> Option<&CapabilityGrant> {
        self.frames.iter().rev().find(|g| g.kind() == kind)
    }

    /// Searches live grants of `kind` innermost first and returns the first
    /// one `matcher` accepts, with whatever the matcher produced.
    ///
    /// # Errors
    ///
    /// - [`GrantError::NoGrant`] when no grant of `kind` is live
    /// - [`GrantError::OutOfScope`] when grants exist but none covers `resource`
    pub fn select<T>(
        &self,
        kind: GrantKind,
        operation: &str,
        resource: &str,
        mut matcher: impl FnMut(&CapabilityGrant) -> Option<T>,
    ) -> Result<(FrameId, T), GrantError> {
        let mut saw_kind = false;
        for grant in self.frames.iter().rev().filter(|g| g.kind() == kind) {
            saw_kind = true;
            if let Some(found) = matcher(grant) {
                return Ok((grant.frame(), found));
            }
        }

        if saw_kind {
            Err(GrantError::OutOfScope {
                kind,
                resource: resource.to_string(),
            })
        } else {
            Err(GrantError::NoGrant {
                kind,
                operation: operation.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(names: &[&str]) -> GrantScope {
        GrantScope::commands(names.iter().copied())
    }

    #[test]
    fn new_stack_is_empty() {
        let stack = ScopeStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn push_pop_lifo() {
        let mut stack = ScopeStack::new();
        let a = stack.push(commands(&["ls"]));
        let b = stack.push(GrantScope::hosts(["a.test"]));
        assert_ne!(a, b);
        assert_eq!(stack.depth(), 2);

        assert_eq!(stack.pop(b).map(|g| g.frame()), Some(b));
        assert!(stack.is_live(a));
        assert!(!stack.is_live(b));
        assert_eq!(stack.pop(a).map(|g| g.frame()), Some(a));
        assert!(stack.is_empty());
    }

    #[test]
    fn frame_ids_are_not_reused() {
        let mut stack = ScopeStack::new();
        let a = stack.push(commands(&["ls"]));
        stack.pop(a);
        let b = stack.push(commands(&["ls"]));
        assert_ne!(a, b);
        assert!(matches!(
            stack.live(a, GrantKind::Process),
            Err(GrantError::Expired { .. })
        ));
    }

    #[test]
    fn pop_unknown_frame_is_none() {
        let mut stack = ScopeStack::new();
        assert!(stack.pop(FrameId(42)).is_none());
    }

    #[test]
    fn out_of_order_pop_still_removes() {
        let mut stack = ScopeStack::new();
        let a = stack.push(commands(&["ls"]));
        let b = stack.push(commands(&["cat"]));
        assert!(stack.pop(a).is_some());
        assert!(!stack.is_live(a));
        assert!(stack.is_live(b));
    }

    #[test]
    fn live_checks_kind() {
        let mut stack = ScopeStack::new();
        let a = stack.push(commands(&["ls"]));
        assert!(stack.live(a, GrantKind::Process).is_ok());
        assert!(stack.live(a, GrantKind::Network).is_err());
    }

    #[test]
    fn select_without_grant_is_capability_error() {
        let stack = ScopeStack::new();
        let err = stack
            .select(GrantKind::Process, "exec", "ls", |g| {
                g.scope().permits_command("ls").then_some(())
            })
            .expect_err("empty stack has no grant");
        assert!(matches!(err, GrantError::NoGrant { .. }));
    }

    #[test]
    fn select_outside_scope_is_access_denied() {
        let mut stack = ScopeStack::new();
        stack.push(commands(&["ls"]));
        let err = stack
            .select(GrantKind::Process, "exec", "rm", |g| {
                g.scope().permits_command("rm").then_some(())
            })
            .expect_err("rm is not allowed");
        assert!(matches!(err, GrantError::OutOfScope { .. }));
    }

    #[test]
    fn select_ignores_other_kinds() {
        let mut stack = ScopeStack::new();
        stack.push(GrantScope::hosts(["ls"]));
        let err = stack
            .select(GrantKind::Process, "exec", "ls", |g| {
                g.scope().permits_command("ls").then_some(())
            })
            .expect_err("network grant must not satisfy exec");
        assert!(err.is_capability_error());
    }

    #[test]
    fn select_prefers_innermost() {
        let mut stack = ScopeStack::new();
        let outer = stack.push(commands(&["ls", "cat"]));
        let inner = stack.push(commands(&["ls"]));

        let (frame, ()) = stack
            .select(GrantKind::Process, "exec", "ls", |g| {
                g.scope().permits_command("ls").then_some(())
            })
            .expect("ls is allowed");
        assert_eq!(frame, inner);

        let (frame, ()) = stack
            .select(GrantKind::Process, "exec", "cat", |g| {
                g.scope().permits_command("cat").then_some(())
            })
            .expect("cat is allowed by the outer frame");
        assert_eq!(frame, outer);
    }

    #[test]
    fn innermost_by_kind() {
        let mut stack = ScopeStack::new();
        let a = stack.push(commands(&["ls"]));
        stack.push(GrantScope::hosts(["a.test"]));
        assert_eq!(stack.innermost(GrantKind::Process).map(|g| g.frame()), Some(a));
        assert!(stack.innermost(GrantKind::FileSystem).is_none());
    }
}
