//! Per-call capability state.
//!
//! One [`CallContext`] exists per execution call. It owns the call's
//! [`ScopeStack`], the first terminal fault raised during the call, and
//! the set of values (handles, API closures) that must never outlive it.

use crate::config::EngineConfig;
use crate::error::{ErrorKind, Fault};
use parking_lot::Mutex;
use scopebox_auth::{CapabilityGrant, FrameId, GrantError, GrantKind, GrantScope, ScopeStack};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error raised when a capability value is used after its call ended.
pub(crate) fn stale_use() -> mlua::Error {
    mlua::Error::external(Fault::new(
        ErrorKind::CapabilityError,
        "capability error: capability API used after its execution call ended",
    ))
}

/// Limits copied out of [`EngineConfig`] for one call.
#[derive(Debug, Clone)]
pub(crate) struct CallLimits {
    pub(crate) exec_timeout: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) max_process_output_bytes: usize,
    pub(crate) max_http_body_bytes: usize,
}

impl From<&EngineConfig> for CallLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            exec_timeout: config.exec_timeout(),
            http_timeout: config.http_timeout(),
            max_process_output_bytes: config.max_process_output_bytes,
            max_http_body_bytes: config.max_http_body_bytes,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CallContext {
    stack: Mutex<ScopeStack>,
    fault: Mutex<Option<Fault>>,
    closed: AtomicBool,
    ephemeral: Mutex<HashSet<usize>>,
    pub(crate) limits: CallLimits,
    pub(crate) http: reqwest::Client,
}

impl CallContext {
    pub(crate) fn new(limits: CallLimits, http: reqwest::Client) -> Arc<Self> {
        Arc::new(Self {
            stack: Mutex::new(ScopeStack::new()),
            fault: Mutex::new(None),
            closed: AtomicBool::new(false),
            ephemeral: Mutex::new(HashSet::new()),
            limits,
            http,
        })
    }

    /// Fails once the call has ended or already hit a terminal fault.
    pub(crate) fn ensure_open(&self) -> mlua::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(stale_use());
        }
        self.check_fault()
    }

    /// Re-raises the recorded fault, if any.
    pub(crate) fn check_fault(&self) -> mlua::Result<()> {
        match self.fault.lock().clone() {
            Some(fault) => Err(mlua::Error::external(fault)),
            None => Ok(()),
        }
    }

    /// Records `fault` (first one wins) and returns it as a Lua error.
    pub(crate) fn fail(&self, fault: Fault) -> mlua::Error {
        let mut slot = self.fault.lock();
        if slot.is_none() {
            tracing::info!(kind = %fault.kind, message = %fault.message, "call fault recorded");
            *slot = Some(fault.clone());
        }
        mlua::Error::external(fault)
    }

    pub(crate) fn deny(&self, err: GrantError) -> mlua::Error {
        self.fail(Fault::from(err))
    }

    pub(crate) fn fault(&self) -> Option<Fault> {
        self.fault.lock().clone()
    }

    /// Ends the call: every surviving closure becomes inert.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Pushes a grant; the returned guard pops it on drop.
    pub(crate) fn push(self: &Arc<Self>, scope: GrantScope) -> FrameGuard {
        let frame = self.stack.lock().push(scope);
        FrameGuard {
            ctx: Arc::clone(self),
            frame,
        }
    }

    /// Finds a live grant covering `resource`.
    ///
    /// With `frame` set, only that frame is consulted (handle access);
    /// otherwise the stack is searched innermost first (ambient access).
    /// Failures are recorded as terminal faults.
    pub(crate) fn authorize<T>(
        &self,
        frame: Option<FrameId>,
        kind: GrantKind,
        operation: &str,
        resource: &str,
        matcher: impl FnMut(&CapabilityGrant) -> Option<T>,
    ) -> mlua::Result<(FrameId, T)> {
        self.ensure_open()?;
        let outcome = {
            let stack = self.stack.lock();
            match frame {
                None => stack.select(kind, operation, resource, matcher),
                Some(frame) => {
                    let mut matcher = matcher;
                    stack.live(frame, kind).and_then(|grant| {
                        matcher(grant)
                            .map(|found| (frame, found))
                            .ok_or_else(|| GrantError::OutOfScope {
                                kind,
                                resource: resource.to_string(),
                            })
                    })
                }
            }
        };
        outcome.map_err(|e| self.deny(e))
    }

    /// Working directory for spawned processes: the innermost live
    /// file-system root, else the host process directory.
    pub(crate) fn process_cwd(&self) -> PathBuf {
        let root = self
            .stack
            .lock()
            .innermost(GrantKind::FileSystem)
            .and_then(|g| g.scope().sandbox())
            .map(|sb| scopebox_auth::SandboxPolicy::root(sb).to_path_buf());
        root.or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    pub(crate) fn mark_ephemeral(&self, ptr: *const std::ffi::c_void) {
        if !ptr.is_null() {
            self.ephemeral.lock().insert(ptr as usize);
        }
    }

    pub(crate) fn is_ephemeral(&self, ptr: *const std::ffi::c_void) -> bool {
        !ptr.is_null() && self.ephemeral.lock().contains(&(ptr as usize))
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.stack.lock().depth()
    }
}

/// Pops its frame when dropped, on every exit path of a `requestX` block.
#[derive(Debug)]
pub(crate) struct FrameGuard {
    ctx: Arc<CallContext>,
    frame: FrameId,
}

impl FrameGuard {
    pub(crate) fn frame(&self) -> FrameId {
        self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.ctx.stack.lock().pop(self.frame);
    }
}
