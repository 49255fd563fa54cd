//! Stateful sessions.
//!
//! A session owns one interpreter whose top-level bindings persist across
//! calls. Calls on one session are serialized by a per-session async lock;
//! calls on different sessions run in parallel.
//!
//! ```text
//! create() ──► Active ──delete()/shutdown()──► Deleted
//! ```
//!
//! A caller queued on the lock of a session that gets deleted receives
//! [`SessionError::NotFound`] once it acquires the lock.

use crate::engine::{run_blocking, ExecutionEngine, Interpreter, Persistence};
use crate::error::{EngineError, ErrorKind, SessionError};
use crate::result::ExecutionResult;
use crate::validate::Validator;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque session token (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Public view of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

struct SessionSlot {
    created_at: DateTime<Utc>,
    deleted: AtomicBool,
    /// `None` once the session is torn down.
    interpreter: Arc<tokio::sync::Mutex<Option<Interpreter>>>,
}

impl SessionSlot {
    /// Marks the slot dead and frees the VM if no call holds it.
    fn retire(&self) {
        self.deleted.store(true, Ordering::Release);
        if let Ok(mut guard) = self.interpreter.try_lock() {
            guard.take();
        }
    }
}

/// Registry of live sessions.
pub struct SessionManager {
    engine: Arc<ExecutionEngine>,
    validator: Arc<Validator>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionManager {
    pub fn new(engine: Arc<ExecutionEngine>, validator: Arc<Validator>) -> Self {
        Self {
            engine,
            validator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a session with a fresh interpreter and empty environment.
    ///
    /// # Errors
    ///
    /// Fails if the interpreter cannot be set up.
    pub fn create(&self) -> Result<SessionId, EngineError> {
        let interpreter = self.engine.new_interpreter()?;
        let id = SessionId::new();
        let slot = Arc::new(SessionSlot {
            created_at: Utc::now(),
            deleted: AtomicBool::new(false),
            interpreter: Arc::new(tokio::sync::Mutex::new(Some(interpreter))),
        });
        self.sessions.write().insert(id, slot);
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    /// Validates and evaluates `code` in the session's environment.
    ///
    /// Waits for earlier calls on the same session to finish first.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for unknown ids and for sessions deleted
    /// before this call acquired the session lock.
    pub async fn execute_in_session(&self, id: SessionId, code: &str) -> Result<ExecutionResult, SessionError> {
        let slot = self
            .sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))?;

        let guard = Arc::clone(&slot.interpreter).lock_owned().await;
        if slot.deleted.load(Ordering::Acquire) || guard.is_none() {
            tracing::debug!(session = %id, "session deleted while waiting for its lock");
            return Err(SessionError::NotFound(id));
        }

        let outcome = self.validator.validate(code);
        if let Some(rejected) = ExecutionResult::rejected(&outcome) {
            return Ok(rejected);
        }

        let engine = Arc::clone(&self.engine);
        let code = code.to_string();
        let result = run_blocking(move || match (*guard).as_ref() {
            Some(interpreter) => engine.evaluate(interpreter, &code, Persistence::Commit),
            None => ExecutionResult::failure(ErrorKind::RuntimeError, "session interpreter released", String::new()),
        })
        .await;

        tracing::debug!(session = %id, success = result.success, "session call finished");
        Ok(result)
    }

    /// Deletes a session. Returns `false` if it did not exist.
    pub fn delete(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id);
        match removed {
            Some(slot) => {
                slot.retire();
                tracing::info!(session = %id, "session deleted");
                true
            }
            None => false,
        }
    }

    /// Ids of all live sessions.
    pub fn list(&self) -> BTreeSet<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn info(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&id).map(|slot| SessionInfo {
            id,
            created_at: slot.created_at,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Deletes every session. Returns how many were live.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        for (_, slot) in &drained {
            slot.retire();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "sessions shut down");
        }
        drained.len()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}
