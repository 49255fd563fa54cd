//! Library facade: validator, engine and sessions behind one type.

use crate::config::EngineConfig;
use crate::engine::ExecutionEngine;
use crate::error::{EngineError, SessionError};
use crate::reference::API_REFERENCE;
use crate::result::ExecutionResult;
use crate::session::{SessionId, SessionInfo, SessionManager};
use crate::validate::Validator;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Receives every completed execution (stateless and session).
///
/// Implementations must not fail the call; errors are theirs to log.
/// `record` runs on the blocking pool, so it may do synchronous I/O.
pub trait ExecutionSink: Send + Sync {
    fn record(&self, session: Option<SessionId>, code: &str, result: &ExecutionResult);
}

/// Entry point for embedding the sandbox.
pub struct Sandbox {
    validator: Arc<Validator>,
    engine: Arc<ExecutionEngine>,
    sessions: SessionManager,
    sink: Option<Arc<dyn ExecutionSink>>,
}

impl Sandbox {
    /// # Errors
    ///
    /// Fails if the validator catalogue or HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let validator = Arc::new(Validator::new()?);
        let engine = Arc::new(ExecutionEngine::new(config)?);
        let sessions = SessionManager::new(Arc::clone(&engine), Arc::clone(&validator));
        Ok(Self {
            validator,
            engine,
            sessions,
            sink: None,
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates and runs `code` on a fresh interpreter.
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        let outcome = self.validator.validate(code);
        let result = match ExecutionResult::rejected(&outcome) {
            Some(rejected) => rejected,
            None => self.engine.execute(code).await,
        };
        self.record(None, code, &result).await;
        result
    }

    /// # Errors
    ///
    /// Fails if the interpreter cannot be set up.
    pub fn create_session(&self) -> Result<SessionId, EngineError> {
        self.sessions.create()
    }

    /// # Errors
    ///
    /// [`SessionError::NotFound`] for unknown or deleted sessions.
    pub async fn execute_in_session(&self, id: SessionId, code: &str) -> Result<ExecutionResult, SessionError> {
        let result = self.sessions.execute_in_session(id, code).await?;
        self.record(Some(id), code, &result).await;
        Ok(result)
    }

    pub fn delete_session(&self, id: SessionId) -> bool {
        self.sessions.delete(id)
    }

    pub fn list_sessions(&self) -> BTreeSet<SessionId> {
        self.sessions.list()
    }

    pub fn session_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.info(id)
    }

    /// Markdown reference of the snippet API.
    #[must_use]
    pub fn api_reference(&self) -> &'static str {
        API_REFERENCE
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Tears down every session, returning how many were live.
    pub fn shutdown(&self) -> usize {
        self.sessions.shutdown()
    }

    async fn record(&self, session: Option<SessionId>, code: &str, result: &ExecutionResult) {
        let Some(sink) = &self.sink else {
            return;
        };
        let sink = Arc::clone(sink);
        let code = code.to_string();
        let result = result.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || sink.record(session, &code, &result)).await {
            tracing::warn!(error = %e, "execution sink failed");
        }
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("engine", &self.engine)
            .field("sessions", &self.sessions)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Option<SessionId>, String, bool)>>,
    }

    impl ExecutionSink for Recorder {
        fn record(&self, session: Option<SessionId>, code: &str, result: &ExecutionResult) {
            self.seen.lock().push((session, code.to_string(), result.success));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sink_sees_stateless_and_session_calls() {
        let recorder = Arc::new(Recorder::default());
        let sandbox = Sandbox::new(EngineConfig::default())
            .expect("sandbox")
            .with_sink(Arc::clone(&recorder) as Arc<dyn ExecutionSink>);

        let result = sandbox.execute("1 + 1").await;
        assert_eq!(result.last_value.as_deref(), Some("2"));

        let id = sandbox.create_session().expect("session");
        sandbox.execute_in_session(id, "y = 1").await.expect("live");

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, None);
        assert_eq!(seen[1].0, Some(id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_code_never_reaches_engine() {
        let sandbox = Sandbox::new(EngineConfig::default()).expect("sandbox");
        let result = sandbox.execute("io.open('/etc/passwd')").await;
        assert!(result.is(ErrorKind::ValidationRejected));
        assert_eq!(sandbox.engine().evaluations(), 0);
    }

    #[test]
    fn shutdown_removes_sessions() {
        let sandbox = Sandbox::new(EngineConfig::default()).expect("sandbox");
        sandbox.create_session().expect("session");
        sandbox.shutdown();
        assert!(sandbox.list_sessions().is_empty());
    }
}
