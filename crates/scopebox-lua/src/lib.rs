//! Capability-scoped Lua execution for scopebox.
//!
//! Untrusted snippets run in a whitelist-only Lua environment. Files,
//! processes and the network are reachable only inside a `requestX` block
//! that pushes a grant onto the call's scope stack.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Sandbox                                                  │
//! │   execute(code) ───────────┐   execute_in_session(id, …) │
//! │                            ▼              │              │
//! │                      ┌───────────┐  ┌─────▼──────────┐   │
//! │                      │ Validator │  │ SessionManager │   │
//! │                      └─────┬─────┘  │  (lock / VM)   │   │
//! │                            ▼        └─────┬──────────┘   │
//! │                   ┌─────────────────────────────────┐    │
//! │                   │ ExecutionEngine (blocking pool) │    │
//! │                   │  env + print + capability API   │    │
//! │                   └──────────────┬──────────────────┘    │
//! │                                  ▼                       │
//! │                 CallContext: ScopeStack, fault, handles  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use scopebox_lua::{EngineConfig, Sandbox};
//!
//! let sandbox = Sandbox::new(EngineConfig::default())?;
//! let result = sandbox
//!     .execute(r#"requestExecPermission({"ls"}, function(p) return p.exec("ls").stdout end)"#)
//!     .await;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```
//!
//! The validator is a coarse lexical filter that obfuscated code can get
//! past. The capability layer is what enforces access.

mod blocking;
mod capability;
pub mod config;
mod engine;
mod env;
pub mod error;
mod exec;
mod fs_tools;
mod http;
pub mod reference;
mod render;
pub mod result;
pub mod sandbox;
pub mod session;
pub mod validate;

pub use config::EngineConfig;
pub use engine::{ExecutionEngine, Interpreter};
pub use error::{EngineError, ErrorKind, Fault, SessionError};
pub use reference::API_REFERENCE;
pub use result::ExecutionResult;
pub use sandbox::{ExecutionSink, Sandbox};
pub use session::{SessionId, SessionInfo, SessionManager};
pub use validate::{RuleCategory, ValidationOutcome, Validator};
