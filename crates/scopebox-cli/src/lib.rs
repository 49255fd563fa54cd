//! Command-line front end for the scopebox sandbox.
//!
//! - [`config`]: layered `ScopeboxConfig` loading
//! - [`protocol`]: MCP server over stdin/stdout
//! - [`exec_log`]: JSON-lines record of every execution

pub mod config;
pub mod exec_log;
pub mod protocol;

pub use config::{ConfigError, ConfigLoader, LoggingConfig, ScopeboxConfig};
pub use exec_log::{ExecutionLog, LogEntry};
pub use protocol::{ProtocolError, Server};
