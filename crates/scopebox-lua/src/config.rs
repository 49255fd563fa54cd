//! Engine limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wall-clock limit for one spawned process.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Default wall-clock limit for one HTTP request.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default Lua instruction budget per call.
pub const DEFAULT_MAX_INSTRUCTIONS: u32 = 50_000_000;

/// Limits applied to every execution call.
///
/// Deserialized from the `[engine]` table of the config file; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds before a spawned process is killed.
    pub exec_timeout_secs: u64,
    /// Seconds before an HTTP request is abandoned.
    pub http_timeout_secs: u64,
    /// Lua VM instructions before the call is aborted.
    pub max_instructions: u32,
    /// Bytes of `print` output kept per call.
    pub max_output_bytes: usize,
    /// Bytes of stdout / stderr kept per spawned process.
    pub max_process_output_bytes: usize,
    /// Bytes of response body kept per HTTP request.
    pub max_http_body_bytes: usize,
    /// Lua heap limit per interpreter. `0` disables the limit.
    pub max_memory_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            max_output_bytes: 64 * 1024,
            max_process_output_bytes: 1024 * 1024,
            max_http_body_bytes: 10 * 1024 * 1024,
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs.max(1))
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}
