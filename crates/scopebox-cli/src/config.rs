//! Server configuration with layered loading.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Config file (`--config <path>`, else `.scopebox/config.toml` under the
//!    project root)
//! 3. Environment variables (`SCOPEBOX_*`)
//! 4. CLI flags (applied by the binary)
//!
//! Each layer overrides the previous.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! exec_timeout_secs = 10
//! max_instructions = 10000000
//!
//! [logging]
//! level = "info"
//! exec_log = true
//! exec_log_dir = "/var/log/scopebox"
//! ```

use scopebox_lua::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Project-local config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".scopebox";

/// Config file name inside [`PROJECT_CONFIG_DIR`].
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// Execution log directory inside [`PROJECT_CONFIG_DIR`] when none is set.
pub const DEFAULT_EXEC_LOG_DIR: &str = "logs";

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Invalid environment variable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for stderr output.
    pub level: String,
    /// Append every execution to a JSON-lines log.
    pub exec_log: bool,
    /// Directory for the execution log. Defaults to `.scopebox/logs`
    /// under the project root.
    pub exec_log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            exec_log: false,
            exec_log_dir: None,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeboxConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl ScopeboxConfig {
    /// Parses a TOML document. Missing sections and fields keep defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or mistyped fields.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Where the execution log goes, if enabled.
    #[must_use]
    pub fn exec_log_dir(&self, project_root: &Path) -> Option<PathBuf> {
        if !self.logging.exec_log {
            return None;
        }
        Some(
            self.logging
                .exec_log_dir
                .clone()
                .unwrap_or_else(|| project_root.join(PROJECT_CONFIG_DIR).join(DEFAULT_EXEC_LOG_DIR)),
        )
    }
}

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Helper macro for parsing numeric environment variables.
macro_rules! parse_env_num {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = val
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid_env_var($var, format!("expected number: {e}")))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// ```ignore
/// let config = ConfigLoader::new()
///     .with_project_root("/path/to/project")
///     .skip_env_vars()
///     .load()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Explicit config file; must exist when set.
    config_path: Option<PathBuf>,

    /// Project root; `.scopebox/config.toml` is looked up here.
    project_root: Option<PathBuf>,

    skip_env: bool,

    skip_project: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `path` instead of the project config file.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips project config loading. An explicit config file still loads.
    #[must_use]
    pub fn skip_project_config(mut self) -> Self {
        self.skip_project = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file cannot be read or parsed, or
    /// an environment variable holds a bad value. A missing project config
    /// file is ignored; a missing explicit one is an error.
    pub fn load(&self) -> Result<ScopeboxConfig, ConfigError> {
        let mut config = ScopeboxConfig::default();

        if let Some(path) = &self.config_path {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
            config = ScopeboxConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;
            debug!(path = %path.display(), "Loaded config file");
        } else if !self.skip_project {
            if let Some(root) = &self.project_root {
                let path = root.join(PROJECT_CONFIG_DIR).join(PROJECT_CONFIG_FILE);
                if let Some(project) = load_file(&path)? {
                    debug!(path = %path.display(), "Loaded project config");
                    config = project;
                }
            }
        }

        if !self.skip_env {
            apply_env_vars(&mut config)?;
        }

        Ok(config)
    }
}

/// Loads a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<ScopeboxConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = ScopeboxConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;
    Ok(Some(config))
}

/// Applies `SCOPEBOX_*` overrides.
fn apply_env_vars(config: &mut ScopeboxConfig) -> Result<(), ConfigError> {
    parse_env_num!(config.engine.exec_timeout_secs, "SCOPEBOX_EXEC_TIMEOUT_SECS");
    parse_env_num!(config.engine.http_timeout_secs, "SCOPEBOX_HTTP_TIMEOUT_SECS");
    parse_env_num!(config.engine.max_instructions, "SCOPEBOX_MAX_INSTRUCTIONS");
    parse_env_num!(config.engine.max_output_bytes, "SCOPEBOX_MAX_OUTPUT_BYTES");
    parse_env_num!(config.engine.max_memory_bytes, "SCOPEBOX_MAX_MEMORY_BYTES");

    parse_env_bool!(config.logging.exec_log, "SCOPEBOX_EXEC_LOG");

    if let Ok(val) = std::env::var("SCOPEBOX_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Ok(val) = std::env::var("SCOPEBOX_EXEC_LOG_DIR") {
        config.logging.exec_log_dir = Some(PathBuf::from(val));
    }

    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project_config(root: &Path, content: &str) {
        let dir = root.join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&dir).expect("create config dir");
        std::fs::write(dir.join(PROJECT_CONFIG_FILE), content).expect("write config");
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new()
            .skip_project_config()
            .skip_env_vars()
            .load()
            .expect("defaults load");
        assert_eq!(config, ScopeboxConfig::default());
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp = TempDir::new().expect("temp dir");
        write_project_config(
            temp.path(),
            r#"
[engine]
exec_timeout_secs = 7

[logging]
level = "debug"
"#,
        );

        let config = ConfigLoader::new()
            .with_project_root(temp.path())
            .skip_env_vars()
            .load()
            .expect("project config loads");

        assert_eq!(config.engine.exec_timeout_secs, 7);
        assert_eq!(
            config.engine.http_timeout_secs,
            EngineConfig::default().http_timeout_secs
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_project_config_is_ignored() {
        let temp = TempDir::new().expect("temp dir");
        let config = ConfigLoader::new()
            .with_project_root(temp.path())
            .skip_env_vars()
            .load()
            .expect("load without file");
        assert_eq!(config, ScopeboxConfig::default());
    }

    #[test]
    fn explicit_file_wins_over_project_config() {
        let temp = TempDir::new().expect("temp dir");
        write_project_config(temp.path(), "[engine]\nexec_timeout_secs = 7\n");
        let explicit = temp.path().join("other.toml");
        std::fs::write(&explicit, "[engine]\nexec_timeout_secs = 3\n").expect("write");

        let config = ConfigLoader::new()
            .with_project_root(temp.path())
            .with_config_file(&explicit)
            .skip_env_vars()
            .load()
            .expect("explicit config loads");
        assert_eq!(config.engine.exec_timeout_secs, 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp = TempDir::new().expect("temp dir");
        let err = ConfigLoader::new()
            .with_config_file(temp.path().join("nope.toml"))
            .skip_env_vars()
            .load()
            .expect_err("missing explicit file");
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let temp = TempDir::new().expect("temp dir");
        write_project_config(temp.path(), "[engine\nexec_timeout_secs = ");
        let err = ConfigLoader::new()
            .with_project_root(temp.path())
            .skip_env_vars()
            .load()
            .expect_err("malformed config");
        assert!(matches!(err, ConfigError::ParseToml { .. }));
        assert!(err.to_string().contains(PROJECT_CONFIG_FILE));
    }

    #[test]
    fn exec_log_dir_defaults_under_project() {
        let mut config = ScopeboxConfig::default();
        let root = Path::new("/work/project");
        assert_eq!(config.exec_log_dir(root), None);

        config.logging.exec_log = true;
        assert_eq!(
            config.exec_log_dir(root),
            Some(root.join(".scopebox").join("logs"))
        );

        config.logging.exec_log_dir = Some(PathBuf::from("/var/log/scopebox"));
        assert_eq!(
            config.exec_log_dir(root),
            Some(PathBuf::from("/var/log/scopebox"))
        );
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
