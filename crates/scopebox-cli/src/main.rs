//! scopebox - capability-scoped Lua sandbox server
//!
//! Serves MCP on stdin/stdout. Logs go to stderr.
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`SCOPEBOX_*`)
//! 3. Config file (`--config`, else `.scopebox/config.toml` in the project)
//! 4. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `SCOPEBOX_EXEC_TIMEOUT_SECS`, `SCOPEBOX_HTTP_TIMEOUT_SECS`
//! - `SCOPEBOX_MAX_INSTRUCTIONS`, `SCOPEBOX_MAX_OUTPUT_BYTES`, `SCOPEBOX_MAX_MEMORY_BYTES`
//! - `SCOPEBOX_LOG_LEVEL`: stderr filter directive
//! - `SCOPEBOX_EXEC_LOG` (`true`/`false`), `SCOPEBOX_EXEC_LOG_DIR`

use anyhow::Result;
use clap::Parser;
use scopebox_cli::{ConfigLoader, ExecutionLog, ScopeboxConfig, Server};
use scopebox_lua::Sandbox;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// scopebox - capability-scoped Lua sandbox server
#[derive(Parser, Debug)]
#[command(name = "scopebox")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable info logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root directory (defaults to current directory)
    #[arg(short = 'C', long)]
    project: Option<PathBuf>,

    /// Config file (replaces .scopebox/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stderr log filter (also: SCOPEBOX_LOG_LEVEL)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Record every execution to a JSON-lines log
    #[arg(long)]
    exec_log: bool,

    /// Execution log directory; implies --exec-log
    #[arg(long, value_name = "DIR")]
    exec_log_dir: Option<PathBuf>,

    /// Seconds before a spawned process is killed
    #[arg(long, value_name = "SECS")]
    exec_timeout: Option<u64>,

    /// Seconds before an HTTP request is abandoned
    #[arg(long, value_name = "SECS")]
    http_timeout: Option<u64>,

    /// Lua instructions per call
    #[arg(long, value_name = "N")]
    max_instructions: Option<u32>,
}

impl Args {
    fn project_root(&self) -> PathBuf {
        self.project.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to get current directory, using '.'");
                PathBuf::from(".")
            })
        })
    }

    /// Applies CLI flags as the highest-priority layer.
    fn apply_overrides(&self, config: &mut ScopeboxConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.exec_log {
            config.logging.exec_log = true;
        }
        if let Some(dir) = &self.exec_log_dir {
            config.logging.exec_log = true;
            config.logging.exec_log_dir = Some(dir.clone());
        }
        if let Some(secs) = self.exec_timeout {
            config.engine.exec_timeout_secs = secs;
        }
        if let Some(secs) = self.http_timeout {
            config.engine.http_timeout_secs = secs;
        }
        if let Some(n) = self.max_instructions {
            config.engine.max_instructions = n;
        }
    }

    fn filter(&self, level: &str) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug,hyper=warn,h2=warn,reqwest=warn,rustls=warn,tokio=warn")
        } else if self.verbose {
            EnvFilter::new("info")
        } else if self.log_level.is_some() {
            EnvFilter::new(level)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project_root = args.project_root();

    let mut loader = ConfigLoader::new().with_project_root(&project_root);
    if let Some(path) = &args.config {
        loader = loader.with_config_file(path);
    }
    let mut config = loader.load()?;
    args.apply_overrides(&mut config);

    // stdout carries the protocol
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(args.filter(&config.logging.level));
    tracing_subscriber::registry().with(stderr_layer).init();

    let mut sandbox = Sandbox::new(config.engine.clone())?;
    if let Some(dir) = config.exec_log_dir(&project_root) {
        match ExecutionLog::open(&dir) {
            Ok(log) => {
                info!(path = %log.path().display(), "Execution log enabled");
                sandbox = sandbox.with_sink(Arc::new(log));
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "Execution log disabled"),
        }
    }
    let sandbox = Arc::new(sandbox);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = %project_root.display(),
        "scopebox ready"
    );

    let server = Server::new(Arc::clone(&sandbox));
    let served = tokio::select! {
        r = server.run_stdio() => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    let closed = sandbox.shutdown();
    info!(sessions = closed, "scopebox stopped");
    served?;
    Ok(())
}
