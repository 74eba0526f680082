//! Crucible Unified Launcher
//!
//! Starts the sandbox server (MCP over stdio) with its background
//! maintenance threads: the connection reaper, the health monitor, and
//! the periodic artifact auto-cleanup. Stdout is reserved for protocol
//! frames; all diagnostics go to the rolling log file and stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crucible_gateway::{spawn_monitor, spawn_reaper};
use crucible_logging::{init_logging, LogConfig};
use crucible_mcp::McpServer;
use crucible_protocol::paths;
use crucible_protocol::{SecurityTier, ServerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Interval between artifact auto-cleanup sweeps.
const AUTO_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(name = "crucible", about = "Multi-tenant code execution sandbox server")]
struct Cli {
    /// Enable verbose logging (full filter to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the sandbox server
    Serve {
        /// Wire transport for the MCP protocol
        #[arg(long, value_enum, default_value = "stdio")]
        transport: Transport,

        /// Bind host (HTTP transport only)
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port (HTTP transport only)
        #[arg(long, default_value = "8765")]
        port: u16,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log level for the file/console filters
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,

        /// Base directory for artifacts and workspaces
        #[arg(long, env = "CRUCIBLE_BASE_DIR")]
        base_dir: Option<PathBuf>,

        /// Default security tier for new workspaces
        #[arg(long)]
        security_tier: Option<String>,

        /// Require API-key authentication for tool calls
        #[arg(long)]
        auth: bool,
    },

    /// Show current configuration and paths
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            transport,
            host,
            port,
            config,
            log_level,
            base_dir,
            security_tier,
            auth,
        } => run_serve(
            cli.verbose,
            transport,
            host,
            port,
            config,
            log_level,
            base_dir,
            security_tier,
            auth,
        ),
        Commands::Config { json } => run_config(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_serve(
    verbose: bool,
    transport: Transport,
    host: String,
    port: u16,
    config_path: Option<PathBuf>,
    log_level: Option<LogLevel>,
    base_dir: Option<PathBuf>,
    security_tier: Option<String>,
    auth: bool,
) -> Result<()> {
    if let Some(level) = log_level {
        // The env filter is read during init; an explicit flag wins over
        // whatever RUST_LOG the parent process exported.
        std::env::set_var("RUST_LOG", level.as_filter());
    }
    init_logging(LogConfig {
        app_name: "crucible-serve",
        verbose,
        server_mode: true,
    })?;

    if transport == Transport::Http {
        anyhow::bail!(
            "HTTP transport is not built into this binary (requested {}:{}); run with --transport stdio behind an HTTP bridge",
            host,
            port
        );
    }

    let mut config = load_config(config_path)?;
    if let Some(dir) = base_dir {
        config.base_dir = Some(dir);
    }
    if let Some(tier) = security_tier {
        config.security_tier = tier
            .parse::<SecurityTier>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if auth {
        config.enable_auth = true;
    }

    let reap_interval = Duration::from_secs(config.reap_interval_secs);
    let monitor_interval = Duration::from_secs(config.monitoring_interval_secs);
    let retention_days = config.retention.retention_days;

    let mut server = McpServer::new(config).context("Failed to initialize server")?;

    // Background maintenance: reaper, health monitor, artifact cleanup.
    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();

    workers.push(spawn_reaper(
        Arc::clone(&server.state().connections),
        reap_interval,
        Arc::clone(&stop),
    ));

    {
        let engine = Arc::clone(&server.state().engine);
        let connections = Arc::clone(&server.state().connections);
        workers.push(spawn_monitor(
            Arc::clone(&server.state().health),
            monitor_interval,
            Arc::clone(&stop),
            move || health_inputs_from(&engine, &connections),
        ));
    }

    {
        let store = Arc::clone(&server.state().store);
        let stop = Arc::clone(&stop);
        workers.push(std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let deadline = std::time::Instant::now() + AUTO_CLEANUP_INTERVAL;
                while std::time::Instant::now() < deadline {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                let report = store.auto_cleanup(retention_days);
                if report.deleted_artifacts > 0 {
                    info!(
                        "auto-cleanup removed {} artifacts ({} bytes)",
                        report.deleted_artifacts, report.freed_bytes
                    );
                }
            }
        }));
    }

    let result = server.run();

    stop.store(true, Ordering::SeqCst);
    for worker in workers {
        if worker.join().is_err() {
            warn!("maintenance thread panicked during shutdown");
        }
    }

    result
}

fn health_inputs_from(
    engine: &crucible_engine::ExecutionEngine,
    connections: &crucible_gateway::ConnectionManager,
) -> crucible_gateway::HealthInputs {
    let stats = engine.statistics();
    let metrics = connections.stats().metrics;
    let recovery = if metrics.total_errors == 0 {
        None
    } else {
        Some(
            (metrics.successful_reconnections as f64 / metrics.total_errors as f64)
                .min(1.0),
        )
    };
    crucible_gateway::HealthInputs {
        error_recovery_rate: recovery,
        operation_success_rate: (stats.executions.total_executions > 0)
            .then(|| stats.success_rate),
        average_operation_ms: None,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ServerConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config file: {}", path.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

fn run_config(json: bool) -> Result<()> {
    let config = ServerConfig::default();
    let home = paths::crucible_home();
    let base_dir = config.resolved_base_dir();

    if json {
        let value = serde_json::json!({
            "home": home.display().to_string(),
            "base_dir": base_dir.display().to_string(),
            "logs_dir": paths::default_logs_dir().display().to_string(),
            "audit_log": paths::default_audit_log_path().display().to_string(),
            "users": paths::default_users_path().display().to_string(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Crucible home:  {}", home.display());
        println!("Base dir:       {}", base_dir.display());
        println!("Logs dir:       {}", paths::default_logs_dir().display());
        println!("Audit log:      {}", paths::default_audit_log_path().display());
        println!("User store:     {}", paths::default_users_path().display());
        println!("Security tier:  {}", config.security_tier);
        println!(
            "Limits:         {} connections, {} per IP",
            config.connections.max_connections, config.connections.max_per_ip
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "crucible",
            "serve",
            "--transport",
            "stdio",
            "--log-level",
            "DEBUG",
            "--security-tier",
            "high",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                transport,
                log_level,
                security_tier,
                ..
            } => {
                assert_eq!(transport, Transport::Stdio);
                assert_eq!(log_level, Some(LogLevel::Debug));
                assert_eq!(security_tier.as_deref(), Some("high"));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["crucible", "serve", "--log-level", "TRACE"]).is_err());
    }

    #[test]
    fn test_load_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = ServerConfig::default();
        config.connections.max_connections = 7;
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = load_config(Some(path)).unwrap();
        assert_eq!(loaded.connections.max_connections, 7);
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let loaded = load_config(None).unwrap();
        assert_eq!(loaded.connections.max_connections, 50);
    }
}
