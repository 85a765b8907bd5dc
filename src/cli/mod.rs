//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the polling server
//! - `config show|path` -- inspect configuration
//! - `status` -- query a running instance for health info
//! - `snapshot` -- print the persisted poll document
//! - `version` -- print build/version info

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Real-time polling server.
#[derive(Parser, Debug)]
#[command(
    name = "pollcast",
    version = env!("CARGO_PKG_VERSION"),
    about = "pollcast: live multi-user polls over WebSocket"
)]
pub struct Cli {
    /// Config file (default: $POLLCAST_CONFIG or <config dir>/pollcast/config.json5).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start(StartArgs),

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Query a running instance for health/status information.
    Status {
        /// Port of the running instance (default: from config or 8000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host of the running instance.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Print the persisted poll document.
    Snapshot {
        /// Data file to read instead of the configured one.
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

/// Flags for `start`; each overrides the file and environment.
#[derive(Args, Debug, Default, Clone)]
pub struct StartArgs {
    /// Address to bind.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Poll data file.
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Keep poll data in memory only.
    #[arg(long)]
    pub ephemeral: bool,

    /// Do not push the current document when a channel opens.
    #[arg(long)]
    pub no_snapshot_on_connect: bool,

    /// Reply to ignored actions with an error frame.
    #[arg(long)]
    pub report_rejections: bool,
}

impl StartArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(data) = &self.data {
            config.store.path = data.clone();
        }
        if self.ephemeral {
            config.store.backend = StoreBackend::Memory;
        }
        if self.no_snapshot_on_connect {
            config.ws.snapshot_on_connect = false;
        }
        if self.report_rejections {
            config.ws.report_rejections = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::broadcast::Broadcaster;
use crate::config::{self, Config, StoreBackend, DEFAULT_PORT};
use crate::polls::Document;
use crate::server;
use crate::service::PollService;
use crate::store::{self, DocumentStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Run the `start` subcommand.
pub async fn handle_start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::open(&config.store);
    let document = store.load()?;
    info!(
        store = %store.describe(),
        subjects = document.subjects.len(),
        snapshot_on_connect = config.ws.snapshot_on_connect,
        "poll data loaded"
    );

    let service = PollService::new(store, Arc::new(Broadcaster::new()))
        .with_snapshot_on_connect(config.ws.snapshot_on_connect);
    server::run(&config, Arc::new(service)).await?;
    Ok(())
}

/// Run the `config show` subcommand.
pub fn handle_config_show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(path: &Path) {
    println!("{}", path.display());
}

/// Run the `snapshot` subcommand.
pub fn handle_snapshot(
    config_path: &Path,
    data: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let data_path = match data {
        Some(path) => path.to_path_buf(),
        None => config::load_config(config_path)?.store.path,
    };

    // Inspection only: a missing or damaged file is reported, never rewritten.
    let document = if data_path.exists() {
        let raw = std::fs::read_to_string(&data_path)?;
        let document: Document = serde_json::from_str(&raw)
            .map_err(|e| format!("{} is not a valid poll document: {}", data_path.display(), e))?;
        document
            .validate()
            .map_err(|e| format!("{} is inconsistent: {}", data_path.display(), e))?;
        document
    } else {
        Document::new()
    };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

/// Run the `status` subcommand -- connect to a running instance's health endpoint.
pub async fn handle_status(
    host: &str,
    port: Option<u16>,
    config_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = resolve_port(port, config_path);
    let url = format!("http://{}:{}/health", host, port);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not connect to pollcast at {}:{}", host, port);
            eprintln!("  Error: {}", e);
            eprintln!();
            eprintln!("Is the server running? Start it with: pollcast start");
            std::process::exit(1);
        }
    };

    if !response.status().is_success() {
        eprintln!(
            "Health endpoint returned HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    print!("{}", format_status(&body, host, port));
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("pollcast {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("POLLCAST_BUILD_DATE"));
    println!("  Git commit: {}", env!("POLLCAST_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render a `/health` body for the terminal.
fn format_status(body: &Value, host: &str, port: u16) -> String {
    let mut out = String::from("pollcast status\n===============\n");
    if let Some(version) = body.get("version").and_then(|v| v.as_str()) {
        out.push_str(&format!("  Version:     {}\n", version));
    }
    if let Some(uptime) = body.get("uptimeSeconds").and_then(|v| v.as_i64()) {
        out.push_str(&format!("  Uptime:      {}\n", format_duration(uptime)));
    }
    out.push_str(&format!("  Address:     {}:{}\n", host, port));
    if let Some(status) = body.get("status").and_then(|v| v.as_str()) {
        out.push_str(&format!("  Status:      {}\n", status));
    }
    if let Some(connections) = body.get("connections").and_then(|v| v.as_u64()) {
        out.push_str(&format!("  Connections: {}\n", connections));
    }
    out
}

/// Resolve the port to use for connecting to a running instance.
/// Tries (in order): explicit flag, config file value, DEFAULT_PORT.
fn resolve_port(explicit: Option<u16>, config_path: &Path) -> u16 {
    if let Some(p) = explicit {
        return p;
    }
    config::load_config(config_path)
        .map(|cfg| cfg.server.port)
        .unwrap_or(DEFAULT_PORT)
}

/// Format seconds into a human-readable duration string.
fn format_duration(seconds: i64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["pollcast"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_start_flags() {
        let cli = Cli::try_parse_from([
            "pollcast",
            "start",
            "--port",
            "9001",
            "--data",
            "/srv/polls.json",
            "--no-snapshot-on-connect",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Start(args)) => {
                assert_eq!(args.port, Some(9001));
                assert_eq!(args.data, Some(PathBuf::from("/srv/polls.json")));
                assert!(args.no_snapshot_on_connect);
                assert!(!args.ephemeral);
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli =
            Cli::try_parse_from(["pollcast", "config", "path", "--config", "/etc/p.json5"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/p.json5")));
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Path))
        ));
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["pollcast", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn test_cli_status_defaults() {
        let cli = Cli::try_parse_from(["pollcast", "status"]).unwrap();
        match cli.command {
            Some(Command::Status { port, ref host }) => {
                assert_eq!(port, None);
                assert_eq!(host, "127.0.0.1");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_snapshot_data() {
        let cli = Cli::try_parse_from(["pollcast", "snapshot", "--data", "x.json"]).unwrap();
        match cli.command {
            Some(Command::Snapshot { data }) => assert_eq!(data, Some(PathBuf::from("x.json"))),
            other => panic!("Expected Snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_start_args_override_config() {
        let mut config = Config::default();
        StartArgs {
            bind: Some("127.0.0.1".to_string()),
            port: Some(9100),
            ephemeral: true,
            report_rejections: true,
            ..StartArgs::default()
        }
        .apply(&mut config);

        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.ws.report_rejections);
        assert!(config.ws.snapshot_on_connect);
    }

    #[test]
    fn test_format_status() {
        let body = serde_json::json!({
            "status": "ok",
            "version": "0.1.0",
            "uptimeSeconds": 65,
            "connections": 3
        });
        let out = format_status(&body, "127.0.0.1", 8000);
        assert!(out.contains("Version:     0.1.0"));
        assert!(out.contains("Uptime:      1m 5s"));
        assert!(out.contains("Connections: 3"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3665), "1h 1m 5s");
        assert_eq!(format_duration(90061), "1d 1h 1m 1s");
    }

    #[test]
    fn test_resolve_port_explicit() {
        assert_eq!(resolve_port(Some(1234), Path::new("/nonexistent/p.json5")), 1234);
    }

    #[test]
    fn test_snapshot_missing_file_is_not_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = dir.path().join("absent.json");
        handle_snapshot(&dir.path().join("cfg.json5"), Some(&data)).unwrap();
        assert!(!data.exists());
    }

    #[test]
    fn test_snapshot_leaves_damaged_file_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("cfg.json5");

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        assert!(handle_snapshot(&config, Some(&corrupt)).is_err());
        assert_eq!(std::fs::read_to_string(&corrupt).unwrap(), "{not json");

        let inconsistent = dir.path().join("inconsistent.json");
        let body = r#"{"subjects": {"colors": {"options": {"red": 3}, "votes": {}}}}"#;
        std::fs::write(&inconsistent, body).unwrap();
        assert!(handle_snapshot(&config, Some(&inconsistent)).is_err());
        assert_eq!(std::fs::read_to_string(&inconsistent).unwrap(), body);
    }

    #[test]
    fn test_snapshot_reads_valid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = dir.path().join("poll.json");
        let body = r#"{"subjects": {"colors": {"options": {"red": 1}, "votes": {"alice": ["red"]}}}}"#;
        std::fs::write(&data, body).unwrap();
        handle_snapshot(&dir.path().join("cfg.json5"), Some(&data)).unwrap();
        assert_eq!(std::fs::read_to_string(&data).unwrap(), body);
    }
}
