use clap::Parser;
use std::path::PathBuf;

use crate::config::AgentRole;
use crate::coordinator::{CoordinationMode, WorkerConfig};

/// Maestro - delegating task coordinator for worker agents
#[derive(Parser, Debug, Clone)]
#[command(name = "maestro", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "MAESTRO_CONFIG", default_value = "maestro.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "MAESTRO_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "MAESTRO_PORT")]
    pub port: Option<u16>,

    /// Which executor this process serves
    #[arg(long, env = "MAESTRO_ROLE", value_enum)]
    pub role: Option<AgentRole>,

    /// Coordination mode (coordinator role)
    #[arg(long, env = "MAESTRO_MODE", value_enum)]
    pub mode: Option<CoordinationMode>,

    /// Worker as NAME=URL; repeat for several workers
    #[arg(long = "worker", value_parser = parse_worker)]
    pub workers: Vec<WorkerConfig>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "MAESTRO_LOG", default_value = "info")]
    pub log_level: String,
}

fn parse_worker(value: &str) -> Result<WorkerConfig, String> {
    let (name, url) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=URL, got '{}'", value))?;
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty() || url.is_empty() {
        return Err(format!("expected NAME=URL, got '{}'", value));
    }
    Ok(WorkerConfig {
        name: name.to_string(),
        url: url.to_string(),
        description: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["maestro"]);
        assert_eq!(cli.config, PathBuf::from("maestro.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.role.is_none());
        assert!(cli.mode.is_none());
        assert!(cli.workers.is_empty());
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "maestro",
            "--config",
            "custom.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--role",
            "tools",
            "--mode",
            "parallel",
            "--worker",
            "writer=http://localhost:9001",
            "--worker",
            "critic = local://simple",
        ]);

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.host, Some("0.0.0.0".to_string()));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.role, Some(AgentRole::Tools));
        assert_eq!(cli.mode, Some(CoordinationMode::Parallel));
        assert_eq!(cli.workers.len(), 2);
        assert_eq!(cli.workers[1].name, "critic");
        assert_eq!(cli.workers[1].url, "local://simple");
    }

    #[test]
    fn test_cli_rejects_bad_worker() {
        assert!(Cli::try_parse_from(["maestro", "--worker", "no-equals-sign"]).is_err());
        assert!(Cli::try_parse_from(["maestro", "--worker", "=http://x"]).is_err());
    }
}
