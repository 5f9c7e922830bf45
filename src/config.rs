//! Configuration — TOML file, CLI flags, and environment overrides.
//!
//! Precedence (lowest to highest): built-in defaults, config file, CLI
//! flags, environment variables. Provider API keys additionally fall back
//! to a per-user secrets file, `~/.gatewayd/config.env`, in the same
//! `KEY=value` shape this codebase has always used for local secrets.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::error::GatewayError;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    bind: Option<String>,
    port: Option<u16>,
    tls_cert_path: Option<String>,
    tls_key_path: Option<String>,
    bearer_token: Option<String>,
    default_provider: Option<String>,
    session_db_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub bearer_token: Option<String>,
    pub default_provider: String,
    pub session_db_path: PathBuf,
    pub daemon: bool,
    pub verbose: bool,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Config {
    pub const DEFAULT_BIND: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 18789;

    pub fn load(cli: &Cli) -> Result<Self, GatewayError> {
        let file_cfg = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let secrets = load_secrets_file();

        let bind = cli
            .bind
            .clone()
            .or(file_cfg.bind)
            .unwrap_or_else(|| Self::DEFAULT_BIND.to_string());
        let port = cli.port.or(file_cfg.port).unwrap_or(Self::DEFAULT_PORT);

        let bearer_token = std::env::var("GATEWAYD_BEARER_TOKEN")
            .ok()
            .or(file_cfg.bearer_token)
            .filter(|s| !s.is_empty());

        let default_provider = file_cfg
            .default_provider
            .unwrap_or_else(|| "anthropic".to_string());

        let session_db_path = file_cfg
            .session_db_path
            .map(PathBuf::from)
            .unwrap_or_else(default_session_db_path);

        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .or_else(|| secrets.get("ANTHROPIC_API_KEY").cloned());
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .or_else(|| secrets.get("OPENAI_API_KEY").cloned());

        Ok(Self {
            bind,
            port,
            tls_cert_path: file_cfg.tls_cert_path.map(PathBuf::from),
            tls_key_path: file_cfg.tls_key_path.map(PathBuf::from),
            bearer_token,
            default_provider,
            session_db_path,
            daemon: cli.daemon,
            verbose: cli.verbose,
            anthropic_api_key,
            openai_api_key,
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig, GatewayError> {
    let text = fs::read_to_string(path).map_err(|e| {
        GatewayError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;
    toml::from_str(&text).map_err(|e| {
        GatewayError::Config(format!("invalid config file {}: {e}", path.display()))
    })
}

fn default_session_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gatewayd")
        .join("sessions.db")
}

fn load_secrets_file() -> HashMap<String, String> {
    let mut secrets = HashMap::new();
    let Some(home) = dirs::home_dir() else {
        return secrets;
    };
    let path = home.join(".gatewayd").join("config.env");
    let Ok(content) = fs::read_to_string(&path) else {
        return secrets;
    };
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            secrets.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        assert_eq!(Config::DEFAULT_BIND, "127.0.0.1");
        assert_eq!(Config::DEFAULT_PORT, 18789);
    }
}
