use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use green_common::retrieve::{ClientOptions, DownstreamConfig};
use green_common::server::ContractAddresses;

const DEFAULT_CONFIG_FILE: &str = "server_green.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Green Track live waste-log server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "GREEN_PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "GREEN_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "GREEN_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GREEN_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "AI_BASE", help = "Base URL of the AI inference service.")]
    pub ai_base: Option<String>,

    #[clap(long, env = "GIS_BASE", help = "Base URL of the remote GIS/broadcast service.")]
    pub gis_base: Option<String>,

    #[clap(long, env = "BLOCKCHAIN_BASE", help = "Base URL of the blockchain anchoring service.")]
    pub blockchain_base: Option<String>,

    #[clap(long, env = "BLOCKCHAIN_TOKEN", help = "Bearer token for the anchoring service.")]
    pub blockchain_token: Option<String>,

    #[clap(long, env = "MILESTONE_PAYMENTS_ADDRESS", help = "Milestone payments contract address.")]
    pub milestone_payments_address: Option<String>,

    #[clap(long, env = "INCIDENT_WASTE_LOG_ADDRESS", help = "Incident and waste log contract address.")]
    pub incident_waste_log_address: Option<String>,

    #[clap(long, env = "GREEN_DOWNSTREAM_TIMEOUT_MS", help = "Per-request timeout for downstream services, in milliseconds.")]
    pub downstream_timeout_ms: Option<u64>,

    #[clap(long, env = "GREEN_DOWNSTREAM_RETRIES", help = "Retries for transient downstream failures.")]
    pub downstream_retries: Option<u32>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ai_base: other.ai_base.or(self.ai_base),
            gis_base: other.gis_base.or(self.gis_base),
            blockchain_base: other.blockchain_base.or(self.blockchain_base),
            blockchain_token: other.blockchain_token.or(self.blockchain_token),
            milestone_payments_address: other
                .milestone_payments_address
                .or(self.milestone_payments_address),
            incident_waste_log_address: other
                .incident_waste_log_address
                .or(self.incident_waste_log_address),
            downstream_timeout_ms: other.downstream_timeout_ms.or(self.downstream_timeout_ms),
            downstream_retries: other.downstream_retries.or(self.downstream_retries),
        }
    }

    fn defaults() -> Config {
        let contracts = ContractAddresses::default();
        let options = ClientOptions::default();
        Config {
            port: Some(4003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            milestone_payments_address: Some(contracts.milestone_payments),
            incident_waste_log_address: Some(contracts.incident_waste_log),
            downstream_timeout_ms: Some(options.timeout.as_millis() as u64),
            downstream_retries: Some(options.max_retries),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(4003)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Downstream wiring. Unset URLs leave the collaborator disabled.
    pub fn downstream(&self) -> DownstreamConfig {
        let defaults = ClientOptions::default();
        DownstreamConfig {
            ai_base: self.ai_base.clone(),
            gis_base: self.gis_base.clone(),
            blockchain_base: self.blockchain_base.clone(),
            blockchain_token: self.blockchain_token.clone(),
            options: ClientOptions {
                timeout: self
                    .downstream_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.timeout),
                max_retries: self.downstream_retries.unwrap_or(defaults.max_retries),
            },
        }
    }

    pub fn contracts(&self) -> ContractAddresses {
        let defaults = ContractAddresses::default();
        ContractAddresses {
            milestone_payments: self
                .milestone_payments_address
                .clone()
                .unwrap_or(defaults.milestone_payments),
            incident_waste_log: self
                .incident_waste_log_address
                .clone()
                .unwrap_or(defaults.incident_waste_log),
        }
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from(std::env::args_os())
}

/// Defaults < JSON config file < environment variables and CLI flags.
///
/// A missing config file is fine; one that exists but cannot be read or
/// parsed is an error.
pub fn load_config_from<I, T>(args: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Config::try_parse_from(args)?;

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let config = load_config_from(["server_green", "--config-path", missing.to_str().unwrap()]).unwrap();

        assert_eq!(config.port, Some(4003));
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_dir(), PathBuf::from("./logs"));
        assert_eq!(config.contracts(), ContractAddresses::default());
        assert_eq!(config.downstream().options.timeout, Duration::from_millis(5000));
        assert_eq!(config.downstream().options.max_retries, 2);
    }

    #[test]
    fn cli_beats_file_beats_defaults() {
        let file = write_conf(r#"{"port": 4100, "logLevel": "debug", "aiBase": "http://ai.local:5000"}"#);
        let path = file.path().to_str().unwrap();
        let config = load_config_from(["server_green", "--config-path", path, "--port", "5000"]).unwrap();

        assert_eq!(config.port(), 5000);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.downstream().ai_base.as_deref(), Some("http://ai.local:5000"));
        assert_eq!(config.log_dir(), PathBuf::from("./logs"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_conf("{ not json");
        let path = file.path().to_str().unwrap();
        let err = load_config_from(["server_green", "--config-path", path]).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn contract_overrides() {
        let file = write_conf(r#"{"incidentWasteLogAddress": "0xabc"}"#);
        let path = file.path().to_str().unwrap();
        let config = load_config_from(["server_green", "--config-path", path]).unwrap();

        let contracts = config.contracts();
        assert_eq!(contracts.incident_waste_log, "0xabc");
        assert_eq!(
            contracts.milestone_payments,
            ContractAddresses::default().milestone_payments
        );
    }
}
