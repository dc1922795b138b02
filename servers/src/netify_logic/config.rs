use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lib_netify::configs::{HandshakePolicy, IngestConfig, OverflowPolicy, RejectedEntry};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "server_netify.json5";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// PostgreSQL through `database.url`.
    #[default]
    Postgres,
    /// Process-local tables capped to the newest rows; nothing survives a restart.
    Memory,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowArg {
    Resync,
    Close,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeArg {
    FirstDeclared,
    LatestDeclared,
}

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Netify flow telemetry ingest server", version)]
pub struct Cli {
    #[clap(long, env = "NETIFY_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, value_enum, env = "NETIFY_STORAGE", help = "Storage backend.")]
    pub storage: Option<StorageKind>,

    #[clap(long, env = "NETIFY_LISTEN_HOST", help = "Address to listen on for agent connections.")]
    pub listen_host: Option<String>,

    #[clap(long, env = "NETIFY_LISTEN_PORT", help = "Port to listen on for agent connections.")]
    pub listen_port: Option<u16>,

    #[clap(long, env = "NETIFY_READ_CHUNK_SIZE", help = "Bytes per socket read.")]
    pub read_chunk_size: Option<usize>,

    #[clap(long, env = "NETIFY_MAX_LINE_BYTES", help = "Longest line buffered per connection.")]
    pub max_line_bytes: Option<usize>,

    #[clap(long, value_enum, env = "NETIFY_OVERFLOW_POLICY", help = "What to do with over-long lines.")]
    pub overflow_policy: Option<OverflowArg>,

    #[clap(long, value_enum, env = "NETIFY_HANDSHAKE_POLICY", help = "How repeated ROUTER_ID lines are treated.")]
    pub handshake_policy: Option<HandshakeArg>,

    #[clap(long, env = "NETIFY_ALLOW_UNKNOWN_DEVICES")]
    pub allow_unknown_devices: Option<bool>,

    #[clap(long, env = "NETIFY_ALLOW_UNKNOWN_ZONES")]
    pub allow_unknown_zones: Option<bool>,

    #[clap(long, env = "NETIFY_AUTO_CREATE_DEVICES")]
    pub auto_create_devices: Option<bool>,

    #[clap(long, env = "NETIFY_AUTO_CREATE_ZONES")]
    pub auto_create_zones: Option<bool>,

    #[clap(long, env = "NETIFY_GENERATE_DYNAMIC_IDENTIFIER")]
    pub generate_dynamic_identifier: Option<bool>,

    #[clap(long, env = "NETIFY_DEFAULT_ZONE_FALLBACK")]
    pub default_zone_fallback: Option<bool>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL.")]
    pub database_url: Option<String>,

    #[clap(long, env = "NETIFY_DB_MAX_CONNECTIONS", help = "Database pool size.")]
    pub db_max_connections: Option<usize>,

    #[clap(long, env = "NETIFY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "NETIFY_LOG_LEVEL", help = "Log filter (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "NETIFY_LOG_JSON", help = "Write the log file as JSON lines.")]
    pub log_json: Option<bool>,

    #[clap(long, env = "NETIFY_REPORT_INTERVAL_SECS", help = "Seconds between counter reports, 0 disables.")]
    pub report_interval_secs: Option<u64>,
}

impl Cli {
    /// Overrides `config` with every value given on the command line or in the
    /// environment.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(v) = &self.listen_host {
            config.listen_host = v.clone();
        }
        if let Some(v) = self.listen_port {
            config.listen_port = v;
        }
        if let Some(v) = self.read_chunk_size {
            config.read_chunk_size = v;
        }
        if let Some(v) = self.max_line_bytes {
            config.max_line_bytes = v;
        }
        if let Some(v) = self.overflow_policy {
            config.overflow_policy = match v {
                OverflowArg::Resync => OverflowPolicy::Resync,
                OverflowArg::Close => OverflowPolicy::Close,
            };
        }
        if let Some(v) = self.handshake_policy {
            config.handshake_policy = match v {
                HandshakeArg::FirstDeclared => HandshakePolicy::FirstDeclared,
                HandshakeArg::LatestDeclared => HandshakePolicy::LatestDeclared,
            };
        }

        let policy = &mut config.policy;
        policy.allow_unknown_devices = self.allow_unknown_devices.unwrap_or(policy.allow_unknown_devices);
        policy.allow_unknown_zones = self.allow_unknown_zones.unwrap_or(policy.allow_unknown_zones);
        policy.auto_create_devices = self.auto_create_devices.unwrap_or(policy.auto_create_devices);
        policy.auto_create_zones = self.auto_create_zones.unwrap_or(policy.auto_create_zones);
        policy.generate_dynamic_identifier = self
            .generate_dynamic_identifier
            .unwrap_or(policy.generate_dynamic_identifier);
        policy.default_zone_fallback = self.default_zone_fallback.unwrap_or(policy.default_zone_fallback);

        if let Some(v) = &self.database_url {
            config.database.url = Some(v.clone());
        }
        if let Some(v) = self.db_max_connections {
            config.database.max_connections = v;
        }
        if let Some(v) = &self.log_dir {
            config.log.dir = Some(v.clone());
        }
        if let Some(v) = &self.log_level {
            config.log.level = v.clone();
        }
        if let Some(v) = self.log_json {
            config.log.json = v;
        }
        if let Some(v) = self.report_interval_secs {
            config.report_interval_secs = v;
        }
    }
}

/// The merged configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: IngestConfig,
    pub storage: StorageKind,
    /// The file that was read, if any.
    pub source: Option<PathBuf>,
    /// Mapping entries dropped during validation, logged once logging is up.
    pub rejected: Vec<RejectedEntry>,
}

/// Defaults → config file → environment/CLI, then validation.
///
/// A missing default config file is fine; a missing file that was asked for
/// explicitly is an error.
pub fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    let (path, explicit) = match &cli.config_path {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let (mut config, source) = if path.exists() {
        let config = IngestConfig::from_file(&path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
        (config, Some(path))
    } else if explicit {
        anyhow::bail!("Config file not found: {}", path.display());
    } else {
        (IngestConfig::default(), None)
    };

    cli.apply(&mut config);
    let rejected = config.validate().context("Invalid configuration")?;

    Ok(LoadedConfig {
        config,
        storage: cli.storage.unwrap_or_default(),
        source,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netify.json5");
        fs::write(
            &path,
            r#"{
                // file values
                listen_port: 9000,
                policy: { auto_create_zones: false },
                router_mapping: { "192.0.2.1": "hq" },
            }"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "server_netify",
            "--config-path",
            path.to_str().unwrap(),
            "--listen-port",
            "9100",
            "--storage",
            "memory",
            "--handshake-policy",
            "latest-declared",
            "--allow-unknown-zones",
            "true",
        ]);
        let loaded = load_config(&cli).unwrap();
        assert_eq!(loaded.storage, StorageKind::Memory);
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.listen_port, 9100);
        assert!(!loaded.config.policy.auto_create_zones);
        assert!(loaded.config.policy.allow_unknown_zones);
        assert_eq!(loaded.config.handshake_policy, HandshakePolicy::LatestDeclared);
        assert_eq!(loaded.config.router_mapping.get("192.0.2.1").map(String::as_str), Some("hq"));
    }

    #[test]
    fn rejected_mapping_entries_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netify.json5");
        fs::write(
            &path,
            r#"{
                router_identifier_mapping: { "192.0.2.300": "typo", "192.0.2.7": "edge-7" },
            }"#,
        )
        .unwrap();

        let cli = Cli {
            config_path: Some(path),
            ..Cli::default()
        };
        let loaded = load_config(&cli).unwrap();
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].table, "router_identifier_mapping");
        assert_eq!(loaded.rejected[0].key, "192.0.2.300");
        assert_eq!(
            loaded.config.router_identifier_mapping.get("192.0.2.7").map(String::as_str),
            Some("edge-7")
        );
        assert!(!loaded.config.router_identifier_mapping.contains_key("192.0.2.300"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let cli = Cli {
            config_path: Some(PathBuf::from("/nonexistent/netify.json5")),
            ..Cli::default()
        };
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn invalid_override_fails_validation() {
        let cli = Cli {
            config_path: None,
            read_chunk_size: Some(0),
            ..Cli::default()
        };
        assert!(load_config(&cli).is_err());
    }
}
