//! dbaasd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "/var/lib/dbaas";
pub const DEFAULT_PORTION_SIZE: usize = 20;
pub const DEFAULT_PROBE_PATH: &str = "/health";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_FILTER: &str = "info,dbaasd=debug,dbaas=debug";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub log_filter: Option<String>,
    pub server: Option<ServerConfig>,
    pub migration: Option<MigrationConfig>,
    pub adapter: Option<AdapterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum number of logical databases handed to an adapter per round-trip.
    pub portion_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub probe_path: Option<String>,
    /// Duration string such as "5s", "500ms" or "1m".
    pub probe_timeout: Option<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fill every unset field with its default.
    pub fn resolved(&self) -> Self {
        Self {
            log_filter: Some(self.log_filter()),
            server: Some(ServerConfig {
                port: Some(self.port()),
                data_dir: Some(self.data_dir()),
            }),
            migration: Some(MigrationConfig {
                portion_size: Some(self.portion_size()),
            }),
            adapter: Some(AdapterConfig {
                probe_path: Some(self.probe_path()),
                probe_timeout: Some(format!("{}ms", self.probe_timeout().as_millis())),
            }),
        }
    }

    pub fn log_filter(&self) -> String {
        self.log_filter
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.server
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn portion_size(&self) -> usize {
        self.migration
            .as_ref()
            .and_then(|m| m.portion_size)
            .unwrap_or(DEFAULT_PORTION_SIZE)
            .max(1)
    }

    pub fn probe_path(&self) -> String {
        self.adapter
            .as_ref()
            .and_then(|a| a.probe_path.clone())
            .unwrap_or_else(|| DEFAULT_PROBE_PATH.to_string())
    }

    pub fn probe_timeout(&self) -> Duration {
        self.adapter
            .as_ref()
            .and_then(|a| a.probe_timeout.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT)
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.portion_size(), DEFAULT_PORTION_SIZE);
        assert_eq!(config.probe_path(), "/health");
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parses_all_sections() {
        let toml_str = r#"
log_filter = "debug"

[server]
port = 9090
data_dir = "/tmp/dbaas"

[migration]
portion_size = 5

[adapter]
probe_path = "/api/v2/health"
probe_timeout = "750ms"
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.port(), 9090);
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/dbaas"));
        assert_eq!(config.portion_size(), 5);
        assert_eq!(config.probe_path(), "/api/v2/health");
        assert_eq!(config.probe_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn zero_portion_size_is_clamped() {
        let config: DaemonConfig = toml::from_str("[migration]\nportion_size = 0").unwrap();
        assert_eq!(config.portion_size(), 1);
    }

    #[test]
    fn resolved_config_renders_as_toml() {
        let rendered = DaemonConfig::default().resolved().to_toml_string().unwrap();
        assert!(rendered.contains("portion_size = 20"));
        assert!(rendered.contains("probe_timeout = \"5000ms\""));
    }

    #[test]
    fn duration_strings() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }
}
