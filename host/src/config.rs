//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - BackendConfig: Where the monitoring API lives and how long to wait.
//!     - PollingConfig: Fast/slow cycle periods and history depth.
//!     - ZoneConfig: Zone selected at startup.
//!     - CitizenConfig: Listing size and submission message delays.
//!     - ServerConfig / LoggingConfig: Local dashboard surface and log level.
//!
//! ==============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::citizen::SubmissionDelays;
use crate::domain::Zone;
use crate::scheduler::Cadence;

/// overrides `backend.base_url`
pub const BASE_URL_ENV: &str = "DASHBOARD_API_BASE_URL";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub citizen: CitizenConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub fast_interval_seconds: u64,
    pub slow_interval_seconds: u64,
    pub history_limit: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_interval_seconds: 5,
            slow_interval_seconds: 10,
            history_limit: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ZoneConfig {
    #[serde(default)]
    pub default: Zone,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitizenConfig {
    pub report_limit: u32,
    pub validation_message_delay_ms: u64,
    pub close_delay_ms: u64,
}

impl Default for CitizenConfig {
    fn default() -> Self {
        Self {
            report_limit: 10,
            validation_message_delay_ms: 2000,
            close_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// timer periods must be non-zero
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.polling.fast_interval_seconds > 0,
            "polling.fast_interval_seconds must be at least 1"
        );
        anyhow::ensure!(
            self.polling.slow_interval_seconds > 0,
            "polling.slow_interval_seconds must be at least 1"
        );
        anyhow::ensure!(
            self.backend.request_timeout_seconds > 0,
            "backend.request_timeout_seconds must be at least 1"
        );
        Ok(())
    }

    /// Load with default fallback, then apply environment overrides
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("dashboard.toml"),
            std::path::PathBuf::from("..").join("config").join("dashboard.toml"),
        ];

        let mut config = paths
            .iter()
            .filter(|path| path.exists())
            .find_map(|path| match Self::load(path) {
                Ok(config) => {
                    println!("[CONFIG] Loaded from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    None
                }
            })
            .unwrap_or_else(|| {
                println!("[CONFIG] Warning: No config file found - using defaults");
                Self::default()
            });

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend.base_url = url;
            }
        }
        config
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            fast: Duration::from_secs(self.polling.fast_interval_seconds),
            slow: Duration::from_secs(self.polling.slow_interval_seconds),
            history_limit: self.polling.history_limit,
        }
    }

    pub fn submission_delays(&self) -> SubmissionDelays {
        SubmissionDelays {
            validation_message: Duration::from_millis(self.citizen.validation_message_delay_ms),
            close: Duration::from_millis(self.citizen.close_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_seconds)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│         DASHBOARD CONFIGURATION         │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Backend: {}", self.backend.base_url);
        println!("│ Zone: {}", self.zone.default);
        println!(
            "│ Poll Interval: {}s fast / {}s slow",
            self.polling.fast_interval_seconds, self.polling.slow_interval_seconds
        );
        println!("│ Dashboard: http://{}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = DashboardConfig::parse("").unwrap();
        assert_eq!(config.polling.fast_interval_seconds, 5);
        assert_eq!(config.polling.slow_interval_seconds, 10);
        assert_eq!(config.polling.history_limit, 24);
        assert_eq!(config.zone.default, Zone::Thiruvananthapuram);
        assert_eq!(config.citizen.report_limit, 10);
        assert_eq!(config.cadence().fast, Duration::from_secs(5));
        assert_eq!(config.submission_delays().close, Duration::from_millis(3000));
    }

    #[test]
    fn partial_file_overrides_sections() {
        let config = DashboardConfig::parse(
            r#"
            [backend]
            base_url = "http://monitor.local:8000"

            [zone]
            default = "Ernakulam"

            [citizen]
            report_limit = 25
            validation_message_delay_ms = 500
            close_delay_ms = 900
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "http://monitor.local:8000");
        assert_eq!(config.backend.request_timeout_seconds, 10);
        assert_eq!(config.zone.default, Zone::Ernakulam);
        assert_eq!(config.submission_delays().validation_message, Duration::from_millis(500));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn zero_poll_periods_are_rejected() {
        for body in [
            "[polling]\nfast_interval_seconds = 0\nslow_interval_seconds = 10\nhistory_limit = 24",
            "[polling]\nfast_interval_seconds = 5\nslow_interval_seconds = 0\nhistory_limit = 24",
            "[backend]\nbase_url = \"http://x\"\nrequest_timeout_seconds = 0",
        ] {
            let err = DashboardConfig::parse(body).unwrap_err();
            assert!(format!("{err:#}").contains("must be at least 1"), "{err:#}");
        }
        assert!(DashboardConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_zone_is_rejected() {
        assert!(DashboardConfig::parse("[zone]\ndefault = \"Atlantis\"").is_err());
    }
}
