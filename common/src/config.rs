//! Service configuration.
//!
//! Values come from the process environment. A `.env` file in the working
//! directory is loaded first without overriding variables already set.

use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Runtime configuration for a service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name used in logs and response metadata.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Timeout for opening a connection to a monitored server.
    pub connect_timeout_secs: u64,
    /// Per-collector query timeout, independent for each collector.
    pub collector_timeout_secs: u64,
    /// Path of the persisted monitoring settings document.
    pub settings_path: String,
    /// Issue store URL. `None` keeps issues in memory.
    pub issue_store_url: Option<String>,
    /// Buffered events per broadcast group before slow subscribers lag.
    pub broadcast_capacity: usize,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "monitor-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            connect_timeout_secs: 10,
            collector_timeout_secs: 5,
            settings_path: "monitoring-settings.json".to_string(),
            issue_store_url: None,
            broadcast_capacity: 64,
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        load_dotenv();
        let defaults = Self::default();

        Self {
            service_name: service_name.to_string(),
            host: env_or("SERVER_HOST", defaults.host),
            port: env_or("SERVER_PORT", defaults.port),
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            collector_timeout_secs: env_or(
                "COLLECTOR_TIMEOUT_SECS",
                defaults.collector_timeout_secs,
            )
            .max(1),
            settings_path: env_or("SETTINGS_PATH", defaults.settings_path),
            issue_store_url: std::env::var("ISSUE_STORE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            broadcast_capacity: env_or("BROADCAST_CAPACITY", defaults.broadcast_capacity).max(1),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
        }
    }

    /// Returns the socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring malformed environment variable");
                default
            }
        },
        Err(_) => default,
    }
}

/// Loads `.env` from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set by the environment
        if std::env::var(&key).is_err() {
            std::env::set_var(key, value);
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let v = v.trim().trim_matches('"');
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_skips_comments_and_quotes() {
        let vars = parse_dotenv("# comment\nSERVER_PORT=9000\n\nLOG_FORMAT=\"json\"\nbroken\n");
        assert_eq!(
            vars,
            vec![
                ("SERVER_PORT".to_string(), "9000".to_string()),
                ("LOG_FORMAT".to_string(), "json".to_string()),
            ]
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.collector_timeout_secs, 5);
        assert!(config.issue_store_url.is_none());
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }
}
