//! Service configuration loaded from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// File holding the persisted connection collection.
pub const CONNECTIONS_FILE: &str = "connections.json";

/// Runtime configuration shared by a service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name used in logs and response metadata.
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Directory for persisted state.
    pub data_dir: PathBuf,
    /// Upper bound for tunnel and driver connection setup.
    pub connect_timeout_secs: u64,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration for the named service from environment variables.
    ///
    /// Recognised variables: `SERVER_HOST`, `SERVER_PORT`, `DATA_DIR`,
    /// `CONNECT_TIMEOUT_SECS` and `LOG_FORMAT` (`json` or anything else).
    pub fn load_with_service(service_name: &str) -> Self {
        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            host: env_or("SERVER_HOST", defaults.host),
            port: env_parse("SERVER_PORT").unwrap_or(defaults.port),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            connect_timeout_secs: env_parse("CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            log_json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Config rooted at `data_dir`, everything else default. Used by tests.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn connections_file(&self) -> PathBuf {
        self.data_dir.join(CONNECTIONS_FILE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Load a `.env` file from the working directory.
///
/// Best-effort: a missing or unreadable file is ignored, and variables that
/// are already set in the environment win.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = std::fs::read_to_string(env_path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections_file_lives_in_data_dir() {
        let config = AppConfig::with_data_dir("/tmp/workbench");
        assert_eq!(
            config.connections_file(),
            PathBuf::from("/tmp/workbench/connections.json")
        );
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8081");
    }
}
