//! Daemon configuration (TOML-based).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main daemon configuration.
///
/// Built once at startup (file values merged with CLI overrides) and handed
/// by value into each component constructor; nothing reads ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Sync behaviour configuration
    #[serde(default)]
    pub sync: SyncConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the plugin connects to
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory the projected tree lives in
    #[serde(default = "default_sync_dir")]
    pub dir: PathBuf,
    /// Where the sourcemap document is written
    #[serde(default = "default_sourcemap_path")]
    pub sourcemap_path: PathBuf,
    /// Extension for projected script files
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    /// Debounce window for the file watcher, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delete untracked script files after a full snapshot projection
    #[serde(default = "default_true")]
    pub delete_orphans_on_connect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON format logging
    #[serde(default)]
    pub json: bool,
    /// Append logs to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// --- Defaults ---

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_sync_dir() -> PathBuf {
    PathBuf::from("./sync")
}
fn default_sourcemap_path() -> PathBuf {
    PathBuf::from("./sourcemap.json")
}
fn default_script_extension() -> String {
    "luau".into()
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dir: default_sync_dir(),
            sourcemap_path: default_sourcemap_path(),
            script_extension: default_script_extension(),
            debounce_ms: default_debounce_ms(),
            delete_orphans_on_connect: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `tether.toml` in the working directory, or return defaults.
    pub fn load_or_default() -> Self {
        let config_path = Path::new("tether.toml");
        if config_path.exists() {
            Self::load(config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Debounce window as a [`std::time::Duration`].
    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sync.dir, PathBuf::from("./sync"));
        assert_eq!(config.sync.debounce_ms, 100);
        assert!(config.sync.delete_orphans_on_connect);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&toml).expect("deserialize");
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.sync.script_extension, config.sync.script_extension);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("[server]\nport = 9090\n").expect("deserialize");
        assert_eq!(parsed.server.port, 9090);
        assert_eq!(parsed.server.host, "127.0.0.1");
        assert_eq!(parsed.sync.debounce_ms, 100);
    }

    #[test]
    fn test_bind_address() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
