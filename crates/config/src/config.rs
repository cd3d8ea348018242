//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the API listens on
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// External encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Program used to encode (name resolved via PATH, or a full path)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Directory for temporary manifest files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Interval between supervisor polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_temp_dir() -> PathBuf {
    env::temp_dir()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            temp_dir: default_temp_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Resource ceilings reported before any job has been submitted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// CPU ceiling in percent (1-100, default 100)
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: u32,
    /// Memory ceiling in megabytes (64-8192, default 1024)
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
}

fn default_cpu_percent() -> u32 {
    100
}

fn default_memory_mb() -> u32 {
    1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_percent(),
            memory_mb: default_memory_mb(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - TIMELAPSE_BIND -> server.bind
    /// - TIMELAPSE_FFMPEG_PATH -> encoder.ffmpeg_path
    /// - TIMELAPSE_TEMP_DIR -> encoder.temp_dir
    /// - TIMELAPSE_POLL_INTERVAL_MS -> encoder.poll_interval_ms
    /// - TIMELAPSE_CPU_PERCENT -> limits.cpu_percent
    /// - TIMELAPSE_MEMORY_MB -> limits.memory_mb
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("TIMELAPSE_BIND") {
            if let Ok(addr) = val.parse::<SocketAddr>() {
                self.server.bind = addr;
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_FFMPEG_PATH") {
            if !val.trim().is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_TEMP_DIR") {
            if !val.trim().is_empty() {
                self.encoder.temp_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.encoder.poll_interval_ms = ms;
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_CPU_PERCENT") {
            if let Ok(cpu) = val.parse::<u32>() {
                self.limits.cpu_percent = cpu;
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_MEMORY_MB") {
            if let Ok(mem) = val.parse::<u32>() {
                self.limits.memory_mb = mem;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but falls back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("TIMELAPSE_BIND");
        env::remove_var("TIMELAPSE_FFMPEG_PATH");
        env::remove_var("TIMELAPSE_TEMP_DIR");
        env::remove_var("TIMELAPSE_POLL_INTERVAL_MS");
        env::remove_var("TIMELAPSE_CPU_PERCENT");
        env::remove_var("TIMELAPSE_MEMORY_MB");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            port in 1u16..65535,
            poll_ms in 1u64..10_000,
            cpu in 1u32..=100,
            mem in 64u32..=8192,
            ffmpeg in "[a-z/]{1,20}",
        ) {
            let toml_str = format!(
                r#"
[server]
bind = "0.0.0.0:{}"

[encoder]
ffmpeg_path = "{}"
temp_dir = "/var/tmp/timelapse"
poll_interval_ms = {}

[limits]
cpu_percent = {}
memory_mb = {}
"#,
                port, ffmpeg, poll_ms, cpu, mem
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.server.bind.port(), port);
            prop_assert_eq!(config.encoder.ffmpeg_path, PathBuf::from(&ffmpeg));
            prop_assert_eq!(config.encoder.temp_dir, PathBuf::from("/var/tmp/timelapse"));
            prop_assert_eq!(config.encoder.poll_interval_ms, poll_ms);
            prop_assert_eq!(config.limits.cpu_percent, cpu);
            prop_assert_eq!(config.limits.memory_mb, mem);
        }

        #[test]
        fn prop_env_overrides_limits(
            initial_cpu in 1u32..=100,
            override_cpu in 1u32..=100,
            override_mem in 64u32..=8192,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[limits]
cpu_percent = {}
"#,
                initial_cpu
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("TIMELAPSE_CPU_PERCENT", override_cpu.to_string());
            env::set_var("TIMELAPSE_MEMORY_MB", override_mem.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.limits.cpu_percent, override_cpu);
            prop_assert_eq!(config.limits.memory_mb, override_mem);
        }

        #[test]
        fn prop_env_overrides_poll_interval(
            initial_ms in 1u64..5000,
            override_ms in 1u64..5000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[encoder]
poll_interval_ms = {}
"#,
                initial_ms
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("TIMELAPSE_POLL_INTERVAL_MS", override_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.poll_interval_ms, override_ms);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.server.bind, SocketAddr::from(([127, 0, 0, 1], 8000)));
        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.temp_dir, env::temp_dir());
        assert_eq!(config.encoder.poll_interval_ms, 1000);
        assert_eq!(config.limits.cpu_percent, 100);
        assert_eq!(config.limits.memory_mb, 1024);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[encoder]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.encoder.poll_interval_ms, 1000); // default
        assert_eq!(config.limits, LimitsConfig::default());
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("TIMELAPSE_BIND", "not-an-address");
        env::set_var("TIMELAPSE_CPU_PERCENT", "lots");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/timelapse/config.toml")
            .expect("missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::parse_toml("[limits\ncpu_percent = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
