use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from keyfeed.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KeyfeedConfig {
    pub channel: ChannelConfig,
    pub injector: InjectorConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub command_file: PathBuf,
    pub check_interval_secs: f64,
    pub grace_period_ms: u64,
    pub error_backoff_factor: u32,
    pub max_read_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InjectorKind {
    #[default]
    Log,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    pub kind: InjectorKind,
    pub program: String,
    pub down_args: Vec<String>,
    pub up_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_timeout_secs: f64,
    pub stop_file: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_file: PathBuf::from("frames/commands.txt"),
            check_interval_secs: 0.5,
            grace_period_ms: 100,
            error_backoff_factor: 2,
            max_read_attempts: 3,
        }
    }
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            kind: InjectorKind::Log,
            program: String::new(),
            down_args: vec!["keydown".to_string(), "{key}".to_string()],
            up_args: vec!["keyup".to_string(), "{key}".to_string()],
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 2.0,
            stop_file: None,
        }
    }
}

impl ChannelConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Sleep used after an I/O error or a recovered panic.
    pub fn error_backoff(&self) -> Duration {
        self.check_interval()
            .saturating_mul(self.error_backoff_factor.max(1))
    }
}

impl ShutdownConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_timeout_secs)
    }
}

/// Errors raised while loading or validating config.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config value for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl KeyfeedConfig {
    /// Load config from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::from_toml(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reject values the watcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.channel.check_interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "channel.check_interval_secs",
                reason: format!("must be a positive number of seconds, got {interval}"),
            });
        }
        if self.channel.error_backoff_factor == 0 {
            return Err(ConfigError::Invalid {
                field: "channel.error_backoff_factor",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.channel.max_read_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "channel.max_read_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let timeout = self.shutdown.stop_timeout_secs;
        if !timeout.is_finite() || timeout < 0.0 {
            return Err(ConfigError::Invalid {
                field: "shutdown.stop_timeout_secs",
                reason: format!("must be a non-negative number of seconds, got {timeout}"),
            });
        }
        if self.injector.kind == InjectorKind::Command && self.injector.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "injector.program",
                reason: "required when injector.kind = \"command\"".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KeyfeedConfig::default();
        assert_eq!(
            config.channel.command_file,
            PathBuf::from("frames/commands.txt")
        );
        assert_eq!(config.channel.check_interval(), Duration::from_millis(500));
        assert_eq!(config.channel.grace_period(), Duration::from_millis(100));
        assert_eq!(config.channel.error_backoff(), Duration::from_secs(1));
        assert_eq!(config.shutdown.stop_timeout(), Duration::from_secs(2));
        assert_eq!(config.injector.kind, InjectorKind::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = KeyfeedConfig::from_toml(
            r#"
[channel]
check_interval_secs = 0.25

[injector]
kind = "command"
program = "xdotool"
"#,
        )
        .unwrap();
        assert_eq!(config.channel.check_interval(), Duration::from_millis(250));
        assert_eq!(config.channel.grace_period_ms, 100);
        assert_eq!(config.injector.kind, InjectorKind::Command);
        assert_eq!(config.injector.down_args, vec!["keydown", "{key}"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeyfeedConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.channel.max_read_attempts, 3);
    }

    #[test]
    fn test_load_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyfeed.toml");
        std::fs::write(&path, "[channel\ncheck_interval_secs = ").unwrap();
        let err = KeyfeedConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("keyfeed.toml"));
    }

    #[test]
    fn test_load_stop_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyfeed.toml");
        std::fs::write(&path, "[shutdown]\nstop_file = \"STOP\"\n").unwrap();
        let config = KeyfeedConfig::load(&path).unwrap();
        assert_eq!(config.shutdown.stop_file, Some(PathBuf::from("STOP")));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = KeyfeedConfig::default();
        config.channel.check_interval_secs = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("channel.check_interval_secs"));
    }

    #[test]
    fn test_validate_rejects_nan_timeout() {
        let mut config = KeyfeedConfig::default();
        config.shutdown.stop_timeout_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_command_injector_needs_program() {
        let mut config = KeyfeedConfig::default();
        config.injector.kind = InjectorKind::Command;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("injector.program"));
    }

    #[test]
    fn test_validate_rejects_zero_read_attempts() {
        let mut config = KeyfeedConfig::default();
        config.channel.max_read_attempts = 0;
        assert!(config.validate().is_err());
    }
}
