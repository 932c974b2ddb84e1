pub mod command;
pub mod log;

use crate::config::{InjectorConfig, InjectorKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Errors produced while pressing or releasing a key.
#[derive(Debug)]
pub enum InjectError {
    /// The backend could not be started (e.g. missing program).
    Spawn { key: String, source: std::io::Error },
    /// The backend ran but reported failure.
    Rejected { key: String, detail: String },
    /// The backend panicked mid-call.
    Panicked { key: String, detail: String },
}

impl std::fmt::Display for InjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectError::Spawn { key, source } => {
                write!(f, "failed to launch injector for key {key}: {source}")
            }
            InjectError::Rejected { key, detail } => {
                write!(f, "injector failed for key {key}: {detail}")
            }
            InjectError::Panicked { key, detail } => {
                write!(f, "injector panicked for key {key}: {detail}")
            }
        }
    }
}

impl std::error::Error for InjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InjectError::Spawn { source, .. } => Some(source),
            InjectError::Rejected { .. } | InjectError::Panicked { .. } => None,
        }
    }
}

/// Presses and releases named keys in the controlled application.
#[async_trait]
pub trait KeyInjector: Send + Sync {
    /// Human-readable backend name (e.g., "log", "command").
    fn name(&self) -> &str;

    async fn key_down(&self, key: &str) -> Result<(), InjectError>;

    async fn key_up(&self, key: &str) -> Result<(), InjectError>;
}

/// Build the injector selected in config.
pub fn from_config(config: &InjectorConfig) -> Arc<dyn KeyInjector> {
    match config.kind {
        InjectorKind::Log => Arc::new(log::LogInjector::new()),
        InjectorKind::Command => Arc::new(command::CommandInjector::new(
            config.program.clone(),
            config.down_args.clone(),
            config.up_args.clone(),
        )),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    /// One recorded injector call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Down(String),
        Up(String),
    }

    /// Fake injector that records calls and can be told to fail for a key.
    #[derive(Default)]
    pub struct RecordingInjector {
        events: Mutex<Vec<(Event, Instant)>>,
        fail_down: Mutex<Vec<String>>,
        fail_up: Mutex<Vec<String>>,
        panic_down: Mutex<Vec<String>>,
    }

    impl RecordingInjector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_down_for(&self, key: &str) {
            self.fail_down.lock().unwrap().push(key.to_string());
        }

        pub fn fail_up_for(&self, key: &str) {
            self.fail_up.lock().unwrap().push(key.to_string());
        }

        /// Record the press, then panic instead of returning.
        pub fn panic_down_for(&self, key: &str) {
            self.panic_down.lock().unwrap().push(key.to_string());
        }

        pub fn events(&self) -> Vec<Event> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect()
        }

        pub fn timed_events(&self) -> Vec<(Event, Instant)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KeyInjector for RecordingInjector {
        fn name(&self) -> &str {
            "recording"
        }

        async fn key_down(&self, key: &str) -> Result<(), InjectError> {
            self.events
                .lock()
                .unwrap()
                .push((Event::Down(key.to_string()), Instant::now()));
            let explode = self.panic_down.lock().unwrap().iter().any(|k| k == key);
            if explode {
                panic!("forced down panic for {key}");
            }
            if self.fail_down.lock().unwrap().iter().any(|k| k == key) {
                return Err(InjectError::Rejected {
                    key: key.to_string(),
                    detail: "forced down failure".to_string(),
                });
            }
            Ok(())
        }

        async fn key_up(&self, key: &str) -> Result<(), InjectError> {
            self.events
                .lock()
                .unwrap()
                .push((Event::Up(key.to_string()), Instant::now()));
            if self.fail_up.lock().unwrap().iter().any(|k| k == key) {
                return Err(InjectError::Rejected {
                    key: key.to_string(),
                    detail: "forced up failure".to_string(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_default_is_log() {
        let injector = from_config(&InjectorConfig::default());
        assert_eq!(injector.name(), "log");
    }

    #[test]
    fn test_from_config_command() {
        let config = InjectorConfig {
            kind: InjectorKind::Command,
            program: "xdotool".to_string(),
            ..Default::default()
        };
        let injector = from_config(&config);
        assert_eq!(injector.name(), "command");
    }

    #[test]
    fn test_inject_error_display() {
        let err = InjectError::Rejected {
            key: "W".to_string(),
            detail: "exit status 1".to_string(),
        };
        assert_eq!(err.to_string(), "injector failed for key W: exit status 1");

        let err = InjectError::Panicked {
            key: "A".to_string(),
            detail: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "injector panicked for key A: boom");
    }
}
