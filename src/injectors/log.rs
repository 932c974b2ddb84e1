use super::{InjectError, KeyInjector};
use async_trait::async_trait;

/// Injector that only logs key transitions.
///
/// Used when no real input backend is configured, so the channel can be
/// exercised end to end without touching the desktop.
pub struct LogInjector;

impl LogInjector {
    pub fn new() -> Self {
        LogInjector
    }
}

impl Default for LogInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyInjector for LogInjector {
    fn name(&self) -> &str {
        "log"
    }

    async fn key_down(&self, key: &str) -> Result<(), InjectError> {
        tracing::info!(key, "key down");
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<(), InjectError> {
        tracing::info!(key, "key up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_injector_name() {
        assert_eq!(LogInjector::new().name(), "log");
    }

    #[tokio::test]
    async fn test_log_injector_never_fails() {
        let injector = LogInjector::new();
        assert!(injector.key_down("W").await.is_ok());
        assert!(injector.key_up("W").await.is_ok());
    }
}
