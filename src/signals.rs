/// Signal handling for graceful shutdown.
///
/// Handles SIGINT (Ctrl-C), SIGTERM, and STOP file detection. Whichever
/// arrives first ends the wait; the caller then stops the watcher.
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How often the stop file is checked for.
const STOP_FILE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    StopFile(PathBuf),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt"),
            ShutdownReason::Terminate => write!(f, "terminate"),
            ShutdownReason::StopFile(path) => write!(f, "stop file {}", path.display()),
        }
    }
}

/// Wait until a shutdown is requested.
pub async fn wait_for_shutdown(stop_file: Option<&Path>) -> ShutdownReason {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => ShutdownReason::Interrupt,
        _ = terminate() => ShutdownReason::Terminate,
        path = wait_for_stop_file(stop_file, STOP_FILE_POLL) => ShutdownReason::StopFile(path),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Resolve once `path` exists, removing it so the next run starts clean.
/// Never resolves when no stop file is configured.
async fn wait_for_stop_file(path: Option<&Path>, poll: Duration) -> PathBuf {
    let Some(path) = path else {
        return std::future::pending().await;
    };
    loop {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove stop file");
            }
            return path.to_path_buf();
        }
        tokio::time::sleep(poll).await;
    }
}

/// Remove a stop file left over from a previous run. Returns `true` if one
/// was removed.
pub fn clear_stale_stop_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    tracing::warn!(path = %path.display(), "removing stale stop file");
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to remove stale stop file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_file_triggers_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("STOP");

        let creator = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::write(&creator, "").unwrap();
        });

        let reason = tokio::time::timeout(
            Duration::from_secs(2),
            wait_for_stop_file(Some(&stop), Duration::from_millis(10)),
        )
        .await
        .expect("stop file not detected");
        assert_eq!(reason, stop);
        assert!(!stop.exists());
    }

    #[tokio::test]
    async fn test_no_stop_file_never_resolves() {
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            wait_for_stop_file(None, Duration::from_millis(10)),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_via_stop_file() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("STOP");
        std::fs::write(&stop, "").unwrap();
        let reason = tokio::time::timeout(Duration::from_secs(2), wait_for_shutdown(Some(&stop)))
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::StopFile(stop));
    }

    #[test]
    fn test_clear_stale_stop_file() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("STOP");
        std::fs::write(&stop, "").unwrap();
        assert!(clear_stale_stop_file(&stop));
        assert!(!stop.exists());
        // Missing file is fine.
        assert!(!clear_stale_stop_file(&stop));
    }

    #[test]
    fn test_clear_stale_stop_file_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be removed as a file.
        let stop = dir.path().join("STOP");
        std::fs::create_dir(&stop).unwrap();
        assert!(!clear_stale_stop_file(&stop));
        assert!(stop.exists());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(ShutdownReason::Interrupt.to_string(), "interrupt");
        assert_eq!(
            ShutdownReason::StopFile(PathBuf::from("STOP")).to_string(),
            "stop file STOP"
        );
    }
}
