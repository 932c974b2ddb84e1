/// Start/stop lifecycle for the background command file watcher.
///
/// `Stopped -> Running` on `start`, back to `Stopped` on `stop`. Both are
/// idempotent: repeating either logs a warning and does nothing.
use crate::channel_file::{self, ChannelFileError};
use crate::config::ChannelConfig;
use crate::executor::KeyHoldExecutor;
use crate::watcher::ChannelWatcher;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The watcher task observed cancellation and exited.
    Stopped,
    /// The task did not exit within the stop timeout and was detached.
    TimedOut,
    NotRunning,
}

struct RunningWatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the watcher task and its cancellation token.
pub struct ChannelController {
    config: ChannelConfig,
    stop_timeout: Duration,
    executor: KeyHoldExecutor,
    running: Option<RunningWatcher>,
}

impl ChannelController {
    pub fn new(config: ChannelConfig, stop_timeout: Duration, executor: KeyHoldExecutor) -> Self {
        Self {
            config,
            stop_timeout,
            executor,
            running: None,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Ensure the command file exists, then spawn the watcher loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<StartOutcome, ChannelFileError> {
        if self.running.is_some() {
            tracing::warn!("command watcher is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        channel_file::ensure_exists(&self.config.command_file)?;

        let cancel = CancellationToken::new();
        let watcher = ChannelWatcher::new(&self.config, self.executor.clone());
        let handle = tokio::spawn(watcher.run(cancel.clone()));
        self.running = Some(RunningWatcher { cancel, handle });

        tracing::info!(
            path = %self.config.command_file.display(),
            "command watcher started"
        );
        Ok(StartOutcome::Started)
    }

    /// Cancel the watcher and wait up to the stop timeout for it to exit.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(RunningWatcher { cancel, mut handle }) = self.running.take() else {
            tracing::warn!("command watcher is not running");
            return StopOutcome::NotRunning;
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {
                tracing::info!("command watcher stopped");
                StopOutcome::Stopped
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "command watcher task ended abnormally");
                StopOutcome::Stopped
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.stop_timeout.as_secs_f64(),
                    "command watcher did not exit in time, detaching"
                );
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for ChannelController {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
