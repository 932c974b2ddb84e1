/// Timed key holds: down, wait, up, one command at a time.
use crate::command::Command;
use crate::injectors::{InjectError, KeyInjector};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a single hold.
#[derive(Debug)]
pub enum HoldOutcome {
    /// Key was held for the full duration and released.
    Completed,
    /// Cancellation arrived mid-hold; the key was released early.
    Interrupted,
    /// The injector failed on down or up.
    Failed(InjectError),
}

/// Per-batch tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: usize,
    pub interrupted: usize,
    /// Commands not started because the batch was cancelled.
    pub skipped: usize,
}

/// Runs commands against a key injector.
#[derive(Clone)]
pub struct KeyHoldExecutor {
    injector: Arc<dyn KeyInjector>,
}

impl KeyHoldExecutor {
    pub fn new(injector: Arc<dyn KeyInjector>) -> Self {
        Self { injector }
    }

    pub fn injector_name(&self) -> &str {
        self.injector.name()
    }

    /// Hold one key for its duration.
    ///
    /// `key_up` is always attempted once `key_down` has been tried, even when
    /// the down failed or panicked, so a half-applied press never leaves the
    /// key latched. The wait ends early if `cancel` fires.
    pub async fn execute(&self, cmd: &Command, cancel: &CancellationToken) -> HoldOutcome {
        let key = cmd.key();
        tracing::info!(key, duration_secs = cmd.duration_secs(), "pressing key");

        if let Err(e) = guarded(key, self.injector.key_down(key)).await {
            tracing::error!(key, error = %e, "key down failed, releasing");
            if let Err(up_err) = guarded(key, self.injector.key_up(key)).await {
                tracing::warn!(key, error = %up_err, "release after failed press also failed");
            }
            return HoldOutcome::Failed(e);
        }

        let interrupted = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(cmd.duration()) => false,
        };

        if let Err(e) = guarded(key, self.injector.key_up(key)).await {
            tracing::error!(key, error = %e, "key up failed");
            return HoldOutcome::Failed(e);
        }

        if interrupted {
            tracing::warn!(key, "hold interrupted by shutdown, key released early");
            HoldOutcome::Interrupted
        } else {
            tracing::info!(key, duration_secs = cmd.duration_secs(), "released key");
            HoldOutcome::Completed
        }
    }

    /// Run commands in order. A failed command does not stop the batch;
    /// cancellation does, and the remainder is counted as skipped.
    pub async fn execute_batch(&self, commands: &[Command], cancel: &CancellationToken) -> BatchReport {
        let mut report = BatchReport::default();
        for (idx, cmd) in commands.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = commands.len() - idx;
                break;
            }
            match self.execute(cmd, cancel).await {
                HoldOutcome::Completed => report.completed += 1,
                HoldOutcome::Failed(e) => {
                    report.failed += 1;
                    tracing::warn!(key = cmd.key(), error = %e, "command failed, continuing batch");
                }
                HoldOutcome::Interrupted => {
                    report.interrupted += 1;
                    report.skipped = commands.len() - idx - 1;
                    break;
                }
            }
        }
        if report.skipped > 0 {
            tracing::warn!(skipped = report.skipped, "batch cancelled before completion");
        }
        report
    }
}

/// Run one injector call, turning a panic into `InjectError::Panicked`.
async fn guarded<F>(key: &str, call: F) -> Result<(), InjectError>
where
    F: Future<Output = Result<(), InjectError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(InjectError::Panicked {
            key: key.to_string(),
            detail: panic_message(&*panic).to_string(),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
