/// Command file watcher: polls the channel file's mtime and size, and on a
/// genuine change reads, parses and executes the batch, then truncates.
///
/// Only a strictly newer mtime with a non-empty file counts as a change, so
/// our own truncation is never mistaken for new content. Writes that land
/// while a batch runs are coalesced and picked up on the next poll.
use crate::channel_file::{self, ChannelFileError};
use crate::command::parse_batch;
use crate::config::ChannelConfig;
use crate::executor::{panic_message, BatchReport, KeyHoldExecutor};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// What a single poll observed or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The file does not exist right now.
    Missing,
    /// No newer, non-empty content since the last poll.
    Unchanged,
    /// New content held no valid commands; the file is left untouched.
    NoCommands { rejected: usize },
    /// A batch ran. `cleared` is false when the file was rewritten during
    /// the batch and truncation was deferred to the next poll.
    Processed {
        report: BatchReport,
        rejected: usize,
        cleared: bool,
    },
    /// Cancellation arrived during the grace period, before reading.
    Cancelled,
}

pub struct ChannelWatcher {
    path: PathBuf,
    check_interval: Duration,
    grace_period: Duration,
    error_backoff: Duration,
    max_read_attempts: u32,
    last_seen: Option<SystemTime>,
    executor: KeyHoldExecutor,
}

impl ChannelWatcher {
    pub fn new(config: &ChannelConfig, executor: KeyHoldExecutor) -> Self {
        Self {
            path: config.command_file.clone(),
            check_interval: config.check_interval(),
            grace_period: config.grace_period(),
            error_backoff: config.error_backoff(),
            max_read_attempts: config.max_read_attempts,
            last_seen: None,
            executor,
        }
    }

    /// Check the file once and process it if it changed.
    pub async fn poll_once(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, ChannelFileError> {
        let Some(snap) = channel_file::snapshot(&self.path)? else {
            return Ok(PollOutcome::Missing);
        };
        let newer = self.last_seen.map_or(true, |seen| snap.modified > seen);
        if !newer || snap.len == 0 {
            return Ok(PollOutcome::Unchanged);
        }

        tracing::info!(path = %self.path.display(), bytes = snap.len, "command file changed");
        // Advance before reading, so a version that fails to read is not
        // retried until the file changes again.
        self.last_seen = Some(snap.modified);

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.grace_period) => false,
        };
        if cancelled {
            return Ok(PollOutcome::Cancelled);
        }

        let read = channel_file::read_lines_stable(&self.path, self.max_read_attempts)?;
        // Anchor on the version actually read, so writes during the grace
        // period are not later mistaken for a newer batch.
        self.last_seen = self.last_seen.max(Some(read.snapshot.modified));
        let lines = read.lines;

        let batch = parse_batch(&lines);
        if batch.is_empty() {
            tracing::info!(
                rejected = batch.rejected,
                "no valid commands in command file, leaving it as-is"
            );
            return Ok(PollOutcome::NoCommands {
                rejected: batch.rejected,
            });
        }

        tracing::info!(
            commands = batch.len(),
            rejected = batch.rejected,
            total_secs = batch.total_duration().as_secs_f64(),
            "executing command batch"
        );
        let report = self.executor.execute_batch(&batch.commands, cancel).await;
        let cleared = self.clear_if_unchanged();

        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            interrupted = report.interrupted,
            skipped = report.skipped,
            cleared,
            "command batch finished"
        );
        Ok(PollOutcome::Processed {
            report,
            rejected: batch.rejected,
            cleared,
        })
    }

    /// Truncate unless a writer replaced the file while the batch ran.
    fn clear_if_unchanged(&self) -> bool {
        let rewritten = match (channel_file::snapshot(&self.path), self.last_seen) {
            (Ok(Some(now)), Some(seen)) => now.modified > seen && now.len > 0,
            _ => false,
        };
        if rewritten {
            tracing::info!(
                path = %self.path.display(),
                "command file rewritten during batch, deferring to next poll"
            );
            return false;
        }

        match channel_file::truncate(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "cleared command file");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to clear command file");
                false
            }
        }
    }

    /// Poll until `cancel` fires. I/O errors and panics inside a poll are
    /// logged and followed by a longer pause; the loop itself never exits
    /// on them.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            path = %self.path.display(),
            interval_secs = self.check_interval.as_secs_f64(),
            injector = self.executor.injector_name(),
            "watching command file"
        );

        while !cancel.is_cancelled() {
            let result = AssertUnwindSafe(self.poll_once(&cancel))
                .catch_unwind()
                .await;
            let pause = match result {
                Ok(Ok(PollOutcome::Missing)) => {
                    tracing::trace!(path = %self.path.display(), "command file missing");
                    self.check_interval
                }
                Ok(Ok(PollOutcome::Unchanged)) => {
                    tracing::trace!("no change");
                    self.check_interval
                }
                Ok(Ok(PollOutcome::Cancelled)) => break,
                Ok(Ok(PollOutcome::NoCommands { rejected })) => {
                    tracing::debug!(rejected, "poll found no commands");
                    self.check_interval
                }
                Ok(Ok(PollOutcome::Processed {
                    report,
                    rejected,
                    cleared,
                })) => {
                    tracing::debug!(?report, rejected, cleared, "poll complete");
                    self.check_interval
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        error = %e,
                        backoff_secs = self.error_backoff.as_secs_f64(),
                        "command file I/O error, backing off"
                    );
                    self.error_backoff
                }
                Err(panic) => {
                    tracing::error!(
                        panic = panic_message(&*panic),
                        backoff_secs = self.error_backoff.as_secs_f64(),
                        "watcher iteration panicked, continuing"
                    );
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(path = %self.path.display(), "command file watcher exiting");
    }
}
