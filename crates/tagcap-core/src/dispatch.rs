//! Concurrent dispatch of refinement tasks over a bounded worker pool.
//!
//! Tasks are submitted with a stagger delay so the aggregate request rate
//! stays under what the credential pool can sustain. Per-image failures are
//! isolated; only pool exhaustion aborts the whole run.

use crate::config::SkipPolicy;
use crate::error::CaptionError;
use crate::refine::{RefineOutcome, RefinementController};
use crate::types::{artifacts, CancelFlag, RunStats};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Worker pool size
    pub max_workers: usize,

    /// Delay between two task submissions
    pub stagger: Duration,

    /// Policy for images whose caption artifact already exists
    pub policy: SkipPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 8,
            stagger: Duration::from_millis(0),
            policy: SkipPolicy::Default,
        }
    }
}

/// Result of one dispatched image task, delivered to the progress callback.
#[derive(Debug)]
pub struct TaskResult {
    pub path: PathBuf,
    pub outcome: Result<RefineOutcome, CaptionError>,
}

/// What a task result contributes to the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Accepted,
    Exhausted,
    Skipped,
    Failed,
}

fn tally(outcome: &Result<RefineOutcome, CaptionError>) -> Tally {
    match outcome {
        Ok(RefineOutcome::Accepted { .. }) => Tally::Accepted,
        Ok(RefineOutcome::Exhausted { .. }) => Tally::Exhausted,
        Err(
            CaptionError::AlreadySatisfied { .. }
            | CaptionError::MissingTags { .. }
            | CaptionError::Cancelled,
        ) => Tally::Skipped,
        Err(_) => Tally::Failed,
    }
}

/// Runs many refinement loops concurrently over a bounded worker pool.
pub struct Dispatcher {
    controller: Arc<RefinementController>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(controller: Arc<RefinementController>, options: DispatchOptions) -> Self {
        Self {
            controller,
            options,
        }
    }

    /// Process every task, invoking `on_result` as each image finishes.
    ///
    /// Results complete in any order. Returns the run summary, or
    /// `ResourceExhausted` when the credential pool died mid-run; a raised
    /// cancellation flag stops submissions, lets in-flight workers wind
    /// down, and returns the partial summary.
    pub async fn run<F>(
        &self,
        tasks: Vec<PathBuf>,
        cancel: &CancelFlag,
        on_result: F,
    ) -> Result<RunStats, CaptionError>
    where
        F: Fn(&TaskResult) + Send + Sync + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers));
        let on_result = Arc::new(on_result);
        let pool_dead = Arc::new(AtomicBool::new(false));
        let mut stats = RunStats::default();
        let mut handles = Vec::new();

        for path in tasks {
            if cancel.is_cancelled() || pool_dead.load(Ordering::SeqCst) {
                break;
            }

            // Skip-existing filtering happens before submission so skipped
            // images never consume a worker slot or a stagger window.
            if self.options.policy == SkipPolicy::SkipExisting
                && artifacts::caption_path(&path).exists()
            {
                stats.skipped += 1;
                on_result(&TaskResult {
                    outcome: Err(CaptionError::AlreadySatisfied { path: path.clone() }),
                    path,
                });
                continue;
            }
            if !path.exists() {
                tracing::warn!("File not found: {:?}", path);
                stats.failed += 1;
                on_result(&TaskResult {
                    path: path.clone(),
                    outcome: Err(CaptionError::Io {
                        path,
                        message: "file not found".to_string(),
                    }),
                });
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Worker semaphore closed unexpectedly — stopping run");
                    break;
                }
            };

            let controller = self.controller.clone();
            let cancel_task = cancel.clone();
            let on_result = on_result.clone();
            let pool_dead = pool_dead.clone();

            let handle = tokio::spawn(async move {
                let outcome = controller.refine_image(&path, &cancel_task).await;
                if matches!(outcome, Err(CaptionError::ResourceExhausted)) {
                    pool_dead.store(true, Ordering::SeqCst);
                }
                drop(permit); // Release the worker slot before the callback
                let result = TaskResult { path, outcome };
                let contribution = tally(&result.outcome);
                on_result(&result);
                contribution
            });
            handles.push(handle);

            tokio::time::sleep(self.options.stagger).await;
        }

        for handle in handles {
            match handle.await {
                Ok(Tally::Accepted) => stats.accepted += 1,
                Ok(Tally::Exhausted) => stats.exhausted += 1,
                Ok(Tally::Skipped) => stats.skipped += 1,
                Ok(Tally::Failed) => stats.failed += 1,
                Err(e) => {
                    tracing::error!("Worker task panicked: {e}");
                    stats.failed += 1;
                }
            }
        }

        if pool_dead.load(Ordering::SeqCst) {
            return Err(CaptionError::ResourceExhausted);
        }
        Ok(stats)
    }
}
