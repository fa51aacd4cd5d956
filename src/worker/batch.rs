use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::AttemptError;
use crate::scheduler::{JobReceiver, JobRequest};
use crate::sink::SinkFactory;
use crate::template::Renderer;
use crate::worker::executor::{Attempt, JobExecutor};

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Every attempt failed.
    Failed,
    /// The templates could not be rendered; nothing was run.
    Abandoned,
    /// The run was cancelled before the job could finish.
    Cancelled,
}

/// Outcome counters shared by every worker of a run.
#[derive(Debug, Default)]
pub struct Tally {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub abandoned: AtomicU64,
    pub cancelled: AtomicU64,
    /// Processes handed to the executor, retries included.
    pub attempts: AtomicU64,
}

impl Tally {
    pub fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Succeeded => &self.succeeded,
            JobOutcome::Failed => &self.failed,
            JobOutcome::Abandoned => &self.abandoned,
            JobOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Long-lived loop that runs jobs one at a time until the queue closes.
pub struct BatchWorker {
    id: usize,
    jobs: JobReceiver,
    renderer: Arc<dyn Renderer>,
    sinks: SinkFactory,
    executor: JobExecutor,
    tally: Arc<Tally>,
}

impl BatchWorker {
    pub fn new(
        id: usize,
        jobs: JobReceiver,
        renderer: Arc<dyn Renderer>,
        sinks: SinkFactory,
        executor: JobExecutor,
        tally: Arc<Tally>,
    ) -> Self {
        Self {
            id,
            jobs,
            renderer,
            sinks,
            executor,
            tally,
        }
    }

    pub async fn run(self) {
        tracing::debug!(worker = self.id, "Worker started");
        while let Some(mut job) = self.jobs.recv().await {
            let outcome = self.process(&mut job).await;
            self.tally.record(outcome);
            // Dropping the request is what tells the controller the job is done.
            drop(job);
        }
        tracing::debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, job: &mut JobRequest) -> JobOutcome {
        let name = job.name();
        tracing::debug!(
            worker = self.id,
            job = %name,
            offset = job.batch.offset,
            batch_size = job.batch.size,
            "Job received"
        );

        while job.has_attempts_left() {
            if job.parent.is_cancelled() {
                tracing::info!(job = %name, attempt = job.try_count, "Run cancelled, giving up on job");
                return JobOutcome::Cancelled;
            }

            match self.attempt(job, &name).await {
                Ok(()) => {
                    tracing::info!(job = %name, attempt = job.try_count, "Job succeeded");
                    return JobOutcome::Succeeded;
                }
                Err(AttemptError::Render(e)) => {
                    tracing::error!(job = %name, error = %e, "Failed to render templates, abandoning job");
                    return JobOutcome::Abandoned;
                }
                Err(AttemptError::Cancelled) => return JobOutcome::Cancelled,
                Err(e) => {
                    let exit_code = match e {
                        AttemptError::Exit(code) => Some(code),
                        _ => None,
                    };
                    tracing::error!(
                        job = %name,
                        attempt = job.try_count,
                        max_attempt = job.max_try_count(),
                        reason = e.as_label(),
                        exit_code = ?exit_code,
                        error = %e,
                        "Attempt failed"
                    );
                    job.try_count += 1;
                }
            }
        }

        tracing::error!(job = %name, attempts = job.try_count, "Job failed, retries exhausted");
        JobOutcome::Failed
    }

    /// Render, open the sink and run one process.
    async fn attempt(&self, job: &JobRequest, name: &str) -> Result<(), AttemptError> {
        let vars = job.vars();
        let command = self.renderer.render(&job.config.command, &vars)?;
        let stdin = if job.config.stdin.is_empty() {
            String::new()
        } else {
            self.renderer.render(&job.config.stdin, &vars)?
        };

        let sink = self.sinks.open(name).map_err(AttemptError::Sink)?;
        let token = job.parent.child_token();
        self.tally.attempts.fetch_add(1, Ordering::Relaxed);

        self.executor
            .execute(
                Attempt {
                    job: name,
                    command: &command,
                    stdin: &stdin,
                    timeout: job.timeout(),
                    token: &token,
                },
                sink,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_outcome() {
        let tally = Tally::default();
        tally.record(JobOutcome::Succeeded);
        tally.record(JobOutcome::Succeeded);
        tally.record(JobOutcome::Failed);
        tally.record(JobOutcome::Cancelled);

        assert_eq!(Tally::get(&tally.succeeded), 2);
        assert_eq!(Tally::get(&tally.failed), 1);
        assert_eq!(Tally::get(&tally.abandoned), 0);
        assert_eq!(Tally::get(&tally.cancelled), 1);
    }
}
