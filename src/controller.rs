use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::{Result, RunError};
use crate::scheduler::{job_queue, partition, JobRequest, OutstandingJobs};
use crate::sink::SinkFactory;
use crate::template::{Renderer, TemplateRenderer};
use crate::worker::{BatchWorker, JobExecutor, Tally};

/// Counts reported by a run that was not cancelled.
///
/// `dispatched` equals the sum of the four outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub cancelled: u64,
    /// Processes started across all jobs, retries included.
    pub attempts: u64,
}

/// Drives one run: validate, start the worker pool, dispatch every batch and
/// wait for completion or cancellation.
pub struct ExecutionController {
    renderer: Arc<dyn Renderer>,
    sinks: Option<SinkFactory>,
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionController {
    pub fn new() -> Self {
        Self {
            renderer: Arc::new(TemplateRenderer),
            sinks: None,
        }
    }

    pub fn with_renderer(mut self, renderer: impl Renderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    /// Override the sinks derived from [`RunConfig::sink`].
    pub fn with_sinks(mut self, sinks: SinkFactory) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Execute every batch of `config`.
    ///
    /// Job failures never fail the run. The run only fails on invalid
    /// configuration, before anything is started, or when `token` is
    /// cancelled; in that case it returns after every worker has unwound and
    /// every process it started has been killed and reaped.
    pub async fn run(&self, token: CancellationToken, config: RunConfig) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.execute(token, config)
            .instrument(tracing::info_span!("run", %run_id))
            .await
    }

    async fn execute(&self, token: CancellationToken, config: RunConfig) -> Result<RunSummary> {
        config.validate()?;
        let sinks = match &self.sinks {
            Some(sinks) => sinks.clone(),
            None => SinkFactory::from_config(&config.sink)?,
        };

        let config = Arc::new(config);
        tracing::info!(
            offset = config.offset,
            limit = config.limit,
            batch_size = config.batch_size,
            jobs = config.job_count(),
            workers = config.workers,
            retry = config.retry,
            "Starting run"
        );

        let outstanding = OutstandingJobs::new();
        let tally = Arc::new(Tally::default());
        let executor = JobExecutor::from_config(&config);
        let (mut sender, receiver) = job_queue(config.workers);

        let mut workers = JoinSet::new();
        for id in 0..config.workers {
            let worker = BatchWorker::new(
                id,
                receiver.clone(),
                self.renderer.clone(),
                sinks.clone(),
                executor.clone(),
                tally.clone(),
            );
            workers.spawn(worker.run().in_current_span());
        }
        drop(receiver);

        let mut dispatched = 0u64;
        let completed = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = async {
                for batch in partition(config.offset, config.limit, config.batch_size) {
                    let job = JobRequest::new(batch, config.clone(), token.clone(), outstanding.track());
                    if sender.send(job).await.is_err() {
                        tracing::error!("Every worker has exited, stopping dispatch");
                        break;
                    }
                    dispatched += 1;
                }
                outstanding.seal();
                outstanding.wait_idle().await;
            } => true,
        };

        // Undispatched batches are dropped here. Closing the queue stops idle workers.
        outstanding.seal();
        drop(sender);
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::debug!(
            tracked = outstanding.tracked(),
            completed = outstanding.completed(),
            pending = outstanding.pending(),
            "Workers stopped"
        );

        if !completed {
            tracing::warn!(dispatched, "Run cancelled before all jobs completed");
            return Err(RunError::Cancelled);
        }

        let summary = RunSummary {
            dispatched,
            succeeded: Tally::get(&tally.succeeded),
            failed: Tally::get(&tally.failed),
            abandoned: Tally::get(&tally.abandoned),
            cancelled: Tally::get(&tally.cancelled),
            attempts: Tally::get(&tally.attempts),
        };
        tracing::info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            attempts = summary.attempts,
            "Run finished"
        );
        Ok(summary)
    }
}

/// Run `config` with the built-in renderer and the sinks it configures.
pub async fn run(token: CancellationToken, config: RunConfig) -> Result<RunSummary> {
    ExecutionController::new().run(token, config).await
}
