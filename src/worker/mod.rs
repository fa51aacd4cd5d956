//! Job execution on the worker pool.
//!
//! - [`BatchWorker`]: receives jobs from the dispatch queue one at a time,
//!   renders them, applies the retry policy and records the outcome
//! - [`JobExecutor`]: owns one OS process per attempt (spawn, pipes,
//!   deadline, kill, exit classification)
//!
//! # Attempt lifecycle
//!
//! 1. The worker renders the command and stdin templates for the current
//!    `tryCount`; a render failure abandons the job without retrying
//! 2. The job's sink is opened (`exec-<offset>-<size>`)
//! 3. [`JobExecutor::execute`] runs `<shell> <shell args...> <command>`
//! 4. Non-zero exit, spawn failure and timeout are retried immediately
//!    while the retry budget lasts; cancellation of the run stops retrying

pub mod batch;
pub mod executor;

pub use batch::{BatchWorker, JobOutcome, Tally};
pub use executor::{Attempt, JobExecutor, MAX_WRITE};
