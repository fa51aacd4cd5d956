pub mod job;
pub mod outstanding;
pub mod queue;

pub use job::{partition, Batch, JobRequest, Partitions};
pub use outstanding::{CompletionGuard, OutstandingJobs};
pub use queue::{job_queue, JobReceiver, JobSender};
