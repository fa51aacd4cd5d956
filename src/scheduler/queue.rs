//! Unbuffered job hand-off between the controller and the worker pool.
//!
//! Idle workers post a one-shot slot into a shared queue; the controller
//! takes the oldest slot and fills it with a job. A send therefore completes
//! only once some worker is ready to run the job, and nothing is ever queued
//! on the controller side.
//!
//! ```text
//!  worker ──(oneshot::Sender)──► ready queue ──► JobSender::send(job)
//!     ▲                                                  │
//!     └──────────────(oneshot::Receiver) ◄── job ────────┘
//! ```
//!
//! Dropping the [`JobSender`] closes the queue: pending slots are dropped and
//! every waiting [`JobReceiver::recv`] returns `None`.

use tokio::sync::{mpsc, oneshot};

use crate::scheduler::job::JobRequest;

type Slot = oneshot::Sender<JobRequest>;

/// Create a rendezvous queue. `workers` bounds the number of idle slots.
pub fn job_queue(workers: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(workers.max(1));
    (JobSender { ready: rx }, JobReceiver { ready: tx })
}

/// Controller side of the queue.
#[derive(Debug)]
pub struct JobSender {
    ready: mpsc::Receiver<Slot>,
}

impl JobSender {
    /// Hand `job` to the next idle worker, waiting until one is available.
    ///
    /// Returns the job back if every receiver is gone.
    pub async fn send(&mut self, mut job: JobRequest) -> Result<(), JobRequest> {
        loop {
            let Some(slot) = self.ready.recv().await else {
                return Err(job);
            };
            // A worker that went away after posting its slot hands the job back.
            match slot.send(job) {
                Ok(()) => return Ok(()),
                Err(returned) => job = returned,
            }
        }
    }
}

/// Worker side of the queue. Cheap to clone; one clone per worker.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    ready: mpsc::Sender<Slot>,
}

impl JobReceiver {
    /// Wait for the next job. `None` once the queue is closed.
    pub async fn recv(&self) -> Option<JobRequest> {
        let (slot, job) = oneshot::channel();
        self.ready.send(slot).await.ok()?;
        job.await.ok()
    }
}
