use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::scheduler::outstanding::CompletionGuard;

/// A contiguous sub-range `[offset, offset + size)` of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub offset: u64,
    pub size: u64,
}

impl Batch {
    /// Exclusive upper bound of the batch.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Stable job name, unique within a run since batches never overlap.
    pub fn name(&self) -> String {
        format!("exec-{}-{}", self.offset, self.size)
    }
}

/// Iterator over the batches of `[offset, limit)` in ascending order.
#[derive(Debug, Clone)]
pub struct Partitions {
    cursor: u64,
    limit: u64,
    batch_size: u64,
}

/// Split `[offset, limit)` into batches of at most `batch_size`.
///
/// Only the last batch may be shorter. An empty range or a zero batch size
/// yields nothing.
pub fn partition(offset: u64, limit: u64, batch_size: u64) -> Partitions {
    Partitions {
        cursor: offset,
        limit,
        batch_size,
    }
}

impl Iterator for Partitions {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.batch_size == 0 || self.cursor >= self.limit {
            return None;
        }
        let size = self.batch_size.min(self.limit - self.cursor);
        let batch = Batch {
            offset: self.cursor,
            size,
        };
        self.cursor += size;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.batch_size == 0 {
            return (0, Some(0));
        }
        let n = self.limit.saturating_sub(self.cursor).div_ceil(self.batch_size);
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// One unit of dispatch: a batch plus everything needed to run it.
///
/// Owned by exactly one worker at a time. Dropping the request signals its
/// completion to the run.
#[derive(Debug)]
pub struct JobRequest {
    pub batch: Batch,
    pub config: Arc<RunConfig>,
    /// 0-based number of the attempt about to run.
    pub try_count: u32,
    /// Root token of the run; each attempt derives a child from it.
    pub parent: CancellationToken,
    _done: CompletionGuard,
}

impl JobRequest {
    pub fn new(
        batch: Batch,
        config: Arc<RunConfig>,
        parent: CancellationToken,
        done: CompletionGuard,
    ) -> Self {
        Self {
            batch,
            config,
            try_count: 0,
            parent,
            _done: done,
        }
    }

    pub fn name(&self) -> String {
        self.batch.name()
    }

    /// Retry budget: the last attempt runs with `try_count == max_try_count()`.
    pub fn max_try_count(&self) -> u32 {
        self.config.retry
    }

    pub fn has_attempts_left(&self) -> bool {
        self.try_count <= self.max_try_count()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Variables visible to the command and stdin templates.
    pub fn vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("offset".into(), self.batch.offset.into());
        vars.insert("batchSize".into(), self.batch.size.into());
        vars.insert("limit".into(), self.batch.end().into());
        vars.insert("tryCount".into(), self.try_count.into());
        vars.insert("maxTryCount".into(), self.max_try_count().into());
        vars
    }
}
