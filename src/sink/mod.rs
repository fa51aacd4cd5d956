//! Destinations for a job's combined stdout/stderr.
//!
//! - [`RotatingFile`]: `<dir>/<job>.log`, rotated by size and pruned by count/age
//! - [`PrefixedSink`]: one shared stream, every line tagged with `[<job>] `
//! - [`MemorySink`]: in-process buffer for embedding and tests
//!
//! The supervisor only needs [`OutputSink::write`]; rotation and prefixing
//! stay inside the sink.

mod file;
mod stream;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub use file::{Rotation, RotatingFile};
pub use stream::PrefixedSink;

use crate::config::SinkConfig;
use crate::error::ConfigError;

/// A byte sink shared by the stdout and stderr drains of one attempt.
pub trait OutputSink: Send + Sync {
    /// Write the whole buffer. Callers pass complete lines where possible.
    fn write(&self, buf: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

pub type SinkRef = Arc<dyn OutputSink>;

/// Opens the sink of a job by name.
#[derive(Debug, Clone)]
pub enum SinkFactory {
    Files { dir: PathBuf, rotation: Rotation },
    Stderr,
    Memory(MemorySink),
}

impl SinkFactory {
    /// Build a factory from configuration, resolving the default log directory.
    pub fn from_config(cfg: &SinkConfig) -> Result<Self, ConfigError> {
        match cfg {
            SinkConfig::Stderr => Ok(SinkFactory::Stderr),
            SinkConfig::Files {
                dir,
                max_size,
                max_backups,
                max_age,
            } => {
                let dir = log_dir(dir.as_deref(), std::env::current_dir)?;
                Ok(SinkFactory::Files {
                    dir,
                    rotation: Rotation {
                        max_size: *max_size,
                        max_backups: *max_backups,
                        max_age: *max_age,
                    },
                })
            }
        }
    }

    pub fn open(&self, job_name: &str) -> io::Result<SinkRef> {
        match self {
            SinkFactory::Files { dir, rotation } => {
                let path = dir.join(format!("{job_name}.log"));
                Ok(Arc::new(RotatingFile::open(path, rotation.clone())?))
            }
            SinkFactory::Stderr => Ok(Arc::new(PrefixedSink::stderr(job_name))),
            SinkFactory::Memory(memory) => Ok(Arc::new(memory.clone())),
        }
    }
}

/// Buffer sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A poisoned buffer still holds whatever was written before the panic.
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.lock().extend_from_slice(buf);
        Ok(())
    }
}

/// The configured log directory, or the current one when none is set.
fn log_dir(
    dir: Option<&Path>,
    current_dir: impl FnOnce() -> io::Result<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    match dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => current_dir().map_err(ConfigError::CurrentDirectory),
    }
}
