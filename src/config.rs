use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_COMMAND: &str = "echo {{ offset + batchSize }}={{ limit }}";
pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_LOG_SIZE: u64 = 128 * 1024 * 1024;

/// Where each job's combined stdout/stderr ends up.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    /// One rotated log file per job, `<dir>/<job>.log`.
    Files {
        /// Directory holding the log files. `None` means the current directory.
        dir: Option<PathBuf>,
        /// Size at which the active file is rotated.
        max_size: u64,
        /// Rotated files kept per job (`0` keeps all).
        max_backups: usize,
        /// Age after which rotated files are removed (`None` keeps them).
        max_age: Option<Duration>,
    },
    /// Shared stderr stream with a `[job]` prefix on every line.
    Stderr,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Files {
            dir: None,
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_backups: 0,
            max_age: None,
        }
    }
}

/// Configuration of one batch run.
///
/// Built once at startup and shared read-only (behind an `Arc`) by every
/// job of the run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Program used to interpret the rendered command.
    pub shell: String,
    /// Arguments placed before the rendered command (e.g. `-c`).
    pub shell_args: Vec<String>,
    /// Command template.
    pub command: String,
    /// Stdin template. Renders to an empty string when no stdin is wanted.
    pub stdin: String,
    /// Working directory of every subprocess. `None` inherits ours.
    pub working_directory: Option<PathBuf>,
    /// First value of the range (inclusive).
    pub offset: u64,
    /// End of the range (exclusive).
    pub limit: u64,
    /// Maximum size of one batch.
    pub batch_size: u64,
    /// Deadline of a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retry: u32,
    /// Size of the worker pool.
    pub workers: usize,
    pub sink: SinkConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            shell_args: vec!["-c".to_string()],
            command: DEFAULT_COMMAND.to_string(),
            stdin: String::new(),
            working_directory: None,
            offset: 0,
            limit: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry: 0,
            workers: DEFAULT_WORKERS,
            sink: SinkConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new(command: impl Into<String>, offset: u64, limit: u64) -> Self {
        Self {
            command: command.into(),
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }

    /// Number of batches the range splits into.
    pub fn job_count(&self) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        self.limit.saturating_sub(self.offset).div_ceil(self.batch_size)
    }

    /// Check every field. Nothing is spawned for a configuration that fails here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.is_empty() {
            return Err(ConfigError::MissingShell);
        }
        if self.command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        if self.offset > self.limit {
            return Err(ConfigError::InvalidRange {
                offset: self.offset,
                limit: self.limit,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if let Some(dir) = &self.working_directory {
            check_dir("working", dir)?;
        }
        if let SinkConfig::Files { dir, max_size, .. } = &self.sink {
            if *max_size == 0 {
                return Err(ConfigError::ZeroRotationSize);
            }
            if let Some(dir) = dir {
                check_dir("log", dir)?;
            }
        }
        Ok(())
    }
}

fn check_dir(kind: &'static str, path: &Path) -> Result<(), ConfigError> {
    let meta = std::fs::metadata(path).map_err(|source| ConfigError::MissingDirectory {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(ConfigError::NotADirectory {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_default() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.shell, "/bin/sh");
        assert_eq!(cfg.shell_args, vec!["-c".to_string()]);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.timeout, Duration::from_secs(86400));
        assert_eq!(cfg.retry, 0);
        assert!(cfg.stdin.is_empty());
        assert!(matches!(cfg.sink, SinkConfig::Files { dir: None, .. }));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RunConfig::new("true", 0, 10).validate().is_ok());
    }

    #[test]
    fn empty_range_is_valid() {
        let cfg = RunConfig::new("true", 7, 7);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.job_count(), 0);
    }

    #[test]
    fn job_count_rounds_up() {
        let cfg = RunConfig::new("true", 0, 2500);
        assert_eq!(cfg.job_count(), 3);
        let cfg = RunConfig::new("true", 0, 3000);
        assert_eq!(cfg.job_count(), 3);
    }

    #[test]
    fn rejects_offset_past_limit() {
        let err = RunConfig::new("true", 11, 10).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRange {
                offset: 11,
                limit: 10
            }
        ));
    }

    #[test]
    fn rejects_zero_values() {
        let base = RunConfig::new("true", 0, 10);

        let err = base.clone().with_batch_size(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroBatchSize));

        let err = base.clone().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));

        let err = base.clone().with_timeout(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));

        let err = base
            .with_sink(SinkConfig::Files {
                dir: None,
                max_size: 0,
                max_backups: 0,
                max_age: None,
            })
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroRotationSize));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut cfg = RunConfig::new("", 0, 10);
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCommand)));
        cfg.command = "true".into();
        cfg.shell.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingShell)));
    }

    #[test]
    fn rejects_missing_working_directory() {
        let cfg = RunConfig::new("true", 0, 10).with_working_directory("/definitely/not/here");
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingDirectory { kind: "working", .. })
        ));
    }

    #[test]
    fn rejects_log_dir_that_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = RunConfig::new("true", 0, 10).with_sink(SinkConfig::Files {
            dir: Some(file.path().to_path_buf()),
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_backups: 0,
            max_age: None,
        });
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotADirectory { kind: "log", .. })
        ));
    }

    #[test]
    fn stderr_sink_skips_log_dir_checks() {
        let cfg = RunConfig::new("true", 0, 10).with_sink(SinkConfig::Stderr);
        assert!(cfg.validate().is_ok());
    }
}
