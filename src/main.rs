use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use batch_executor::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_COMMAND, DEFAULT_SHELL, DEFAULT_WORKERS,
};
use batch_executor::duration::parse_duration;
use batch_executor::shutdown::install_shutdown_handler;
use batch_executor::{ExecutionController, RunConfig, RunError, SinkConfig};

const MIB: u64 = 1024 * 1024;
const DAY: u64 = 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "batch-executor")]
#[command(version)]
#[command(about = "Run a templated shell command over a numeric range in parallel batches")]
struct Args {
    /// Shell used to interpret the rendered command
    #[arg(long, default_value = DEFAULT_SHELL)]
    shell: String,

    /// Arguments passed to the shell before the command (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "-c", allow_hyphen_values = true)]
    shell_args: Vec<String>,

    /// Command template. Variables: offset batchSize limit tryCount maxTryCount
    #[arg(long, short = 'c', default_value = DEFAULT_COMMAND)]
    command: String,

    /// Stdin template, written to every process and then closed
    #[arg(long, default_value = "")]
    stdin: String,

    /// Working directory of the processes (defaults to the current directory)
    #[arg(long, short = 'w')]
    working_directory: Option<PathBuf>,

    /// Start of the range (inclusive)
    #[arg(long, short = 'o', default_value_t = 0)]
    offset: u64,

    /// End of the range (exclusive)
    #[arg(long, short = 'l', default_value_t = 0)]
    limit: u64,

    /// Size of each batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Timeout of a single attempt, e.g. "90s", "1h30m"
    #[arg(long, default_value = "24h", value_parser = parse_duration)]
    timeout: Duration,

    /// Retries after a failed attempt
    #[arg(long, short = 'r', default_value_t = 0)]
    retry: u32,

    /// Number of jobs run in parallel
    #[arg(long, short = 'p', default_value_t = DEFAULT_WORKERS)]
    processors: usize,

    /// Directory for per-job log files (defaults to the current directory)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write job output to stderr, prefixed with the job name, instead of files
    #[arg(long)]
    log_stderr: bool,

    /// Size in MiB at which a job log file is rotated
    #[arg(long, default_value_t = 128)]
    log_max_size: u64,

    /// Rotated log files kept per job (0 keeps all)
    #[arg(long, default_value_t = 0)]
    log_max_backups: usize,

    /// Days to keep rotated log files (0 keeps them forever)
    #[arg(long, default_value_t = 0)]
    log_max_age: u64,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Format of the executor's own logs
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn sink(&self) -> SinkConfig {
        if self.log_stderr {
            return SinkConfig::Stderr;
        }
        SinkConfig::Files {
            dir: self.log_dir.clone(),
            max_size: self.log_max_size.saturating_mul(MIB),
            max_backups: self.log_max_backups,
            max_age: (self.log_max_age > 0)
                .then(|| Duration::from_secs(self.log_max_age.saturating_mul(DAY))),
        }
    }

    fn into_config(self) -> RunConfig {
        let sink = self.sink();
        RunConfig {
            shell: self.shell,
            shell_args: self.shell_args,
            command: self.command,
            stdin: self.stdin,
            working_directory: self.working_directory,
            offset: self.offset,
            limit: self.limit,
            batch_size: self.batch_size,
            timeout: self.timeout,
            retry: self.retry,
            workers: self.processors,
            sink,
        }
    }
}

fn init_logging(verbose: bool, format: &LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, &args.log_format);

    let token = install_shutdown_handler();
    match ExecutionController::new().run(token, args.into_config()).await {
        Ok(summary) => {
            if summary.failed > 0 || summary.abandoned > 0 {
                tracing::warn!(
                    failed = summary.failed,
                    abandoned = summary.abandoned,
                    "Some batches did not succeed, see their logs"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e @ RunError::Config(_)) => {
            tracing::error!(error = %e, "Invalid configuration");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Run did not complete");
            ExitCode::FAILURE
        }
    }
}
