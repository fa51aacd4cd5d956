use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use batch_executor::error::AttemptError;
use batch_executor::sink::{MemorySink, OutputSink};
use batch_executor::worker::{Attempt, JobExecutor, MAX_WRITE};
use tokio_util::sync::CancellationToken;

/// Create a test executor running commands through `/bin/sh -c`
fn test_executor() -> JobExecutor {
    JobExecutor::new("/bin/sh", vec!["-c".to_string()])
}

fn attempt<'a>(command: &'a str, token: &'a CancellationToken) -> Attempt<'a> {
    Attempt {
        job: "exec-0-10",
        command,
        stdin: "",
        timeout: Duration::from_secs(30),
        token,
    }
}

async fn run(command: &str) -> (Result<(), AttemptError>, String) {
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let result = test_executor()
        .execute(attempt(command, &token), Arc::new(sink.clone()))
        .await;
    (result, sink.contents_lossy())
}

#[tokio::test]
async fn test_execute_simple_command() {
    let (result, output) = run("echo hello").await;

    assert!(result.is_ok());
    assert_eq!(output, "hello\n");
}

#[tokio::test]
async fn test_execute_empty_output() {
    let (result, output) = run("true").await;

    assert!(result.is_ok());
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_execute_large_output() {
    let (result, output) = run("seq 1 1000").await;

    assert!(result.is_ok());
    assert_eq!(output.lines().count(), 1000);
    assert_eq!(output.lines().last(), Some("1000"));
}

#[tokio::test]
async fn test_execute_command_failure() {
    let (result, _) = run("exit 1").await;

    assert!(matches!(result, Err(AttemptError::Exit(1))));
}

#[tokio::test]
async fn test_execute_captures_stdout_and_stderr() {
    let (result, output) = run("echo out; echo 'error message' >&2; exit 3").await;

    assert!(matches!(result, Err(AttemptError::Exit(3))));
    // Interleaving between the two streams is unspecified.
    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["error message", "out"]);
}

#[tokio::test]
async fn test_execute_output_is_byte_exact() {
    // Partial last line, blank line and non-UTF-8 bytes survive unchanged.
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let result = test_executor()
        .execute(
            attempt(r"printf 'a\n\nb\377c'", &token),
            Arc::new(sink.clone()),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(sink.contents(), b"a\n\nb\xffc");
}

/// Counts bytes and remembers the largest single write.
#[derive(Default)]
struct WriteStats {
    total: AtomicUsize,
    largest: AtomicUsize,
    non_zero: AtomicUsize,
}

impl OutputSink for WriteStats {
    fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.total.fetch_add(buf.len(), Ordering::Relaxed);
        self.largest.fetch_max(buf.len(), Ordering::Relaxed);
        let stray = buf.iter().filter(|&&b| b != 0).count();
        self.non_zero.fetch_add(stray, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::test]
async fn test_execute_unterminated_stream_is_written_in_bounded_chunks() {
    let token = CancellationToken::new();
    let stats = Arc::new(WriteStats::default());

    let result = test_executor()
        .execute(attempt("head -c 3000000 /dev/zero", &token), stats.clone())
        .await;

    assert!(result.is_ok());
    assert_eq!(stats.total.load(Ordering::Relaxed), 3_000_000);
    assert_eq!(stats.non_zero.load(Ordering::Relaxed), 0);
    let largest = stats.largest.load(Ordering::Relaxed);
    assert!(largest <= MAX_WRITE, "single write of {largest} bytes");
}

#[tokio::test]
async fn test_execute_long_line_is_split_but_exact() {
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let command = "head -c 200000 /dev/zero | tr '\\0' x; echo; echo tail";

    let result = test_executor()
        .execute(attempt(command, &token), Arc::new(sink.clone()))
        .await;

    assert!(result.is_ok());
    let expected = format!("{}\ntail\n", "x".repeat(200_000));
    assert_eq!(sink.contents_lossy(), expected);
}

#[tokio::test]
async fn test_execute_writes_stdin() {
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let mut a = attempt("cat; echo done", &token);
    a.stdin = "first\nsecond\n";

    let result = test_executor().execute(a, Arc::new(sink.clone())).await;

    assert!(result.is_ok());
    assert_eq!(sink.contents_lossy(), "first\nsecond\ndone\n");
}

#[tokio::test]
async fn test_execute_without_stdin_sees_eof() {
    // `cat` would block forever if stdin were left open.
    let (result, output) = run("cat; echo done").await;

    assert!(result.is_ok());
    assert_eq!(output, "done\n");
}

#[tokio::test]
async fn test_execute_ignores_unread_stdin() {
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let big = "x".repeat(1 << 20);
    let mut a = attempt("echo skipped", &token);
    a.stdin = &big;

    let result = test_executor().execute(a, Arc::new(sink.clone())).await;

    assert!(result.is_ok());
    assert_eq!(sink.contents_lossy(), "skipped\n");
}

#[tokio::test]
async fn test_execute_timeout_kills_process() {
    let token = CancellationToken::new();
    let sink = MemorySink::new();
    let mut a = attempt("echo started; sleep 30", &token);
    a.timeout = Duration::from_millis(300);

    let start = Instant::now();
    let result = test_executor().execute(a, Arc::new(sink.clone())).await;

    assert!(matches!(result, Err(AttemptError::Timeout(_))));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(sink.contents_lossy(), "started\n");
}

#[tokio::test]
async fn test_execute_cancel_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let command = format!("echo $$ > {}; exec sleep 30", pid_file.display());

    let token = CancellationToken::new();
    let attempt_token = token.child_token();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        })
    };

    let start = Instant::now();
    let result = test_executor()
        .execute(attempt(&command, &attempt_token), Arc::new(MemorySink::new()))
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(AttemptError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
    assert!(!alive, "process {pid} still exists after cancellation");
}

#[tokio::test]
async fn test_execute_timeout_does_not_cancel_siblings() {
    let root = CancellationToken::new();
    let first = root.child_token();
    let second = root.child_token();

    let mut slow = attempt("sleep 30", &first);
    slow.timeout = Duration::from_millis(200);
    let quick = attempt("sleep 0.5; echo ok", &second);

    let executor = test_executor();
    let (a, b) = tokio::join!(
        executor.execute(slow, Arc::new(MemorySink::new())),
        executor.execute(quick, Arc::new(MemorySink::new())),
    );

    assert!(matches!(a, Err(AttemptError::Timeout(_))));
    assert!(b.is_ok());
    assert!(!root.is_cancelled());
}

#[tokio::test]
async fn test_execute_missing_shell() {
    let token = CancellationToken::new();
    let executor = JobExecutor::new("/nonexistent/shell", vec!["-c".to_string()]);

    let result = executor
        .execute(attempt("true", &token), Arc::new(MemorySink::new()))
        .await;

    assert!(matches!(result, Err(AttemptError::Spawn(_))));
}

#[tokio::test]
async fn test_execute_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let sink = MemorySink::new();

    let result = test_executor()
        .with_working_directory(dir.path())
        .execute(attempt("pwd -P", &token), Arc::new(sink.clone()))
        .await;

    assert!(result.is_ok());
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(sink.contents_lossy().trim_end(), expected.to_str().unwrap());
}
