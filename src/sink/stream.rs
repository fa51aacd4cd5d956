use std::io::{self, Stderr, Write};
use std::sync::Mutex;

use super::OutputSink;

/// Writes to a shared stream, tagging each line with `[<job>] `.
#[derive(Debug)]
pub struct PrefixedSink<W> {
    prefix: Vec<u8>,
    inner: Mutex<Inner<W>>,
}

#[derive(Debug)]
struct Inner<W> {
    out: W,
    at_line_start: bool,
}

impl PrefixedSink<Stderr> {
    pub fn stderr(job_name: &str) -> Self {
        Self::new(job_name, io::stderr())
    }
}

impl<W: Write> PrefixedSink<W> {
    pub fn new(job_name: &str, out: W) -> Self {
        Self {
            prefix: format!("[{job_name}] ").into_bytes(),
            inner: Mutex::new(Inner {
                out,
                at_line_start: true,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner()).out
    }
}

impl<W: Write + Send> OutputSink for PrefixedSink<W> {
    fn write(&self, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Build the whole chunk first so lines from different jobs don't interleave mid-line.
        let mut chunk = Vec::with_capacity(buf.len() + self.prefix.len());
        let mut at_line_start = inner.at_line_start;
        for line in buf.split_inclusive(|&b| b == b'\n') {
            if at_line_start {
                chunk.extend_from_slice(&self.prefix);
            }
            chunk.extend_from_slice(line);
            at_line_start = line.ends_with(b"\n");
        }
        inner.out.write_all(&chunk)?;
        inner.at_line_start = at_line_start;
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .out
            .flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_every_line() {
        let sink = PrefixedSink::new("exec-0-10", Vec::new());
        sink.write(b"one\ntwo\n").unwrap();
        sink.write(b"three\n").unwrap();
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "[exec-0-10] one\n[exec-0-10] two\n[exec-0-10] three\n"
        );
    }

    #[test]
    fn partial_lines_are_prefixed_once() {
        let sink = PrefixedSink::new("j", Vec::new());
        sink.write(b"par").unwrap();
        sink.write(b"tial\nnext").unwrap();
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "[j] partial\n[j] next"
        );
    }
}
