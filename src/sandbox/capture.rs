//! Output capture: bounded stdout/stderr buffers for one execution.
//!
//! The buffers are shared between the worker thread (which writes) and the
//! dispatcher (which snapshots them, possibly after a timeout), so they sit
//! behind a mutex rather than inside the interpreter.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::script::{Console, Fault, Stream};

/// Text captured from one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Default)]
struct Buffer {
    text: String,
    truncated: bool,
}

impl Buffer {
    /// Append as much of `chunk` as fits. Returns false if anything was cut.
    fn append(&mut self, chunk: &str, limit: usize) -> bool {
        if self.truncated {
            return false;
        }
        let room = limit.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return true;
        }
        let mut cut = room;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.truncated = true;
        false
    }
}

/// Two independently bounded append-only buffers.
#[derive(Debug)]
pub struct CaptureBuffers {
    stdout: Mutex<Buffer>,
    stderr: Mutex<Buffer>,
    limit: usize,
    overflow_fatal: bool,
}

impl CaptureBuffers {
    /// `limit` bytes per stream. With `overflow_fatal`, the first write that
    /// does not fit stops the script with a `LimitExceeded` fault.
    pub fn new(limit: usize, overflow_fatal: bool) -> Self {
        Self {
            stdout: Mutex::new(Buffer::default()),
            stderr: Mutex::new(Buffer::default()),
            limit,
            overflow_fatal,
        }
    }

    fn buffer(&self, stream: Stream) -> MutexGuard<'_, Buffer> {
        let cell = match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        };
        // A panicking writer leaves a consistent buffer behind.
        cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy out both buffers, marking any truncation.
    pub fn snapshot(&self) -> Captured {
        Captured {
            stdout: self.render(Stream::Stdout),
            stderr: self.render(Stream::Stderr),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.buffer(Stream::Stdout).truncated || self.buffer(Stream::Stderr).truncated
    }

    fn render(&self, stream: Stream) -> String {
        let buffer = self.buffer(stream);
        if !buffer.truncated {
            return buffer.text.clone();
        }
        let mut text = buffer.text.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&truncation_marker(self.limit));
        text
    }
}

pub fn truncation_marker(limit: usize) -> String {
    format!("[output truncated: limit of {} bytes reached]\n", limit)
}

impl Console for CaptureBuffers {
    fn write(&self, stream: Stream, text: &str) -> Result<(), Fault> {
        let fitted = self.buffer(stream).append(text, self.limit);
        if !fitted && self.overflow_fatal {
            return Err(Fault::LimitExceeded(format!(
                "output limit of {} bytes exceeded",
                self.limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_are_independent() {
        let capture = CaptureBuffers::new(64, false);
        capture.write(Stream::Stdout, "out\n").unwrap();
        capture.write(Stream::Stderr, "err\n").unwrap();
        assert_eq!(
            capture.snapshot(),
            Captured {
                stdout: "out\n".into(),
                stderr: "err\n".into()
            }
        );
    }

    #[test]
    fn test_truncation_is_marked() {
        let capture = CaptureBuffers::new(8, false);
        capture.write(Stream::Stdout, "12345").unwrap();
        capture.write(Stream::Stdout, "67890").unwrap();
        capture.write(Stream::Stdout, "more").unwrap();
        let snapshot = capture.snapshot();
        assert_eq!(
            snapshot.stdout,
            format!("12345678\n{}", truncation_marker(8))
        );
        assert!(capture.is_truncated());
        assert_eq!(snapshot.stderr, "");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let capture = CaptureBuffers::new(3, false);
        capture.write(Stream::Stdout, "aé€").unwrap();
        assert!(capture.snapshot().stdout.starts_with("aé\n"));
    }

    #[test]
    fn test_fatal_overflow() {
        let capture = CaptureBuffers::new(4, true);
        capture.write(Stream::Stdout, "abcd").unwrap();
        let err = capture.write(Stream::Stdout, "e").unwrap_err();
        assert!(matches!(err, Fault::LimitExceeded(_)));
    }
}
