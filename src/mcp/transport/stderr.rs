//! Bounded sink for a child process's stderr
//!
//! A server writing diagnostics faster than anyone reads them must never be
//! able to stall on a full pipe, so stderr is drained continuously by a
//! background task. Lines land in a fixed-capacity ring buffer (oldest lines
//! dropped first) and are logged at `DEBUG`. Stderr output is diagnostic only
//! and never treated as an error condition.
//!
//! The drain task is tied to a [`CancellationToken`] so the owning transport
//! can tear it down deterministically on `stop()`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default number of stderr lines retained per transport.
pub const DEFAULT_STDERR_CAPACITY: usize = 512;

/// Fixed-capacity buffer of the most recent stderr lines.
///
/// Cloning shares the underlying buffer.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::transport::stderr::StderrSink;
///
/// let sink = StderrSink::new(2);
/// sink.push("a".into());
/// sink.push("b".into());
/// sink.push("c".into());
/// assert_eq!(sink.lines(), vec!["b".to_string(), "c".to_string()]);
/// assert_eq!(sink.dropped(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct StderrSink {
    inner: Arc<Mutex<SinkBuffer>>,
}

#[derive(Debug)]
struct SinkBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl StderrSink {
    /// Create a sink retaining at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(SinkBuffer {
                lines: VecDeque::with_capacity(capacity.min(DEFAULT_STDERR_CAPACITY)),
                capacity,
                dropped: 0,
            })),
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        // A poisoned lock only means another drain task panicked mid-push;
        // the buffer itself is still consistent.
        let mut buf = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buf.lines.len() == buf.capacity {
            buf.lines.pop_front();
            buf.dropped += 1;
        }
        buf.lines.push_back(line);
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(g) => g.lines.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().lines.iter().cloned().collect(),
        }
    }

    /// Number of lines evicted since creation.
    pub fn dropped(&self) -> u64 {
        match self.inner.lock() {
            Ok(g) => g.dropped,
            Err(poisoned) => poisoned.into_inner().dropped,
        }
    }

    /// Discard all retained lines.
    pub fn clear(&self) {
        match self.inner.lock() {
            Ok(mut g) => g.lines.clear(),
            Err(poisoned) => poisoned.into_inner().lines.clear(),
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_CAPACITY)
    }
}

/// Spawn the drain task for `stream`.
///
/// The task ends when the stream reaches EOF, a read fails, or `token` is
/// cancelled. `label` identifies the server in log output.
pub fn spawn_drain<R>(
    stream: R,
    sink: StderrSink,
    token: CancellationToken,
    label: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = lines.next_line() => match next {
                    Ok(Some(line)) => {
                        tracing::debug!(
                            target: "mcp_conformance::mcp::transport::stderr",
                            server = %label,
                            "server stderr: {}",
                            line
                        );
                        sink.push(line);
                    }
                    Ok(None) | Err(_) => break,
                },
            }
        }
    })
}
