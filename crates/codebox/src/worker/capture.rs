use std::io::{self, Read};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

const READ_CHUNK: usize = 8192;

/// Bytes read from one child stream.
#[derive(Debug, Default)]
pub(crate) struct CapturedStream {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedStream {
    /// Decode as UTF-8, dropping invalid sequences rather than failing.
    pub(crate) fn into_text(self) -> String {
        let mut text = decode_lossy(&self.bytes);
        if self.truncated {
            text.push_str("\n...[output truncated]");
        }
        text
    }
}

/// A background reader draining one pipe into memory.
///
/// The reader appends into a shared buffer, so bytes read before the grace
/// period expires are kept even if the pipe never reaches end of stream.
pub(crate) struct StreamCapture {
    shared: Arc<Mutex<CapturedStream>>,
    done: mpsc::Receiver<()>,
    label: &'static str,
}

impl StreamCapture {
    pub(crate) fn spawn<R>(reader: R, limit: usize, label: &'static str) -> Self
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(CapturedStream::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("codebox-{label}"))
            .spawn(move || {
                read_capped(reader, limit, &sink);
                // Receiver is gone when the execution was abandoned.
                let _ = tx.send(());
            });
        if let Err(err) = spawned {
            tracing::warn!(stream = label, error = %err, "failed to start stream reader");
        }
        Self { shared, done, label }
    }

    /// Wait up to `grace` for the reader to hit end of stream, then take
    /// whatever has been read.
    ///
    /// A descendant that inherited the pipe can keep it open after the
    /// interpreter exits; later writes from it are not captured.
    pub(crate) fn finish(self, grace: Duration) -> CapturedStream {
        if let Err(err) = self.done.recv_timeout(grace) {
            tracing::warn!(
                stream = self.label,
                error = %err,
                "stream still open after interpreter exit; keeping partial capture"
            );
        }
        match self.shared.lock() {
            Ok(mut captured) => std::mem::take(&mut *captured),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Read to end of stream into `sink`, keeping at most `limit` bytes.
///
/// Bytes past the limit are drained and discarded so the child never blocks
/// on a full pipe.
fn read_capped<R: Read>(mut reader: R, limit: usize, sink: &Mutex<CapturedStream>) {
    let mut kept = 0usize;
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf.get(..n).unwrap_or_default();
                let room = limit.saturating_sub(kept);
                let Ok(mut captured) = sink.lock() else {
                    continue;
                };
                if chunk.len() > room {
                    captured
                        .bytes
                        .extend_from_slice(chunk.get(..room).unwrap_or_default());
                    captured.truncated = true;
                    kept = limit;
                } else {
                    captured.bytes.extend_from_slice(chunk);
                    kept += chunk.len();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(error = %err, "stream read failed");
                break;
            }
        }
    }
}

pub(crate) fn decode_lossy(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_is_dropped() {
        assert_eq!(decode_lossy(b"ok \xff\xfe done"), "ok  done");
        assert_eq!(decode_lossy("h\u{e9}llo".as_bytes()), "h\u{e9}llo");
    }

    #[test]
    fn capture_stops_at_limit_but_drains() {
        let data = vec![b'a'; 20_000];
        let sink = Mutex::new(CapturedStream::default());
        read_capped(data.as_slice(), 10, &sink);
        let captured = sink.into_inner().unwrap();
        assert!(captured.truncated);
        assert_eq!(captured.bytes.len(), 10);
        assert!(captured.into_text().ends_with("[output truncated]"));
    }

    /// Yields one chunk, then blocks until the sender side is dropped.
    struct HeldOpen {
        first: Option<Vec<u8>>,
        hold: mpsc::Receiver<()>,
    }

    impl Read for HeldOpen {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(first) = self.first.take() {
                buf[..first.len()].copy_from_slice(&first);
                return Ok(first.len());
            }
            let _ = self.hold.recv();
            Ok(0)
        }
    }

    #[test]
    fn open_pipe_keeps_what_was_read() {
        let (release, hold) = mpsc::channel::<()>();
        let reader = HeldOpen {
            first: Some(b"hi\n".to_vec()),
            hold,
        };
        let capture = StreamCapture::spawn(reader, 1024, "test");
        thread::sleep(Duration::from_millis(100));
        let text = capture.finish(Duration::from_millis(50)).into_text();
        assert_eq!(text, "hi\n");
        drop(release);
    }

    #[test]
    fn spawned_reader_delivers() {
        let capture = StreamCapture::spawn(&b"hi\n"[..], 1024, "test");
        let text = capture.finish(Duration::from_secs(5)).into_text();
        assert_eq!(text, "hi\n");
    }
}
