//! Traffic mirroring for stream transports.
//!
//! [`Mirror`] wraps an async reader or writer and copies every complete line
//! that passes through it to a diagnostic writer, prefixed with a label such
//! as `read: ` or `write: `. The stdio transport uses it to echo protocol
//! traffic to stderr.
//!
//! The mirror runs inside `poll_read`/`poll_write`, so its diagnostic writer
//! must not block. [`LogForwarder`] is a `Write` handle that only queues the
//! bytes; a background task drains the queue into an async writer.

use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc;

/// Line-oriented traffic mirror around an async stream.
pub struct Mirror<T, W> {
    inner: T,
    label: &'static str,
    log: W,
    pending: Vec<u8>,
}

impl<T, W: Write> Mirror<T, W> {
    pub fn new(inner: T, label: &'static str, log: W) -> Self {
        Self {
            inner,
            label,
            log,
            pending: Vec::new(),
        }
    }

    /// Consume the mirror, returning the stream and the diagnostic writer.
    ///
    /// Any incomplete trailing line is written out first.
    pub fn into_inner(mut self) -> (T, W) {
        self.flush_pending();
        (self.inner, self.log)
    }

    fn record(&mut self, bytes: &[u8]) {
        for chunk in bytes.split_inclusive(|b| *b == b'\n') {
            self.pending.extend_from_slice(chunk);
            if chunk.ends_with(b"\n") {
                self.flush_pending();
            }
        }
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let line = trim_newline(&self.pending);
        let mut record = Vec::with_capacity(self.label.len() + line.len() + 3);
        record.extend_from_slice(self.label.as_bytes());
        record.extend_from_slice(b": ");
        record.extend_from_slice(line);
        record.push(b'\n');
        // One write per line keeps records from two mirrors apart.
        // Diagnostics must never break the protocol stream.
        let _ = self
            .log
            .write_all(&record)
            .and_then(|()| self.log.flush());
        self.pending.clear();
    }
}

/// Non-blocking [`Write`] handle that forwards bytes to an async writer.
///
/// Writes never fail and never wait. Clones share the same background task,
/// which stops once every handle is dropped or the target fails.
#[derive(Debug, Clone)]
pub struct LogForwarder {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl LogForwarder {
    /// Spawn the draining task on the current runtime.
    pub fn spawn<W>(mut target: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if target.write_all(&bytes).await.is_err() || target.flush().await.is_err() {
                    break;
                }
            }
        });
        Self { tx }
    }

    /// Forward to the process's stderr.
    pub fn stderr() -> Self {
        Self::spawn(tokio::io::stderr())
    }
}

impl Write for LogForwarder {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl<T, W> AsyncRead for Mirror<T, W>
where
    T: AsyncRead + Unpin,
    W: Write + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = &buf.filled()[before..];
            if read.is_empty() {
                this.flush_pending();
            } else {
                this.record(read);
            }
        }
        poll
    }
}

impl<T, W> AsyncWrite for Mirror<T, W>
where
    T: AsyncWrite + Unpin,
    W: Write + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.record(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        this.flush_pending();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
