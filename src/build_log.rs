//! Per-build log sink.
//!
//! Output from the build script is passed through [`strip_ansi`] before it
//! reaches the log file. Writes report the length of the caller's chunk,
//! not the number of cleaned bytes persisted, so copy loops never see a
//! short write.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::fs::{self, File};
use tokio::io::AsyncWrite;

use crate::sanitize::strip_ansi;

/// Log file path for a build ID: `<log_dir>/log-<id>.log`.
pub fn log_path(log_dir: &Path, build_id: &str) -> PathBuf {
    log_dir.join(format!("log-{}.log", build_id))
}

/// Create (or truncate) the log file for a build, creating `log_dir` if needed.
pub async fn create_log_file(log_dir: &Path, build_id: &str) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(log_dir).await?;
    let path = log_path(log_dir, build_id);
    let file = File::create(&path).await?;
    Ok((path, file))
}

/// Wraps a writer, stripping ANSI escapes from everything written through it.
pub struct SanitizingWriter<W> {
    inner: W,
    pending: Vec<u8>,
    flushed: usize,
}

impl<W: AsyncWrite + Unpin> SanitizingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            flushed: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Push buffered, already-cleaned bytes into the inner writer.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.flushed < self.pending.len() {
            let unwritten = &self.pending[self.flushed..];
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, unwritten))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.flushed += n;
        }
        self.pending.clear();
        self.flushed = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for SanitizingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        this.pending.extend_from_slice(&strip_ansi(buf));
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
