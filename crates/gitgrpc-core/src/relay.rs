//! Duplex relay between a local byte endpoint and a remote one.
//!
//! The upload direction (local reader → remote writer) runs in its own task;
//! the download direction (remote reader → local writer) runs inline in the
//! caller. The remote side reaching end-of-data ends the session, but success
//! is only reported once the upload direction has also finished, so bytes in
//! flight towards the remote are never dropped silently.
//!
//! The same relay serves both ends of a tunnel:
//! - remote helper: local = git's stdin/stdout, remote = the gRPC stream
//! - server: local = the gRPC stream, remote = the backing command's stdio

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace};

/// Upload chunk size: the most bytes forwarded in one frame.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

const DOWNLOAD_BUFFER_SIZE: usize = 16 * 1024;

/// Errors ending a relay session.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Upload read error: {0}")]
    UploadRead(#[source] io::Error),

    #[error("Upload write error: {0}")]
    UploadWrite(#[source] io::Error),

    #[error("Download read error: {0}")]
    DownloadRead(#[source] io::Error),

    #[error("Download write error: {0}")]
    DownloadWrite(#[source] io::Error),

    #[error("Upload task aborted: {0}")]
    UploadAborted(#[from] tokio::task::JoinError),
}

impl RelayError {
    /// The underlying I/O error, if any.
    pub const fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::UploadRead(e)
            | Self::UploadWrite(e)
            | Self::DownloadRead(e)
            | Self::DownloadWrite(e) => Some(e),
            Self::UploadAborted(_) => None,
        }
    }
}

/// Byte counts of a completed session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied local → remote.
    pub uploaded: u64,
    /// Bytes copied remote → local.
    pub downloaded: u64,
}

/// Duplex relay configuration.
#[derive(Debug, Clone, Copy)]
pub struct Relay {
    chunk_size: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the upload chunk size. Zero is treated as one.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 { 1 } else { chunk_size };
        self
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy bytes in both directions until both are exhausted.
    ///
    /// On local end-of-input the remote writer is shut down (half-close) and
    /// the download direction keeps running. A download error fails the
    /// session immediately and aborts the upload task; an upload error is
    /// reported once the download direction reaches end-of-data. Dropping the
    /// returned future aborts the upload task as well.
    pub async fn run<LR, LW, RR, RW>(
        &self,
        local_reader: LR,
        local_writer: LW,
        remote_reader: RR,
        remote_writer: RW,
    ) -> Result<RelayStats, RelayError>
    where
        LR: AsyncRead + Unpin + Send + 'static,
        LW: AsyncWrite + Unpin,
        RR: AsyncRead + Unpin,
        RW: AsyncWrite + Unpin + Send + 'static,
    {
        self.run_until(
            local_reader,
            local_writer,
            remote_reader,
            remote_writer,
            std::future::pending(),
        )
        .await
    }

    /// [`run`](Self::run), for a remote side that can go away on its own.
    ///
    /// Once `remote_closed` has completed, the session ends as soon as the
    /// download direction reaches end-of-data and the upload task is aborted
    /// instead of waiting for local end-of-input. An upload that already
    /// finished still reports its outcome.
    pub async fn run_until<LR, LW, RR, RW, C>(
        &self,
        local_reader: LR,
        mut local_writer: LW,
        mut remote_reader: RR,
        remote_writer: RW,
        remote_closed: C,
    ) -> Result<RelayStats, RelayError>
    where
        LR: AsyncRead + Unpin + Send + 'static,
        LW: AsyncWrite + Unpin,
        RR: AsyncRead + Unpin,
        RW: AsyncWrite + Unpin + Send + 'static,
        C: Future<Output = ()>,
    {
        let uploaded = Arc::new(AtomicU64::new(0));
        let mut upload_task = AbortOnDropHandle::new(tokio::spawn(upload(
            local_reader,
            remote_writer,
            self.chunk_size,
            Arc::clone(&uploaded),
        )));

        // Failing here drops `upload_task`, which aborts it.
        let downloaded = download(&mut remote_reader, &mut local_writer).await?;
        debug!(downloaded, "Remote end-of-data, waiting for upload to finish");

        tokio::select! {
            biased;
            result = &mut upload_task => {
                result??;
            }
            () = remote_closed => {
                debug!(
                    uploaded = uploaded.load(Ordering::Relaxed),
                    "Remote closed, abandoning upload"
                );
            }
        }

        let uploaded = uploaded.load(Ordering::Relaxed);
        debug!(uploaded, downloaded, "Relay finished");
        Ok(RelayStats {
            uploaded,
            downloaded,
        })
    }
}

async fn upload<R, W>(
    mut reader: R,
    mut writer: W,
    chunk_size: usize,
    progress: Arc<AtomicU64>,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(RelayError::UploadRead)?;
        if n == 0 {
            writer.shutdown().await.map_err(RelayError::UploadWrite)?;
            debug!(total, "Local end-of-input, remote writer shut down");
            return Ok(total);
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(RelayError::UploadWrite)?;
        writer.flush().await.map_err(RelayError::UploadWrite)?;
        total += n as u64;
        progress.store(total, Ordering::Relaxed);
        trace!(bytes = n, total, "Forwarded local chunk");
    }
}

async fn download<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DOWNLOAD_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(RelayError::DownloadRead)?;
        if n == 0 {
            return Ok(total);
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(RelayError::DownloadWrite)?;
        writer.flush().await.map_err(RelayError::DownloadWrite)?;
        total += n as u64;
        trace!(bytes = n, total, "Delivered remote chunk");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{ReadBuf, duplex};
    use tokio::sync::mpsc;

    use super::*;

    /// Reader that yields its data and then fails.
    struct FailingReader {
        data: Option<Vec<u8>>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut().data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::other("stdin exploded"))),
            }
        }
    }

    /// Writer that rejects everything.
    struct RejectingWriter;

    impl AsyncWrite for RejectingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer recording the size of every write call.
    struct ChunkRecorder {
        tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    impl AsyncWrite for ChunkRecorder {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let _ = self.tx.send(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn copies_both_directions() {
        let upload_data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let download_data: Vec<u8> = (0..7000u32).map(|i| (i % 241) as u8).collect();

        let (mut remote_peer, remote_end) = duplex(64 * 1024);
        let (remote_reader, remote_writer) = tokio::io::split(remote_end);
        let mut local_out = Vec::new();

        let expected_download = download_data.clone();
        let peer = tokio::spawn(async move {
            remote_peer.write_all(&expected_download).await.unwrap();
            let mut received = Vec::new();
            // Upload side half-closes after all of `upload_data`.
            remote_peer.read_to_end(&mut received).await.unwrap();
            remote_peer.shutdown().await.unwrap();
            received
        });

        let stats = Relay::new()
            .run(
                std::io::Cursor::new(upload_data.clone()),
                &mut local_out,
                remote_reader,
                remote_writer,
            )
            .await
            .unwrap();

        assert_eq!(peer.await.unwrap(), upload_data);
        assert_eq!(local_out, download_data);
        assert_eq!(stats.uploaded, 5000);
        assert_eq!(stats.downloaded, 7000);
    }

    #[tokio::test]
    async fn upload_chunks_are_bounded_and_nonempty() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = ChunkRecorder { tx };
        let data = vec![7u8; 2500];

        Relay::new()
            .run(
                std::io::Cursor::new(data),
                tokio::io::sink(),
                tokio::io::empty(),
                recorder,
            )
            .await
            .unwrap();

        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes.iter().sum::<usize>(), 2500);
        assert!(sizes.iter().all(|&n| n > 0 && n <= DEFAULT_CHUNK_SIZE));
        // The final partial chunk is forwarded before completion.
        assert_eq!(sizes.last(), Some(&(2500 % DEFAULT_CHUNK_SIZE)));
    }

    #[tokio::test]
    async fn local_eof_first_still_delivers_remote_bytes() {
        let (mut remote_peer, remote_end) = duplex(1024);
        let (remote_reader, remote_writer) = tokio::io::split(remote_end);

        let peer = tokio::spawn(async move {
            // Wait for the half-close before answering.
            let mut request = Vec::new();
            remote_peer.read_to_end(&mut request).await.unwrap();
            assert_eq!(request, b"0009done\n");
            for _ in 0..10 {
                remote_peer.write_all(&[b'p'; 500]).await.unwrap();
            }
            remote_peer.shutdown().await.unwrap();
        });

        let mut local_out = Vec::new();
        let stats = Relay::new()
            .run(
                &b"0009done\n"[..],
                &mut local_out,
                remote_reader,
                remote_writer,
            )
            .await
            .unwrap();
        peer.await.unwrap();

        assert_eq!(local_out.len(), 5000);
        assert_eq!(stats.uploaded, 9);
    }

    #[tokio::test]
    async fn upload_read_error_fails_relay() {
        let err = Relay::new()
            .run(
                FailingReader {
                    data: Some(b"partial".to_vec()),
                },
                tokio::io::sink(),
                tokio::io::empty(),
                tokio::io::sink(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UploadRead(_)), "got {err:?}");
        assert_eq!(err.io_error().unwrap().to_string(), "stdin exploded");
    }

    #[tokio::test]
    async fn upload_write_error_not_masked_by_eof() {
        let err = Relay::new()
            .run(
                &b"some bytes"[..],
                tokio::io::sink(),
                tokio::io::empty(),
                RejectingWriter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UploadWrite(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn download_write_error_fails_immediately() {
        // The local reader never finishes; the download failure must not wait for it.
        let (_held_open, pending_local) = duplex(16);
        let err = Relay::new()
            .run(
                pending_local,
                RejectingWriter,
                &b"remote data"[..],
                tokio::io::sink(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DownloadWrite(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn download_read_error_fails_immediately() {
        let (_held_open, pending_local) = duplex(16);
        let err = Relay::new()
            .run(
                pending_local,
                tokio::io::sink(),
                FailingReader { data: None },
                tokio::io::sink(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DownloadRead(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn open_local_input_keeps_session_alive() {
        let (_held_open, pending_local) = duplex(16);
        let relay = Relay::new();
        let relay = relay.run(
            pending_local,
            tokio::io::sink(),
            tokio::io::empty(),
            tokio::io::sink(),
        );
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(100), relay).await;
        assert!(outcome.is_err(), "relay ended before local end-of-input");
    }

    #[tokio::test]
    async fn remote_closed_ends_session_with_local_input_open() {
        let (_held_open, pending_local) = duplex(16);
        let mut local_out = Vec::new();
        let stats = Relay::new()
            .run_until(
                pending_local,
                &mut local_out,
                &b"fatal: gone"[..],
                tokio::io::sink(),
                std::future::ready(()),
            )
            .await
            .unwrap();

        assert_eq!(local_out, b"fatal: gone");
        assert_eq!(stats.downloaded, 11);
        assert_eq!(stats.uploaded, 0);
    }

    #[tokio::test]
    async fn remote_closed_still_drains_download() {
        let (mut remote_peer, remote_reader) = duplex(64);
        let (_held_open, pending_local) = duplex(16);
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();

        let peer = tokio::spawn(async move {
            closed_tx.send(()).unwrap();
            for _ in 0..8 {
                remote_peer.write_all(&[b'x'; 100]).await.unwrap();
            }
        });

        let mut local_out = Vec::new();
        let stats = Relay::new()
            .run_until(
                pending_local,
                &mut local_out,
                remote_reader,
                tokio::io::sink(),
                async {
                    let _ = closed_rx.await;
                },
            )
            .await
            .unwrap();
        peer.await.unwrap();

        assert_eq!(local_out.len(), 800);
        assert_eq!(stats.downloaded, 800);
    }

    #[test]
    fn zero_chunk_size_clamped() {
        assert_eq!(Relay::new().with_chunk_size(0).chunk_size(), 1);
        assert_eq!(Relay::default().chunk_size(), DEFAULT_CHUNK_SIZE);
    }
}
