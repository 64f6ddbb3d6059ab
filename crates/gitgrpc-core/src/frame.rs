//! Byte-stream adapters over a stream of gRPC `Data` frames.
//!
//! [`FrameReader`] turns an inbound `Stream` of frames into an [`AsyncRead`],
//! [`FrameWriter`] turns a bounded `mpsc` sender feeding an outbound stream
//! into an [`AsyncWrite`]. Frame boundaries are an artifact of the transport:
//! the reader hands out bytes regardless of where frames start and end, and
//! the writer emits exactly one frame per `write` call.
//!
//! The read side and the write side share no state, so one task may read
//! while another writes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::PollSender;
use tonic::Status;

use gitgrpc_proto::v1::Data;

/// Result of waiting for the next frame on a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A frame payload, possibly empty.
    Data(Vec<u8>),
    /// The peer finished sending; no more frames will arrive.
    EndOfData,
    /// The transport failed.
    TransportError(Status),
}

/// `AsyncRead` over an inbound frame stream.
///
/// Bytes left over from a frame that did not fit into the caller's buffer
/// are kept and returned by the next read before another frame is polled.
pub struct FrameReader<S> {
    stream: S,
    leftover: Vec<u8>,
    pos: usize,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = Result<Data, Status>> + Unpin,
{
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            leftover: Vec::new(),
            pos: 0,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.leftover[self.pos..]
    }

    /// Poll for the next chunk of the channel.
    ///
    /// Leftover bytes from a partially consumed frame are yielded first as
    /// a single `Data` event.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<ChannelEvent> {
        if !self.buffered().is_empty() {
            let data = self.leftover.split_off(self.pos);
            self.reset_leftover();
            return Poll::Ready(ChannelEvent::Data(data));
        }
        self.poll_frame(cx)
    }

    /// Wait for the next chunk of the channel. See [`Self::poll_event`].
    pub async fn next_event(&mut self) -> ChannelEvent {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Consume the reader, returning the underlying stream.
    ///
    /// Unconsumed leftover bytes are discarded.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn poll_frame(&mut self, cx: &mut Context<'_>) -> Poll<ChannelEvent> {
        let event = match ready!(Pin::new(&mut self.stream).poll_next(cx)) {
            Some(Ok(frame)) => ChannelEvent::Data(frame.data),
            Some(Err(status)) => ChannelEvent::TransportError(status),
            None => ChannelEvent::EndOfData,
        };
        Poll::Ready(event)
    }

    fn reset_leftover(&mut self) {
        self.leftover = Vec::new();
        self.pos = 0;
    }

    fn copy_buffered(&mut self, buf: &mut ReadBuf<'_>) {
        let available = &self.leftover[self.pos..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.pos += n;
        if self.pos == self.leftover.len() {
            self.reset_leftover();
        }
    }
}

impl<S> AsyncRead for FrameReader<S>
where
    S: Stream<Item = Result<Data, Status>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if !this.buffered().is_empty() {
                this.copy_buffered(buf);
                return Poll::Ready(Ok(()));
            }
            match ready!(this.poll_frame(cx)) {
                // An empty read means EOF to every AsyncRead consumer, so
                // empty frames are skipped instead of surfaced.
                ChannelEvent::Data(data) if data.is_empty() => {}
                ChannelEvent::Data(data) => {
                    this.leftover = data;
                    this.pos = 0;
                }
                ChannelEvent::EndOfData => return Poll::Ready(Ok(())),
                ChannelEvent::TransportError(status) => {
                    return Poll::Ready(Err(io::Error::other(status)));
                }
            }
        }
    }
}

/// Item types that can carry one frame payload on an outbound channel.
///
/// The client sends plain `Data` on its request stream; the server's
/// response stream carries `Result<Data, Status>` so the final status can
/// be sent on the same channel.
pub trait FromPayload: Send + Unpin + 'static {
    fn from_payload(data: Vec<u8>) -> Self;
}

impl FromPayload for Data {
    fn from_payload(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl FromPayload for Result<Data, Status> {
    fn from_payload(data: Vec<u8>) -> Self {
        Ok(Data { data })
    }
}

/// `AsyncWrite` that sends each write as exactly one frame.
///
/// Shutting the writer down closes its sender, which ends the outbound
/// stream once no other sender for the same channel is alive. On the client
/// this is the half-close of the request stream.
pub struct FrameWriter<T: FromPayload> {
    sender: PollSender<T>,
}

impl<T: FromPayload> FrameWriter<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self {
            sender: PollSender::new(sender),
        }
    }

    /// Whether the writer was shut down or the receiving side went away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

fn channel_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "frame channel closed")
}

impl<T: FromPayload> AsyncWrite for FrameWriter<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        ready!(this.sender.poll_reserve(cx)).map_err(|_| channel_closed())?;
        this.sender
            .send_item(T::from_payload(buf.to_vec()))
            .map_err(|_| channel_closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sender.close();
        Poll::Ready(Ok(()))
    }
}
