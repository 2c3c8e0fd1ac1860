//! Frame transports.
//!
//! A [`Session`](crate::Session) only needs something that moves whole
//! encoded envelopes in both directions. Byte streams get the
//! `[u32 big-endian length][envelope]` framing from
//! [`devproxy_proto::frame`]; message-oriented channels carry one envelope
//! per message.

use std::future::Future;
use std::io;

use devproxy_proto::{FrameBuffer, MAX_FRAME, frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Receiving half of a transport.
pub trait FrameRead: Send + 'static {
    /// Reads the next frame; `None` means the peer closed the transport.
    fn read_frame(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// Sending half of a transport.
pub trait FrameWrite: Send + 'static {
    /// Writes one frame.
    fn write_frame(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// A bidirectional frame transport.
pub trait Transport {
    /// Receiving half.
    type Reader: FrameRead;
    /// Sending half.
    type Writer: FrameWrite;

    /// Splits the transport so both halves can be driven concurrently.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// Length-prefixed framing over any async byte stream.
///
/// ```no_run
/// # async fn example() -> devproxy::Result<()> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
/// let session = devproxy::Session::connect(
///     devproxy::StreamTransport::new(stream),
///     devproxy::SessionConfig::default(),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StreamTransport<S> {
    /// The byte stream.
    stream: S,
    /// Largest accepted inbound frame.
    max_frame: usize,
}

impl<S> StreamTransport<S> {
    /// Wraps `stream`, accepting frames up to [`MAX_FRAME`].
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame: MAX_FRAME,
        }
    }

    /// Sets the inbound frame size limit.
    #[must_use]
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = StreamReader<ReadHalf<S>>;
    type Writer = StreamWriter<WriteHalf<S>>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (r, w) = tokio::io::split(self.stream);
        (
            StreamReader {
                inner: r,
                frames: FrameBuffer::new(self.max_frame),
                chunk: vec![0; 8192],
            },
            StreamWriter { inner: w },
        )
    }
}

/// Receiving half of a [`StreamTransport`].
#[derive(Debug)]
pub struct StreamReader<R> {
    /// The byte stream.
    inner: R,
    /// Partially received frames.
    frames: FrameBuffer,
    /// Read scratch space.
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send + 'static> FrameRead for StreamReader<R> {
    async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self
                .frames
                .next_frame()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                return Ok(Some(frame));
            }
            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                return if self.frames.buffered() == 0 {
                    Ok(None)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended inside a frame",
                    ))
                };
            }
            self.frames.extend(&self.chunk[..n]);
        }
    }
}

/// Sending half of a [`StreamTransport`].
#[derive(Debug)]
pub struct StreamWriter<W> {
    /// The byte stream.
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send + 'static> FrameWrite for StreamWriter<W> {
    async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.inner.write_all(&frame::header(payload.len())?).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await
    }
}

/// One end of an in-process, message-oriented transport.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Frames to the other end.
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Frames from the other end.
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn into_split(self) -> (MemoryReader, MemoryWriter) {
        (MemoryReader(self.rx), MemoryWriter(self.tx))
    }
}

/// Receiving half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryReader(mpsc::UnboundedReceiver<Vec<u8>>);

impl FrameRead for MemoryReader {
    async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.0.recv().await)
    }
}

/// Sending half of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryWriter(mpsc::UnboundedSender<Vec<u8>>);

impl FrameWrite for MemoryWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.0
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_transport_frames_both_ways() {
        let (a, b) = tokio::io::duplex(7);
        let (mut a_read, mut a_write) = StreamTransport::new(a).into_split();
        let (mut b_read, mut b_write) = StreamTransport::new(b).into_split();

        let writer = tokio::spawn(async move {
            a_write.write_frame(b"first frame").await.unwrap();
            a_write.write_frame(b"").await.unwrap();
            a_write
        });
        assert_eq!(b_read.read_frame().await.unwrap().unwrap(), b"first frame");
        assert_eq!(b_read.read_frame().await.unwrap().unwrap(), b"");
        drop(writer.await.unwrap());

        b_write.write_frame(b"reply").await.unwrap();
        assert_eq!(a_read.read_frame().await.unwrap().unwrap(), b"reply");
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (a, b) = tokio::io::duplex(64);
        let (mut reader, _writer) = StreamTransport::new(a).into_split();
        drop(b);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_error() {
        let (a, mut b) = tokio::io::duplex(64);
        let (mut reader, _writer) = StreamTransport::new(a).into_split();
        b.write_all(&[0, 0, 0, 9, 1, 2]).await.unwrap();
        drop(b);
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (a, mut b) = tokio::io::duplex(64);
        let (mut reader, _writer) = StreamTransport::new(a).with_max_frame(4).into_split();
        b.write_all(&[0, 0, 0, 5]).await.unwrap();
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn memory_pair_is_connected() {
        let (a, b) = MemoryTransport::pair();
        let (_a_read, mut a_write) = a.into_split();
        let (mut b_read, b_write) = b.into_split();
        a_write.write_frame(b"ping").await.unwrap();
        assert_eq!(b_read.read_frame().await.unwrap().unwrap(), b"ping");
        drop(b_write);
        drop(a_write);
        assert!(b_read.read_frame().await.unwrap().is_none());
    }
}
