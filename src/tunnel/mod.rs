//! Stream multiplexing over the frame channel
//!
//! A client-role multiplexer speaking the yamux framing: 12-byte headers,
//! Data / WindowUpdate / Ping / GoAway frames, credit-based flow control
//! and independent half-close per stream. Runs over any byte-duplex
//! transport; in production that is the masquerade frame channel.
//!
//! There is no explicit cancellation: the writer task owns the transport's
//! write half and shuts it down when it exits, the reader exits when the
//! transport does, and every other task exits once the writer is gone.

mod frame;
mod stream;

pub use frame::{Frame, FrameType, Header, FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN, HEADER_SIZE};
pub use stream::TunnelStream;

use frame::GO_AWAY_NORMAL;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream::StreamShared;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Initial per-stream flow-control window (256 KiB)
pub const INITIAL_WINDOW: u32 = 256 * 1024;

/// Hard cap on bytes buffered for one stream (512 KiB)
pub const MAX_STREAM_WINDOW: u32 = 512 * 1024;

/// Interval between keepalive pings
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for a single write on the underlying connection
pub const CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a freshly opened stream may wait for the peer's acknowledgement
pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("session is closed")]
    SessionClosed,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared between the stream handles and the session tasks
pub(crate) struct MuxShared {
    streams: Mutex<HashMap<u32, Arc<StreamShared>>>,
    frame_tx: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
    next_stream_id: AtomicU32,
}

impl MuxShared {
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), TunnelError> {
        self.frame_tx
            .send(frame)
            .map_err(|_| TunnelError::SessionClosed)
    }

    pub(crate) fn forget_stream(&self, id: u32) {
        self.streams.lock().unwrap().remove(&id);
    }

    fn lookup(&self, id: u32) -> Option<Arc<StreamShared>> {
        self.streams.lock().unwrap().get(&id).cloned()
    }

    /// Marks the session dead and fails every live stream. Idempotent.
    fn fail(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.frame_tx.send(Frame::go_away(GO_AWAY_NORMAL));
        let streams: Vec<_> = self
            .streams
            .lock()
            .unwrap()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for stream in streams {
            stream.kill();
        }
    }

    fn handle_frame(&self, header: Header, payload: &[u8]) {
        if header.flags & FLAG_SYN != 0 {
            // Client role: refuse streams the server tries to open.
            debug!(stream = header.stream_id, "rejecting server-opened stream");
            let _ = self.send_frame(Frame::window_update(header.stream_id, FLAG_RST, 0));
            return;
        }
        let Some(stream) = self.lookup(header.stream_id) else {
            trace!(stream = header.stream_id, "frame for unknown stream");
            return;
        };
        stream.mark_established();
        if header.frame_type == FrameType::Data && !payload.is_empty() {
            if stream.buffered() + payload.len() > MAX_STREAM_WINDOW as usize {
                warn!(stream = header.stream_id, "receive window violated");
                let _ = self.send_frame(Frame::window_update(header.stream_id, FLAG_RST, 0));
                stream.kill();
                self.forget_stream(header.stream_id);
                return;
            }
            stream.push_data(payload);
        }
        if header.frame_type == FrameType::WindowUpdate && header.length > 0 {
            stream.grow_send_window(header.length);
        }
        if header.flags & FLAG_FIN != 0 {
            stream.remote_close();
        }
        if header.flags & FLAG_RST != 0 {
            stream.kill();
            self.forget_stream(header.stream_id);
        }
    }
}

/// Client-side stream multiplexer
pub struct Multiplexer {
    shared: Arc<MuxShared>,
}

impl Multiplexer {
    /// Start a client multiplexer over `io`, spawning its reader, writer
    /// and keepalive tasks.
    pub fn client<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MuxShared {
            streams: Mutex::new(HashMap::new()),
            frame_tx,
            closed: AtomicBool::new(false),
            // Odd ids for the client side.
            next_stream_id: AtomicU32::new(1),
        });

        tokio::spawn(write_loop(Arc::clone(&shared), write_half, frame_rx));
        tokio::spawn(read_loop(Arc::clone(&shared), read_half));
        tokio::spawn(keep_alive_loop(Arc::clone(&shared)));

        Self { shared }
    }

    /// Open a new outbound stream.
    ///
    /// Returns immediately; if the server never acknowledges the stream it
    /// is reset after [`STREAM_OPEN_TIMEOUT`].
    pub fn open_stream(&self) -> Result<TunnelStream, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::SessionClosed);
        }
        let id = self.shared.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let stream = Arc::new(StreamShared::new(id));
        self.shared
            .streams
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&stream));
        self.shared
            .send_frame(Frame::window_update(id, FLAG_SYN, 0))?;

        let shared = Arc::clone(&self.shared);
        let pending = Arc::clone(&stream);
        tokio::spawn(async move {
            tokio::time::sleep(STREAM_OPEN_TIMEOUT).await;
            if !pending.is_established() {
                debug!(stream = id, "stream open timed out");
                let _ = shared.send_frame(Frame::window_update(id, FLAG_RST, 0));
                pending.kill();
                shared.forget_stream(id);
            }
        });

        Ok(TunnelStream::new(stream, Arc::clone(&self.shared)))
    }

    /// Whether the session has terminated.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Terminate the session: a GoAway is flushed, every stream fails and
    /// the transport is shut down.
    pub fn close(&self) {
        self.shared.fail();
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shared.fail();
    }
}

async fn write_loop<W>(
    shared: Arc<MuxShared>,
    mut writer: tokio::io::WriteHalf<W>,
    mut frame_rx: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Send + 'static,
{
    while let Some(frame) = frame_rx.recv().await {
        let is_go_away = frame.frame_type == FrameType::GoAway;
        let bytes = frame.encode();
        match tokio::time::timeout(CONNECTION_WRITE_TIMEOUT, writer.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("tunnel write failed: {e}");
                break;
            }
            Err(_) => {
                warn!("tunnel write timed out");
                break;
            }
        }
        if is_go_away {
            break;
        }
    }
    let _ = writer.shutdown().await;
    shared.fail();
}

async fn read_loop<R>(shared: Arc<MuxShared>, mut reader: tokio::io::ReadHalf<R>)
where
    R: AsyncRead + Send + 'static,
{
    let mut payload = Vec::new();
    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        let mut header_bytes = [0u8; HEADER_SIZE];
        if reader.read_exact(&mut header_bytes).await.is_err() {
            break;
        }
        let header = match Header::decode(&header_bytes) {
            Ok(h) => h,
            Err(e) => {
                debug!("tunnel reader exiting: {e}");
                break;
            }
        };
        match header.frame_type {
            FrameType::Data => {
                if header.length > MAX_STREAM_WINDOW {
                    debug!(length = header.length, "oversized data frame");
                    break;
                }
                payload.resize(header.length as usize, 0);
                if reader.read_exact(&mut payload).await.is_err() {
                    break;
                }
                shared.handle_frame(header, &payload);
            }
            FrameType::WindowUpdate => shared.handle_frame(header, &[]),
            FrameType::Ping => {
                if header.flags & FLAG_SYN != 0
                    && shared.send_frame(Frame::ping(FLAG_ACK, header.length)).is_err()
                {
                    break;
                }
            }
            FrameType::GoAway => {
                debug!(code = header.length, "server sent go-away");
                break;
            }
        }
    }
    shared.fail();
}

async fn keep_alive_loop(shared: Arc<MuxShared>) {
    let mut opaque = 0u32;
    loop {
        tokio::time::sleep(KEEP_ALIVE_INTERVAL).await;
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        opaque = opaque.wrapping_add(1);
        if shared.send_frame(Frame::ping(FLAG_SYN, opaque)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_header(io: &mut tokio::io::DuplexStream) -> Header {
        let mut buf = [0u8; HEADER_SIZE];
        io.read_exact(&mut buf).await.unwrap();
        Header::decode(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_open_stream_sends_syn() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);

        let stream = mux.open_stream().unwrap();
        assert_eq!(stream.id(), 1);

        let header = read_header(&mut server_io).await;
        assert_eq!(header.frame_type, FrameType::WindowUpdate);
        assert_eq!(header.flags, FLAG_SYN);
        assert_eq!(header.stream_id, 1);
    }

    #[tokio::test]
    async fn test_stream_ids_are_odd() {
        let (client_io, _server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);
        let ids: Vec<u32> = (0..3).map(|_| mux.open_stream().unwrap().id()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_data_roundtrip() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);
        let mut stream = mux.open_stream().unwrap();

        // Consume the SYN.
        read_header(&mut server_io).await;

        stream.write_all(b"hello").await.unwrap();
        let header = read_header(&mut server_io).await;
        assert_eq!(header.frame_type, FrameType::Data);
        assert_eq!(header.stream_id, 1);
        assert_eq!(header.length, 5);
        let mut payload = [0u8; 5];
        server_io.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");

        // Server replies with ACK + data, then half-closes.
        let reply = Frame::data(1, FLAG_ACK, Bytes::from_static(b"world"));
        server_io.write_all(&reply.encode()).await.unwrap();
        let fin = Frame::window_update(1, FLAG_FIN, 0);
        server_io.write_all(&fin.encode()).await.unwrap();

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"world");
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let _mux = Multiplexer::client(client_io);

        let ping = Frame::ping(FLAG_SYN, 0xBEEF);
        server_io.write_all(&ping.encode()).await.unwrap();

        let header = read_header(&mut server_io).await;
        assert_eq!(header.frame_type, FrameType::Ping);
        assert_eq!(header.flags, FLAG_ACK);
        assert_eq!(header.length, 0xBEEF);
    }

    #[tokio::test]
    async fn test_close_sends_go_away() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);

        mux.close();
        assert!(mux.is_closed());
        let header = read_header(&mut server_io).await;
        assert_eq!(header.frame_type, FrameType::GoAway);
        assert!(mux.open_stream().is_err());
    }

    #[tokio::test]
    async fn test_transport_loss_closes_session() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);
        drop(server_io);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !mux.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should observe transport loss");
    }

    #[tokio::test]
    async fn test_reset_fails_stream() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let mux = Multiplexer::client(client_io);
        let mut stream = mux.open_stream().unwrap();
        read_header(&mut server_io).await;

        let rst = Frame::window_update(1, FLAG_RST, 0);
        server_io.write_all(&rst.encode()).await.unwrap();

        let mut buf = [0u8; 16];
        let err = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }
}
