//! Obfuscated frame channel
//!
//! Presents a reliable byte-duplex over the masquerade socket. Writes are
//! buffered and sealed into serverbound plugin-message packets; reads are
//! recovered from clientbound chunk-data packets by a dedicated reader
//! task, which also echoes keep-alives. A single writer task owns the
//! socket's write half, so echoes and noise packets are serialized with
//! (and ahead of) buffered application data.

use super::PacketSink;
use crate::crypto::{Cipher, NONCE_LEN};
use crate::protocol::{
    codec::{self, Decoder, Encoder},
    nbt, CB_CHUNK_DATA, CB_KEEP_ALIVE, PLUGIN_CHANNEL, SB_KEEP_ALIVE, SB_PLUGIN_MESSAGE,
};
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, ReadHalf, SimplexStream, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Initial write-buffer capacity (16 KiB)
const WRITE_BUF_CAPACITY: usize = 16 * 1024;

/// Buffered bytes that trigger an immediate flush
const FLUSH_THRESHOLD: usize = 4096;

/// Deferred flush delay for sub-threshold writes
const FLUSH_DELAY: Duration = Duration::from_millis(5);

/// Capacity of the inbound plaintext pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Plaintext byte counters for a tunnel's lifetime
#[derive(Debug, Default)]
pub struct TrafficCounters {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl TrafficCounters {
    pub(crate) fn add_uploaded(&self, n: usize) {
        self.uploaded.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_downloaded(&self, n: usize) {
        self.downloaded.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// (uploaded, downloaded) plaintext bytes
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.uploaded.load(Ordering::Relaxed),
            self.downloaded.load(Ordering::Relaxed),
        )
    }
}

struct WriteState {
    buf: Vec<u8>,
    timer_armed: bool,
    /// Bumped on every flush so a stale deferred timer becomes a no-op.
    flush_gen: u64,
}

struct WriteShared {
    state: Mutex<WriteState>,
    cipher: Arc<Cipher>,
    packet_tx: PacketSink,
    counters: Arc<TrafficCounters>,
}

impl WriteShared {
    /// Seals and emits the buffered bytes as exactly one plugin message.
    /// Must be called with `state` locked.
    fn flush_locked(&self, state: &mut WriteState) -> io::Result<()> {
        state.timer_armed = false;
        state.flush_gen += 1;
        if state.buf.is_empty() {
            return Ok(());
        }

        let sealed = self
            .cipher
            .seal(&state.buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.counters.add_uploaded(state.buf.len());
        state.buf.clear();

        let mut body = Vec::with_capacity(16 + sealed.len());
        let mut enc = Encoder::new(&mut body);
        enc.write_string(PLUGIN_CHANNEL);
        enc.write_slice(&sealed);

        self.packet_tx
            .send(codec::encode_packet(SB_PLUGIN_MESSAGE, &body))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

/// The byte-duplex handed to the multiplexer
pub struct FrameChannel {
    pipe: ReadHalf<SimplexStream>,
    write: Arc<WriteShared>,
    reader_abort: AbortHandle,
}

impl FrameChannel {
    /// Wrap an authenticated masquerade socket, spawning the socket reader
    /// and writer tasks. The returned sink carries extra packets
    /// (keep-alive echoes, background noise) straight onto the wire.
    pub fn open(
        stream: TcpStream,
        cipher: Cipher,
        counters: Arc<TrafficCounters>,
    ) -> (Self, PacketSink) {
        let (sock_rd, sock_wr) = stream.into_split();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (pipe_rd, pipe_wr) = tokio::io::simplex(PIPE_CAPACITY);
        let cipher = Arc::new(cipher);

        tokio::spawn(write_loop(sock_wr, packet_rx));
        let reader = tokio::spawn(read_loop(
            sock_rd,
            Arc::clone(&cipher),
            pipe_wr,
            packet_tx.clone(),
            Arc::clone(&counters),
        ));

        let write = Arc::new(WriteShared {
            state: Mutex::new(WriteState {
                buf: Vec::with_capacity(WRITE_BUF_CAPACITY),
                timer_armed: false,
                flush_gen: 0,
            }),
            cipher,
            packet_tx: packet_tx.clone(),
            counters,
        });

        (
            Self {
                pipe: pipe_rd,
                write,
                reader_abort: reader.abort_handle(),
            },
            packet_tx,
        )
    }
}

impl AsyncRead for FrameChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().pipe).poll_read(cx, buf)
    }
}

impl AsyncWrite for FrameChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut state = this.write.state.lock().unwrap();
        state.buf.extend_from_slice(buf);

        if state.buf.len() >= FLUSH_THRESHOLD {
            this.write.flush_locked(&mut state)?;
        } else if !state.timer_armed {
            state.timer_armed = true;
            let gen = state.flush_gen;
            let write = Arc::clone(&this.write);
            tokio::spawn(async move {
                tokio::time::sleep(FLUSH_DELAY).await;
                let mut state = write.state.lock().unwrap();
                if state.timer_armed && state.flush_gen == gen {
                    let _ = write.flush_locked(&mut state);
                }
            });
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut state = this.write.state.lock().unwrap();
        this.write.flush_locked(&mut state)?;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        {
            let mut state = this.write.state.lock().unwrap();
            let _ = this.write.flush_locked(&mut state);
        }
        // An empty packet is the writer task's shutdown sentinel; aborting
        // the reader drops the socket's read half and the inbound pipe.
        let _ = this.write.packet_tx.send(Bytes::new());
        this.reader_abort.abort();
        Poll::Ready(Ok(()))
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut packet_rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(packet) = packet_rx.recv().await {
        if packet.is_empty() {
            break;
        }
        if let Err(e) = writer.write_all(&packet).await {
            debug!("masquerade write failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    socket: OwnedReadHalf,
    cipher: Arc<Cipher>,
    mut pipe: WriteHalf<SimplexStream>,
    packets: PacketSink,
    counters: Arc<TrafficCounters>,
) {
    let mut reader = BufReader::new(socket);
    loop {
        let body = match codec::read_packet(&mut reader).await {
            Ok(body) => body,
            Err(e) => {
                debug!("masquerade reader exiting: {e}");
                break;
            }
        };
        let mut dec = Decoder::new(&body);
        let Ok(packet_id) = dec.read_var_int() else {
            continue;
        };
        match packet_id {
            CB_CHUNK_DATA => {
                let Some(plaintext) = recover_payload(&cipher, dec) else {
                    continue;
                };
                counters.add_downloaded(plaintext.len());
                if pipe.write_all(&plaintext).await.is_err() {
                    break;
                }
            }
            CB_KEEP_ALIVE => {
                let Ok(id) = dec.read_i64() else {
                    continue;
                };
                let mut body = Vec::with_capacity(8);
                Encoder::new(&mut body).write_i64(id);
                if packets
                    .send(codec::encode_packet(SB_KEEP_ALIVE, &body))
                    .is_err()
                {
                    break;
                }
                trace!(id, "echoed keep-alive");
            }
            _ => {}
        }
    }
    // Dropping the pipe writer wakes the multiplexer with EOF; dropping the
    // socket half completes the close.
}

/// Extract and decrypt the tunnel payload hidden in a chunk-data body.
/// Returns `None` for anything that is not ours, including genuine chunk
/// traffic, which fails the AEAD open.
fn recover_payload(cipher: &Cipher, mut dec: Decoder) -> Option<Vec<u8>> {
    dec.skip(8).ok()?;
    nbt::skip_nbt(&mut dec).ok()?;
    let payload_len = dec.read_var_int().ok()?;
    if payload_len < 0 {
        return None;
    }
    let payload = dec.consume_slice(payload_len as usize).ok()?;
    if payload.len() < NONCE_LEN {
        return None;
    }
    cipher.open(payload).ok()
}
