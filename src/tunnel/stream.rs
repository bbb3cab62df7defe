//! Multiplexed stream implementation
//!
//! A [`TunnelStream`] is a full-duplex, ordered byte pipe with independent
//! half-close. Reads drain a shared receive buffer filled by the session's
//! reader task; writes turn straight into Data frames, gated by the
//! peer-granted send window.

use super::{
    frame::{Frame, FLAG_FIN, FLAG_RST},
    MuxShared, INITIAL_WINDOW,
};
use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Largest payload put in a single Data frame.
const MAX_DATA_FRAME: usize = 16 * 1024;

/// Receive-side credit is replenished once this many bytes were consumed.
const WINDOW_UPDATE_THRESHOLD: u32 = INITIAL_WINDOW / 2;

pub(crate) struct StreamState {
    recv_buf: BytesMut,
    send_window: u32,
    /// Consumed receive bytes not yet credited back to the peer.
    recv_credit: u32,
    established: bool,
    remote_closed: bool,
    local_closed: bool,
    reset: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

/// Stream state shared between the handle and the session tasks
pub(crate) struct StreamShared {
    pub(crate) id: u32,
    state: Mutex<StreamState>,
}

impl StreamShared {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            state: Mutex::new(StreamState {
                recv_buf: BytesMut::new(),
                send_window: INITIAL_WINDOW,
                recv_credit: 0,
                established: false,
                remote_closed: false,
                local_closed: false,
                reset: false,
                read_waker: None,
                write_waker: None,
            }),
        }
    }

    /// Append inbound payload bytes, waking a pending reader.
    pub(crate) fn push_data(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.recv_buf.extend_from_slice(data);
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
    }

    /// Total bytes currently buffered and unread.
    pub(crate) fn buffered(&self) -> usize {
        self.state.lock().unwrap().recv_buf.len()
    }

    /// Grant additional send window, waking a pending writer.
    pub(crate) fn grow_send_window(&self, delta: u32) {
        let mut state = self.state.lock().unwrap();
        state.send_window = state.send_window.saturating_add(delta);
        if let Some(waker) = state.write_waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn mark_established(&self) {
        self.state.lock().unwrap().established = true;
    }

    pub(crate) fn is_established(&self) -> bool {
        self.state.lock().unwrap().established
    }

    /// Remote half-close: buffered data stays readable, then EOF.
    pub(crate) fn remote_close(&self) {
        let mut state = self.state.lock().unwrap();
        state.remote_closed = true;
        wake_both(&mut state);
    }

    /// Hard reset; all pending and future operations fail.
    pub(crate) fn kill(&self) {
        let mut state = self.state.lock().unwrap();
        state.reset = true;
        wake_both(&mut state);
    }
}

fn wake_both(state: &mut StreamState) {
    if let Some(waker) = state.read_waker.take() {
        waker.wake();
    }
    if let Some(waker) = state.write_waker.take() {
        waker.wake();
    }
}

/// A multiplexed stream within the tunnel
pub struct TunnelStream {
    shared: Arc<StreamShared>,
    mux: Arc<MuxShared>,
}

impl TunnelStream {
    pub(crate) fn new(shared: Arc<StreamShared>, mux: Arc<MuxShared>) -> Self {
        Self { shared, mux }
    }

    /// Stream ID
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    fn send_frame(&self, frame: Frame) -> io::Result<()> {
        self.mux
            .send_frame(frame)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.reset {
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        if !state.recv_buf.is_empty() {
            let n = state.recv_buf.len().min(buf.remaining());
            let chunk = state.recv_buf.split_to(n);
            buf.put_slice(&chunk);

            state.recv_credit += n as u32;
            if state.recv_credit >= WINDOW_UPDATE_THRESHOLD {
                let delta = state.recv_credit;
                state.recv_credit = 0;
                drop(state);
                // Best effort: a failed send means the session is dying and
                // the next read will surface the reset.
                let _ = self
                    .mux
                    .send_frame(Frame::window_update(self.shared.id, 0, delta));
            }
            return Poll::Ready(Ok(()));
        }
        if state.remote_closed {
            return Poll::Ready(Ok(())); // EOF
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.reset || state.local_closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if state.send_window == 0 {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf
            .len()
            .min(state.send_window as usize)
            .min(MAX_DATA_FRAME);
        state.send_window -= n as u32;
        drop(state);

        self.send_frame(Frame::data(
            self.shared.id,
            0,
            bytes::Bytes::copy_from_slice(&buf[..n]),
        ))?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.local_closed && !state.reset {
            state.local_closed = true;
            drop(state);
            self.send_frame(Frame::window_update(self.shared.id, FLAG_FIN, 0))?;
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for TunnelStream {
    fn drop(&mut self) {
        let needs_reset = {
            let mut state = self.shared.state.lock().unwrap();
            let clean = state.local_closed && state.remote_closed;
            let needs_reset = !clean && !state.reset;
            state.reset = true;
            needs_reset
        };
        if needs_reset {
            let _ = self
                .mux
                .send_frame(Frame::window_update(self.shared.id, FLAG_RST, 0));
        }
        self.mux.forget_stream(self.shared.id);
    }
}
