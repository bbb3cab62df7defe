//! Tunnel sessions
//!
//! A [`Session`] is one live connection to the server: the masquerade
//! handshake, the frame channel with its reader/writer/noise tasks, and a
//! client multiplexer on top. The [`SessionSlot`] publishes at most one
//! current session; the supervisor replaces it when it dies.

pub(crate) mod supervisor;

use crate::masquerade::{channel::FrameChannel, handshake, noise, TrafficCounters};
use crate::tunnel::{Multiplexer, TunnelError, TunnelStream};
use std::sync::{Arc, Mutex};

/// One live multiplexed tunnel connection
pub struct Session {
    mux: Multiplexer,
}

impl Session {
    /// Dial the server, perform the masquerade handshake and bring up the
    /// multiplexed channel.
    pub async fn establish(
        server: &str,
        password: &str,
        counters: Arc<TrafficCounters>,
    ) -> crate::Result<Self> {
        let (socket, cipher) = handshake::connect(server, password).await?;
        let (channel, packets) = FrameChannel::open(socket, cipher, counters);
        tokio::spawn(noise::run(packets));
        Ok(Self {
            mux: Multiplexer::client(channel),
        })
    }

    /// Open a new multiplexed stream.
    pub fn open_stream(&self) -> Result<TunnelStream, TunnelError> {
        self.mux.open_stream()
    }

    /// Whether the underlying connection has died.
    pub fn is_closed(&self) -> bool {
        self.mux.is_closed()
    }

    /// Tear the session down.
    pub fn close(&self) {
        self.mux.close();
    }
}

/// Holder of the single current session
#[derive(Default)]
pub struct SessionSlot {
    current: Mutex<Option<Arc<Session>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current session, if any. Callers operate on the
    /// returned handle without holding the slot lock.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.lock().unwrap().clone()
    }

    /// Unpublish a dead session. Returns true when a new dial is needed.
    pub(crate) fn reap(&self) -> bool {
        let mut current = self.current.lock().unwrap();
        match current.as_ref() {
            Some(session) if !session.is_closed() => false,
            Some(_) => {
                if let Some(dead) = current.take() {
                    dead.close();
                }
                true
            }
            None => true,
        }
    }

    /// Publish a freshly established session.
    pub(crate) fn publish(&self, session: Session) {
        *self.current.lock().unwrap() = Some(Arc::new(session));
    }

    /// Tear down and unpublish the current session, if any. The close runs
    /// outside the slot lock.
    pub fn clear(&self) {
        let old = { self.current.lock().unwrap().take() };
        if let Some(session) = old {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_needs_session() {
        let slot = SessionSlot::new();
        assert!(slot.current().is_none());
        assert!(slot.reap());
    }

    #[test]
    fn test_clear_on_empty_slot() {
        let slot = SessionSlot::new();
        slot.clear();
        assert!(slot.current().is_none());
    }
}
