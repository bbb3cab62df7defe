//! The Minecraft disguise layer
//!
//! Everything a DPI box gets to see: a vanilla-looking login handshake, an
//! idling player, keep-alive echoes, and plugin-message packets whose
//! payload happens to be AEAD ciphertext. Inbound tunnel data is recovered
//! from chunk-data packets.

pub mod channel;
pub mod handshake;
pub mod noise;

pub use channel::{FrameChannel, TrafficCounters};

use thiserror::Error;

/// Queue of ready-to-send Minecraft packets, drained by a session's socket
/// writer task. Keep-alive echoes and background noise use it to jump past
/// the channel's write buffer.
pub(crate) type PacketSink = tokio::sync::mpsc::UnboundedSender<bytes::Bytes>;

/// Masquerade layer errors
#[derive(Debug, Error)]
pub enum MasqueradeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("handshake timed out")]
    Timeout,
}
