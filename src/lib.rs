//! # Minewire
//!
//! Client core of a tunnel that carries arbitrary TCP (and UDP) traffic
//! inside what looks, on the wire, like an ordinary Minecraft Java Edition
//! session. A deep-packet-inspection observer sees a player logging into a
//! server and idling; in reality an AEAD-encrypted, stream-multiplexed
//! channel rides the plugin-message and chunk-data packets, and local
//! applications reach it through a SOCKS5 or HTTP CONNECT proxy.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Local Proxy Layer                   │
//! │          (SOCKS5 CONNECT/UDP, HTTP CONNECT)         │
//! ├─────────────────────────────────────────────────────┤
//! │                Multiplexing Layer                   │
//! │        (yamux-framed streams, flow control)         │
//! ├─────────────────────────────────────────────────────┤
//! │                 Masquerade Layer                    │
//! │   (login handshake, AEAD plugin-message channel,    │
//! │        keep-alive echo, background noise)           │
//! ├─────────────────────────────────────────────────────┤
//! │                 Transport Layer                     │
//! │                  (plain TCP)                        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod link;
pub mod masquerade;
pub mod protocol;
pub mod proxy;
pub mod session;
pub mod split;
pub mod tunnel;

pub use config::Config;
pub use engine::Engine;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Masquerade error: {0}")]
    Masquerade(#[from] masquerade::MasqueradeError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("Link error: {0}")]
    Link(#[from] link::LinkError),

    #[error("Configuration error: {0}")]
    Config(String),
}
