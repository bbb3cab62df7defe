//! Local proxy front-ends
//!
//! SOCKS5 and HTTP CONNECT servers that accept local clients and feed
//! their traffic into the current tunnel session, or dial directly when a
//! split-tunnel rule says to bypass.

pub mod http;
pub mod socks5;

use crate::protocol::codec::Encoder;
use crate::session::SessionSlot;
use crate::split::SplitTunnel;
use crate::tunnel::TunnelStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid SOCKS version: {0}")]
    InvalidSocksVersion(u8),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("address type not supported: {0}")]
    UnsupportedAddressType(u8),

    #[error("no tunnel session available")]
    NoSession,

    #[error("tunnel error: {0}")]
    Tunnel(#[from] crate::tunnel::TunnelError),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("timed out")]
    Timeout,
}

/// Everything a proxy connection needs to route a request
pub struct ProxyContext {
    pub slot: Arc<SessionSlot>,
    pub split: Arc<SplitTunnel>,
}

impl ProxyContext {
    /// Open a tunnel stream to `dest` and write the length-prefixed
    /// destination preamble.
    pub(crate) async fn open_tunnel_stream(&self, dest: &str) -> Result<TunnelStream, ProxyError> {
        let session = self.slot.current().ok_or(ProxyError::NoSession)?;
        let mut stream = session.open_stream()?;

        let mut preamble = Vec::with_capacity(dest.len() + 5);
        Encoder::new(&mut preamble).write_string(dest);
        stream.write_all(&preamble).await?;
        Ok(stream)
    }
}

/// Split a `host:port` destination, stripping IPv6 brackets from the host.
pub(crate) fn split_host_port(dest: &str) -> Option<(String, u16)> {
    let (host, port) = dest.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port.parse().ok()?))
}
