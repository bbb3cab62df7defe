//! HTTP CONNECT proxy
//!
//! Accepts only the CONNECT verb; the socket is taken over after the
//! `200 Connection Established` response and relayed verbatim.

use super::{split_host_port, ProxyContext, ProxyError};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const METHOD_NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Accept loop. Exits when the listener is closed.
pub async fn run(listener: TcpListener, ctx: Arc<ProxyContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("http accept failed: {e}");
                return;
            }
        };
        debug!(%peer, "http proxy connection");
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!("http session ended: {e}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ProxyContext>) -> Result<(), ProxyError> {
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut parts = request_line.split_whitespace();
    let (method, dest) = match (parts.next(), parts.next()) {
        (Some(method), Some(dest)) => (method.to_string(), dest.to_string()),
        _ => return Err(ProxyError::Malformed("empty request line".into())),
    };

    if method != "CONNECT" {
        stream.write_all(METHOD_NOT_ALLOWED).await?;
        return Ok(());
    }

    // Drain the remaining request headers.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
    }

    debug!(%dest, "http connect");

    if let Some((host, port)) = split_host_port(&dest) {
        if ctx.split.should_bypass(&host) {
            debug!(%dest, "bypassing tunnel");
            return match TcpStream::connect((host.as_str(), port)).await {
                Ok(mut direct) => {
                    stream.write_all(ESTABLISHED).await?;
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut direct).await;
                    Ok(())
                }
                Err(e) => {
                    stream.write_all(BAD_GATEWAY).await?;
                    Err(ProxyError::Io(e))
                }
            };
        }
    }

    match ctx.open_tunnel_stream(&dest).await {
        Ok(mut tunnel) => {
            info!(stream = tunnel.id(), %dest, "tunnel stream opened");
            stream.write_all(ESTABLISHED).await?;
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut tunnel).await;
            Ok(())
        }
        Err(e) => {
            stream.write_all(BAD_GATEWAY).await?;
            Err(e)
        }
    }
}
