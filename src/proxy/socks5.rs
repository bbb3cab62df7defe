//! SOCKS5 proxy implementation (RFC 1928)
//!
//! CONNECT opens one tunnel stream per client; UDP ASSOCIATE opens one
//! short-lived stream per datagram, framed as `u16 length ‖ payload` with
//! a single request/response exchange.

use super::{ProxyContext, ProxyError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info};

const SOCKS_VERSION: u8 = 0x05;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCESS: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
const REPLY_FAILURE: [u8; 10] = [0x05, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

/// Zero-address SOCKS UDP header prefixed to relayed responses.
const UDP_REPLY_HEADER: [u8; 10] = [0, 0, 0, 1, 0, 0, 0, 0, 0, 0];

const UDP_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept loop. Exits when the listener is closed.
pub async fn run(listener: TcpListener, ctx: Arc<ProxyContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("socks5 accept failed: {e}");
                return;
            }
        };
        debug!(%peer, "socks5 connection");
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!("socks5 session ended: {e}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ProxyContext>) -> Result<(), ProxyError> {
    let mut buf = [0u8; 260];

    // Method selection; always answer no-auth.
    stream.read_exact(&mut buf[..2]).await?;
    if buf[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(buf[0]));
    }
    let nmethods = buf[1] as usize;
    stream.read_exact(&mut buf[..nmethods]).await?;
    stream.write_all(&[SOCKS_VERSION, 0x00]).await?;

    // Request header.
    stream.read_exact(&mut buf[..4]).await?;
    if buf[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(buf[0]));
    }
    let cmd = buf[1];
    let atyp = buf[3];

    match cmd {
        CMD_CONNECT => {
            let (host, port) = read_destination(&mut stream, atyp).await?;
            handle_connect(stream, ctx, host, port).await
        }
        CMD_UDP_ASSOCIATE => {
            // The request's address is where the client *may* send from;
            // it plays no part in routing.
            read_destination(&mut stream, atyp).await?;
            handle_udp_associate(stream, ctx).await
        }
        other => Err(ProxyError::UnsupportedCommand(other)),
    }
}

async fn read_destination(stream: &mut TcpStream, atyp: u8) -> Result<(String, u16), ProxyError> {
    let host = match atyp {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            Ipv4Addr::from(ip).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).to_string()
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            Ipv6Addr::from(ip).to_string()
        }
        other => return Err(ProxyError::UnsupportedAddressType(other)),
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok((host, u16::from_be_bytes(port)))
}

fn format_dest(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

async fn handle_connect(
    mut stream: TcpStream,
    ctx: Arc<ProxyContext>,
    host: String,
    port: u16,
) -> Result<(), ProxyError> {
    let dest = format_dest(&host, port);

    if ctx.split.should_bypass(&host) {
        debug!(%dest, "bypassing tunnel");
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(mut direct) => {
                stream.write_all(&REPLY_SUCCESS).await?;
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut direct).await;
                Ok(())
            }
            Err(e) => {
                stream.write_all(&REPLY_FAILURE).await?;
                Err(ProxyError::Io(e))
            }
        }
    } else {
        match ctx.open_tunnel_stream(&dest).await {
            Ok(mut tunnel) => {
                info!(stream = tunnel.id(), %dest, "tunnel stream opened");
                stream.write_all(&REPLY_SUCCESS).await?;
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut tunnel).await;
                Ok(())
            }
            Err(e) => {
                stream.write_all(&REPLY_FAILURE).await?;
                Err(e)
            }
        }
    }
}

async fn handle_udp_associate(
    mut control: TcpStream,
    ctx: Arc<ProxyContext>,
) -> Result<(), ProxyError> {
    let udp = match UdpSocket::bind("127.0.0.1:0").await {
        Ok(socket) => Arc::new(socket),
        Err(_) => {
            control.write_all(&REPLY_FAILURE).await?;
            return Ok(());
        }
    };

    let local = udp.local_addr()?;
    let mut reply = Vec::with_capacity(10);
    reply.extend_from_slice(&[SOCKS_VERSION, 0x00, 0x00, ATYP_IPV4]);
    match local.ip() {
        IpAddr::V4(ip) => reply.extend_from_slice(&ip.octets()),
        IpAddr::V6(_) => reply.extend_from_slice(&[0, 0, 0, 0]),
    }
    reply.extend_from_slice(&local.port().to_be_bytes());
    control.write_all(&reply).await?;
    debug!(%local, "udp associate bound");

    let relay = {
        let udp = Arc::clone(&udp);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            loop {
                let (n, client) = match udp.recv_from(&mut buf).await {
                    Ok(recv) => recv,
                    Err(_) => return,
                };
                let Some((dest, payload)) = parse_udp_request(&buf[..n]) else {
                    continue;
                };
                let ctx = Arc::clone(&ctx);
                let udp = Arc::clone(&udp);
                let payload = payload.to_vec();
                tokio::spawn(async move {
                    if let Err(e) = relay_datagram(ctx, udp, client, dest, payload).await {
                        debug!("udp relay failed: {e}");
                    }
                });
            }
        })
    };

    // The TCP control connection pins the association; EOF tears it down.
    let mut sink = [0u8; 512];
    loop {
        match control.read(&mut sink).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    relay.abort();
    Ok(())
}

/// Parse a SOCKS UDP request: `RSV(2) FRAG(1) ATYP(1) DST.ADDR DST.PORT
/// PAYLOAD`. Fragmented datagrams are dropped.
fn parse_udp_request(buf: &[u8]) -> Option<(String, &[u8])> {
    if buf.len() < 4 || buf[2] != 0 {
        return None;
    }
    let atyp = buf[3];
    let mut pos = 4;
    let host = match atyp {
        ATYP_IPV4 => {
            let octets: [u8; 4] = buf.get(pos..pos + 4)?.try_into().ok()?;
            pos += 4;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = *buf.get(pos)? as usize;
            pos += 1;
            let name = buf.get(pos..pos + len)?;
            pos += len;
            String::from_utf8_lossy(name).to_string()
        }
        ATYP_IPV6 => {
            let octets: [u8; 16] = buf.get(pos..pos + 16)?.try_into().ok()?;
            pos += 16;
            Ipv6Addr::from(octets).to_string()
        }
        _ => return None,
    };
    let port_bytes = buf.get(pos..pos + 2)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    pos += 2;
    Some((format_dest(&host, port), &buf[pos..]))
}

/// One datagram, one stream: `String("udp:" + dest)`, then
/// `u16 len ‖ payload`, one `u16 len ‖ response` back.
async fn relay_datagram(
    ctx: Arc<ProxyContext>,
    udp: Arc<UdpSocket>,
    client: SocketAddr,
    dest: String,
    payload: Vec<u8>,
) -> Result<(), ProxyError> {
    let mut stream = ctx.open_tunnel_stream(&format!("udp:{dest}")).await?;

    stream
        .write_all(&(payload.len() as u16).to_be_bytes())
        .await?;
    stream.write_all(&payload).await?;

    let response = tokio::time::timeout(UDP_REPLY_TIMEOUT, async {
        let mut len = [0u8; 2];
        stream.read_exact(&mut len).await?;
        let mut data = vec![0u8; u16::from_be_bytes(len) as usize];
        stream.read_exact(&mut data).await?;
        Ok::<_, std::io::Error>(data)
    })
    .await
    .map_err(|_| ProxyError::Timeout)??;

    let mut packet = Vec::with_capacity(UDP_REPLY_HEADER.len() + response.len());
    packet.extend_from_slice(&UDP_REPLY_HEADER);
    packet.extend_from_slice(&response);
    udp.send_to(&packet, client).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udp_request_ipv4() {
        let mut buf = vec![0, 0, 0, ATYP_IPV4, 8, 8, 8, 8];
        buf.extend(53u16.to_be_bytes());
        buf.extend(b"payload");
        let (dest, payload) = parse_udp_request(&buf).unwrap();
        assert_eq!(dest, "8.8.8.8:53");
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_parse_udp_request_domain() {
        let mut buf = vec![0, 0, 0, ATYP_DOMAIN, 11];
        buf.extend(b"example.com");
        buf.extend(443u16.to_be_bytes());
        buf.extend(b"x");
        let (dest, payload) = parse_udp_request(&buf).unwrap();
        assert_eq!(dest, "example.com:443");
        assert_eq!(payload, b"x");
    }

    #[test]
    fn test_parse_udp_request_drops_fragments() {
        let mut buf = vec![0, 0, 1, ATYP_IPV4, 8, 8, 8, 8];
        buf.extend(53u16.to_be_bytes());
        assert!(parse_udp_request(&buf).is_none());
    }

    #[test]
    fn test_parse_udp_request_truncated() {
        assert!(parse_udp_request(&[0, 0, 0]).is_none());
        assert!(parse_udp_request(&[0, 0, 0, ATYP_IPV4, 8, 8]).is_none());
    }

    #[test]
    fn test_format_dest_brackets_ipv6() {
        assert_eq!(format_dest("2001:db8::1", 443), "[2001:db8::1]:443");
        assert_eq!(format_dest("8.8.8.8", 53), "8.8.8.8:53");
        assert_eq!(format_dest("example.com", 80), "example.com:80");
    }
}
