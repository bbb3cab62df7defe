//! Login handshake
//!
//! Produces a traffic signature indistinguishable from a vanilla client up
//! to the point where plugin messages begin flowing: handshake, login
//! start, two discarded server responses, client settings.

use super::MasqueradeError;
use crate::crypto::{derive_key, masquerade_username, Cipher};
use crate::protocol::{
    codec::{self, Encoder},
    PROTOCOL_VERSION, SB_CLIENT_SETTINGS, SB_HANDSHAKE, SB_LOGIN_START,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_READ_TIMEOUT: Duration = Duration::from_secs(15);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Host and port announced in the handshake packet. The server ignores
/// them; a vanilla-looking pair is all that matters.
const ANNOUNCED_HOST: &str = "127.0.0.1";
const ANNOUNCED_PORT: u16 = 25565;

/// Connect to `server` and perform the login sequence, returning the
/// authenticated socket and the session cipher.
pub async fn connect(server: &str, password: &str) -> Result<(TcpStream, Cipher), MasqueradeError> {
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(server))
        .await
        .map_err(|_| MasqueradeError::Timeout)??;
    stream.set_nodelay(true)?;
    socket2::SockRef::from(&stream)
        .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD))?;

    let mut body = Vec::with_capacity(64);
    {
        let mut enc = Encoder::new(&mut body);
        enc.write_var_int(PROTOCOL_VERSION);
        enc.write_string(ANNOUNCED_HOST);
        enc.write_u16(ANNOUNCED_PORT);
        enc.write_var_int(2); // next state: login
    }
    stream
        .write_all(&codec::encode_packet(SB_HANDSHAKE, &body))
        .await?;

    let username = masquerade_username(password);
    body.clear();
    Encoder::new(&mut body).write_string(&username);
    stream
        .write_all(&codec::encode_packet(SB_LOGIN_START, &body))
        .await?;

    // Login success plus the first play packet. Bodies are not interpreted,
    // only framed.
    for _ in 0..2 {
        timeout(LOGIN_READ_TIMEOUT, codec::read_packet(&mut stream))
            .await
            .map_err(|_| MasqueradeError::Timeout)??;
    }

    body.clear();
    {
        let mut enc = Encoder::new(&mut body);
        enc.write_string("en_US");
        enc.write_u8(8); // view distance
        enc.write_var_int(0); // chat mode: enabled
        enc.write_bool(true); // chat colors
        enc.write_u8(0x7F); // displayed skin parts
        enc.write_var_int(1); // main hand: right
        enc.write_bool(false); // disable text filtering
        enc.write_bool(true); // allow server listings
    }
    stream
        .write_all(&codec::encode_packet(SB_CLIENT_SETTINGS, &body))
        .await?;

    let cipher = Cipher::new(&derive_key(password))?;
    debug!(%username, "login handshake complete");
    Ok((stream, cipher))
}
