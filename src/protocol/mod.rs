//! Minecraft protocol definitions and codecs
//!
//! The masquerade speaks the uncompressed, unencrypted dialect used before
//! a server crosses its compression threshold: every packet on the wire is
//! `VarInt(total_len) ‖ VarInt(packet_id) ‖ body`.

pub mod codec;
pub mod nbt;

use thiserror::Error;

/// Protocol version announced in the handshake (1.21 family).
pub const PROTOCOL_VERSION: i32 = 773;

// Serverbound packet ids.
pub const SB_HANDSHAKE: i32 = 0x00;
pub const SB_LOGIN_START: i32 = 0x00;
pub const SB_CLIENT_SETTINGS: i32 = 0x08;
pub const SB_PLUGIN_MESSAGE: i32 = 0x0D;
pub const SB_PLAYER_POSITION: i32 = 0x14;
pub const SB_KEEP_ALIVE: i32 = 0x15;

// Clientbound packet ids.
pub const CB_KEEP_ALIVE: i32 = 0x24;
pub const CB_CHUNK_DATA: i32 = 0x25;

/// Plugin-message channel carrying the encrypted payload.
pub const PLUGIN_CHANNEL: &str = "minecraft:brand";

/// Upper bound on a framed packet body (2 MiB).
pub const MAX_PACKET_SIZE: i32 = 2_097_152;

/// Longest string the codec accepts on read.
pub const MAX_STRING_SIZE: usize = 32_773;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("varint is too long")]
    VarIntTooLong,

    #[error("string exceeds {MAX_STRING_SIZE} bytes")]
    StringTooLong,

    #[error("packet length {0} out of bounds")]
    PacketLength(i32),

    #[error("unexpected end of packet: need {0} more bytes")]
    EndOfPacket(usize),

    #[error("invalid UTF-8 in string")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("unknown NBT tag type: {0}")]
    UnknownNbtTag(u8),

    #[error("NBT nesting too deep")]
    NbtTooDeep,
}
