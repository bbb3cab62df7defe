//! Frame encoding/decoding for the multiplexer
//!
//! Frame format (12-byte header, big endian):
//! ```text
//! +---------+---------+-------------------+
//! | Version |  Type   |      Flags        |
//! +---------+---------+-------------------+
//! |              Stream ID                |
//! +---------------------------------------+
//! |               Length                  |
//! +---------------------------------------+
//! |         Payload (Data frames)         |
//! +---------------------------------------+
//! ```
//!
//! `Length` is the payload size for Data frames and carries the window
//! delta, ping opaque value or termination code for the other types.

use super::TunnelError;
use bytes::{BufMut, Bytes, BytesMut};

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Protocol version carried in every header
pub const FRAME_VERSION: u8 = 0;

/// Marks the first frame of a locally opened stream
pub const FLAG_SYN: u16 = 0x1;
/// Acknowledges a stream opened by the peer
pub const FLAG_ACK: u16 = 0x2;
/// Half-closes the sender's direction
pub const FLAG_FIN: u16 = 0x4;
/// Hard-resets the stream
pub const FLAG_RST: u16 = 0x8;

/// Termination code for an orderly shutdown
pub const GO_AWAY_NORMAL: u32 = 0;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload
    Data = 0x0,
    /// Flow-control credit (also the carrier for SYN/ACK/FIN/RST alone)
    WindowUpdate = 0x1,
    /// Keepalive probe or reply
    Ping = 0x2,
    /// Session termination
    GoAway = 0x3,
}

impl TryFrom<u8> for FrameType {
    type Error = TunnelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(FrameType::Data),
            0x1 => Ok(FrameType::WindowUpdate),
            0x2 => Ok(FrameType::Ping),
            0x3 => Ok(FrameType::GoAway),
            _ => Err(TunnelError::InvalidFrame(format!(
                "unknown frame type: {value}"
            ))),
        }
    }
}

/// A decoded frame header
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub frame_type: FrameType,
    pub flags: u16,
    pub stream_id: u32,
    pub length: u32,
}

impl Header {
    /// Decode a wire header
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, TunnelError> {
        if buf[0] != FRAME_VERSION {
            return Err(TunnelError::InvalidFrame(format!(
                "unsupported frame version: {}",
                buf[0]
            )));
        }
        Ok(Self {
            frame_type: FrameType::try_from(buf[1])?,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// An outbound frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u16,
    pub stream_id: u32,
    /// Window delta, ping opaque or go-away code for non-Data frames
    pub length: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Create a data frame
    pub fn data(stream_id: u32, flags: u16, payload: Bytes) -> Self {
        Self {
            frame_type: FrameType::Data,
            flags,
            stream_id,
            length: payload.len() as u32,
            payload,
        }
    }

    /// Create a window update frame
    pub fn window_update(stream_id: u32, flags: u16, delta: u32) -> Self {
        Self {
            frame_type: FrameType::WindowUpdate,
            flags,
            stream_id,
            length: delta,
            payload: Bytes::new(),
        }
    }

    /// Create a ping frame
    pub fn ping(flags: u16, opaque: u32) -> Self {
        Self {
            frame_type: FrameType::Ping,
            flags,
            stream_id: 0,
            length: opaque,
            payload: Bytes::new(),
        }
    }

    /// Create a go-away frame
    pub fn go_away(code: u32) -> Self {
        Self {
            frame_type: FrameType::GoAway,
            flags: 0,
            stream_id: 0,
            length: code,
            payload: Bytes::new(),
        }
    }

    /// Encode the frame for the wire
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(self.frame_type as u8);
        buf.put_u16(self.flags);
        buf.put_u32(self.stream_id);
        buf.put_u32(self.length);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let frame = Frame::data(42, FLAG_FIN, Bytes::from_static(b"Hello, World!"));
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 13);

        let header = Header::decode(&encoded[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.frame_type, FrameType::Data);
        assert_eq!(header.flags, FLAG_FIN);
        assert_eq!(header.stream_id, 42);
        assert_eq!(header.length, 13);
        assert_eq!(&encoded[HEADER_SIZE..], b"Hello, World!");
    }

    #[test]
    fn test_window_update_carries_delta() {
        let encoded = Frame::window_update(7, FLAG_SYN, 256 * 1024).encode();
        let header = Header::decode(&encoded[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.frame_type, FrameType::WindowUpdate);
        assert_eq!(header.flags, FLAG_SYN);
        assert_eq!(header.length, 256 * 1024);
        assert_eq!(encoded.len(), HEADER_SIZE);
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut encoded = BytesMut::from(&Frame::ping(FLAG_SYN, 1).encode()[..]);
        encoded[0] = 9;
        assert!(Header::decode(&encoded[..HEADER_SIZE].try_into().unwrap()).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut encoded = BytesMut::from(&Frame::ping(FLAG_SYN, 1).encode()[..]);
        encoded[1] = 0x7;
        assert!(Header::decode(&encoded[..HEADER_SIZE].try_into().unwrap()).is_err());
    }
}
