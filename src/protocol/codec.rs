//! Encoder/decoder for the Minecraft bitstream
//!
//! VarInts are base-128 little-endian with a continuation bit; strings are
//! VarInt-length-prefixed UTF-8; everything fixed-width is big-endian.

use super::{ProtocolError, MAX_PACKET_SIZE, MAX_STRING_SIZE};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A raw decoder over a borrowed packet body.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder reading from `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes `n` bytes, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if n <= self.buffer.len() {
            let (data, rest) = self.buffer.split_at(n);
            self.buffer = rest;
            Ok(data)
        } else {
            Err(ProtocolError::EndOfPacket(n - self.buffer.len()))
        }
    }

    /// Consumes and discards `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.consume_slice(n).map(|_| ())
    }

    fn consume<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let data = self.consume_slice(N)?;
        Ok(<[u8; N]>::try_from(data).unwrap())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.consume::<1>().map(|[x]| x)
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.consume().map(i8::from_be_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.consume().map(u16::from_be_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.consume().map(i16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.consume().map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.consume().map(i64::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.consume().map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        self.consume().map(f64::from_be_bytes)
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a VarInt (at most 5 bytes).
    pub fn read_var_int(&mut self) -> Result<i32, ProtocolError> {
        let mut num_read = 0u32;
        let mut result = 0i32;
        loop {
            let byte = self.read_u8()?;
            let value = i32::from(byte & 0x7F);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;
            if num_read > 5 {
                return Err(ProtocolError::VarIntTooLong);
            }
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Reads a VarInt-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<&'a str, ProtocolError> {
        let length = self.read_var_int()?;
        if length < 0 || length as usize > MAX_STRING_SIZE {
            return Err(ProtocolError::StringTooLong);
        }
        Ok(std::str::from_utf8(self.consume_slice(length as usize)?)?)
    }
}

/// A raw encoder appending to a byte buffer.
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder appending to `buffer`; existing contents are kept.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn write_u8(&mut self, x: u8) {
        self.buffer.push(x);
    }

    pub fn write_bool(&mut self, x: bool) {
        self.write_u8(u8::from(x));
    }

    pub fn write_u16(&mut self, x: u16) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_i16(&mut self, x: i16) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_i32(&mut self, x: i32) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_i64(&mut self, x: i64) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_f32(&mut self, x: f32) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_f64(&mut self, x: f64) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a series of bytes without any length prefix.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes a VarInt, returning the number of bytes written.
    pub fn write_var_int(&mut self, x: i32) -> usize {
        let mut x = x as u32;
        let mut written = 0;
        loop {
            let mut byte = (x & 0x7F) as u8;
            x >>= 7;
            if x != 0 {
                byte |= 0x80;
            }
            self.buffer.push(byte);
            written += 1;
            if x == 0 {
                break written;
            }
        }
    }

    /// Writes a VarInt-prefixed string.
    pub fn write_string(&mut self, x: &str) {
        self.write_var_int(x.len().try_into().unwrap_or(i32::MAX));
        self.buffer.extend_from_slice(x.as_bytes());
    }
}

/// Frames `body` as a full packet: `VarInt(len) ‖ VarInt(id) ‖ body`.
pub fn encode_packet(packet_id: i32, body: &[u8]) -> Bytes {
    let mut id_buf = Vec::with_capacity(5);
    Encoder::new(&mut id_buf).write_var_int(packet_id);

    let mut out = Vec::with_capacity(5 + id_buf.len() + body.len());
    let mut enc = Encoder::new(&mut out);
    enc.write_var_int((id_buf.len() + body.len()) as i32);
    enc.write_slice(&id_buf);
    enc.write_slice(body);
    Bytes::from(out)
}

/// Reads one VarInt off an async reader, one byte at a time.
pub async fn read_var_int<R>(reader: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut num_read = 0u32;
    let mut result = 0i32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        let value = i32::from(byte[0] & 0x7F);
        result |= value.overflowing_shl(7 * num_read).0;

        num_read += 1;
        if num_read > 5 {
            return Err(ProtocolError::VarIntTooLong);
        }
        if byte[0] & 0x80 == 0 {
            break;
        }
    }
    Ok(result)
}

/// Reads one framed packet body (packet id included), enforcing the
/// 2 MiB length bound.
pub async fn read_packet<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let length = read_var_int(reader).await?;
    if !(0..=MAX_PACKET_SIZE).contains(&length) {
        return Err(ProtocolError::PacketLength(length));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_int_bytes(x: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_var_int(x);
        buf
    }

    #[test]
    fn test_var_int_roundtrip() {
        for x in [0, 1, 2, 127, 128, 255, 300, 25565, 773, 2_097_151, i32::MAX] {
            let buf = var_int_bytes(x);
            assert_eq!(Decoder::new(&buf).read_var_int().unwrap(), x);
        }
    }

    #[test]
    fn test_var_int_known_encodings() {
        assert_eq!(var_int_bytes(0), vec![0x00]);
        assert_eq!(var_int_bytes(127), vec![0x7F]);
        assert_eq!(var_int_bytes(128), vec![0x80, 0x01]);
        assert_eq!(var_int_bytes(773), vec![0x85, 0x06]);
        assert_eq!(var_int_bytes(2_097_151), vec![0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_var_int_too_long() {
        let buf = [0x80u8; 6];
        assert!(matches!(
            Decoder::new(&buf).read_var_int(),
            Err(ProtocolError::VarIntTooLong)
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_string("minecraft:brand");
        assert_eq!(buf[0], 15);
        assert_eq!(Decoder::new(&buf).read_string().unwrap(), "minecraft:brand");
    }

    #[test]
    fn test_string_too_long() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_var_int(MAX_STRING_SIZE as i32 + 1);
        buf.resize(buf.len() + MAX_STRING_SIZE + 1, b'a');
        assert!(matches!(
            Decoder::new(&buf).read_string(),
            Err(ProtocolError::StringTooLong)
        ));
    }

    #[test]
    fn test_primitives_roundtrip() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.write_bool(true);
        enc.write_u8(0x7F);
        enc.write_u16(25565);
        enc.write_i32(-42);
        enc.write_i64(0x0123_4567_89AB_CDEF);
        enc.write_f64(100.5);

        let mut dec = Decoder::new(&buf);
        assert!(dec.read_bool().unwrap());
        assert_eq!(dec.read_u8().unwrap(), 0x7F);
        assert_eq!(dec.read_u16().unwrap(), 25565);
        assert_eq!(dec.read_i32().unwrap(), -42);
        assert_eq!(dec.read_i64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(dec.read_f64().unwrap(), 100.5);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_port_bytes_big_endian() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_u16(25565);
        assert_eq!(buf, vec![0x63, 0xDD]);
    }

    #[tokio::test]
    async fn test_packet_frame_roundtrip() {
        let packet = encode_packet(0x15, &0x0123_4567_89AB_CDEFi64.to_be_bytes());
        let mut cursor: &[u8] = &packet;
        let body = read_packet(&mut cursor).await.unwrap();
        let mut dec = Decoder::new(&body);
        assert_eq!(dec.read_var_int().unwrap(), 0x15);
        assert_eq!(dec.read_i64().unwrap(), 0x0123_4567_89AB_CDEF);
    }

    #[tokio::test]
    async fn test_packet_length_bound() {
        let mut oversized = Vec::new();
        Encoder::new(&mut oversized).write_var_int(MAX_PACKET_SIZE + 1);
        let mut cursor: &[u8] = &oversized;
        assert!(matches!(
            read_packet(&mut cursor).await,
            Err(ProtocolError::PacketLength(_))
        ));

        let mut negative = Vec::new();
        Encoder::new(&mut negative).write_var_int(-1);
        let mut cursor: &[u8] = &negative;
        assert!(matches!(
            read_packet(&mut cursor).await,
            Err(ProtocolError::PacketLength(-1))
        ));
    }
}
