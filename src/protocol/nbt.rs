//! NBT skipping
//!
//! Chunk-data packets bury the tunnel payload behind a heightmaps NBT blob.
//! Nothing in it is interesting, so the walker only advances the decoder
//! past one complete value without allocating.

use super::{codec::Decoder, ProtocolError};

const MAX_DEPTH: usize = 32;

/// Skips one named root tag and its payload. The decoder is left at the
/// first byte after the value.
pub fn skip_nbt(dec: &mut Decoder) -> Result<(), ProtocolError> {
    let tag = dec.read_u8()?;
    if tag == 0 {
        return Ok(());
    }
    let name_len = dec.read_u16()? as usize;
    dec.skip(name_len)?;
    skip_payload(dec, tag, 0)
}

fn skip_payload(dec: &mut Decoder, tag: u8, depth: usize) -> Result<(), ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::NbtTooDeep);
    }
    match tag {
        0 => {}
        1 => dec.skip(1)?,
        2 => dec.skip(2)?,
        3 | 5 => dec.skip(4)?,
        4 | 6 => dec.skip(8)?,
        // byte array: i32 length
        7 => {
            let len = dec.read_i32()?;
            dec.skip(len.max(0) as usize)?;
        }
        // string: u16 length
        8 => {
            let len = dec.read_u16()? as usize;
            dec.skip(len)?;
        }
        // list: i8 element type + i32 count of unnamed payloads
        9 => {
            let element = dec.read_u8()?;
            let len = dec.read_i32()?;
            for _ in 0..len.max(0) {
                skip_payload(dec, element, depth + 1)?;
            }
        }
        // compound: named entries until a zero tag
        10 => loop {
            let entry = dec.read_u8()?;
            if entry == 0 {
                break;
            }
            let name_len = dec.read_u16()? as usize;
            dec.skip(name_len)?;
            skip_payload(dec, entry, depth + 1)?;
        },
        // int array: i32 length × 4 bytes
        11 => {
            let len = dec.read_i32()?;
            dec.skip(len.max(0) as usize * 4)?;
        }
        // long array: i32 length × 8 bytes
        12 => {
            let len = dec.read_i32()?;
            dec.skip(len.max(0) as usize * 8)?;
        }
        other => return Err(ProtocolError::UnknownNbtTag(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(tag: u8, name: &str, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![tag];
        buf.extend((name.len() as u16).to_be_bytes());
        buf.extend(name.as_bytes());
        buf.extend(payload);
        buf
    }

    fn assert_skips(blob: &[u8]) {
        let mut with_trailer = blob.to_vec();
        with_trailer.extend([0xAA, 0xBB]);
        let mut dec = Decoder::new(&with_trailer);
        skip_nbt(&mut dec).unwrap();
        assert_eq!(dec.remaining(), 2);
        assert_eq!(dec.consume_slice(2).unwrap(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_end_tag() {
        assert_skips(&[0x00]);
    }

    #[test]
    fn test_scalar_tags() {
        assert_skips(&named(1, "b", &[0x7F]));
        assert_skips(&named(2, "s", &[0x01, 0x02]));
        assert_skips(&named(4, "l", &[0; 8]));
        assert_skips(&named(6, "d", &100.5f64.to_be_bytes()));
    }

    #[test]
    fn test_string_and_arrays() {
        let mut s = vec![0x00, 0x05];
        s.extend(b"hello");
        assert_skips(&named(8, "str", &s));

        let mut ba = 3i32.to_be_bytes().to_vec();
        ba.extend([1, 2, 3]);
        assert_skips(&named(7, "bytes", &ba));

        let mut la = 2i32.to_be_bytes().to_vec();
        la.extend([0; 16]);
        assert_skips(&named(12, "longs", &la));
    }

    #[test]
    fn test_heightmaps_shaped_compound() {
        // compound { "MOTION_BLOCKING": long array[2], "flag": byte }
        let mut inner = Vec::new();
        inner.push(12);
        inner.extend((15u16).to_be_bytes());
        inner.extend(b"MOTION_BLOCKING");
        inner.extend(2i32.to_be_bytes());
        inner.extend([0u8; 16]);
        inner.push(1);
        inner.extend((4u16).to_be_bytes());
        inner.extend(b"flag");
        inner.push(0xFF);
        inner.push(0); // end of compound
        assert_skips(&named(10, "", &inner));
    }

    #[test]
    fn test_list_of_unnamed_payloads() {
        // list of 3 ints
        let mut list = vec![3]; // element type
        list.extend(3i32.to_be_bytes());
        list.extend(1i32.to_be_bytes());
        list.extend(2i32.to_be_bytes());
        list.extend(3i32.to_be_bytes());
        assert_skips(&named(9, "ints", &list));

        // empty list of end tags, as vanilla emits
        let mut empty = vec![0];
        empty.extend(0i32.to_be_bytes());
        assert_skips(&named(9, "empty", &empty));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let blob = named(13, "x", &[]);
        let mut dec = Decoder::new(&blob);
        assert!(matches!(
            skip_nbt(&mut dec),
            Err(ProtocolError::UnknownNbtTag(13))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let blob = named(4, "long", &[0x01, 0x02]); // needs 8 payload bytes
        let mut dec = Decoder::new(&blob);
        assert!(skip_nbt(&mut dec).is_err());
    }
}
