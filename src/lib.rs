//! [MS-OXRTFCP]: Rich Text Format (RTF) Compression Algorithm
//!
//! Encodes and decodes the Compressed Rich Text Format container: an
//! LZ77-style dictionary compressor seeded with a fixed RTF-keyword
//! preamble, used to wrap RTF bodies embedded in compound message stores.
//! The codec is a pure transform over in-memory byte buffers; callers own
//! acquisition, persistence, and any RTF-specific interpretation of the
//! decoded bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};
use thiserror::Error;

mod crc;
mod dictionary;

use crc::compute_crc;
use dictionary::{DictionaryReference, TokenDictionary};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("container header requires at least 16 bytes, got {0}")]
    ShortHeader(usize),
    #[error("declared payload end ({declared}) exceeds available input ({available})")]
    Truncated { declared: usize, available: usize },
    #[error("unknown COMPTYPE magic: {0:?}")]
    UnknownCompType([u8; 4]),
    #[error("CRC mismatch: header declares 0x{declared:08X}, expected 0x{expected:08X}")]
    BadCrc { declared: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// `COMPTYPE` magic for the compressed (`LZFu`) container, as a
/// little-endian `u32` so it can be written/compared with the rest of the
/// little-endian header.
const COMPRESSED: u32 = 0x7546_5A4C;
/// `COMPTYPE` magic for the uncompressed (`MELA`) container.
const UNCOMPRESSED: u32 = 0x414C_454D;

const HEADER_LEN: usize = 16;
const MAX_GROUP_LEN: usize = 16;

/// Encodes `data` as a Compressed Rich Text Format container.
///
/// When `compressed` is `false` the container wraps `data` verbatim
/// (`COMPTYPE = MELA`, `CRC = 0`). When `true`, `data` is run through the
/// LZ77 dictionary compressor (`COMPTYPE = LZFu`).
///
/// Infallible: every in-memory byte buffer has a valid encoding.
pub fn encode(data: &[u8], compressed: bool) -> Vec<u8> {
    if compressed {
        encode_compressed(data)
    } else {
        encode_uncompressed(data)
    }
}

fn encode_uncompressed(data: &[u8]) -> Vec<u8> {
    let raw_size = data.len() as u32;
    let compressed_size = raw_size + 12;

    let mut output = Cursor::new(Vec::with_capacity(data.len() + HEADER_LEN));
    write_header(&mut output, compressed_size, raw_size, UNCOMPRESSED, 0);
    output
        .write_all(data)
        .expect("writing into an in-memory buffer cannot fail");
    output.into_inner()
}

fn encode_compressed(data: &[u8]) -> Vec<u8> {
    let mut output = Cursor::new(Vec::with_capacity(data.len() + HEADER_LEN));
    output
        .write_all(&[0_u8; HEADER_LEN])
        .expect("writing into an in-memory buffer cannot fail");

    let mut dictionary = TokenDictionary::default();
    let mut read_offset = 0;
    let mut control = 0_u8;
    let mut run_buffer = [0_u8; MAX_GROUP_LEN];
    let mut run_length = 0;

    // One iteration produces one group (a control byte plus up to eight
    // tokens). `read_offset == data.len()` still runs one more iteration,
    // whose first token is always the EOF sentinel.
    'groups: while read_offset <= data.len() {
        let mut group = Cursor::new(run_buffer.as_mut_slice());
        control = 0;
        run_length = 0;

        for bit in 0..8 {
            if read_offset >= data.len() {
                dictionary
                    .final_reference()
                    .write(&mut group)
                    .expect("writing into an in-memory buffer cannot fail");
                control |= 1 << bit;
                run_length += 2;
                break 'groups;
            }

            match dictionary.find_longest_match(&data[read_offset..]) {
                Some(reference) => {
                    reference
                        .write(&mut group)
                        .expect("writing into an in-memory buffer cannot fail");
                    read_offset += reference.length() as usize;
                    control |= 1 << bit;
                    run_length += 2;
                }
                None => {
                    let byte = data[read_offset];
                    group
                        .write_u8(byte)
                        .expect("writing into an in-memory buffer cannot fail");
                    read_offset += 1;
                    run_length += 1;
                }
            }
        }

        output
            .write_u8(control)
            .expect("writing into an in-memory buffer cannot fail");
        output
            .write_all(&run_buffer[..run_length])
            .expect("writing into an in-memory buffer cannot fail");
        run_length = 0;
    }

    // The `'groups` break above skips the flush at the bottom of the loop
    // body, so the final (sentinel-bearing) group is flushed here instead.
    if run_length > 0 {
        output
            .write_u8(control)
            .expect("writing into an in-memory buffer cannot fail");
        output
            .write_all(&run_buffer[..run_length])
            .expect("writing into an in-memory buffer cannot fail");
    }

    let mut output = output.into_inner();
    let raw_size = data.len() as u32;
    let compressed_size = output.len() as u32 - 4;
    let crc = compute_crc(&output[HEADER_LEN..]);

    let mut header = Cursor::new(&mut output[..HEADER_LEN]);
    write_header(&mut header, compressed_size, raw_size, COMPRESSED, crc);

    output
}

fn write_header(out: &mut impl Write, compressed_size: u32, raw_size: u32, comp_type: u32, crc: u32) {
    out.write_u32::<LittleEndian>(compressed_size)
        .expect("writing into an in-memory buffer cannot fail");
    out.write_u32::<LittleEndian>(raw_size)
        .expect("writing into an in-memory buffer cannot fail");
    out.write_u32::<LittleEndian>(comp_type)
        .expect("writing into an in-memory buffer cannot fail");
    out.write_u32::<LittleEndian>(crc)
        .expect("writing into an in-memory buffer cannot fail");
}

/// Decodes a Compressed Rich Text Format container back into the original
/// bytes.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::ShortHeader(data.len()));
    }

    let mut header = Cursor::new(&data[..HEADER_LEN]);
    let compressed_size = header
        .read_u32::<LittleEndian>()
        .expect("reading from a 16-byte slice cannot fail");
    let raw_size = header
        .read_u32::<LittleEndian>()
        .expect("reading from a 16-byte slice cannot fail");
    let comp_type = header
        .read_u32::<LittleEndian>()
        .expect("reading from a 16-byte slice cannot fail");
    let crc = header
        .read_u32::<LittleEndian>()
        .expect("reading from a 16-byte slice cannot fail");

    let payload_len = (compressed_size as usize).saturating_sub(12);
    let declared_end = HEADER_LEN + payload_len;
    if declared_end > data.len() {
        return Err(DecodeError::Truncated {
            declared: declared_end,
            available: data.len(),
        });
    }
    let payload = &data[HEADER_LEN..declared_end];

    match comp_type {
        UNCOMPRESSED => {
            if crc != 0 {
                return Err(DecodeError::BadCrc {
                    declared: crc,
                    expected: 0,
                });
            }
            let end = (raw_size as usize).min(payload.len());
            Ok(payload[..end].to_vec())
        }
        COMPRESSED => {
            let expected = compute_crc(payload);
            if crc != expected {
                return Err(DecodeError::BadCrc {
                    declared: crc,
                    expected,
                });
            }
            Ok(decode_tokens(payload, raw_size as usize))
        }
        other => Err(DecodeError::UnknownCompType(other.to_le_bytes())),
    }
}

fn decode_tokens(payload: &[u8], raw_size_hint: usize) -> Vec<u8> {
    let mut dictionary = TokenDictionary::default();
    let mut output = Vec::with_capacity(raw_size_hint);
    let mut cursor = Cursor::new(payload);

    'groups: while let Ok(control) = cursor.read_u8() {
        for bit in 0..8 {
            if control & (0x01 << bit) == 0 {
                let Ok(byte) = cursor.read_u8() else {
                    break 'groups;
                };
                output.push(byte);
                dictionary.write_byte(byte);
            } else {
                let Ok(reference) = DictionaryReference::read(&mut cursor) else {
                    break 'groups;
                };
                let Some(mut bytes) = dictionary.read_reference(reference) else {
                    break 'groups;
                };
                output.append(&mut bytes);
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPRESSED_HELLO_WORLD: &[u8] = &[
        0x2d, 0x00, 0x00, 0x00, 0x2b, 0x00, 0x00, 0x00, 0x4c, 0x5a, 0x46, 0x75, 0xf1, 0xc5, 0xc7,
        0xa7, 0x03, 0x00, 0x0a, 0x00, 0x72, 0x63, 0x70, 0x67, 0x31, 0x32, 0x35, 0x42, 0x32, 0x0a,
        0xf3, 0x20, 0x68, 0x65, 0x6c, 0x09, 0x00, 0x20, 0x62, 0x77, 0x05, 0xb0, 0x6c, 0x64, 0x7d,
        0x0a, 0x80, 0x0f, 0xa0,
    ];

    const UNCOMPRESSED_HELLO_WORLD: &[u8] = b"{\\rtf1\\ansi\\ansicpg1252\\pard hello world}\r\n";

    /// [Example 1: Simple Compressed RTF](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/029bff74-8c00-402e-ac2b-0210a5f57371)
    #[test]
    fn test_decode_simple_compressed() {
        assert_eq!(decode(COMPRESSED_HELLO_WORLD).unwrap(), UNCOMPRESSED_HELLO_WORLD);
    }

    /// [Example 1: Simple RTF](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/ba662823-d47a-4db3-ad45-a368a82acc90)
    #[test]
    fn test_encode_simple_compressed() {
        assert_eq!(encode(UNCOMPRESSED_HELLO_WORLD, true), COMPRESSED_HELLO_WORLD);
    }

    #[test]
    fn test_decode_uncompressed() {
        const TEXT: &[u8] = b"{\\rtf1\\ansi\\ansicpg1252\\pard test}";
        let mut container = vec![
            0x2e, 0x00, 0x00, 0x00, 0x22, 0x00, 0x00, 0x00, 0x4d, 0x45, 0x4c, 0x41, 0x00, 0x00,
            0x00, 0x00,
        ];
        container.extend_from_slice(TEXT);
        assert_eq!(decode(&container).unwrap(), TEXT);
    }

    #[test]
    fn test_encode_uncompressed() {
        const TEXT: &[u8] = b"{\\rtf1\\ansi\\ansicpg1252\\pard hello world}\r\n";
        let container = encode(TEXT, false);
        assert_eq!(&container[8..12], b"MELA");
        assert_eq!(&container[12..16], &[0, 0, 0, 0]);
        assert_eq!(&container[16..], TEXT);
        assert_eq!(decode(&container).unwrap(), TEXT);
    }

    const COMPRESSED_CROSSING_WRITE_POSITION: &[u8] = &[
        0x1a, 0x00, 0x00, 0x00, 0x1c, 0x00, 0x00, 0x00, 0x4c, 0x5a, 0x46, 0x75, 0xe2, 0xd4, 0x4b,
        0x51, 0x41, 0x00, 0x04, 0x20, 0x57, 0x58, 0x59, 0x5a, 0x0d, 0x6e, 0x7d, 0x01, 0x0e, 0xb0,
    ];

    const UNCOMPRESSED_CROSSING_WRITE_POSITION: &[u8] = b"{\\rtf1 WXYZWXYZWXYZWXYZWXYZ}";

    /// [Example 2: Reading a Token from the Dictionary that Crosses WritePosition](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/421a2da5-7752-4985-8981-0f19f1e5b687)
    #[test]
    fn test_decode_crossing_write_position() {
        assert_eq!(
            decode(COMPRESSED_CROSSING_WRITE_POSITION).unwrap(),
            UNCOMPRESSED_CROSSING_WRITE_POSITION
        );
    }

    /// [Example 2: Compressing with Tokens that Cross WritePosition](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/59eb3a35-6ee1-4a08-93b9-b9f4a7e3a0ca)
    #[test]
    fn test_encode_crossing_write_position() {
        assert_eq!(
            encode(UNCOMPRESSED_CROSSING_WRITE_POSITION, true),
            COMPRESSED_CROSSING_WRITE_POSITION
        );
    }

    #[test]
    fn test_header_invariants() {
        for &flag in &[true, false] {
            let data = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720";
            let container = encode(data, flag);
            let comp_size = u32::from_le_bytes(container[0..4].try_into().unwrap());
            let raw_size = u32::from_le_bytes(container[4..8].try_into().unwrap());
            assert_eq!(comp_size as usize, container.len() - 4);
            assert_eq!(raw_size as usize, data.len());
            assert_eq!(&container[8..12] == b"LZFu", flag);
            assert_eq!(&container[8..12] == b"MELA", !flag);
        }
    }

    #[test]
    fn test_round_trip_various_lengths() {
        for &len in &[0, 1, 207, 4095, 4096, 4097, 10000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for &flag in &[true, false] {
                let container = encode(&data, flag);
                assert_eq!(decode(&container).unwrap(), data, "len={len} compressed={flag}");
            }
        }
    }

    /// Builds a buffer past the 4096-byte dictionary size so the encoder
    /// must wrap the write position, and checks decode still round-trips.
    #[test]
    fn test_round_trip_dictionary_wraparound() {
        let mut data = b"{\\rtf1\\ansi\\ansicpg1252\\pard hello world".to_vec();
        while data.len() < 4096 {
            data.extend_from_slice(b"testtest");
        }
        data.push(b'}');

        let container = encode(&data, true);
        assert_eq!(decode(&container).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_short_header() {
        assert!(matches!(decode(&[]), Err(DecodeError::ShortHeader(0))));
        assert!(matches!(
            decode(b"0123456789abcde"),
            Err(DecodeError::ShortHeader(15))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_comp_type() {
        // comp_size = 12 (empty payload), so the header is internally
        // consistent and the failure is attributable to COMPTYPE alone.
        let container: &[u8] = &[
            0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, b'A', b'B', b'C', b'D', 0xff, 0xff,
            0xff, 0xff,
        ];
        assert!(matches!(
            decode(container),
            Err(DecodeError::UnknownCompType(magic)) if &magic == b"ABCD"
        ));
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let container: &[u8] = &[
            0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, b'L', b'Z', b'F', b'u', 0xff, 0xff,
            0xff, 0xff,
        ];
        assert!(matches!(decode(container), Err(DecodeError::BadCrc { .. })));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        // comp_size declares a 5-byte payload but none is present.
        let container: &[u8] = &[
            0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, b'L', b'Z', b'F', b'u', 0x00, 0x00,
            0x00, 0x00,
        ];
        assert!(matches!(
            decode(container),
            Err(DecodeError::Truncated { declared: 21, available: 16 })
        ));
    }
}
