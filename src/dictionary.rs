//! [Dictionary](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/4238b0e2-7147-42da-88c9-ea45a1243e67)

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// [Initial Dictionary Contents](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/4238b0e2-7147-42da-88c9-ea45a1243e67)
const INITIAL_DICTIONARY: &[u8] = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720{\\fonttbl;}{\\f0\\fnil \\froman \\fswiss \\fmodern \\fscript \\fdecor MS Sans SerifSymbolArialTimes New RomanCourier{\\colortbl\\red0\\green0\\blue0\r\n\\par \\pard\\plain\\f0\\fs20\\b\\i\\u\\tab\\tx";

const DICTIONARY_SIZE: usize = 4096;

/// The 4096-byte circular dictionary shared by the encoder and decoder.
///
/// The encoder and the decoder each own a private instance: the encoder's
/// models the dictionary as it will look to a decoder replaying the token
/// stream, and is never inspected by a caller.
pub struct TokenDictionary {
    buffer: [u8; DICTIONARY_SIZE],
    size: usize,
    write_offset: usize,
}

impl TokenDictionary {
    /// Resolves a reference token against the dictionary, writing every
    /// byte it reads back into the dictionary at the current write
    /// position as it goes (so a reference may legitimately read bytes it
    /// is in the process of (re)writing). Returns `None` for the
    /// end-of-stream sentinel (`offset == write_offset`).
    pub fn read_reference(&mut self, reference: DictionaryReference) -> Option<Vec<u8>> {
        let (mut read_offset, length) = (reference.offset() as usize, reference.length() as usize);
        if read_offset == self.write_offset {
            return None;
        }

        let mut result = Vec::with_capacity(length);
        for _ in 0..length {
            let byte = self.buffer[read_offset];
            result.push(byte);
            read_offset = (read_offset + 1) % self.buffer.len();
            self.write_byte(byte);
        }

        Some(result)
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buffer[self.write_offset] = byte;
        self.size = self.buffer.len().min(self.size + 1);
        self.write_offset = (self.write_offset + 1) % self.buffer.len();
    }

    /// [Finding the Longest Match to Input](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/eb4b209b-f2f0-4876-a28b-1cfa1827423c)
    pub fn find_longest_match(&mut self, data: &[u8]) -> Option<DictionaryReference> {
        let final_offset = self.write_offset % self.buffer.len();

        let mut match_offset = if self.size != self.buffer.len() {
            0
        } else {
            ((self.write_offset + 1) % self.buffer.len()) as u16
        };

        let mut best_match: Option<DictionaryMatch> = None;

        loop {
            let best_match_length = best_match.map(|m| m.length).unwrap_or_default();
            best_match = self
                .try_match(data, match_offset, best_match_length)
                .or(best_match);

            match_offset = (match_offset + 1) % self.buffer.len() as u16;

            if match_offset as usize == final_offset {
                break;
            }
            if let Some(best_match) = best_match {
                if best_match.length == 17 {
                    break;
                }
            }
        }

        if best_match.map(|m| m.length).unwrap_or_default() == 0 {
            // Not even a single byte matched anywhere in the dictionary; the
            // caller is about to emit this byte as a literal, so record it
            // here (the only place it gets recorded).
            self.write_byte(data[0]);
        }

        best_match.and_then(|m| DictionaryReference::try_from(m).ok())
    }

    fn try_match(
        &mut self,
        data: &[u8],
        match_offset: u16,
        best_match_length: u8,
    ) -> Option<DictionaryMatch> {
        let max_length = data.len().min(17);
        let mut match_length = 0_u8;
        let mut dictionary_offset = match_offset as usize;

        while (match_length as usize) < max_length {
            let byte = data[match_length as usize];
            if self.buffer[dictionary_offset] != byte {
                break;
            }

            match_length += 1;

            if match_length > best_match_length {
                // This trial just became the new best; its bytes are real
                // output the decoder will (re)produce, so make them
                // available to later candidate offsets in this same search.
                self.write_byte(byte);
            }

            dictionary_offset = (dictionary_offset + 1) % self.buffer.len();
        }

        if match_length > best_match_length {
            Some(DictionaryMatch {
                offset: match_offset,
                length: match_length,
            })
        } else {
            None
        }
    }

    /// The end-of-stream sentinel: a reference whose offset equals the
    /// current write position.
    pub fn final_reference(&self) -> DictionaryReference {
        DictionaryReference::new(self.write_offset as u16, 0)
    }
}

impl Default for TokenDictionary {
    fn default() -> Self {
        let mut buffer = [0; DICTIONARY_SIZE];
        buffer[..INITIAL_DICTIONARY.len()].copy_from_slice(INITIAL_DICTIONARY);
        buffer[INITIAL_DICTIONARY.len()..].fill(b' ');
        Self {
            buffer,
            size: INITIAL_DICTIONARY.len(),
            write_offset: INITIAL_DICTIONARY.len(),
        }
    }
}

#[derive(Clone, Copy)]
struct DictionaryMatch {
    offset: u16,
    length: u8,
}

/// [Dictionary Reference](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/b12474df-e0ef-4731-9315-454a49a984d8)
///
/// A 16-bit big-endian word packing a 12-bit dictionary offset and a 4-bit
/// length code; the actual match length is the code plus 2.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DictionaryReference(u16);

impl DictionaryReference {
    pub fn new(offset: u16, length_minus_2: u8) -> Self {
        let value = u16::from(length_minus_2) | (offset << 4);
        Self(value)
    }

    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFF0) >> 4
    }

    pub fn length(&self) -> u8 {
        (self.0 & 0x0F) as u8 + 2
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        Ok(Self(f.read_u16::<BigEndian>()?))
    }

    pub fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        f.write_u16::<BigEndian>(self.0)
    }
}

/// Fails when a trial match can't be expressed as a reference token: this
/// only ever happens for a 1-byte match, since the token's length code has
/// no way to encode a length below 2. The caller treats that as "no
/// reference found" and falls back to a literal.
impl TryFrom<DictionaryMatch> for DictionaryReference {
    type Error = ();

    fn try_from(value: DictionaryMatch) -> Result<Self, Self::Error> {
        if !(2..=0x11).contains(&value.length) {
            return Err(());
        }
        debug_assert!(value.offset <= 0x0FFF);
        Ok(Self::new(value.offset, value.length - 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_dictionary_layout() {
        let dictionary = TokenDictionary::default();
        assert_eq!(dictionary.size, 207);
        assert_eq!(dictionary.write_offset, 207);
        assert_eq!(&dictionary.buffer[..207], INITIAL_DICTIONARY);
        assert!(dictionary.buffer[207..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_single_byte_match_is_not_a_valid_reference() {
        let reference = DictionaryReference::try_from(DictionaryMatch {
            offset: 0,
            length: 1,
        });
        assert!(reference.is_err());
    }

    #[test]
    fn test_reference_round_trip() {
        let reference = DictionaryReference::new(0x0ABC, 0x5);
        assert_eq!(reference.offset(), 0x0ABC);
        assert_eq!(reference.length(), 0x5 + 2);
    }
}
