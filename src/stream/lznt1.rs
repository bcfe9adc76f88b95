//! LZNT1 decompression.
//!
//! Compressed NTFS attribute data is divided into compression units, each
//! of which holds a sequence of LZNT1 chunks. A chunk starts with a
//! two-byte header: bits 0..11 store the payload size minus one, bits
//! 12..14 a fixed signature of 3, and bit 15 whether the payload is
//! compressed or a literal 4 KiB block. Compressed payloads are flag-byte
//! groups of eight tokens, literals interleaved with 16-bit back
//! references whose offset/length split widens as the chunk fills.

use crate::error::{NtfsError, Result};
use crate::util::le16;

/// Uncompressed size of one LZNT1 chunk.
const CHUNK_SIZE: usize = 4096;

const HEADER_SIZE_MASK: u16 = 0x0FFF;
const HEADER_SIGNATURE_MASK: u16 = 0x7000;
const HEADER_SIGNATURE: u16 = 0x3000;
const HEADER_COMPRESSED: u16 = 0x8000;

/// Decompress an LZNT1 stream into at most `expected_size` bytes.
///
/// The output may be shorter than `expected_size` when the stream ends
/// early; the caller zero-pads to the unit size.
pub fn decompress(src: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size);
    let mut pos = 0usize;

    while pos + 2 <= src.len() && out.len() < expected_size {
        let header = le16(src, pos);
        pos += 2;
        if header == 0 {
            break;
        }
        if header & HEADER_SIGNATURE_MASK != HEADER_SIGNATURE {
            return Err(NtfsError::CorruptRecord(format!(
                "LZNT1 chunk header {header:#06x} has invalid signature"
            )));
        }
        let payload_size = (header & HEADER_SIZE_MASK) as usize + 1;
        if pos + payload_size > src.len() {
            return Err(NtfsError::CorruptRecord(format!(
                "LZNT1 chunk of {payload_size} bytes extends past the unit"
            )));
        }
        let payload = &src[pos..pos + payload_size];
        pos += payload_size;

        if header & HEADER_COMPRESSED != 0 {
            decompress_chunk(payload, &mut out, expected_size)?;
        } else {
            let take = payload.len().min(expected_size - out.len());
            out.extend_from_slice(&payload[..take]);
        }
    }

    Ok(out)
}

fn decompress_chunk(payload: &[u8], out: &mut Vec<u8>, cap: usize) -> Result<()> {
    let chunk_start = out.len();
    let chunk_cap = cap.min(chunk_start + CHUNK_SIZE);
    let mut pos = 0usize;

    while pos < payload.len() && out.len() < chunk_cap {
        let flags = payload[pos];
        pos += 1;

        for bit in 0..8 {
            if pos >= payload.len() || out.len() >= chunk_cap {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(payload[pos]);
                pos += 1;
                continue;
            }

            if pos + 2 > payload.len() {
                return Err(NtfsError::CorruptRecord(
                    "LZNT1 back reference truncated".into(),
                ));
            }
            let token = le16(payload, pos);
            pos += 2;

            let chunk_pos = out.len() - chunk_start;
            if chunk_pos == 0 {
                return Err(NtfsError::CorruptRecord(
                    "LZNT1 back reference before any output".into(),
                ));
            }

            // The offset field widens (and the length field narrows) as
            // the chunk fills: 4 offset bits for the first 16 bytes, up
            // to 12 once past 2 KiB.
            let mut shift = 12u32;
            let mut p = chunk_pos - 1;
            while p >= 0x10 {
                shift -= 1;
                p >>= 1;
            }
            let offset = (token >> shift) as usize + 1;
            let length = (token & ((1 << shift) - 1)) as usize + 3;

            if offset > chunk_pos {
                return Err(NtfsError::CorruptRecord(format!(
                    "LZNT1 back reference of {offset} bytes at chunk position {chunk_pos}"
                )));
            }
            for _ in 0..length {
                if out.len() >= chunk_cap {
                    break;
                }
                let byte = out[out.len() - offset];
                out.push(byte);
            }
        }
    }

    Ok(())
}
