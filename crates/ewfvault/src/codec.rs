//! Chunk codec: zlib compression and CRC framing
//!
//! A chunk is stored either zlib-compressed (the stream's own Adler-32
//! trailer doubles as the chunk CRC) or raw with an explicit 4-byte
//! little-endian Adler-32 appended. Compression never expands: when the
//! deflated form would be at least as large as the raw form, the chunk
//! falls back to raw storage.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use ewfvault_core::{adler32, CompressionLevel, Error, Result};

/// Byte size of the CRC trailer on an uncompressed chunk
pub const CRC_SIZE: usize = 4;

/// A chunk as it is stored inside a sectors section
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Stored bytes, including the CRC trailer
    pub data: Vec<u8>,
    /// Whether `data` is a zlib stream
    pub compressed: bool,
    /// The Adler-32 protecting the raw chunk bytes
    pub crc: u32,
}

impl EncodedChunk {
    /// Stored size in bytes
    pub fn stored_size(&self) -> u32 {
        self.data.len() as u32
    }
}

fn deflate_level(level: CompressionLevel) -> Compression {
    match level {
        CompressionLevel::None => Compression::default(),
        CompressionLevel::Fast => Compression::fast(),
        CompressionLevel::Best => Compression::best(),
    }
}

/// True when every byte in the block equals the first
///
/// Uniform blocks (wiped or unwritten regions) compress to a few dozen
/// bytes and are worth deflating even when the level is `None`.
pub fn is_empty_block(data: &[u8]) -> bool {
    data.windows(2).all(|pair| pair[0] == pair[1])
}

fn store_raw(raw: &[u8]) -> EncodedChunk {
    let crc = adler32(raw);
    let mut data = Vec::with_capacity(raw.len() + CRC_SIZE);
    data.extend_from_slice(raw);
    data.extend_from_slice(&crc.to_le_bytes());
    EncodedChunk {
        data,
        compressed: false,
        crc,
    }
}

/// Encode one raw chunk for storage
pub fn compress_chunk(
    raw: &[u8],
    level: CompressionLevel,
    compress_empty_block: bool,
) -> Result<EncodedChunk> {
    let deflate = level != CompressionLevel::None
        || (compress_empty_block && is_empty_block(raw));

    if !deflate {
        return Ok(store_raw(raw));
    }

    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(raw.len() / 2),
        deflate_level(level),
    );
    encoder.write_all(raw).map_err(Error::Io)?;
    let data = encoder.finish().map_err(Error::Io)?;

    if data.len() >= raw.len() + CRC_SIZE {
        // Incompressible; raw storage is smaller
        return Ok(store_raw(raw));
    }
    let trailer: [u8; 4] = data[data.len() - 4..]
        .try_into()
        .expect("zlib stream shorter than its trailer");
    // The zlib trailer is the big-endian Adler-32 of the raw bytes
    let crc = u32::from_be_bytes(trailer);

    Ok(EncodedChunk {
        data,
        compressed: true,
        crc,
    })
}

/// Outcome of decoding one stored chunk
///
/// Corruption is not an abort: the decoder hands back whatever bytes it
/// could recover (the raw prefix of an uncompressed chunk, the partially
/// inflated output of a broken zlib stream) so the read pipeline can
/// choose between wiping and returning them.
#[derive(Debug, Clone)]
pub enum DecodedChunk {
    /// CRC validated; the raw chunk bytes
    Intact(Vec<u8>),
    /// CRC mismatch or inflate failure; best-effort bytes and the cause
    Corrupt {
        /// Whatever could be recovered, possibly short or empty
        bytes: Vec<u8>,
        /// What went wrong
        detail: String,
    },
}

impl DecodedChunk {
    /// True when the chunk validated
    pub fn is_intact(&self) -> bool {
        matches!(self, DecodedChunk::Intact(_))
    }
}

/// Decode one stored chunk, keeping best-effort bytes on corruption
pub fn decode_chunk(stored: &[u8], expected_len: usize, compressed: bool) -> DecodedChunk {
    if compressed {
        let mut decoder = ZlibDecoder::new(stored);
        let mut raw = Vec::with_capacity(expected_len);
        if let Err(err) = decoder.read_to_end(&mut raw) {
            return DecodedChunk::Corrupt {
                bytes: raw,
                detail: format!("inflate failed: {err}"),
            };
        }
        if raw.len() != expected_len {
            let detail = format!(
                "decompressed to {} bytes, expected {expected_len}",
                raw.len()
            );
            return DecodedChunk::Corrupt { bytes: raw, detail };
        }
        return DecodedChunk::Intact(raw);
    }

    if stored.len() < CRC_SIZE {
        return DecodedChunk::Corrupt {
            bytes: Vec::new(),
            detail: "stored chunk too small".to_string(),
        };
    }
    let (raw, trailer) = stored.split_at(stored.len() - CRC_SIZE);
    let stored_crc = u32::from_le_bytes(trailer.try_into().expect("4-byte trailer"));
    let computed = adler32(raw);
    if computed != stored_crc {
        return DecodedChunk::Corrupt {
            bytes: raw.to_vec(),
            detail: format!(
                "CRC mismatch: stored {stored_crc:#010x}, computed {computed:#010x}"
            ),
        };
    }
    DecodedChunk::Intact(raw.to_vec())
}

/// Decode one stored chunk, failing hard on corruption
///
/// `chunk` is the global chunk index, used for error context only.
pub fn decompress_chunk(
    stored: &[u8],
    expected_len: usize,
    compressed: bool,
    chunk: u32,
) -> Result<Vec<u8>> {
    match decode_chunk(stored, expected_len, compressed) {
        DecodedChunk::Intact(raw) => Ok(raw),
        DecodedChunk::Corrupt { detail, .. } => Err(Error::chunk_corrupt(chunk, detail)),
    }
}
