//! Read pipeline: seek-by-byte, chunk resolution, CRC-checked slices
//!
//! The cursor is a `(chunk index, intra-chunk offset)` pair. One
//! decompressed chunk is cached at a time; a CRC failure is recorded in
//! the runtime CRC error registry and never aborts the read.

use ewfvault_core::{Error, MediaInfo, Result};

use crate::codec;
use crate::delta::DeltaSegment;
use crate::registry::ErrorSectorList;
use crate::segment::SegmentTable;
use crate::table::OffsetTable;

/// Read-side state of a handle
#[derive(Debug, Default)]
pub struct ReadState {
    /// Zero-fill chunks whose CRC failed instead of returning stored bytes
    pub wipe_on_error: bool,
    /// Chunks whose CRC failed during this session
    pub crc_errors: ErrorSectorList,
    chunk_index: u32,
    intra_offset: u32,
    cache_index: Option<u32>,
    cache: Vec<u8>,
}

impl ReadState {
    /// Fresh state with the cursor at media offset zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current media offset of the cursor
    pub fn position(&self, chunk_size: u32) -> u64 {
        u64::from(self.chunk_index) * u64::from(chunk_size) + u64::from(self.intra_offset)
    }

    /// Move the cursor to a media offset
    ///
    /// Offsets at or past the end of the media are rejected; there is no
    /// sparse growth on seek.
    pub fn seek(&mut self, offset: u64, media: &MediaInfo) -> Result<()> {
        if offset >= media.media_size() {
            return Err(Error::invalid_argument(format!(
                "seek offset {offset} past media size {}",
                media.media_size()
            )));
        }
        let chunk_size = u64::from(media.chunk_size());
        self.chunk_index = (offset / chunk_size) as u32;
        self.intra_offset = (offset % chunk_size) as u32;
        Ok(())
    }

    /// Drop the cached chunk if it is the given one (used when a delta
    /// write replaces a chunk under the cursor)
    pub fn invalidate_chunk(&mut self, chunk: u32) {
        if self.cache_index == Some(chunk) {
            self.cache_index = None;
            self.cache.clear();
        }
    }

    /// Cursor chunk index and intra-chunk offset
    pub fn cursor(&self) -> (u32, u32) {
        (self.chunk_index, self.intra_offset)
    }

    /// Advance the cursor by whole chunks (used by chunk-aligned writes)
    pub fn advance_chunks(&mut self, chunks: u32) {
        self.chunk_index += chunks;
    }

    fn load_chunk(
        &mut self,
        chunk: u32,
        media: &MediaInfo,
        offsets: &OffsetTable,
        segments: &mut SegmentTable,
        delta: &mut DeltaSegment,
    ) -> Result<()> {
        if self.cache_index == Some(chunk) {
            return Ok(());
        }
        let entry = offsets
            .get(chunk)
            .ok_or_else(|| Error::invalid_argument(format!("chunk {chunk} out of range")))?;
        let chunk_size = media.chunk_size() as usize;

        let stored = if entry.delta {
            delta.read_at(entry.file_offset, entry.stored_size as usize)?
        } else {
            let segment = segments.get_mut(entry.segment).ok_or_else(|| {
                Error::chain_corrupt(
                    entry.segment,
                    format!("chunk {chunk} references a missing segment"),
                )
            })?;
            segment.read_at(entry.file_offset, entry.stored_size as usize)?
        };

        let raw = match codec::decode_chunk(&stored, chunk_size, entry.compressed) {
            codec::DecodedChunk::Intact(raw) => raw,
            codec::DecodedChunk::Corrupt { bytes, detail } => {
                tracing::warn!(chunk, %detail, "chunk failed CRC validation");
                self.crc_errors.add(
                    u64::from(chunk) * u64::from(media.sectors_per_chunk),
                    media.sectors_per_chunk,
                );
                if self.wipe_on_error {
                    vec![0u8; chunk_size]
                } else {
                    // Hand back whatever the codec recovered, zero-padded
                    // to a full chunk
                    let mut raw = bytes;
                    raw.truncate(chunk_size);
                    raw.resize(chunk_size, 0);
                    raw
                }
            }
        };

        self.cache = raw;
        self.cache.resize(chunk_size, 0);
        self.cache_index = Some(chunk);
        Ok(())
    }

    /// Copy media bytes at the cursor into `buf`
    ///
    /// Returns the number of bytes copied, short only at end of media.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        media: &MediaInfo,
        offsets: &OffsetTable,
        segments: &mut SegmentTable,
        delta: &mut DeltaSegment,
    ) -> Result<usize> {
        let chunk_size = media.chunk_size();
        let media_size = media.media_size();
        let chunk_count = offsets.len();
        let mut total = 0usize;

        while total < buf.len() && self.chunk_index < chunk_count {
            let position = self.position(chunk_size);
            if position >= media_size {
                break;
            }
            self.load_chunk(self.chunk_index, media, offsets, segments, delta)?;

            let available_in_chunk = (chunk_size - self.intra_offset) as u64;
            let available_in_media = media_size - position;
            let wanted = (buf.len() - total) as u64;
            let count = wanted.min(available_in_chunk).min(available_in_media) as usize;

            let start = self.intra_offset as usize;
            buf[total..total + count].copy_from_slice(&self.cache[start..start + count]);
            total += count;
            self.intra_offset += count as u32;
            if self.intra_offset == chunk_size {
                self.chunk_index += 1;
                self.intra_offset = 0;
            }
        }
        Ok(total)
    }
}
