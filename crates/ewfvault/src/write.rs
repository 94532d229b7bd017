//! Write pipeline: chunk buffering, segment rollover, finalize
//!
//! The pipeline moves through `Fresh → HeaderEmitted → Writing →
//! Finalized`. The first buffered write runs initialization: media
//! parameters are validated and locked, segment 1 is created and its
//! header and volume sections emitted. From then on data accumulates into
//! a chunk-sized buffer; full chunks are encoded and appended to the open
//! `sectors` section. Before a chunk would push the segment past its size
//! bound the current chunk group is closed (`sectors` rewritten with its
//! final size, `table` + `table2` emitted), a `next` section written, and
//! a new segment opened. Finalize pads the trailing chunk, emits the
//! closing sections and corrects segment 1's volume payload with the
//! final chunk and sector counts.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ewfvault_core::{CompressionLevel, Error, Format, MediaInfo, Result};

use crate::codec;
use crate::digest::{DigestSection, HashSection, MediaHasher, DIGEST_SECTION_SIZE, HASH_SECTION_SIZE};
use crate::header;
use crate::registry::{build_error2_payload, ErrorSectorList};
use crate::section::{SectionDescriptor, SectionType, SECTION_DESCRIPTOR_SIZE};
use crate::segment::{segment_path, FileHeader, FILE_HEADER_SIZE};
use crate::table::{build_table_payload, ChunkEntry, OffsetTable, TableEntry, MAX_TABLE_ENTRIES};
use crate::values::ValuesTable;
use crate::volume::VolumeSection;

/// Default segment file size bound: 1.4 GiB
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 1_503_238_553;

/// Hard upper bound on a segment file: 2 GiB − 1
pub const MAX_SEGMENT_FILE_SIZE: u64 = i32::MAX as u64;

/// Write pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Handle created, setters open
    Fresh,
    /// Segment 1 created, header and volume sections emitted
    HeaderEmitted,
    /// Chunk data flowing
    Writing,
    /// Closing sections written, or the pipeline failed
    Finalized,
}

/// Handle-owned collaborators the pipeline needs while writing
pub struct WriteContext<'a> {
    /// Container format variant
    pub format: Format,
    /// Media parameters; sector count is corrected at finalize
    pub media: &'a mut MediaInfo,
    /// Container GUID
    pub guid: [u8; 16],
    /// Case metadata for the header sections
    pub header_values: &'a ValuesTable,
    /// Acquiry errors persisted into `error2`
    pub acquiry_errors: &'a ErrorSectorList,
    /// Caller-supplied MD5 overriding the computed one
    pub md5_override: Option<[u8; 16]>,
    /// Offset table receiving one entry per written chunk
    pub offsets: &'a mut OffsetTable,
}

/// One segment file being written
#[derive(Debug)]
struct SegmentWriter {
    file: File,
    path: PathBuf,
    number: u16,
    /// Current end-of-file offset
    offset: u64,
    /// Descriptor offset of the open sectors section
    sectors_offset: Option<u64>,
    /// Table entries of the open chunk group
    group: Vec<TableEntry>,
    chunks_in_segment: u32,
}

impl SegmentWriter {
    fn create(base: &Path, letter: char, number: u16) -> Result<SegmentWriter> {
        let path = segment_path(base, letter, number)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&FileHeader::to_bytes(number))?;
        tracing::debug!(path = %path.display(), number, "created segment file");
        Ok(SegmentWriter {
            file,
            path,
            number,
            offset: FILE_HEADER_SIZE as u64,
            sectors_offset: None,
            group: Vec::new(),
            chunks_in_segment: 0,
        })
    }

    /// Emit one complete section at the current offset, returning the
    /// descriptor offset
    fn write_section(&mut self, section_type: SectionType, payload: &[u8]) -> Result<u64> {
        let descriptor =
            SectionDescriptor::new(section_type, self.offset, payload.len() as u64);
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(&descriptor.to_bytes())?;
        self.file.write_all(payload)?;
        let at = self.offset;
        self.offset = descriptor.end_offset();
        Ok(at)
    }

    /// Start a sectors section whose size is not yet known
    fn open_sectors(&mut self) -> Result<()> {
        let placeholder = SectionDescriptor::new(SectionType::Sectors, self.offset, 0);
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(&placeholder.to_bytes())?;
        self.sectors_offset = Some(self.offset);
        self.offset += SECTION_DESCRIPTOR_SIZE as u64;
        Ok(())
    }

    /// Close the open chunk group: rewrite the sectors descriptor with its
    /// final size, then emit table and table2
    fn close_group(&mut self) -> Result<()> {
        let Some(sectors_offset) = self.sectors_offset.take() else {
            return Ok(());
        };
        let payload_size = self.offset - sectors_offset - SECTION_DESCRIPTOR_SIZE as u64;
        let descriptor =
            SectionDescriptor::new(SectionType::Sectors, sectors_offset, payload_size);
        self.file.seek(SeekFrom::Start(sectors_offset))?;
        self.file.write_all(&descriptor.to_bytes())?;
        self.file.seek(SeekFrom::Start(self.offset))?;

        let payload = build_table_payload(&self.group);
        self.write_section(SectionType::Table, &payload)?;
        self.write_section(SectionType::Table2, &payload)?;
        self.group.clear();
        Ok(())
    }
}

/// Write-side state of a handle
#[derive(Debug)]
pub struct WriteState {
    phase: WritePhase,
    failed: bool,
    values_initialized: bool,
    compression_level: CompressionLevel,
    compress_empty_block: bool,
    segment_file_size: u64,
    input_write_size: Option<u64>,
    base_path: PathBuf,
    extension_letter: char,
    chunk_buffer: Vec<u8>,
    total_input: u64,
    chunks_written: u32,
    hasher: Option<MediaHasher>,
    current: Option<SegmentWriter>,
    /// Segment 1 path and volume descriptor offset for the correction pass
    segment1_volume: Option<(PathBuf, u64)>,
    final_md5: Option<[u8; 16]>,
    final_sha1: Option<[u8; 20]>,
}

impl WriteState {
    /// Fresh pipeline writing segments derived from `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            phase: WritePhase::Fresh,
            failed: false,
            values_initialized: false,
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            input_write_size: None,
            base_path: base_path.into(),
            extension_letter: 'E',
            chunk_buffer: Vec::new(),
            total_input: 0,
            chunks_written: 0,
            hasher: Some(MediaHasher::new()),
            current: None,
            segment1_volume: None,
            final_md5: None,
            final_sha1: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    /// Pipeline hit an I/O failure and was shut down
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Setters were locked by initialization
    pub fn values_initialized(&self) -> bool {
        self.values_initialized
    }

    /// Chunks written so far
    pub fn chunks_written(&self) -> u32 {
        self.chunks_written
    }

    /// Configured chunk compression level
    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    /// Whether uniform blocks are deflated at compression level none
    pub fn compress_empty_block(&self) -> bool {
        self.compress_empty_block
    }

    /// Configured segment file size bound
    pub fn segment_file_size(&self) -> u64 {
        self.segment_file_size
    }

    /// Media digests computed by finalize
    pub fn final_hashes(&self) -> (Option<[u8; 16]>, Option<[u8; 20]>) {
        (self.final_md5, self.final_sha1)
    }

    /// Bound segment files to `size` bytes
    pub fn set_segment_file_size(&mut self, size: u64) -> Result<()> {
        if size == 0 || size > MAX_SEGMENT_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "segment file size {size} out of range"
            )));
        }
        self.segment_file_size = size;
        Ok(())
    }

    /// Configure chunk compression
    pub fn set_compression_values(
        &mut self,
        level: CompressionLevel,
        compress_empty_block: bool,
    ) {
        self.compression_level = level;
        self.compress_empty_block = compress_empty_block;
    }

    /// Announce the total media size ahead of writing
    pub fn set_input_write_size(&mut self, size: u64) -> Result<()> {
        if size == 0 || size > i64::MAX as u64 {
            return Err(Error::invalid_argument(format!(
                "input write size {size} out of range"
            )));
        }
        self.input_write_size = Some(size);
        Ok(())
    }

    fn sectors_for_bytes(bytes: u64, bytes_per_sector: u32) -> Result<u32> {
        let per_sector = u64::from(bytes_per_sector);
        let sectors = (bytes + per_sector - 1) / per_sector;
        if sectors > u32::MAX as u64 {
            return Err(Error::invalid_argument(
                "media size exceeds the addressable sector count",
            ));
        }
        Ok(sectors as u32)
    }

    /// Validate parameters, create segment 1, emit header and volume
    /// sections, and lock the setters
    pub fn initialize(&mut self, ctx: &mut WriteContext<'_>) -> Result<()> {
        if self.values_initialized {
            return Ok(());
        }
        ctx.media.validate_for_write()?;
        if !ctx.format.writable() {
            return Err(Error::format_unsupported(format!(
                "{} containers cannot be produced",
                ctx.format
            )));
        }
        if let Some(input_size) = self.input_write_size {
            ctx.media.amount_of_sectors =
                Self::sectors_for_bytes(input_size, ctx.media.bytes_per_sector)?;
        }
        self.extension_letter = ctx.format.extension_letter();

        let mut segment = SegmentWriter::create(&self.base_path, self.extension_letter, 1)?;

        // Metadata sections; EnCase 1-3 era formats repeat `header`, the
        // header2-carrying formats repeat `header2` in front of it.
        let header_payload = header::encode_header(ctx.header_values)?;
        if ctx.format.uses_xheader() {
            let header2_payload = header::encode_header2(ctx.header_values)?;
            segment.write_section(SectionType::Header2, &header2_payload)?;
            segment.write_section(SectionType::Header, &header_payload)?;
            let xheader_payload = header::encode_xheader(ctx.header_values)?;
            segment.write_section(SectionType::Xheader, &xheader_payload)?;
        } else if ctx.format.uses_header2() {
            let header2_payload = header::encode_header2(ctx.header_values)?;
            segment.write_section(SectionType::Header2, &header2_payload)?;
            segment.write_section(SectionType::Header2, &header2_payload)?;
            segment.write_section(SectionType::Header, &header_payload)?;
        } else {
            segment.write_section(SectionType::Header, &header_payload)?;
            segment.write_section(SectionType::Header, &header_payload)?;
        }

        // Chunk count is corrected at finalize once it is known
        let volume = VolumeSection::new(
            ctx.media,
            ctx.media.chunk_count(),
            self.compression_level,
            ctx.guid,
            ctx.format,
        );
        let volume_offset = segment.write_section(SectionType::Volume, &volume.to_bytes())?;
        self.segment1_volume = Some((segment.path.clone(), volume_offset));

        self.current = Some(segment);
        self.values_initialized = true;
        self.phase = WritePhase::HeaderEmitted;
        Ok(())
    }

    /// Closing-section bytes a segment must reserve room for
    fn finalize_reserve(&self, ctx: &WriteContext<'_>) -> u64 {
        let descriptor = SECTION_DESCRIPTOR_SIZE as u64;
        let mut reserve = descriptor; // done
        if ctx.format.uses_hash_section() {
            reserve += descriptor + HASH_SECTION_SIZE as u64;
        }
        if ctx.format.uses_digest() {
            reserve += descriptor + DIGEST_SECTION_SIZE as u64;
        }
        if ctx.format.uses_xhash() {
            reserve += descriptor + 512;
        }
        if !ctx.acquiry_errors.is_empty() {
            reserve += descriptor + 24 + 12 * u64::from(ctx.acquiry_errors.len());
        }
        reserve
    }

    /// Cost of closing the open group with `entries` table entries
    fn group_close_cost(entries: u64) -> u64 {
        let descriptor = SECTION_DESCRIPTOR_SIZE as u64;
        let table = descriptor + 20 + 4 * entries + 4;
        // table + table2 + the next/done section ending the segment
        2 * table + descriptor + 4
    }

    /// Make room for one more stored chunk, rolling to a new segment when
    /// the bound would be exceeded
    fn ensure_space(&mut self, stored_len: u64, ctx: &mut WriteContext<'_>) -> Result<()> {
        let reserve = self.finalize_reserve(ctx);
        let segment_file_size = self.segment_file_size;

        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| Error::invalid_state("write pipeline has no open segment"))?;

        let open_sectors_cost = if segment.sectors_offset.is_none() {
            SECTION_DESCRIPTOR_SIZE as u64
        } else {
            0
        };
        let projected = segment.offset
            + open_sectors_cost
            + stored_len
            + Self::group_close_cost(segment.group.len() as u64 + 1)
            + reserve;

        if segment.chunks_in_segment > 0 && projected > segment_file_size {
            let number = segment.number;
            segment.close_group()?;
            let next_number = number.checked_add(1).ok_or_else(|| {
                Error::invalid_argument("segment number space exhausted")
            })?;
            let mut next_payload = [0u8; 4];
            next_payload[0..2].copy_from_slice(&next_number.to_le_bytes());
            segment.write_section(SectionType::Next, &next_payload)?;
            segment.file.flush()?;

            self.current = Some(SegmentWriter::create(
                &self.base_path,
                self.extension_letter,
                next_number,
            )?);
        }

        let segment = self.current.as_mut().expect("segment open");
        if segment.sectors_offset.is_none() {
            segment.open_sectors()?;
        }
        Ok(())
    }

    /// Encode and append one full chunk
    fn flush_chunk(&mut self, ctx: &mut WriteContext<'_>) -> Result<()> {
        let raw = std::mem::take(&mut self.chunk_buffer);
        let encoded =
            codec::compress_chunk(&raw, self.compression_level, self.compress_empty_block)?;
        self.ensure_space(encoded.data.len() as u64, ctx)?;

        let segment = self.current.as_mut().expect("segment open");
        let sectors_offset = segment.sectors_offset.expect("sectors section open");
        let relative = segment.offset - sectors_offset;
        debug_assert!(relative <= 0x7FFF_FFFF);

        segment.file.seek(SeekFrom::Start(segment.offset))?;
        segment.file.write_all(&encoded.data)?;

        ctx.offsets.push(ChunkEntry {
            segment: segment.number,
            file_offset: segment.offset,
            stored_size: encoded.stored_size(),
            compressed: encoded.compressed,
            delta: false,
        });
        segment.group.push(TableEntry {
            relative_offset: relative as u32,
            compressed: encoded.compressed,
        });
        segment.offset += encoded.data.len() as u64;
        segment.chunks_in_segment += 1;
        self.chunks_written += 1;

        if segment.group.len() >= MAX_TABLE_ENTRIES {
            segment.close_group()?;
        }
        Ok(())
    }

    /// Buffer caller bytes, flushing full chunks
    pub fn write(&mut self, buf: &[u8], ctx: &mut WriteContext<'_>) -> Result<usize> {
        if self.phase == WritePhase::Finalized {
            return Err(Error::invalid_state(if self.failed {
                "write pipeline failed; handle is closed to writes"
            } else {
                "write after finalize"
            }));
        }
        self.initialize(ctx)?;

        if let Some(limit) = self.input_write_size {
            if self.total_input + buf.len() as u64 > limit {
                return Err(Error::invalid_argument(format!(
                    "write exceeds the announced input size of {limit} bytes"
                )));
            }
        }

        self.phase = WritePhase::Writing;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(buf);
        }

        let chunk_size = ctx.media.chunk_size() as usize;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let space = chunk_size - self.chunk_buffer.len();
            let take = space.min(remaining.len());
            self.chunk_buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.chunk_buffer.len() == chunk_size {
                self.flush_chunk(ctx)?;
            }
        }
        self.total_input += buf.len() as u64;
        Ok(buf.len())
    }

    /// Flush the trailing chunk, emit the closing sections, correct the
    /// volume, and seal the pipeline. Idempotent.
    pub fn finalize(&mut self, ctx: &mut WriteContext<'_>) -> Result<()> {
        if self.phase == WritePhase::Finalized {
            return Ok(());
        }
        self.initialize(ctx)?;

        // An announced input size is a promise about the media extent;
        // zero-fill whatever the caller never delivered.
        if let Some(limit) = self.input_write_size {
            if self.total_input < limit {
                let zeros = vec![0u8; 256 * 1024];
                while self.total_input < limit {
                    let take = ((limit - self.total_input) as usize).min(zeros.len());
                    self.write(&zeros[..take], ctx)?;
                }
            }
        }

        // Final media accounting: input bytes rounded up to whole sectors.
        // Chunk padding beyond that is on-disk filler, not media content.
        if self.input_write_size.is_none() {
            ctx.media.amount_of_sectors =
                Self::sectors_for_bytes(self.total_input, ctx.media.bytes_per_sector)?;
        }
        let media_size = ctx.media.media_size();
        let sector_tail = (media_size - self.total_input) as usize;
        if sector_tail > 0 {
            let tail = vec![0u8; sector_tail];
            if let Some(hasher) = self.hasher.as_mut() {
                hasher.update(&tail);
            }
            self.chunk_buffer.extend_from_slice(&tail);
        }
        if !self.chunk_buffer.is_empty() {
            let chunk_size = ctx.media.chunk_size() as usize;
            self.chunk_buffer.resize(chunk_size, 0);
            self.flush_chunk(ctx)?;
        }

        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| Error::invalid_state("write pipeline has no open segment"))?;
        segment.close_group()?;

        let (md5_computed, sha1) = self
            .hasher
            .take()
            .map(MediaHasher::finalize)
            .unwrap_or(([0u8; 16], [0u8; 20]));
        let md5 = ctx.md5_override.unwrap_or(md5_computed);

        if !ctx.acquiry_errors.is_empty() {
            let payload = build_error2_payload(ctx.acquiry_errors);
            segment.write_section(SectionType::Error2, &payload)?;
        }
        if ctx.format.uses_hash_section() {
            let payload = HashSection { md5 }.to_bytes();
            segment.write_section(SectionType::Hash, &payload)?;
        }
        if ctx.format.uses_digest() {
            let payload = DigestSection { md5, sha1 }.to_bytes();
            segment.write_section(SectionType::Digest, &payload)?;
        }
        if ctx.format.uses_xhash() {
            let text = crate::digest::build_xhash_text(&md5, Some(&sha1));
            let payload = header::compress_payload(text.as_bytes())?;
            segment.write_section(SectionType::Xhash, &payload)?;
        }
        segment.write_section(SectionType::Done, &[])?;
        segment.file.set_len(segment.offset)?;
        segment.file.flush()?;

        // Correction pass: segment 1's volume was written before the chunk
        // count was known
        if let Some((path, volume_offset)) = &self.segment1_volume {
            let volume = VolumeSection::new(
                ctx.media,
                self.chunks_written,
                self.compression_level,
                ctx.guid,
                ctx.format,
            );
            let mut file = OpenOptions::new().write(true).open(path)?;
            file.seek(SeekFrom::Start(
                volume_offset + SECTION_DESCRIPTOR_SIZE as u64,
            ))?;
            file.write_all(&volume.to_bytes())?;
            file.flush()?;
        }

        self.final_md5 = Some(md5);
        self.final_sha1 = Some(sha1);
        self.current = None;
        self.phase = WritePhase::Finalized;
        tracing::debug!(
            chunks = self.chunks_written,
            media_size,
            "write pipeline finalized"
        );
        Ok(())
    }

    /// Seal the pipeline after an I/O failure; further writes are rejected
    pub fn mark_failed(&mut self) {
        self.failed = true;
        self.phase = WritePhase::Finalized;
    }
}
