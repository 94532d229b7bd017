//! The handle: top-level owner of an open segment set
//!
//! An [`EwfHandle`] owns the segment table, offset table, value tables and
//! error registries of one image, plus the read or write pipeline state.
//! A handle is not internally synchronized; share one across threads and
//! that is a caller bug. Distinct handles are fully independent.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ewfvault_core::{
    CompressionLevel, Error, Format, MediaFlags, MediaInfo, MediaType, OpenFlags, Result,
    VolumeKind,
};

use crate::delta::DeltaSegment;
use crate::digest::{self, DigestSection, HashSection};
use crate::header::{self, HeaderSections};
use crate::read::ReadState;
use crate::registry::{parse_error2_payload, ErrorSector, ErrorSectorList};
use crate::section::SectionType;
use crate::segment::{Segment, SegmentTable};
use crate::table::{self, OffsetTable, TableEntry, TableWarning};
use crate::values::{DateFormat, ValuesTable};
use crate::volume::VolumeSection;
use crate::write::{WriteContext, WritePhase, WriteState};

/// Everything collected while scanning segment sections during open
#[derive(Default)]
struct ScanOutcome {
    volume: Option<VolumeSection>,
    headers: HeaderSections,
    xhash_text: Option<String>,
    hash_md5: Option<[u8; 16]>,
    digest: Option<([u8; 16], [u8; 20])>,
    acquiry_errors: ErrorSectorList,
    offsets: OffsetTable,
    warnings: Vec<TableWarning>,
}

/// An open EWF image
#[derive(Debug)]
pub struct EwfHandle {
    flags: OpenFlags,
    format: Format,
    media: MediaInfo,
    compression_level: CompressionLevel,
    chunk_count: u32,
    guid: Option<[u8; 16]>,
    md5_hash: Option<[u8; 16]>,
    sha1_hash: Option<[u8; 20]>,
    segments: SegmentTable,
    offsets: OffsetTable,
    header_sections: HeaderSections,
    xhash_text: Option<String>,
    header_values: Option<ValuesTable>,
    hash_values: Option<ValuesTable>,
    acquiry_errors: ErrorSectorList,
    warnings: Vec<TableWarning>,
    read: Option<ReadState>,
    write: Option<WriteState>,
    delta: DeltaSegment,
    closed: bool,
}

impl EwfHandle {
    /// Open a segment set
    ///
    /// For reading, `paths` lists every segment file (and optionally a
    /// delta segment) of the image. For writing, `paths` holds a single
    /// extension-less base path; numbered extensions are derived from it.
    /// `OPEN_READ | OPEN_WRITE` opens an existing image for delta-segment
    /// chunk replacement.
    pub fn open<P: AsRef<Path>>(paths: &[P], flags: OpenFlags) -> Result<EwfHandle> {
        flags.validate()?;
        if paths.is_empty() {
            return Err(Error::invalid_argument("at least one path is required"));
        }
        if flags.is_write() && !flags.is_read() {
            if paths.len() != 1 {
                return Err(Error::invalid_argument(
                    "writing takes a single base path",
                ));
            }
            return Ok(Self::new_write(paths[0].as_ref(), flags));
        }
        Self::open_read(paths, flags)
    }

    fn new_write(base_path: &Path, flags: OpenFlags) -> EwfHandle {
        EwfHandle {
            flags,
            format: Format::Encase5,
            media: MediaInfo::default(),
            compression_level: CompressionLevel::None,
            chunk_count: 0,
            guid: None,
            md5_hash: None,
            sha1_hash: None,
            segments: SegmentTable::new(),
            offsets: OffsetTable::new(),
            header_sections: HeaderSections::default(),
            xhash_text: None,
            header_values: None,
            hash_values: None,
            acquiry_errors: ErrorSectorList::new(),
            warnings: Vec::new(),
            read: None,
            write: Some(WriteState::new(base_path)),
            delta: DeltaSegment::new(),
            closed: false,
        }
    }

    fn open_read<P: AsRef<Path>>(paths: &[P], flags: OpenFlags) -> Result<EwfHandle> {
        let mut segments = SegmentTable::new();
        let mut delta_segments: Vec<Segment> = Vec::new();
        for path in paths {
            let segment = Segment::open_existing(path)?;
            let is_delta = segment
                .sections
                .iter()
                .any(|section| section.section_type == SectionType::DeltaChunk);
            if is_delta {
                delta_segments.push(segment);
            } else {
                segments.insert(segment)?;
            }
        }
        if segments.is_empty() {
            return Err(Error::invalid_argument("no segment files among the paths"));
        }
        if delta_segments.len() > 1 {
            return Err(Error::invalid_argument("more than one delta segment"));
        }
        segments.verify_contiguous()?;

        let mut scan = ScanOutcome::default();
        for number in 1..=segments.len() as u16 {
            let segment = segments.get_mut(number).expect("contiguous numbering");
            Self::scan_segment(segment, &mut scan)?;
        }

        let volume = scan
            .volume
            .take()
            .ok_or_else(|| Error::chain_corrupt(1, "no volume section in the segment set"))?;
        if scan.offsets.len() != volume.chunk_count {
            return Err(Error::chain_corrupt(
                1,
                format!(
                    "offset table covers {} chunks, volume declares {}",
                    scan.offsets.len(),
                    volume.chunk_count
                ),
            ));
        }

        let format = Self::determine_format(&volume, &scan);
        let mut offsets = scan.offsets;

        let delta = match delta_segments.pop() {
            Some(mut segment) => {
                DeltaSegment::from_existing(&mut segment, &mut offsets, flags.is_write())?
            }
            None => DeltaSegment::new(),
        };

        let md5_hash = scan.digest.map(|(md5, _)| md5).or(scan.hash_md5);
        let sha1_hash = scan.digest.map(|(_, sha1)| sha1);

        tracing::debug!(
            segments = segments.len(),
            chunks = volume.chunk_count,
            %format,
            "opened image"
        );

        Ok(EwfHandle {
            flags,
            format,
            media: volume.media.clone(),
            compression_level: volume.compression_level,
            chunk_count: volume.chunk_count,
            guid: Some(volume.guid),
            md5_hash,
            sha1_hash,
            segments,
            offsets,
            header_sections: scan.headers,
            xhash_text: scan.xhash_text,
            header_values: None,
            hash_values: None,
            acquiry_errors: scan.acquiry_errors,
            warnings: scan.warnings,
            read: Some(ReadState::new()),
            write: None,
            delta,
            closed: false,
        })
    }

    /// Interpret one segment's sections into the scan outcome
    fn scan_segment(segment: &mut Segment, scan: &mut ScanOutcome) -> Result<()> {
        let number = segment.number;
        let sections = segment.sections.clone();
        // Bounds of the sectors section the upcoming tables refer to, and a
        // parsed `table` waiting for its `table2` backup
        let mut pending_sectors: Option<(u64, u64)> = None;
        let mut pending_table: Option<(Result<Vec<TableEntry>>, (u64, u64))> = None;

        for descriptor in &sections {
            match descriptor.section_type {
                SectionType::Header if scan.headers.header.is_none() => {
                    let payload = segment.read_payload(descriptor)?;
                    scan.headers.header =
                        Some(header::decompress_payload(&payload, "header", number)?);
                }
                SectionType::Header2 if scan.headers.header2.is_none() => {
                    let payload = segment.read_payload(descriptor)?;
                    scan.headers.header2 =
                        Some(header::decompress_payload(&payload, "header2", number)?);
                }
                SectionType::Xheader if scan.headers.xheader.is_none() => {
                    let payload = segment.read_payload(descriptor)?;
                    scan.headers.xheader =
                        Some(header::decompress_payload(&payload, "xheader", number)?);
                }
                SectionType::Volume | SectionType::Disk | SectionType::Data
                    if scan.volume.is_none() =>
                {
                    let payload = segment.read_payload(descriptor)?;
                    scan.volume = Some(VolumeSection::parse(&payload, number)?);
                }
                SectionType::Sectors => {
                    Self::commit_pending(scan, number, pending_table.take())?;
                    pending_sectors = Some((descriptor.offset, descriptor.end_offset()));
                }
                SectionType::Table => {
                    Self::commit_pending(scan, number, pending_table.take())?;
                    let bounds = pending_sectors.ok_or_else(|| {
                        Error::chain_corrupt(number, "table without a preceding sectors section")
                    })?;
                    let parsed = segment
                        .read_payload(descriptor)
                        .and_then(|payload| {
                            table::parse_table_payload(&payload, "table", number)
                        });
                    pending_table = Some((parsed, bounds));
                }
                SectionType::Table2 => {
                    let Some((primary, bounds)) = pending_table.take() else {
                        return Err(Error::chain_corrupt(
                            number,
                            "table2 without a preceding table",
                        ));
                    };
                    let backup = segment
                        .read_payload(descriptor)
                        .and_then(|payload| {
                            table::parse_table_payload(&payload, "table2", number)
                        });
                    let (entries, warning) =
                        table::resolve_chunk_group(primary, Some(backup), number)?;
                    if let Some(warning) = warning {
                        scan.warnings.push(warning);
                    }
                    scan.offsets
                        .extend_from_group(number, bounds.0, bounds.1, &entries)?;
                }
                SectionType::Error2 => {
                    let payload = segment.read_payload(descriptor)?;
                    scan.acquiry_errors = parse_error2_payload(&payload, number)?;
                }
                SectionType::Hash => {
                    let payload = segment.read_payload(descriptor)?;
                    scan.hash_md5 = Some(HashSection::parse(&payload, number)?.md5);
                }
                SectionType::Digest => {
                    let payload = segment.read_payload(descriptor)?;
                    let parsed = DigestSection::parse(&payload, number)?;
                    scan.digest = Some((parsed.md5, parsed.sha1));
                }
                SectionType::Xhash => {
                    let payload = segment.read_payload(descriptor)?;
                    let inflated = header::decompress_payload(&payload, "xhash", number)?;
                    scan.xhash_text = Some(String::from_utf8_lossy(&inflated).into_owned());
                }
                _ => {}
            }
        }
        Self::commit_pending(scan, number, pending_table.take())?;
        Ok(())
    }

    /// Commit a table that never met a table2 backup
    fn commit_pending(
        scan: &mut ScanOutcome,
        number: u16,
        pending: Option<(Result<Vec<TableEntry>>, (u64, u64))>,
    ) -> Result<()> {
        let Some((primary, bounds)) = pending else {
            return Ok(());
        };
        let (entries, warning) = table::resolve_chunk_group(primary, None, number)?;
        if let Some(warning) = warning {
            scan.warnings.push(warning);
        }
        scan.offsets
            .extend_from_group(number, bounds.0, bounds.1, &entries)
    }

    /// Decide the format variant from the volume discriminator, falling
    /// back to the structure of the segment set
    fn determine_format(volume: &VolumeSection, scan: &ScanOutcome) -> Format {
        if let Some(format) = Format::from_code(volume.format_code) {
            return format;
        }
        if volume.smart_layout {
            Format::Smart
        } else if scan.headers.xheader.is_some() || scan.xhash_text.is_some() {
            Format::Ewfx
        } else if scan.digest.is_some() {
            Format::Encase6
        } else if scan.headers.header2.is_some() {
            Format::Encase5
        } else {
            Format::Encase3
        }
    }

    // --- media parameter getters -----------------------------------------

    /// Sectors grouped into one chunk
    pub fn sectors_per_chunk(&self) -> u32 {
        self.media.sectors_per_chunk
    }

    /// Byte size of one sector
    pub fn bytes_per_sector(&self) -> u32 {
        self.media.bytes_per_sector
    }

    /// Total sectors on the media
    pub fn amount_of_sectors(&self) -> u32 {
        self.media.amount_of_sectors
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u32 {
        self.media.chunk_size()
    }

    /// Sectors per acquisition-error reporting unit
    pub fn error_granularity(&self) -> u32 {
        self.media.error_granularity
    }

    /// Total media size in bytes
    pub fn media_size(&self) -> u64 {
        self.media.media_size()
    }

    /// Kind of source media
    pub fn media_type(&self) -> MediaType {
        self.media.media_type
    }

    /// Media flag bits
    pub fn media_flags(&self) -> MediaFlags {
        self.media.media_flags
    }

    /// Physical or logical acquisition
    pub fn volume_kind(&self) -> VolumeKind {
        self.media.media_flags.volume_kind()
    }

    /// Container format variant
    pub fn format(&self) -> Format {
        self.format
    }

    /// Chunk compression level
    pub fn compression_level(&self) -> CompressionLevel {
        match &self.write {
            Some(write) => write.compression_level(),
            None => self.compression_level,
        }
    }

    /// Total chunks in the image
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Number of segment files
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Container GUID
    pub fn guid(&self) -> Option<[u8; 16]> {
        self.guid
    }

    /// MD5 of the media, from the hash sections or a prior set
    pub fn md5_hash(&self) -> Option<[u8; 16]> {
        self.md5_hash
    }

    /// SHA1 of the media when a digest section carried one
    pub fn sha1_hash(&self) -> Option<[u8; 20]> {
        self.sha1_hash
    }

    /// Delta segment filename, configured or adopted
    pub fn delta_segment_filename(&self) -> Option<&Path> {
        self.delta.filename()
    }

    /// Chunks written through the write pipeline
    pub fn write_amount_of_chunks(&self) -> u32 {
        self.write
            .as_ref()
            .map(WriteState::chunks_written)
            .unwrap_or(0)
    }

    /// Non-fatal conditions collected while opening
    pub fn warnings(&self) -> &[TableWarning] {
        &self.warnings
    }

    // --- error registries -------------------------------------------------

    /// Number of recorded acquiry errors
    pub fn amount_of_acquiry_errors(&self) -> u32 {
        self.acquiry_errors.len()
    }

    /// Acquiry error by index, in recording order
    pub fn acquiry_error(&self, index: u32) -> Result<ErrorSector> {
        self.acquiry_errors.get(index)
    }

    /// Record a sector range the source medium could not provide
    pub fn add_acquiry_error(&mut self, starting_sector: u64, sector_count: u32) {
        self.acquiry_errors.add(starting_sector, sector_count);
    }

    /// Number of CRC errors hit while reading
    pub fn amount_of_crc_errors(&self) -> u32 {
        self.read
            .as_ref()
            .map(|read| read.crc_errors.len())
            .unwrap_or(0)
    }

    /// CRC error by index, in recording order
    pub fn crc_error(&self, index: u32) -> Result<ErrorSector> {
        let read = self
            .read
            .as_ref()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?;
        read.crc_errors.get(index)
    }

    /// Record a CRC error range directly
    pub fn add_crc_error(&mut self, starting_sector: u64, sector_count: u32) -> Result<()> {
        let read = self
            .read
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?;
        read.crc_errors.add(starting_sector, sector_count);
        Ok(())
    }

    // --- setters (write handles, before initialization) -------------------

    fn writable_fresh(&mut self) -> Result<&mut WriteState> {
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for writing"))?;
        if write.values_initialized() {
            return Err(Error::invalid_state(
                "write values are initialized and locked",
            ));
        }
        Ok(write)
    }

    /// Set sectors per chunk; write handles before initialization only
    pub fn set_sectors_per_chunk(&mut self, sectors_per_chunk: u32) -> Result<()> {
        if sectors_per_chunk == 0 || sectors_per_chunk > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid sectors per chunk"));
        }
        self.writable_fresh()?;
        self.media.sectors_per_chunk = sectors_per_chunk;
        Ok(())
    }

    /// Set bytes per sector; write handles before initialization only
    pub fn set_bytes_per_sector(&mut self, bytes_per_sector: u32) -> Result<()> {
        if bytes_per_sector == 0 || bytes_per_sector > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid bytes per sector"));
        }
        self.writable_fresh()?;
        self.media.bytes_per_sector = bytes_per_sector;
        Ok(())
    }

    /// Set the total sector count ahead of writing
    pub fn set_amount_of_sectors(&mut self, amount_of_sectors: u32) -> Result<()> {
        self.writable_fresh()?;
        self.media.amount_of_sectors = amount_of_sectors;
        Ok(())
    }

    /// Set the acquisition-error reporting granularity
    pub fn set_error_granularity(&mut self, error_granularity: u32) -> Result<()> {
        if error_granularity == 0 || error_granularity > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid error granularity"));
        }
        self.writable_fresh()?;
        self.media.error_granularity = error_granularity;
        Ok(())
    }

    /// Set the media type and volume kind
    pub fn set_media_type(
        &mut self,
        media_type: MediaType,
        volume_kind: VolumeKind,
    ) -> Result<()> {
        self.writable_fresh()?;
        self.media.media_type = media_type;
        self.media.media_flags = match volume_kind {
            VolumeKind::Physical => MediaFlags::PHYSICAL,
            VolumeKind::Logical => MediaFlags::default(),
        };
        Ok(())
    }

    /// Set the container format variant to produce
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        if !format.writable() {
            return Err(Error::format_unsupported(format!(
                "{format} containers cannot be produced"
            )));
        }
        self.writable_fresh()?;
        self.format = format;
        Ok(())
    }

    /// Set the container GUID
    pub fn set_guid(&mut self, guid: [u8; 16]) -> Result<()> {
        self.writable_fresh()?;
        self.guid = Some(guid);
        Ok(())
    }

    /// Set the media MD5; set-once
    pub fn set_md5_hash(&mut self, md5: [u8; 16]) -> Result<()> {
        if self.md5_hash.is_some() {
            return Err(Error::already_set("MD5 hash"));
        }
        self.md5_hash = Some(md5);
        Ok(())
    }

    /// Set the delta segment filename; set-once, write-capable handles only
    pub fn set_delta_segment_filename(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if !self.flags.is_write() {
            return Err(Error::invalid_state("handle is not open for writing"));
        }
        if let Some(write) = &self.write {
            if write.values_initialized() {
                return Err(Error::invalid_state(
                    "write values are initialized and locked",
                ));
            }
        }
        self.delta.set_filename(path)
    }

    /// Zero-fill chunks whose CRC fails instead of returning stored bytes
    pub fn set_read_wipe_chunk_on_error(&mut self, wipe_on_error: bool) -> Result<()> {
        let read = self
            .read
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?;
        read.wipe_on_error = wipe_on_error;
        Ok(())
    }

    /// Bound segment files to `size` bytes
    pub fn set_segment_file_size(&mut self, size: u64) -> Result<()> {
        self.writable_fresh()?.set_segment_file_size(size)
    }

    /// Configure chunk compression
    pub fn set_compression_values(
        &mut self,
        level: CompressionLevel,
        compress_empty_block: bool,
    ) -> Result<()> {
        self.writable_fresh()?
            .set_compression_values(level, compress_empty_block);
        self.compression_level = level;
        Ok(())
    }

    /// Announce the total media size ahead of writing; the zero padding
    /// finalize adds to fill the last chunk then stays out of the media
    /// accounting
    pub fn set_input_write_size(&mut self, size: u64) -> Result<()> {
        self.writable_fresh()?.set_input_write_size(size)
    }

    /// Set a case metadata value
    pub fn set_header_value(
        &mut self,
        identifier: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        self.writable_fresh()?;
        self.header_values
            .get_or_insert_with(ValuesTable::header_defaults)
            .set(identifier, value);
        Ok(())
    }

    /// Set a hash metadata value
    pub fn set_hash_value(
        &mut self,
        identifier: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        self.writable_fresh()?;
        self.hash_values
            .get_or_insert_with(ValuesTable::hash_defaults)
            .set(identifier, value);
        Ok(())
    }

    // --- value tables ------------------------------------------------------

    /// Number of header value identifiers (zero before parsing)
    pub fn amount_of_header_values(&self) -> u32 {
        self.header_values
            .as_ref()
            .map(|values| values.len() as u32)
            .unwrap_or(0)
    }

    /// Header value identifier at a stable index
    pub fn header_value_identifier(&self, index: u32) -> Result<&str> {
        let values = self
            .header_values
            .as_ref()
            .ok_or_else(|| Error::invalid_state("header values not parsed or set"))?;
        values.identifier(index as usize)
    }

    /// Header value by identifier
    pub fn header_value(&self, identifier: &str) -> Option<&str> {
        self.header_values
            .as_ref()
            .and_then(|values| values.get(identifier))
    }

    /// Number of hash value identifiers (zero before parsing)
    pub fn amount_of_hash_values(&self) -> u32 {
        self.hash_values
            .as_ref()
            .map(|values| values.len() as u32)
            .unwrap_or(0)
    }

    /// Hash value identifier at a stable index
    pub fn hash_value_identifier(&self, index: u32) -> Result<&str> {
        let values = self
            .hash_values
            .as_ref()
            .ok_or_else(|| Error::invalid_state("hash values not parsed or set"))?;
        values.identifier(index as usize)
    }

    /// Hash value by identifier
    pub fn hash_value(&self, identifier: &str) -> Option<&str> {
        self.hash_values
            .as_ref()
            .and_then(|values| values.get(identifier))
    }

    /// Parse case metadata out of the header sections found during open
    ///
    /// Prefers `xheader`, then `header2`, then `header`. Date-carrying
    /// values are converted to `date_format`.
    pub fn parse_header_values(&mut self, date_format: DateFormat) -> Result<()> {
        let values = if let Some(xheader) = &self.header_sections.xheader {
            header::parse_xheader_text(&String::from_utf8_lossy(xheader), date_format)
        } else if let Some(header2) = &self.header_sections.header2 {
            header::parse_header_text(&header::decode_header2_text(header2), date_format)
        } else if let Some(header) = &self.header_sections.header {
            header::parse_header_text(&String::from_utf8_lossy(header), date_format)
        } else {
            return Err(Error::invalid_state("no header sections available"));
        };

        // EnCase 2 and 3 share a container layout; only the recorded
        // software version tells them apart.
        if self.format == Format::Encase2
            && values
                .get("acquiry_software_version")
                .map(|version| version.starts_with('3'))
                .unwrap_or(false)
        {
            self.format = Format::Encase3;
        }
        self.header_values = Some(values);
        Ok(())
    }

    /// Populate the hash value table from `xhash` and the fixed sections
    pub fn parse_hash_values(&mut self) -> Result<()> {
        if self.xhash_text.is_none() && self.md5_hash.is_none() && self.sha1_hash.is_none() {
            return Err(Error::invalid_state("no hash sections available"));
        }
        let mut values = match &self.xhash_text {
            Some(text) => digest::parse_xhash_text(text),
            None => ValuesTable::hash_defaults(),
        };
        if values.get("md5").is_none() {
            if let Some(md5) = self.md5_hash {
                values.set("md5", hex::encode(md5));
            }
        }
        if values.get("sha1").is_none() {
            if let Some(sha1) = self.sha1_hash {
                values.set("sha1", hex::encode(sha1));
            }
        }
        self.hash_values = Some(values);
        Ok(())
    }

    /// Deep-copy the header value table from another handle
    pub fn copy_header_values_from(&mut self, source: &EwfHandle) -> Result<()> {
        let source_values = source
            .header_values
            .as_ref()
            .ok_or_else(|| Error::invalid_state("source handle has no header values"))?;
        self.header_values
            .get_or_insert_with(ValuesTable::header_defaults)
            .copy_from(source_values);
        Ok(())
    }

    // --- read pipeline -----------------------------------------------------

    /// Move the media cursor; negative offsets and offsets at or past the
    /// media size are rejected
    pub fn seek_offset(&mut self, offset: i64) -> Result<u64> {
        if offset < 0 {
            return Err(Error::invalid_argument("negative seek offset"));
        }
        let read = self
            .read
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?;
        read.seek(offset as u64, &self.media)?;
        Ok(offset as u64)
    }

    /// Read media bytes at the cursor; short only at end of media
    pub fn read_buffer(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self
            .read
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?;
        read.read(
            buf,
            &self.media,
            &self.offsets,
            &mut self.segments,
            &mut self.delta,
        )
    }

    // --- write pipeline ----------------------------------------------------

    /// Append media bytes (write handles), or replace whole chunks at the
    /// cursor through the delta segment (read-write handles)
    pub fn write_buffer(&mut self, buf: &[u8]) -> Result<usize> {
        if self.flags.is_read() && self.flags.is_write() {
            return self.write_delta_buffer(buf);
        }
        let guid = *self
            .guid
            .get_or_insert_with(|| *uuid::Uuid::new_v4().as_bytes());
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for writing"))?;
        let header_values = self
            .header_values
            .get_or_insert_with(ValuesTable::header_defaults);
        let mut ctx = WriteContext {
            format: self.format,
            media: &mut self.media,
            guid,
            header_values,
            acquiry_errors: &self.acquiry_errors,
            md5_override: self.md5_hash,
            offsets: &mut self.offsets,
        };
        let result = write.write(buf, &mut ctx);
        if let Err(Error::Io(_)) = &result {
            write.mark_failed();
        }
        result
    }

    /// Chunk-aligned, chunk-sized replacement writes into the delta segment
    fn write_delta_buffer(&mut self, buf: &[u8]) -> Result<usize> {
        let chunk_size = self.media.chunk_size() as usize;
        let (chunk_index, intra_offset) = self
            .read
            .as_ref()
            .ok_or_else(|| Error::invalid_state("handle is not open for reading"))?
            .cursor();
        if intra_offset != 0 || buf.len() % chunk_size != 0 {
            return Err(Error::invalid_argument(
                "delta writes must be chunk aligned and chunk sized",
            ));
        }
        let chunks = (buf.len() / chunk_size) as u32;
        if u64::from(chunk_index) + u64::from(chunks) > u64::from(self.offsets.len()) {
            return Err(Error::invalid_argument("delta write past end of media"));
        }

        if !self.delta.is_open() {
            let default_path = self
                .segments
                .get(1)
                .map(|segment| segment.path.with_extension("d01"))
                .ok_or_else(|| Error::invalid_state("no segment files open"))?;
            self.delta.ensure_open(&default_path)?;
        }

        for (index, block) in buf.chunks(chunk_size).enumerate() {
            let chunk = chunk_index + index as u32;
            let (offset, stored_size) = self.delta.write_chunk(chunk, block)?;
            self.offsets.redirect_to_delta(chunk, offset, stored_size)?;
            if let Some(read) = self.read.as_mut() {
                read.invalidate_chunk(chunk);
            }
        }
        if let Some(read) = self.read.as_mut() {
            read.advance_chunks(chunks);
        }
        Ok(buf.len())
    }

    /// Flush and seal the write pipeline; idempotent
    pub fn finalize(&mut self) -> Result<()> {
        let guid = *self
            .guid
            .get_or_insert_with(|| *uuid::Uuid::new_v4().as_bytes());
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| Error::invalid_state("handle is not open for writing"))?;
        let header_values = self
            .header_values
            .get_or_insert_with(ValuesTable::header_defaults);
        let mut ctx = WriteContext {
            format: self.format,
            media: &mut self.media,
            guid,
            header_values,
            acquiry_errors: &self.acquiry_errors,
            md5_override: self.md5_hash,
            offsets: &mut self.offsets,
        };
        let result = write.finalize(&mut ctx);
        if let Err(Error::Io(_)) = &result {
            write.mark_failed();
        }
        result?;

        let (md5, sha1) = write.final_hashes();
        if self.md5_hash.is_none() {
            self.md5_hash = md5;
        }
        if self.sha1_hash.is_none() {
            self.sha1_hash = sha1;
        }
        self.chunk_count = write.chunks_written();
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(write) = &self.write {
            if write.phase() != WritePhase::Finalized {
                self.finalize()?;
            }
        }
        self.delta.close()?;
        self.closed = true;
        Ok(())
    }

    /// Close the handle; a write handle is finalized first when needed
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for EwfHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.shutdown() {
                tracing::warn!(error = %err, "closing handle during drop failed");
            }
        }
    }
}

impl Read for EwfHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_buffer(buf)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    }
}

impl Seek for EwfHandle {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let position = self
            .read
            .as_ref()
            .map(|read| read.position(self.media.chunk_size()))
            .unwrap_or(0) as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => position + offset,
            SeekFrom::End(offset) => self.media.media_size() as i64 + offset,
        };
        self.seek_offset(target)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;
    use std::path::PathBuf;

    use md5::Digest as Md5Digest;

    use crate::section::SectionDescriptor;

    /// Deterministic pseudo-random bytes, incompressible in practice
    fn noise(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    fn segment_paths(base: &Path, letter: char) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for number in 1u16.. {
            let path = crate::segment::segment_path(base, letter, number).unwrap();
            if !path.exists() {
                break;
            }
            paths.push(path);
        }
        paths
    }

    fn write_image(
        base: &Path,
        data: &[u8],
        configure: impl FnOnce(&mut EwfHandle),
    ) -> Vec<PathBuf> {
        let mut handle = EwfHandle::open(&[base], OpenFlags::WRITE).unwrap();
        configure(&mut handle);
        let mut written = 0;
        while written < data.len() {
            let take = (data.len() - written).min(257 * 1024);
            handle.write_buffer(&data[written..written + take]).unwrap();
            written += take;
        }
        handle.finalize().unwrap();
        let letter = handle.format().extension_letter();
        handle.close().unwrap();
        segment_paths(base, letter)
    }

    fn read_all(handle: &mut EwfHandle) -> Vec<u8> {
        handle.seek_offset(0).unwrap();
        let mut data = Vec::new();
        let mut buf = vec![0u8; 96 * 1024];
        loop {
            let read = handle.read_buffer(&mut buf).unwrap();
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
        }
        data
    }

    #[test]
    fn scenario_empty_image_encase5() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("blank");
        let data = vec![0u8; 10 * 1024 * 1024];

        let paths = write_image(&base, &data, |handle| {
            handle.set_sectors_per_chunk(64).unwrap();
            handle.set_bytes_per_sector(512).unwrap();
            handle.set_amount_of_sectors(20480).unwrap();
            handle.set_format(Format::Encase5).unwrap();
            handle
                .set_compression_values(CompressionLevel::None, false)
                .unwrap();
        });
        assert_eq!(paths.len(), 1);

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.media_size(), 10_485_760);
        assert_eq!(handle.amount_of_sectors(), 20480);
        assert_eq!(handle.chunk_count(), 320);
        assert_eq!(handle.format(), Format::Encase5);

        let contents = read_all(&mut handle);
        assert_eq!(contents.len(), data.len());
        assert!(contents.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn scenario_single_segment_compressed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("compressed");
        let data = noise(0x1234, 4 * 1024 * 1024);

        let paths = write_image(&base, &data, |handle| {
            handle
                .set_compression_values(CompressionLevel::Fast, false)
                .unwrap();
        });
        assert_eq!(paths.len(), 1);

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.segment_count(), 1);
        assert_eq!(read_all(&mut handle), data);
    }

    #[test]
    fn scenario_segment_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("split");
        let data = noise(0xBEEF, 5 * 1024 * 1024);

        let paths = write_image(&base, &data, |handle| {
            handle.set_segment_file_size(1_048_576).unwrap();
        });
        assert!(paths.len() >= 5, "expected >= 5 segments, got {}", paths.len());

        // Every segment stays within the configured bound
        for path in &paths {
            assert!(std::fs::metadata(path).unwrap().len() <= 1_048_576);
        }

        // The chain of next sections reaches done in the last segment
        for (index, path) in paths.iter().enumerate() {
            let segment = Segment::open_existing(path).unwrap();
            let last = segment.sections.last().unwrap();
            if index + 1 < paths.len() {
                assert_eq!(last.section_type, SectionType::Next);
            } else {
                assert_eq!(last.section_type, SectionType::Done);
            }
        }

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.segment_count(), paths.len());
        assert_eq!(read_all(&mut handle), data);
    }

    #[test]
    fn scenario_corruption_detection() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tamper");
        let data = noise(0x77, 1024 * 1024);
        let paths = write_image(&base, &data, |_| {});

        // Locate chunk 5 and flip a byte inside its stored data
        let (chunk_offset, chunk_segment) = {
            let handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
            let entry = handle.offsets.get(5).copied().unwrap();
            (entry.file_offset, entry.segment)
        };
        assert_eq!(chunk_segment, 1);
        {
            use std::io::{Seek as _, SeekFrom, Write as _};
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .open(&paths[0])
                .unwrap();
            file.seek(SeekFrom::Start(chunk_offset + 10)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        handle.set_read_wipe_chunk_on_error(true).unwrap();
        let chunk_size = handle.chunk_size() as usize;

        // Unaffected chunk reads intact
        handle.seek_offset(0).unwrap();
        let mut buf = vec![0u8; chunk_size];
        assert_eq!(handle.read_buffer(&mut buf).unwrap(), chunk_size);
        assert_eq!(buf, data[..chunk_size]);
        assert_eq!(handle.amount_of_crc_errors(), 0);

        // Affected chunk is wiped and the error recorded, not fatal
        handle.seek_offset(5 * chunk_size as i64).unwrap();
        assert_eq!(handle.read_buffer(&mut buf).unwrap(), chunk_size);
        assert!(buf.iter().all(|&byte| byte == 0));
        assert_eq!(handle.amount_of_crc_errors(), 1);
        let error = handle.crc_error(0).unwrap();
        assert_eq!(error.starting_sector, 5 * 64);
        assert_eq!(error.sector_count, 64);
    }

    #[test]
    fn scenario_backup_table_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("backup");
        let data = noise(0xA5, 512 * 1024);
        let paths = write_image(&base, &data, |_| {});

        // Zero the primary table's entry array, leaving table2 intact
        {
            use std::io::{Seek as _, SeekFrom, Write as _};
            let segment = Segment::open_existing(&paths[0]).unwrap();
            let table: &SectionDescriptor = segment
                .sections
                .iter()
                .find(|section| section.section_type == SectionType::Table)
                .unwrap();
            let entries_offset = table.payload_offset() + 20;
            let entries_len = table.payload_size() as usize - 20 - 4;
            drop(segment);

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .open(&paths[0])
                .unwrap();
            file.seek(SeekFrom::Start(entries_offset)).unwrap();
            file.write_all(&vec![0u8; entries_len]).unwrap();
        }

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.warnings().len(), 1);
        assert!(matches!(
            handle.warnings()[0],
            TableWarning::BackupRecovered { segment: 1 }
        ));
        assert_eq!(read_all(&mut handle), data);
    }

    #[test]
    fn scenario_acquiry_error_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("errors");
        let data = noise(0x31, 256 * 1024);

        let mut handle = EwfHandle::open(&[&base], OpenFlags::WRITE).unwrap();
        handle.add_acquiry_error(1024, 64);
        handle.add_acquiry_error(4096, 128);
        handle.add_acquiry_error(1024, 64); // duplicate, ignored
        handle.write_buffer(&data).unwrap();
        handle.finalize().unwrap();
        handle.close().unwrap();

        let paths = segment_paths(&base, 'E');
        let handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.amount_of_acquiry_errors(), 2);
        let first = handle.acquiry_error(0).unwrap();
        assert_eq!((first.starting_sector, first.sector_count), (1024, 64));
        let second = handle.acquiry_error(1).unwrap();
        assert_eq!((second.starting_sector, second.sector_count), (4096, 128));
        assert!(handle.acquiry_error(2).is_err());
    }

    #[test]
    fn test_setter_lockout_after_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("locked");
        let mut handle = EwfHandle::open(&[&base], OpenFlags::WRITE).unwrap();
        handle.set_sectors_per_chunk(32).unwrap();
        handle.write_buffer(&[0u8; 4096]).unwrap();

        assert!(matches!(
            handle.set_sectors_per_chunk(64).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle.set_bytes_per_sector(4096).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle.set_segment_file_size(1 << 20).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle
                .set_compression_values(CompressionLevel::Best, false)
                .unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle
                .set_media_type(MediaType::Removable, VolumeKind::Logical)
                .unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle.set_guid([1u8; 16]).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle.set_format(Format::Encase6).unwrap_err(),
            Error::InvalidState(_)
        ));

        handle.finalize().unwrap();
    }

    #[test]
    fn test_md5_hash_set_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("setonce");
        let mut handle = EwfHandle::open(&[&base], OpenFlags::WRITE).unwrap();
        handle.set_md5_hash([0x11; 16]).unwrap();
        assert!(matches!(
            handle.set_md5_hash([0x22; 16]).unwrap_err(),
            Error::AlreadySet(_)
        ));
        handle.write_buffer(&[0u8; 512]).unwrap();
        handle.finalize().unwrap();
    }

    #[test]
    fn test_computed_md5_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("hashed");
        let data = noise(0x5150, 300_000);
        let paths = write_image(&base, &data, |_| {});

        // The image accounts in whole sectors, so the hash covers the
        // sector-aligned tail as well
        let media_len = data.len().div_ceil(512) * 512;
        let mut padded = data.clone();
        padded.resize(media_len, 0);
        let expected: [u8; 16] = md5::Md5::digest(&padded).into();

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.md5_hash(), Some(expected));
        assert_eq!(handle.media_size() as usize, media_len);

        handle.parse_hash_values().unwrap();
        assert_eq!(handle.hash_value("md5"), Some(hex::encode(expected).as_str()));
    }

    #[test]
    fn test_header_values_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cased");
        let data = vec![0x42u8; 128 * 1024];

        let paths = write_image(&base, &data, |handle| {
            handle.set_header_value("case_number", "2026-0042").unwrap();
            handle.set_header_value("evidence_number", "7").unwrap();
            handle.set_header_value("examiner_name", "rivera").unwrap();
            handle
                .set_header_value("acquiry_date", "2026 2 5 8 14 30")
                .unwrap();
        });

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        handle.parse_header_values(DateFormat::Iso8601).unwrap();
        assert_eq!(handle.header_value("case_number"), Some("2026-0042"));
        assert_eq!(handle.header_value("evidence_number"), Some("7"));
        assert_eq!(handle.header_value("examiner_name"), Some("rivera"));
        assert_eq!(
            handle.header_value("acquiry_date"),
            Some("2026-02-05T08:14:30")
        );
        assert_eq!(handle.amount_of_header_values(), 12);
        assert_eq!(handle.header_value_identifier(0).unwrap(), "case_number");
    }

    #[test]
    fn test_copy_header_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = EwfHandle::open(&[dir.path().join("src")], OpenFlags::WRITE).unwrap();
        source.set_header_value("case_number", "A-1").unwrap();
        source.set_header_value("notes", "first pass").unwrap();

        let mut destination =
            EwfHandle::open(&[dir.path().join("dst")], OpenFlags::WRITE).unwrap();
        destination.copy_header_values_from(&source).unwrap();
        assert_eq!(destination.header_value("case_number"), Some("A-1"));
        assert_eq!(destination.header_value("notes"), Some("first pass"));

        // A handle without header values cannot be a source
        let empty = EwfHandle::open(&[dir.path().join("raw")], OpenFlags::WRITE).unwrap();
        assert!(destination.copy_header_values_from(&empty).is_err());
    }

    #[test]
    fn test_delta_chunk_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("overlay");
        let data = noise(0x909, 256 * 1024);
        let paths = write_image(&base, &data, |_| {});

        let chunk_size;
        {
            let mut handle =
                EwfHandle::open(&paths, OpenFlags::READ | OpenFlags::WRITE).unwrap();
            chunk_size = handle.chunk_size() as usize;
            let replacement = vec![0xEEu8; chunk_size];
            handle.seek_offset(chunk_size as i64).unwrap();
            handle.write_buffer(&replacement).unwrap();

            // The replacement is visible through the same handle
            handle.seek_offset(chunk_size as i64).unwrap();
            let mut buf = vec![0u8; chunk_size];
            handle.read_buffer(&mut buf).unwrap();
            assert_eq!(buf, replacement);
            handle.close().unwrap();
        }

        // Reopen with the delta segment included
        let delta_path = paths[0].with_extension("d01");
        assert!(delta_path.exists());
        let mut all_paths = paths.clone();
        all_paths.push(delta_path);

        let mut handle = EwfHandle::open(&all_paths, OpenFlags::READ).unwrap();
        let contents = read_all(&mut handle);
        assert_eq!(&contents[..chunk_size], &data[..chunk_size]);
        assert!(contents[chunk_size..2 * chunk_size]
            .iter()
            .all(|&byte| byte == 0xEE));
        assert_eq!(&contents[2 * chunk_size..], &data[2 * chunk_size..]);
    }

    #[test]
    fn test_delta_write_must_be_chunk_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("misaligned");
        let data = noise(0x11, 128 * 1024);
        let paths = write_image(&base, &data, |_| {});

        let mut handle =
            EwfHandle::open(&paths, OpenFlags::READ | OpenFlags::WRITE).unwrap();
        handle.seek_offset(17).unwrap();
        assert!(matches!(
            handle.write_buffer(&[0u8; 100]).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        handle.seek_offset(0).unwrap();
        assert!(matches!(
            handle.write_buffer(&[0u8; 100]).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_ewfx_format_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("xml");
        let data = noise(0x40, 128 * 1024);

        let paths = write_image(&base, &data, |handle| {
            handle.set_format(Format::Ewfx).unwrap();
            handle.set_header_value("case_number", "X-9").unwrap();
        });

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.format(), Format::Ewfx);
        handle.parse_header_values(DateFormat::MonthDay).unwrap();
        assert_eq!(handle.header_value("case_number"), Some("X-9"));
        handle.parse_hash_values().unwrap();
        assert!(handle.hash_value("md5").is_some());
        assert!(handle.hash_value("sha1").is_some());
        assert_eq!(read_all(&mut handle), data);
    }

    #[test]
    fn test_smart_format_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("smart");
        let data = noise(0x21, 96 * 1024);

        let paths = write_image(&base, &data, |handle| {
            handle.set_format(Format::Smart).unwrap();
        });
        assert!(paths[0].to_string_lossy().ends_with(".s01"));

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.format(), Format::Smart);
        assert_eq!(read_all(&mut handle), data);
    }

    #[test]
    fn test_encase6_digest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("six");
        let data = noise(0x66, 64 * 1024);

        let paths = write_image(&base, &data, |handle| {
            handle.set_format(Format::Encase6).unwrap();
        });

        let handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert_eq!(handle.format(), Format::Encase6);
        assert!(handle.md5_hash().is_some());
        assert!(handle.sha1_hash().is_some());
    }

    #[test]
    fn test_input_write_size_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("partial");
        let data = noise(0x99, 1000);

        let mut handle = EwfHandle::open(&[&base], OpenFlags::WRITE).unwrap();
        handle.set_input_write_size(1000).unwrap();
        handle.write_buffer(&data).unwrap();
        handle.finalize().unwrap();
        handle.close().unwrap();

        let paths = segment_paths(&base, 'E');
        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        // 1000 bytes round up to two 512-byte sectors; the chunk padding
        // beyond that is not media content
        assert_eq!(handle.media_size(), 1024);
        let contents = read_all(&mut handle);
        assert_eq!(contents.len(), 1024);
        assert_eq!(&contents[..1000], &data[..]);
        assert!(contents[1000..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_seek_validation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("seeky");
        let data = vec![1u8; 64 * 1024];
        let paths = write_image(&base, &data, |_| {});

        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        assert!(matches!(
            handle.seek_offset(-1).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            handle.seek_offset(handle.media_size() as i64).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert_eq!(handle.seek_offset(4096).unwrap(), 4096);

        // std::io::Seek works over the same cursor
        use std::io::Seek as _;
        assert_eq!(handle.seek(SeekFrom::Start(100)).unwrap(), 100);
        assert_eq!(handle.seek(SeekFrom::Current(28)).unwrap(), 128);
        assert_eq!(
            handle.seek(SeekFrom::End(-64)).unwrap(),
            handle.media_size() - 64
        );
    }

    #[test]
    fn test_read_on_write_handle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle =
            EwfHandle::open(&[dir.path().join("wronly")], OpenFlags::WRITE).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            handle.read_buffer(&mut buf).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            handle.seek_offset(0).unwrap_err(),
            Error::InvalidState(_)
        ));
        handle.write_buffer(&[0u8; 512]).unwrap();
        handle.finalize().unwrap();
    }

    #[test]
    fn test_finalize_idempotent_and_close_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("closer");
        let mut handle = EwfHandle::open(&[&base], OpenFlags::WRITE).unwrap();
        handle.write_buffer(&noise(0x3, 40_000)).unwrap();
        handle.finalize().unwrap();
        handle.finalize().unwrap();
        assert!(matches!(
            handle.write_buffer(&[0u8; 16]).unwrap_err(),
            Error::InvalidState(_)
        ));
        handle.close().unwrap();

        // close() without an explicit finalize still produces a valid image
        let base2 = dir.path().join("dropper");
        let data = noise(0x8, 50_000);
        let mut handle = EwfHandle::open(&[&base2], OpenFlags::WRITE).unwrap();
        handle.write_buffer(&data).unwrap();
        handle.close().unwrap();

        let paths = segment_paths(&base2, 'E');
        let mut handle = EwfHandle::open(&paths, OpenFlags::READ).unwrap();
        let contents = read_all(&mut handle);
        assert_eq!(&contents[..data.len()], &data[..]);
    }

    #[test]
    fn test_open_argument_validation() {
        let dir = tempfile::tempdir().unwrap();
        let empty: &[&Path] = &[];
        assert!(EwfHandle::open(empty, OpenFlags::READ).is_err());
        assert!(EwfHandle::open(&[dir.path().join("missing.E01")], OpenFlags::READ).is_err());

        // A readable non-EWF file is a signature mismatch
        let foreign = dir.path().join("foreign.img");
        let mut file = std::fs::File::create(&foreign).unwrap();
        file.write_all(&[0u8; 1024]).unwrap();
        drop(file);
        assert!(matches!(
            EwfHandle::open(&[&foreign], OpenFlags::READ).unwrap_err(),
            Error::SignatureMismatch(_)
        ));
    }
}
