//! Delta segments: out-of-band chunk replacement
//!
//! A delta segment is an auxiliary file that overlays replacements for
//! individual chunks on top of an otherwise immutable image. Each
//! replacement is a `delta_chunk` section whose payload is the global
//! chunk index followed by the raw chunk bytes and their CRC trailer.
//! The offset table redirects replaced chunks into this file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ewfvault_core::{CompressionLevel, Error, Result};

use crate::codec;
use crate::section::{SectionDescriptor, SectionType};
use crate::segment::{FileHeader, Segment, FILE_HEADER_SIZE};
use crate::table::OffsetTable;

/// The delta segment file and its write position
#[derive(Debug, Default)]
pub struct DeltaSegment {
    filename: Option<PathBuf>,
    file: Option<File>,
    writable: bool,
    /// Where the next `delta_chunk` descriptor goes (the `done` section is
    /// rewritten past it on close)
    end_offset: u64,
    chunks_written: u32,
}

impl DeltaSegment {
    /// Empty delta state
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delta segment filename; set-once
    pub fn set_filename(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::invalid_state("delta segment already open"));
        }
        if self.filename.is_some() {
            return Err(Error::already_set("delta segment filename"));
        }
        self.filename = Some(path.into());
        Ok(())
    }

    /// The configured or derived filename
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Replaced chunks written through this handle
    pub fn chunks_written(&self) -> u32 {
        self.chunks_written
    }

    /// Adopt an existing delta file found during open, redirecting every
    /// replaced chunk in the offset table. `writable` reopens the file for
    /// further replacements.
    pub fn from_existing(
        segment: &mut Segment,
        offsets: &mut OffsetTable,
        writable: bool,
    ) -> Result<DeltaSegment> {
        let mut end_offset = FILE_HEADER_SIZE as u64;
        let sections = segment.sections.clone();
        for descriptor in &sections {
            if descriptor.section_type != SectionType::DeltaChunk {
                continue;
            }
            let payload = segment.read_payload(descriptor)?;
            if payload.len() < 8 {
                return Err(Error::chain_corrupt(
                    segment.number,
                    "delta_chunk payload too small",
                ));
            }
            let chunk = u32::from_le_bytes(payload[0..4].try_into().expect("4 bytes"));
            offsets.redirect_to_delta(
                chunk,
                descriptor.payload_offset() + 4,
                (descriptor.payload_size() - 4) as u32,
            )?;
            end_offset = descriptor.end_offset();
        }

        let file = if writable {
            Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&segment.path)?,
            )
        } else {
            Some(File::open(&segment.path)?)
        };

        Ok(DeltaSegment {
            filename: Some(segment.path.clone()),
            file,
            writable,
            end_offset,
            chunks_written: 0,
        })
    }

    /// True when a delta file has been created or adopted
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Create the delta file if it does not exist yet
    ///
    /// `default_path` is used when no filename was set explicitly; the
    /// derived name becomes visible through [`DeltaSegment::filename`].
    pub fn ensure_open(&mut self, default_path: &Path) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let path = match &self.filename {
            Some(path) => path.clone(),
            None => {
                let derived = default_path.to_path_buf();
                self.filename = Some(derived.clone());
                derived
            }
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&FileHeader::to_bytes(1))?;
        self.file = Some(file);
        self.writable = true;
        self.end_offset = FILE_HEADER_SIZE as u64;
        tracing::debug!(path = %path.display(), "created delta segment");
        Ok(())
    }

    /// Append one replaced chunk, returning the offset table redirection
    pub fn write_chunk(&mut self, chunk: u32, raw: &[u8]) -> Result<(u64, u32)> {
        if !self.writable {
            return Err(Error::invalid_state("delta segment not open for writing"));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::invalid_state("delta segment not open"))?;

        // Delta chunks are always stored raw with a CRC trailer
        let encoded = codec::compress_chunk(raw, CompressionLevel::None, false)?;
        let payload_size = 4 + encoded.data.len() as u64;
        let descriptor =
            SectionDescriptor::new(SectionType::DeltaChunk, self.end_offset, payload_size);

        file.seek(SeekFrom::Start(self.end_offset))?;
        file.write_all(&descriptor.to_bytes())?;
        file.write_all(&chunk.to_le_bytes())?;
        file.write_all(&encoded.data)?;

        let data_offset = descriptor.payload_offset() + 4;
        self.end_offset = descriptor.end_offset();
        self.chunks_written += 1;
        Ok((data_offset, encoded.data.len() as u32))
    }

    /// Read stored bytes of a redirected chunk
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::invalid_state("delta segment not open"))?;
        let mut data = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Terminate the section chain with a `done` section and release the file
    ///
    /// Read-only adoptions just drop the file handle.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        if !self.writable {
            return Ok(());
        }
        let done = SectionDescriptor::new(SectionType::Done, self.end_offset, 0);
        file.seek(SeekFrom::Start(self.end_offset))?;
        file.write_all(&done.to_bytes())?;
        file.set_len(done.end_offset())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ChunkEntry;

    #[test]
    fn test_filename_set_once() {
        let mut delta = DeltaSegment::new();
        delta.set_filename("/tmp/overlay.d01").unwrap();
        let err = delta.set_filename("/tmp/other.d01").unwrap_err();
        assert!(matches!(err, Error::AlreadySet(_)));
        assert_eq!(delta.filename(), Some(Path::new("/tmp/overlay.d01")));
    }

    #[test]
    fn test_write_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.d01");

        let raw = vec![0x5Au8; 2048];
        let mut delta = DeltaSegment::new();
        delta.ensure_open(&path).unwrap();
        let (offset, size) = delta.write_chunk(3, &raw).unwrap();
        assert_eq!(size as usize, raw.len() + 4);
        let stored = delta.read_at(offset, size as usize).unwrap();
        assert_eq!(codec::decompress_chunk(&stored, raw.len(), false, 3).unwrap(), raw);
        delta.close().unwrap();

        // Reopen through the segment scanner and rebuild the redirection
        let mut segment = Segment::open_existing(&path).unwrap();
        assert!(segment
            .sections
            .iter()
            .any(|s| s.section_type == SectionType::DeltaChunk));

        let mut offsets = OffsetTable::new();
        for _ in 0..4 {
            offsets.push(ChunkEntry {
                segment: 1,
                file_offset: 0,
                stored_size: 0,
                compressed: false,
                delta: false,
            });
        }
        let mut reopened =
            DeltaSegment::from_existing(&mut segment, &mut offsets, true).unwrap();
        let entry = offsets.get(3).unwrap();
        assert!(entry.delta);
        assert_eq!(entry.stored_size as usize, raw.len() + 4);

        let stored = reopened
            .read_at(entry.file_offset, entry.stored_size as usize)
            .unwrap();
        assert_eq!(codec::decompress_chunk(&stored, raw.len(), false, 3).unwrap(), raw);

        // Appending after reopen keeps the chain valid
        reopened.write_chunk(1, &raw).unwrap();
        reopened.close().unwrap();
        let segment = Segment::open_existing(&path).unwrap();
        assert!(segment.closed);
        assert_eq!(
            segment
                .sections
                .iter()
                .filter(|s| s.section_type == SectionType::DeltaChunk)
                .count(),
            2
        );
    }

    #[test]
    fn test_write_without_open_rejected() {
        let mut delta = DeltaSegment::new();
        assert!(matches!(
            delta.write_chunk(0, &[0u8; 16]).unwrap_err(),
            Error::InvalidState(_)
        ));
    }
}
