//! Segment files: signature, file header, extension sequencing
//!
//! A segment file starts with a fixed 13-byte header (8-byte signature,
//! fields-start byte, little-endian segment number, two zero bytes)
//! followed by the section chain. Segment numbers start at 1 and the
//! extension sequence runs `.E01`–`.E99`, then `.EAA` onward; SMART and
//! logical evidence sets use `s`/`L` as the first letter.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ewfvault_core::{Error, Result};

use crate::section::{read_section_chain, SectionDescriptor, SectionType};

/// EVF segment file signature
pub const SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

/// Logical evidence (LVF) segment file signature
pub const LVF_SIGNATURE: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

/// On-disk size of the segment file header
pub const FILE_HEADER_SIZE: usize = 13;

/// Parsed segment file header
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Segment number, 1-based
    pub segment_number: u16,
}

impl FileHeader {
    /// Parse and validate the 13-byte file header
    pub fn parse(bytes: &[u8; FILE_HEADER_SIZE]) -> Result<Self> {
        let signature = &bytes[0..8];
        if signature != SIGNATURE && signature != LVF_SIGNATURE {
            return Err(Error::signature_mismatch("not an EWF segment file"));
        }
        if bytes[8] != 0x01 || bytes[11] != 0x00 || bytes[12] != 0x00 {
            return Err(Error::signature_mismatch("invalid segment file header fields"));
        }
        let segment_number = u16::from_le_bytes([bytes[9], bytes[10]]);
        if segment_number == 0 {
            return Err(Error::signature_mismatch("segment number zero"));
        }
        Ok(Self { segment_number })
    }

    /// Serialize the 13-byte file header
    pub fn to_bytes(segment_number: u16) -> [u8; FILE_HEADER_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&SIGNATURE);
        bytes[8] = 0x01;
        bytes[9..11].copy_from_slice(&segment_number.to_le_bytes());
        bytes
    }
}

/// Check whether a file starts with the EWF signature
///
/// Returns `Ok(false)` for a readable non-EWF file; opening or reading
/// failures surface as errors.
pub fn check_file_signature(path: impl AsRef<Path>) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut signature = [0u8; 8];
    match file.read_exact(&mut signature) {
        Ok(()) => Ok(signature == SIGNATURE || signature == LVF_SIGNATURE),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Extension for a segment number: `E01`–`E99`, then `EAA` onward
pub fn segment_extension(letter: char, number: u16) -> Result<String> {
    if number == 0 {
        return Err(Error::invalid_argument("segment number zero"));
    }
    if number < 100 {
        return Ok(format!("{letter}{number:02}"));
    }
    let index = u32::from(number) - 100;
    let first = letter as u8 + (index / 676) as u8;
    let upper = letter.is_ascii_uppercase();
    let limit = if upper { b'Z' } else { b'z' };
    if first > limit {
        return Err(Error::invalid_argument(format!(
            "segment number {number} exceeds the extension sequence"
        )));
    }
    let alpha = if upper { b'A' } else { b'a' };
    let second = alpha + ((index / 26) % 26) as u8;
    let third = alpha + (index % 26) as u8;
    Ok(format!(
        "{}{}{}",
        first as char, second as char, third as char
    ))
}

/// Path of a numbered segment file derived from an extension-less base
pub fn segment_path(base: &Path, letter: char, number: u16) -> Result<PathBuf> {
    Ok(base.with_extension(segment_extension(letter, number)?))
}

/// One open segment file
#[derive(Debug)]
pub struct Segment {
    /// Segment number, 1-based
    pub number: u16,
    /// Path the segment was opened from
    pub path: PathBuf,
    /// Open file handle
    pub file: File,
    /// Parsed section chain, in file order
    pub sections: Vec<SectionDescriptor>,
    /// Segment ends with a terminal `done` section
    pub closed: bool,
}

impl Segment {
    /// Open an existing segment file and walk its section chain
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Segment> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < FILE_HEADER_SIZE as u64 {
            return Err(Error::signature_mismatch(format!(
                "{} is too small to be a segment file",
                path.display()
            )));
        }

        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = FileHeader::parse(&header_bytes)?;

        let sections = read_section_chain(
            &mut file,
            header.segment_number,
            file_len,
            FILE_HEADER_SIZE as u64,
        )?;
        let closed = sections
            .last()
            .map(|section| section.section_type == SectionType::Done)
            .unwrap_or(false);

        tracing::debug!(
            path = %path.display(),
            segment = header.segment_number,
            sections = sections.len(),
            "opened segment file"
        );

        Ok(Segment {
            number: header.segment_number,
            path,
            file,
            sections,
            closed,
        })
    }

    /// Read the payload of one of this segment's sections
    pub fn read_payload(&mut self, descriptor: &SectionDescriptor) -> Result<Vec<u8>> {
        use std::io::{Seek, SeekFrom};

        let size = descriptor.payload_size() as usize;
        let mut payload = vec![0u8; size];
        self.file
            .seek(SeekFrom::Start(descriptor.payload_offset()))?;
        self.file.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Read `len` stored bytes at an absolute file offset
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        use std::io::{Seek, SeekFrom};

        let mut data = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;
        Ok(data)
    }
}

/// Ordered collection of segments, looked up by segment number
#[derive(Debug, Default)]
pub struct SegmentTable {
    segments: Vec<Segment>,
}

impl SegmentTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when no segment is present
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Insert a segment, keeping number order; duplicates are rejected
    pub fn insert(&mut self, segment: Segment) -> Result<()> {
        match self
            .segments
            .binary_search_by_key(&segment.number, |existing| existing.number)
        {
            Ok(_) => Err(Error::invalid_argument(format!(
                "duplicate segment number {}",
                segment.number
            ))),
            Err(at) => {
                self.segments.insert(at, segment);
                Ok(())
            }
        }
    }

    /// Look up a segment by number
    pub fn get(&self, number: u16) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&number, |segment| segment.number)
            .ok()
            .map(|at| &self.segments[at])
    }

    /// Look up a segment by number, mutably
    pub fn get_mut(&mut self, number: u16) -> Option<&mut Segment> {
        self.segments
            .binary_search_by_key(&number, |segment| segment.number)
            .ok()
            .map(move |at| &mut self.segments[at])
    }

    /// Iterate segments in number order
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Iterate segments in number order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segments.iter_mut()
    }

    /// Highest-numbered segment
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Verify the numbering is dense from 1 with no gaps
    pub fn verify_contiguous(&self) -> Result<()> {
        for (index, segment) in self.segments.iter().enumerate() {
            let expected = (index + 1) as u16;
            if segment.number != expected {
                return Err(Error::invalid_argument(format!(
                    "segment files not contiguous: expected segment {expected}, found {}",
                    segment.number
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_header_roundtrip() {
        let bytes = FileHeader::to_bytes(7);
        let header = FileHeader::parse(&bytes).unwrap();
        assert_eq!(header.segment_number, 7);
    }

    #[test]
    fn test_file_header_rejects_foreign_magic() {
        let mut bytes = FileHeader::to_bytes(1);
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::parse(&bytes).unwrap_err(),
            Error::SignatureMismatch(_)
        ));
    }

    #[test]
    fn test_file_header_rejects_segment_zero() {
        let bytes = FileHeader::to_bytes(0);
        assert!(FileHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_check_file_signature() {
        let mut ewf = NamedTempFile::new().unwrap();
        ewf.write_all(&FileHeader::to_bytes(1)).unwrap();
        ewf.flush().unwrap();
        assert!(check_file_signature(ewf.path()).unwrap());

        let mut other = NamedTempFile::new().unwrap();
        other.write_all(b"conectix-not-ewf").unwrap();
        other.flush().unwrap();
        assert!(!check_file_signature(other.path()).unwrap());

        // Too-short files are "no", not an error
        let short = NamedTempFile::new().unwrap();
        assert!(!check_file_signature(short.path()).unwrap());

        // A missing file is an error
        assert!(check_file_signature("/nonexistent/image.E01").is_err());
    }

    #[test]
    fn test_extension_sequence() {
        assert_eq!(segment_extension('E', 1).unwrap(), "E01");
        assert_eq!(segment_extension('E', 99).unwrap(), "E99");
        assert_eq!(segment_extension('E', 100).unwrap(), "EAA");
        assert_eq!(segment_extension('E', 101).unwrap(), "EAB");
        assert_eq!(segment_extension('E', 100 + 26).unwrap(), "EBA");
        assert_eq!(segment_extension('E', 100 + 676).unwrap(), "FAA");
        assert_eq!(segment_extension('s', 2).unwrap(), "s02");
        assert_eq!(segment_extension('s', 100).unwrap(), "saa");
        assert_eq!(segment_extension('L', 1).unwrap(), "L01");
        assert!(segment_extension('E', 0).is_err());
    }

    #[test]
    fn test_segment_path() {
        let path = segment_path(Path::new("/tmp/evidence"), 'E', 2).unwrap();
        assert_eq!(path, Path::new("/tmp/evidence.E02"));
    }

    #[test]
    fn test_segment_table_ordering() {
        fn stub(number: u16) -> Segment {
            Segment {
                number,
                path: PathBuf::new(),
                file: tempfile::tempfile().unwrap(),
                sections: Vec::new(),
                closed: true,
            }
        }

        let mut table = SegmentTable::new();
        table.insert(stub(2)).unwrap();
        table.insert(stub(1)).unwrap();
        table.insert(stub(3)).unwrap();
        assert!(table.insert(stub(2)).is_err());

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(2).unwrap().number, 2);
        assert!(table.get(9).is_none());
        assert_eq!(table.last().unwrap().number, 3);
        table.verify_contiguous().unwrap();

        let mut gappy = SegmentTable::new();
        gappy.insert(stub(1)).unwrap();
        gappy.insert(stub(3)).unwrap();
        assert!(gappy.verify_contiguous().is_err());
    }
}
