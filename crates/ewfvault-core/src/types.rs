//! Media parameters, format variants, and open flags

use std::fmt;
use std::ops::BitOr;

use crate::error::{Error, Result};

/// Kind of media the image was acquired from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// Removable media (floppy, USB, etc.)
    Removable,
    /// Fixed disk (hard drive)
    Fixed,
    /// Optical media (CD, DVD)
    Optical,
    /// Memory (RAM)
    Memory,
    /// Unknown media type
    Unknown(u8),
}

impl MediaType {
    /// Stored one-byte discriminator
    pub fn code(&self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Memory => 0x10,
            MediaType::Unknown(v) => *v,
        }
    }
}

impl From<u8> for MediaType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x10 => MediaType::Memory,
            v => MediaType::Unknown(v),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Removable => write!(f, "Removable"),
            MediaType::Fixed => write!(f, "Fixed Disk"),
            MediaType::Optical => write!(f, "Optical"),
            MediaType::Memory => write!(f, "Memory"),
            MediaType::Unknown(v) => write!(f, "Unknown (0x{:02X})", v),
        }
    }
}

/// Media flag bits stored in the volume section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags(u8);

impl MediaFlags {
    /// The image was taken of a physical device rather than a logical volume
    pub const PHYSICAL: MediaFlags = MediaFlags(0x02);

    /// Create flags from a raw byte
    pub fn from_bits(bits: u8) -> Self {
        MediaFlags(bits)
    }

    /// Raw flag byte
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// True when the physical-volume bit is set
    pub fn is_physical(&self) -> bool {
        self.0 & Self::PHYSICAL.0 != 0
    }

    /// The volume kind implied by the flag bits
    pub fn volume_kind(&self) -> VolumeKind {
        if self.is_physical() {
            VolumeKind::Physical
        } else {
            VolumeKind::Logical
        }
    }
}

impl BitOr for MediaFlags {
    type Output = MediaFlags;

    fn bitor(self, rhs: MediaFlags) -> MediaFlags {
        MediaFlags(self.0 | rhs.0)
    }
}

/// Whether the acquired volume was a physical device or a logical volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Logical volume (partition)
    Logical,
    /// Physical device
    Physical,
}

/// Chunk compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store chunks uncompressed with an explicit CRC trailer
    #[default]
    None,
    /// Fast deflate
    Fast,
    /// Best deflate
    Best,
}

impl CompressionLevel {
    /// Stored signed one-byte value
    pub fn code(&self) -> i8 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        }
    }

    /// Parse the stored value; negative or unknown values are rejected
    pub fn from_code(value: i8) -> Result<Self> {
        match value {
            0 => Ok(CompressionLevel::None),
            1 => Ok(CompressionLevel::Fast),
            2 => Ok(CompressionLevel::Best),
            v => Err(Error::invalid_argument(format!(
                "invalid compression level: {v}"
            ))),
        }
    }
}

/// Container format variant
///
/// The volume layout, the header-section subset, the presence of a digest
/// section, and the segment extension sequence are all functions of this
/// variant; the dispatch lives here so no caller re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Smart,
    Ftk,
    /// Logical evidence (LVF)
    Lvf,
    Linen,
    Ewfx,
}

impl Format {
    /// Stored one-byte discriminator
    pub fn code(&self) -> u8 {
        match self {
            Format::Encase1 => 0x01,
            Format::Encase2 => 0x02,
            Format::Encase3 => 0x03,
            Format::Encase4 => 0x04,
            Format::Encase5 => 0x05,
            Format::Encase6 => 0x06,
            Format::Smart => 0x0E,
            Format::Ftk => 0x0F,
            Format::Lvf => 0x10,
            Format::Linen => 0x25,
            Format::Ewfx => 0x71,
        }
    }

    /// Parse the stored discriminator
    pub fn from_code(value: u8) -> Option<Format> {
        match value {
            0x01 => Some(Format::Encase1),
            0x02 => Some(Format::Encase2),
            0x03 => Some(Format::Encase3),
            0x04 => Some(Format::Encase4),
            0x05 => Some(Format::Encase5),
            0x06 => Some(Format::Encase6),
            0x0E => Some(Format::Smart),
            0x0F => Some(Format::Ftk),
            0x10 => Some(Format::Lvf),
            0x25 => Some(Format::Linen),
            0x71 => Some(Format::Ewfx),
            _ => None,
        }
    }

    /// Formats with a UTF-16 header2 section in segment 1
    pub fn uses_header2(&self) -> bool {
        matches!(
            self,
            Format::Encase4 | Format::Encase5 | Format::Encase6 | Format::Ewfx
        )
    }

    /// Formats with a UTF-8 xheader section in segment 1
    pub fn uses_xheader(&self) -> bool {
        matches!(self, Format::Ewfx)
    }

    /// Formats that close the last segment with an MD5+SHA1 digest section
    pub fn uses_digest(&self) -> bool {
        matches!(self, Format::Encase6)
    }

    /// Formats that close the last segment with the fixed MD5 hash section
    pub fn uses_hash_section(&self) -> bool {
        !matches!(self, Format::Ewfx)
    }

    /// Formats that close the last segment with an XML xhash section
    pub fn uses_xhash(&self) -> bool {
        matches!(self, Format::Ewfx)
    }

    /// Formats using the compact 94-byte volume layout
    pub fn uses_smart_volume(&self) -> bool {
        matches!(self, Format::Smart)
    }

    /// First letter of the segment extension sequence
    pub fn extension_letter(&self) -> char {
        match self {
            Format::Smart => 's',
            Format::Lvf => 'L',
            _ => 'E',
        }
    }

    /// Whether this implementation can produce the variant on write
    pub fn writable(&self) -> bool {
        !matches!(self, Format::Lvf)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Encase1 => "EnCase 1",
            Format::Encase2 => "EnCase 2",
            Format::Encase3 => "EnCase 3",
            Format::Encase4 => "EnCase 4",
            Format::Encase5 => "EnCase 5",
            Format::Encase6 => "EnCase 6",
            Format::Smart => "SMART",
            Format::Ftk => "FTK Imager",
            Format::Lvf => "Logical Evidence",
            Format::Linen => "LinEn",
            Format::Ewfx => "EWFX",
        };
        write!(f, "{name}")
    }
}

/// Open mode flags for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u8);

impl OpenFlags {
    /// Open an existing segment set for reading
    pub const READ: OpenFlags = OpenFlags(0x01);
    /// Open a new segment set for writing
    pub const WRITE: OpenFlags = OpenFlags(0x02);

    /// Raw flag byte
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// True when all bits of `other` are present
    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Reading requested
    pub fn is_read(&self) -> bool {
        self.contains(OpenFlags::READ)
    }

    /// Writing requested
    pub fn is_write(&self) -> bool {
        self.contains(OpenFlags::WRITE)
    }

    /// At least one of read/write must be requested
    pub fn validate(&self) -> Result<()> {
        if !self.is_read() && !self.is_write() {
            return Err(Error::invalid_argument("unsupported open flags"));
        }
        Ok(())
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Media parameters, immutable once write values are initialized
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Sectors grouped into one chunk
    pub sectors_per_chunk: u32,
    /// Byte size of one sector
    pub bytes_per_sector: u32,
    /// Total sectors on the media
    pub amount_of_sectors: u32,
    /// Sectors per acquisition-error reporting unit
    pub error_granularity: u32,
    /// Kind of source media
    pub media_type: MediaType,
    /// Flag bits (physical/logical)
    pub media_flags: MediaFlags,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 0,
            error_granularity: 64,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::PHYSICAL,
        }
    }
}

impl MediaInfo {
    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u32 {
        self.sectors_per_chunk * self.bytes_per_sector
    }

    /// Total media size in bytes
    pub fn media_size(&self) -> u64 {
        u64::from(self.amount_of_sectors) * u64::from(self.bytes_per_sector)
    }

    /// Number of chunks needed to cover the media
    pub fn chunk_count(&self) -> u32 {
        let chunk_size = u64::from(self.chunk_size());
        if chunk_size == 0 {
            return 0;
        }
        ((self.media_size() + chunk_size - 1) / chunk_size) as u32
    }

    /// Validate the parameters before write initialization
    pub fn validate_for_write(&self) -> Result<()> {
        if self.sectors_per_chunk == 0 || self.sectors_per_chunk > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid sectors per chunk"));
        }
        if self.bytes_per_sector == 0 || self.bytes_per_sector > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid bytes per sector"));
        }
        if self.error_granularity == 0 || self.error_granularity > i32::MAX as u32 {
            return Err(Error::invalid_argument("invalid error granularity"));
        }
        if u64::from(self.sectors_per_chunk) * u64::from(self.bytes_per_sector)
            > i32::MAX as u64
        {
            return Err(Error::invalid_argument("chunk size exceeds maximum"));
        }
        Ok(())
    }
}
