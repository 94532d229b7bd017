//! Volume section payloads
//!
//! The volume section (also seen with type strings `disk` and `data`)
//! carries the media parameters. Two layouts exist: the 1052-byte EnCase
//! layout and the compact 94-byte SMART layout. Both end with an Adler-32
//! over the preceding bytes.

use ewfvault_core::{
    adler32, CompressionLevel, Error, Format, MediaFlags, MediaInfo, MediaType, Result,
};

/// Payload size of the EnCase volume layout
pub const VOLUME_SIZE_ENCASE: usize = 1052;

/// Payload size of the SMART volume layout
pub const VOLUME_SIZE_SMART: usize = 94;

/// Parsed volume section contents
#[derive(Debug, Clone)]
pub struct VolumeSection {
    /// Media parameters
    pub media: MediaInfo,
    /// Total chunks in the segment set
    pub chunk_count: u32,
    /// Chunk compression level
    pub compression_level: CompressionLevel,
    /// Container GUID
    pub guid: [u8; 16],
    /// Start sector of an embedded Palm volume
    pub palm_volume_start_sector: u32,
    /// Start sector of SMART logs
    pub smart_logs_start_sector: u32,
    /// Format discriminator, zero when the producer did not record one
    pub format_code: u8,
    /// Whether the payload used the compact SMART layout
    pub smart_layout: bool,
}

impl VolumeSection {
    /// Build volume contents for writing
    pub fn new(
        media: &MediaInfo,
        chunk_count: u32,
        compression_level: CompressionLevel,
        guid: [u8; 16],
        format: Format,
    ) -> Self {
        Self {
            media: media.clone(),
            chunk_count,
            compression_level,
            guid,
            palm_volume_start_sector: 0,
            smart_logs_start_sector: 0,
            format_code: format.code(),
            smart_layout: format.uses_smart_volume(),
        }
    }

    /// Serialize using the layout selected at construction
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.smart_layout {
            self.to_smart_bytes()
        } else {
            self.to_encase_bytes()
        }
    }

    fn to_encase_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; VOLUME_SIZE_ENCASE];
        bytes[0] = self.media.media_type.code();
        bytes[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.media.sectors_per_chunk.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.media.bytes_per_sector.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.media.amount_of_sectors.to_le_bytes());
        // bytes[20..32]: CHS geometry, unused
        bytes[32] = self.media.media_flags.bits();
        bytes[36..40].copy_from_slice(&self.palm_volume_start_sector.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.smart_logs_start_sector.to_le_bytes());
        bytes[48] = self.compression_level.code() as u8;
        bytes[52..56].copy_from_slice(&self.media.error_granularity.to_le_bytes());
        bytes[60..76].copy_from_slice(&self.guid);
        bytes[1043] = self.format_code;
        let checksum = adler32(&bytes[..VOLUME_SIZE_ENCASE - 4]);
        bytes[VOLUME_SIZE_ENCASE - 4..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    fn to_smart_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; VOLUME_SIZE_SMART];
        bytes[0] = 0x01;
        bytes[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.media.sectors_per_chunk.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.media.bytes_per_sector.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.media.amount_of_sectors.to_le_bytes());
        let checksum = adler32(&bytes[..VOLUME_SIZE_SMART - 4]);
        bytes[VOLUME_SIZE_SMART - 4..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Parse either layout, selected by payload size
    pub fn parse(payload: &[u8], segment: u16) -> Result<Self> {
        if payload.len() >= VOLUME_SIZE_ENCASE {
            Self::parse_encase(payload, segment)
        } else if payload.len() >= VOLUME_SIZE_SMART {
            Self::parse_smart(payload, segment)
        } else {
            Err(Error::chain_corrupt(
                segment,
                format!("volume payload too small: {} bytes", payload.len()),
            ))
        }
    }

    fn verify_checksum(payload: &[u8], data_len: usize, segment: u16) -> Result<()> {
        let stored = u32::from_le_bytes(
            payload[data_len..data_len + 4].try_into().expect("4 bytes"),
        );
        let computed = adler32(&payload[..data_len]);
        if computed != stored {
            return Err(Error::SectionChecksumMismatch {
                section: "volume".to_string(),
                segment,
                stored,
                computed,
            });
        }
        Ok(())
    }

    fn parse_encase(payload: &[u8], segment: u16) -> Result<Self> {
        Self::verify_checksum(payload, VOLUME_SIZE_ENCASE - 4, segment)?;

        let read_u32 = |at: usize| {
            u32::from_le_bytes(payload[at..at + 4].try_into().expect("4 bytes"))
        };
        let compression_level = match CompressionLevel::from_code(payload[48] as i8) {
            Ok(level) => level,
            Err(_) => {
                tracing::warn!(
                    value = payload[48],
                    "unrecognized compression level in volume, assuming none"
                );
                CompressionLevel::None
            }
        };
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&payload[60..76]);

        Ok(Self {
            media: MediaInfo {
                sectors_per_chunk: read_u32(8),
                bytes_per_sector: read_u32(12),
                amount_of_sectors: read_u32(16),
                error_granularity: read_u32(52),
                media_type: MediaType::from(payload[0]),
                media_flags: MediaFlags::from_bits(payload[32]),
            },
            chunk_count: read_u32(4),
            compression_level,
            guid,
            palm_volume_start_sector: read_u32(36),
            smart_logs_start_sector: read_u32(44),
            format_code: payload[1043],
            smart_layout: false,
        })
    }

    fn parse_smart(payload: &[u8], segment: u16) -> Result<Self> {
        Self::verify_checksum(payload, VOLUME_SIZE_SMART - 4, segment)?;

        let read_u32 = |at: usize| {
            u32::from_le_bytes(payload[at..at + 4].try_into().expect("4 bytes"))
        };

        Ok(Self {
            media: MediaInfo {
                sectors_per_chunk: read_u32(8),
                bytes_per_sector: read_u32(12),
                amount_of_sectors: read_u32(16),
                ..MediaInfo::default()
            },
            chunk_count: read_u32(4),
            compression_level: CompressionLevel::None,
            guid: [0u8; 16],
            palm_volume_start_sector: 0,
            smart_logs_start_sector: 0,
            format_code: Format::Smart.code(),
            smart_layout: true,
        })
    }
}
