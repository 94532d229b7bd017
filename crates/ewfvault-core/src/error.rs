//! Error types for EWF container operations

use thiserror::Error;

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing an EWF container
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying segment file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-side misuse: bad buffer, out-of-range index, negative offset
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current write state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File does not carry the EWF signature
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Section chain cycles or points outside the segment file
    #[error("Section chain corrupt in segment {segment}: {detail}")]
    ChainCorrupt { segment: u16, detail: String },

    /// Section descriptor checksum did not validate
    #[error(
        "Section checksum mismatch in segment {segment} ({section}): \
         stored {stored:#010x}, computed {computed:#010x}"
    )]
    SectionChecksumMismatch {
        section: String,
        segment: u16,
        stored: u32,
        computed: u32,
    },

    /// Chunk CRC mismatch or decompression failure
    #[error("Chunk {chunk} corrupt: {detail}")]
    ChunkCorrupt { chunk: u32, detail: String },

    /// table and table2 both validate but disagree (warning-class)
    #[error("Offset table backup disagrees in segment {segment}")]
    BackupDisagrees { segment: u16 },

    /// Format variant the implementation cannot produce on write
    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    /// Set-once field written twice
    #[error("Value already set: {0}")]
    AlreadySet(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a signature mismatch error
    pub fn signature_mismatch(msg: impl Into<String>) -> Self {
        Error::SignatureMismatch(msg.into())
    }

    /// Create a chain corruption error
    pub fn chain_corrupt(segment: u16, detail: impl Into<String>) -> Self {
        Error::ChainCorrupt {
            segment,
            detail: detail.into(),
        }
    }

    /// Create a chunk corruption error
    pub fn chunk_corrupt(chunk: u32, detail: impl Into<String>) -> Self {
        Error::ChunkCorrupt {
            chunk,
            detail: detail.into(),
        }
    }

    /// Create an unsupported format error
    pub fn format_unsupported(msg: impl Into<String>) -> Self {
        Error::FormatUnsupported(msg.into())
    }

    /// Create an already-set error
    pub fn already_set(field: impl Into<String>) -> Self {
        Error::AlreadySet(field.into())
    }
}
