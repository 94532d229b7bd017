//! # ewfvault-core
//!
//! Foundational crate for the ewfvault workspace:
//! - **Errors**: the shared error taxonomy for container operations
//! - **Checksum**: the Adler-32 engine used by section descriptors and
//!   uncompressed chunk trailers
//! - **Types**: media parameters, format variants, open flags

pub mod checksum;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use checksum::{adler32, Adler32};
pub use error::{Error, Result};
pub use types::{
    CompressionLevel, Format, MediaFlags, MediaInfo, MediaType, OpenFlags, VolumeKind,
};
