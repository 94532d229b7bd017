//! # ewfvault
//!
//! Reading and writing EWF (Expert Witness Format) forensic disk images,
//! the `.E01` segment-file family produced by EnCase, FTK and friends.
//!
//! An image is a byte-exact copy of a storage medium, cut into fixed-size
//! chunks that are individually CRC-protected and optionally
//! zlib-compressed, laid out as a chain of checksummed sections across one
//! or more bounded-size segment files.
//!
//! # Structure of a segment file
//!
//! ```text
//! ┌──────────────────────────┐
//! │  File header (13 bytes)  │  EVF signature + segment number
//! ├──────────────────────────┤
//! │  header2 / header        │  Case metadata (compressed, segment 1)
//! ├──────────────────────────┤
//! │  volume                  │  Media parameters (segment 1)
//! ├──────────────────────────┤
//! │  sectors                 │  Chunk data
//! ├──────────────────────────┤
//! │  table, table2           │  Chunk offset table + backup
//! ├──────────────────────────┤
//! │  next │ error2 hash done │  Chain to next segment, or closing sections
//! └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ewfvault::{EwfHandle, OpenFlags};
//!
//! let mut handle = EwfHandle::open(&["image.E01"], OpenFlags::READ).unwrap();
//! let mut buf = vec![0u8; 4096];
//! handle.seek_offset(0).unwrap();
//! let read = handle.read_buffer(&mut buf).unwrap();
//! println!("read {read} bytes of {}", handle.media_size());
//! ```

pub mod codec;
pub mod delta;
pub mod digest;
pub mod handle;
pub mod header;
pub mod notify;
pub mod read;
pub mod registry;
pub mod section;
pub mod segment;
pub mod table;
pub mod values;
pub mod volume;
pub mod write;

// Re-export commonly used items
pub use ewfvault_core::{
    adler32, Adler32, CompressionLevel, Error, Format, MediaFlags, MediaInfo, MediaType,
    OpenFlags, Result, VolumeKind,
};
pub use handle::EwfHandle;
pub use notify::set_notify_values;
pub use registry::ErrorSector;
pub use segment::check_file_signature;
pub use table::TableWarning;
pub use values::DateFormat;

/// Library version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
