//! Media hash sections: `hash`, `digest`, `xhash`
//!
//! The fixed-layout `hash` section stores the MD5 of the media, `digest`
//! adds SHA1, and `xhash` carries both as hex text in markup. The write
//! pipeline hashes media bytes as they are chunked so finalize can emit
//! whichever sections the format variant calls for.

use md5::{Digest, Md5};
use sha1::Sha1;

use ewfvault_core::{adler32, Error, Result};

use crate::values::ValuesTable;

/// Payload size of the `hash` section: MD5 + padding + Adler-32
pub const HASH_SECTION_SIZE: usize = 36;

/// Payload size of the `digest` section: MD5 + SHA1 + padding + Adler-32
pub const DIGEST_SECTION_SIZE: usize = 80;

/// Fixed-layout `hash` section contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSection {
    /// MD5 of the media bytes
    pub md5: [u8; 16],
}

impl HashSection {
    /// Serialize with the trailing checksum
    pub fn to_bytes(&self) -> [u8; HASH_SECTION_SIZE] {
        let mut bytes = [0u8; HASH_SECTION_SIZE];
        bytes[0..16].copy_from_slice(&self.md5);
        let checksum = adler32(&bytes[..HASH_SECTION_SIZE - 4]);
        bytes[HASH_SECTION_SIZE - 4..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Parse and checksum-validate
    pub fn parse(payload: &[u8], segment: u16) -> Result<Self> {
        if payload.len() < HASH_SECTION_SIZE {
            return Err(Error::chain_corrupt(segment, "hash payload too small"));
        }
        verify_trailing_checksum(payload, HASH_SECTION_SIZE, "hash", segment)?;
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&payload[0..16]);
        Ok(Self { md5 })
    }
}

/// `digest` section contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSection {
    /// MD5 of the media bytes
    pub md5: [u8; 16],
    /// SHA1 of the media bytes
    pub sha1: [u8; 20],
}

impl DigestSection {
    /// Serialize with the trailing checksum
    pub fn to_bytes(&self) -> [u8; DIGEST_SECTION_SIZE] {
        let mut bytes = [0u8; DIGEST_SECTION_SIZE];
        bytes[0..16].copy_from_slice(&self.md5);
        bytes[16..36].copy_from_slice(&self.sha1);
        let checksum = adler32(&bytes[..DIGEST_SECTION_SIZE - 4]);
        bytes[DIGEST_SECTION_SIZE - 4..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Parse and checksum-validate
    pub fn parse(payload: &[u8], segment: u16) -> Result<Self> {
        if payload.len() < DIGEST_SECTION_SIZE {
            return Err(Error::chain_corrupt(segment, "digest payload too small"));
        }
        verify_trailing_checksum(payload, DIGEST_SECTION_SIZE, "digest", segment)?;
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&payload[0..16]);
        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&payload[16..36]);
        Ok(Self { md5, sha1 })
    }
}

fn verify_trailing_checksum(
    payload: &[u8],
    size: usize,
    section: &str,
    segment: u16,
) -> Result<()> {
    let stored = u32::from_le_bytes(payload[size - 4..size].try_into().expect("4 bytes"));
    let computed = adler32(&payload[..size - 4]);
    if computed != stored {
        return Err(Error::SectionChecksumMismatch {
            section: section.to_string(),
            segment,
            stored,
            computed,
        });
    }
    Ok(())
}

/// Render the `xhash` markup
pub fn build_xhash_text(md5: &[u8; 16], sha1: Option<&[u8; 20]>) -> String {
    let mut text = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xhash>\n");
    text.push_str(&format!("\t<md5>{}</md5>\n", hex::encode(md5)));
    if let Some(sha1) = sha1 {
        text.push_str(&format!("\t<sha1>{}</sha1>\n", hex::encode(sha1)));
    }
    text.push_str("</xhash>\n");
    text
}

/// Parse `xhash` markup into a hash values table
pub fn parse_xhash_text(text: &str) -> ValuesTable {
    let mut values = ValuesTable::hash_defaults();
    for identifier in ["md5", "sha1"] {
        let open = format!("<{identifier}>");
        let close = format!("</{identifier}>");
        if let Some(start) = text.find(&open) {
            let body = &text[start + open.len()..];
            if let Some(end) = body.find(&close) {
                values.set(identifier, &body[..end]);
            }
        }
    }
    values
}

/// Streaming MD5 + SHA1 over the media bytes as they are written
#[derive(Debug, Default)]
pub struct MediaHasher {
    md5: Md5,
    sha1: Sha1,
    bytes_processed: u64,
}

impl MediaHasher {
    /// Create a fresh hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed media bytes
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.bytes_processed += data.len() as u64;
    }

    /// Bytes hashed so far
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Finish and return both digests
    pub fn finalize(self) -> ([u8; 16], [u8; 20]) {
        let md5: [u8; 16] = self.md5.finalize().into();
        let sha1: [u8; 20] = self.sha1.finalize().into();
        (md5, sha1)
    }
}
