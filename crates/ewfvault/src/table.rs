//! Chunk offset table and the `table`/`table2` section payloads
//!
//! A table payload is a 20-byte header (entry count + padding), a packed
//! array of 4-byte entries, and an Adler-32 over the entry array. Each
//! entry stores a 31-bit offset relative to the start of the `sectors`
//! section the table indexes; the most significant bit marks the chunk as
//! zlib-compressed. `table2` is a byte-identical backup.
//!
//! In memory, chunks live in one dense arena indexed by global chunk
//! number; every lookup is an array index, never a pointer chase.

use ewfvault_core::{adler32, Error, Result};

use crate::section::SECTION_DESCRIPTOR_SIZE;

/// Fixed header in front of the packed entry array
pub const TABLE_HEADER_SIZE: usize = 20;

/// Most entries one table section may index
pub const MAX_TABLE_ENTRIES: usize = 16375;

const COMPRESSED_BIT: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7FFF_FFFF;

/// One packed table entry: chunk offset within the sectors section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// Offset relative to the sectors section descriptor
    pub relative_offset: u32,
    /// Chunk is stored zlib-compressed
    pub compressed: bool,
}

/// Serialize a table/table2 payload
pub fn build_table_payload(entries: &[TableEntry]) -> Vec<u8> {
    let mut payload = vec![0u8; TABLE_HEADER_SIZE + entries.len() * 4 + 4];
    payload[0..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    // payload[4..20]: padding
    for (index, entry) in entries.iter().enumerate() {
        let mut packed = entry.relative_offset & OFFSET_MASK;
        if entry.compressed {
            packed |= COMPRESSED_BIT;
        }
        let at = TABLE_HEADER_SIZE + index * 4;
        payload[at..at + 4].copy_from_slice(&packed.to_le_bytes());
    }
    let entries_end = TABLE_HEADER_SIZE + entries.len() * 4;
    let checksum = adler32(&payload[TABLE_HEADER_SIZE..entries_end]);
    payload[entries_end..].copy_from_slice(&checksum.to_le_bytes());
    payload
}

/// Parse and validate a table/table2 payload
pub fn parse_table_payload(
    payload: &[u8],
    section: &str,
    segment: u16,
) -> Result<Vec<TableEntry>> {
    if payload.len() < TABLE_HEADER_SIZE + 4 {
        return Err(Error::chain_corrupt(
            segment,
            format!("{section} payload too small: {} bytes", payload.len()),
        ));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().expect("4 bytes")) as usize;
    if count > MAX_TABLE_ENTRIES {
        return Err(Error::chain_corrupt(
            segment,
            format!("{section} entry count {count} exceeds maximum"),
        ));
    }
    let entries_end = TABLE_HEADER_SIZE + count * 4;
    if payload.len() < entries_end + 4 {
        return Err(Error::chain_corrupt(
            segment,
            format!("{section} payload truncated: {count} entries"),
        ));
    }
    let stored = u32::from_le_bytes(
        payload[entries_end..entries_end + 4]
            .try_into()
            .expect("4 bytes"),
    );
    let computed = adler32(&payload[TABLE_HEADER_SIZE..entries_end]);
    if computed != stored {
        return Err(Error::SectionChecksumMismatch {
            section: section.to_string(),
            segment,
            stored,
            computed,
        });
    }

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let at = TABLE_HEADER_SIZE + index * 4;
        let packed = u32::from_le_bytes(payload[at..at + 4].try_into().expect("4 bytes"));
        entries.push(TableEntry {
            relative_offset: packed & OFFSET_MASK,
            compressed: packed & COMPRESSED_BIT != 0,
        });
    }
    Ok(entries)
}

/// Non-fatal condition found while reconciling a table with its backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableWarning {
    /// Both table and table2 validate but their entries differ
    BackupDisagrees {
        /// Segment the tables live in
        segment: u16,
    },
    /// The primary table failed validation and table2 was used instead
    BackupRecovered {
        /// Segment the tables live in
        segment: u16,
    },
}

/// Reconcile a parsed `table` with its `table2` backup
///
/// Whichever validates wins; when both validate but disagree the primary
/// wins and the disagreement is surfaced as a warning.
pub fn resolve_chunk_group(
    primary: Result<Vec<TableEntry>>,
    backup: Option<Result<Vec<TableEntry>>>,
    segment: u16,
) -> Result<(Vec<TableEntry>, Option<TableWarning>)> {
    match (primary, backup) {
        (Ok(entries), None) => Ok((entries, None)),
        (Ok(entries), Some(Ok(backup_entries))) => {
            if entries == backup_entries {
                Ok((entries, None))
            } else {
                tracing::warn!(segment, "offset table backup disagrees with primary");
                Ok((entries, Some(TableWarning::BackupDisagrees { segment })))
            }
        }
        (Ok(entries), Some(Err(err))) => {
            tracing::warn!(segment, error = %err, "offset table backup failed validation");
            Ok((entries, Some(TableWarning::BackupDisagrees { segment })))
        }
        (Err(err), Some(Ok(backup_entries))) => {
            tracing::warn!(
                segment,
                error = %err,
                "offset table failed validation, recovered from backup"
            );
            Ok((backup_entries, Some(TableWarning::BackupRecovered { segment })))
        }
        (Err(err), Some(Err(_))) | (Err(err), None) => Err(err),
    }
}

/// Resolved location of one stored chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkEntry {
    /// Segment file the chunk lives in
    pub segment: u16,
    /// Absolute file offset of the stored bytes
    pub file_offset: u64,
    /// Stored size including CRC or zlib framing
    pub stored_size: u32,
    /// Stored zlib-compressed
    pub compressed: bool,
    /// Redirected into the delta segment
    pub delta: bool,
}

/// Dense arena of chunk locations, indexed by global chunk number
#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: Vec<ChunkEntry>,
}

impl OffsetTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// True when no chunk is mapped
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Location of a chunk
    pub fn get(&self, chunk: u32) -> Option<&ChunkEntry> {
        self.entries.get(chunk as usize)
    }

    /// Append the location of the next chunk
    pub fn push(&mut self, entry: ChunkEntry) {
        self.entries.push(entry);
    }

    /// Append one resolved chunk group
    ///
    /// `sectors_offset` is the descriptor offset of the sectors section the
    /// entries are relative to, `sectors_end` its end bound; the last
    /// entry's size is derived from that bound.
    pub fn extend_from_group(
        &mut self,
        segment: u16,
        sectors_offset: u64,
        sectors_end: u64,
        entries: &[TableEntry],
    ) -> Result<()> {
        for (index, entry) in entries.iter().enumerate() {
            let file_offset = sectors_offset + u64::from(entry.relative_offset);
            let end = match entries.get(index + 1) {
                Some(next) => sectors_offset + u64::from(next.relative_offset),
                None => sectors_end,
            };
            if file_offset < sectors_offset + SECTION_DESCRIPTOR_SIZE as u64
                || end <= file_offset
                || end > sectors_end
            {
                return Err(Error::chain_corrupt(
                    segment,
                    format!("table entry {index} out of sectors bounds"),
                ));
            }
            self.entries.push(ChunkEntry {
                segment,
                file_offset,
                stored_size: (end - file_offset) as u32,
                compressed: entry.compressed,
                delta: false,
            });
        }
        Ok(())
    }

    /// Redirect one chunk into the delta segment
    pub fn redirect_to_delta(
        &mut self,
        chunk: u32,
        file_offset: u64,
        stored_size: u32,
    ) -> Result<()> {
        let entry = self
            .entries
            .get_mut(chunk as usize)
            .ok_or_else(|| Error::invalid_argument(format!("chunk {chunk} out of range")))?;
        entry.delta = true;
        entry.file_offset = file_offset;
        entry.stored_size = stored_size;
        entry.compressed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<TableEntry> {
        vec![
            TableEntry {
                relative_offset: 76,
                compressed: false,
            },
            TableEntry {
                relative_offset: 76 + 32772,
                compressed: true,
            },
            TableEntry {
                relative_offset: 76 + 32772 + 1810,
                compressed: true,
            },
        ]
    }

    #[test]
    fn test_payload_roundtrip() {
        let entries = sample_entries();
        let payload = build_table_payload(&entries);
        assert_eq!(payload.len(), 20 + 3 * 4 + 4);
        let parsed = parse_table_payload(&payload, "table", 1).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_corrupt_entries_detected() {
        let mut payload = build_table_payload(&sample_entries());
        payload[TABLE_HEADER_SIZE] ^= 0xFF;
        let err = parse_table_payload(&payload, "table", 1).unwrap_err();
        assert!(matches!(err, Error::SectionChecksumMismatch { .. }));
    }

    #[test]
    fn test_resolve_prefers_valid_backup() {
        let entries = sample_entries();
        let primary: Result<Vec<TableEntry>> =
            Err(Error::chain_corrupt(1, "zeroed"));
        let (resolved, warning) =
            resolve_chunk_group(primary, Some(Ok(entries.clone())), 1).unwrap();
        assert_eq!(resolved, entries);
        assert_eq!(warning, Some(TableWarning::BackupRecovered { segment: 1 }));
    }

    #[test]
    fn test_resolve_disagreement_prefers_primary() {
        let entries = sample_entries();
        let mut other = entries.clone();
        other[1].relative_offset += 8;
        let (resolved, warning) =
            resolve_chunk_group(Ok(entries.clone()), Some(Ok(other)), 2).unwrap();
        assert_eq!(resolved, entries);
        assert_eq!(warning, Some(TableWarning::BackupDisagrees { segment: 2 }));
    }

    #[test]
    fn test_resolve_agreement_is_silent() {
        let entries = sample_entries();
        let (resolved, warning) =
            resolve_chunk_group(Ok(entries.clone()), Some(Ok(entries.clone())), 1).unwrap();
        assert_eq!(resolved, entries);
        assert!(warning.is_none());
    }

    #[test]
    fn test_resolve_both_invalid_is_fatal() {
        let primary: Result<Vec<TableEntry>> = Err(Error::chain_corrupt(1, "bad"));
        let backup: Result<Vec<TableEntry>> = Err(Error::chain_corrupt(1, "bad"));
        assert!(resolve_chunk_group(primary, Some(backup), 1).is_err());
    }

    #[test]
    fn test_group_sizes_from_bounds() {
        let mut table = OffsetTable::new();
        let sectors_offset = 1000;
        let entries = sample_entries();
        let sectors_end = sectors_offset + 76 + 32772 + 1810 + 900;
        table
            .extend_from_group(1, sectors_offset, sectors_end, &entries)
            .unwrap();

        assert_eq!(table.len(), 3);
        let first = table.get(0).unwrap();
        assert_eq!(first.file_offset, 1076);
        assert_eq!(first.stored_size, 32772);
        assert!(!first.compressed);
        // Last entry sized from the sectors end bound
        let last = table.get(2).unwrap();
        assert_eq!(last.stored_size, 900);
        assert!(last.compressed);
    }

    #[test]
    fn test_group_bounds_validation() {
        let mut table = OffsetTable::new();
        let entries = vec![TableEntry {
            relative_offset: 10, // inside the descriptor
            compressed: false,
        }];
        assert!(table.extend_from_group(1, 0, 1000, &entries).is_err());
    }

    #[test]
    fn test_redirect_to_delta() {
        let mut table = OffsetTable::new();
        table.push(ChunkEntry {
            segment: 1,
            file_offset: 500,
            stored_size: 100,
            compressed: true,
            delta: false,
        });
        table.redirect_to_delta(0, 4000, 32772).unwrap();
        let entry = table.get(0).unwrap();
        assert!(entry.delta);
        assert_eq!(entry.file_offset, 4000);
        assert!(!entry.compressed);
        assert!(table.redirect_to_delta(5, 0, 0).is_err());
    }
}
