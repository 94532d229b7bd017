//! Ordered identifier/value tables for case and hash metadata
//!
//! Header and hash values live in tables that preserve a stable index per
//! identifier, so `identifier(3)` means the same thing on every handle.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use ewfvault_core::{Error, Result};

/// Default header value identifiers, in stable index order
pub const DEFAULT_HEADER_IDENTIFIERS: &[&str] = &[
    "case_number",
    "evidence_number",
    "description",
    "examiner_name",
    "notes",
    "acquiry_date",
    "system_date",
    "acquiry_operating_system",
    "acquiry_software_version",
    "password",
    "model",
    "serial_number",
];

/// Default hash value identifiers, in stable index order
pub const DEFAULT_HASH_IDENTIFIERS: &[&str] = &["md5", "sha1"];

/// Target representation for date-carrying header values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `dd/mm/yyyy HH:MM:SS`
    DayMonth,
    /// `mm/dd/yyyy HH:MM:SS`
    MonthDay,
    /// `yyyy-mm-ddTHH:MM:SS`
    Iso8601,
}

/// An ordered mapping from identifier to optional UTF-8 value
#[derive(Debug, Clone, Default)]
pub struct ValuesTable {
    entries: Vec<(String, Option<String>)>,
}

impl ValuesTable {
    /// Create a table pre-populated with the given identifiers
    pub fn with_identifiers(identifiers: &[&str]) -> Self {
        Self {
            entries: identifiers
                .iter()
                .map(|id| (id.to_string(), None))
                .collect(),
        }
    }

    /// Table with the default header identifiers
    pub fn header_defaults() -> Self {
        Self::with_identifiers(DEFAULT_HEADER_IDENTIFIERS)
    }

    /// Table with the default hash identifiers
    pub fn hash_defaults() -> Self {
        Self::with_identifiers(DEFAULT_HASH_IDENTIFIERS)
    }

    /// Number of identifiers in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no identifiers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifier at a stable index
    pub fn identifier(&self, index: usize) -> Result<&str> {
        self.entries
            .get(index)
            .map(|(id, _)| id.as_str())
            .ok_or_else(|| {
                Error::invalid_argument(format!("value index {index} out of range"))
            })
    }

    /// Value for an identifier, if set
    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Set (or add) a value; new identifiers are appended at the end
    pub fn set(&mut self, identifier: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(id, _)| id == identifier) {
            Some((_, slot)) => *slot = Some(value),
            None => self.entries.push((identifier.to_string(), Some(value))),
        }
    }

    /// Iterate over identifiers and values in index order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(id, value)| (id.as_str(), value.as_deref()))
    }

    /// Deep-copy every set value from `other` into this table
    pub fn copy_from(&mut self, other: &ValuesTable) {
        for (identifier, value) in other.iter() {
            if let Some(value) = value {
                self.set(identifier, value);
            }
        }
    }
}

/// Render a timestamp the way header sections store it: space-separated
/// year month day hour minute second with no zero padding.
pub fn format_header_timestamp(timestamp: &NaiveDateTime) -> String {
    format!(
        "{} {} {} {} {} {}",
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    )
}

/// Parse a header-stored timestamp back into a date
pub fn parse_header_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let fields: Vec<i64> = raw
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if fields.len() != 6 {
        return None;
    }
    NaiveDate::from_ymd_opt(fields[0] as i32, fields[1] as u32, fields[2] as u32)?
        .and_hms_opt(fields[3] as u32, fields[4] as u32, fields[5] as u32)
}

/// Convert a header-stored timestamp into the requested display format.
/// Values that do not parse are passed through untouched.
pub fn reformat_header_date(raw: &str, format: DateFormat) -> String {
    let Some(timestamp) = parse_header_timestamp(raw) else {
        return raw.to_string();
    };
    let pattern = match format {
        DateFormat::DayMonth => "%d/%m/%Y %H:%M:%S",
        DateFormat::MonthDay => "%m/%d/%Y %H:%M:%S",
        DateFormat::Iso8601 => "%Y-%m-%dT%H:%M:%S",
    };
    timestamp.format(pattern).to_string()
}
