//! Case metadata sections: `header`, `header2`, `xheader`
//!
//! All three carry the same identifier/value content in different
//! encodings: `header` is zlib-compressed ASCII, `header2` zlib-compressed
//! UTF-16LE, `xheader` zlib-compressed UTF-8 markup. The text form is a
//! small tab-separated table:
//!
//! ```text
//! 1
//! main
//! c\tn\ta\te\tt\tav\tov\tm\tu\tp\tmd\tsn
//! <values...>
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use ewfvault_core::{Error, Result};

use crate::values::{
    format_header_timestamp, reformat_header_date, DateFormat, ValuesTable,
};

/// Short field tags used in `header`/`header2` text, paired with the long
/// identifiers of the values table, in emission order.
const FIELD_TAGS: &[(&str, &str)] = &[
    ("c", "case_number"),
    ("n", "evidence_number"),
    ("a", "description"),
    ("e", "examiner_name"),
    ("t", "notes"),
    ("av", "acquiry_software_version"),
    ("ov", "acquiry_operating_system"),
    ("m", "acquiry_date"),
    ("u", "system_date"),
    ("p", "password"),
    ("md", "model"),
    ("sn", "serial_number"),
];

/// Decompressed payloads of the metadata sections found during open
#[derive(Debug, Clone, Default)]
pub struct HeaderSections {
    /// ASCII `header` payload
    pub header: Option<Vec<u8>>,
    /// UTF-16LE `header2` payload
    pub header2: Option<Vec<u8>>,
    /// UTF-8 `xheader` payload
    pub xheader: Option<Vec<u8>>,
}

impl HeaderSections {
    /// True when no metadata section was seen
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.header2.is_none() && self.xheader.is_none()
    }
}

/// zlib-compress a section payload at the default level
pub fn compress_payload(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(Error::Io)?;
    encoder.finish().map_err(Error::Io)
}

/// Inflate a compressed section payload
pub fn decompress_payload(data: &[u8], section: &str, segment: u16) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|err| {
        Error::chain_corrupt(segment, format!("cannot inflate {section} section: {err}"))
    })?;
    Ok(out)
}

fn value_or_default<'a>(values: &'a ValuesTable, identifier: &str, now: &'a str) -> &'a str {
    match values.get(identifier) {
        Some(value) => value,
        None => match identifier {
            "acquiry_date" | "system_date" => now,
            "password" => "0",
            _ => "",
        },
    }
}

/// Render the tab-separated header text from a values table
pub fn build_header_text(values: &ValuesTable) -> String {
    let now = format_header_timestamp(&chrono::Local::now().naive_local());
    let tags: Vec<&str> = FIELD_TAGS.iter().map(|(tag, _)| *tag).collect();
    let fields: Vec<&str> = FIELD_TAGS
        .iter()
        .map(|(_, identifier)| value_or_default(values, identifier, &now))
        .collect();
    format!("1\nmain\n{}\n{}\n\n", tags.join("\t"), fields.join("\t"))
}

/// Parse header text back into a values table
pub fn parse_header_text(text: &str, date_format: DateFormat) -> ValuesTable {
    let mut values = ValuesTable::header_defaults();
    let mut lines = text.lines().skip(2);
    let (Some(tag_line), Some(value_line)) = (lines.next(), lines.next()) else {
        return values;
    };
    for (tag, value) in tag_line.split('\t').zip(value_line.split('\t')) {
        let Some((_, identifier)) = FIELD_TAGS.iter().find(|(t, _)| *t == tag.trim())
        else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let value = match *identifier {
            "acquiry_date" | "system_date" => reformat_header_date(value, date_format),
            _ => value.to_string(),
        };
        values.set(identifier, value);
    }
    values
}

/// Compressed ASCII `header` payload
pub fn encode_header(values: &ValuesTable) -> Result<Vec<u8>> {
    compress_payload(build_header_text(values).as_bytes())
}

/// Compressed UTF-16LE `header2` payload, byte-order mark included
pub fn encode_header2(values: &ValuesTable) -> Result<Vec<u8>> {
    let text = build_header_text(values);
    let mut encoded = Vec::with_capacity(2 + text.len() * 2);
    encoded.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        encoded.extend_from_slice(&unit.to_le_bytes());
    }
    compress_payload(&encoded)
}

/// Decode a decompressed `header2` payload into text
pub fn decode_header2_text(payload: &[u8]) -> String {
    let (text, _, _) = encoding_rs::UTF_16LE.decode(payload);
    // decode() keeps a leading BOM character when the input carried one
    text.trim_start_matches('\u{feff}').to_string()
}

/// Render the UTF-8 `xheader` markup from a values table
pub fn build_xheader_text(values: &ValuesTable) -> String {
    let now = format_header_timestamp(&chrono::Local::now().naive_local());
    let mut text = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
    for (_, identifier) in FIELD_TAGS {
        let value = value_or_default(values, identifier, &now);
        if !value.is_empty() {
            text.push_str(&format!("\t<{identifier}>{value}</{identifier}>\n"));
        }
    }
    text.push_str("</xheader>\n");
    text
}

/// Parse `xheader` markup back into a values table
pub fn parse_xheader_text(text: &str, date_format: DateFormat) -> ValuesTable {
    let mut values = ValuesTable::header_defaults();
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        if rest.starts_with('?') || rest.starts_with('/') {
            continue;
        }
        let Some(close) = rest.find('>') else { break };
        let tag = rest[..close].to_string();
        if tag == "xheader" {
            rest = &rest[close + 1..];
            continue;
        }
        let body = &rest[close + 1..];
        let end_tag = format!("</{tag}>");
        let Some(end) = body.find(&end_tag) else {
            rest = body;
            continue;
        };
        let value = &body[..end];
        if !value.is_empty() {
            let value = match tag.as_str() {
                "acquiry_date" | "system_date" => reformat_header_date(value, date_format),
                _ => value.to_string(),
            };
            values.set(&tag, value);
        }
        rest = &body[end + end_tag.len()..];
    }
    values
}

/// Compressed UTF-8 `xheader` payload
pub fn encode_xheader(values: &ValuesTable) -> Result<Vec<u8>> {
    compress_payload(build_xheader_text(values).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> ValuesTable {
        let mut values = ValuesTable::header_defaults();
        values.set("case_number", "2026-0042");
        values.set("evidence_number", "7");
        values.set("description", "usb stick");
        values.set("examiner_name", "rivera");
        values.set("notes", "intake desk");
        values.set("acquiry_date", "2026 2 5 8 14 30");
        values.set("system_date", "2026 2 5 8 14 31");
        values
    }

    #[test]
    fn test_header_text_roundtrip() {
        let text = build_header_text(&sample_values());
        assert!(text.starts_with("1\nmain\n"));

        let parsed = parse_header_text(&text, DateFormat::Iso8601);
        assert_eq!(parsed.get("case_number"), Some("2026-0042"));
        assert_eq!(parsed.get("examiner_name"), Some("rivera"));
        assert_eq!(parsed.get("acquiry_date"), Some("2026-02-05T08:14:30"));
        // Password defaults to the "unset" marker
        assert_eq!(parsed.get("password"), Some("0"));
    }

    #[test]
    fn test_header_payload_roundtrip() {
        let payload = encode_header(&sample_values()).unwrap();
        let inflated = decompress_payload(&payload, "header", 1).unwrap();
        let parsed =
            parse_header_text(std::str::from_utf8(&inflated).unwrap(), DateFormat::MonthDay);
        assert_eq!(parsed.get("description"), Some("usb stick"));
    }

    #[test]
    fn test_header2_utf16_roundtrip() {
        let mut values = sample_values();
        values.set("notes", "zwischenablage \u{00e4}\u{00f6}\u{00fc}");
        let payload = encode_header2(&values).unwrap();
        let inflated = decompress_payload(&payload, "header2", 1).unwrap();
        let text = decode_header2_text(&inflated);
        let parsed = parse_header_text(&text, DateFormat::DayMonth);
        assert_eq!(
            parsed.get("notes"),
            Some("zwischenablage \u{00e4}\u{00f6}\u{00fc}")
        );
    }

    #[test]
    fn test_xheader_roundtrip() {
        let text = build_xheader_text(&sample_values());
        assert!(text.contains("<case_number>2026-0042</case_number>"));

        let parsed = parse_xheader_text(&text, DateFormat::Iso8601);
        assert_eq!(parsed.get("case_number"), Some("2026-0042"));
        assert_eq!(parsed.get("notes"), Some("intake desk"));
        assert_eq!(parsed.get("acquiry_date"), Some("2026-02-05T08:14:30"));
    }

    #[test]
    fn test_corrupt_compressed_payload() {
        let err = decompress_payload(&[0x12, 0x34, 0x56], "header", 2).unwrap_err();
        assert!(matches!(err, Error::ChainCorrupt { segment: 2, .. }));
    }
}
