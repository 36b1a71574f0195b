//! Canonical metadata fields shared by every flavor

use std::fmt;

/// Category labels used across flavors
pub mod category {
    pub const EXIF: &str = "EXIF";
    pub const GPS: &str = "GPS";
    pub const XMP: &str = "XMP";
    pub const IPTC: &str = "IPTC";
    pub const JPEG_COMMENT: &str = "JPEG Comment";
    pub const PNG_TEXT: &str = "PNG tEXt";
    pub const PNG_ITXT: &str = "PNG iTXt";
    pub const PNG_ZTXT: &str = "PNG zTXt";
    pub const PNG_TIME: &str = "PNG tIME";
    pub const ITUNES: &str = "iTunes Metadata";
    pub const ITUNES_CUSTOM: &str = "iTunes Custom";
    pub const MP4_CONTAINER: &str = "MP4 Container";
    pub const RIFF_INFO: &str = "RIFF INFO";
    pub const WAV_HEADER: &str = "WAV Header";
    pub const WEBP: &str = "WebP";
    pub const AIFF: &str = "AIFF";
    pub const EBML_HEADER: &str = "EBML Header";
    pub const MKV_INFO: &str = "MKV Info";
    pub const MKV_TAGS: &str = "MKV Tags";
    pub const ASF: &str = "ASF";
    pub const ASF_EXTENDED: &str = "ASF Extended";
    pub const VORBIS: &str = "Vorbis Comment";
    pub const FLAC_PICTURE: &str = "FLAC Picture";
    pub const ID3V2: &str = "ID3v2";
    pub const ID3V1: &str = "ID3v1";
    pub const FLV_HEADER: &str = "FLV Header";
    pub const AMF0: &str = "AMF0";
    pub const GIF_HEADER: &str = "GIF Header";
    pub const GIF_COMMENT: &str = "GIF Comment";
    pub const ICC: &str = "ICC Profile";
    pub const OGG: &str = "Ogg Stream";
}

/// One metadata value as seen by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataField {
    pub key: String,
    pub value: String,
    pub category: String,
    pub editable: bool,
    /// Native bytes when the value string is a lossy rendering
    pub raw: Option<Vec<u8>>,
}

impl MetadataField {
    pub fn new(key: impl Into<String>, value: impl Into<String>, category: &str) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            category: category.to_string(),
            editable: false,
            raw: None,
        }
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn with_raw(mut self, raw: &[u8]) -> Self {
        self.raw = Some(raw.to_vec());
        self
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} = {}", self.category, self.key, self.value)
    }
}

/// How one key changed between two field lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub key: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.before, &self.after) {
            (None, Some(new)) => write!(f, "+ {} = {}", self.key, new),
            (Some(old), None) => write!(f, "- {} (was {})", self.key, old),
            (Some(old), Some(new)) => write!(f, "~ {}: {} -> {}", self.key, old, new),
            (None, None) => write!(f, "  {}", self.key),
        }
    }
}

/// Per-key difference between two field lists, in order of first appearance.
///
/// Repeated keys are compared as their joined value lists.
pub fn diff_fields(before: &[MetadataField], after: &[MetadataField]) -> Vec<FieldChange> {
    fn collect(fields: &[MetadataField]) -> Vec<(String, Vec<&str>)> {
        let mut out: Vec<(String, Vec<&str>)> = Vec::new();
        for field in fields {
            let id = format!("{}\u{0}{}", field.category, field.key);
            match out.iter_mut().find(|(k, _)| *k == id) {
                Some((_, values)) => values.push(&field.value),
                None => out.push((id, vec![&field.value])),
            }
        }
        out
    }

    let old = collect(before);
    let new = collect(after);
    let mut changes = Vec::new();

    let lookup = |list: &[(String, Vec<&str>)], id: &str| -> Option<String> {
        list.iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.join("; "))
    };
    let display_key = |id: &str| id.split('\u{0}').nth(1).unwrap_or(id).to_string();

    for (id, _) in old.iter().chain(new.iter()) {
        if changes.iter().any(|c: &(String, FieldChange)| &c.0 == id) {
            continue;
        }
        let a = lookup(&old, id);
        let b = lookup(&new, id);
        if a != b {
            changes.push((
                id.clone(),
                FieldChange {
                    key: display_key(id),
                    before: a,
                    after: b,
                },
            ));
        }
    }
    changes.into_iter().map(|(_, c)| c).collect()
}

/// True when every byte is printable text (used to surface unknown nodes)
pub fn is_printable(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && match std::str::from_utf8(bytes) {
            Ok(s) => s
                .chars()
                .all(|c| !c.is_control() || c == '\n' || c == '\r' || c == '\t'),
            Err(_) => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(key: &str, value: &str) -> MetadataField {
        MetadataField::new(key, value, category::VORBIS)
    }

    #[test]
    fn test_diff_reports_changes_in_order() {
        let before = vec![f("TITLE", "Old"), f("ARTIST", "A"), f("GENRE", "Rock")];
        let after = vec![f("TITLE", "New"), f("ARTIST", "A"), f("ALBUM", "X")];
        let diff = diff_fields(&before, &after);
        assert_eq!(diff.len(), 3);
        assert_eq!(diff[0].key, "TITLE");
        assert_eq!(diff[0].before.as_deref(), Some("Old"));
        assert_eq!(diff[0].after.as_deref(), Some("New"));
        assert_eq!(diff[1].key, "GENRE");
        assert_eq!(diff[1].after, None);
        assert_eq!(diff[2].key, "ALBUM");
        assert_eq!(diff[2].before, None);
    }

    #[test]
    fn test_diff_repeated_keys() {
        let before = vec![f("ARTIST", "A"), f("ARTIST", "B")];
        let after = vec![f("ARTIST", "A")];
        let diff = diff_fields(&before, &after);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].before.as_deref(), Some("A; B"));
    }

    #[test]
    fn test_printable() {
        assert!(is_printable(b"hello world\n"));
        assert!(!is_printable(b"\x00\x01"));
        assert!(!is_printable(b""));
        assert!(!is_printable(&[0xFF, 0xFE]));
    }
}
