//! Vorbis comment lists (FLAC block type 4, Ogg Vorbis and Opus comment headers)
//!
//! Layout, all integers little-endian:
//! - 4 bytes vendor length + vendor string
//! - 4 bytes comment count
//! - for each comment: 4 bytes length + `KEY=value`
//!
//! Entries are kept as their raw bytes. Only `set` and `remove` produce new bytes, so a
//! comment that is not valid UTF-8, or has no `=`, is written back exactly as it was read.

use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    ContainerKind,
};
use byteorder::{ByteOrder, LittleEndian};

/// Vendor string written into comment blocks this crate creates
pub const VENDOR: &str = concat!("media-surgery ", env!("CARGO_PKG_VERSION"));

/// One `KEY=value` entry, exactly as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    raw: Vec<u8>,
}

impl Comment {
    /// A new entry; the key is written upper-case
    pub fn new(key: &str, value: &str) -> Self {
        let mut raw = key.to_ascii_uppercase().into_bytes();
        raw.push(b'=');
        raw.extend_from_slice(value.as_bytes());
        Self { raw }
    }

    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    fn split(&self) -> Option<(&[u8], &[u8])> {
        let at = self.raw.iter().position(|b| *b == b'=')?;
        (at > 0).then(|| (&self.raw[..at], &self.raw[at + 1..]))
    }

    /// Field name, `None` for entries without a usable `KEY=` prefix
    pub fn key(&self) -> Option<&str> {
        self.split().and_then(|(key, _)| std::str::from_utf8(key).ok())
    }

    /// Value for display; invalid UTF-8 is replaced, the stored bytes are not
    pub fn value(&self) -> String {
        self.split()
            .map(|(_, value)| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default()
    }

    fn has_key(&self, key: &str) -> bool {
        self.key().map(|k| k.eq_ignore_ascii_case(key)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VorbisComments {
    vendor: Vec<u8>,
    /// Entries in file order
    pub comments: Vec<Comment>,
}

impl VorbisComments {
    pub fn new() -> Self {
        Self {
            vendor: VENDOR.as_bytes().to_vec(),
            comments: Vec::new(),
        }
    }

    /// Parse a comment list; `kind` names the container in errors
    pub fn parse(kind: ContainerKind, data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let vendor_len = cursor.read_u32::<LittleEndian>()? as usize;
        let vendor = cursor.read_bytes(vendor_len)?.to_vec();
        let count = cursor.read_u32::<LittleEndian>()? as usize;
        // Each comment needs at least its length prefix
        if count > cursor.remaining() / 4 {
            return Err(Error::malformed(
                kind,
                "VORBIS_COMMENT",
                cursor.absolute_position(),
                format!("{} comments cannot fit in {} bytes", count, cursor.remaining()),
            ));
        }
        let mut comments = Vec::with_capacity(count);
        for _ in 0..count {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            comments.push(Comment::from_raw(cursor.read_bytes(len)?.to_vec()));
        }
        Ok(Self { vendor, comments })
    }

    pub fn vendor(&self) -> String {
        String::from_utf8_lossy(&self.vendor).into_owned()
    }

    /// `(KEY, value)` for every entry that has a key
    pub fn fields(&self) -> Vec<(String, String)> {
        self.comments
            .iter()
            .filter_map(|c| c.key().map(|k| (k.to_string(), c.value())))
            .collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, self.vendor.len() as u32);
        out.extend_from_slice(&word);
        out.extend_from_slice(&self.vendor);
        LittleEndian::write_u32(&mut word, self.comments.len() as u32);
        out.extend_from_slice(&word);
        for comment in &self.comments {
            LittleEndian::write_u32(&mut word, comment.raw.len() as u32);
            out.extend_from_slice(&word);
            out.extend_from_slice(&comment.raw);
        }
        out
    }

    /// Replace the first comment with this key and drop any others; append if absent
    pub fn set(&mut self, key: &str, value: &str) {
        let mut seen = false;
        self.comments.retain_mut(|c| {
            if !c.has_key(key) {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            *c = Comment::new(key, value);
            true
        });
        if !seen {
            self.comments.push(Comment::new(key, value));
        }
    }

    /// Remove every comment with this key
    pub fn remove(&mut self, key: &str) {
        self.comments.retain(|c| !c.has_key(key));
    }
}

impl Default for VorbisComments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "flac"))]
mod tests {
    use super::*;

    fn entry(raw: &[u8]) -> Comment {
        Comment::from_raw(raw.to_vec())
    }

    #[test]
    fn test_parse_and_serialize() {
        let mut vc = VorbisComments::new();
        vc.comments.push(Comment::new("TITLE", "Song"));
        vc.comments.push(Comment::new("ARTIST", "A=B"));
        let parsed = VorbisComments::parse(ContainerKind::Flac, &vc.to_bytes()).unwrap();
        assert_eq!(parsed, vc);
        assert_eq!(parsed.fields()[1], ("ARTIST".to_string(), "A=B".to_string()));
    }

    #[test]
    fn test_set_replaces_first_and_drops_duplicates() {
        let mut vc = VorbisComments::new();
        vc.comments.push(entry(b"ARTIST=One"));
        vc.comments.push(entry(b"TITLE=Song"));
        vc.comments.push(entry(b"artist=Two"));
        vc.set("Artist", "Solo");
        assert_eq!(vc.comments, vec![entry(b"ARTIST=Solo"), entry(b"TITLE=Song")]);
        vc.set("genre", "Jazz");
        assert_eq!(vc.comments[2].key(), Some("GENRE"));
        vc.remove("title");
        assert_eq!(vc.comments.len(), 2);
    }

    #[test]
    fn test_replaced_key_is_written_upper_case() {
        let mut vc = VorbisComments::new();
        vc.comments.push(entry(b"title=Old"));
        vc.set("title", "New");
        assert_eq!(vc.comments, vec![entry(b"TITLE=New")]);
    }

    #[test]
    fn test_untouched_entries_keep_their_bytes() {
        let mut vc = VorbisComments::new();
        vc.comments.push(entry(b"ARTIST=Bj\xF6rk"));
        vc.comments.push(entry(b"no separator"));
        let bytes = vc.to_bytes();

        let mut parsed = VorbisComments::parse(ContainerKind::Flac, &bytes).unwrap();
        assert_eq!(parsed.fields(), vec![("ARTIST".to_string(), "Bj\u{FFFD}rk".to_string())]);
        parsed.set("TITLE", "U");
        let out = parsed.to_bytes();
        // Both original entries come back byte for byte, the new one follows them
        let entries_at = 4 + VENDOR.len() + 4;
        assert_eq!(&out[entries_at..bytes.len()], &bytes[entries_at..]);
        assert!(out.ends_with(b"TITLE=U"));
    }

    #[test]
    fn test_hostile_count_is_rejected() {
        let mut data = 0u32.to_le_bytes().to_vec();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(VorbisComments::parse(ContainerKind::Flac, &data).is_err());
    }
}
