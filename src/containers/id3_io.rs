//! ID3v2 container I/O implementation (MP3)
//!
//! The first six header bytes (`ID3`, version, revision, flags) are the tree header. The
//! tag body is a single node whose framing writes the 28-bit syncsafe tag size; its
//! children are the frames followed by an unframed padding node. Frame flags are the
//! auxiliary header of each frame. MPEG audio and any ID3v1 tag at the very end are the
//! tree trailer.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    text,
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::BigEndian;

const MAGIC: &[u8; 3] = b"ID3";
const FOOTER_MAGIC: &[u8; 3] = b"3DI";
/// Tag of the node holding the whole tag body
const TAG_BODY: [u8; 4] = *b"ID3 ";
const ID3V1_LEN: usize = 128;
const MAX_TAG_SIZE: u32 = (1 << 28) - 1;

mod flags {
    pub const UNSYNCHRONISATION: u8 = 0x80;
    pub const EXTENDED_HEADER: u8 = 0x40;
    pub const FOOTER: u8 = 0x10;

    // v2.4 frame format flags (second flag byte)
    pub const V4_COMPRESSION: u8 = 0x08;
    pub const V4_ENCRYPTION: u8 = 0x04;
    pub const V4_UNSYNC: u8 = 0x02;
    pub const V4_DATA_LENGTH: u8 = 0x01;

    // v2.3 frame format flags (second flag byte)
    pub const V3_COMPRESSION: u8 = 0x80;
    pub const V3_ENCRYPTION: u8 = 0x40;
    pub const V3_GROUPING: u8 = 0x20;
}

mod encoding {
    pub const LATIN1: u8 = 0;
    pub const UTF16: u8 = 1;
    pub const UTF16BE: u8 = 2;
    pub const UTF8: u8 = 3;
}

/// Friendly names and the frames behind them
const FRAME_NAMES: &[(&str, &[u8; 4])] = &[
    ("Title", b"TIT2"),
    ("Artist", b"TPE1"),
    ("Album", b"TALB"),
    ("AlbumArtist", b"TPE2"),
    ("Composer", b"TCOM"),
    ("Genre", b"TCON"),
    ("Comment", b"COMM"),
    ("Year", b"TDRC"),
    ("Year", b"TYER"),
    ("TrackNumber", b"TRCK"),
    ("DiscNumber", b"TPOS"),
    ("Lyrics", b"USLT"),
    ("Copyright", b"TCOP"),
    ("Picture", b"APIC"),
];

/// Extra spellings accepted on edit
const KEY_ALIASES: &[(&str, &str)] = &[("track", "TRCK"), ("disc", "TPOS"), ("date", "TDRC")];

const EDITABLE_FIELDS: &[&str] = &[
    "Title",
    "Artist",
    "Album",
    "AlbumArtist",
    "Composer",
    "Genre",
    "Comment",
    "Year",
    "TrackNumber",
    "DiscNumber",
    "Lyrics",
    "Copyright",
    "TXXX:<description>",
    "(any text frame id)",
];

const ID3V1_GENRES: &[&str] = &[
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical",
    "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "AlternRock",
    "Bass", "Soul", "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock",
    "Ethnic", "Gothic", "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance",
    "Dream", "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap",
    "Pop/Funk", "Jungle", "Native American", "Cabaret", "New Wave", "Psychadelic", "Rave",
    "Showtunes", "Trailer", "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro",
    "Musical", "Rock & Roll", "Hard Rock",
];

fn syncsafe(bytes: [u8; 4]) -> Option<u32> {
    if bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, &b| (acc << 7) | b as u32))
}

fn to_syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// Undo unsynchronisation: every `FF 00` becomes `FF`
fn resync(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        out.push(data[i]);
        if data[i] == 0xFF && data.get(i + 1) == Some(&0x00) {
            i += 1;
        }
        i += 1;
    }
    out
}

fn is_frame_id(id: &[u8; 4]) -> bool {
    id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn friendly_name(id: &[u8; 4]) -> Option<&'static str> {
    FRAME_NAMES.iter().find(|(_, f)| *f == id).map(|(name, _)| *name)
}

/// Decode an encoded string; multiple NUL-separated values are joined
fn decode_text(enc: u8, bytes: &[u8]) -> String {
    let s = match enc {
        encoding::UTF16 => text::utf16_bom(bytes),
        encoding::UTF16BE => text::utf16be(bytes),
        encoding::UTF8 => String::from_utf8_lossy(bytes).into_owned(),
        _ => text::latin1(bytes),
    };
    s.split('\0')
        .map(|v| v.trim_start_matches('\u{feff}'))
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Split at the first encoded NUL terminator
fn split_terminated(enc: u8, bytes: &[u8]) -> (&[u8], &[u8]) {
    let wide = matches!(enc, encoding::UTF16 | encoding::UTF16BE);
    let pos = if wide {
        bytes
            .chunks_exact(2)
            .position(|c| c == [0, 0])
            .map(|i| (i * 2, 2))
    } else {
        bytes.iter().position(|&b| b == 0).map(|i| (i, 1))
    };
    match pos {
        Some((at, width)) => (&bytes[..at], &bytes[at + width..]),
        None => (bytes, &[]),
    }
}

/// `(encoding byte, encoded text)` for a value in a tag of this major version
fn encode_text(major: u8, value: &str) -> (u8, Vec<u8>) {
    if major >= 4 {
        return (encoding::UTF8, value.as_bytes().to_vec());
    }
    match text::to_latin1(value) {
        Some(bytes) => (encoding::LATIN1, bytes),
        None => {
            let mut bytes = vec![0xFF, 0xFE];
            bytes.extend(text::to_utf16le(value));
            (encoding::UTF16, bytes)
        }
    }
}

fn terminator(enc: u8) -> &'static [u8] {
    if matches!(enc, encoding::UTF16 | encoding::UTF16BE) {
        &[0, 0]
    } else {
        &[0]
    }
}

/// Frame body for a new value
fn frame_body(major: u8, id: &[u8; 4], description: &str, value: &str) -> Vec<u8> {
    let (enc, encoded) = encode_text(major, value);
    let mut body = vec![enc];
    match id {
        b"COMM" | b"USLT" => {
            body.extend_from_slice(b"eng");
            body.extend_from_slice(terminator(enc));
            body.extend(encoded);
        }
        b"TXXX" => {
            let (_, desc) = encode_text(major, description);
            // Both strings must share the encoding byte
            let desc = if enc == encoding::UTF16 && !desc.starts_with(&[0xFF, 0xFE]) {
                let mut wide = vec![0xFF, 0xFE];
                wide.extend(text::to_utf16le(description));
                wide
            } else {
                desc
            };
            body.extend(desc);
            body.extend_from_slice(terminator(enc));
            body.extend(encoded);
        }
        [b'W', ..] => {
            // URL frames carry no encoding byte
            body = text::to_latin1(value).unwrap_or_else(|| value.as_bytes().to_vec());
        }
        _ => body.extend(encoded),
    }
    body
}

/// Frame and tag framing for one major version
struct FrameFraming {
    major: u8,
    /// Version, revision and flags, repeated in the footer
    version: [u8; 3],
}

impl FrameFraming {
    fn for_tree(tree: &ContainerTree) -> Self {
        let mut version = [4, 0, 0];
        if let Some(bytes) = tree.header.get(3..6) {
            version.copy_from_slice(bytes);
        }
        Self {
            major: version[0],
            version,
        }
    }

    fn has_footer(&self) -> bool {
        self.major >= 4 && self.version[2] & flags::FOOTER != 0
    }

    fn tag_size(&self, body_len: u64) -> Result<[u8; 4]> {
        if body_len > MAX_TAG_SIZE as u64 {
            return Err(Error::DataTooLarge {
                size: body_len as usize,
                max: MAX_TAG_SIZE as usize,
            });
        }
        Ok(to_syncsafe(body_len as u32))
    }
}

impl NodeFraming for FrameFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Id3
    }

    fn header_len(&self, node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(match node.tag {
            Tag::Padding => 0,
            Tag::FourCc(TAG_BODY) => 4,
            // id, size; the two flag bytes are the aux header
            _ => 8,
        })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        match node.tag {
            Tag::Padding => Ok(()),
            Tag::FourCc(TAG_BODY) => {
                out.extend_from_slice(&self.tag_size(body_len)?);
                Ok(())
            }
            Tag::FourCc(id) => {
                // The flag bytes are counted by the frame header, not the frame size
                let size = body_len.saturating_sub(node.aux_header.len() as u64);
                out.extend_from_slice(&id);
                if self.major >= 4 {
                    out.extend_from_slice(&self.tag_size(size)?);
                } else {
                    let size = u32::try_from(size).map_err(|_| Error::DataTooLarge {
                        size: size as usize,
                        max: u32::MAX as usize,
                    })?;
                    out.extend_from_slice(&size.to_be_bytes());
                }
                Ok(())
            }
            other => Err(Error::malformed(
                ContainerKind::Id3,
                other.to_string(),
                node.offset,
                "not an ID3v2 frame",
            )),
        }
    }

    fn trailer_len(&self, node: &ContainerNode, _body_len: u64) -> u64 {
        if node.tag == Tag::FourCc(TAG_BODY) && self.has_footer() {
            10
        } else {
            0
        }
    }

    fn write_trailer(
        &self,
        node: &ContainerNode,
        body_len: u64,
        out: &mut Vec<u8>,
        _frame_start: usize,
    ) -> Result<()> {
        if node.tag == Tag::FourCc(TAG_BODY) && self.has_footer() {
            out.extend_from_slice(FOOTER_MAGIC);
            out.extend_from_slice(&self.version);
            out.extend_from_slice(&self.tag_size(body_len)?);
        }
        Ok(())
    }
}

/// ID3v2 container I/O implementation
pub struct Id3IO;

impl Id3IO {
    pub fn new() -> Self {
        Self
    }

    fn major(tree: &ContainerTree) -> u8 {
        tree.header.get(3).copied().unwrap_or(4)
    }

    fn read_frames(
        &self,
        body: &[u8],
        base: u64,
        major: u8,
        tree: &mut ContainerTree,
    ) -> Vec<ContainerNode> {
        let mut frames = Vec::new();
        let mut cursor = ByteCursor::with_base(body, base);
        while !cursor.at_end() {
            let start = cursor.position();
            if cursor.peek_u8().ok() == Some(0) || cursor.remaining() < 10 {
                break;
            }
            match self.read_frame(&mut cursor, major) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tree.record_issue("ID3v2 frame", &e);
                    cursor.set_position(start).ok();
                    break;
                }
            }
        }
        if !cursor.at_end() {
            frames.push(ContainerNode::leaf(Tag::Padding, cursor.read_rest().to_vec()));
        }
        frames
    }

    fn read_frame(&self, cursor: &mut ByteCursor, major: u8) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let id: [u8; 4] = cursor.read_array()?;
        if !is_frame_id(&id) {
            return Err(Error::malformed(
                ContainerKind::Id3,
                text::latin1(&id),
                offset,
                "invalid frame id",
            ));
        }
        let raw_size: [u8; 4] = cursor.read_array()?;
        let size = if major >= 4 {
            syncsafe(raw_size).ok_or_else(|| {
                Error::malformed(
                    ContainerKind::Id3,
                    text::latin1(&id),
                    offset,
                    "frame size is not syncsafe",
                )
            })?
        } else {
            u32::from_be_bytes(raw_size)
        };
        let frame_flags = cursor.read_bytes(2)?.to_vec();
        let payload = cursor.read_bytes(size as usize)?.to_vec();
        let mut node = ContainerNode::leaf(Tag::FourCc(id), payload);
        node.aux_header = frame_flags;
        node.declared_length = VarInt::new(size as u64, 4);
        node.offset = offset;
        Ok(node)
    }

    /// Frame data with the per-frame transformations undone, `None` if unreadable
    fn frame_data(major: u8, frame: &ContainerNode) -> Option<Vec<u8>> {
        let format = frame.aux_header.get(1).copied().unwrap_or(0);
        let mut data = frame.payload.as_slice();
        if major >= 4 {
            if format & (flags::V4_COMPRESSION | flags::V4_ENCRYPTION) != 0 {
                return None;
            }
            if format & flags::V4_DATA_LENGTH != 0 {
                data = data.get(4..)?;
            }
            if format & flags::V4_UNSYNC != 0 {
                return Some(resync(data));
            }
        } else {
            if format & (flags::V3_COMPRESSION | flags::V3_ENCRYPTION) != 0 {
                return None;
            }
            if format & flags::V3_GROUPING != 0 {
                data = data.get(1..)?;
            }
        }
        Some(data.to_vec())
    }

    fn frame_field(major: u8, frame: &ContainerNode) -> Option<MetadataField> {
        let id = frame.tag.fourcc()?;
        let data = Self::frame_data(major, frame)?;
        let (&enc, rest) = data.split_first()?;
        let friendly = friendly_name(id);
        let (key, value) = match id {
            b"TXXX" => {
                let (desc, value) = split_terminated(enc, rest);
                (format!("TXXX:{}", decode_text(enc, desc)), decode_text(enc, value))
            }
            b"COMM" | b"USLT" => {
                let (_, value) = split_terminated(enc, rest.get(3..)?);
                (friendly?.to_string(), decode_text(enc, value))
            }
            b"APIC" => {
                let (mime, rest) = split_terminated(encoding::LATIN1, rest);
                let (_, picture) = split_terminated(enc, rest.get(1..)?);
                let summary = format!("{}, {} bytes", text::latin1(mime), picture.len());
                return Some(MetadataField::new("Picture", summary, category::ID3V2));
            }
            [b'T', ..] => (
                friendly.map(str::to_string).unwrap_or_else(|| text::latin1(id)),
                decode_text(enc, rest),
            ),
            [b'W', ..] => (text::latin1(id), text::latin1(text::until_nul(&data))),
            _ => return None,
        };
        (!value.is_empty()).then(|| MetadataField::new(key, value, category::ID3V2).editable(true))
    }

    fn v1_fields(trailer: &[u8]) -> Vec<MetadataField> {
        let Some(tag) = Self::v1_tag(trailer) else {
            return Vec::new();
        };
        let string = |range: std::ops::Range<usize>| {
            text::latin1(text::until_nul(&tag[range])).trim().to_string()
        };
        let mut fields = vec![
            ("Title", string(3..33)),
            ("Artist", string(33..63)),
            ("Album", string(63..93)),
            ("Year", string(93..97)),
        ];
        // ID3v1.1 keeps the track number in the last comment byte
        if tag[125] == 0 && tag[126] != 0 {
            fields.push(("Comment", string(97..125)));
            fields.push(("TrackNumber", tag[126].to_string()));
        } else {
            fields.push(("Comment", string(97..127)));
        }
        if let Some(genre) = ID3V1_GENRES.get(tag[127] as usize) {
            fields.push(("Genre", genre.to_string()));
        }
        fields
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| MetadataField::new(k, v, category::ID3V1))
            .collect()
    }

    fn v1_tag(trailer: &[u8]) -> Option<&[u8]> {
        let tag = trailer.get(trailer.len().checked_sub(ID3V1_LEN)?..)?;
        tag.starts_with(b"TAG").then_some(tag)
    }

    fn drop_v1(tree: &mut ContainerTree) {
        if Self::v1_tag(&tree.trailer).is_some() {
            let len = tree.trailer.len() - ID3V1_LEN;
            tree.trailer.truncate(len);
        }
    }

    /// Tag body node, synthesizing a v2.4 tag when the file has none
    fn ensure_tag(tree: &mut ContainerTree) -> &mut ContainerNode {
        if tree.nodes.is_empty() {
            log_debug!("synthesizing ID3v2.4 tag");
            tree.header = vec![b'I', b'D', b'3', 4, 0, 0];
            tree.nodes
                .push(ContainerNode::container(Tag::FourCc(TAG_BODY), Vec::new(), Vec::new()));
        }
        &mut tree.nodes[0]
    }

    fn matches(frame: &ContainerNode, id: &[u8; 4], description: Option<&str>, major: u8) -> bool {
        if !frame.is(id) {
            return false;
        }
        match description {
            None => true,
            Some(wanted) => Self::frame_field(major, frame)
                .map(|f| f.key.strip_prefix("TXXX:") == Some(wanted))
                .unwrap_or(false),
        }
    }

    fn set_frame(
        body: &mut ContainerNode,
        major: u8,
        id: [u8; 4],
        description: Option<&str>,
        value: &str,
    ) {
        let payload = frame_body(major, &id, description.unwrap_or(""), value);
        let mut seen = false;
        body.children.retain_mut(|frame| {
            if !Self::matches(frame, &id, description, major) {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            frame.payload = payload.clone();
            frame.aux_header = vec![0, 0];
            true
        });
        if !seen {
            let mut frame = ContainerNode::leaf(Tag::FourCc(id), payload);
            frame.aux_header = vec![0, 0];
            let at = body
                .children
                .iter()
                .position(|c| c.tag == Tag::Padding)
                .unwrap_or(body.children.len());
            body.children.insert(at, frame);
        }
    }

    /// Native id and optional TXXX description for a resolved key
    fn parse_key(key: &str, major: u8) -> Option<([u8; 4], Option<&str>)> {
        if let Some(desc) = key.strip_prefix("TXXX:") {
            return Some((*b"TXXX", Some(desc)));
        }
        let id: [u8; 4] = key.as_bytes().try_into().ok()?;
        // The recording date frame differs between versions
        Some(match (&id, major) {
            (b"TDRC", 3) => (*b"TYER", None),
            (b"TYER", 4) => (*b"TDRC", None),
            _ => (id, None),
        })
    }
}

impl Default for Id3IO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for Id3IO {
    fn container_type() -> ContainerKind {
        ContainerKind::Id3
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Mp3]
    }

    fn extensions() -> &'static [&'static str] {
        &["mp3"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["audio/mpeg", "audio/mp3"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        if header.starts_with(MAGIC) {
            return Some(ContainerKind::Id3);
        }
        // MPEG audio frame sync with a valid layer
        match header {
            [0xFF, b, ..] if b & 0xE0 == 0xE0 && b & 0x06 != 0 => Some(ContainerKind::Id3),
            _ => None,
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: EDITABLE_FIELDS,
            notes: "ID3v2.3/v2.4 frames; untagged files get a v2.4 tag; ID3v1 is strip only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Id3,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Id3, Vec::new());
        let mut cursor = ByteCursor::new(data);
        if !data.starts_with(MAGIC) {
            tree.trailer = data.to_vec();
            return Ok(tree);
        }

        let mut header = cursor.read_bytes(6)?.to_vec();
        let (major, tag_flags) = (header[3], header[5]);
        let size_bytes: [u8; 4] = cursor.read_array()?;
        let Some(size) = syncsafe(size_bytes) else {
            tree.header = header;
            let err = Error::malformed(
                ContainerKind::Id3,
                "ID3v2 header",
                6,
                "tag size is not syncsafe",
            );
            tree.record_issue("ID3v2 header", &err);
            tree.trailer = cursor.read_rest().to_vec();
            return Ok(tree);
        };
        let available = cursor.remaining();
        if size as usize > available {
            tree.record_issue(
                "ID3v2 tag",
                &Error::Truncated {
                    offset: 10,
                    needed: size as u64,
                    available: available as u64,
                },
            );
        }
        let raw_body = cursor.read_bytes((size as usize).min(available))?;

        let mut tag = ContainerNode::container(Tag::FourCc(TAG_BODY), Vec::new(), Vec::new());
        tag.declared_length = VarInt::new(size as u64, 4);
        if !(3..=4).contains(&major) {
            tree.record_issue(
                "ID3v2 header",
                &Error::malformed(
                    ContainerKind::Id3,
                    "ID3v2 header",
                    3,
                    format!("frames of ID3v2.{} are not decoded", major),
                ),
            );
            tag.payload = raw_body.to_vec();
        } else {
            // v2.3 unsynchronises the whole tag; it is written back without it
            let body = if major == 3 && tag_flags & flags::UNSYNCHRONISATION != 0 {
                header[5] &= !flags::UNSYNCHRONISATION;
                resync(raw_body)
            } else {
                raw_body.to_vec()
            };
            let mut frames_at = 0;
            if tag_flags & flags::EXTENDED_HEADER != 0 {
                let ext: [u8; 4] = body.get(..4).and_then(|b| b.try_into().ok()).unwrap_or([0; 4]);
                // v2.4 counts the size field itself, v2.3 does not
                let ext_len = if major >= 4 {
                    syncsafe(ext).unwrap_or(0) as usize
                } else {
                    u32::from_be_bytes(ext) as usize + 4
                };
                frames_at = ext_len.min(body.len());
                tag.aux_header = body[..frames_at].to_vec();
            }
            let base = 10 + frames_at as u64;
            tag.children = self.read_frames(&body[frames_at..], base, major, &mut tree);
        }
        tree.header = header;
        tree.nodes.push(tag);

        let footer_follows = cursor
            .peek_bytes(10)
            .map(|f| f.starts_with(FOOTER_MAGIC))
            .unwrap_or(false);
        if tag_flags & flags::FOOTER != 0 && major >= 4 && footer_follows {
            cursor.skip(10)?;
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&FrameFraming::for_tree(tree), tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        (!tree.nodes.is_empty()).then(|| vec![0])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Mp3
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let major = Self::major(tree);
        let mut fields: Vec<MetadataField> = tree
            .nodes
            .iter()
            .flat_map(|tag| tag.children.iter())
            .filter_map(|frame| Self::frame_field(major, frame))
            .collect();
        fields.extend(Self::v1_fields(&tree.trailer));
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        let named = FRAME_NAMES.iter().find(|(name, id)| {
            name.eq_ignore_ascii_case(key) && id.as_slice() != b"TYER" && id.as_slice() != b"APIC"
        });
        if let Some((_, id)) = named {
            return Some(text::latin1(*id));
        }
        let alias = KEY_ALIASES.iter().find(|(alias, _)| alias.eq_ignore_ascii_case(key));
        if let Some((_, id)) = alias {
            return Some(id.to_string());
        }
        if let Some(desc) = key.strip_prefix("TXXX:").or_else(|| key.strip_prefix("txxx:")) {
            return (!desc.is_empty()).then(|| format!("TXXX:{}", desc));
        }
        let upper = key.to_ascii_uppercase();
        let id: [u8; 4] = upper.as_bytes().try_into().ok()?;
        let editable = is_frame_id(&id)
            && (matches!(id[0], b'T' | b'W') || matches!(&id, b"COMM" | b"USLT"));
        (editable && &id != b"TXXX" && &id != b"WXXX").then_some(upper)
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let major = if tree.nodes.is_empty() { 4 } else { Self::major(tree) };
        if !(3..=4).contains(&major) {
            return Err(Error::malformed(
                ContainerKind::Id3,
                "ID3v2 header",
                3,
                format!("ID3v2.{} tags cannot be rewritten", major),
            ));
        }
        if !ops.iter().any(|op| matches!(op, FieldOp::Set { .. })) && tree.nodes.is_empty() {
            return Ok(());
        }
        if tree.header.len() == 6 && tree.header[5] & flags::EXTENDED_HEADER != 0 {
            // A stale CRC in the extended header would no longer match
            tree.header[5] &= !flags::EXTENDED_HEADER;
            if let Some(tag) = tree.nodes.first_mut() {
                tag.aux_header.clear();
            }
        }
        if major >= 4 && tree.header.len() == 6 {
            tree.header[5] &= !flags::UNSYNCHRONISATION;
        }

        let body = Self::ensure_tag(tree);
        for op in ops {
            let (id, description) =
                Self::parse_key(op.key(), major).ok_or_else(|| Error::UnsupportedField {
                    key: op.key().to_string(),
                    flavor: ContainerKind::Id3,
                })?;
            match op {
                FieldOp::Set { value, .. } => Self::set_frame(body, major, id, description, value),
                FieldOp::Delete { .. } => body
                    .children
                    .retain(|frame| !Self::matches(frame, &id, description, major)),
            }
        }
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        let major = Self::major(tree);
        match mode {
            StripMode::All => {
                tree.header.clear();
                tree.nodes.clear();
                Self::drop_v1(tree);
            }
            StripMode::GpsOnly => {
                for tag in &mut tree.nodes {
                    tag.children.retain(|frame| {
                        Self::frame_field(major, frame).map(|f| mode.keeps(&f)).unwrap_or(true)
                    });
                }
            }
            StripMode::Keep(_) => {
                if !mode.keeps_group(&[category::ID3V2, "id3"]) {
                    for tag in &mut tree.nodes {
                        tag.children.retain(|frame| {
                            if frame.tag == Tag::Padding {
                                return true;
                            }
                            let keeps_id = || {
                                let id = frame.tag.fourcc();
                                id.is_some_and(|id| mode.keeps_key(&text::latin1(id)))
                            };
                            Self::frame_field(major, frame)
                                .map(|f| mode.keeps(&f) || keeps_id())
                                .unwrap_or(false)
                        });
                    }
                }
                if !mode.keeps_group(&[category::ID3V1, "id3v1"]) {
                    Self::drop_v1(tree);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::id3;

    #[test]
    fn test_syncsafe() {
        assert_eq!(syncsafe([0, 0, 0x02, 0x01]), Some(257));
        assert_eq!(to_syncsafe(257), [0, 0, 0x02, 0x01]);
        assert_eq!(syncsafe([0, 0, 0x80, 0]), None);
    }

    #[test]
    fn test_resync() {
        assert_eq!(resync(&[0xFF, 0x00, 0xE0, 0x01]), vec![0xFF, 0xE0, 0x01]);
        assert_eq!(resync(&[0xFF]), vec![0xFF]);
    }

    #[test]
    fn test_round_trip_is_identical() {
        let file = id3::mp3_with_frames(4, &[(b"TIT2", "Song"), (b"TPE1", "Someone")], 16);
        let io = Id3IO::new();
        let tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert_eq!(tree.trailer, id3::AUDIO);
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract_friendly_names() {
        let frames: &[(&[u8; 4], &str)] =
            &[(b"TIT2", "Song"), (b"TYER", "1999"), (b"TSSE", "LAME")];
        let file = id3::mp3_with_frames(3, frames, 0);
        let io = Id3IO::new();
        let fields = io.extract(&io.decode(&file).unwrap());
        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["Title", "Year", "TSSE"]);
        assert_eq!(fields[1].value, "1999");
    }

    #[test]
    fn test_set_replaces_and_keeps_padding_last() {
        let file = id3::mp3_with_frames(4, &[(b"TIT2", "Song")], 32);
        let io = Id3IO::new();
        let mut tree = io.decode(&file).unwrap();
        for _ in 0..2 {
            let key = io.canonical_key("title").unwrap();
            io.apply_edits(&mut tree, &[FieldOp::Set { key, value: "Ünïcode".into() }])
                .unwrap();
        }
        let key = io.canonical_key("artist").unwrap();
        io.apply_edits(&mut tree, &[FieldOp::Set { key, value: "Someone".into() }])
            .unwrap();
        assert_eq!(tree.nodes[0].children.last().unwrap().tag, Tag::Padding);

        let out = io.encode(&tree).unwrap();
        assert!(out.ends_with(id3::AUDIO));
        let fields = io.extract(&io.decode(&out).unwrap());
        assert_eq!(fields.iter().filter(|f| f.key == "Title").count(), 1);
        assert!(fields.iter().any(|f| f.key == "Title" && f.value == "Ünïcode"));
        assert!(fields.iter().any(|f| f.key == "Artist" && f.value == "Someone"));
    }

    #[test]
    fn test_v23_year_and_utf16() {
        let file = id3::mp3_with_frames(3, &[], 0);
        let io = Id3IO::new();
        let mut tree = io.decode(&file).unwrap();
        let year = io.canonical_key("year").unwrap();
        io.apply_edits(
            &mut tree,
            &[
                FieldOp::Set { key: year, value: "2001".into() },
                FieldOp::Set { key: "TIT2".into(), value: "日本".into() },
            ],
        )
        .unwrap();
        let frames = &tree.nodes[0].children;
        assert!(frames[0].is(b"TYER"));
        assert_eq!(frames[1].payload[0], encoding::UTF16);
        let fields = io.extract(&tree);
        assert!(fields.iter().any(|f| f.key == "Title" && f.value == "日本"));
    }

    #[test]
    fn test_tagless_mp3_gets_v24_tag() {
        let io = Id3IO::new();
        let mut tree = io.decode(id3::AUDIO).unwrap();
        assert!(tree.nodes.is_empty());
        io.apply_edits(&mut tree, &[FieldOp::Set { key: "TALB".into(), value: "Album".into() }])
            .unwrap();
        let out = io.encode(&tree).unwrap();
        assert!(out.starts_with(b"ID3\x04\x00\x00"));
        assert!(out.ends_with(id3::AUDIO));
        let fields = io.extract(&io.decode(&out).unwrap());
        assert_eq!(fields[0].key, "Album");
    }

    #[test]
    fn test_txxx_and_comment() {
        let io = Id3IO::new();
        let mut tree = io.decode(id3::AUDIO).unwrap();
        let custom = io.canonical_key("TXXX:mood").unwrap();
        let comment = io.canonical_key("comment").unwrap();
        io.apply_edits(
            &mut tree,
            &[
                FieldOp::Set { key: custom, value: "calm".into() },
                FieldOp::Set { key: comment, value: "nice".into() },
            ],
        )
        .unwrap();
        let fields = io.extract(&tree);
        assert!(fields.iter().any(|f| f.key == "TXXX:mood" && f.value == "calm"));
        assert!(fields.iter().any(|f| f.key == "Comment" && f.value == "nice"));
        io.apply_edits(&mut tree, &[FieldOp::Delete { key: "TXXX:mood".into() }])
            .unwrap();
        assert!(io.extract(&tree).iter().all(|f| f.key != "TXXX:mood"));
    }

    #[test]
    fn test_id3v1_view_and_strip() {
        let mut file = id3::mp3_with_frames(4, &[(b"TIT2", "Song")], 0);
        file.extend(id3::v1_tag("Old Song", "Band", 7));
        let io = Id3IO::new();
        let mut tree = io.decode(&file).unwrap();
        let fields = io.extract(&tree);
        let v1 = |key: &str, value: &str| {
            fields
                .iter()
                .any(|f| f.category == category::ID3V1 && f.key == key && f.value == value)
        };
        assert!(v1("Title", "Old Song"));
        assert!(v1("TrackNumber", "7"));

        io.strip(&mut tree, &StripMode::All).unwrap();
        let out = io.encode(&tree).unwrap();
        assert_eq!(out, id3::AUDIO);
    }

    #[test]
    fn test_v23_unsynchronisation_is_undone() {
        let file = id3::unsynchronised_v23_title("\u{ff}\u{e0}");
        let io = Id3IO::new();
        let tree = io.decode(&file).unwrap();
        assert_eq!(tree.header[5] & flags::UNSYNCHRONISATION, 0);
        let fields = io.extract(&tree);
        assert_eq!(fields[0].value, "\u{ff}\u{e0}");
    }

    #[test]
    fn test_canonical_keys() {
        let io = Id3IO::new();
        assert_eq!(io.canonical_key("AlbumArtist").as_deref(), Some("TPE2"));
        assert_eq!(io.canonical_key("tsse").as_deref(), Some("TSSE"));
        assert_eq!(io.canonical_key("APIC"), None);
        assert_eq!(io.canonical_key("Picture"), None);
    }
}
