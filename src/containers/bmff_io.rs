//! BMFF (ISO Base Media File Format) container I/O implementation
//!
//! Supports multiple media types: MP4, M4A, MOV, HEIF, AVIF
//!
//! Metadata lives in the iTunes-style `moov/udta/meta/ilst` item list. Every item is a
//! small container whose `data` child holds a type indicator, a locale and the value;
//! freeform `----` items add `mean` and `name` children.
//!
//! Reference: ISO/IEC 14496-12:2022

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::{ByteCursor, PatchCursor},
    error::{Error, Result},
    field::{category, is_printable, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    text,
    tree::{linearize_tree, measure, ContainerTree, NodeFraming, NodePath, MAX_DEPTH},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::{BigEndian, ByteOrder};

// BMFF constants
const HEADER_SIZE: u64 = 8; // 4 byte size + 4 byte type
const HEADER_SIZE_LARGE: u64 = 16; // 4 byte size + 4 byte type + 8 byte large size

const XMP_UUID: [u8; 16] = [
    0xbe, 0x7a, 0xcf, 0xcb, 0x97, 0xa9, 0x42, 0xe8, 0x9c, 0x71, 0x99, 0x94, 0x91, 0xe3, 0xaf, 0xac,
];

const FTYP: [u8; 4] = *b"ftyp";
const MOOV: [u8; 4] = *b"moov";
const MVHD: [u8; 4] = *b"mvhd";
const UDTA: [u8; 4] = *b"udta";
const META: [u8; 4] = *b"meta";
const HDLR: [u8; 4] = *b"hdlr";
const ILST: [u8; 4] = *b"ilst";
const DATA: [u8; 4] = *b"data";
const MEAN: [u8; 4] = *b"mean";
const NAME: [u8; 4] = *b"name";
const FREEFORM: [u8; 4] = *b"----";
const UUID: [u8; 4] = *b"uuid";
const STCO: [u8; 4] = *b"stco";
const CO64: [u8; 4] = *b"co64";
const LOCATION: [u8; 4] = [0xA9, b'x', b'y', b'z'];

/// Boxes whose payload is a sequence of child boxes
const CONTAINER_TYPES: &[[u8; 4]] = &[
    *b"moov", *b"trak", *b"mdia", *b"minf", *b"stbl", *b"udta", *b"edts", *b"dinf",
    *b"mvex", *b"moof", *b"traf", *b"mfra", *b"meta", *b"ilst",
];

/// Freeform items are written under this reverse-DNS namespace unless the key names one
const ITUNES_MEAN: &str = "com.apple.iTunes";

/// How an ilst value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomValue {
    /// UTF-8 text, editable
    Text,
    /// Big-endian integer
    Integer,
    /// track/disc "n of m" pair
    Pair,
    /// Cover art
    Image,
}

/// iTunes item atom, friendly name, value shape, extra aliases accepted by edit
const ITUNES_ATOMS: &[([u8; 4], &str, AtomValue, &[&str])] = &[
    ([0xA9, b'n', b'a', b'm'], "Title", AtomValue::Text, &["name"]),
    ([0xA9, b'A', b'R', b'T'], "Artist", AtomValue::Text, &[]),
    ([0xA9, b'a', b'l', b'b'], "Album", AtomValue::Text, &[]),
    ([0xA9, b'd', b'a', b'y'], "Year", AtomValue::Text, &["date"]),
    ([0xA9, b'g', b'e', b'n'], "Genre", AtomValue::Text, &[]),
    ([0xA9, b'c', b'm', b't'], "Comment", AtomValue::Text, &[]),
    ([0xA9, b'l', b'y', b'r'], "Lyrics", AtomValue::Text, &[]),
    ([0xA9, b't', b'o', b'o'], "EncodingTool", AtomValue::Text, &["encoder"]),
    ([0xA9, b'w', b'r', b't'], "Composer", AtomValue::Text, &[]),
    ([0xA9, b'g', b'r', b'p'], "Grouping", AtomValue::Text, &[]),
    (*b"aART", "AlbumArtist", AtomValue::Text, &[]),
    (*b"cprt", "Copyright", AtomValue::Text, &[]),
    (*b"desc", "Description", AtomValue::Text, &[]),
    (*b"ldes", "LongDescription", AtomValue::Text, &[]),
    (*b"tvsh", "TVShowName", AtomValue::Text, &["tvshow"]),
    (*b"tven", "TVEpisodeName", AtomValue::Text, &[]),
    (*b"purl", "PodcastURL", AtomValue::Text, &[]),
    (*b"catg", "Category", AtomValue::Text, &[]),
    (*b"keyw", "Keywords", AtomValue::Text, &[]),
    (*b"tvsn", "TVSeason", AtomValue::Integer, &[]),
    (*b"tves", "TVEpisode", AtomValue::Integer, &[]),
    (*b"cpil", "Compilation", AtomValue::Integer, &[]),
    (*b"tmpo", "BPM", AtomValue::Integer, &[]),
    (*b"hdvd", "HDVideo", AtomValue::Integer, &[]),
    (*b"stik", "MediaKind", AtomValue::Integer, &[]),
    (*b"rtng", "ContentRating", AtomValue::Integer, &[]),
    (*b"gnre", "GenreID", AtomValue::Integer, &[]),
    (*b"trkn", "TrackNumber", AtomValue::Pair, &[]),
    (*b"disk", "DiscNumber", AtomValue::Pair, &[]),
    (*b"covr", "CoverArt", AtomValue::Image, &[]),
];

const EDITABLE_FIELDS: &[&str] = &[
    "Title", "Artist", "Album", "Year", "Genre", "Comment", "Lyrics", "EncodingTool",
    "Composer", "Grouping", "AlbumArtist", "Copyright", "Description", "LongDescription",
    "TVShowName", "TVEpisodeName", "PodcastURL", "Category", "Keywords", "mean:name",
];

type AtomEntry = ([u8; 4], &'static str, AtomValue, &'static [&'static str]);

fn atom_entry(code: &[u8; 4]) -> Option<&'static AtomEntry> {
    ITUNES_ATOMS.iter().find(|(c, ..)| c == code)
}

fn fourcc_string(code: &[u8; 4]) -> String {
    text::latin1(code)
}

/// Box framing: 32-bit size, or `1` plus a 64-bit size, or `0` for "to end of file"
struct BoxFraming;

impl BoxFraming {
    fn is_large(node: &ContainerNode, body_len: u64) -> bool {
        node.declared_length.width == 8 || body_len + HEADER_SIZE > u32::MAX as u64
    }

    fn runs_to_end(node: &ContainerNode) -> bool {
        node.declared_length == VarInt::new(0, 4)
    }
}

impl NodeFraming for BoxFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Bmff
    }

    fn header_len(&self, node: &ContainerNode, body_len: u64) -> Result<u64> {
        Ok(if Self::is_large(node, body_len) {
            HEADER_SIZE_LARGE
        } else {
            HEADER_SIZE
        })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let code = node.tag.fourcc().ok_or_else(|| {
            Error::malformed(
                ContainerKind::Bmff,
                node.tag.to_string(),
                node.offset,
                "box without a four-character code",
            )
        })?;
        let mut header = [0u8; 16];
        if Self::is_large(node, body_len) {
            BigEndian::write_u32(&mut header[0..4], 1);
            header[4..8].copy_from_slice(code);
            BigEndian::write_u64(&mut header[8..16], body_len + HEADER_SIZE_LARGE);
            out.extend_from_slice(&header);
        } else {
            let size = if Self::runs_to_end(node) {
                0
            } else {
                (body_len + HEADER_SIZE) as u32
            };
            BigEndian::write_u32(&mut header[0..4], size);
            header[4..8].copy_from_slice(code);
            out.extend_from_slice(&header[..8]);
        }
        Ok(())
    }
}

/// BMFF container I/O
pub struct BmffIO;

impl BmffIO {
    pub fn new() -> Self {
        Self
    }

    /// Decode boxes until the cursor is exhausted or a header is unreadable
    fn read_boxes(
        &self,
        cursor: &mut ByteCursor,
        depth: usize,
        parent: Option<[u8; 4]>,
        tree: &mut ContainerTree,
    ) -> Vec<ContainerNode> {
        let mut nodes = Vec::new();
        while !cursor.at_end() {
            match self.read_box(cursor, depth, parent, tree) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    tree.record_issue(format!("box at depth {}", depth), &e);
                    break;
                }
            }
        }
        nodes
    }

    fn read_box(
        &self,
        cursor: &mut ByteCursor,
        depth: usize,
        parent: Option<[u8; 4]>,
        tree: &mut ContainerTree,
    ) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let size = cursor.read_u32::<BigEndian>()?;
        let code: [u8; 4] = cursor.read_array()?;

        let (total, header_len, declared) = match size {
            1 => {
                let large = cursor.read_u64::<BigEndian>()?;
                (large, HEADER_SIZE_LARGE, VarInt::new(large, 8))
            }
            0 => (
                HEADER_SIZE + cursor.remaining() as u64,
                HEADER_SIZE,
                VarInt::new(0, 4),
            ),
            n => (n as u64, HEADER_SIZE, VarInt::new(n as u64, 4)),
        };
        if total < header_len {
            return Err(Error::malformed(
                ContainerKind::Bmff,
                fourcc_string(&code),
                offset,
                format!("declared size {} is smaller than its header", total),
            ));
        }
        let mut body = cursor.sub_cursor((total - header_len) as usize)?;

        let mut node = ContainerNode::leaf(Tag::FourCc(code), Vec::new());
        node.declared_length = declared;
        node.offset = offset;

        // Items directly under ilst are containers of data/mean/name atoms
        let is_container = CONTAINER_TYPES.contains(&code) || parent == Some(ILST);
        if is_container && depth < MAX_DEPTH {
            if code == META {
                // ISO meta is a full box; QuickTime meta has no version/flags
                let quicktime_style = body.peek_bytes(8).map(|b| &b[4..8] == HDLR).unwrap_or(false);
                if !quicktime_style {
                    node.aux_header = body.read_bytes(4)?.to_vec();
                }
            }
            node.children = self.read_boxes(&mut body, depth + 1, Some(code), tree);
        } else {
            node.payload = body.read_rest().to_vec();
        }
        Ok(node)
    }

    fn ilst<'a>(&self, tree: &'a ContainerTree) -> Option<&'a ContainerNode> {
        tree.top(&MOOV)?.descend(&[&UDTA, &META, &ILST])
    }

    /// Make sure moov/udta/meta/ilst exists and return it
    fn ensure_ilst<'a>(&self, tree: &'a mut ContainerTree) -> Result<&'a mut ContainerNode> {
        let moov = tree.top_mut(&MOOV).ok_or_else(|| {
            Error::malformed(ContainerKind::Bmff, "moov", 0, "no movie box to hold metadata")
        })?;
        if moov.child(&UDTA).is_none() {
            log_debug!("synthesizing moov/udta");
            moov.children
                .push(ContainerNode::container(Tag::FourCc(UDTA), Vec::new(), Vec::new()));
        }
        let udta = moov
            .child_mut(&UDTA)
            .ok_or_else(|| {
                Error::malformed(ContainerKind::Bmff, "udta", 0, "missing after insert")
            })?;
        if udta.child(&META).is_none() {
            log_debug!("synthesizing udta/meta with mdir handler");
            udta.children.push(ContainerNode::container(
                Tag::FourCc(META),
                vec![0; 4],
                vec![ContainerNode::leaf(Tag::FourCc(HDLR), metadata_handler())],
            ));
        }
        let meta = udta
            .child_mut(&META)
            .ok_or_else(|| {
                Error::malformed(ContainerKind::Bmff, "meta", 0, "missing after insert")
            })?;
        if meta.child(&ILST).is_none() {
            meta.children
                .push(ContainerNode::container(Tag::FourCc(ILST), Vec::new(), Vec::new()));
        }
        meta.child_mut(&ILST)
            .ok_or_else(|| Error::malformed(ContainerKind::Bmff, "ilst", 0, "missing after insert"))
    }

    fn extract_item(&self, item: &ContainerNode, out: &mut Vec<MetadataField>) {
        let Some(code) = item.tag.fourcc() else { return };

        if *code == FREEFORM {
            let mean = item.child(&MEAN).map(|n| freeform_string(&n.payload));
            let name = item.child(&NAME).map(|n| freeform_string(&n.payload));
            for data in item.children.iter().filter(|c| c.is(&DATA)) {
                let key = format!(
                    "{}:{}",
                    mean.clone().unwrap_or_default(),
                    name.clone().unwrap_or_default()
                );
                let value = render_data(None, &data.payload);
                out.push(
                    MetadataField::new(key, value, category::ITUNES_CUSTOM)
                        .editable(true)
                        .with_raw(&data.payload),
                );
            }
            return;
        }

        let entry = atom_entry(code);
        for data in item.children.iter().filter(|c| c.is(&DATA)) {
            let value = render_data(entry.map(|e| e.2), &data.payload);
            match entry {
                Some((_, name, shape, _)) => out.push(
                    MetadataField::new(*name, value, category::ITUNES)
                        .editable(*shape == AtomValue::Text),
                ),
                None => {
                    // Unknown atoms are surfaced only when they read as text
                    if data.payload.len() > 8 && is_printable(&data.payload[8..]) {
                        out.push(MetadataField::new(fourcc_string(code), value, category::ITUNES));
                    }
                }
            }
        }
    }

    fn set_item(&self, ilst: &mut ContainerNode, key: &str, value: &str) -> Result<()> {
        if let Some((mean, name)) = key.split_once(':') {
            let existing = ilst
                .children
                .iter_mut()
                .find(|item| item.is(&FREEFORM) && freeform_matches(item, mean, name));
            match existing {
                Some(item) => replace_data(item, value),
                None => ilst.children.push(ContainerNode::container(
                    Tag::FourCc(FREEFORM),
                    Vec::new(),
                    vec![
                        ContainerNode::leaf(Tag::FourCc(MEAN), freeform_payload(mean)),
                        ContainerNode::leaf(Tag::FourCc(NAME), freeform_payload(name)),
                        ContainerNode::leaf(Tag::FourCc(DATA), text_data(value)),
                    ],
                )),
            }
            return Ok(());
        }

        let code = key_to_code(key)?;
        let mut seen = false;
        ilst.children.retain_mut(|item| {
            if !item.is(&code) {
                return true;
            }
            if seen {
                // Drop duplicates so a set leaves exactly one value
                return false;
            }
            seen = true;
            replace_data(item, value);
            true
        });
        if !seen {
            ilst.children.push(ContainerNode::container(
                Tag::FourCc(code),
                Vec::new(),
                vec![ContainerNode::leaf(Tag::FourCc(DATA), text_data(value))],
            ));
        }
        Ok(())
    }

    fn delete_item(&self, ilst: &mut ContainerNode, key: &str) -> Result<()> {
        if let Some((mean, name)) = key.split_once(':') {
            ilst.children
                .retain(|item| !(item.is(&FREEFORM) && freeform_matches(item, mean, name)));
        } else {
            let code = key_to_code(key)?;
            ilst.children.retain(|item| !item.is(&code));
        }
        Ok(())
    }

    /// Old/new placement of every top-level box that came from the source file
    fn top_level_moves(&self, tree: &ContainerTree) -> Result<Vec<Move>> {
        let mut moves = Vec::new();
        let mut new_start = tree.header.len() as u64;
        for node in &tree.nodes {
            let size = measure(&BoxFraming, node)?;
            if !node.declared_length.is_synthesized() {
                let old_end = if BoxFraming::runs_to_end(node) {
                    u64::MAX
                } else {
                    node.offset + node.declared_length.value
                };
                moves.push(Move {
                    old_start: node.offset,
                    old_end,
                    new_start,
                });
            }
            new_start += size;
        }
        Ok(moves)
    }
}

impl Default for BmffIO {
    fn default() -> Self {
        Self::new()
    }
}

/// A top-level box that may have shifted
#[derive(Debug, Clone, Copy)]
struct Move {
    old_start: u64,
    old_end: u64,
    new_start: u64,
}

impl Move {
    fn remap(moves: &[Move], offset: u64) -> Option<u64> {
        moves
            .iter()
            .find(|m| offset >= m.old_start && offset < m.old_end)
            .map(|m| offset - m.old_start + m.new_start)
    }
}

/// Rewrite every chunk offset table in a subtree
fn remap_chunk_offsets(node: &mut ContainerNode, moves: &[Move]) -> Result<()> {
    if node.is(&STCO) || node.is(&CO64) {
        let wide = node.is(&CO64);
        let node_offset = node.offset;
        let mut cursor = PatchCursor::new(&mut node.payload);
        cursor.set_position(4)?;
        let count = cursor.read_u32::<BigEndian>()?;
        for _ in 0..count {
            let at = cursor.position();
            let old = if wide {
                cursor.read_u64::<BigEndian>()?
            } else {
                cursor.read_u32::<BigEndian>()? as u64
            };
            let Some(new) = Move::remap(moves, old) else { continue };
            if new == old {
                continue;
            }
            cursor.set_position(at)?;
            if wide {
                cursor.write_u64::<BigEndian>(new)?;
            } else {
                let new32 = u32::try_from(new).map_err(|_| {
                    Error::malformed(
                        ContainerKind::Bmff,
                        "stco",
                        node_offset,
                        "chunk offset no longer fits in 32 bits",
                    )
                })?;
                cursor.write_u32::<BigEndian>(new32)?;
            }
        }
        return Ok(());
    }
    for child in &mut node.children {
        remap_chunk_offsets(child, moves)?;
    }
    Ok(())
}

/// Handler box declaring an iTunes metadata list
fn metadata_handler() -> Vec<u8> {
    let mut hdlr = Vec::with_capacity(25);
    hdlr.extend_from_slice(&[0u8; 4]); // version/flags
    hdlr.extend_from_slice(&[0u8; 4]); // pre_defined
    hdlr.extend_from_slice(b"mdir"); // handler_type
    hdlr.extend_from_slice(b"appl"); // manufacturer
    hdlr.extend_from_slice(&[0u8; 8]); // reserved
    hdlr.push(0); // empty name
    hdlr
}

/// `data` atom payload for UTF-8 text: type indicator 1, locale 0
fn text_data(value: &str) -> Vec<u8> {
    let mut payload = vec![0, 0, 0, 1, 0, 0, 0, 0];
    payload.extend_from_slice(value.as_bytes());
    payload
}

/// Swap in a new text value, keeping the item's locale
fn replace_data(item: &mut ContainerNode, value: &str) {
    item.children.retain({
        let mut first = true;
        move |c| {
            if !c.is(&DATA) {
                return true;
            }
            std::mem::replace(&mut first, false)
        }
    });
    match item.child_mut(&DATA) {
        Some(data) => {
            let locale = data.payload.get(4..8).map(|l| l.to_vec()).unwrap_or_else(|| vec![0; 4]);
            let mut payload = vec![0, 0, 0, 1];
            payload.extend_from_slice(&locale);
            payload.extend_from_slice(value.as_bytes());
            data.payload = payload;
        }
        None => item
            .children
            .push(ContainerNode::leaf(Tag::FourCc(DATA), text_data(value))),
    }
}

fn freeform_string(payload: &[u8]) -> String {
    text::clean(payload.get(4..).unwrap_or_default())
}

fn freeform_payload(s: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(s.as_bytes());
    payload
}

fn freeform_matches(item: &ContainerNode, mean: &str, name: &str) -> bool {
    let m = item.child(&MEAN).map(|n| freeform_string(&n.payload));
    let n = item.child(&NAME).map(|n| freeform_string(&n.payload));
    m.as_deref() == Some(mean) && n.map(|n| n.eq_ignore_ascii_case(name)).unwrap_or(false)
}

fn key_to_code(key: &str) -> Result<[u8; 4]> {
    text::to_latin1(key)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .ok_or_else(|| Error::UnsupportedField {
            key: key.to_string(),
            flavor: ContainerKind::Bmff,
        })
}

/// Render a `data` atom payload (type indicator + locale + value)
fn render_data(shape: Option<AtomValue>, payload: &[u8]) -> String {
    if payload.len() < 8 {
        return String::new();
    }
    let type_indicator = BigEndian::read_u32(&payload[0..4]) & 0x00FF_FFFF;
    let value = &payload[8..];
    match (type_indicator, shape) {
        (1, _) => String::from_utf8_lossy(value).into_owned(),
        (2, _) => text::utf16be(value),
        (13, _) => format!("<image/jpeg, {} bytes>", value.len()),
        (14, _) => format!("<image/png, {} bytes>", value.len()),
        (27, _) => format!("<image/bmp, {} bytes>", value.len()),
        (_, Some(AtomValue::Pair)) if value.len() >= 6 => {
            let n = BigEndian::read_u16(&value[2..4]);
            let of = BigEndian::read_u16(&value[4..6]);
            if of > 0 {
                format!("{}/{}", n, of)
            } else {
                n.to_string()
            }
        }
        (0 | 21 | 22, _) if matches!(value.len(), 1 | 2 | 4 | 8) => {
            let n = match value.len() {
                1 => value[0] as i64,
                2 => BigEndian::read_i16(value) as i64,
                4 => BigEndian::read_i32(value) as i64,
                _ => BigEndian::read_i64(value),
            };
            n.to_string()
        }
        _ if is_printable(value) => String::from_utf8_lossy(value).into_owned(),
        _ => format!("<{} bytes>", value.len()),
    }
}

/// Movie duration in seconds from an mvhd payload
fn mvhd_duration(payload: &[u8]) -> Option<f64> {
    let mut cursor = ByteCursor::new(payload);
    let version = cursor.read_u8().ok()?;
    cursor.skip(3).ok()?;
    let (timescale, duration) = if version == 1 {
        cursor.skip(16).ok()?;
        (cursor.read_u32::<BigEndian>().ok()?, cursor.read_u64::<BigEndian>().ok()?)
    } else {
        cursor.skip(8).ok()?;
        (
            cursor.read_u32::<BigEndian>().ok()?,
            cursor.read_u32::<BigEndian>().ok()? as u64,
        )
    };
    (timescale > 0).then(|| duration as f64 / timescale as f64)
}

/// QuickTime user-data string: 16-bit length, 16-bit language, text
fn quicktime_string(payload: &[u8]) -> String {
    let mut cursor = ByteCursor::new(payload);
    match (cursor.read_u16::<BigEndian>(), cursor.skip(2)) {
        (Ok(len), Ok(())) => {
            let len = (len as usize).min(cursor.remaining());
            text::clean(cursor.read_bytes(len).unwrap_or_default())
        }
        _ => text::clean(payload),
    }
}

fn is_xmp_uuid(node: &ContainerNode) -> bool {
    node.is(&UUID) && node.payload.len() >= 16 && node.payload[..16] == XMP_UUID
}

impl ContainerIO for BmffIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Bmff
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[
            MediaType::Mp4,
            MediaType::M4a,
            MediaType::QuickTime,
            MediaType::Heif,
            MediaType::Avif,
        ]
    }

    fn extensions() -> &'static [&'static str] {
        &["mp4", "m4a", "m4v", "m4b", "mov", "heic", "heif", "avif", "3gp"]
    }

    fn mime_types() -> &'static [&'static str] {
        &[
            "video/mp4",
            "audio/mp4",
            "video/quicktime",
            "image/heif",
            "image/heic",
            "image/avif",
        ]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        if header.len() < 8 {
            return None;
        }
        match &header[4..8] {
            b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free" | b"skip" | b"pnot" => {
                Some(ContainerKind::Bmff)
            }
            _ => None,
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: EDITABLE_FIELDS,
            notes: "iTunes item list under moov/udta/meta/ilst; chunk offsets follow moved boxes",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Bmff,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Bmff, Vec::new());
        let mut cursor = ByteCursor::new(data);
        tree.nodes = self.read_boxes(&mut cursor, 0, None, &mut tree);
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&BoxFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        let moov = tree.top_index(&MOOV)?;
        let udta = tree.nodes[moov].child_index(&UDTA)?;
        let meta = tree.nodes[moov].children[udta].child_index(&META)?;
        let ilst = tree.nodes[moov].children[udta].children[meta].child_index(&ILST)?;
        Some(vec![moov, udta, meta, ilst])
    }

    fn media_type(&self, tree: &ContainerTree) -> MediaType {
        let brand = tree.top(&FTYP).and_then(|f| f.payload.get(0..4));
        match brand {
            Some(b"M4A " | b"M4B " | b"M4P ") => MediaType::M4a,
            Some(b"qt  ") => MediaType::QuickTime,
            Some(b"heic" | b"heix" | b"heim" | b"heis" | b"hevc" | b"mif1" | b"msf1") => {
                MediaType::Heif
            }
            Some(b"avif" | b"avis") => MediaType::Avif,
            Some(_) => MediaType::Mp4,
            None => MediaType::QuickTime,
        }
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();

        if let Some(brand) = tree.top(&FTYP).and_then(|f| f.payload.get(0..4)) {
            let brand = text::latin1(brand);
            fields.push(MetadataField::new("Brand", brand.trim(), category::MP4_CONTAINER));
        }
        if let Some(moov) = tree.top(&MOOV) {
            if let Some(secs) = moov.child(&MVHD).and_then(|m| mvhd_duration(&m.payload)) {
                let duration = format!("{:.3}", secs);
                fields.push(MetadataField::new("Duration", duration, category::MP4_CONTAINER));
            }
            if let Some(udta) = moov.child(&UDTA) {
                for atom in &udta.children {
                    if atom.is(&LOCATION) {
                        fields.push(MetadataField::new(
                            "Location",
                            quicktime_string(&atom.payload),
                            category::MP4_CONTAINER,
                        ));
                    }
                }
            }
        }
        if let Some(ilst) = self.ilst(tree) {
            for item in &ilst.children {
                self.extract_item(item, &mut fields);
            }
        }
        for node in tree.nodes.iter().filter(|n| is_xmp_uuid(n)) {
            fields.extend(crate::xmp_fields(&node.payload[16..]));
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if let Some((mean, name)) = key.split_once(':') {
            let mean = if mean.is_empty() { ITUNES_MEAN } else { mean };
            return (!name.is_empty()).then(|| format!("{}:{}", mean, name));
        }
        ITUNES_ATOMS
            .iter()
            .filter(|(_, _, shape, _)| *shape == AtomValue::Text)
            .find(|(code, name, _, aliases)| {
                name.eq_ignore_ascii_case(key)
                    || aliases.iter().any(|a| a.eq_ignore_ascii_case(key))
                    || fourcc_string(code) == key
            })
            .map(|(code, ..)| fourcc_string(code))
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let needs_list = ops.iter().any(|op| matches!(op, FieldOp::Set { .. }));
        if !needs_list && self.ilst(tree).is_none() {
            return Ok(());
        }
        let ilst = self.ensure_ilst(tree)?;
        for op in ops {
            match op {
                FieldOp::Set { key, value } => self.set_item(ilst, key, value)?,
                FieldOp::Delete { key } => self.delete_item(ilst, key)?,
            }
        }
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        let keep_xmp = mode.keeps_group(&["XMP"]) || *mode == StripMode::GpsOnly;
        if !keep_xmp {
            tree.nodes.retain(|n| !is_xmp_uuid(n));
        }

        let Some(moov) = tree.top_mut(&MOOV) else {
            return Ok(());
        };
        match mode {
            StripMode::All => {
                moov.children.retain(|c| !c.is(&UDTA) && !c.is(&META));
            }
            StripMode::GpsOnly => {
                if let Some(udta) = moov.child_mut(&UDTA) {
                    udta.children.retain(|c| !c.is(&LOCATION));
                    if let Some(ilst) = udta.descend_mut(&[&META, &ILST]) {
                        ilst.children.retain(|c| !c.is(&LOCATION));
                    }
                }
            }
            StripMode::Keep(_) => {
                if let Some(udta) = moov.child_mut(&UDTA) {
                    udta.children.retain(|c| {
                        c.is(&META) || (c.is(&LOCATION) && mode.keeps_key("Location"))
                    });
                    if let Some(ilst) = udta.descend_mut(&[&META, &ILST]) {
                        ilst.children.retain(|item| {
                            let mut fields = Vec::new();
                            self.extract_item(item, &mut fields);
                            let code = item.tag.fourcc().map(fourcc_string).unwrap_or_default();
                            mode.keeps_key(&code) || fields.iter().any(|f| mode.keeps(f))
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, tree: &mut ContainerTree) -> Result<()> {
        let moves = self.top_level_moves(tree)?;
        if moves.iter().all(|m| m.old_start == m.new_start) {
            return Ok(());
        }
        log_debug!(?moves, "remapping chunk offsets after top-level boxes moved");
        if let Some(moov) = tree.top_mut(&MOOV) {
            remap_chunk_offsets(moov, &moves)?;
        }
        // Record the new placement so a second pass is a no-op
        let mut pos = tree.header.len() as u64;
        for node in &mut tree.nodes {
            let size = measure(&BoxFraming, node)?;
            if !node.declared_length.is_synthesized() {
                node.offset = pos;
                if !BoxFraming::runs_to_end(node) {
                    node.declared_length.value = size;
                }
            }
            pos += size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::bmff;

    #[test]
    fn test_detect() {
        let file = bmff::file_with_title(Some("Old"), true);
        assert_eq!(BmffIO::detect(&file), Some(ContainerKind::Bmff));
        assert_eq!(BmffIO::detect(b"\x89PNG\r\n\x1a\n"), None);
    }

    #[test]
    fn test_round_trip_is_identical() {
        let file = bmff::file_with_title(Some("Old"), true);
        let io = BmffIO::new();
        let tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract_title_and_container_fields() {
        let file = bmff::file_with_title(Some("Old"), true);
        let io = BmffIO::new();
        let fields = io.extract(&io.decode(&file).unwrap());
        let title = fields.iter().find(|f| f.key == "Title").unwrap();
        assert_eq!(title.value, "Old");
        assert!(title.editable);
        assert_eq!(title.category, category::ITUNES);
        assert!(fields.iter().any(|f| f.key == "Brand" && f.value == "isom"));
        assert!(fields.iter().any(|f| f.key == "Duration" && f.value == "2.000"));
    }

    #[test]
    fn test_large_size_header_is_preserved() {
        // 16-byte header with size == 1
        let mut file = bmff::ftyp();
        file.extend_from_slice(&1u32.to_be_bytes());
        file.extend_from_slice(b"free");
        file.extend_from_slice(&20u64.to_be_bytes());
        file.extend_from_slice(b"abcd");
        let io = BmffIO::new();
        let tree = io.decode(&file).unwrap();
        assert_eq!(tree.nodes[1].declared_length, VarInt::new(20, 8));
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_size_zero_runs_to_end() {
        let mut file = bmff::ftyp();
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&[1, 2, 3, 4, 5]);
        let io = BmffIO::new();
        let tree = io.decode(&file).unwrap();
        assert_eq!(tree.nodes[1].payload, vec![1, 2, 3, 4, 5]);
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_canonical_keys() {
        let io = BmffIO::new();
        assert_eq!(io.canonical_key("title").as_deref(), Some("\u{a9}nam"));
        assert_eq!(io.canonical_key("ENCODER").as_deref(), Some("\u{a9}too"));
        assert_eq!(io.canonical_key("aART").as_deref(), Some("aART"));
        assert_eq!(
            io.canonical_key(":MOOD").as_deref(),
            Some("com.apple.iTunes:MOOD")
        );
        // Integer atoms are not editable as text
        assert_eq!(io.canonical_key("BPM"), None);
        assert_eq!(io.canonical_key("nonsense"), None);
    }

    #[test]
    fn test_synthesizes_udta_meta_ilst() {
        let file = bmff::file_with_title(None, false);
        let io = BmffIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(io.metadata_location(&tree).is_none());
        io.apply_edits(
            &mut tree,
            &[FieldOp::Set {
                key: "\u{a9}nam".into(),
                value: "Fresh".into(),
            }],
        )
        .unwrap();
        let path = io.metadata_location(&tree).unwrap();
        assert_eq!(path.len(), 4);
        let meta = tree.node_at(&path[..3]).unwrap();
        assert!(meta.child(&HDLR).is_some());
        assert_eq!(meta.aux_header, vec![0; 4]);

        let out = io.encode(&tree).unwrap();
        let fields = io.extract(&io.decode(&out).unwrap());
        assert!(fields.iter().any(|f| f.key == "Title" && f.value == "Fresh"));
    }

    #[test]
    fn test_freeform_set_and_delete() {
        let file = bmff::file_with_title(Some("Old"), true);
        let io = BmffIO::new();
        let mut tree = io.decode(&file).unwrap();
        let key = io.canonical_key("com.apple.iTunes:MOOD").unwrap();
        io.apply_edits(&mut tree, &[FieldOp::Set { key: key.clone(), value: "calm".into() }])
            .unwrap();
        let fields = io.extract(&tree);
        let mood = fields.iter().find(|f| f.key == "com.apple.iTunes:MOOD").unwrap();
        assert_eq!(mood.value, "calm");
        assert_eq!(mood.category, category::ITUNES_CUSTOM);

        io.apply_edits(&mut tree, &[FieldOp::Delete { key }]).unwrap();
        assert!(!io.extract(&tree).iter().any(|f| f.key.ends_with("MOOD")));
    }

    #[test]
    fn test_chunk_offsets_follow_mdat() {
        let file = bmff::file_with_title(Some("Old"), true);
        let io = BmffIO::new();
        let mut tree = io.decode(&file).unwrap();
        let mdat_offset = tree.nodes[2].offset;

        io.apply_edits(
            &mut tree,
            &[FieldOp::Set {
                key: "\u{a9}nam".into(),
                value: "A much longer title".into(),
            }],
        )
        .unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();

        let decoded = io.decode(&out).unwrap();
        let new_mdat = decoded.nodes[2].offset;
        assert_eq!(new_mdat, mdat_offset + 16);
        let stco = decoded.nodes[1]
            .descend(&[b"trak", b"mdia", b"minf", b"stbl", b"stco"])
            .unwrap();
        // Entry points 8 bytes into mdat, i.e. at its payload
        assert_eq!(BigEndian::read_u32(&stco.payload[8..12]) as u64, new_mdat + 8);

        // A second finalize does not shift again
        io.finalize(&mut tree).unwrap();
        assert_eq!(io.encode(&tree).unwrap(), out);
    }

    #[test]
    fn test_strip_all_removes_udta_only() {
        let file = bmff::file_with_title(Some("Old"), true);
        let io = BmffIO::new();
        let mut tree = io.decode(&file).unwrap();
        let mdat_before = tree.nodes[2].clone();
        io.strip(&mut tree, &StripMode::All).unwrap();
        assert!(tree.top(&MOOV).unwrap().child(&UDTA).is_none());
        assert!(tree.top(&MOOV).unwrap().child(&MVHD).is_some());
        assert_eq!(tree.nodes[2].payload, mdat_before.payload);
    }

    #[test]
    fn test_truncated_child_is_recorded() {
        let mut file = bmff::file_with_title(Some("Old"), true);
        // Claim a larger moov than the file holds
        let moov_at = bmff::ftyp().len();
        let size = BigEndian::read_u32(&file[moov_at..moov_at + 4]);
        BigEndian::write_u32(&mut file[moov_at..moov_at + 4], size + 1000);
        let tree = BmffIO::new().decode(&file).unwrap();
        assert!(!tree.issues.is_empty());
        assert!(tree.ensure_intact().is_err());
    }
}
