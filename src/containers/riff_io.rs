//! RIFF container I/O implementation
//!
//! Supports WAV, AVI and WebP (`RIFF`, little-endian sizes) and AIFF (`FORM`, the
//! big-endian IFF ancestor with the same chunk grammar).
//!
//! The whole file is one top-level chunk whose auxiliary header is the 4-byte form type.
//! `LIST` chunks nest the same way, with the list type as auxiliary header. Chunk data
//! of odd length is followed by one pad byte that is not counted in the size.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    text,
    tiff::{self, TiffEditor},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath, MAX_DEPTH},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

const RIFF: [u8; 4] = *b"RIFF";
const FORM: [u8; 4] = *b"FORM";
const LIST: [u8; 4] = *b"LIST";
const INFO: &[u8] = b"INFO";
const FMT: [u8; 4] = *b"fmt ";
const ID3_LOWER: [u8; 4] = *b"id3 ";
const ID3_UPPER: [u8; 4] = *b"ID3 ";

// WebP chunks
const VP8X: [u8; 4] = *b"VP8X";
const WEBP_EXIF: [u8; 4] = *b"EXIF";
const WEBP_XMP: [u8; 4] = *b"XMP ";
const VP8X_EXIF_FLAG: u8 = 0x08;
const VP8X_XMP_FLAG: u8 = 0x04;

// AIFF chunks
const AIFF_COMM: [u8; 4] = *b"COMM";
const AIFF_TEXT: &[([u8; 4], &str)] = &[
    (*b"NAME", "Title"),
    (*b"AUTH", "Author"),
    (*b"(c) ", "Copyright"),
    (*b"ANNO", "Annotation"),
];

/// LIST/INFO ids and their canonical names
const INFO_NAMES: &[([u8; 4], &str)] = &[
    (*b"IARL", "ArchivalLocation"),
    (*b"IART", "Artist"),
    (*b"ICMS", "Commissioned"),
    (*b"ICMT", "Comment"),
    (*b"ICOP", "Copyright"),
    (*b"ICRD", "DateCreated"),
    (*b"ICRP", "Cropped"),
    (*b"IDIM", "Dimensions"),
    (*b"IDPI", "DotsPerInch"),
    (*b"IENG", "Engineer"),
    (*b"IGNR", "Genre"),
    (*b"IKEY", "Keywords"),
    (*b"ILGT", "Lightness"),
    (*b"IMED", "Medium"),
    (*b"INAM", "Title"),
    (*b"IPLT", "NumberOfColors"),
    (*b"IPRD", "Product"),
    (*b"ISBJ", "Subject"),
    (*b"ISFT", "Software"),
    (*b"ISHP", "Sharpness"),
    (*b"ISRC", "Source"),
    (*b"ISRF", "SourceForm"),
    (*b"ITCH", "Technician"),
];

const EDITABLE_FIELDS: &[&str] = &[
    "Title", "Artist", "Comment", "Copyright", "DateCreated", "Genre", "Keywords",
    "Software", "Subject", "Engineer", "Technician", "Product", "Source",
];

fn info_name(id: &[u8; 4]) -> String {
    INFO_NAMES
        .iter()
        .find(|(i, _)| i == id)
        .map(|(_, n)| n.to_string())
        .unwrap_or_else(|| text::latin1(id))
}

fn string_value(payload: &[u8]) -> String {
    text::clean(text::until_nul(payload))
}

/// Chunk framing in either byte order
struct ChunkFraming {
    big_endian: bool,
}

impl NodeFraming for ChunkFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Riff
    }

    fn header_len(&self, node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(if node.tag == Tag::Padding { 0 } else { 8 })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        if node.tag == Tag::Padding {
            return Ok(());
        }
        let code = node.tag.fourcc().ok_or_else(|| {
            Error::malformed(
                ContainerKind::Riff,
                node.tag.to_string(),
                node.offset,
                "chunk without an id",
            )
        })?;
        let size = u32::try_from(body_len).map_err(|_| Error::DataTooLarge {
            size: body_len as usize,
            max: u32::MAX as usize,
        })?;
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(code);
        if self.big_endian {
            BigEndian::write_u32(&mut header[4..8], size);
        } else {
            LittleEndian::write_u32(&mut header[4..8], size);
        }
        out.extend_from_slice(&header);
        Ok(())
    }

    fn trailer_len(&self, node: &ContainerNode, body_len: u64) -> u64 {
        if node.tag == Tag::Padding || node.is_last {
            0
        } else {
            body_len % 2
        }
    }

    fn write_trailer(
        &self,
        node: &ContainerNode,
        body_len: u64,
        out: &mut Vec<u8>,
        _frame_start: usize,
    ) -> Result<()> {
        if self.trailer_len(node, body_len) == 1 {
            out.push(0);
        }
        Ok(())
    }
}

/// Only a chunk that still ends its parent may go without a pad byte
fn settle_unpadded(nodes: &mut [ContainerNode]) {
    let count = nodes.len();
    for (i, node) in nodes.iter_mut().enumerate() {
        if i + 1 != count {
            node.is_last = false;
        }
        settle_unpadded(&mut node.children);
    }
}

/// RIFF container I/O
pub struct RiffIO;

impl RiffIO {
    pub fn new() -> Self {
        Self
    }

    fn read_chunks(
        &self,
        cursor: &mut ByteCursor,
        big_endian: bool,
        depth: usize,
        tree: &mut ContainerTree,
    ) -> Vec<ContainerNode> {
        let mut nodes = Vec::new();
        // A lone trailing byte is padding some writers leave behind
        while cursor.remaining() >= 8 {
            match self.read_chunk(cursor, big_endian, depth, tree) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    tree.record_issue(format!("chunk at depth {}", depth), &e);
                    break;
                }
            }
        }
        nodes
    }

    fn read_chunk(
        &self,
        cursor: &mut ByteCursor,
        big_endian: bool,
        depth: usize,
        tree: &mut ContainerTree,
    ) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let code: [u8; 4] = cursor.read_array()?;
        let size = if big_endian {
            cursor.read_u32::<BigEndian>()?
        } else {
            cursor.read_u32::<LittleEndian>()?
        } as usize;
        let mut body = cursor.sub_cursor(size)?;
        let mut node = ContainerNode::leaf(Tag::FourCc(code), Vec::new());
        if size % 2 == 1 {
            if cursor.at_end() {
                node.is_last = true;
            } else {
                cursor.skip(1)?;
            }
        }
        node.declared_length = VarInt::new(size as u64, 4);
        node.offset = offset;
        if code == LIST && size >= 4 && depth < MAX_DEPTH {
            node.aux_header = body.read_bytes(4)?.to_vec();
            node.children = self.read_chunks(&mut body, big_endian, depth + 1, tree);
        } else {
            node.payload = body.read_rest().to_vec();
        }
        Ok(node)
    }

    fn form(&self, tree: &ContainerTree) -> Option<(bool, [u8; 4])> {
        let root = tree.nodes.first()?;
        let big_endian = root.is(&FORM);
        let form_type = <[u8; 4]>::try_from(root.aux_header.as_slice()).ok()?;
        Some((big_endian, form_type))
    }

    fn is_webp(&self, tree: &ContainerTree) -> bool {
        matches!(self.form(tree), Some((false, t)) if &t == b"WEBP")
    }

    fn info_list_index(root: &ContainerNode) -> Option<usize> {
        root.children
            .iter()
            .position(|c| c.is(&LIST) && c.aux_header == INFO)
    }

    fn info_fields(list: &ContainerNode, out: &mut Vec<MetadataField>) {
        for item in &list.children {
            let Some(id) = item.tag.fourcc() else { continue };
            let value = string_value(&item.payload);
            if !value.is_empty() {
                let field = MetadataField::new(info_name(id), value, category::RIFF_INFO);
                out.push(field.editable(true));
            }
        }
    }

    fn fmt_fields(payload: &[u8], out: &mut Vec<MetadataField>) {
        if payload.len() < 16 {
            return;
        }
        let channels = LittleEndian::read_u16(&payload[2..4]);
        let sample_rate = LittleEndian::read_u32(&payload[4..8]);
        let bits = LittleEndian::read_u16(&payload[14..16]);
        let rate = format!("{} Hz", sample_rate);
        out.push(MetadataField::new("SampleRate", rate, category::WAV_HEADER));
        out.push(MetadataField::new("Channels", channels.to_string(), category::WAV_HEADER));
        out.push(MetadataField::new("BitsPerSample", bits.to_string(), category::WAV_HEADER));
    }

    /// Strip the `Exif\0\0` prefix some writers put in front of the TIFF header
    fn webp_tiff(payload: &[u8]) -> &[u8] {
        payload.strip_prefix(b"Exif\0\0".as_slice()).unwrap_or(payload)
    }

    fn set_info(list: &mut ContainerNode, id: [u8; 4], value: &str) {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        let mut seen = false;
        list.children.retain_mut(|item| {
            if !item.is(&id) {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            item.payload = payload.clone();
            true
        });
        if !seen {
            list.children.push(ContainerNode::leaf(Tag::FourCc(id), payload));
        }
    }
}

impl Default for RiffIO {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of an ID3v2 tag carried inside a chunk
fn id3_fields(bytes: &[u8]) -> Vec<MetadataField> {
    #[cfg(feature = "id3")]
    {
        let io = super::id3_io::Id3IO::new();
        match io.decode(bytes) {
            Ok(tree) => io.extract(&tree),
            Err(e) => {
                log_warn!("unreadable embedded ID3 chunk: {}", e);
                Vec::new()
            }
        }
    }
    #[cfg(not(feature = "id3"))]
    {
        vec![MetadataField::new("ID3", format!("<{} bytes>", bytes.len()), category::ID3V2)]
    }
}

impl ContainerIO for RiffIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Riff
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Wav, MediaType::Avi, MediaType::WebP, MediaType::Aiff]
    }

    fn extensions() -> &'static [&'static str] {
        &["wav", "avi", "webp", "aif", "aiff", "aifc"]
    }

    fn mime_types() -> &'static [&'static str] {
        &[
            "audio/wav",
            "audio/x-wav",
            "video/x-msvideo",
            "image/webp",
            "audio/aiff",
            "audio/x-aiff",
        ]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        if header.len() < 12 {
            return None;
        }
        match (&header[0..4], &header[8..12]) {
            (b"RIFF", b"WAVE" | b"AVI " | b"WEBP") => Some(ContainerKind::Riff),
            (b"FORM", b"AIFF" | b"AIFC") => Some(ContainerKind::Riff),
            _ => None,
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: EDITABLE_FIELDS,
            notes: "LIST/INFO in WAV and AVI; WebP EXIF/XMP and AIFF text are view and strip only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Riff,
            });
        }
        let big_endian = data.starts_with(&FORM);
        let mut tree = ContainerTree::new(ContainerKind::Riff, Vec::new());
        let mut cursor = ByteCursor::new(data);

        let code: [u8; 4] = cursor.read_array()?;
        let size = if big_endian {
            cursor.read_u32::<BigEndian>()?
        } else {
            cursor.read_u32::<LittleEndian>()?
        } as usize;
        let form_type = cursor.read_bytes(4)?.to_vec();
        let body_len = size.saturating_sub(4);
        if body_len > cursor.remaining() {
            tree.record_issue(
                text::latin1(&code),
                &Error::Truncated {
                    offset: 8,
                    needed: size as u64,
                    available: (cursor.remaining() + 4) as u64,
                },
            );
        }
        let mut body = cursor.sub_cursor(body_len.min(cursor.remaining()))?;

        let mut root = ContainerNode::container(Tag::FourCc(code), form_type, Vec::new());
        root.declared_length = VarInt::new(size as u64, 4);
        root.children = self.read_chunks(&mut body, big_endian, 1, &mut tree);
        // Bytes too short to be a chunk stay where they were, unframed
        if !body.at_end() {
            root.children
                .push(ContainerNode::leaf(Tag::Padding, body.read_rest().to_vec()));
        }
        if size % 2 == 1 {
            if cursor.at_end() {
                root.is_last = true;
            } else {
                cursor.skip(1)?;
            }
        }
        tree.nodes.push(root);
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        let big_endian = tree.nodes.first().map(|n| n.is(&FORM)).unwrap_or(false);
        linearize_tree(&ChunkFraming { big_endian }, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        let root = tree.nodes.first()?;
        let index = Self::info_list_index(root).or_else(|| {
            root.children.iter().position(|c| {
                c.is(&ID3_LOWER) || c.is(&ID3_UPPER) || c.is(&WEBP_EXIF) || c.is(&WEBP_XMP)
            })
        })?;
        Some(vec![0, index])
    }

    fn media_type(&self, tree: &ContainerTree) -> MediaType {
        match self.form(tree) {
            Some((true, _)) => MediaType::Aiff,
            Some((false, t)) if &t == b"AVI " => MediaType::Avi,
            Some((false, t)) if &t == b"WEBP" => MediaType::WebP,
            _ => MediaType::Wav,
        }
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        let Some(root) = tree.nodes.first() else {
            return fields;
        };
        let big_endian = root.is(&FORM);

        for chunk in &root.children {
            let Some(code) = chunk.tag.fourcc() else { continue };
            match code {
                b"LIST" if chunk.aux_header == INFO => Self::info_fields(chunk, &mut fields),
                b"fmt " if !big_endian => Self::fmt_fields(&chunk.payload, &mut fields),
                b"id3 " | b"ID3 " => fields.extend(id3_fields(&chunk.payload)),
                b"EXIF" => fields.extend(tiff::parse_fields(Self::webp_tiff(&chunk.payload))),
                b"XMP " => fields.extend(crate::xmp_fields(&chunk.payload)),
                b"VP8 " | b"VP8L" | b"VP8X" => fields.push(MetadataField::new(
                    "Encoding",
                    text::latin1(code).trim(),
                    category::WEBP,
                )),
                b"COMM" if big_endian && chunk.payload.len() >= 8 => {
                    let channels = BigEndian::read_u16(&chunk.payload[0..2]);
                    let bits = BigEndian::read_u16(&chunk.payload[6..8]);
                    let channels = channels.to_string();
                    fields.push(MetadataField::new("Channels", channels, category::AIFF));
                    let bits = bits.to_string();
                    fields.push(MetadataField::new("BitsPerSample", bits, category::AIFF));
                }
                _ if big_endian => {
                    if let Some((_, name)) = AIFF_TEXT.iter().find(|(id, _)| id == code) {
                        let value = string_value(&chunk.payload);
                        fields.push(MetadataField::new(*name, value, category::AIFF));
                    }
                }
                _ => {}
            }
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if let Some((id, _)) = INFO_NAMES.iter().find(|(_, n)| n.eq_ignore_ascii_case(key)) {
            return Some(text::latin1(id));
        }
        // Raw INFO ids: four uppercase ASCII characters starting with 'I'
        let bytes = key.as_bytes();
        let info_id = bytes.len() == 4
            && bytes[0] == b'I'
            && bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        info_id.then(|| key.to_string())
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        match self.form(tree) {
            Some((false, t)) if &t == b"WAVE" || &t == b"AVI " => {}
            _ => {
                return Err(Error::NoEditableLocation {
                    flavor: ContainerKind::Riff,
                    supported: ContainerKind::editable(),
                })
            }
        }
        let root = tree
            .nodes
            .first_mut()
            .ok_or_else(|| Error::malformed(ContainerKind::Riff, "RIFF", 0, "empty file"))?;

        let index = match Self::info_list_index(root) {
            Some(i) => i,
            None if ops.iter().any(|op| matches!(op, FieldOp::Set { .. })) => {
                log_debug!("appending LIST/INFO chunk");
                root.children
                    .push(ContainerNode::container(Tag::FourCc(LIST), INFO.to_vec(), Vec::new()));
                root.children.len() - 1
            }
            None => return Ok(()),
        };
        let list = &mut root.children[index];
        for op in ops {
            let id = text::to_latin1(op.key())
                .and_then(|b| <[u8; 4]>::try_from(b).ok())
                .ok_or_else(|| Error::UnsupportedField {
                    key: op.key().to_string(),
                    flavor: ContainerKind::Riff,
                })?;
            match op {
                FieldOp::Set { value, .. } => Self::set_info(list, id, value),
                FieldOp::Delete { .. } => list.children.retain(|c| !c.is(&id)),
            }
        }
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        let big_endian = self.form(tree).map(|(be, _)| be).unwrap_or(false);
        let Some(root) = tree.nodes.first_mut() else {
            return Ok(());
        };

        match mode {
            StripMode::All => root.children.retain(|c| {
                let info = c.is(&LIST) && c.aux_header == INFO;
                let id3 = c.is(&ID3_LOWER) || c.is(&ID3_UPPER);
                let webp = c.is(&WEBP_EXIF) || c.is(&WEBP_XMP);
                let aiff = big_endian && AIFF_TEXT.iter().any(|(id, _)| c.is(id));
                !(info || id3 || webp || aiff)
            }),
            StripMode::GpsOnly => {
                for chunk in root.children.iter_mut().filter(|c| c.is(&WEBP_EXIF)) {
                    let prefix_len = chunk.payload.len() - Self::webp_tiff(&chunk.payload).len();
                    let blob = chunk.payload.split_off(prefix_len);
                    let mut editor = TiffEditor::new(ContainerKind::Riff, blob)?;
                    editor.remove_gps()?;
                    chunk.payload.extend(editor.into_bytes());
                }
            }
            StripMode::Keep(_) => {
                if let Some(i) = Self::info_list_index(root) {
                    root.children[i].children.retain(|item| {
                        item.tag.fourcc().is_some_and(|id| {
                            mode.keeps_key(&info_name(id))
                                || mode.keeps_key(&text::latin1(id))
                                || mode.keeps_group(&[category::RIFF_INFO, "INFO"])
                        })
                    });
                }
                for chunk in root.children.iter_mut().filter(|c| c.is(&WEBP_EXIF)) {
                    let prefix_len = chunk.payload.len() - Self::webp_tiff(&chunk.payload).len();
                    let blob = chunk.payload.split_off(prefix_len);
                    match tiff::retain_fields(ContainerKind::Riff, blob, |f| mode.keeps(f))? {
                        Some(blob) => chunk.payload.extend(blob),
                        // An empty payload marks the chunk for removal below
                        None => chunk.payload.clear(),
                    }
                }
                root.children.retain(|c| {
                    if c.is(&ID3_LOWER) || c.is(&ID3_UPPER) {
                        return mode.keeps_group(&[category::ID3V2, "ID3"]);
                    }
                    if c.is(&WEBP_EXIF) {
                        return !c.payload.is_empty();
                    }
                    if c.is(&WEBP_XMP) {
                        return mode.keeps_group(&[category::XMP]);
                    }
                    if big_endian {
                        if let Some((_, name)) = AIFF_TEXT.iter().find(|(id, _)| c.is(id)) {
                            return mode.keeps_key(name) || mode.keeps_group(&[category::AIFF]);
                        }
                    }
                    true
                });
            }
        }
        Ok(())
    }

    fn finalize(&self, tree: &mut ContainerTree) -> Result<()> {
        settle_unpadded(&mut tree.nodes);
        if !self.is_webp(tree) {
            return Ok(());
        }
        let Some(root) = tree.nodes.first_mut() else {
            return Ok(());
        };
        let has_exif = root.child(&WEBP_EXIF).is_some();
        let has_xmp = root.child(&WEBP_XMP).is_some();
        if let Some(vp8x) = root.child_mut(&VP8X) {
            if let Some(flags) = vp8x.payload.first_mut() {
                let mut updated = *flags & !(VP8X_EXIF_FLAG | VP8X_XMP_FLAG);
                if has_exif {
                    updated |= VP8X_EXIF_FLAG;
                }
                if has_xmp {
                    updated |= VP8X_XMP_FLAG;
                }
                if updated != *flags {
                    log_debug!(from = *flags, to = updated, "updating VP8X feature flags");
                    *flags = updated;
                }
            }
        }
        Ok(())
    }
}
