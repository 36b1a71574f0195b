//! PNG container I/O implementation
//!
//! A PNG file is the 8-byte signature followed by chunks of
//! `length (4, BE) + type (4) + data + CRC (4)`, ending at IEND. The CRC covers type and
//! data and is recomputed for every chunk on encode.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    text,
    tiff::{self, TiffEditor},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::{BigEndian, ByteOrder};

// PNG signature
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

// Metadata chunk types
const TEXT: [u8; 4] = *b"tEXt";
const ITXT: [u8; 4] = *b"iTXt";
const ZTXT: [u8; 4] = *b"zTXt";
const EXIF: [u8; 4] = *b"eXIf";
const TIME: [u8; 4] = *b"tIME";
const IDAT: [u8; 4] = *b"IDAT";
const IEND: [u8; 4] = *b"IEND";

// XMP keyword in iTXt chunks
const XMP_KEYWORD: &str = "XML:com.adobe.xmp";

/// Longest keyword the format allows
const MAX_KEYWORD_LEN: usize = 79;

/// Calculate CRC32 for PNG chunk (type + data)
pub(crate) fn calculate_crc(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFF_u32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Chunk framing: length before the type, CRC after the data
struct ChunkFraming;

impl NodeFraming for ChunkFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Png
    }

    fn header_len(&self, _node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(8)
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let code = node.tag.fourcc().ok_or_else(|| {
            Error::malformed(
                ContainerKind::Png,
                node.tag.to_string(),
                node.offset,
                "chunk without a type",
            )
        })?;
        let len = u32::try_from(body_len)
            .ok()
            .filter(|l| *l <= i32::MAX as u32)
            .ok_or(Error::DataTooLarge {
                size: body_len as usize,
                max: i32::MAX as usize,
            })?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(code);
        Ok(())
    }

    fn trailer_len(&self, _node: &ContainerNode, _body_len: u64) -> u64 {
        4
    }

    fn write_trailer(
        &self,
        _node: &ContainerNode,
        _body_len: u64,
        out: &mut Vec<u8>,
        frame_start: usize,
    ) -> Result<()> {
        let crc = calculate_crc(&out[frame_start + 4..]);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(())
    }
}

/// Decoded text chunk (tEXt, zTXt or iTXt)
#[derive(Debug, Clone)]
struct TextChunk {
    kind: [u8; 4],
    keyword: String,
    /// Decoded text; `None` when compressed
    text: Option<String>,
    language: String,
    translated: String,
    compressed_len: usize,
}

impl TextChunk {
    fn parse(kind: [u8; 4], payload: &[u8]) -> Option<Self> {
        let mut cursor = ByteCursor::new(payload);
        let keyword = text::latin1(cursor.read_nul_terminated());
        let mut chunk = TextChunk {
            kind,
            keyword,
            text: None,
            language: String::new(),
            translated: String::new(),
            compressed_len: 0,
        };
        match &kind {
            b"tEXt" => chunk.text = Some(text::latin1(cursor.read_rest())),
            b"zTXt" => {
                cursor.read_u8().ok()?;
                chunk.compressed_len = cursor.remaining();
            }
            b"iTXt" => {
                let compressed = cursor.read_u8().ok()? != 0;
                cursor.read_u8().ok()?;
                chunk.language = String::from_utf8_lossy(cursor.read_nul_terminated()).into_owned();
                chunk.translated =
                    String::from_utf8_lossy(cursor.read_nul_terminated()).into_owned();
                if compressed {
                    chunk.compressed_len = cursor.remaining();
                } else {
                    chunk.text = Some(String::from_utf8_lossy(cursor.read_rest()).into_owned());
                }
            }
            _ => return None,
        }
        Some(chunk)
    }

    fn category(&self) -> &'static str {
        match &self.kind {
            b"tEXt" => category::PNG_TEXT,
            b"zTXt" => category::PNG_ZTXT,
            _ => category::PNG_ITXT,
        }
    }

    fn field(&self) -> MetadataField {
        let value = match &self.text {
            Some(text) => text.clone(),
            None => format!("<compressed, {} bytes>", self.compressed_len),
        };
        MetadataField::new(self.keyword.clone(), value, self.category())
            .editable(self.text.is_some())
    }
}

/// tEXt payload, or `None` when the value is not Latin-1
fn text_payload(keyword: &str, value: &str) -> Option<Vec<u8>> {
    let mut payload = text::to_latin1(keyword)?;
    payload.push(0);
    payload.extend(text::to_latin1(value)?);
    Some(payload)
}

fn itxt_payload(keyword: &str, language: &str, translated: &str, value: &str) -> Result<Vec<u8>> {
    let mut payload = text::to_latin1(keyword).ok_or_else(|| Error::UnsupportedField {
        key: keyword.to_string(),
        flavor: ContainerKind::Png,
    })?;
    payload.extend_from_slice(&[0, 0, 0]); // separator, uncompressed, method
    payload.extend_from_slice(language.as_bytes());
    payload.push(0);
    payload.extend_from_slice(translated.as_bytes());
    payload.push(0);
    payload.extend_from_slice(value.as_bytes());
    Ok(payload)
}

fn text_chunk(node: &ContainerNode) -> Option<TextChunk> {
    let code = node.tag.fourcc()?;
    matches!(code, b"tEXt" | b"iTXt" | b"zTXt")
        .then(|| TextChunk::parse(*code, &node.payload))
        .flatten()
}

fn is_xmp(chunk: &TextChunk) -> bool {
    chunk.kind == ITXT && chunk.keyword == XMP_KEYWORD
}

fn last_modified(payload: &[u8]) -> Option<String> {
    if payload.len() != 7 {
        return None;
    }
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        BigEndian::read_u16(&payload[0..2]),
        payload[2],
        payload[3],
        payload[4],
        payload[5],
        payload[6]
    ))
}

/// PNG container I/O implementation
pub struct PngIO;

impl PngIO {
    /// Create a new PNG I/O implementation
    pub fn new() -> Self {
        Self
    }

    fn set_text(&self, tree: &mut ContainerTree, keyword: &str, value: &str) -> Result<()> {
        let matches: Vec<usize> = tree
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                text_chunk(n)
                    .filter(|c| c.keyword.eq_ignore_ascii_case(keyword))
                    .map(|_| i)
            })
            .collect();

        let replacement = match matches.first().and_then(|&i| text_chunk(&tree.nodes[i])) {
            // An existing iTXt keeps its language and translated keyword
            Some(existing) if existing.kind == ITXT => ContainerNode::leaf(
                Tag::FourCc(ITXT),
                itxt_payload(&existing.keyword, &existing.language, &existing.translated, value)?,
            ),
            Some(existing) => self.new_text_chunk(&existing.keyword, value)?,
            None => self.new_text_chunk(keyword, value)?,
        };

        match matches.split_first() {
            Some((&first, rest)) => {
                tree.nodes[first] = replacement;
                for &i in rest.iter().rev() {
                    tree.nodes.remove(i);
                }
            }
            None => {
                let at = tree
                    .nodes
                    .iter()
                    .position(|n| n.is(&IDAT) || n.is(&IEND))
                    .unwrap_or(tree.nodes.len());
                log_debug!(at, "inserting text chunk for {}", keyword);
                tree.nodes.insert(at, replacement);
            }
        }
        Ok(())
    }

    /// tEXt when the value is Latin-1, iTXt otherwise
    fn new_text_chunk(&self, keyword: &str, value: &str) -> Result<ContainerNode> {
        Ok(match text_payload(keyword, value) {
            Some(payload) => ContainerNode::leaf(Tag::FourCc(TEXT), payload),
            None => ContainerNode::leaf(Tag::FourCc(ITXT), itxt_payload(keyword, "", "", value)?),
        })
    }
}

impl Default for PngIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for PngIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Png
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Png]
    }

    fn extensions() -> &'static [&'static str] {
        &["png"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/png"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        // PNG signature: 89 50 4E 47 0D 0A 1A 0A
        header.starts_with(PNG_SIGNATURE).then_some(ContainerKind::Png)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: &["<any tEXt/iTXt keyword>"],
            notes: "text chunks are inserted before the first IDAT; CRCs are recomputed",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Png,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Png, PNG_SIGNATURE.to_vec());
        let mut cursor = ByteCursor::new(data);
        cursor.skip(PNG_SIGNATURE.len())?;

        while !cursor.at_end() {
            let offset = cursor.absolute_position();
            let chunk = (|| -> Result<ContainerNode> {
                let len = cursor.read_u32::<BigEndian>()?;
                let framed = cursor.peek_bytes(4 + len as usize)?;
                let code: [u8; 4] = cursor.read_array()?;
                let payload = cursor.read_bytes(len as usize)?;
                let crc = cursor.read_u32::<BigEndian>()?;
                if crc != calculate_crc(framed) {
                    log_warn!(
                        offset,
                        "CRC mismatch in {} chunk, will be rewritten",
                        text::latin1(&code)
                    );
                }
                let mut node = ContainerNode::leaf(Tag::FourCc(code), payload.to_vec());
                node.declared_length = VarInt::new(len as u64, 4);
                node.offset = offset;
                Ok(node)
            })();
            match chunk {
                Ok(node) => {
                    let end = node.is(&IEND);
                    tree.nodes.push(node);
                    if end {
                        tree.trailer = cursor.read_rest().to_vec();
                        break;
                    }
                }
                Err(e) => {
                    tree.record_issue(format!("chunk at offset {}", offset), &e);
                    break;
                }
            }
        }
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&ChunkFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        tree.nodes
            .iter()
            .position(|n| [TEXT, ITXT, ZTXT, EXIF].iter().any(|c| n.is(c)))
            .map(|i| vec![i])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Png
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        for node in &tree.nodes {
            if let Some(chunk) = text_chunk(node) {
                if is_xmp(&chunk) {
                    if let Some(packet) = &chunk.text {
                        fields.extend(crate::xmp_fields(packet.as_bytes()));
                    }
                } else {
                    fields.push(chunk.field());
                }
            } else if node.is(&EXIF) {
                fields.extend(tiff::parse_fields(&node.payload));
            } else if node.is(&TIME) {
                if let Some(value) = last_modified(&node.payload) {
                    fields.push(MetadataField::new("LastModified", value, category::PNG_TIME));
                }
            }
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        let valid = !key.is_empty()
            && key.len() <= MAX_KEYWORD_LEN
            && !key.eq_ignore_ascii_case(XMP_KEYWORD)
            && text::to_latin1(key).map(|b| !b.contains(&0)).unwrap_or(false);
        valid.then(|| key.to_string())
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        for op in ops {
            match op {
                FieldOp::Set { key, value } => self.set_text(tree, key, value)?,
                FieldOp::Delete { key } => tree.nodes.retain(|n| {
                    !text_chunk(n)
                        .map(|c| !is_xmp(&c) && c.keyword.eq_ignore_ascii_case(key))
                        .unwrap_or(false)
                }),
            }
        }
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        match mode {
            StripMode::All => {
                tree.nodes
                    .retain(|n| ![TEXT, ITXT, ZTXT, EXIF, TIME].iter().any(|c| n.is(c)));
            }
            StripMode::GpsOnly => {
                for node in tree.nodes.iter_mut().filter(|n| n.is(&EXIF)) {
                    let blob = std::mem::take(&mut node.payload);
                    let mut editor = TiffEditor::new(ContainerKind::Png, blob)?;
                    editor.remove_gps()?;
                    node.payload = editor.into_bytes();
                }
            }
            StripMode::Keep(_) => {
                let mut kept = Vec::with_capacity(tree.nodes.len());
                for mut node in std::mem::take(&mut tree.nodes) {
                    let keep = if let Some(chunk) = text_chunk(&node) {
                        if is_xmp(&chunk) {
                            mode.keeps_group(&[category::XMP])
                        } else {
                            mode.keeps(&chunk.field())
                        }
                    } else if node.is(&EXIF) {
                        let blob = std::mem::take(&mut node.payload);
                        match tiff::retain_fields(ContainerKind::Png, blob, |f| mode.keeps(f))? {
                            Some(blob) => {
                                node.payload = blob;
                                true
                            }
                            None => false,
                        }
                    } else if node.is(&TIME) {
                        mode.keeps_key("LastModified") || mode.keeps_group(&[category::PNG_TIME])
                    } else {
                        true
                    };
                    if keep {
                        kept.push(node);
                    }
                }
                tree.nodes = kept;
            }
        }
        Ok(())
    }
}
