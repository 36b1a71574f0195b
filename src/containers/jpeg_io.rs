//! JPEG container I/O implementation
//!
//! The tree holds the marker segments between SOI and the start of scan. The SOS segment
//! is the last node; the entropy-coded data after it (and everything up to and past EOI)
//! is the tree trailer and is copied through untouched.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    iptc::{self, PHOTOSHOP_SIGNATURE},
    node::{ContainerNode, Tag, VarInt},
    tiff::{self, TiffEditor},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::BigEndian;

// JPEG markers
const SOI: u8 = 0xD8; // Start of Image
const EOI: u8 = 0xD9; // End of Image
const SOS: u8 = 0xDA; // Start of Scan (image data follows)
const APP0: u8 = 0xE0; // JFIF
const APP1: u8 = 0xE1; // XMP / EXIF
const APP12: u8 = 0xEC; // Ducky / picture info
const APP13: u8 = 0xED; // Photoshop IRB / IPTC
const COM: u8 = 0xFE; // Comment
const TEM: u8 = 0x01;

// Special markers without length
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const XMP_EXTENDED_SIGNATURE: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const MAX_MARKER_SIZE: usize = 65533; // Max payload of one marker segment

const COMMENT_KEY: &str = "Comment";

const EDITABLE_FIELDS: &[&str] = &[
    "ImageDescription",
    "Make",
    "Model",
    "Software",
    "Artist",
    "Copyright",
    COMMENT_KEY,
];

fn is_standalone(marker: u8) -> bool {
    matches!(marker, SOI | EOI | TEM | RST0..=RST7)
}

fn is_exif(node: &ContainerNode) -> bool {
    node.tag == Tag::Marker(APP1) && node.payload.starts_with(EXIF_SIGNATURE)
}

fn is_xmp(node: &ContainerNode) -> bool {
    node.tag == Tag::Marker(APP1)
        && (node.payload.starts_with(XMP_SIGNATURE)
            || node.payload.starts_with(XMP_EXTENDED_SIGNATURE))
}

fn is_iptc(node: &ContainerNode) -> bool {
    node.tag == Tag::Marker(APP13) && node.payload.starts_with(PHOTOSHOP_SIGNATURE)
}

fn is_comment(node: &ContainerNode) -> bool {
    node.tag == Tag::Marker(COM)
}

/// `FF <marker> [length]`; fill bytes are unframed padding
struct SegmentFraming;

impl NodeFraming for SegmentFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Jpeg
    }

    fn header_len(&self, node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(match node.tag {
            Tag::Padding => 0,
            Tag::Marker(m) if is_standalone(m) => 2,
            _ => 4,
        })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let marker = match node.tag {
            Tag::Padding => return Ok(()),
            Tag::Marker(m) => m,
            other => {
                return Err(Error::malformed(
                    ContainerKind::Jpeg,
                    other.to_string(),
                    node.offset,
                    "not a marker segment",
                ))
            }
        };
        out.extend_from_slice(&[0xFF, marker]);
        if is_standalone(marker) {
            return Ok(());
        }
        if body_len as usize > MAX_MARKER_SIZE {
            return Err(Error::DataTooLarge {
                size: body_len as usize,
                max: MAX_MARKER_SIZE,
            });
        }
        out.extend_from_slice(&((body_len + 2) as u16).to_be_bytes());
        Ok(())
    }
}

/// JPEG container I/O implementation
pub struct JpegIO;

impl JpegIO {
    /// Create a new JPEG I/O implementation
    pub fn new() -> Self {
        Self
    }

    fn read_segments(&self, data: &[u8], tree: &mut ContainerTree) -> Result<()> {
        let mut cursor = ByteCursor::new(data);
        cursor.skip(2)?;

        while !cursor.at_end() {
            let start = cursor.position();
            match self.read_segment(&mut cursor, tree) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tree.record_issue("marker segment", &e);
                    cursor.set_position(start)?;
                    break;
                }
            }
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(())
    }

    /// Read one segment; false once the scan data begins
    fn read_segment(&self, cursor: &mut ByteCursor, tree: &mut ContainerTree) -> Result<bool> {
        let offset = cursor.absolute_position();
        if cursor.peek_u8()? != 0xFF {
            return Err(Error::malformed(
                ContainerKind::Jpeg,
                "marker",
                offset,
                format!("expected 0xFF, found 0x{:02X}", cursor.peek_u8()?),
            ));
        }

        // Any 0xFF beyond the one that starts the marker is fill
        let mut fill = 0;
        while cursor.peek_bytes(fill + 2)?[fill + 1] == 0xFF {
            fill += 1;
        }
        if fill > 0 {
            tree.nodes.push(ContainerNode::leaf(Tag::Padding, cursor.read_bytes(fill)?.to_vec()));
        }

        let offset = cursor.absolute_position();
        cursor.skip(1)?;
        let marker = cursor.read_u8()?;
        let mut node = ContainerNode::leaf(Tag::Marker(marker), Vec::new());
        node.offset = offset;

        if is_standalone(marker) {
            tree.nodes.push(node);
            return Ok(marker != EOI);
        }

        let len = cursor.read_u16::<BigEndian>()? as usize;
        if len < 2 {
            return Err(Error::malformed(
                ContainerKind::Jpeg,
                Tag::Marker(marker).to_string(),
                offset,
                format!("segment length {} is shorter than its own field", len),
            ));
        }
        node.declared_length = VarInt::new(len as u64, 2);
        node.payload = cursor.read_bytes(len - 2)?.to_vec();
        tree.nodes.push(node);
        Ok(marker != SOS)
    }

    /// Index where a new APP1 goes: after a leading APP0, otherwise right after SOI
    fn app1_position(tree: &ContainerTree) -> usize {
        tree.nodes
            .iter()
            .position(|n| !matches!(n.tag, Tag::Marker(APP0) | Tag::Padding))
            .unwrap_or(tree.nodes.len())
    }

    /// Index where a new COM goes: before the first segment that is not APPn
    fn comment_position(tree: &ContainerTree) -> usize {
        tree.nodes
            .iter()
            .position(|n| !matches!(n.tag, Tag::Marker(0xE0..=0xEF) | Tag::Padding))
            .unwrap_or(tree.nodes.len())
    }

    fn edit_exif(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let index = match tree.nodes.iter().position(is_exif) {
            Some(i) => i,
            None if ops.iter().any(|op| matches!(op, FieldOp::Set { .. })) => {
                let at = Self::app1_position(tree);
                log_debug!(at, "synthesizing APP1 Exif segment");
                let mut payload = EXIF_SIGNATURE.to_vec();
                payload.extend(TiffEditor::empty(ContainerKind::Jpeg).into_bytes());
                tree.nodes.insert(at, ContainerNode::leaf(Tag::Marker(APP1), payload));
                at
            }
            None => return Ok(()),
        };

        let node = &mut tree.nodes[index];
        let blob = node.payload.split_off(EXIF_SIGNATURE.len());
        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob)?;
        for op in ops {
            let (tag, _) = tiff::editable_tag(op.key()).ok_or_else(|| Error::UnsupportedField {
                key: op.key().to_string(),
                flavor: ContainerKind::Jpeg,
            })?;
            match op {
                FieldOp::Set { value, .. } => editor.set_ascii(tag, value)?,
                FieldOp::Delete { .. } => {
                    editor.remove(tag)?;
                }
            }
        }
        node.payload.extend(editor.into_bytes());
        Ok(())
    }

    fn edit_comment(&self, tree: &mut ContainerTree, op: &FieldOp) {
        match op {
            FieldOp::Set { value, .. } => {
                let mut seen = false;
                tree.nodes.retain_mut(|n| {
                    if !is_comment(n) {
                        return true;
                    }
                    if seen {
                        return false;
                    }
                    seen = true;
                    n.payload = value.as_bytes().to_vec();
                    true
                });
                if !seen {
                    let at = Self::comment_position(tree);
                    let comment = ContainerNode::leaf(Tag::Marker(COM), value.as_bytes().to_vec());
                    tree.nodes.insert(at, comment);
                }
            }
            FieldOp::Delete { .. } => tree.nodes.retain(|n| !is_comment(n)),
        }
    }

    fn strip_gps(&self, node: &mut ContainerNode) -> Result<()> {
        let blob = node.payload.split_off(EXIF_SIGNATURE.len());
        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob)?;
        if editor.remove_gps()? {
            log_debug!("cleared GPS IFD");
        }
        node.payload.extend(editor.into_bytes());
        Ok(())
    }

    /// Field-level clearing of an Exif segment; `false` means drop it entirely
    fn keep_exif(&self, node: &mut ContainerNode, mode: &StripMode) -> Result<bool> {
        let blob = node.payload.split_off(EXIF_SIGNATURE.len());
        match tiff::retain_fields(ContainerKind::Jpeg, blob, |f| mode.keeps(f))? {
            Some(blob) => {
                node.payload.extend(blob);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for JpegIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for JpegIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Jpeg
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Jpeg]
    }

    fn extensions() -> &'static [&'static str] {
        &["jpg", "jpeg", "jpe", "jfif"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/jpeg", "image/jpg"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        // JPEG magic bytes: FF D8 FF
        if header.len() >= 3 && header[0] == 0xFF && header[1] == SOI && header[2] == 0xFF {
            Some(ContainerKind::Jpeg)
        } else {
            None
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: EDITABLE_FIELDS,
            notes: "EXIF IFD0 text tags and COM; XMP and IPTC are view and strip only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Jpeg,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Jpeg, data[..2].to_vec());
        self.read_segments(data, &mut tree)?;
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&SegmentFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        tree.nodes
            .iter()
            .position(|n| is_exif(n) || is_xmp(n) || is_iptc(n) || is_comment(n))
            .map(|i| vec![i])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Jpeg
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        for node in &tree.nodes {
            if is_exif(node) {
                fields.extend(tiff::parse_fields(&node.payload[EXIF_SIGNATURE.len()..]));
            } else if node.tag == Tag::Marker(APP1) && node.payload.starts_with(XMP_SIGNATURE) {
                fields.extend(crate::xmp_fields(&node.payload[XMP_SIGNATURE.len()..]));
            } else if is_iptc(node) {
                fields.extend(iptc::parse_fields(&node.payload[PHOTOSHOP_SIGNATURE.len()..]));
            } else if is_comment(node) {
                fields.push(
                    MetadataField::new(
                        COMMENT_KEY,
                        String::from_utf8_lossy(&node.payload).trim_end_matches('\0'),
                        category::JPEG_COMMENT,
                    )
                    .editable(true),
                );
            }
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if key.eq_ignore_ascii_case(COMMENT_KEY) {
            return Some(COMMENT_KEY.to_string());
        }
        tiff::editable_tag(key).map(|(_, name)| name.to_string())
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let (comment, exif): (Vec<&FieldOp>, Vec<&FieldOp>) =
            ops.iter().partition(|op| op.key() == COMMENT_KEY);
        for op in comment {
            self.edit_comment(tree, op);
        }
        if !exif.is_empty() {
            let exif: Vec<FieldOp> = exif.into_iter().cloned().collect();
            self.edit_exif(tree, &exif)?;
        }
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        match mode {
            StripMode::All => tree.nodes.retain(|n| {
                !(is_exif(n)
                    || is_xmp(n)
                    || is_iptc(n)
                    || is_comment(n)
                    || n.tag == Tag::Marker(APP12)
                    || n.tag == Tag::Marker(APP13))
            }),
            StripMode::GpsOnly => {
                for node in tree.nodes.iter_mut().filter(|n| is_exif(n)) {
                    self.strip_gps(node)?;
                }
            }
            StripMode::Keep(_) => {
                let mut kept = Vec::with_capacity(tree.nodes.len());
                for mut node in std::mem::take(&mut tree.nodes) {
                    let keep = if is_exif(&node) {
                        self.keep_exif(&mut node, mode)?
                    } else if is_xmp(&node) {
                        let packet = node.payload.get(XMP_SIGNATURE.len()..).unwrap_or(&[]);
                        mode.keeps_group(&[category::XMP])
                            || crate::xmp_fields(packet).iter().any(|f| mode.keeps(f))
                    } else if is_iptc(&node) {
                        mode.keeps_group(&[category::IPTC])
                            || iptc::parse_fields(&node.payload[PHOTOSHOP_SIGNATURE.len()..])
                                .iter()
                                .any(|f| mode.keeps(f))
                    } else if is_comment(&node) {
                        mode.keeps_key(COMMENT_KEY)
                            || mode.keeps_group(&[category::JPEG_COMMENT, "COM"])
                    } else if matches!(node.tag, Tag::Marker(APP12 | APP13)) {
                        mode.keeps_group(&["APP12", "APP13"])
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
