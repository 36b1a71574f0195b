//! EBML container I/O implementation (Matroska, WebM)
//!
//! Element ids keep their marker bits and are written back in their natural width; data
//! sizes remember the width they were read with. Only the masters that lead to metadata
//! (EBML header, Segment, Info, Tags and below) are decoded into children; clusters, cues
//! and tracks stay opaque leaves.
//!
//! Strip never changes the length of anything: metadata elements are overwritten by
//! `Void` elements of exactly the same size, so SeekHead and Cues offsets stay valid.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ebml_max, ContainerNode, Tag, VarInt},
    tree::{linearize_tree, measure, ContainerTree, NodeFraming, NodePath, MAX_DEPTH},
    updates::StripMode,
    MediaType,
};
use byteorder::{BigEndian, ByteOrder};

mod id {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const DATE_UTC: u32 = 0x4461;
    pub const TITLE: u32 = 0x7BA9;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;
    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const SIMPLE_TAG: u32 = 0x67C8;
    pub const TAG_NAME: u32 = 0x45A3;
    pub const TAG_STRING: u32 = 0x4487;
    pub const VOID: u32 = 0xEC;
}

/// Masters decoded into children; everything else is a leaf
const MASTERS: &[u32] = &[id::EBML, id::SEGMENT, id::INFO, id::TAGS, id::TAG, id::SIMPLE_TAG];

/// Seconds from the Unix epoch to 2001-01-01T00:00:00Z, the Matroska date origin
const MATROSKA_EPOCH: i64 = 978_307_200;

const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;

fn is_element(node: &ContainerNode, element: u32) -> bool {
    node.tag == Tag::Ebml(element)
}

fn id_width(element: u32) -> usize {
    match element {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Width of a vint from its first byte, `None` for a zero byte
fn vint_width(first: u8, max: u8) -> Option<u8> {
    let width = first.leading_zeros() as u8 + 1;
    (width <= max).then_some(width)
}

fn read_id(cursor: &mut ByteCursor) -> Result<u32> {
    let offset = cursor.absolute_position();
    let first = cursor.peek_u8()?;
    let width = vint_width(first, 4).ok_or_else(|| {
        Error::malformed(ContainerKind::Ebml, "element id", offset, "invalid id width")
    })?;
    let bytes = cursor.read_bytes(width as usize)?;
    Ok(bytes.iter().fold(0u32, |acc, &b| acc << 8 | b as u32))
}

fn read_size(cursor: &mut ByteCursor) -> Result<VarInt> {
    let offset = cursor.absolute_position();
    let first = cursor.peek_u8()?;
    let width = vint_width(first, 8).ok_or_else(|| {
        Error::malformed(ContainerKind::Ebml, "element size", offset, "invalid size width")
    })?;
    let bytes = cursor.read_bytes(width as usize)?;
    let value = bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64) & ebml_max(width);
    Ok(VarInt::new(value, width))
}

fn write_size(value: u64, width: u8, out: &mut Vec<u8>) {
    let marked = value | 1u64 << (7 * width as u32);
    out.extend_from_slice(&marked.to_be_bytes()[8 - width as usize..]);
}

/// Size width for a body: the source width while it still fits, else the smallest
fn size_width(node: &ContainerNode, body_len: u64) -> u8 {
    let declared = node.declared_length;
    let still_fits = !declared.is_synthesized() && body_len < ebml_max(declared.width);
    if declared.is_ebml_unknown() || still_fits {
        declared.width
    } else {
        VarInt::ebml_width_for(body_len)
    }
}

/// Id in its natural width plus a vint data size; unknown sizes stay all-ones
struct ElementFraming;

impl NodeFraming for ElementFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ebml
    }

    fn header_len(&self, node: &ContainerNode, body_len: u64) -> Result<u64> {
        Ok(match node.tag {
            Tag::Padding => 0,
            Tag::Ebml(element) => (id_width(element) + size_width(node, body_len) as usize) as u64,
            other => {
                return Err(Error::malformed(
                    ContainerKind::Ebml,
                    other.to_string(),
                    node.offset,
                    "not an element",
                ))
            }
        })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let Tag::Ebml(element) = node.tag else {
            return Ok(());
        };
        out.extend_from_slice(&element.to_be_bytes()[4 - id_width(element)..]);
        let width = size_width(node, body_len);
        if node.declared_length.is_ebml_unknown() {
            write_size(ebml_max(width), width, out);
        } else {
            write_size(body_len, width, out);
        }
        Ok(())
    }
}

/// A `Void` element occupying exactly `total` bytes
fn void_of_len(total: u64, offset: u64) -> ContainerNode {
    let width = (1..=8u8)
        .rev()
        .find(|&w| total > w as u64 && total - 1 - (w as u64) < ebml_max(w))
        .unwrap_or(1);
    let len = total.saturating_sub(1 + width as u64);
    let mut node = ContainerNode::leaf(Tag::Ebml(id::VOID), vec![0; len as usize]);
    node.declared_length = VarInt::new(len, width);
    node.offset = offset;
    node
}

fn void_out(node: &mut ContainerNode) -> Result<()> {
    let total = measure(&ElementFraming, node)?;
    log_debug!(element = %node.tag, total, "overwriting with Void");
    *node = void_of_len(total, node.offset);
    Ok(())
}

fn uint(payload: &[u8]) -> Option<u64> {
    (payload.len() <= 8).then(|| payload.iter().fold(0u64, |acc, &b| acc << 8 | b as u64))
}

fn float(payload: &[u8]) -> Option<f64> {
    match payload.len() {
        4 => Some(BigEndian::read_f32(payload) as f64),
        8 => Some(BigEndian::read_f64(payload)),
        _ => None,
    }
}

fn string(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim_end_matches('\0').to_string()
}

/// `YYYY-MM-DD HH:MM:SS UTC` from nanoseconds since 2001-01-01
fn format_date(payload: &[u8]) -> Option<String> {
    if payload.len() != 8 {
        return None;
    }
    let nanos = BigEndian::read_i64(payload);
    let secs = MATROSKA_EPOCH + nanos.div_euclid(1_000_000_000);
    let (days, rem) = (secs.div_euclid(86_400), secs.rem_euclid(86_400));
    let (y, m, d) = civil_from_days(days);
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        y,
        m,
        d,
        rem / 3600,
        rem / 60 % 60,
        rem % 60
    ))
}

/// Proleptic Gregorian date for a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// Name/value pairs of a SimpleTag, nested SimpleTags included
fn simple_tags(node: &ContainerNode, out: &mut Vec<MetadataField>) {
    let child_string = |element: u32| {
        node.children
            .iter()
            .find(|c| is_element(c, element))
            .map(|c| string(&c.payload))
    };
    let name = child_string(id::TAG_NAME);
    let value = child_string(id::TAG_STRING);
    if let Some(name) = name {
        out.push(MetadataField::new(name, value.unwrap_or_default(), category::MKV_TAGS));
    }
    for nested in node.children.iter().filter(|c| is_element(c, id::SIMPLE_TAG)) {
        simple_tags(nested, out);
    }
}

fn simple_tag_name(node: &ContainerNode) -> Option<String> {
    node.children.iter().find(|c| is_element(c, id::TAG_NAME)).map(|c| string(&c.payload))
}

/// EBML container I/O implementation
pub struct EbmlIO;

impl EbmlIO {
    pub fn new() -> Self {
        Self
    }

    fn read_elements(
        &self,
        cursor: &mut ByteCursor,
        depth: usize,
        tree: &mut ContainerTree,
    ) -> Vec<ContainerNode> {
        let mut nodes = Vec::new();
        while !cursor.at_end() {
            let start = cursor.position();
            match self.read_element(cursor, depth, tree) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    tree.record_issue("EBML element", &e);
                    let _ = cursor.set_position(start);
                    let offset = cursor.absolute_position();
                    let mut rest = ContainerNode::leaf(Tag::Padding, cursor.read_rest().to_vec());
                    rest.offset = offset;
                    nodes.push(rest);
                }
            }
        }
        nodes
    }

    fn read_element(
        &self,
        cursor: &mut ByteCursor,
        depth: usize,
        tree: &mut ContainerTree,
    ) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        if depth > MAX_DEPTH {
            return Err(Error::malformed(
                ContainerKind::Ebml,
                "EBML element",
                offset,
                format!("nesting deeper than {} levels", MAX_DEPTH),
            ));
        }
        let element = read_id(cursor)?;
        let size = read_size(cursor)?;
        // Unknown size runs to the end of the parent
        let len = if size.is_ebml_unknown() {
            cursor.remaining()
        } else {
            usize::try_from(size.value).unwrap_or(usize::MAX)
        };
        let mut body = cursor.sub_cursor(len)?;
        let mut node = if MASTERS.contains(&element) {
            let children = self.read_elements(&mut body, depth + 1, tree);
            ContainerNode::container(Tag::Ebml(element), Vec::new(), children)
        } else {
            ContainerNode::leaf(Tag::Ebml(element), body.read_rest().to_vec())
        };
        node.declared_length = size;
        node.offset = offset;
        Ok(node)
    }

    fn segment<'t>(&self, tree: &'t ContainerTree) -> Option<&'t ContainerNode> {
        tree.nodes.iter().find(|n| is_element(n, id::SEGMENT))
    }

    fn doc_type(&self, tree: &ContainerTree) -> Option<String> {
        let header = tree.nodes.iter().find(|n| is_element(n, id::EBML))?;
        header
            .children
            .iter()
            .find(|c| is_element(c, id::DOC_TYPE))
            .map(|c| string(&c.payload))
    }

    fn info_fields(info: &ContainerNode, fields: &mut Vec<MetadataField>) {
        let scale = info
            .children
            .iter()
            .find(|c| is_element(c, id::TIMESTAMP_SCALE))
            .and_then(|c| uint(&c.payload))
            .unwrap_or(DEFAULT_TIMESTAMP_SCALE);
        for child in &info.children {
            let Tag::Ebml(element) = child.tag else { continue };
            let field = match element {
                id::TITLE => Some(("Title", string(&child.payload))),
                id::MUXING_APP => Some(("MuxingApp", string(&child.payload))),
                id::WRITING_APP => Some(("WritingApp", string(&child.payload))),
                id::DATE_UTC => format_date(&child.payload).map(|d| ("DateUTC", d)),
                id::DURATION => float(&child.payload)
                    .map(|ticks| ("Duration", format!("{:.3}", ticks * scale as f64 / 1e9))),
                _ => None,
            };
            if let Some((key, value)) = field {
                fields.push(MetadataField::new(key, value, category::MKV_INFO));
            }
        }
    }
}

impl Default for EbmlIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for EbmlIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Ebml
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Matroska, MediaType::WebM]
    }

    fn extensions() -> &'static [&'static str] {
        &["mkv", "webm", "mka", "mk3d"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["video/x-matroska", "video/webm", "audio/x-matroska", "audio/webm"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        header.starts_with(&id::EBML.to_be_bytes()).then_some(ContainerKind::Ebml)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: false,
            can_strip: true,
            editable_fields: &[],
            notes: "view and strip only; strip overwrites Tags and Title with Void",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if !data.starts_with(&id::EBML.to_be_bytes()) {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Ebml,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Ebml, Vec::new());
        let mut cursor = ByteCursor::new(data);
        let nodes = self.read_elements(&mut cursor, 0, &mut tree);
        tree.nodes = nodes;
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&ElementFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        let i = tree.nodes.iter().position(|n| is_element(n, id::SEGMENT))?;
        let j = tree.nodes[i].children.iter().position(|c| is_element(c, id::TAGS))?;
        Some(vec![i, j])
    }

    fn media_type(&self, tree: &ContainerTree) -> MediaType {
        match self.doc_type(tree).as_deref() {
            Some("webm") => MediaType::WebM,
            _ => MediaType::Matroska,
        }
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        if let Some(header) = tree.nodes.iter().find(|n| is_element(n, id::EBML)) {
            for child in &header.children {
                if is_element(child, id::DOC_TYPE) {
                    let doc_type = string(&child.payload);
                    fields.push(MetadataField::new("DocType", doc_type, category::EBML_HEADER));
                } else if is_element(child, id::DOC_TYPE_VERSION) {
                    if let Some(v) = uint(&child.payload) {
                        fields.push(MetadataField::new(
                            "DocTypeVersion",
                            v.to_string(),
                            category::EBML_HEADER,
                        ));
                    }
                }
            }
        }
        let Some(segment) = self.segment(tree) else {
            return fields;
        };
        for child in &segment.children {
            if is_element(child, id::INFO) {
                Self::info_fields(child, &mut fields);
            } else if is_element(child, id::TAGS) {
                for tag in child.children.iter().filter(|t| is_element(t, id::TAG)) {
                    for simple in tag.children.iter().filter(|s| is_element(s, id::SIMPLE_TAG)) {
                        simple_tags(simple, &mut fields);
                    }
                }
            }
        }
        fields
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        let Some(segment) = tree.nodes.iter_mut().find(|n| is_element(n, id::SEGMENT)) else {
            return Ok(());
        };
        let keep_tags = mode.keeps_group(&[category::MKV_TAGS, "Tags"]);
        let keep_title = mode.keeps(&MetadataField::new("Title", "", category::MKV_INFO));
        for child in segment.children.iter_mut() {
            if is_element(child, id::INFO) && !keep_title {
                for title in child.children.iter_mut().filter(|c| is_element(c, id::TITLE)) {
                    void_out(title)?;
                }
            } else if is_element(child, id::TAGS) && !keep_tags {
                match mode {
                    StripMode::All => void_out(child)?,
                    _ => {
                        for tag in child.children.iter_mut().filter(|t| is_element(t, id::TAG)) {
                            let simples =
                                tag.children.iter_mut().filter(|s| is_element(s, id::SIMPLE_TAG));
                            for simple in simples {
                                let name = simple_tag_name(simple).unwrap_or_default();
                                let field = MetadataField::new(name, "", category::MKV_TAGS);
                                if !mode.keeps(&field) {
                                    void_out(simple)?;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ebml;

    #[test]
    fn test_round_trip_is_identical() {
        let file = ebml::matroska("Holiday", &[("ARTIST", "Someone"), ("COMMENT", "hi")]);
        let io = EbmlIO::new();
        let tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract() {
        let io = EbmlIO::new();
        let tree = io.decode(&ebml::matroska("Holiday", &[("ARTIST", "Someone")])).unwrap();
        let fields = io.extract(&tree);
        assert_eq!(fields[0].key, "DocType");
        assert_eq!(fields[0].value, "matroska");
        assert!(fields
            .iter()
            .any(|f| f.key == "Title" && f.value == "Holiday" && f.category == category::MKV_INFO));
        assert!(fields.iter().any(|f| {
            f.key == "ARTIST" && f.value == "Someone" && f.category == category::MKV_TAGS
        }));
        assert!(fields.iter().all(|f| !f.editable));
        assert_eq!(io.media_type(&tree), MediaType::Matroska);
    }

    #[test]
    fn test_unknown_size_segment_extends_to_end() {
        let file = ebml::unknown_size_segment("Live");
        let io = EbmlIO::new();
        let tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert!(tree.nodes[1].declared_length.is_ebml_unknown());
        assert!(io.extract(&tree).iter().any(|f| f.key == "Title" && f.value == "Live"));
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_strip_preserves_length() {
        let file = ebml::matroska("Holiday", &[("ARTIST", "Someone")]);
        let io = EbmlIO::new();
        let mut tree = io.decode(&file).unwrap();
        io.strip(&mut tree, &StripMode::All).unwrap();
        let out = io.encode(&tree).unwrap();
        assert_eq!(out.len(), file.len());

        let fields = io.extract(&io.decode(&out).unwrap());
        assert!(fields.iter().all(|f| f.key != "Title" && f.category != category::MKV_TAGS));
        assert!(fields.iter().any(|f| f.key == "MuxingApp"));
    }

    #[test]
    fn test_strip_keep_simple_tag() {
        let file = ebml::matroska("Holiday", &[("ARTIST", "Someone"), ("COMMENT", "hi")]);
        let io = EbmlIO::new();
        let mut tree = io.decode(&file).unwrap();
        io.strip(&mut tree, &StripMode::Keep(vec!["artist".into()])).unwrap();
        let out = io.encode(&tree).unwrap();
        assert_eq!(out.len(), file.len());
        let fields = io.extract(&io.decode(&out).unwrap());
        assert!(fields.iter().any(|f| f.key == "ARTIST"));
        assert!(fields.iter().all(|f| f.key != "COMMENT" && f.key != "Title"));
    }

    #[test]
    fn test_void_covers_exact_length() {
        for total in [2u64, 5, 9, 130, 20_000] {
            let void = void_of_len(total, 0);
            assert_eq!(measure(&ElementFraming, &void).unwrap(), total);
        }
    }

    #[test]
    fn test_edit_is_refused() {
        use crate::updates::FieldOp;
        let io = EbmlIO::new();
        let mut tree = io.decode(&ebml::matroska("x", &[])).unwrap();
        let err = io
            .apply_edits(&mut tree, &[FieldOp::Set { key: "Title".into(), value: "y".into() }])
            .unwrap_err();
        assert!(matches!(err, Error::NoEditableLocation { .. }));
    }

    #[test]
    fn test_date_format() {
        assert_eq!(format_date(&0i64.to_be_bytes()).as_deref(), Some("2001-01-01 00:00:00 UTC"));
        let day = 86_400i64 * 1_000_000_000 * 59;
        assert_eq!(format_date(&day.to_be_bytes()).as_deref(), Some("2001-03-01 00:00:00 UTC"));
    }
}
