//! GIF container I/O implementation
//!
//! The signature, logical screen descriptor and global colour table are the tree header.
//! Every block after it is a node tagged with its label: extensions (`0x21 <label>`) carry
//! their raw sub-blocks as payload, image descriptors (`0x2C`) carry the descriptor,
//! local colour table and LZW data, and the trailer (`0x3B`) is an empty node. Bytes after
//! the trailer are copied through as the tree trailer.
//!
//! Metadata lives in comment extensions and in the `XMP DataXMP` and `ICCRGBG1012`
//! application extensions. GIF has no field-level editing; view and strip only.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    updates::StripMode,
    MediaType,
};
use byteorder::{ByteOrder, LittleEndian};

const GIF87A: &[u8; 6] = b"GIF87a";
const GIF89A: &[u8; 6] = b"GIF89a";

// Block introducers
const EXTENSION: u8 = 0x21;
const IMAGE: u8 = 0x2C;
const TRAILER: u8 = 0x3B;

// Extension labels
const COMMENT: u8 = 0xFE;
const APPLICATION: u8 = 0xFF;

const XMP_APP_ID: &[u8; 11] = b"XMP DataXMP";
const ICC_APP_ID: &[u8; 11] = b"ICCRGBG1012";

/// Signature plus logical screen descriptor
const SCREEN_HEADER_LEN: usize = 13;

const COMMENT_KEY: &str = "Comment";
const ICC_KEY: &str = "ICCProfile";

/// Bytes in a colour table announced by a packed field
fn color_table_len(packed: u8) -> usize {
    if packed & 0x80 == 0 {
        0
    } else {
        3 << ((packed & 0x07) + 1)
    }
}

fn is_comment(node: &ContainerNode) -> bool {
    node.tag == Tag::Block(COMMENT)
}

/// Identifier and authentication code of an application extension
fn application_id(node: &ContainerNode) -> Option<&[u8]> {
    if node.tag != Tag::Block(APPLICATION) || node.payload.first() != Some(&11) {
        return None;
    }
    node.payload.get(1..12)
}

fn is_xmp(node: &ContainerNode) -> bool {
    application_id(node) == Some(&XMP_APP_ID[..])
}

fn is_icc(node: &ContainerNode) -> bool {
    application_id(node) == Some(&ICC_APP_ID[..])
}

/// Concatenated data of a sub-block chain
fn join_sub_blocks(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut at = 0;
    while let Some(&size) = raw.get(at) {
        if size == 0 {
            break;
        }
        let end = (at + 1 + size as usize).min(raw.len());
        out.extend_from_slice(&raw[at + 1..end]);
        at = end;
    }
    out
}

/// The XMP packet of an `XMP DataXMP` extension
///
/// The packet is stored raw rather than in sub-blocks; a 258-byte magic trailer after
/// it makes a sub-block reader land on a terminator. The packet ends at its last `>`.
fn xmp_packet(node: &ContainerNode) -> &[u8] {
    let data = node.payload.get(12..).unwrap_or(&[]);
    match data.iter().rposition(|&b| b == b'>') {
        Some(end) => &data[..=end],
        None => &[],
    }
}

/// Raw sub-block chain at the cursor, terminator included
fn read_sub_blocks<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8]> {
    let start = cursor.position();
    loop {
        let size = cursor.read_u8()? as usize;
        if size == 0 {
            break;
        }
        cursor.skip(size)?;
    }
    let end = cursor.position();
    cursor.set_position(start)?;
    cursor.read_bytes(end - start)
}

/// `0x21 <label>` for extensions, the bare introducer for images and the trailer
struct BlockFraming;

impl NodeFraming for BlockFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Gif
    }

    fn header_len(&self, node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(match node.tag {
            Tag::Block(IMAGE | TRAILER) => 1,
            _ => 2,
        })
    }

    fn write_header(&self, node: &ContainerNode, _body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        match node.tag {
            Tag::Block(introducer @ (IMAGE | TRAILER)) => out.push(introducer),
            Tag::Block(label) => out.extend_from_slice(&[EXTENSION, label]),
            other => {
                return Err(Error::malformed(
                    ContainerKind::Gif,
                    other.to_string(),
                    node.offset,
                    "not a GIF block",
                ))
            }
        }
        Ok(())
    }
}

/// GIF container I/O implementation
pub struct GifIO;

impl GifIO {
    pub fn new() -> Self {
        Self
    }

    /// Length of the signature, screen descriptor and global colour table
    fn header_len(data: &[u8]) -> Result<usize> {
        let mut cursor = ByteCursor::new(data);
        let screen = cursor.read_bytes(SCREEN_HEADER_LEN)?;
        let table = color_table_len(screen[10]);
        cursor.skip(table)?;
        Ok(SCREEN_HEADER_LEN + table)
    }

    fn read_block(&self, cursor: &mut ByteCursor) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let introducer = cursor.read_u8()?;
        let mut node = match introducer {
            EXTENSION => {
                let label = cursor.read_u8()?;
                if matches!(label, IMAGE | TRAILER) {
                    return Err(Error::malformed(
                        ContainerKind::Gif,
                        "extension",
                        offset,
                        format!("label 0x{:02X} is a block introducer", label),
                    ));
                }
                ContainerNode::leaf(Tag::Block(label), read_sub_blocks(cursor)?.to_vec())
            }
            IMAGE => {
                let start = cursor.position();
                let descriptor = cursor.read_bytes(9)?;
                cursor.skip(color_table_len(descriptor[8]))?;
                // LZW minimum code size
                cursor.skip(1)?;
                read_sub_blocks(cursor)?;
                let end = cursor.position();
                cursor.set_position(start)?;
                ContainerNode::leaf(Tag::Block(IMAGE), cursor.read_bytes(end - start)?.to_vec())
            }
            TRAILER => ContainerNode::leaf(Tag::Block(TRAILER), Vec::new()),
            other => {
                return Err(Error::malformed(
                    ContainerKind::Gif,
                    "block",
                    offset,
                    format!("unknown block introducer 0x{:02X}", other),
                ))
            }
        };
        node.offset = offset;
        Ok(node)
    }

    fn header_fields(header: &[u8]) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        if let Some(version) = header.get(..6) {
            fields.push(MetadataField::new(
                "Version",
                String::from_utf8_lossy(version),
                category::GIF_HEADER,
            ));
        }
        if let Some(size) = header.get(6..10) {
            let width = LittleEndian::read_u16(&size[..2]);
            let height = LittleEndian::read_u16(&size[2..]);
            fields.push(MetadataField::new(
                "Dimensions",
                format!("{} x {}", width, height),
                category::GIF_HEADER,
            ));
        }
        fields
    }

    fn keeps_comment(mode: &StripMode, field: &MetadataField) -> bool {
        mode.keeps(field)
            || mode.keeps_key(COMMENT_KEY)
            || mode.keeps_group(&[category::GIF_COMMENT])
    }

    fn keeps_icc(mode: &StripMode) -> bool {
        mode.keeps_key(ICC_KEY) || mode.keeps_group(&[category::ICC, "ICC"])
    }
}

impl Default for GifIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for GifIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Gif
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Gif]
    }

    fn extensions() -> &'static [&'static str] {
        &["gif"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/gif"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        if header.starts_with(GIF89A) || header.starts_with(GIF87A) {
            Some(ContainerKind::Gif)
        } else {
            None
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: false,
            can_strip: true,
            editable_fields: &[],
            notes: "comments plus XMP and ICC application extensions; view and strip only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Gif,
            });
        }
        let header_len = match Self::header_len(data) {
            Ok(len) => len,
            Err(e) => {
                let mut tree = ContainerTree::new(ContainerKind::Gif, data[..6].to_vec());
                tree.record_issue("logical screen descriptor", &e);
                tree.trailer = data[6..].to_vec();
                return Ok(tree);
            }
        };

        let mut tree = ContainerTree::new(ContainerKind::Gif, data[..header_len].to_vec());
        let mut cursor = ByteCursor::new(data);
        cursor.skip(header_len)?;
        while !cursor.at_end() {
            let start = cursor.position();
            match self.read_block(&mut cursor) {
                Ok(node) => {
                    let done = node.tag == Tag::Block(TRAILER);
                    tree.nodes.push(node);
                    if done {
                        break;
                    }
                }
                Err(e) => {
                    tree.record_issue("block", &e);
                    cursor.set_position(start)?;
                    break;
                }
            }
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&BlockFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        tree.nodes
            .iter()
            .position(|n| is_comment(n) || is_xmp(n) || is_icc(n))
            .map(|i| vec![i])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Gif
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Self::header_fields(&tree.header);
        let mut comments = 0;
        for node in &tree.nodes {
            if is_comment(node) {
                let text = join_sub_blocks(&node.payload);
                if text.is_empty() {
                    continue;
                }
                comments += 1;
                fields.push(MetadataField::new(
                    format!("{}_{}", COMMENT_KEY, comments),
                    String::from_utf8_lossy(&text),
                    category::GIF_COMMENT,
                ));
            } else if is_xmp(node) {
                fields.extend(crate::xmp_fields(xmp_packet(node)));
            } else if is_icc(node) {
                let profile = join_sub_blocks(node.payload.get(12..).unwrap_or(&[]));
                fields.push(MetadataField::new(
                    ICC_KEY,
                    format!("<{} bytes>", profile.len()),
                    category::ICC,
                ));
            }
        }
        fields
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        match mode {
            StripMode::All => tree.nodes.retain(|n| !(is_comment(n) || is_xmp(n) || is_icc(n))),
            // Nothing in a GIF records location outside XMP, which is kept whole
            StripMode::GpsOnly => {}
            StripMode::Keep(_) => {
                let mut comments = 0;
                tree.nodes.retain(|n| {
                    if is_comment(n) {
                        let text = join_sub_blocks(&n.payload);
                        if text.is_empty() {
                            return Self::keeps_comment(
                                mode,
                                &MetadataField::new(COMMENT_KEY, "", category::GIF_COMMENT),
                            );
                        }
                        comments += 1;
                        let field = MetadataField::new(
                            format!("{}_{}", COMMENT_KEY, comments),
                            String::from_utf8_lossy(&text),
                            category::GIF_COMMENT,
                        );
                        Self::keeps_comment(mode, &field)
                    } else if is_xmp(n) {
                        mode.keeps_group(&[category::XMP])
                            || crate::xmp_fields(xmp_packet(n)).iter().any(|f| mode.keeps(f))
                    } else if is_icc(n) {
                        Self::keeps_icc(mode)
                    } else {
                        true
                    }
                });
            }
        }
        log_debug!(blocks = tree.nodes.len(), "GIF blocks after strip");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gif;
    use crate::StripRequest;

    const XMP: &str = concat!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF "#,
        r#"xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">"#,
        r#"<rdf:Description xmlns:dc="http://purl.org/dc/elements/1.1/" dc:format="image/gif"/>"#,
        r#"</rdf:RDF></x:xmpmeta>"#
    );

    fn full() -> Vec<u8> {
        gif::with_blocks(&[
            gif::netscape_loop(),
            gif::comment("made by hand"),
            gif::xmp(XMP),
            gif::icc(&[0x42; 300]),
        ])
    }

    fn fields(file: &[u8]) -> Vec<MetadataField> {
        let report = crate::view(file, ContainerKind::Gif).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        report.fields
    }

    #[test]
    fn test_detect() {
        assert_eq!(GifIO::detect(&gif::minimal()), Some(ContainerKind::Gif));
        assert_eq!(GifIO::detect(b"GIF87a\x01\x00"), Some(ContainerKind::Gif));
        assert_eq!(GifIO::detect(b"GIF90a"), None);
    }

    #[test]
    fn test_round_trip_is_identical() {
        let file = full();
        let io = GifIO::new();
        let tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert_eq!(tree.header.len(), 13 + 6);
        assert_eq!(tree.nodes.last().map(|n| n.tag), Some(Tag::Block(TRAILER)));
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_view_header_and_comment() {
        let fields = fields(&gif::with_comment("hello"));
        assert_eq!(fields[0].key, "Version");
        assert_eq!(fields[0].value, "GIF89a");
        assert_eq!(fields[1].value, "2 x 1");
        assert_eq!(fields[2].key, "Comment_1");
        assert_eq!(fields[2].value, "hello");
        assert_eq!(fields[2].category, category::GIF_COMMENT);
    }

    #[test]
    fn test_long_comment_spans_sub_blocks() {
        let text = "x".repeat(600);
        let fields = fields(&gif::with_comment(&text));
        assert_eq!(fields[2].value, text);
    }

    #[test]
    fn test_view_application_extensions() {
        let fields = fields(&full());
        let icc = fields.iter().find(|f| f.key == ICC_KEY).unwrap();
        assert_eq!(icc.value, "<300 bytes>");
        assert!(fields.iter().any(|f| f.category == category::XMP));
        // The loop extension is animation control, not metadata
        assert!(fields.iter().all(|f| !f.value.contains("NETSCAPE")));
    }

    #[test]
    fn test_xmp_packet_ends_before_magic_trailer() {
        let file = gif::with_blocks(&[gif::xmp(XMP)]);
        let tree = GifIO::new().decode(&file).unwrap();
        let node = tree.nodes.iter().find(|n| is_xmp(n)).unwrap();
        assert_eq!(xmp_packet(node), XMP.as_bytes());
    }

    #[test]
    fn test_strip_all_keeps_image_and_animation() {
        let file = full();
        let outcome = crate::strip(&file, ContainerKind::Gif, &StripRequest::all()).unwrap();
        let tree = GifIO::new().decode(&outcome.output).unwrap();
        assert!(tree.nodes.iter().all(|n| !is_comment(n) && !is_xmp(n) && !is_icc(n)));
        assert_eq!(application_id(&tree.nodes[0]), Some(&b"NETSCAPE2.0"[..]));
        // Graphic control, image and trailer are the untouched tail of the input
        let tail = &file[file.len() - 24..];
        assert!(outcome.output.ends_with(tail));
        assert!(outcome.removed.iter().any(|f| f.key == "Comment_1"));
        assert!(outcome.removed.iter().any(|f| f.key == ICC_KEY));
    }

    #[test]
    fn test_strip_keep_icc() {
        let file = full();
        let request = StripRequest::keep(["ICC"]);
        let outcome = crate::strip(&file, ContainerKind::Gif, &request).unwrap();
        let keys: Vec<String> = fields(&outcome.output).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["Version", "Dimensions", ICC_KEY]);
    }

    #[test]
    fn test_strip_keep_comment() {
        let file = gif::with_blocks(&[gif::comment("one"), gif::comment("two")]);
        let request = StripRequest::keep(["comment_2"]);
        let outcome = crate::strip(&file, ContainerKind::Gif, &request).unwrap();
        let comments: Vec<String> = fields(&outcome.output)
            .into_iter()
            .filter(|f| f.category == category::GIF_COMMENT)
            .map(|f| f.value)
            .collect();
        assert_eq!(comments, vec!["two"]);
    }

    #[test]
    fn test_gps_only_changes_nothing() {
        let file = full();
        let outcome = crate::strip(&file, ContainerKind::Gif, &StripRequest::gps_only()).unwrap();
        assert_eq!(outcome.output, file);
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn test_edit_is_refused() {
        let file = gif::with_comment("x");
        let request = crate::EditRequest::new().set("Comment", "y");
        assert!(matches!(
            crate::edit(&file, ContainerKind::Gif, &request),
            Err(Error::NoEditableLocation { .. })
        ));
    }

    #[test]
    fn test_truncated_block_is_an_issue() {
        let file = gif::with_comment("hello");
        let cut = &file[..13 + 6 + 4];
        let report = crate::view(cut, ContainerKind::Gif).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(crate::strip(cut, ContainerKind::Gif, &StripRequest::all()).is_err());
    }

    #[test]
    fn test_truncated_color_table_is_an_issue() {
        let file = gif::minimal();
        let tree = GifIO::new().decode(&file[..15]).unwrap();
        assert_eq!(tree.issues.len(), 1);
        assert_eq!(GifIO::new().encode(&tree).unwrap(), &file[..15]);
    }
}
