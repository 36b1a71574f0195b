//! FLAC container I/O implementation
//!
//! `fLaC` is the tree header. Each metadata block is a node tagged with its block type;
//! the last-block flag lives on the node and is recomputed by [`FlacIO::finalize`]. Audio
//! frames after the last block form the tree trailer.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    vorbis::VorbisComments,
    MediaType,
};
use byteorder::BigEndian;

const MAGIC: &[u8; 4] = b"fLaC";

mod block {
    pub const STREAMINFO: u8 = 0;
    pub const VORBIS_COMMENT: u8 = 4;
    pub const PICTURE: u8 = 6;
}

const MAX_BLOCK_SIZE: usize = 0x00FF_FFFF;

/// Friendly names that differ from the Vorbis field name
const ALIASES: &[(&str, &str)] = &[
    ("year", "DATE"),
    ("track", "TRACKNUMBER"),
    ("disc", "DISCNUMBER"),
];

const EDITABLE_FIELDS: &[&str] = &[
    "TITLE",
    "ARTIST",
    "ALBUM",
    "DATE",
    "GENRE",
    "COMMENT",
    "TRACKNUMBER",
    "(any KEY)",
];

fn is_block(node: &ContainerNode, kind: u8) -> bool {
    node.tag == Tag::Block(kind)
}

/// Block header: last flag, 7-bit type, 24-bit length
struct BlockFraming;

impl NodeFraming for BlockFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Flac
    }

    fn header_len(&self, _node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(4)
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let Tag::Block(kind) = node.tag else {
            return Err(Error::malformed(
                ContainerKind::Flac,
                node.tag.to_string(),
                node.offset,
                "not a metadata block",
            ));
        };
        if body_len as usize > MAX_BLOCK_SIZE {
            return Err(Error::DataTooLarge {
                size: body_len as usize,
                max: MAX_BLOCK_SIZE,
            });
        }
        let len = (body_len as u32).to_be_bytes();
        out.push(if node.is_last { 0x80 | kind } else { kind });
        out.extend_from_slice(&len[1..]);
        Ok(())
    }
}

/// Summary of a PICTURE block
fn picture_summary(payload: &[u8]) -> Result<String> {
    let mut cursor = ByteCursor::new(payload);
    let _picture_type = cursor.read_u32::<BigEndian>()?;
    let mime_len = cursor.read_u32::<BigEndian>()? as usize;
    let mime = String::from_utf8_lossy(cursor.read_bytes(mime_len)?).into_owned();
    let desc_len = cursor.read_u32::<BigEndian>()? as usize;
    cursor.skip(desc_len)?;
    let width = cursor.read_u32::<BigEndian>()?;
    let height = cursor.read_u32::<BigEndian>()?;
    cursor.skip(8)?; // depth, colors
    let data_len = cursor.read_u32::<BigEndian>()?;
    Ok(format!("{}, {}x{}, {} bytes", mime, width, height, data_len))
}

/// FLAC container I/O implementation
pub struct FlacIO;

impl FlacIO {
    pub fn new() -> Self {
        Self
    }

    fn read_block(&self, cursor: &mut ByteCursor) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let flags = cursor.read_u8()?;
        let len = cursor.read_u24::<BigEndian>()?;
        let payload = cursor.read_bytes(len as usize)?.to_vec();
        let mut node = ContainerNode::leaf(Tag::Block(flags & 0x7F), payload);
        node.is_last = flags & 0x80 != 0;
        node.declared_length = VarInt::new(len as u64, 3);
        node.offset = offset;
        Ok(node)
    }

    fn comments(&self, node: &ContainerNode) -> Result<VorbisComments> {
        VorbisComments::parse(ContainerKind::Flac, &node.payload)
    }
}

impl Default for FlacIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for FlacIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Flac
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Flac]
    }

    fn extensions() -> &'static [&'static str] {
        &["flac"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["audio/flac", "audio/x-flac"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        header.starts_with(MAGIC).then_some(ContainerKind::Flac)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: EDITABLE_FIELDS,
            notes: "Vorbis comments; keys are stored upper-case",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if !data.starts_with(MAGIC) {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Flac,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Flac, MAGIC.to_vec());
        let mut cursor = ByteCursor::new(data);
        cursor.skip(MAGIC.len())?;

        while !cursor.at_end() {
            let start = cursor.position();
            match self.read_block(&mut cursor) {
                Ok(node) => {
                    let last = node.is_last;
                    tree.nodes.push(node);
                    if last {
                        break;
                    }
                }
                Err(e) => {
                    tree.record_issue("metadata block", &e);
                    cursor.set_position(start)?;
                    break;
                }
            }
        }
        if !tree.nodes.first().map(|n| is_block(n, block::STREAMINFO)).unwrap_or(false) {
            let err = Error::malformed(
                ContainerKind::Flac,
                "STREAMINFO",
                4,
                "first block is not STREAMINFO",
            );
            tree.record_issue("STREAMINFO", &err);
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
            .position(|n| is_block(n, block::VORBIS_COMMENT))
            .map(|i| vec![i])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Flac
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        for node in &tree.nodes {
            match node.tag {
                Tag::Block(block::VORBIS_COMMENT) => match self.comments(node) {
                    Ok(vc) => fields.extend(vc.fields().into_iter().map(|(key, value)| {
                        MetadataField::new(key, value, category::VORBIS).editable(true)
                    })),
                    Err(e) => log_warn!("unreadable VORBIS_COMMENT block: {}", e),
                },
                Tag::Block(block::PICTURE) => match picture_summary(&node.payload) {
                    Ok(summary) => {
                        fields.push(MetadataField::new("Picture", summary, category::FLAC_PICTURE))
                    }
                    Err(e) => log_warn!("unreadable PICTURE block: {}", e),
                },
                _ => {}
            }
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if let Some((_, name)) = ALIASES.iter().find(|(alias, _)| alias.eq_ignore_ascii_case(key)) {
            return Some(name.to_string());
        }
        let valid = !key.is_empty() && key.bytes().all(|b| (0x20..=0x7D).contains(&b) && b != b'=');
        valid.then(|| key.to_ascii_uppercase())
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let index = match tree.nodes.iter().position(|n| is_block(n, block::VORBIS_COMMENT)) {
            Some(i) => i,
            None if ops.iter().any(|op| matches!(op, FieldOp::Set { .. })) => {
                let at = tree.nodes.len().min(1);
                log_debug!(at, "inserting VORBIS_COMMENT block");
                tree.nodes.insert(
                    at,
                    ContainerNode::leaf(
                        Tag::Block(block::VORBIS_COMMENT),
                        VorbisComments::new().to_bytes(),
                    ),
                );
                at
            }
            None => return Ok(()),
        };

        let node = &mut tree.nodes[index];
        let mut vc = self.comments(node)?;
        for op in ops {
            match op {
                FieldOp::Set { key, value } => vc.set(key, value),
                FieldOp::Delete { key } => vc.remove(key),
            }
        }
        node.payload = vc.to_bytes();
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        if matches!(mode, StripMode::All) {
            tree.nodes
                .retain(|n| !is_block(n, block::VORBIS_COMMENT) && !is_block(n, block::PICTURE));
            return Ok(());
        }

        let keep_pictures =
            mode.keeps_key("Picture") || mode.keeps_group(&[category::FLAC_PICTURE, "picture"]);
        let keep_all_comments = mode.keeps_group(&[category::VORBIS, "vorbis"]);
        let mut kept = Vec::with_capacity(tree.nodes.len());
        for mut node in std::mem::take(&mut tree.nodes) {
            let drop_picture = !keep_pictures && !matches!(mode, StripMode::GpsOnly);
            if is_block(&node, block::PICTURE) && drop_picture {
                continue;
            }
            if is_block(&node, block::VORBIS_COMMENT) && !keep_all_comments {
                let mut vc = self.comments(&node)?;
                vc.comments.retain(|c| match c.key() {
                    Some(key) => mode.keeps(&MetadataField::new(key, c.value(), category::VORBIS)),
                    // Entries without a key are no field anyone can list
                    None => matches!(mode, StripMode::GpsOnly),
                });
                if vc.comments.is_empty() && !matches!(mode, StripMode::GpsOnly) {
                    continue;
                }
                node.payload = vc.to_bytes();
            }
            kept.push(node);
        }
        tree.nodes = kept;
        Ok(())
    }

    fn finalize(&self, tree: &mut ContainerTree) -> Result<()> {
        let count = tree.nodes.len();
        for (i, node) in tree.nodes.iter_mut().enumerate() {
            node.is_last = i + 1 == count;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::flac;

    #[test]
    fn test_round_trip_is_identical() {
        let file = flac::with_comments(&[("TITLE", "Song"), ("ARTIST", "Someone")]);
        let io = FlacIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        assert_eq!(tree.trailer, flac::FRAMES);
        io.finalize(&mut tree).unwrap();
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract() {
        let file = flac::with_comments(&[("TITLE", "Song")]);
        let io = FlacIO::new();
        let fields = io.extract(&io.decode(&file).unwrap());
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].key, "TITLE");
        assert_eq!(fields[0].category, category::VORBIS);
        assert!(fields[0].editable);
    }

    #[test]
    fn test_insert_after_streaminfo_moves_last_flag() {
        let file = flac::minimal();
        let io = FlacIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(tree.nodes[0].is_last);
        let key = io.canonical_key("title").unwrap();
        io.apply_edits(&mut tree, &[FieldOp::Set { key, value: "X".into() }])
            .unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();

        assert_eq!(out[4] & 0x80, 0);
        assert_eq!(out[4 + 4 + 34], 0x80 | block::VORBIS_COMMENT);
        assert!(out.ends_with(flac::FRAMES));
        let tree = io.decode(&out).unwrap();
        assert_eq!(tree.nodes.len(), 2);
        let fields = io.extract(&tree);
        assert_eq!(fields[0].key, "TITLE");
        assert_eq!(fields[0].value, "X");
    }

    #[test]
    fn test_strip_keep_filters_comments() {
        let file = flac::with_comments(&[("TITLE", "Song"), ("ARTIST", "Someone")]);
        let io = FlacIO::new();
        let mut tree = io.decode(&file).unwrap();
        io.strip(&mut tree, &StripMode::Keep(vec!["artist".into()])).unwrap();
        let fields = io.extract(&tree);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].key, "ARTIST");
    }

    #[test]
    fn test_strip_all_drops_comment_block() {
        let file = flac::with_comments(&[("TITLE", "Song")]);
        let io = FlacIO::new();
        let mut tree = io.decode(&file).unwrap();
        io.strip(&mut tree, &StripMode::All).unwrap();
        io.finalize(&mut tree).unwrap();
        assert!(tree.nodes.iter().all(|n| !is_block(n, block::VORBIS_COMMENT)));
        assert!(tree.nodes.last().unwrap().is_last);
    }

    #[test]
    fn test_canonical_keys() {
        let io = FlacIO::new();
        assert_eq!(io.canonical_key("Year").as_deref(), Some("DATE"));
        assert_eq!(
            io.canonical_key("replaygain_track_gain").as_deref(),
            Some("REPLAYGAIN_TRACK_GAIN")
        );
        assert_eq!(io.canonical_key("bad=key"), None);
    }

    #[test]
    fn test_picture_summary() {
        let picture = flac::picture("image/png", 16, 8, 100);
        assert_eq!(picture_summary(&picture).unwrap(), "image/png, 16x8, 100 bytes");
    }

    #[test]
    fn test_unrelated_edit_keeps_comment_bytes() {
        let mut comments = 0u32.to_le_bytes().to_vec();
        comments.extend_from_slice(&1u32.to_le_bytes());
        let artist = b"ARTIST=Bj\xF6rk";
        comments.extend_from_slice(&(artist.len() as u32).to_le_bytes());
        comments.extend_from_slice(artist);
        let mut file = flac::minimal();
        file[4] &= 0x7F;
        let frames = file.split_off(4 + 4 + 34);
        file.extend(flac::block(block::VORBIS_COMMENT, true, &comments));
        file.extend(frames);

        let request = crate::EditRequest::new().set("TITLE", "U");
        let outcome = crate::edit(&file, ContainerKind::Flac, &request).unwrap();
        let out = outcome.output.unwrap();
        assert!(out.windows(artist.len()).any(|w| w == artist));
        let fields = io_fields(&out);
        assert!(fields.iter().any(|f| f.key == "ARTIST" && f.value == "Bj\u{FFFD}rk"));
        assert!(fields.iter().any(|f| f.key == "TITLE" && f.value == "U"));
    }

    fn io_fields(file: &[u8]) -> Vec<MetadataField> {
        let io = FlacIO::new();
        io.extract(&io.decode(file).unwrap())
    }
}
