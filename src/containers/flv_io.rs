//! FLV container I/O implementation
//!
//! The FLV header and `PreviousTagSize0` are the tree header. Every tag is a node tagged
//! with its raw type byte; timestamp and stream id (7 bytes) are the auxiliary header and
//! the framing appends the `PreviousTagSize` back-pointer. Script data tags hold AMF0
//! values, normally `"onMetaData"` followed by an ECMA array.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    amf0::{self, Amf0Value},
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    tree::{linearize_tree, measure, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::{BigEndian, ByteOrder};

const MAGIC: &[u8; 3] = b"FLV";
const SCRIPT_DATA: u8 = 18;
const TAG_HEADER_LEN: usize = 11;
const ON_METADATA: &str = "onMetaData";
const MAX_TAG_SIZE: usize = 0x00FF_FFFF;

fn is_script(node: &ContainerNode) -> bool {
    matches!(node.tag, Tag::Block(t) if t & 0x1F == SCRIPT_DATA)
}

/// Type byte and 24-bit data size, then `PreviousTagSize` after the body
struct TagFraming;

impl NodeFraming for TagFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Flv
    }

    fn header_len(&self, _node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(4)
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let Tag::Block(kind) = node.tag else {
            return Err(Error::malformed(
                ContainerKind::Flv,
                node.tag.to_string(),
                node.offset,
                "not an FLV tag",
            ));
        };
        // DataSize does not count timestamp and stream id
        let size = body_len.saturating_sub(node.aux_header.len() as u64) as usize;
        if size > MAX_TAG_SIZE {
            return Err(Error::DataTooLarge {
                size,
                max: MAX_TAG_SIZE,
            });
        }
        out.push(kind);
        out.extend_from_slice(&(size as u32).to_be_bytes()[1..]);
        Ok(())
    }

    fn trailer_len(&self, _node: &ContainerNode, _body_len: u64) -> u64 {
        4
    }

    fn write_trailer(
        &self,
        _node: &ContainerNode,
        body_len: u64,
        out: &mut Vec<u8>,
        _frame_start: usize,
    ) -> Result<()> {
        out.extend_from_slice(&((body_len + 4) as u32).to_be_bytes());
        Ok(())
    }
}

/// FLV container I/O implementation
pub struct FlvIO;

impl FlvIO {
    pub fn new() -> Self {
        Self
    }

    fn read_tag(&self, cursor: &mut ByteCursor) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let kind = cursor.read_u8()?;
        let size = cursor.read_u24::<BigEndian>()? as usize;
        let aux = cursor.read_bytes(7)?.to_vec();
        let payload = cursor.read_bytes(size)?.to_vec();
        let previous = cursor.read_u32::<BigEndian>()?;
        if previous as usize != TAG_HEADER_LEN + size {
            log_warn!(
                offset,
                previous,
                "PreviousTagSize does not match the tag; it will be rewritten"
            );
        }
        let mut node = ContainerNode::leaf(Tag::Block(kind), payload);
        node.aux_header = aux;
        node.declared_length = VarInt::new(size as u64, 3);
        node.offset = offset;
        Ok(node)
    }

    /// Index of the script tag holding `onMetaData` and its decoded values
    fn metadata_tag(&self, tree: &ContainerTree) -> Option<(usize, Vec<Amf0Value>)> {
        tree.nodes.iter().enumerate().filter(|(_, n)| is_script(n)).find_map(|(i, node)| {
            let values = match amf0::read_all(&node.payload) {
                Ok(values) => values,
                Err(e) => {
                    log_warn!("unreadable script data tag: {}", e);
                    return None;
                }
            };
            let is_metadata = values.first().and_then(Amf0Value::as_str) == Some(ON_METADATA)
                && values.get(1).and_then(Amf0Value::entries).is_some();
            is_metadata.then_some((i, values))
        })
    }

    fn header_fields(header: &[u8]) -> Vec<MetadataField> {
        if header.len() < 5 {
            return Vec::new();
        }
        let flag = |bit: u8| (header[4] & bit != 0).to_string();
        vec![
            MetadataField::new("Version", header[3].to_string(), category::FLV_HEADER),
            MetadataField::new("HasVideo", flag(0x01), category::FLV_HEADER),
            MetadataField::new("HasAudio", flag(0x04), category::FLV_HEADER),
        ]
    }

    fn entry_fields(values: &[Amf0Value]) -> Vec<MetadataField> {
        values
            .get(1)
            .and_then(Amf0Value::entries)
            .unwrap_or(&[])
            .iter()
            .map(|(key, value)| {
                MetadataField::new(key.as_str(), value.render(), category::AMF0)
                    .editable(value.is_string())
            })
            .collect()
    }

    fn write_values(node: &mut ContainerNode, values: &[Amf0Value]) {
        node.payload = amf0::write_all(values);
    }

    /// Keep the declared count in step when it was accurate to begin with
    fn resize_ecma(value: &mut Amf0Value, before: usize) {
        if let Amf0Value::EcmaArray {
            declared_count,
            entries,
        } = value
        {
            if *declared_count as usize == before {
                *declared_count = entries.len() as u32;
            }
        }
    }

    fn filter_entries(&self, tree: &mut ContainerTree, keep: impl Fn(&str, &Amf0Value) -> bool) {
        let Some((index, mut values)) = self.metadata_tag(tree) else {
            return;
        };
        if let Some(entries) = values[1].entries_mut() {
            let before = entries.len();
            entries.retain(|(k, v)| keep(k, v));
            Self::resize_ecma(&mut values[1], before);
        }
        Self::write_values(&mut tree.nodes[index], &values);
    }

    /// Rewrite `keyframes.filepositions` for tags that moved, and `filesize`
    fn fix_positions(values: &mut [Amf0Value], moves: &[(u64, u64)], file_size: u64) -> bool {
        let remap = |old: f64| -> f64 {
            let old_pos = old as u64;
            match moves.iter().rev().find(|(from, _)| *from <= old_pos) {
                Some((from, to)) => (old_pos - from + to) as f64,
                None => old,
            }
        };
        let mut changed = false;
        let Some(entries) = values.get_mut(1).and_then(Amf0Value::entries_mut) else {
            return false;
        };
        for (key, value) in entries.iter_mut() {
            match (key.as_str(), value) {
                ("filesize", Amf0Value::Number(n)) if *n != file_size as f64 => {
                    *n = file_size as f64;
                    changed = true;
                }
                ("keyframes", keyframes) => {
                    let Some(inner) = keyframes.entries_mut() else { continue };
                    for (name, positions) in inner.iter_mut() {
                        let Amf0Value::StrictArray(items) = positions else { continue };
                        if name != "filepositions" {
                            continue;
                        }
                        for item in items.iter_mut() {
                            if let Amf0Value::Number(n) = item {
                                let moved = remap(*n);
                                if moved != *n {
                                    *n = moved;
                                    changed = true;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        changed
    }
}

impl Default for FlvIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for FlvIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Flv
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Flv]
    }

    fn extensions() -> &'static [&'static str] {
        &["flv"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["video/x-flv"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        (header.len() >= 4 && header.starts_with(MAGIC) && header[3] == 1)
            .then_some(ContainerKind::Flv)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: &["(any onMetaData string entry)"],
            notes: "onMetaData string entries; numbers and objects are view only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if !data.starts_with(MAGIC) {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Flv,
            });
        }
        let mut cursor = ByteCursor::new(data);
        let fixed = cursor.read_bytes(9)?;
        let data_offset = BigEndian::read_u32(&fixed[5..9]) as usize;
        if data_offset < 9 {
            return Err(Error::malformed(
                ContainerKind::Flv,
                "FLV header",
                5,
                format!("data offset {} is inside the header", data_offset),
            ));
        }
        cursor.set_position(0)?;
        // Header plus PreviousTagSize0
        let header = cursor.read_bytes(data_offset + 4)?.to_vec();
        let mut tree = ContainerTree::new(ContainerKind::Flv, header);

        while cursor.remaining() >= TAG_HEADER_LEN {
            let start = cursor.position();
            match self.read_tag(&mut cursor) {
                Ok(node) => tree.nodes.push(node),
                Err(e) => {
                    tree.record_issue("FLV tag", &e);
                    cursor.set_position(start)?;
                    break;
                }
            }
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&TagFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        self.metadata_tag(tree).map(|(i, _)| vec![i])
    }

    fn media_type(&self, _tree: &ContainerTree) -> MediaType {
        MediaType::Flv
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Self::header_fields(&tree.header);
        if let Some((_, values)) = self.metadata_tag(tree) {
            fields.extend(Self::entry_fields(&values));
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        (!key.is_empty() && key.len() <= u16::MAX as usize).then(|| key.to_string())
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let (index, mut values) = match self.metadata_tag(tree) {
            Some(found) => found,
            None if ops.iter().any(|op| matches!(op, FieldOp::Set { .. })) => {
                log_debug!("inserting onMetaData script tag");
                let mut node = ContainerNode::leaf(Tag::Block(SCRIPT_DATA), Vec::new());
                node.aux_header = vec![0; 7];
                tree.nodes.insert(0, node);
                let values = vec![
                    Amf0Value::String(ON_METADATA.into()),
                    Amf0Value::EcmaArray {
                        declared_count: 0,
                        entries: Vec::new(),
                    },
                ];
                (0, values)
            }
            None => return Ok(()),
        };

        let before = values[1].entries().map(|e| e.len()).unwrap_or(0);
        let entries = values[1].entries_mut().ok_or_else(|| {
            Error::malformed(
                ContainerKind::Flv,
                ON_METADATA,
                tree.nodes[index].offset,
                "metadata is not an object",
            )
        })?;
        for op in ops {
            match op {
                FieldOp::Set { key, value } => match entries.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) if existing.is_string() => {
                        *existing = Amf0Value::String(value.clone())
                    }
                    Some(_) => {
                        return Err(Error::UnsupportedField {
                            key: key.clone(),
                            flavor: ContainerKind::Flv,
                        })
                    }
                    None => entries.push((key.clone(), Amf0Value::String(value.clone()))),
                },
                FieldOp::Delete { key } => entries.retain(|(k, _)| k != key),
            }
        }
        Self::resize_ecma(&mut values[1], before);
        Self::write_values(&mut tree.nodes[index], &values);
        Ok(())
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        match mode {
            StripMode::All => tree.nodes.retain(|n| !is_script(n)),
            StripMode::Keep(_) if mode.keeps_group(&[category::AMF0, ON_METADATA]) => {}
            _ => self.filter_entries(tree, |key, value| {
                mode.keeps(&MetadataField::new(key, value.render(), category::AMF0))
            }),
        }
        Ok(())
    }

    fn finalize(&self, tree: &mut ContainerTree) -> Result<()> {
        let mut pos = tree.header.len() as u64;
        // (old offset, new offset) for every tag read from the source
        let mut moves = Vec::new();
        let mut starts = Vec::with_capacity(tree.nodes.len());
        for node in &tree.nodes {
            if node.offset != 0 {
                moves.push((node.offset, pos));
            }
            starts.push(pos);
            pos += measure(&TagFraming, node)?;
        }
        let file_size = pos + tree.trailer.len() as u64;

        if let Some((index, mut values)) = self.metadata_tag(tree) {
            if Self::fix_positions(&mut values, &moves, file_size) {
                log_debug!(tags = moves.len(), file_size, "rewriting keyframe positions");
                Self::write_values(&mut tree.nodes[index], &values);
            }
        }
        for (node, at) in tree.nodes.iter_mut().zip(starts) {
            node.offset = at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::flv;

    #[test]
    fn test_round_trip_is_identical() {
        let file = flv::with_metadata(&[("encoder", "Lavf58")]);
        let io = FlvIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        io.finalize(&mut tree).unwrap();
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract() {
        let file = flv::with_metadata(&[("encoder", "Lavf58")]);
        let io = FlvIO::new();
        let fields = io.extract(&io.decode(&file).unwrap());
        assert_eq!(fields[0].key, "Version");
        assert!(fields.iter().any(|f| f.key == "HasAudio" && f.value == "true"));
        let encoder = fields.iter().find(|f| f.key == "encoder").unwrap();
        assert_eq!(encoder.category, category::AMF0);
        assert!(encoder.editable);
        assert!(fields.iter().any(|f| f.key == "duration" && !f.editable));
    }

    #[test]
    fn test_edit_shifts_keyframe_positions() {
        let file = flv::with_metadata(&[("encoder", "x")]);
        let io = FlvIO::new();
        let mut tree = io.decode(&file).unwrap();
        let video_at = tree.nodes[1].offset;

        let op = FieldOp::Set {
            key: "encoder".into(),
            value: "x-longer".into(),
        };
        io.apply_edits(&mut tree, &[op]).unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();

        let tree = io.decode(&out).unwrap();
        assert!(tree.issues.is_empty());
        let new_video_at = tree.nodes[1].offset;
        assert_eq!(new_video_at, video_at + 7);
        let (_, values) = io.metadata_tag(&tree).unwrap();
        let entries = values[1].entries().unwrap();
        let keyframes = entries.iter().find(|(k, _)| k == "keyframes").unwrap();
        let positions = keyframes.1.entries().unwrap()[0].1.clone();
        assert_eq!(positions, Amf0Value::StrictArray(vec![Amf0Value::Number(new_video_at as f64)]));
    }

    #[test]
    fn test_number_entries_are_not_editable() {
        let io = FlvIO::new();
        let mut tree = io.decode(&flv::with_metadata(&[])).unwrap();
        let err = io
            .apply_edits(&mut tree, &[FieldOp::Set { key: "duration".into(), value: "1".into() }])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedField { .. }));
    }

    #[test]
    fn test_strip_all_removes_script_tags() {
        let file = flv::with_metadata(&[("encoder", "x")]);
        let io = FlvIO::new();
        let mut tree = io.decode(&file).unwrap();
        io.strip(&mut tree, &StripMode::All).unwrap();
        let out = io.encode(&tree).unwrap();
        let tree = io.decode(&out).unwrap();
        assert!(tree.nodes.iter().all(|n| !is_script(n)));
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(io.extract(&tree).len(), 3);
    }
}
