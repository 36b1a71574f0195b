//! ASF container I/O implementation
//!
//! Every object is a 16-byte GUID plus a 64-bit little-endian total size. The Header
//! Object is a container: its object count and two reserved bytes are the auxiliary
//! header and its sub-objects are children. Everything else (Data Object, indexes) is a
//! leaf copied through verbatim.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag, VarInt},
    text,
    tree::{linearize_tree, measure, ContainerTree, NodeFraming, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};
use byteorder::{ByteOrder, LittleEndian};

const OBJECT_HEADER_LEN: u64 = 24;

/// GUIDs in on-disk byte order
mod guid {
    pub const HEADER: [u8; 16] = [
        0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
        0x6C,
    ];
    pub const CONTENT_DESCRIPTION: [u8; 16] = [
        0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
        0x6C,
    ];
    pub const EXTENDED_CONTENT_DESCRIPTION: [u8; 16] = [
        0x40, 0xA4, 0xD0, 0xD2, 0x07, 0xE3, 0xD2, 0x11, 0x97, 0xF0, 0x00, 0xA0, 0xC9, 0x5E, 0xA8,
        0x50,
    ];
    pub const FILE_PROPERTIES: [u8; 16] = [
        0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53,
        0x65,
    ];
    pub const STREAM_PROPERTIES: [u8; 16] = [
        0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53,
        0x65,
    ];
    pub const VIDEO_MEDIA: [u8; 16] = [
        0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44,
        0x2B,
    ];
}

/// The five Content Description strings, in storage order
const CONTENT_FIELDS: [&str; 5] = ["Title", "Author", "Copyright", "Description", "Rating"];

const ALIASES: &[(&str, &str)] = &[("artist", "Author"), ("comment", "Description")];

/// File size field inside the File Properties payload
const FILE_SIZE_AT: usize = 16;

fn is_object(node: &ContainerNode, id: &[u8; 16]) -> bool {
    node.tag == Tag::Guid(*id)
}

/// GUID and 64-bit total size; padding nodes carry no header
struct ObjectFraming;

impl NodeFraming for ObjectFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Asf
    }

    fn header_len(&self, node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(match node.tag {
            Tag::Padding => 0,
            _ => OBJECT_HEADER_LEN,
        })
    }

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        match node.tag {
            Tag::Padding => Ok(()),
            Tag::Guid(id) => {
                out.extend_from_slice(&id);
                out.extend_from_slice(&(body_len + OBJECT_HEADER_LEN).to_le_bytes());
                Ok(())
            }
            other => Err(Error::malformed(
                ContainerKind::Asf,
                other.to_string(),
                node.offset,
                "not an ASF object",
            )),
        }
    }
}

/// The five strings of a Content Description Object
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ContentDescription([String; 5]);

impl ContentDescription {
    /// Five 16-bit lengths, then the five NUL-terminated UTF-16LE strings
    fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        let mut lengths = [0usize; 5];
        for len in lengths.iter_mut() {
            *len = cursor.read_u16::<LittleEndian>()? as usize;
        }
        let mut out = Self::default();
        for (value, len) in out.0.iter_mut().zip(lengths) {
            *value = text::utf16le(cursor.read_bytes(len)?).trim_end_matches('\0').to_string();
        }
        Ok(out)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let encoded: Vec<Vec<u8>> = self
            .0
            .iter()
            .map(|s| {
                let mut bytes = text::to_utf16le(s);
                if !bytes.is_empty() {
                    bytes.extend_from_slice(&[0, 0]);
                }
                bytes
            })
            .collect();
        let mut out = Vec::new();
        for bytes in &encoded {
            let len = u16::try_from(bytes.len()).map_err(|_| Error::DataTooLarge {
                size: bytes.len(),
                max: u16::MAX as usize,
            })?;
            out.extend_from_slice(&len.to_le_bytes());
        }
        for bytes in encoded {
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    fn slot(name: &str) -> Option<usize> {
        CONTENT_FIELDS.iter().position(|f| *f == name)
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(String::is_empty)
    }
}

/// Name/value pairs of an Extended Content Description Object
fn extended_descriptors(payload: &[u8]) -> Result<Vec<(String, String)>> {
    let mut cursor = ByteCursor::new(payload);
    let count = cursor.read_u16::<LittleEndian>()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let name = text::utf16le(cursor.read_bytes(name_len)?).trim_end_matches('\0').to_string();
        let value_type = cursor.read_u16::<LittleEndian>()?;
        let value_len = cursor.read_u16::<LittleEndian>()? as usize;
        let value = cursor.read_bytes(value_len)?;
        let rendered = match (value_type, value.len()) {
            (0, _) => text::utf16le(value).trim_end_matches('\0').to_string(),
            (2, 4) | (3, 4) => {
                let v = LittleEndian::read_u32(value);
                if value_type == 2 {
                    (v != 0).to_string()
                } else {
                    v.to_string()
                }
            }
            (4, 8) => LittleEndian::read_u64(value).to_string(),
            (5, 2) => LittleEndian::read_u16(value).to_string(),
            _ => format!("<{} bytes>", value.len()),
        };
        out.push((name, rendered));
    }
    Ok(out)
}

/// Remove descriptors whose name fails `keep`, copying the survivors byte for byte
fn filter_descriptors(payload: &[u8], keep: impl Fn(&str) -> bool) -> Result<Vec<u8>> {
    let mut cursor = ByteCursor::new(payload);
    let count = cursor.read_u16::<LittleEndian>()?;
    let mut kept = 0u16;
    let mut body = Vec::new();
    for _ in 0..count {
        let start = cursor.position();
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let name = text::utf16le(cursor.read_bytes(name_len)?).trim_end_matches('\0').to_string();
        cursor.skip(2)?;
        let value_len = cursor.read_u16::<LittleEndian>()? as usize;
        cursor.skip(value_len)?;
        if keep(&name) {
            kept += 1;
            body.extend_from_slice(&payload[start..cursor.position()]);
        }
    }
    let mut out = kept.to_le_bytes().to_vec();
    out.extend_from_slice(&body);
    out.extend_from_slice(cursor.read_rest());
    Ok(out)
}

/// ASF container I/O implementation
pub struct AsfIO;

impl AsfIO {
    pub fn new() -> Self {
        Self
    }

    fn read_object(
        &self,
        cursor: &mut ByteCursor,
        tree: &mut ContainerTree,
    ) -> Result<ContainerNode> {
        let offset = cursor.absolute_position();
        let id = cursor.read_array::<16>()?;
        let size = cursor.read_u64::<LittleEndian>()?;
        if size < OBJECT_HEADER_LEN {
            return Err(Error::malformed(
                ContainerKind::Asf,
                Tag::Guid(id).to_string(),
                offset,
                format!("object size {} is smaller than its header", size),
            ));
        }
        let body_len = usize::try_from(size - OBJECT_HEADER_LEN).map_err(|_| Error::Truncated {
            offset,
            needed: size,
            available: cursor.remaining() as u64,
        })?;
        let mut body = cursor.sub_cursor(body_len)?;

        let mut node = if id == guid::HEADER {
            let aux = body.read_bytes(6)?.to_vec();
            let declared = LittleEndian::read_u32(&aux[..4]);
            let children = self.read_children(&mut body, tree);
            let found = children.iter().filter(|c| c.tag != Tag::Padding).count();
            if found != declared as usize {
                log_warn!(declared, found, "header object count does not match");
            }
            ContainerNode::container(Tag::Guid(id), aux, children)
        } else {
            ContainerNode::leaf(Tag::Guid(id), body.read_rest().to_vec())
        };
        node.declared_length = VarInt::new(size, 8);
        node.offset = offset;
        Ok(node)
    }

    fn read_children(
        &self,
        cursor: &mut ByteCursor,
        tree: &mut ContainerTree,
    ) -> Vec<ContainerNode> {
        let mut children = Vec::new();
        while cursor.remaining() >= OBJECT_HEADER_LEN as usize {
            let start = cursor.position();
            let offset = cursor.absolute_position();
            let id = cursor.read_array::<16>().unwrap_or_default();
            let size = cursor.read_u64::<LittleEndian>().unwrap_or(0);
            if id == guid::HEADER || size < OBJECT_HEADER_LEN {
                let err = Error::malformed(
                    ContainerKind::Asf,
                    Tag::Guid(id).to_string(),
                    offset,
                    "invalid object size",
                );
                tree.record_issue("header sub-object", &err);
                let _ = cursor.set_position(start);
                break;
            }
            let _ = cursor.set_position(start);
            match self.read_object(cursor, tree) {
                Ok(node) => children.push(node),
                Err(e) => {
                    tree.record_issue("header sub-object", &e);
                    let _ = cursor.set_position(start);
                    break;
                }
            }
        }
        if !cursor.at_end() {
            let offset = cursor.absolute_position();
            let mut rest = ContainerNode::leaf(Tag::Padding, cursor.read_rest().to_vec());
            rest.offset = offset;
            children.push(rest);
        }
        children
    }

    fn header<'t>(&self, tree: &'t ContainerTree) -> Option<&'t ContainerNode> {
        tree.nodes.iter().find(|n| is_object(n, &guid::HEADER))
    }

    fn header_mut<'t>(&self, tree: &'t mut ContainerTree) -> Option<&'t mut ContainerNode> {
        tree.nodes.iter_mut().find(|n| is_object(n, &guid::HEADER))
    }

    fn content_description(&self, header: &ContainerNode) -> Option<ContentDescription> {
        let node = header.children.iter().find(|c| is_object(c, &guid::CONTENT_DESCRIPTION))?;
        match ContentDescription::parse(&node.payload) {
            Ok(cd) => Some(cd),
            Err(e) => {
                log_warn!("unreadable content description: {}", e);
                None
            }
        }
    }

    fn duration(props: &ContainerNode) -> Option<String> {
        let play = LittleEndian::read_u64(props.payload.get(40..48)?);
        let preroll = LittleEndian::read_u64(props.payload.get(56..64)?);
        let seconds = play as f64 / 10_000_000.0 - preroll as f64 / 1000.0;
        Some(format!("{:.3}", seconds.max(0.0)))
    }

    fn write_content(header: &mut ContainerNode, cd: &ContentDescription) -> Result<()> {
        let payload = cd.to_bytes()?;
        match header
            .children
            .iter_mut()
            .find(|c| is_object(c, &guid::CONTENT_DESCRIPTION))
        {
            Some(node) => node.payload = payload,
            None => {
                let at = header
                    .children
                    .iter()
                    .position(|c| is_object(c, &guid::FILE_PROPERTIES))
                    .map(|i| i + 1)
                    .unwrap_or(0);
                log_debug!(at, "inserting content description object");
                header
                    .children
                    .insert(at, ContainerNode::leaf(Tag::Guid(guid::CONTENT_DESCRIPTION), payload));
            }
        }
        Ok(())
    }
}

impl Default for AsfIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for AsfIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Asf
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Wma, MediaType::Wmv]
    }

    fn extensions() -> &'static [&'static str] {
        &["wmv", "wma", "asf"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["video/x-ms-wmv", "audio/x-ms-wma", "video/x-ms-asf"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        header.starts_with(&guid::HEADER).then_some(ContainerKind::Asf)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: true,
            can_strip: true,
            editable_fields: &CONTENT_FIELDS,
            notes: "Content Description strings; extended descriptors are view only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if !data.starts_with(&guid::HEADER) {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Asf,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Asf, Vec::new());
        let mut cursor = ByteCursor::new(data);
        while cursor.remaining() >= OBJECT_HEADER_LEN as usize {
            let start = cursor.position();
            match self.read_object(&mut cursor, &mut tree) {
                Ok(node) => tree.nodes.push(node),
                Err(e) => {
                    tree.record_issue("top-level object", &e);
                    cursor.set_position(start)?;
                    break;
                }
            }
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&ObjectFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        let (i, header) = tree
            .nodes
            .iter()
            .enumerate()
            .find(|(_, n)| is_object(n, &guid::HEADER))?;
        let j = header
            .children
            .iter()
            .position(|c| is_object(c, &guid::CONTENT_DESCRIPTION))?;
        Some(vec![i, j])
    }

    fn media_type(&self, tree: &ContainerTree) -> MediaType {
        let has_video = self.header(tree).is_some_and(|h| {
            h.children.iter().any(|c| {
                is_object(c, &guid::STREAM_PROPERTIES)
                    && c.payload.get(..16) == Some(&guid::VIDEO_MEDIA[..])
            })
        });
        if has_video {
            MediaType::Wmv
        } else {
            MediaType::Wma
        }
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        let Some(header) = self.header(tree) else {
            return fields;
        };
        for child in &header.children {
            if is_object(child, &guid::FILE_PROPERTIES) {
                if let Some(duration) = Self::duration(child) {
                    fields.push(MetadataField::new("Duration", duration, category::ASF));
                }
            } else if is_object(child, &guid::CONTENT_DESCRIPTION) {
                let Some(cd) = self.content_description(header) else { continue };
                for (name, value) in CONTENT_FIELDS.iter().zip(cd.0) {
                    if !value.is_empty() {
                        fields.push(MetadataField::new(*name, value, category::ASF).editable(true));
                    }
                }
            } else if is_object(child, &guid::EXTENDED_CONTENT_DESCRIPTION) {
                match extended_descriptors(&child.payload) {
                    Ok(pairs) => fields.extend(
                        pairs
                            .into_iter()
                            .map(|(k, v)| MetadataField::new(k, v, category::ASF_EXTENDED)),
                    ),
                    Err(e) => log_warn!("unreadable extended content description: {}", e),
                }
            }
        }
        fields
    }

    fn canonical_key(&self, key: &str) -> Option<String> {
        let key = key.trim();
        ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
            .map(|(_, name)| *name)
            .or_else(|| CONTENT_FIELDS.iter().copied().find(|f| f.eq_ignore_ascii_case(key)))
            .map(str::to_string)
    }

    fn apply_edits(&self, tree: &mut ContainerTree, ops: &[FieldOp]) -> Result<()> {
        let mut cd = self
            .header(tree)
            .and_then(|h| self.content_description(h))
            .unwrap_or_default();
        for op in ops {
            let slot = ContentDescription::slot(op.key()).ok_or_else(|| Error::UnsupportedField {
                key: op.key().to_string(),
                flavor: ContainerKind::Asf,
            })?;
            cd.0[slot] = match op {
                FieldOp::Set { value, .. } => value.clone(),
                FieldOp::Delete { .. } => String::new(),
            };
        }
        let header = self.header_mut(tree).ok_or_else(|| Error::NoEditableLocation {
            flavor: ContainerKind::Asf,
            supported: ContainerKind::editable(),
        })?;
        Self::write_content(header, &cd)
    }

    fn strip(&self, tree: &mut ContainerTree, mode: &StripMode) -> Result<()> {
        let cd = self.header(tree).and_then(|h| self.content_description(h));
        let Some(header) = self.header_mut(tree) else {
            return Ok(());
        };
        match mode {
            StripMode::All => header.children.retain(|c| {
                !is_object(c, &guid::CONTENT_DESCRIPTION)
                    && !is_object(c, &guid::EXTENDED_CONTENT_DESCRIPTION)
            }),
            _ => {
                if let Some(mut cd) = cd {
                    for (value, name) in cd.0.iter_mut().zip(CONTENT_FIELDS) {
                        if !mode.keeps(&MetadataField::new(name, value.as_str(), category::ASF)) {
                            value.clear();
                        }
                    }
                    if cd.is_empty() {
                        header.children.retain(|c| !is_object(c, &guid::CONTENT_DESCRIPTION));
                    } else {
                        Self::write_content(header, &cd)?;
                    }
                }
                for child in header.children.iter_mut() {
                    if is_object(child, &guid::EXTENDED_CONTENT_DESCRIPTION) {
                        child.payload = filter_descriptors(&child.payload, |name| {
                            mode.keeps(&MetadataField::new(name, "", category::ASF_EXTENDED))
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, tree: &mut ContainerTree) -> Result<()> {
        let mut total = tree.trailer.len() as u64;
        for node in &tree.nodes {
            total += measure(&ObjectFraming, node)?;
        }
        let Some(header) = self.header_mut(tree) else {
            return Ok(());
        };
        let count = header.children.iter().filter(|c| c.tag != Tag::Padding).count() as u32;
        if header.aux_header.len() >= 4 && LittleEndian::read_u32(&header.aux_header) != count {
            log_debug!(count, "rewriting header object count");
            LittleEndian::write_u32(&mut header.aux_header[..4], count);
        }
        let props = header
            .children
            .iter_mut()
            .find(|c| is_object(c, &guid::FILE_PROPERTIES));
        if let Some(props) = props {
            if let Some(field) = props.payload.get_mut(FILE_SIZE_AT..FILE_SIZE_AT + 8) {
                if LittleEndian::read_u64(field) != total {
                    log_debug!(total, "rewriting file size");
                    LittleEndian::write_u64(field, total);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::asf;

    #[test]
    fn test_round_trip_is_identical() {
        let file = asf::with_content(&["Song", "Band", "", "", ""]);
        let io = AsfIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(tree.issues.is_empty());
        io.finalize(&mut tree).unwrap();
        assert_eq!(io.encode(&tree).unwrap(), file);
    }

    #[test]
    fn test_extract() {
        let io = AsfIO::new();
        let tree = io.decode(&asf::with_content(&["Song", "Band", "", "", ""])).unwrap();
        let fields = io.extract(&tree);
        let title = fields.iter().find(|f| f.key == "Title").unwrap();
        assert_eq!(title.value, "Song");
        assert_eq!(title.category, category::ASF);
        assert!(title.editable);
        assert!(fields.iter().all(|f| f.key != "Copyright"));
        assert!(fields.iter().any(|f| {
            f.key == "WM/AlbumTitle" && f.value == "Record" && f.category == category::ASF_EXTENDED
        }));
        assert_eq!(io.media_type(&tree), MediaType::Wma);
    }

    #[test]
    fn test_edit_synthesizes_content_description() {
        let file = asf::minimal();
        let io = AsfIO::new();
        let mut tree = io.decode(&file).unwrap();
        assert!(io.metadata_location(&tree).is_none());

        io.apply_edits(&mut tree, &[FieldOp::Set { key: "Title".into(), value: "New".into() }])
            .unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();

        let tree = io.decode(&out).unwrap();
        assert!(tree.issues.is_empty());
        let header = io.header(&tree).unwrap();
        assert_eq!(LittleEndian::read_u32(&header.aux_header), header.children.len() as u32);
        let props = header.children.iter().find(|c| is_object(c, &guid::FILE_PROPERTIES)).unwrap();
        assert_eq!(LittleEndian::read_u64(&props.payload[16..24]), out.len() as u64);
        assert!(io.extract(&tree).iter().any(|f| f.key == "Title" && f.value == "New"));
    }

    #[test]
    fn test_canonical_key() {
        let io = AsfIO::new();
        assert_eq!(io.canonical_key("artist").as_deref(), Some("Author"));
        assert_eq!(io.canonical_key("RATING").as_deref(), Some("Rating"));
        assert_eq!(io.canonical_key("WM/Genre"), None);
    }

    #[test]
    fn test_strip_keep() {
        let io = AsfIO::new();
        let mut tree = io.decode(&asf::with_content(&["Song", "Band", "", "", ""])).unwrap();
        io.strip(&mut tree, &StripMode::Keep(vec!["author".into()])).unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();
        let fields = io.extract(&io.decode(&out).unwrap());
        assert!(fields.iter().any(|f| f.key == "Author"));
        assert!(fields.iter().all(|f| f.key != "Title" && f.category != category::ASF_EXTENDED));
    }

    #[test]
    fn test_strip_all() {
        let io = AsfIO::new();
        let mut tree = io.decode(&asf::with_content(&["Song", "", "", "", ""])).unwrap();
        io.strip(&mut tree, &StripMode::All).unwrap();
        io.finalize(&mut tree).unwrap();
        let out = io.encode(&tree).unwrap();
        let fields = io.extract(&io.decode(&out).unwrap());
        assert_eq!(fields.iter().map(|f| f.key.as_str()).collect::<Vec<_>>(), vec!["Duration"]);
    }
}
