//! Ogg container I/O implementation
//!
//! Every page is a top-level node tagged `OggS`. The rest of the fixed page header
//! (version, header type, granule position, serial, sequence, CRC, segment count and
//! lacing table) is the node's aux header and the page data is its payload. The page CRC
//! is recomputed whenever a page is written.
//!
//! Metadata is the comment header, the second packet of the first logical stream, read
//! with the same Vorbis comment parser FLAC uses. Ogg is view only.

use super::{Capabilities, ContainerIO, ContainerKind};
use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    field::{category, MetadataField},
    node::{ContainerNode, Tag},
    tree::{linearize_tree, ContainerTree, NodeFraming, NodePath},
    vorbis::VorbisComments,
    MediaType,
};
use byteorder::{ByteOrder, LittleEndian};

const CAPTURE: &[u8; 4] = b"OggS";

/// Page header after the capture pattern, up to and including the segment count
const FIXED_LEN: usize = 23;

// Offsets inside the aux header
const SERIAL_AT: usize = 10;
const CRC_AT: usize = 18;
const LACING_AT: usize = 23;

/// CRC-32 of a page: polynomial 0x04C11DB7, MSB first, no reflection, zero init
pub(crate) fn page_crc(bytes: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in bytes {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Codec of a logical stream, from its first packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Vorbis,
    Opus,
    Flac,
    Theora,
    Unknown,
}

impl Codec {
    fn identify(packet: &[u8]) -> Self {
        if packet.starts_with(b"\x01vorbis") {
            Codec::Vorbis
        } else if packet.starts_with(b"OpusHead") {
            Codec::Opus
        } else if packet.starts_with(b"\x7FFLAC") {
            Codec::Flac
        } else if packet.starts_with(b"\x80theora") {
            Codec::Theora
        } else {
            Codec::Unknown
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Codec::Vorbis => "Vorbis",
            Codec::Opus => "Opus",
            Codec::Flac => "FLAC",
            Codec::Theora => "Theora",
            Codec::Unknown => "unknown",
        }
    }

    /// The comment list inside this codec's comment header
    fn comment_list<'a>(&self, packet: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            Codec::Vorbis => packet.strip_prefix(b"\x03vorbis"),
            Codec::Opus => packet.strip_prefix(b"OpusTags"),
            Codec::Theora => packet.strip_prefix(b"\x81theora"),
            // A FLAC metadata block: type 4 is VORBIS_COMMENT
            Codec::Flac if packet.first().map(|b| b & 0x7F) == Some(4) => packet.get(4..),
            _ => None,
        }
    }
}

fn serial(node: &ContainerNode) -> Option<u32> {
    node.aux_header
        .get(SERIAL_AT..SERIAL_AT + 4)
        .map(LittleEndian::read_u32)
}

fn lacing(node: &ContainerNode) -> &[u8] {
    node.aux_header.get(LACING_AT..).unwrap_or(&[])
}

/// `OggS`, with the CRC patched in once the whole page is written
struct PageFraming;

impl NodeFraming for PageFraming {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ogg
    }

    fn header_len(&self, _node: &ContainerNode, _body_len: u64) -> Result<u64> {
        Ok(CAPTURE.len() as u64)
    }

    fn write_header(&self, node: &ContainerNode, _body_len: u64, out: &mut Vec<u8>) -> Result<()> {
        let laced: usize = lacing(node).iter().map(|&b| b as usize).sum();
        if !node.is(CAPTURE) || node.aux_header.len() < FIXED_LEN || laced != node.payload.len() {
            return Err(Error::malformed(
                ContainerKind::Ogg,
                node.tag.to_string(),
                node.offset,
                format!("lacing covers {} of {} data bytes", laced, node.payload.len()),
            ));
        }
        out.extend_from_slice(CAPTURE);
        Ok(())
    }

    fn write_trailer(
        &self,
        node: &ContainerNode,
        _body_len: u64,
        out: &mut Vec<u8>,
        frame_start: usize,
    ) -> Result<()> {
        let at = frame_start + CAPTURE.len() + CRC_AT;
        if out.len() < at + 4 {
            return Err(Error::malformed(
                ContainerKind::Ogg,
                node.tag.to_string(),
                node.offset,
                "page header too short for its CRC",
            ));
        }
        out[at..at + 4].fill(0);
        let crc = page_crc(&out[frame_start..]);
        LittleEndian::write_u32(&mut out[at..at + 4], crc);
        Ok(())
    }
}

/// Ogg container I/O implementation
pub struct OggIO;

impl OggIO {
    pub fn new() -> Self {
        Self
    }

    fn read_page(&self, cursor: &mut ByteCursor, tree: &mut ContainerTree) -> Result<()> {
        let offset = cursor.absolute_position();
        if cursor.read_array::<4>()? != *CAPTURE {
            return Err(Error::malformed(
                ContainerKind::Ogg,
                "page",
                offset,
                "missing OggS capture pattern",
            ));
        }
        let fixed = cursor.read_bytes(FIXED_LEN)?;
        if fixed[0] != 0 {
            return Err(Error::malformed(
                ContainerKind::Ogg,
                "page",
                offset,
                format!("unsupported stream structure version {}", fixed[0]),
            ));
        }
        let lacing = cursor.read_bytes(fixed[FIXED_LEN - 1] as usize)?;
        let data_len = lacing.iter().map(|&b| b as usize).sum();
        let data = cursor.read_bytes(data_len)?;

        let mut node = ContainerNode::leaf(Tag::FourCc(*CAPTURE), data.to_vec());
        node.aux_header = [fixed, lacing].concat();
        node.offset = offset;

        let stored = LittleEndian::read_u32(&fixed[CRC_AT..CRC_AT + 4]);
        let mut page = CAPTURE.to_vec();
        page.extend_from_slice(&node.aux_header);
        page[CAPTURE.len() + CRC_AT..CAPTURE.len() + CRC_AT + 4].fill(0);
        page.extend_from_slice(data);
        if page_crc(&page) != stored {
            log_warn!(offset, "CRC mismatch in Ogg page, will be rewritten");
        }

        tree.nodes.push(node);
        Ok(())
    }

    /// First `count` packets of the stream the file starts with
    fn leading_packets(tree: &ContainerTree, count: usize) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(count);
        let first = match tree.nodes.first().and_then(serial) {
            Some(first) => first,
            None => return packets,
        };
        let mut current = Vec::new();
        for node in tree.nodes.iter().filter(|n| serial(n) == Some(first)) {
            let mut at = 0;
            for &len in lacing(node) {
                let end = (at + len as usize).min(node.payload.len());
                current.extend_from_slice(&node.payload[at..end]);
                at = end;
                if len < 255 {
                    packets.push(std::mem::take(&mut current));
                    if packets.len() == count {
                        return packets;
                    }
                }
            }
        }
        packets
    }

    fn codec(tree: &ContainerTree) -> Codec {
        Self::leading_packets(tree, 1)
            .first()
            .map(|p| Codec::identify(p))
            .unwrap_or(Codec::Unknown)
    }
}

impl Default for OggIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for OggIO {
    fn container_type() -> ContainerKind {
        ContainerKind::Ogg
    }

    fn supported_media_types() -> &'static [MediaType] {
        &[MediaType::Ogg, MediaType::Opus]
    }

    fn extensions() -> &'static [&'static str] {
        &["ogg", "oga", "opus", "ogv"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["audio/ogg", "audio/opus", "video/ogg", "application/ogg"]
    }

    fn detect(header: &[u8]) -> Option<ContainerKind> {
        header.starts_with(CAPTURE).then_some(ContainerKind::Ogg)
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            can_edit: false,
            can_strip: false,
            editable_fields: &[],
            notes: "Vorbis comments of the first logical stream; view only",
        }
    }

    fn decode(&self, data: &[u8]) -> Result<ContainerTree> {
        if Self::detect(data).is_none() {
            return Err(Error::NotThisFormat {
                flavor: ContainerKind::Ogg,
            });
        }
        let mut tree = ContainerTree::new(ContainerKind::Ogg, Vec::new());
        let mut cursor = ByteCursor::new(data);
        while !cursor.at_end() {
            let start = cursor.position();
            if let Err(e) = self.read_page(&mut cursor, &mut tree) {
                tree.record_issue("page", &e);
                cursor.set_position(start)?;
                break;
            }
        }
        tree.trailer = cursor.read_rest().to_vec();
        Ok(tree)
    }

    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>> {
        linearize_tree(&PageFraming, tree)
    }

    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
        // Comment headers start on the page after the identification header
        let first = tree.nodes.first().and_then(serial)?;
        tree.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| serial(n) == Some(first))
            .nth(1)
            .map(|(i, _)| vec![i])
    }

    fn media_type(&self, tree: &ContainerTree) -> MediaType {
        match Self::codec(tree) {
            Codec::Opus => MediaType::Opus,
            _ => MediaType::Ogg,
        }
    }

    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
        let packets = Self::leading_packets(tree, 2);
        let codec = packets
            .first()
            .map(|p| Codec::identify(p))
            .unwrap_or(Codec::Unknown);
        let mut fields = vec![MetadataField::new("Codec", codec.name(), category::OGG)];

        let list = match packets.get(1).and_then(|p| codec.comment_list(p)) {
            Some(list) => list,
            None => return fields,
        };
        match VorbisComments::parse(ContainerKind::Ogg, list) {
            Ok(vc) => {
                fields.push(MetadataField::new("Vendor", vc.vendor(), category::OGG));
                fields.extend(
                    vc.fields()
                        .into_iter()
                        .map(|(key, value)| MetadataField::new(key, value, category::VORBIS)),
                );
            }
            Err(e) => log_warn!("unreadable {} comment header: {}", codec.name(), e),
        }
        fields
    }
}
