//! Flavor-agnostic container nodes
//!
//! Every container flavor decodes into the same shape: an ordered forest of
//! [`ContainerNode`]s. A node carries its type tag, the length exactly as it was declared
//! in the source (a [`VarInt`], so the original encoded width survives a round trip), an
//! optional auxiliary header (version/flags, list sub-type, ...), a raw payload, and child
//! nodes for container types.
//!
//! The serialized form of a node is always
//! `header(tag, length) + aux_header + payload + children + trailer`; the per-flavor
//! [`NodeFraming`](crate::tree::NodeFraming) decides what header and trailer look like.

use std::fmt;

/// An integer together with the number of bytes it was encoded in.
///
/// Used for EBML sizes (1-8 bytes) and ISOBMFF box sizes (4 bytes, or 8 for the
/// 64-bit extended form). A width of `0` marks a freshly synthesized node whose width
/// should be chosen minimally when it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarInt {
    pub value: u64,
    pub width: u8,
}

impl VarInt {
    pub const fn new(value: u64, width: u8) -> Self {
        Self { value, width }
    }

    /// Width not yet fixed by any source bytes
    pub const fn synthesized() -> Self {
        Self { value: 0, width: 0 }
    }

    pub fn is_synthesized(&self) -> bool {
        self.width == 0
    }

    /// EBML "unknown size": every value bit set for the encoded width
    pub fn is_ebml_unknown(&self) -> bool {
        (1..=8).contains(&self.width) && self.value == ebml_max(self.width)
    }

    /// Smallest EBML width able to hold `value` without colliding with the reserved
    /// all-ones pattern
    pub fn ebml_width_for(value: u64) -> u8 {
        (1..=8u8).find(|&w| value < ebml_max(w)).unwrap_or(8)
    }
}

/// Largest value representable in an EBML vint of `width` bytes (the all-ones pattern)
pub(crate) fn ebml_max(width: u8) -> u64 {
    if width >= 8 {
        (1u64 << 56) - 1
    } else {
        (1u64 << (7 * width as u32)) - 1
    }
}

/// Type tag of a node, one shape per family of flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Four-character code: ISOBMFF boxes, PNG/RIFF chunks, ID3v2 frames
    FourCc([u8; 4]),
    /// EBML element id, marker bits included (e.g. `0x1A45DFA3`)
    Ebml(u32),
    /// ASF object GUID in on-disk byte order
    Guid([u8; 16]),
    /// JPEG marker byte (the byte after `0xFF`)
    Marker(u8),
    /// FLAC metadata block type or FLV tag type
    Block(u8),
    /// Raw filler bytes with no framing of their own (ID3v2 padding)
    Padding,
}

impl Tag {
    pub fn fourcc(&self) -> Option<&[u8; 4]> {
        match self {
            Tag::FourCc(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Latin-1 so that iTunes atoms print as "©nam"
            Tag::FourCc(code) => {
                let s: String = code.iter().map(|&b| b as char).collect();
                write!(f, "'{}'", s)
            }
            Tag::Ebml(id) => write!(f, "0x{:X}", id),
            Tag::Guid(g) => write!(
                f,
                "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6],
                g[8], g[9], g[10], g[11], g[12], g[13], g[14], g[15]
            ),
            Tag::Marker(m) => write!(f, "0xFF{:02X}", m),
            Tag::Block(t) => write!(f, "block type {}", t),
            Tag::Padding => write!(f, "padding"),
        }
    }
}

/// One node of a container tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    pub tag: Tag,
    /// Length field as found in the source
    pub declared_length: VarInt,
    /// Fixed bytes between the header and the children (e.g. `meta` version/flags,
    /// RIFF list type, ASF header object count)
    pub aux_header: Vec<u8>,
    pub payload: Vec<u8>,
    pub children: Vec<ContainerNode>,
    /// Last-block flag (FLAC); on RIFF, an odd-sized final chunk stored without its
    /// pad byte
    pub is_last: bool,
    /// Offset of the node header in the source, `0` for synthesized nodes
    pub offset: u64,
}

impl ContainerNode {
    /// A synthesized leaf node
    pub fn leaf(tag: Tag, payload: Vec<u8>) -> Self {
        Self {
            tag,
            declared_length: VarInt::synthesized(),
            aux_header: Vec::new(),
            payload,
            children: Vec::new(),
            is_last: false,
            offset: 0,
        }
    }

    /// A synthesized container node
    pub fn container(tag: Tag, aux_header: Vec<u8>, children: Vec<ContainerNode>) -> Self {
        Self {
            tag,
            declared_length: VarInt::synthesized(),
            aux_header,
            payload: Vec::new(),
            children,
            is_last: false,
            offset: 0,
        }
    }

    pub fn is(&self, code: &[u8; 4]) -> bool {
        self.tag == Tag::FourCc(*code)
    }

    pub fn child(&self, code: &[u8; 4]) -> Option<&ContainerNode> {
        self.children.iter().find(|c| c.is(code))
    }

    pub fn child_mut(&mut self, code: &[u8; 4]) -> Option<&mut ContainerNode> {
        self.children.iter_mut().find(|c| c.is(code))
    }

    pub fn child_index(&self, code: &[u8; 4]) -> Option<usize> {
        self.children.iter().position(|c| c.is(code))
    }

    /// Follow a chain of four-character codes down from this node
    pub fn descend(&self, path: &[&[u8; 4]]) -> Option<&ContainerNode> {
        path.iter().try_fold(self, |node, code| node.child(code))
    }

    pub fn descend_mut(&mut self, path: &[&[u8; 4]]) -> Option<&mut ContainerNode> {
        let mut node = self;
        for code in path {
            node = node.child_mut(code)?;
        }
        Some(node)
    }

    /// Number of nodes in this subtree, including this one
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebml_unknown_size() {
        assert!(VarInt::new(0x7F, 1).is_ebml_unknown());
        assert!(VarInt::new(0x00FF_FFFF_FFFF_FFFF, 8).is_ebml_unknown());
        assert!(!VarInt::new(0x7E, 1).is_ebml_unknown());
        assert!(!VarInt::synthesized().is_ebml_unknown());
    }

    #[test]
    fn test_ebml_width_avoids_reserved_pattern() {
        assert_eq!(VarInt::ebml_width_for(0), 1);
        assert_eq!(VarInt::ebml_width_for(126), 1);
        // 127 would be all ones in one byte
        assert_eq!(VarInt::ebml_width_for(127), 2);
        assert_eq!(VarInt::ebml_width_for(16382), 2);
        assert_eq!(VarInt::ebml_width_for(16383), 3);
    }

    #[test]
    fn test_descend() {
        let ilst = ContainerNode::container(Tag::FourCc(*b"ilst"), vec![], vec![]);
        let meta = ContainerNode::container(Tag::FourCc(*b"meta"), vec![0; 4], vec![ilst]);
        let udta = ContainerNode::container(Tag::FourCc(*b"udta"), vec![], vec![meta]);
        assert!(udta.descend(&[b"meta", b"ilst"]).is_some());
        assert!(udta.descend(&[b"ilst"]).is_none());
        assert_eq!(udta.subtree_len(), 3);
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::FourCc([0xA9, b'n', b'a', b'm']).to_string(), "'©nam'");
        assert_eq!(Tag::Marker(0xE1).to_string(), "0xFFE1");
        let guid = [
            0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
            0xCE, 0x6C,
        ];
        assert_eq!(
            Tag::Guid(guid).to_string(),
            "75B22633-668E-11CF-A6D9-00AA0062CE6C"
        );
    }
}
