//! Container trees and the size-propagating linearizer
//!
//! A [`ContainerTree`] is built fresh from one file's bytes, mutated in memory and
//! thrown away after it has been written back out. Linearization is generic: each flavor
//! only describes how a single node is framed ([`NodeFraming`]), and [`linearize`] walks
//! the tree bottom-up so that every ancestor's length field is derived from the lengths
//! its children actually serialize to. No flavor has to patch ancestor sizes by hand.

use crate::{
    error::{Error, Result},
    node::ContainerNode,
    ContainerKind,
};

/// Recursion guard for nested containers
pub const MAX_DEPTH: usize = 32;

/// Largest payload any single node may declare
pub const MAX_NODE_SIZE: u64 = 256 * 1024 * 1024;

/// Index path from the tree root to a node
pub type NodePath = Vec<usize>;

/// A structural problem found during lenient decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub offset: u64,
    pub node: String,
    pub reason: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}: {}", self.node, self.offset, self.reason)
    }
}

/// In-memory form of one container file
#[derive(Debug, Clone)]
pub struct ContainerTree {
    pub kind: ContainerKind,
    /// Fixed leading bytes that are not a node (signature, file header)
    pub header: Vec<u8>,
    pub nodes: Vec<ContainerNode>,
    /// Bytes after the node sequence copied through verbatim
    /// (JPEG scan data, FLAC frames, MPEG audio)
    pub trailer: Vec<u8>,
    /// Problems skipped over while decoding
    pub issues: Vec<ParseIssue>,
}

impl ContainerTree {
    pub fn new(kind: ContainerKind, header: Vec<u8>) -> Self {
        Self {
            kind,
            header,
            nodes: Vec::new(),
            trailer: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Record a recoverable decode failure and keep going
    pub fn record_issue(&mut self, node: impl Into<String>, err: &Error) {
        let offset = match err {
            Error::Truncated { offset, .. } => *offset,
            Error::MalformedContainer { offset, .. } => *offset,
            _ => 0,
        };
        let issue = ParseIssue {
            offset,
            node: node.into(),
            reason: err.to_string(),
        };
        log_warn!(flavor = %self.kind, %issue, "skipping unreadable data");
        self.issues.push(issue);
    }

    /// Fail if lenient decoding had to skip anything
    pub fn ensure_intact(&self) -> Result<()> {
        match self.issues.first() {
            None => Ok(()),
            Some(issue) => Err(Error::malformed(
                self.kind,
                issue.node.clone(),
                issue.offset,
                issue.reason.clone(),
            )),
        }
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&ContainerNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for &i in rest {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut ContainerNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for &i in rest {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }

    /// Index of the first top-level node with this four-character code
    pub fn top_index(&self, code: &[u8; 4]) -> Option<usize> {
        self.nodes.iter().position(|n| n.is(code))
    }

    pub fn top(&self, code: &[u8; 4]) -> Option<&ContainerNode> {
        self.nodes.iter().find(|n| n.is(code))
    }

    pub fn top_mut(&mut self, code: &[u8; 4]) -> Option<&mut ContainerNode> {
        self.nodes.iter_mut().find(|n| n.is(code))
    }

    /// Depth-first walk over every node with its depth
    pub fn walk(&self) -> Vec<(usize, &ContainerNode)> {
        fn visit<'a>(
            node: &'a ContainerNode,
            depth: usize,
            out: &mut Vec<(usize, &'a ContainerNode)>,
        ) {
            out.push((depth, node));
            for child in &node.children {
                visit(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for node in &self.nodes {
            visit(node, 0, &mut out);
        }
        out
    }
}

/// How one flavor frames a node on disk
///
/// The linearizer hands each method the length of the node's body
/// (`aux_header + payload + serialized children`) after the children have already been
/// measured, so a header never has to be fixed up after the fact.
pub trait NodeFraming {
    /// Flavor named in errors raised while linearizing
    fn kind(&self) -> ContainerKind;

    /// Bytes the header will occupy for this body length
    fn header_len(&self, node: &ContainerNode, body_len: u64) -> Result<u64>;

    fn write_header(&self, node: &ContainerNode, body_len: u64, out: &mut Vec<u8>) -> Result<()>;

    /// Bytes written after the body (checksum, pad byte, back-pointer)
    fn trailer_len(&self, _node: &ContainerNode, _body_len: u64) -> u64 {
        0
    }

    /// Append the trailer; `out[frame_start..]` is this node's header and body
    fn write_trailer(
        &self,
        _node: &ContainerNode,
        _body_len: u64,
        _out: &mut Vec<u8>,
        _frame_start: usize,
    ) -> Result<()> {
        Ok(())
    }
}

fn body_len<F: NodeFraming + ?Sized>(
    framing: &F,
    node: &ContainerNode,
    depth: usize,
) -> Result<u64> {
    let mut len = (node.aux_header.len() + node.payload.len()) as u64;
    for child in &node.children {
        len += measure_at(framing, child, depth + 1)?;
    }
    Ok(len)
}

fn measure_at<F: NodeFraming + ?Sized>(
    framing: &F,
    node: &ContainerNode,
    depth: usize,
) -> Result<u64> {
    if depth > MAX_DEPTH {
        return Err(depth_error(framing, node));
    }
    let body = body_len(framing, node, depth)?;
    Ok(framing.header_len(node, body)? + body + framing.trailer_len(node, body))
}

/// Total serialized length of a node, header and trailer included
pub fn measure<F: NodeFraming + ?Sized>(framing: &F, node: &ContainerNode) -> Result<u64> {
    measure_at(framing, node, 0)
}

fn depth_error<F: NodeFraming + ?Sized>(framing: &F, node: &ContainerNode) -> Error {
    Error::malformed(
        framing.kind(),
        node.tag.to_string(),
        node.offset,
        format!("nesting deeper than {} levels", MAX_DEPTH),
    )
}

/// Serialize a node sequence, recomputing every length from the bottom up
pub fn linearize<F: NodeFraming + ?Sized>(
    framing: &F,
    nodes: &[ContainerNode],
    out: &mut Vec<u8>,
) -> Result<u64> {
    let mut total = 0;
    for node in nodes {
        total += linearize_node(framing, node, out, 0)?;
    }
    Ok(total)
}

/// Write one node and return the number of bytes it occupies
fn linearize_node<F: NodeFraming + ?Sized>(
    framing: &F,
    node: &ContainerNode,
    out: &mut Vec<u8>,
    depth: usize,
) -> Result<u64> {
    if depth > MAX_DEPTH {
        return Err(depth_error(framing, node));
    }
    let body = body_len(framing, node, depth)?;
    let frame_start = out.len();
    framing.write_header(node, body, out)?;
    out.extend_from_slice(&node.aux_header);
    out.extend_from_slice(&node.payload);
    let mut children_len = 0;
    for child in &node.children {
        children_len += linearize_node(framing, child, out, depth + 1)?;
    }
    debug_assert_eq!(
        (node.aux_header.len() + node.payload.len()) as u64 + children_len,
        body
    );
    framing.write_trailer(node, body, out, frame_start)?;
    Ok((out.len() - frame_start) as u64)
}

/// Serialize a whole tree: header, nodes, trailer
pub fn linearize_tree<F: NodeFraming + ?Sized>(
    framing: &F,
    tree: &ContainerTree,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(tree.header.len() + tree.trailer.len() + 4096);
    out.extend_from_slice(&tree.header);
    linearize(framing, &tree.nodes, &mut out)?;
    out.extend_from_slice(&tree.trailer);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Tag, VarInt};

    /// 4-byte big-endian total length + fourcc, like an ISOBMFF box
    #[cfg(feature = "bmff")]
    struct SimpleBoxes;

    #[cfg(feature = "bmff")]
    impl NodeFraming for SimpleBoxes {
        fn kind(&self) -> ContainerKind {
            ContainerKind::Bmff
        }

        fn header_len(&self, _node: &ContainerNode, _body_len: u64) -> Result<u64> {
            Ok(8)
        }

        fn write_header(
            &self,
            node: &ContainerNode,
            body_len: u64,
            out: &mut Vec<u8>,
        ) -> Result<()> {
            out.extend_from_slice(&((body_len + 8) as u32).to_be_bytes());
            out.extend_from_slice(node.tag.fourcc().map(|c| &c[..]).unwrap_or(b"????"));
            Ok(())
        }
    }

    #[cfg(feature = "bmff")]
    fn leaf(code: &[u8; 4], payload: &[u8]) -> ContainerNode {
        ContainerNode::leaf(Tag::FourCc(*code), payload.to_vec())
    }

    #[cfg(feature = "bmff")]
    #[test]
    fn test_sizes_propagate_to_every_ancestor() {
        let inner =
            ContainerNode::container(Tag::FourCc(*b"ilst"), vec![], vec![leaf(b"data", b"abc")]);
        let outer = ContainerNode::container(Tag::FourCc(*b"moov"), vec![], vec![inner]);

        let mut out = Vec::new();
        let n = linearize(&SimpleBoxes, std::slice::from_ref(&outer), &mut out).unwrap();
        assert_eq!(n, 8 + 8 + 8 + 3);
        assert_eq!(&out[0..4], &27u32.to_be_bytes());
        assert_eq!(&out[8..12], &19u32.to_be_bytes());
        assert_eq!(&out[16..20], &11u32.to_be_bytes());

        // Growing the innermost payload by 5 grows each ancestor by exactly 5
        let mut grown = outer.clone();
        grown.children[0].children[0].payload.extend_from_slice(b"12345");
        let mut out2 = Vec::new();
        linearize(&SimpleBoxes, std::slice::from_ref(&grown), &mut out2).unwrap();
        assert_eq!(&out2[0..4], &32u32.to_be_bytes());
        assert_eq!(&out2[8..12], &24u32.to_be_bytes());
        assert_eq!(&out2[16..20], &16u32.to_be_bytes());
        assert_eq!(measure(&SimpleBoxes, &grown).unwrap(), 32);
    }

    #[cfg(feature = "bmff")]
    #[test]
    fn test_depth_guard() {
        let mut node = leaf(b"leaf", b"");
        for _ in 0..(MAX_DEPTH + 2) {
            node = ContainerNode::container(Tag::FourCc(*b"nest"), vec![], vec![node]);
        }
        let mut out = Vec::new();
        assert!(linearize(&SimpleBoxes, &[node], &mut out).is_err());
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_ensure_intact() {
        let mut tree = ContainerTree::new(ContainerKind::Png, vec![]);
        assert!(tree.ensure_intact().is_ok());
        tree.record_issue(
            "chunk",
            &Error::Truncated {
                offset: 42,
                needed: 8,
                available: 2,
            },
        );
        match tree.ensure_intact() {
            Err(Error::MalformedContainer { offset, .. }) => assert_eq!(offset, 42),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(feature = "bmff")]
    #[test]
    fn test_node_paths() {
        let mut tree = ContainerTree::new(ContainerKind::Bmff, vec![]);
        let mut moov =
            ContainerNode::container(Tag::FourCc(*b"moov"), vec![], vec![leaf(b"mvhd", b"")]);
        moov.declared_length = VarInt::new(16, 4);
        tree.nodes.push(leaf(b"ftyp", b""));
        tree.nodes.push(moov);
        assert!(tree.node_at(&[1, 0]).map(|n| n.is(b"mvhd")).unwrap_or(false));
        assert!(tree.node_at(&[1, 1]).is_none());
        assert_eq!(tree.top_index(b"moov"), Some(1));
        assert_eq!(tree.walk().len(), 3);
    }
}
