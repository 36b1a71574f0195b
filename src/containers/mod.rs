//! Container-specific codecs
//!
//! Each container flavor (ISOBMFF, PNG, RIFF, ...) has an I/O implementation that knows
//! how to decode that flavor's byte layout into a [`ContainerTree`], frame nodes when the
//! tree is linearized again, pull canonical [`MetadataField`]s out of it, and rewrite its
//! metadata-bearing nodes.

use crate::{
    error::{Error, Result},
    field::MetadataField,
    tree::{ContainerTree, NodePath},
    updates::{FieldOp, StripMode},
    MediaType,
};

/// Container format - defines how a file is structured on disk
///
/// Multiple media types can share the same container (e.g., BMFF holds MP4, MOV, HEIF;
/// RIFF holds WAV, AVI, WebP).
///
/// Note: The actual variants are determined by enabled features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// ISO Base Media File Format boxes (MP4, M4A, MOV, HEIF, AVIF)
    #[cfg(feature = "bmff")]
    Bmff,

    /// PNG chunks
    #[cfg(feature = "png")]
    Png,

    /// RIFF chunks (WAV, AVI, WebP) and big-endian IFF (AIFF)
    #[cfg(feature = "riff")]
    Riff,

    /// EBML elements (Matroska, WebM)
    #[cfg(feature = "ebml")]
    Ebml,

    /// ASF GUID objects (WMA, WMV)
    #[cfg(feature = "asf")]
    Asf,

    /// JPEG marker segments
    #[cfg(feature = "jpeg")]
    Jpeg,

    /// FLAC metadata blocks
    #[cfg(feature = "flac")]
    Flac,

    /// ID3v2 frames in front of an MPEG audio stream
    #[cfg(feature = "id3")]
    Id3,

    /// FLV tags carrying AMF0 script data
    #[cfg(feature = "flv")]
    Flv,

    /// GIF extension and image blocks
    #[cfg(feature = "gif")]
    Gif,

    /// Ogg pages (Vorbis, Opus)
    #[cfg(feature = "ogg")]
    Ogg,
}

/// What a container flavor can do
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub can_edit: bool,
    pub can_strip: bool,
    /// Canonical keys accepted by edit
    pub editable_fields: &'static [&'static str],
    pub notes: &'static str,
}

/// Capability summary of one container flavor
#[derive(Debug, Clone)]
pub struct FormatInfo {
    pub kind: ContainerKind,
    pub name: &'static str,
    pub media_types: &'static [MediaType],
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub can_view: bool,
    pub can_edit: bool,
    pub can_strip: bool,
    pub editable_fields: &'static [&'static str],
    pub notes: &'static str,
}

/// Trait for container-specific codecs
///
/// Each implementation handles one container flavor. Decoding is lenient: structural
/// problems past the outer signature are recorded on the tree as
/// [`ParseIssue`](crate::tree::ParseIssue)s and decoding stops there; only a wrong
/// signature is a hard [`Error::NotThisFormat`].
pub trait ContainerIO: Send + Sync {
    /// ContainerKind this implementation manages
    fn container_type() -> ContainerKind
    where
        Self: Sized;

    /// Media types this implementation can read/write
    fn supported_media_types() -> &'static [MediaType]
    where
        Self: Sized;

    /// File extensions this implementation accepts (e.g., ["mp4", "m4a"])
    fn extensions() -> &'static [&'static str]
    where
        Self: Sized;

    /// MIME types this implementation accepts
    fn mime_types() -> &'static [&'static str]
    where
        Self: Sized;

    /// Try to detect if this implementation can decode the given header
    fn detect(header: &[u8]) -> Option<ContainerKind>
    where
        Self: Sized;

    fn capabilities() -> Capabilities
    where
        Self: Sized;

    /// Decode a whole file into a tree
    fn decode(&self, data: &[u8]) -> Result<ContainerTree>;

    /// Linearize a tree, recomputing every length and checksum
    fn encode(&self, tree: &ContainerTree) -> Result<Vec<u8>>;

    /// Path to the metadata-bearing node, if the file has one
    fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath>;

    /// Specific media type held by this tree
    fn media_type(&self, tree: &ContainerTree) -> MediaType;

    /// Canonical fields, in file order
    fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField>;

    /// Native spelling for a caller-supplied key, `None` if the flavor has no mapping
    fn canonical_key(&self, _key: &str) -> Option<String> {
        None
    }

    /// Apply resolved set/delete operations, synthesizing the metadata node if needed
    fn apply_edits(&self, tree: &mut ContainerTree, _ops: &[FieldOp]) -> Result<()> {
        Err(Error::NoEditableLocation {
            flavor: tree.kind,
            supported: ContainerKind::editable(),
        })
    }

    /// Remove metadata according to `mode`
    fn strip(&self, tree: &mut ContainerTree, _mode: &StripMode) -> Result<()> {
        Err(Error::NoStrippableLocation {
            flavor: tree.kind,
            supported: ContainerKind::strippable(),
        })
    }

    /// Re-establish invariants that span nodes (absolute offsets, counts, file size
    /// fields) after the tree was mutated. A no-op on an unmodified tree.
    fn finalize(&self, _tree: &mut ContainerTree) -> Result<()> {
        Ok(())
    }
}

// Container I/O modules - pub(crate) so register_containers! macro can access them
#[cfg(feature = "bmff")]
pub(crate) mod bmff_io;

#[cfg(feature = "png")]
pub(crate) mod png_io;

#[cfg(feature = "riff")]
pub(crate) mod riff_io;

#[cfg(feature = "ebml")]
pub(crate) mod ebml_io;

#[cfg(feature = "asf")]
pub(crate) mod asf_io;

#[cfg(feature = "jpeg")]
pub(crate) mod jpeg_io;

#[cfg(feature = "flac")]
pub(crate) mod flac_io;

#[cfg(feature = "id3")]
pub(crate) mod id3_io;

#[cfg(feature = "flv")]
pub(crate) mod flv_io;

#[cfg(feature = "gif")]
pub(crate) mod gif_io;

#[cfg(feature = "ogg")]
pub(crate) mod ogg_io;

// ============================================================================
// ContainerKind Registration Macro
// ============================================================================

/// Register all supported container formats in one place
///
/// This macro generates:
/// - Handler enum for internal use (zero-cost dispatch)
/// - Handler implementation with container delegation
/// - detect_container() function
/// - get_handler() function
/// - Extension and MIME type lookup
/// - ContainerKind methods for names, MIME types, extensions and capabilities
///
/// Note: ContainerKind enum is defined separately above to avoid circular dependencies
macro_rules! register_containers {
    ($(
        $(#[$meta:meta])*
        $variant:ident => $module:ident :: $io:ident, $name:literal
    ),* $(,)?) => {
        // Generate Handler enum for internal use (zero-cost dispatch)
        pub(crate) enum Handler {
            $(
                $(#[$meta])*
                $variant($module::$io),
            )*
        }

        // Generate Handler implementation - delegates to specific I/O implementations
        #[allow(unreachable_patterns)]
        impl Handler {
            pub(crate) fn decode(&self, data: &[u8]) -> $crate::Result<ContainerTree> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.decode(data), )*
                }
            }

            pub(crate) fn encode(&self, tree: &ContainerTree) -> $crate::Result<Vec<u8>> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.encode(tree), )*
                }
            }

            pub(crate) fn metadata_location(&self, tree: &ContainerTree) -> Option<NodePath> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.metadata_location(tree), )*
                }
            }

            pub(crate) fn media_type(&self, tree: &ContainerTree) -> MediaType {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.media_type(tree), )*
                }
            }

            pub(crate) fn extract(&self, tree: &ContainerTree) -> Vec<MetadataField> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.extract(tree), )*
                }
            }

            pub(crate) fn canonical_key(&self, key: &str) -> Option<String> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.canonical_key(key), )*
                }
            }

            pub(crate) fn apply_edits(
                &self,
                tree: &mut ContainerTree,
                ops: &[FieldOp],
            ) -> $crate::Result<()> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.apply_edits(tree, ops), )*
                }
            }

            pub(crate) fn strip(
                &self,
                tree: &mut ContainerTree,
                mode: &StripMode,
            ) -> $crate::Result<()> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.strip(tree, mode), )*
                }
            }

            pub(crate) fn finalize(&self, tree: &mut ContainerTree) -> $crate::Result<()> {
                match self {
                    $( $(#[$meta])* Handler::$variant(h) => h.finalize(tree), )*
                }
            }
        }

        /// Detect container from the leading bytes of a file
        pub fn detect_container(header: &[u8]) -> $crate::Result<ContainerKind> {
            if header.len() < 2 {
                return Err($crate::Error::UnsupportedFormat);
            }

            $(
                $(#[$meta])*
                if let Some(container) = $module::$io::detect(header) {
                    return Ok(container);
                }
            )*

            Err($crate::Error::UnsupportedFormat)
        }

        /// Get handler for a container
        pub(crate) fn get_handler(container: ContainerKind) -> Handler {
            match container {
                $(
                    $(#[$meta])*
                    ContainerKind::$variant => Handler::$variant($module::$io::new()),
                )*
            }
        }

        /// Detect container from file extension
        pub fn detect_from_extension(ext: &str) -> Option<ContainerKind> {
            let ext_lower = ext.trim_start_matches('.').to_lowercase();
            $(
                $(#[$meta])*
                if $module::$io::extensions().contains(&ext_lower.as_str()) {
                    return Some($module::$io::container_type());
                }
            )*
            None
        }

        /// Detect container from MIME type
        pub fn detect_from_mime(mime: &str) -> Option<ContainerKind> {
            $(
                $(#[$meta])*
                if $module::$io::mime_types().iter().any(|m| m.eq_ignore_ascii_case(mime)) {
                    return Some($module::$io::container_type());
                }
            )*
            None
        }

        // Generate ContainerKind methods
        impl ContainerKind {
            /// Every container compiled into this build
            pub fn all() -> &'static [ContainerKind] {
                &[ $( $(#[$meta])* ContainerKind::$variant, )* ]
            }

            /// Short human-readable name
            pub fn name(&self) -> &'static str {
                match self {
                    $( $(#[$meta])* ContainerKind::$variant => $name, )*
                }
            }

            /// Get the primary MIME type for this container
            pub fn to_mime(&self) -> &'static str {
                self.mime_types()[0]
            }

            /// Get the primary file extension for this container
            pub fn to_extension(&self) -> &'static str {
                self.extensions()[0]
            }

            /// Get all supported media types for this container
            pub fn supported_media_types(&self) -> &'static [MediaType] {
                match self {
                    $(
                        $(#[$meta])*
                        ContainerKind::$variant => $module::$io::supported_media_types(),
                    )*
                }
            }

            /// Get all supported MIME types for this container
            pub fn mime_types(&self) -> &'static [&'static str] {
                match self {
                    $( $(#[$meta])* ContainerKind::$variant => $module::$io::mime_types(), )*
                }
            }

            /// Get all supported file extensions for this container
            pub fn extensions(&self) -> &'static [&'static str] {
                match self {
                    $( $(#[$meta])* ContainerKind::$variant => $module::$io::extensions(), )*
                }
            }

            /// Capability summary for this container
            pub fn info(&self) -> FormatInfo {
                let caps = match self {
                    $( $(#[$meta])* ContainerKind::$variant => $module::$io::capabilities(), )*
                };
                FormatInfo {
                    kind: *self,
                    name: self.name(),
                    media_types: self.supported_media_types(),
                    extensions: self.extensions(),
                    mime_types: self.mime_types(),
                    can_view: true,
                    can_edit: caps.can_edit,
                    can_strip: caps.can_strip,
                    editable_fields: caps.editable_fields,
                    notes: caps.notes,
                }
            }

            /// Containers whose metadata can be edited
            pub fn editable() -> Vec<ContainerKind> {
                Self::all().iter().copied().filter(|k| k.info().can_edit).collect()
            }

            /// Containers whose metadata can be stripped
            pub fn strippable() -> Vec<ContainerKind> {
                Self::all().iter().copied().filter(|k| k.info().can_strip).collect()
            }
        }

        impl std::fmt::Display for ContainerKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    };
}

// ============================================================================
// SINGLE POINT OF REGISTRATION
// Detection runs in this order; ID3 stays last because a bare MPEG frame sync is the
// weakest signature.
// ============================================================================
register_containers! {
    #[cfg(feature = "bmff")]
    Bmff => bmff_io::BmffIO, "ISOBMFF",

    #[cfg(feature = "png")]
    Png => png_io::PngIO, "PNG",

    #[cfg(feature = "riff")]
    Riff => riff_io::RiffIO, "RIFF",

    #[cfg(feature = "ebml")]
    Ebml => ebml_io::EbmlIO, "EBML",

    #[cfg(feature = "asf")]
    Asf => asf_io::AsfIO, "ASF",

    #[cfg(feature = "jpeg")]
    Jpeg => jpeg_io::JpegIO, "JPEG",

    #[cfg(feature = "flac")]
    Flac => flac_io::FlacIO, "FLAC",

    #[cfg(feature = "flv")]
    Flv => flv_io::FlvIO, "FLV",

    #[cfg(feature = "gif")]
    Gif => gif_io::GifIO, "GIF",

    #[cfg(feature = "ogg")]
    Ogg => ogg_io::OggIO, "Ogg",

    #[cfg(feature = "id3")]
    Id3 => id3_io::Id3IO, "ID3v2",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_container_is_viewable() {
        for kind in ContainerKind::all() {
            let info = kind.info();
            assert!(info.can_view);
            assert!(!info.extensions.is_empty(), "{} has no extensions", kind);
            assert!(!info.mime_types.is_empty(), "{} has no MIME types", kind);
        }
    }

    #[cfg(all(feature = "flac", feature = "jpeg", feature = "ebml"))]
    #[test]
    fn test_extension_and_mime_lookup() {
        assert_eq!(detect_from_extension("FLAC"), Some(ContainerKind::Flac));
        assert_eq!(detect_from_extension(".jpeg"), Some(ContainerKind::Jpeg));
        assert_eq!(detect_from_mime("video/webm"), Some(ContainerKind::Ebml));
        assert_eq!(detect_from_extension("docx"), None);
    }

    #[cfg(all(feature = "ebml", feature = "flac"))]
    #[test]
    fn test_capability_lists() {
        assert!(!ContainerKind::editable().contains(&ContainerKind::Ebml));
        assert!(ContainerKind::editable().contains(&ContainerKind::Flac));
        assert!(ContainerKind::strippable().contains(&ContainerKind::Ebml));
    }

    #[test]
    fn test_detect_rejects_tiny_input() {
        assert!(matches!(detect_container(&[0]), Err(Error::UnsupportedFormat)));
    }
}
