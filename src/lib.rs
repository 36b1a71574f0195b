//! Lossless view, edit and strip of metadata inside binary media containers.
//!
//! Every supported file is decoded into one flavor-agnostic [`ContainerTree`] of
//! length-prefixed nodes. Metadata is read from the tree as canonical
//! [`MetadataField`]s, mutated at the node level, and written back by re-linearizing the
//! tree with every length, checksum and back-pointer recomputed from the bottom up.
//! Untouched nodes come out byte-identical.
//!
//! # Design Principles
//!
//! - **One tree shape**: ISOBMFF boxes, PNG/RIFF chunks, EBML elements, ASF objects,
//!   JPEG segments, FLAC blocks, ID3v2 frames, FLV tags, GIF blocks and Ogg pages all
//!   become [`ContainerNode`]s
//! - **Lengths are derived**: a node's declared length is recomputed on encode, never
//!   patched by hand
//! - **Lenient view, strict write**: View tolerates damaged files and reports
//!   [`ParseIssue`]s; Edit and Strip refuse them, and re-decode their own output before
//!   returning it
//!
//! # Quick Start
//!
//! ```no_run
//! use media_surgery::{Asset, EditRequest, StripRequest};
//!
//! # fn main() -> media_surgery::Result<()> {
//! let asset = Asset::open("song.flac")?;
//!
//! for field in asset.view()?.fields {
//!     println!("{}", field);
//! }
//!
//! let outcome = asset.edit(&EditRequest::new().set("title", "New Title"))?;
//! for change in &outcome.changes {
//!     println!("{}", change);
//! }
//! if let Some(bytes) = outcome.output {
//!     Asset::write_to("song-edited.flac", &bytes)?;
//! }
//!
//! let stripped = asset.strip(&StripRequest::keep(["Copyright"]))?;
//! Asset::write_to("song-clean.flac", &stripped.output)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Buffer API
//!
//! ```no_run
//! use media_surgery::{detect_container, view, StripRequest};
//!
//! # fn main() -> media_surgery::Result<()> {
//! let data = std::fs::read("photo.jpg")?;
//! let kind = detect_container(&data)?;
//! let report = view(&data, kind)?;
//! println!("{}: {} fields", report.format, report.fields.len());
//!
//! let clean = media_surgery::strip(&data, kind, &StripRequest::gps_only())?;
//! std::fs::write("photo-nogps.jpg", clean.output)?;
//! # Ok(())
//! # }
//! ```

// Logging goes through these so the crate builds with or without `tracing`
#[cfg(feature = "tracing")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {{}};
}

mod asset;
mod containers;
mod cursor;
mod edit;
mod error;
mod field;
mod media_type;
mod node;
mod strip;
mod text;
mod tiff;
mod tree;
mod updates;
mod view;

#[cfg(feature = "flv")]
mod amf0;
#[cfg(feature = "jpeg")]
mod iptc;
#[cfg(any(feature = "flac", feature = "ogg"))]
mod vorbis;
#[cfg(feature = "xmp")]
pub mod xmp;

pub use asset::Asset;
pub use containers::{
    detect_container, detect_from_extension, detect_from_mime, Capabilities, ContainerIO,
    ContainerKind, FormatInfo,
};
pub use edit::edit;
pub use error::{Error, Result};
pub use field::{category, FieldChange, MetadataField};
pub use media_type::MediaType;
pub use node::{ContainerNode, Tag, VarInt};
pub use strip::strip;
pub use tree::{ContainerTree, ParseIssue, MAX_DEPTH, MAX_NODE_SIZE};
pub use updates::{EditOutcome, EditRequest, FieldOp, StripMode, StripOutcome, StripRequest};
pub use view::{view, MetadataView};

pub(crate) use containers::get_handler;

// Synthetic-file builders - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Fields of an XMP packet embedded in any container
pub(crate) fn xmp_fields(packet: &[u8]) -> Vec<MetadataField> {
    #[cfg(feature = "xmp")]
    {
        xmp::extract_fields(packet)
    }
    #[cfg(not(feature = "xmp"))]
    {
        vec![MetadataField::new(
            "XMP",
            format!("<{} bytes>", packet.len()),
            category::XMP,
        )]
    }
}
