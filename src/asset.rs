//! File-level wrapper
//!
//! [`Asset`] owns (or maps) one file's bytes together with its detected container kind,
//! and forwards to the buffer-level [`view`](crate::view), [`edit`](crate::edit) and
//! [`strip`](crate::strip) operations.

use crate::{
    detect_container, detect_from_extension,
    error::{Error, Result},
    updates::{EditOutcome, EditRequest, StripOutcome, StripRequest},
    view::MetadataView,
    ContainerKind,
};
use std::fs;
use std::path::Path;

enum Source {
    Owned(Vec<u8>),
    #[cfg(feature = "memory-mapped")]
    Mapped(memmap2::Mmap),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Source::Owned(bytes) => bytes,
            #[cfg(feature = "memory-mapped")]
            Source::Mapped(map) => map,
        }
    }
}

/// A media file whose container kind has been detected
///
/// # Example
///
/// ```no_run
/// use media_surgery::{Asset, StripRequest};
///
/// # fn main() -> media_surgery::Result<()> {
/// let asset = Asset::open("clip.mp4")?;
/// println!("{} file", asset.kind());
///
/// let outcome = asset.strip(&StripRequest::all())?;
/// Asset::write_to("clip-clean.mp4", &outcome.output)?;
/// # Ok(())
/// # }
/// ```
pub struct Asset {
    source: Source,
    kind: ContainerKind,
}

impl Asset {
    /// Read a file into memory and detect its container
    ///
    /// Magic bytes decide; the file extension is only consulted when no signature
    /// matches.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let kind = detect(&bytes, path)?;
        Ok(Self {
            source: Source::Owned(bytes),
            kind,
        })
    }

    /// Map a file instead of reading it
    ///
    /// # Safety
    ///
    /// The file must not be modified or truncated by anyone while the asset is alive;
    /// see [`memmap2::Mmap::map`].
    #[cfg(feature = "memory-mapped")]
    pub unsafe fn open_with_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let map = memmap2::Mmap::map(&file)?;
        let kind = detect(&map, path)?;
        Ok(Self {
            source: Source::Mapped(map),
            kind,
        })
    }

    /// Wrap an in-memory buffer, detecting its container from magic bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let kind = detect_container(&bytes)?;
        Ok(Self {
            source: Source::Owned(bytes),
            kind,
        })
    }

    /// Wrap an in-memory buffer whose container kind is already known
    pub fn with_kind(bytes: Vec<u8>, kind: ContainerKind) -> Self {
        Self {
            source: Source::Owned(bytes),
            kind,
        }
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    pub fn view(&self) -> Result<MetadataView> {
        crate::view(self.bytes(), self.kind)
    }

    /// Edit a copy of the file; the asset itself is never modified
    pub fn edit(&self, request: &EditRequest) -> Result<EditOutcome> {
        crate::edit(self.bytes(), self.kind, request)
    }

    /// Strip a copy of the file; the asset itself is never modified
    pub fn strip(&self, request: &StripRequest) -> Result<StripOutcome> {
        crate::strip(self.bytes(), self.kind, request)
    }

    /// Write output bytes to `path`, creating or truncating it
    pub fn write_to<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("kind", &self.kind)
            .field("len", &self.bytes().len())
            .finish()
    }
}

fn detect(bytes: &[u8], path: &Path) -> Result<ContainerKind> {
    match detect_container(bytes) {
        Ok(kind) => Ok(kind),
        Err(Error::UnsupportedFormat) => path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(detect_from_extension)
            .ok_or(Error::UnsupportedFormat),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "flac")]
    #[test]
    fn test_from_bytes_detects_kind() {
        let asset = Asset::from_bytes(crate::test_utils::flac::minimal()).unwrap();
        assert_eq!(asset.kind(), ContainerKind::Flac);
        assert_eq!(asset.view().unwrap().format, "FLAC");
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        let err = Asset::from_bytes(vec![0x00; 64]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat));
    }

    #[cfg(feature = "id3")]
    #[test]
    fn test_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headerless.mp3");
        // No ID3 tag and no frame sync: only the extension identifies it
        fs::write(&path, [0x00u8; 32]).unwrap();
        let asset = Asset::open(&path).unwrap();
        assert_eq!(asset.kind(), ContainerKind::Id3);
    }
}
