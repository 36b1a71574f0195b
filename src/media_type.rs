//! Media type definitions
//!
//! This module defines the specific media types that can be stored in the supported
//! container formats. The media type is what [`view`](crate::view) reports as the format
//! label.

use crate::ContainerKind;

/// Specific media type - what the content represents
///
/// While a [`ContainerKind`] defines how a file is structured (boxes, chunks,
/// elements...), a `MediaType` defines what the content actually is. Several media types
/// share one container: BMFF holds MP4, M4A, MOV, HEIF and AVIF; RIFF holds WAV, AVI and
/// WebP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    #[cfg(feature = "bmff")]
    Mp4,
    #[cfg(feature = "bmff")]
    M4a,
    #[cfg(feature = "bmff")]
    QuickTime,
    #[cfg(feature = "bmff")]
    Heif,
    #[cfg(feature = "bmff")]
    Avif,

    #[cfg(feature = "png")]
    Png,

    #[cfg(feature = "riff")]
    Wav,
    #[cfg(feature = "riff")]
    Avi,
    #[cfg(feature = "riff")]
    WebP,
    #[cfg(feature = "riff")]
    Aiff,

    #[cfg(feature = "ebml")]
    Matroska,
    #[cfg(feature = "ebml")]
    WebM,

    #[cfg(feature = "asf")]
    Wma,
    #[cfg(feature = "asf")]
    Wmv,

    #[cfg(feature = "jpeg")]
    Jpeg,

    #[cfg(feature = "flac")]
    Flac,

    #[cfg(feature = "id3")]
    Mp3,

    #[cfg(feature = "flv")]
    Flv,

    #[cfg(feature = "gif")]
    Gif,

    #[cfg(feature = "ogg")]
    Ogg,
    #[cfg(feature = "ogg")]
    Opus,
}

impl MediaType {
    /// Human-readable format label
    ///
    /// # Example
    ///
    /// ```
    /// # #[cfg(feature = "flac")]
    /// # {
    /// use media_surgery::MediaType;
    ///
    /// assert_eq!(MediaType::Flac.name(), "FLAC");
    /// # }
    /// ```
    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "bmff")]
            MediaType::Mp4 => "MP4",
            #[cfg(feature = "bmff")]
            MediaType::M4a => "M4A",
            #[cfg(feature = "bmff")]
            MediaType::QuickTime => "QuickTime MOV",
            #[cfg(feature = "bmff")]
            MediaType::Heif => "HEIF",
            #[cfg(feature = "bmff")]
            MediaType::Avif => "AVIF",
            #[cfg(feature = "png")]
            MediaType::Png => "PNG",
            #[cfg(feature = "riff")]
            MediaType::Wav => "WAV",
            #[cfg(feature = "riff")]
            MediaType::Avi => "AVI",
            #[cfg(feature = "riff")]
            MediaType::WebP => "WebP",
            #[cfg(feature = "riff")]
            MediaType::Aiff => "AIFF",
            #[cfg(feature = "ebml")]
            MediaType::Matroska => "Matroska",
            #[cfg(feature = "ebml")]
            MediaType::WebM => "WebM",
            #[cfg(feature = "asf")]
            MediaType::Wma => "WMA",
            #[cfg(feature = "asf")]
            MediaType::Wmv => "WMV",
            #[cfg(feature = "jpeg")]
            MediaType::Jpeg => "JPEG",
            #[cfg(feature = "flac")]
            MediaType::Flac => "FLAC",
            #[cfg(feature = "id3")]
            MediaType::Mp3 => "MP3",
            #[cfg(feature = "flv")]
            MediaType::Flv => "FLV",
            #[cfg(feature = "gif")]
            MediaType::Gif => "GIF",
            #[cfg(feature = "ogg")]
            MediaType::Ogg => "Ogg",
            #[cfg(feature = "ogg")]
            MediaType::Opus => "Opus",
        }
    }

    /// Get the container format for this media type
    pub fn container(&self) -> ContainerKind {
        match self {
            #[cfg(feature = "bmff")]
            MediaType::Mp4
            | MediaType::M4a
            | MediaType::QuickTime
            | MediaType::Heif
            | MediaType::Avif => ContainerKind::Bmff,
            #[cfg(feature = "png")]
            MediaType::Png => ContainerKind::Png,
            #[cfg(feature = "riff")]
            MediaType::Wav | MediaType::Avi | MediaType::WebP | MediaType::Aiff => {
                ContainerKind::Riff
            }
            #[cfg(feature = "ebml")]
            MediaType::Matroska | MediaType::WebM => ContainerKind::Ebml,
            #[cfg(feature = "asf")]
            MediaType::Wma | MediaType::Wmv => ContainerKind::Asf,
            #[cfg(feature = "jpeg")]
            MediaType::Jpeg => ContainerKind::Jpeg,
            #[cfg(feature = "flac")]
            MediaType::Flac => ContainerKind::Flac,
            #[cfg(feature = "id3")]
            MediaType::Mp3 => ContainerKind::Id3,
            #[cfg(feature = "flv")]
            MediaType::Flv => ContainerKind::Flv,
            #[cfg(feature = "gif")]
            MediaType::Gif => ContainerKind::Gif,
            #[cfg(feature = "ogg")]
            MediaType::Ogg | MediaType::Opus => ContainerKind::Ogg,
        }
    }

    /// Get the primary MIME type for this media type
    pub fn to_mime(&self) -> &'static str {
        match self {
            #[cfg(feature = "bmff")]
            MediaType::Mp4 => "video/mp4",
            #[cfg(feature = "bmff")]
            MediaType::M4a => "audio/mp4",
            #[cfg(feature = "bmff")]
            MediaType::QuickTime => "video/quicktime",
            #[cfg(feature = "bmff")]
            MediaType::Heif => "image/heif",
            #[cfg(feature = "bmff")]
            MediaType::Avif => "image/avif",
            #[cfg(feature = "png")]
            MediaType::Png => "image/png",
            #[cfg(feature = "riff")]
            MediaType::Wav => "audio/wav",
            #[cfg(feature = "riff")]
            MediaType::Avi => "video/x-msvideo",
            #[cfg(feature = "riff")]
            MediaType::WebP => "image/webp",
            #[cfg(feature = "riff")]
            MediaType::Aiff => "audio/aiff",
            #[cfg(feature = "ebml")]
            MediaType::Matroska => "video/x-matroska",
            #[cfg(feature = "ebml")]
            MediaType::WebM => "video/webm",
            #[cfg(feature = "asf")]
            MediaType::Wma => "audio/x-ms-wma",
            #[cfg(feature = "asf")]
            MediaType::Wmv => "video/x-ms-wmv",
            #[cfg(feature = "jpeg")]
            MediaType::Jpeg => "image/jpeg",
            #[cfg(feature = "flac")]
            MediaType::Flac => "audio/flac",
            #[cfg(feature = "id3")]
            MediaType::Mp3 => "audio/mpeg",
            #[cfg(feature = "flv")]
            MediaType::Flv => "video/x-flv",
            #[cfg(feature = "gif")]
            MediaType::Gif => "image/gif",
            #[cfg(feature = "ogg")]
            MediaType::Ogg => "audio/ogg",
            #[cfg(feature = "ogg")]
            MediaType::Opus => "audio/opus",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "riff")]
    #[test]
    fn test_riff_media_types_share_container() {
        for media in [MediaType::Wav, MediaType::Avi, MediaType::WebP] {
            assert_eq!(media.container(), ContainerKind::Riff);
        }
        assert_eq!(MediaType::WebP.to_mime(), "image/webp");
    }

    #[cfg(feature = "ogg")]
    #[test]
    fn test_opus_shares_ogg_container() {
        assert_eq!(MediaType::Opus.container(), ContainerKind::Ogg);
        assert_eq!(MediaType::Opus.to_mime(), "audio/opus");
    }

    #[cfg(feature = "id3")]
    #[test]
    fn test_mp3_label() {
        assert_eq!(MediaType::Mp3.to_string(), "MP3");
        assert_eq!(MediaType::Mp3.container(), ContainerKind::Id3);
    }
}
