//! Read-only field listing

use crate::{
    error::Result, field::MetadataField, get_handler, tree::ParseIssue, ContainerKind,
};

/// Everything View reports for one file
#[derive(Debug, Clone)]
pub struct MetadataView {
    /// Media type label ("MP4", "WebP", "MP3", ...)
    pub format: &'static str,
    pub fields: Vec<MetadataField>,
    /// Structural problems skipped while decoding
    pub issues: Vec<ParseIssue>,
}

/// Decode `data` as `flavor` and list its metadata.
///
/// Damaged files are not an error: whatever decoded before the damage is listed and the
/// damage is reported in [`MetadataView::issues`]. Only a wrong signature fails.
pub fn view(data: &[u8], flavor: ContainerKind) -> Result<MetadataView> {
    let handler = get_handler(flavor);
    let tree = handler.decode(data)?;
    let fields = handler.extract(&tree);
    log_debug!(%flavor, fields = fields.len(), issues = tree.issues.len(), "viewed");
    Ok(MetadataView {
        format: handler.media_type(&tree).name(),
        fields,
        issues: tree.issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[cfg(feature = "flac")]
    #[test]
    fn test_view_flac() {
        let data = crate::test_utils::flac::with_comments(&[("TITLE", "Song")]);
        let report = view(&data, ContainerKind::Flac).unwrap();
        assert_eq!(report.format, "FLAC");
        assert!(report.issues.is_empty());
        assert!(report.fields.iter().any(|f| f.key == "TITLE" && f.value == "Song"));
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_wrong_signature_is_an_error() {
        let err = view(b"definitely not a png", ContainerKind::Png).unwrap_err();
        assert!(matches!(err, Error::NotThisFormat { .. }));
    }

    #[cfg(feature = "flac")]
    #[test]
    fn test_truncated_file_still_views() {
        let mut data = crate::test_utils::flac::with_comments(&[("TITLE", "Song")]);
        // Cut into the Vorbis Comment block
        data.truncate(4 + 38 + 10);
        let report = view(&data, ContainerKind::Flac).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(report.fields.iter().all(|f| f.key != "TITLE"));
    }
}
