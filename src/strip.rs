//! Strip engine: remove metadata nodes or clear fields, keep everything else

use crate::{
    edit::verify,
    error::{Error, Result},
    get_handler,
    updates::{StripOutcome, StripRequest},
    ContainerKind,
};

/// Remove metadata from a file of the given flavor.
///
/// [`StripRequest::all`] deletes every metadata-bearing node outright; a keep list or
/// [`StripRequest::gps_only`] rebuilds those nodes with only the surviving fields. Sample
/// data, colour information and every other non-metadata node is copied through
/// byte-for-byte in its original order.
pub fn strip(data: &[u8], flavor: ContainerKind, request: &StripRequest) -> Result<StripOutcome> {
    let mode = request.mode()?;
    let handler = get_handler(flavor);
    let mut tree = handler.decode(data)?;

    if !flavor.info().can_strip {
        return Err(Error::NoStrippableLocation {
            flavor,
            supported: ContainerKind::strippable(),
        });
    }
    tree.ensure_intact()?;

    let before = handler.extract(&tree);
    handler.strip(&mut tree, &mode)?;
    handler.finalize(&mut tree)?;
    let after = handler.extract(&tree);

    let output = handler.encode(&tree)?;
    verify(flavor, &output)?;

    let removed: Vec<_> = before
        .into_iter()
        .filter(|f| {
            !after
                .iter()
                .any(|a| a.key == f.key && a.category == f.category && a.value == f.value)
        })
        .collect();
    log_debug!(
        %flavor,
        ?mode,
        removed = removed.len(),
        before = data.len(),
        after = output.len(),
        "stripped"
    );

    Ok(StripOutcome { output, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_jpeg_strip_all_keeps_image_data() {
        let file = test_utils::jpeg::with_exif_and_iptc();
        let outcome = strip(&file, ContainerKind::Jpeg, &StripRequest::all()).unwrap();
        let out = &outcome.output;

        assert!(!out.windows(4).any(|w| w == b"Exif"));
        assert!(!out.windows(13).any(|w| w == b"Photoshop 3.0"));
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        // APP0, DQT, SOS and scan data are the tail of the input
        let app0_end = 2 + 18;
        assert_eq!(&out[2..app0_end], &file[2..app0_end]);
        let dqt = file.windows(2).position(|w| w == [0xFF, 0xDB]).unwrap();
        assert_eq!(&out[app0_end..], &file[dqt..]);
        assert!(outcome.removed.iter().any(|f| f.key == "Make"));
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_gps_only_keeps_other_exif() {
        let file = test_utils::jpeg::with_exif_and_iptc();
        let outcome = strip(&file, ContainerKind::Jpeg, &StripRequest::gps_only()).unwrap();
        assert!(outcome.removed.iter().all(|f| f.key.starts_with("GPS")));
        assert!(!outcome.removed.is_empty());

        let report = crate::view(&outcome.output, ContainerKind::Jpeg).unwrap();
        assert!(report.fields.iter().any(|f| f.key == "Make" && f.value == "Can"));
        assert!(report.fields.iter().any(|f| f.value == "Harbour"));
    }

    #[cfg(feature = "riff")]
    #[test]
    fn test_wav_siblings_preserved() {
        let file = test_utils::riff::wav(&[(b"INAM", "Name"), (b"IART", "Artist")]);
        let outcome = strip(&file, ContainerKind::Riff, &StripRequest::all()).unwrap();
        let out = &outcome.output;

        let fmt = file.windows(4).position(|w| w == b"fmt ").unwrap();
        let fmt_end = fmt + 8 + 16;
        assert_eq!(&out[fmt..fmt_end], &file[fmt..fmt_end]);
        let data = file.windows(4).position(|w| w == b"data").unwrap();
        assert_eq!(&out[fmt_end..], &file[data..]);
        assert_eq!(u32::from_le_bytes([out[4], out[5], out[6], out[7]]) as usize, out.len() - 8);
        assert_eq!(outcome.removed.len(), 2);
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_contradictory_request() {
        let request = StripRequest {
            gps_only: true,
            strip_all: true,
            ..StripRequest::default()
        };
        let err = strip(b"anything", ContainerKind::Png, &request).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[cfg(feature = "flac")]
    #[test]
    fn test_keep_list_survives() {
        let file = test_utils::flac::with_comments(&[("TITLE", "T"), ("COPYRIGHT", "C")]);
        let request = StripRequest::keep(["copyright"]);
        let outcome = strip(&file, ContainerKind::Flac, &request).unwrap();
        let report = crate::view(&outcome.output, ContainerKind::Flac).unwrap();
        assert!(report.fields.iter().any(|f| f.key == "COPYRIGHT"));
        assert!(report.fields.iter().all(|f| f.key != "TITLE"));
        assert_eq!(outcome.removed.len(), 1);
    }
}
