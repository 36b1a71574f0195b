// End-to-end tests over the public API, using synthetic files from test_utils

#![cfg(feature = "test-utils")]

use media_surgery::{
    edit, strip, test_utils::*, view, Asset, ContainerKind, EditRequest, Error, StripRequest,
};

/// One well-formed sample file per registered container
fn samples() -> Vec<(ContainerKind, Vec<u8>)> {
    let mut out = Vec::new();
    #[cfg(feature = "bmff")]
    out.push((ContainerKind::Bmff, bmff::file_with_title(Some("Old"), true)));
    #[cfg(feature = "png")]
    out.push((ContainerKind::Png, png::with_text(&[("Author", "Alice")])));
    #[cfg(feature = "riff")]
    out.push((ContainerKind::Riff, riff::wav(&[(b"INAM", "Name")])));
    #[cfg(feature = "ebml")]
    out.push((ContainerKind::Ebml, ebml::matroska("Film", &[("DIRECTOR", "Someone")])));
    #[cfg(feature = "asf")]
    out.push((ContainerKind::Asf, asf::with_content(&["Song", "Band", "", "", ""])));
    #[cfg(feature = "jpeg")]
    out.push((ContainerKind::Jpeg, jpeg::with_exif_and_iptc()));
    #[cfg(feature = "flac")]
    out.push((ContainerKind::Flac, flac::with_comments(&[("TITLE", "Song")])));
    #[cfg(feature = "id3")]
    out.push((ContainerKind::Id3, id3::mp3_with_frames(4, &[(b"TIT2", "Song")], 16)));
    #[cfg(feature = "flv")]
    out.push((ContainerKind::Flv, flv::with_metadata(&[("encoder", "Lavf")])));
    #[cfg(feature = "gif")]
    out.push((ContainerKind::Gif, gif::with_comment("Drawn by hand")));
    #[cfg(feature = "ogg")]
    out.push((ContainerKind::Ogg, ogg::vorbis(&[("TITLE", "Song")])));
    out
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Declared size of the first box with this type
fn box_size(data: &[u8], code: &[u8; 4]) -> u32 {
    let at = data.windows(4).position(|w| w == code).unwrap();
    be_u32(data, at - 4)
}

#[test]
fn test_empty_edit_is_byte_identical() {
    for (kind, file) in samples() {
        if !kind.info().can_edit {
            continue;
        }
        let outcome = edit(&file, kind, &EditRequest::new()).unwrap();
        assert!(outcome.changes.is_empty(), "{kind}");
        assert_eq!(outcome.output.unwrap(), file, "{kind} did not round-trip");
    }
}

#[test]
fn test_every_sample_views_cleanly() {
    for (kind, file) in samples() {
        assert_eq!(media_surgery::detect_container(&file).unwrap(), kind);
        let report = view(&file, kind).unwrap();
        assert!(report.issues.is_empty(), "{kind}: {:?}", report.issues);
        assert!(!report.fields.is_empty(), "{kind}");
    }
}

#[test]
fn test_flavor_isolation() {
    let samples = samples();
    for (kind, file) in &samples {
        for other in ContainerKind::all() {
            if other == kind {
                continue;
            }
            assert!(
                matches!(view(file, *other), Err(Error::NotThisFormat { .. })),
                "{other} accepted a {kind} file"
            );
            assert!(matches!(
                edit(file, *other, &EditRequest::new().set("artist", "x")),
                Err(Error::NotThisFormat { .. })
            ));
            assert!(matches!(
                strip(file, *other, &StripRequest::all()),
                Err(Error::NotThisFormat { .. })
            ));
        }
    }
}

#[test]
fn test_artist_set_everywhere_editable() {
    for (kind, file) in samples() {
        if !kind.info().can_edit {
            continue;
        }
        let request = EditRequest::new().set("artist", "Sweep");
        let out = edit(&file, kind, &request).unwrap().output.unwrap();
        let report = view(&out, kind).unwrap();
        assert!(report.issues.is_empty(), "{kind}");
        assert!(
            report.fields.iter().any(|f| f.value == "Sweep"),
            "{kind} lost the new value"
        );

        // Second application changes nothing
        let again = edit(&out, kind, &request).unwrap();
        assert!(again.changes.is_empty(), "{kind}: {:?}", again.changes);
        assert_eq!(
            report.fields.iter().filter(|f| f.value == "Sweep").count(),
            1,
            "{kind}"
        );
    }
}

#[test]
fn test_strip_all_output_re_decodes() {
    for (kind, file) in samples() {
        if !kind.info().can_strip {
            continue;
        }
        let outcome = strip(&file, kind, &StripRequest::all()).unwrap();
        assert!(!outcome.removed.is_empty(), "{kind} removed nothing");
        let report = view(&outcome.output, kind).unwrap();
        assert!(report.issues.is_empty(), "{kind}");
        // Stripping twice finds nothing more to remove
        let again = strip(&outcome.output, kind, &StripRequest::all()).unwrap();
        assert!(again.removed.is_empty(), "{kind}: {:?}", again.removed);
    }
}

#[cfg(feature = "png")]
#[test]
fn test_png_author_scenario() {
    let file = png::with_text(&[("Author", "Alice")]);
    let out = edit(&file, ContainerKind::Png, &EditRequest::new().set("Author", "Bob"))
        .unwrap()
        .output
        .unwrap();

    assert_eq!(out.len() as isize - file.len() as isize, -2);
    assert_eq!(out.windows(4).filter(|w| *w == b"tEXt").count(), 1);

    let text_at = out.windows(4).position(|w| w == b"tEXt").unwrap();
    assert_eq!(be_u32(&out, text_at - 4), 10);
    assert_eq!(&out[text_at + 4..text_at + 14], b"Author\0Bob");
    let old_at = file.windows(4).position(|w| w == b"tEXt").unwrap();
    assert_ne!(&out[text_at + 14..text_at + 18], &file[old_at + 16..old_at + 20]);

    let idat = file.windows(4).position(|w| w == b"IDAT").unwrap() - 4;
    let idat_out = out.windows(4).position(|w| w == b"IDAT").unwrap() - 4;
    assert_eq!(&out[idat_out..], &file[idat..]);
}

#[cfg(feature = "flac")]
#[test]
fn test_flac_comment_block_scenario() {
    let file = flac::minimal();
    let out = edit(&file, ContainerKind::Flac, &EditRequest::new().set("TITLE", "X"))
        .unwrap()
        .output
        .unwrap();

    assert_eq!(&out[..4], b"fLaC");
    assert_eq!(out[4], 0x00, "STREAMINFO still marked last");
    let second = 4 + 4 + 34;
    assert_eq!(out[second] & 0x7F, 4);
    assert_eq!(out[second] & 0x80, 0x80);
    assert!(out.ends_with(flac::FRAMES));
    assert_eq!(&out[8..second], &file[8..4 + 4 + 34]);
}

#[cfg(feature = "bmff")]
#[test]
fn test_mp4_ancestor_sizes_scenario() {
    let file = bmff::file_with_title(Some("Old"), true);
    let request = EditRequest::new().set("title", "A much longer title");
    let out = edit(&file, ContainerKind::Bmff, &request).unwrap().output.unwrap();

    let delta = "A much longer title".len() as u32 - "Old".len() as u32;
    assert_eq!(out.len() as u32, file.len() as u32 + delta);
    for code in [b"moov", b"udta", b"meta", b"ilst", b"data"] {
        assert_eq!(box_size(&out, code), box_size(&file, code) + delta, "{:?}", code);
    }
    // mdat is untouched and the chunk offset that points into it followed
    let mdat = box_size(&file, b"mdat") as usize;
    assert_eq!(&out[out.len() - mdat..], &file[file.len() - mdat..]);
    let stco = file.windows(4).position(|w| w == b"stco").unwrap();
    let stco_out = out.windows(4).position(|w| w == b"stco").unwrap();
    assert_eq!(be_u32(&out, stco_out + 12), be_u32(&file, stco + 12) + delta);

    let report = view(&out, ContainerKind::Bmff).unwrap();
    assert!(report.fields.iter().any(|f| f.value == "A much longer title"));
}

#[cfg(feature = "jpeg")]
#[test]
fn test_jpeg_strip_scenario() {
    let file = jpeg::with_exif_and_iptc();
    let outcome = strip(&file, ContainerKind::Jpeg, &StripRequest::all()).unwrap();
    let out = outcome.output;

    assert!(!out.windows(2).any(|w| w == [0xFF, 0xE1]));
    assert!(!out.windows(2).any(|w| w == [0xFF, 0xED]));
    assert!(out.ends_with(jpeg::SCAN_DATA));

    let sos = file.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
    let sos_out = out.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
    assert_eq!(&out[sos_out..], &file[sos..]);
    let removed: Vec<&str> = outcome.removed.iter().map(|f| f.key.as_str()).collect();
    assert!(removed.contains(&"Make"));
}

#[cfg(feature = "riff")]
#[test]
fn test_riff_strip_preserves_fmt_and_data() {
    let file = riff::wav(&[(b"INAM", "Name"), (b"ICMT", "Notes")]);
    let out = strip(&file, ContainerKind::Riff, &StripRequest::all()).unwrap().output;

    let chunk = |data: &[u8], id: &[u8; 4]| {
        let at = data.windows(4).position(|w| w == id).unwrap();
        let len = u32::from_le_bytes([data[at + 4], data[at + 5], data[at + 6], data[at + 7]]);
        let len = len as usize;
        data[at..at + 8 + len].to_vec()
    };
    assert_eq!(chunk(&out, b"fmt "), chunk(&file, b"fmt "));
    assert_eq!(chunk(&out, b"data"), chunk(&file, b"data"));
    let fmt = out.windows(4).position(|w| w == b"fmt ").unwrap();
    let data = out.windows(4).position(|w| w == b"data").unwrap();
    assert!(fmt < data);
    assert!(!out.windows(4).any(|w| w == b"LIST"));
}

#[cfg(feature = "ebml")]
#[test]
fn test_matroska_strip_keeps_length() {
    let file = ebml::matroska("Film", &[("DIRECTOR", "Someone")]);
    let outcome = strip(&file, ContainerKind::Ebml, &StripRequest::all()).unwrap();
    assert_eq!(outcome.output.len(), file.len());
    assert!(!outcome.output.windows(4).any(|w| w == b"Film"));

    let err = edit(&file, ContainerKind::Ebml, &EditRequest::new().set("title", "x")).unwrap_err();
    assert!(matches!(err, Error::NoEditableLocation { .. }));
}

#[cfg(feature = "id3")]
#[test]
fn test_mp3_without_tag_gets_one() {
    let file = id3::AUDIO.to_vec();
    let out = edit(&file, ContainerKind::Id3, &EditRequest::new().set("title", "New"))
        .unwrap()
        .output
        .unwrap();
    assert_eq!(&out[..4], b"ID3\x04");
    assert!(out.ends_with(id3::AUDIO));
}

#[cfg(feature = "gif")]
#[test]
fn test_gif_strip_scenario() {
    let file = gif::with_blocks(&[
        gif::netscape_loop(),
        gif::comment("Drawn by hand"),
        gif::icc(&[0x11; 64]),
    ]);
    let outcome = strip(&file, ContainerKind::Gif, &StripRequest::all()).unwrap();
    let expected = gif::with_blocks(&[gif::netscape_loop()]);
    assert_eq!(outcome.output, expected);

    let report = view(&outcome.output, ContainerKind::Gif).unwrap();
    let keys: Vec<&str> = report.fields.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, ["Version", "Dimensions"]);
}

#[cfg(feature = "ogg")]
#[test]
fn test_opus_view_scenario() {
    let file = ogg::opus(&[("TITLE", "Track"), ("ARTIST", "Band")]);
    assert_eq!(media_surgery::detect_container(&file).unwrap(), ContainerKind::Ogg);
    assert_eq!(media_surgery::detect_from_extension("opus"), Some(ContainerKind::Ogg));
    let report = view(&file, ContainerKind::Ogg).unwrap();
    assert_eq!(report.format, "Opus");
    assert!(report.fields.iter().any(|f| f.key == "ARTIST" && f.value == "Band"));
}

#[cfg(feature = "flac")]
#[test]
fn test_asset_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("song.flac");
    std::fs::write(&source, flac::with_comments(&[("TITLE", "Before")])).unwrap();

    let asset = Asset::open(&source).unwrap();
    assert_eq!(asset.kind(), ContainerKind::Flac);
    let outcome = asset.edit(&EditRequest::new().set("title", "After")).unwrap();
    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].before.as_deref(), Some("Before"));

    let target = dir.path().join("out.flac");
    Asset::write_to(&target, &outcome.output.unwrap()).unwrap();
    let reopened = Asset::open(&target).unwrap();
    let report = reopened.view().unwrap();
    assert!(report.fields.iter().any(|f| f.key == "TITLE" && f.value == "After"));

    // The source file is left alone
    let original = Asset::open(&source).unwrap().view().unwrap();
    assert!(original.fields.iter().any(|f| f.value == "Before"));
}

#[cfg(all(feature = "flac", feature = "memory-mapped"))]
#[test]
fn test_asset_mapped_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapped.flac");
    std::fs::write(&path, flac::minimal()).unwrap();
    let asset = unsafe { Asset::open_with_mmap(&path).unwrap() };
    assert_eq!(asset.kind(), ContainerKind::Flac);
    assert_eq!(asset.bytes(), &flac::minimal()[..]);
}
