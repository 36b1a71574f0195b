//! Safety tests - limits and hostile input
//!
//! These check that declared sizes, depths and counts coming from a file can never make
//! the library allocate unboundedly, recurse without limit or panic. Broader coverage
//! comes from the fuzz targets (cargo-fuzz).

use media_surgery::{
    detect_container, edit, strip, view, ContainerKind, EditRequest, Error, StripRequest,
    MAX_DEPTH, MAX_NODE_SIZE,
};

#[test]
fn test_limits_are_reasonable() {
    assert_eq!(MAX_NODE_SIZE, 256 * 1024 * 1024, "256 MB limit");
    assert!(MAX_DEPTH >= 16, "real files nest a dozen levels deep");
    assert!(MAX_DEPTH <= 64);
}

#[test]
fn test_tiny_and_empty_input() {
    for data in [&[][..], &[0x00][..], &[0xFF][..]] {
        assert!(matches!(detect_container(data), Err(Error::UnsupportedFormat)));
        for kind in ContainerKind::all() {
            assert!(view(data, *kind).is_err(), "{kind} accepted {data:?}");
        }
    }
}

#[test]
fn test_every_prefix_is_handled() {
    // Signature-only prefixes of each flavor, cut at every length
    let mut seeds: Vec<(ContainerKind, Vec<u8>)> = Vec::new();
    #[cfg(feature = "test-utils")]
    {
        use media_surgery::test_utils::*;
        #[cfg(feature = "bmff")]
        seeds.push((ContainerKind::Bmff, bmff::file_with_title(Some("T"), true)));
        #[cfg(feature = "png")]
        seeds.push((ContainerKind::Png, png::with_text(&[("a", "b")])));
        #[cfg(feature = "riff")]
        seeds.push((ContainerKind::Riff, riff::wav(&[(b"INAM", "n")])));
        #[cfg(feature = "ebml")]
        seeds.push((ContainerKind::Ebml, ebml::matroska("T", &[("A", "B")])));
        #[cfg(feature = "asf")]
        seeds.push((ContainerKind::Asf, asf::with_content(&["a", "b", "", "", ""])));
        #[cfg(feature = "jpeg")]
        seeds.push((ContainerKind::Jpeg, jpeg::with_exif_and_iptc()));
        #[cfg(feature = "flac")]
        seeds.push((ContainerKind::Flac, flac::with_comments(&[("A", "B")])));
        #[cfg(feature = "id3")]
        seeds.push((ContainerKind::Id3, id3::mp3_with_frames(3, &[(b"TIT2", "T")], 4)));
        #[cfg(feature = "flv")]
        seeds.push((ContainerKind::Flv, flv::with_metadata(&[("a", "b")])));
        #[cfg(feature = "gif")]
        seeds.push((ContainerKind::Gif, gif::with_blocks(&[gif::comment("a"), gif::icc(b"b")])));
        #[cfg(feature = "ogg")]
        seeds.push((ContainerKind::Ogg, ogg::vorbis(&[("A", "B")])));
    }

    for (kind, file) in seeds {
        for len in 0..file.len() {
            let cut = &file[..len];
            // Lenient view either reports issues or fails on the signature
            let _ = view(cut, kind);
            // Writers refuse damage rather than emit it
            if let Ok(outcome) = strip(cut, kind, &StripRequest::all()) {
                let report = view(&outcome.output, kind).unwrap();
                assert!(report.issues.is_empty(), "{kind} wrote a damaged file at {len}");
            }
            if let Ok(outcome) = edit(cut, kind, &EditRequest::new().set("artist", "x")) {
                if let Some(out) = outcome.output {
                    let report = view(&out, kind).unwrap();
                    assert!(report.issues.is_empty(), "{kind} wrote a damaged file at {len}");
                }
            }
        }
    }
}

#[cfg(feature = "bmff")]
#[test]
fn test_huge_declared_box_size() {
    // ftyp, then a box claiming 4 GB
    let mut data = vec![0, 0, 0, 16];
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&[0u8; 32]);

    let report = view(&data, ContainerKind::Bmff).unwrap();
    assert!(!report.issues.is_empty());
    assert!(matches!(
        edit(&data, ContainerKind::Bmff, &EditRequest::new().set("title", "x")),
        Err(Error::MalformedContainer { .. } | Error::Truncated { .. })
    ));
}

#[cfg(feature = "bmff")]
#[test]
fn test_deep_nesting_is_bounded() {
    // moov nested far deeper than MAX_DEPTH
    let levels = MAX_DEPTH * 4;
    let mut inner: Vec<u8> = Vec::new();
    for _ in 0..levels {
        let mut next = ((inner.len() + 8) as u32).to_be_bytes().to_vec();
        next.extend_from_slice(b"moov");
        next.extend_from_slice(&inner);
        inner = next;
    }
    let mut data = vec![0, 0, 0, 16];
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&inner);

    // Boxes past the limit are kept opaque, so the file still round-trips
    view(&data, ContainerKind::Bmff).unwrap();
    let outcome = edit(&data, ContainerKind::Bmff, &EditRequest::new()).unwrap();
    assert_eq!(outcome.output.unwrap(), data);
}

#[cfg(feature = "ebml")]
#[test]
fn test_ebml_size_overflow() {
    // EBML header with an 8-byte size near u64::MAX that is not the unknown pattern
    let mut data = vec![0x1A, 0x45, 0xDF, 0xA3];
    data.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
    data.extend_from_slice(&[0x42, 0x82, 0x84]);
    data.extend_from_slice(b"webm");

    let report = view(&data, ContainerKind::Ebml).unwrap();
    assert!(!report.issues.is_empty());
}

#[cfg(feature = "jpeg")]
#[test]
fn test_jpeg_segment_overrun() {
    // APP1 declaring more bytes than exist
    let data = [0xFF, 0xD8, 0xFF, 0xE1, 0xFF, 0xFF, b'E', b'x', b'i', b'f', 0, 0];
    let report = view(&data, ContainerKind::Jpeg).unwrap();
    assert!(!report.issues.is_empty());
    assert!(strip(&data, ContainerKind::Jpeg, &StripRequest::all()).is_err());
}

#[cfg(feature = "jpeg")]
#[test]
fn test_jpeg_comment_too_large_for_a_segment() {
    let data = [0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9];
    let huge = "x".repeat(70_000);
    let request = EditRequest::new().set("Comment", huge);
    let err = edit(&data, ContainerKind::Jpeg, &request).unwrap_err();
    assert!(matches!(err, Error::DataTooLarge { .. }));
}

#[cfg(feature = "flac")]
#[test]
fn test_vorbis_comment_count_lies() {
    // Vorbis Comment block claiming four billion comments in a 12-byte payload
    let mut data = b"fLaC".to_vec();
    data.push(0x00);
    data.extend_from_slice(&[0, 0, 34]);
    data.extend_from_slice(&[0u8; 34]);
    data.push(0x84);
    data.extend_from_slice(&[0, 0, 12]);
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    data.extend_from_slice(&[0u8; 4]);

    let report = view(&data, ContainerKind::Flac).unwrap();
    assert!(report.fields.iter().all(|f| f.category != media_surgery::category::VORBIS));
}

#[cfg(feature = "gif")]
#[test]
fn test_gif_sub_block_runs_past_end() {
    // Comment extension whose sub-block claims 200 bytes
    let mut data = b"GIF89a\x01\x00\x01\x00\x00\x00\x00".to_vec();
    data.extend_from_slice(&[0x21, 0xFE, 200, b'a', b'b']);

    let report = view(&data, ContainerKind::Gif).unwrap();
    assert_eq!(report.issues.len(), 1);
    assert!(strip(&data, ContainerKind::Gif, &StripRequest::all()).is_err());
}

#[cfg(feature = "ogg")]
#[test]
fn test_ogg_lacing_past_end() {
    // Page header announcing 255 segments of 255 bytes with no data behind it
    let mut data = b"OggS".to_vec();
    data.extend_from_slice(&[0, 0x02]);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&[0u8; 4]);
    data.push(255);
    data.extend_from_slice(&[255u8; 255]);

    let report = view(&data, ContainerKind::Ogg).unwrap();
    assert_eq!(report.issues.len(), 1);
}

#[cfg(feature = "id3")]
#[test]
fn test_id3_frame_larger_than_tag() {
    let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x14".to_vec();
    data.extend_from_slice(b"TIT2");
    data.extend_from_slice(&[0x7F, 0x7F, 0x7F, 0x7F, 0, 0]);
    data.extend_from_slice(&[0u8; 10]);

    let report = view(&data, ContainerKind::Id3).unwrap();
    assert!(!report.issues.is_empty());
}

#[test]
fn test_contradictory_strip_request() {
    let request = StripRequest {
        keep_keys: vec!["Copyright".into()],
        gps_only: true,
        strip_all: false,
    };
    assert!(matches!(request.mode(), Err(Error::InvalidRequest(_))));
}
