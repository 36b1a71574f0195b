//! Synthetic-file builders for tests.
//!
//! Every builder returns a small but structurally valid file, so tests never depend on
//! fixture files on disk. Lengths, checksums, counts and absolute offsets are all
//! computed, which means decoding a built file and encoding it again must give the same
//! bytes back.
//!
//! # Usage
//!
//! ```
//! use media_surgery::{test_utils::flac, view, ContainerKind};
//!
//! let file = flac::with_comments(&[("TITLE", "Song")]);
//! let report = view(&file, ContainerKind::Flac).unwrap();
//! assert!(report.fields.iter().any(|f| f.value == "Song"));
//! ```

#![allow(dead_code)]

/// ISOBMFF boxes (MP4)
#[cfg(feature = "bmff")]
pub mod bmff {
    /// A plain 32-bit-size box
    pub fn boxed(code: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(code);
        out.extend_from_slice(body);
        out
    }

    pub fn ftyp() -> Vec<u8> {
        let mut body = b"isom".to_vec();
        body.extend_from_slice(&0x200u32.to_be_bytes());
        body.extend_from_slice(b"isommp41");
        boxed(b"ftyp", &body)
    }

    /// Version 0 movie header: timescale 1000, duration 2000
    fn mvhd() -> Vec<u8> {
        let mut body = vec![0u8; 12];
        body.extend_from_slice(&1000u32.to_be_bytes());
        body.extend_from_slice(&2000u32.to_be_bytes());
        body.resize(100, 0);
        boxed(b"mvhd", &body)
    }

    fn trak(chunk_offset: u32) -> Vec<u8> {
        let mut stco = vec![0u8; 4];
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&chunk_offset.to_be_bytes());
        let stbl = boxed(b"stbl", &boxed(b"stco", &stco));
        let minf = boxed(b"minf", &stbl);
        let mdia = boxed(b"mdia", &minf);
        boxed(b"trak", &mdia)
    }

    fn udta(title: Option<&str>) -> Vec<u8> {
        let mut hdlr = vec![0u8; 8];
        hdlr.extend_from_slice(b"mdirappl");
        hdlr.extend_from_slice(&[0u8; 9]);
        let mut ilst = Vec::new();
        if let Some(title) = title {
            let mut data = vec![0, 0, 0, 1, 0, 0, 0, 0];
            data.extend_from_slice(title.as_bytes());
            ilst = boxed(&[0xA9, b'n', b'a', b'm'], &boxed(b"data", &data));
        }
        let mut meta = vec![0u8; 4];
        meta.extend(boxed(b"hdlr", &hdlr));
        meta.extend(boxed(b"ilst", &ilst));
        boxed(b"udta", &boxed(b"meta", &meta))
    }

    fn moov(title: Option<&str>, with_udta: bool, chunk_offset: u32) -> Vec<u8> {
        let mut body = mvhd();
        body.extend(trak(chunk_offset));
        if with_udta {
            body.extend(udta(title));
        }
        boxed(b"moov", &body)
    }

    /// `ftyp`, `moov` (with an `stco` pointing into `mdat`, and `udta/meta/ilst` holding
    /// `©nam` when `with_udta`), then `mdat`
    pub fn file_with_title(title: Option<&str>, with_udta: bool) -> Vec<u8> {
        let ftyp = ftyp();
        let moov_len = moov(title, with_udta, 0).len();
        let mdat_at = (ftyp.len() + moov_len) as u32;
        let mut out = ftyp;
        out.extend(moov(title, with_udta, mdat_at + 8));
        out.extend(boxed(b"mdat", &[0xAA; 16]));
        out
    }
}

/// PNG chunks
#[cfg(feature = "png")]
pub mod png {
    use crate::containers::png_io::calculate_crc;

    pub const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    pub fn chunk(code: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(code);
        out.extend_from_slice(data);
        let crc = calculate_crc(&out[4..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// IHDR, one `tEXt` per pair, IDAT, IEND
    pub fn with_text(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
        out.extend(chunk(b"IHDR", &ihdr));
        for (key, value) in pairs {
            let mut text = key.as_bytes().to_vec();
            text.push(0);
            text.extend_from_slice(value.as_bytes());
            out.extend(chunk(b"tEXt", &text));
        }
        out.extend(chunk(b"IDAT", &[0x78, 0x9C, 0x63, 0x60, 0x60, 0x60, 0, 0, 0, 4, 0, 1]));
        out.extend(chunk(b"IEND", &[]));
        out
    }

    /// Insert a chunk in front of the final IEND
    pub fn insert_before_iend(file: &mut Vec<u8>, code: &[u8; 4], data: &[u8]) {
        let at = file.len() - 12;
        let new = chunk(code, data);
        file.splice(at..at, new);
    }
}

/// RIFF and IFF chunks (WAV, WebP, AIFF)
#[cfg(feature = "riff")]
pub mod riff {
    fn chunk(id: &[u8; 4], data: &[u8], big_endian: bool) -> Vec<u8> {
        let mut out = id.to_vec();
        let len = data.len() as u32;
        out.extend_from_slice(&if big_endian { len.to_be_bytes() } else { len.to_le_bytes() });
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn form(outer: &[u8; 4], form_type: &[u8; 4], chunks: &[u8], big_endian: bool) -> Vec<u8> {
        let mut body = form_type.to_vec();
        body.extend_from_slice(chunks);
        chunk(outer, &body, big_endian)
    }

    /// `fmt ` (16-bit stereo PCM at 44100 Hz), an INFO list when `info` is not empty,
    /// then `data`
    pub fn wav(info: &[(&[u8; 4], &str)]) -> Vec<u8> {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&2u16.to_le_bytes());
        fmt.extend_from_slice(&44_100u32.to_le_bytes());
        fmt.extend_from_slice(&176_400u32.to_le_bytes());
        fmt.extend_from_slice(&4u16.to_le_bytes());
        fmt.extend_from_slice(&16u16.to_le_bytes());

        let mut chunks = chunk(b"fmt ", &fmt, false);
        if !info.is_empty() {
            let mut list = b"INFO".to_vec();
            for (id, value) in info {
                let mut text = value.as_bytes().to_vec();
                text.push(0);
                list.extend(chunk(id, &text, false));
            }
            chunks.extend(chunk(b"LIST", &list, false));
        }
        chunks.extend(chunk(b"data", &[0u8; 8], false));
        form(b"RIFF", b"WAVE", &chunks, false)
    }

    /// Extended WebP: VP8X with the EXIF flag set, VP8 image data, EXIF chunk
    pub fn webp_with_exif() -> Vec<u8> {
        // Big-endian TIFF with an empty IFD0
        webp_with_tiff(&[b'M', b'M', 0, 0x2A, 0, 0, 0, 8, 0, 0, 0, 0, 0, 0])
    }

    /// Extended WebP whose EXIF chunk holds `tiff`
    pub fn webp_with_tiff(tiff: &[u8]) -> Vec<u8> {
        let mut vp8x = vec![0x08, 0, 0, 0];
        vp8x.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let mut chunks = chunk(b"VP8X", &vp8x, false);
        chunks.extend(chunk(b"VP8 ", &[0x30, 0x01, 0x00, 0x9D, 0x01, 0x2A, 1, 0, 1, 0], false));
        chunks.extend(chunk(b"EXIF", tiff, false));
        form(b"RIFF", b"WEBP", &chunks, false)
    }

    /// AIFF with COMM, NAME and SSND chunks
    pub fn aiff_with_name(name: &str) -> Vec<u8> {
        let mut comm = Vec::new();
        comm.extend_from_slice(&2u16.to_be_bytes());
        comm.extend_from_slice(&4u32.to_be_bytes());
        comm.extend_from_slice(&16u16.to_be_bytes());
        // 44100 as an 80-bit extended float
        comm.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);
        let mut chunks = chunk(b"COMM", &comm, true);
        chunks.extend(chunk(b"NAME", name.as_bytes(), true));
        chunks.extend(chunk(b"SSND", &[0u8; 16], true));
        form(b"FORM", b"AIFF", &chunks, true)
    }
}

/// Big-endian TIFF blobs for the EXIF payloads of JPEG, PNG and WebP
#[cfg(any(feature = "jpeg", feature = "png", feature = "riff"))]
pub mod exif {
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;

    /// `MM`, magic and the offset of IFD0
    pub fn header(ifd0: u32) -> Vec<u8> {
        let mut out = b"MM\0\x2A".to_vec();
        out.extend_from_slice(&ifd0.to_be_bytes());
        out
    }

    /// A directory of `(tag, type, count, value)` entries; `next: None` leaves out the
    /// next-IFD pointer
    pub fn directory(entries: &[(u16, u16, u32, [u8; 4])], next: Option<u32>) -> Vec<u8> {
        let mut out = (entries.len() as u16).to_be_bytes().to_vec();
        for (tag, typ, count, value) in entries {
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&typ.to_be_bytes());
            out.extend_from_slice(&count.to_be_bytes());
            out.extend_from_slice(value);
        }
        if let Some(next) = next {
            out.extend_from_slice(&next.to_be_bytes());
        }
        out
    }

    /// IFD0 {Make "Can", Orientation 6, DateTime, Copyright "Me", GPS pointer},
    /// GPS IFD {GPSLatitudeRef "N"}
    pub fn camera() -> Vec<u8> {
        let mut out = header(8);
        out.extend(directory(
            &[
                (0x010F, ASCII, 4, *b"Can\0"),
                (0x0112, SHORT, 1, [0, 6, 0, 0]),
                (0x0132, ASCII, 20, 74u32.to_be_bytes()),
                (0x8298, ASCII, 3, *b"Me\0\0"),
                (0x8825, LONG, 1, 94u32.to_be_bytes()),
            ],
            Some(0),
        ));
        out.extend_from_slice(b"2024:01:02 03:04:05\0");
        out.extend(directory(&[(0x0001, ASCII, 2, *b"N\0\0\0")], Some(0)));
        out
    }

    /// IFD0 {Make "Can", Model "EOS"} ending right after its entries
    pub fn without_next_pointer() -> Vec<u8> {
        let mut out = header(8);
        out.extend(directory(
            &[(0x010F, ASCII, 4, *b"Can\0"), (0x0110, ASCII, 4, *b"EOS\0")],
            None,
        ));
        out
    }

    /// GPS IFD {GPSLatitudeRef "N"} first, then IFD0 {Make "Can", GPS pointer} ending
    /// right after its entries
    pub fn gps_without_next_pointer() -> Vec<u8> {
        let mut out = header(26);
        out.extend(directory(&[(0x0001, ASCII, 2, *b"N\0\0\0")], Some(0)));
        out.extend(directory(
            &[(0x010F, ASCII, 4, *b"Can\0"), (0x8825, LONG, 1, 8u32.to_be_bytes())],
            None,
        ));
        out
    }
}

/// JPEG marker segments
#[cfg(feature = "jpeg")]
pub mod jpeg {
    /// Entropy-coded data that follows SOS, EOI included
    pub const SCAN_DATA: &[u8] = &[0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD0, 0x78, 0xFF, 0xD9];

    pub fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn app0() -> Vec<u8> {
        segment(0xE0, b"JFIF\0\x01\x01\x00\x00\x01\x00\x01\x00\x00")
    }

    fn sos() -> Vec<u8> {
        segment(0xDA, &[1, 1, 0, 0, 63, 0])
    }

    /// SOI, APP0 JFIF, SOS, scan data
    pub fn minimal() -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend(app0());
        out.extend(sos());
        out.extend_from_slice(SCAN_DATA);
        out
    }

    /// Big-endian TIFF: IFD0 with Make "Can" and a GPS pointer, GPS IFD with
    /// GPSLatitudeRef "N"
    fn tiff() -> Vec<u8> {
        let mut t = b"MM\0\x2A".to_vec();
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        // Make, ASCII, count 4, inline
        t.extend_from_slice(&[0x01, 0x0F, 0, 2, 0, 0, 0, 4]);
        t.extend_from_slice(b"Can\0");
        // GPS IFD pointer, LONG, count 1
        t.extend_from_slice(&[0x88, 0x25, 0, 4, 0, 0, 0, 1]);
        t.extend_from_slice(&38u32.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t.extend_from_slice(&1u16.to_be_bytes());
        // GPSLatitudeRef, ASCII, count 2, inline
        t.extend_from_slice(&[0x00, 0x01, 0, 2, 0, 0, 0, 2]);
        t.extend_from_slice(b"N\0\0\0");
        t.extend_from_slice(&0u32.to_be_bytes());
        t
    }

    /// Photoshop IRB with one IPTC resource holding ObjectName "Harbour"
    fn photoshop() -> Vec<u8> {
        let dataset = [&[0x1C, 0x02, 0x05, 0x00, 0x07][..], b"Harbour"].concat();
        let mut out = b"Photoshop 3.0\0".to_vec();
        out.extend_from_slice(b"8BIM");
        out.extend_from_slice(&0x0404u16.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(dataset.len() as u32).to_be_bytes());
        out.extend_from_slice(&dataset);
        out
    }

    /// SOI, APP0, APP1 Exif, APP13 IPTC, DQT, SOS, scan data
    pub fn with_exif_and_iptc() -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend(app0());
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend(tiff());
        out.extend(segment(0xE1, &exif));
        out.extend(segment(0xED, &photoshop()));
        let mut dqt = vec![0u8];
        dqt.extend_from_slice(&[1u8; 64]);
        out.extend(segment(0xDB, &dqt));
        out.extend(sos());
        out.extend_from_slice(SCAN_DATA);
        out
    }

    /// SOI, APP0, APP1 Exif holding `tiff`, SOS, scan data
    pub fn with_exif(tiff: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend(app0());
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(tiff);
        out.extend(segment(0xE1, &exif));
        out.extend(sos());
        out.extend_from_slice(SCAN_DATA);
        out
    }

    /// Insert a segment in front of SOS
    pub fn insert_before_sos(file: &mut Vec<u8>, marker: u8, payload: &[u8]) {
        let at = file
            .windows(2)
            .position(|w| w == [0xFF, 0xDA])
            .unwrap_or(file.len());
        let new = segment(marker, payload);
        file.splice(at..at, new);
    }
}

/// FLAC metadata blocks
/// Vorbis comment lists shared by FLAC and Ogg
#[cfg(any(feature = "flac", feature = "ogg"))]
pub mod vorbis {
    pub fn comment_list(vendor: &str, comments: &[(&str, &str)]) -> Vec<u8> {
        let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for (key, value) in comments {
            let entry = format!("{}={}", key, value);
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }
}

#[cfg(feature = "flac")]
pub mod flac {
    /// Stand-in for audio frames after the metadata blocks
    pub const FRAMES: &[u8] = &[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x11, 0x22, 0x33];

    pub fn block(kind: u8, last: bool, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![if last { 0x80 | kind } else { kind }];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(payload);
        out
    }

    fn streaminfo() -> Vec<u8> {
        let mut info = Vec::with_capacity(34);
        info.extend_from_slice(&4096u16.to_be_bytes());
        info.extend_from_slice(&4096u16.to_be_bytes());
        info.extend_from_slice(&[0u8; 6]);
        // 44100 Hz, stereo, 16 bit
        info.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0]);
        info.resize(34, 0);
        info
    }

    pub fn vorbis_comment(comments: &[(&str, &str)]) -> Vec<u8> {
        super::vorbis::comment_list("reference libFLAC 1.4.3", comments)
    }

    /// STREAMINFO only, marked last
    pub fn minimal() -> Vec<u8> {
        let mut out = b"fLaC".to_vec();
        out.extend(block(0, true, &streaminfo()));
        out.extend_from_slice(FRAMES);
        out
    }

    /// STREAMINFO then a Vorbis Comment block marked last
    pub fn with_comments(comments: &[(&str, &str)]) -> Vec<u8> {
        let mut out = b"fLaC".to_vec();
        out.extend(block(0, false, &streaminfo()));
        out.extend(block(4, true, &vorbis_comment(comments)));
        out.extend_from_slice(FRAMES);
        out
    }

    /// PICTURE block payload (front cover) with `data_len` zero bytes of image data
    pub fn picture(mime: &str, width: u32, height: u32, data_len: u32) -> Vec<u8> {
        let mut out = 3u32.to_be_bytes().to_vec();
        out.extend_from_slice(&(mime.len() as u32).to_be_bytes());
        out.extend_from_slice(mime.as_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&24u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&data_len.to_be_bytes());
        out.resize(out.len() + data_len as usize, 0);
        out
    }
}

/// ID3v2 tags in front of MPEG audio
#[cfg(feature = "id3")]
pub mod id3 {
    /// One silent-ish MPEG-1 Layer III frame header and a few bytes of data
    pub const AUDIO: &[u8] = &[
        0xFF, 0xFB, 0x90, 0x64, 0x00, 0x0F, 0xF0, 0x00, 0x00, 0x69, 0x00, 0x00,
    ];

    fn syncsafe(n: u32) -> [u8; 4] {
        [(n >> 21) as u8 & 0x7F, (n >> 14) as u8 & 0x7F, (n >> 7) as u8 & 0x7F, n as u8 & 0x7F]
    }

    fn frame(major: u8, id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        let len = body.len() as u32;
        out.extend_from_slice(&if major == 4 { syncsafe(len) } else { len.to_be_bytes() });
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(body);
        out
    }

    fn tag(major: u8, flags: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![b'I', b'D', b'3', major, 0, flags];
        out.extend_from_slice(&syncsafe(body.len() as u32));
        out.extend_from_slice(body);
        out
    }

    /// Latin-1 text frames, then `padding` zero bytes, then [`AUDIO`]
    pub fn mp3_with_frames(major: u8, frames: &[(&[u8; 4], &str)], padding: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, text) in frames {
            let mut payload = vec![0u8];
            payload.extend(text.chars().map(|c| c as u8));
            body.extend(frame(major, id, &payload));
        }
        body.resize(body.len() + padding, 0);
        let mut out = tag(major, 0, &body);
        out.extend_from_slice(AUDIO);
        out
    }

    /// 128-byte ID3v1.1 trailer
    pub fn v1_tag(title: &str, artist: &str, track: u8) -> Vec<u8> {
        let field = |s: &str, len: usize| {
            let mut bytes = s.as_bytes().to_vec();
            bytes.resize(len, 0);
            bytes
        };
        let mut out = b"TAG".to_vec();
        out.extend(field(title, 30));
        out.extend(field(artist, 30));
        out.extend(field("", 30));
        out.extend(field("2001", 4));
        out.extend(field("", 28));
        out.push(0);
        out.push(track);
        out.push(12);
        out
    }

    /// v2.3 tag with whole-tag unsynchronisation and one Latin-1 TIT2 frame
    pub fn unsynchronised_v23_title(title: &str) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend(title.chars().map(|c| c as u8));
        let plain = frame(3, b"TIT2", &payload);
        let mut body = Vec::with_capacity(plain.len() + 4);
        for (i, &b) in plain.iter().enumerate() {
            body.push(b);
            let next = plain.get(i + 1).copied();
            if b == 0xFF && next.map_or(true, |n| n == 0 || n & 0xE0 == 0xE0) {
                body.push(0);
            }
        }
        let mut out = tag(3, 0x80, &body);
        out.extend_from_slice(AUDIO);
        out
    }
}

/// FLV tags with AMF0 script data
#[cfg(feature = "flv")]
pub mod flv {
    use crate::amf0::{write_all, Amf0Value};

    const HEADER_LEN: usize = 13;

    fn tag(kind: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&[0u8; 7]);
        out.extend_from_slice(data);
        out.extend_from_slice(&((data.len() + 11) as u32).to_be_bytes());
        out
    }

    fn script(strings: &[(&str, &str)], keyframe_at: f64) -> Vec<u8> {
        let mut entries = vec![("duration".to_string(), Amf0Value::Number(2.0))];
        entries.extend(
            strings
                .iter()
                .map(|(k, v)| (k.to_string(), Amf0Value::String(v.to_string()))),
        );
        entries.push((
            "keyframes".to_string(),
            Amf0Value::Object(vec![(
                "filepositions".to_string(),
                Amf0Value::StrictArray(vec![Amf0Value::Number(keyframe_at)]),
            )]),
        ));
        write_all(&[
            Amf0Value::String("onMetaData".into()),
            Amf0Value::EcmaArray {
                declared_count: entries.len() as u32,
                entries,
            },
        ])
    }

    /// Header (audio and video), an `onMetaData` script tag with `duration`, the given
    /// string entries and a keyframe index, then one video tag the index points at
    pub fn with_metadata(strings: &[(&str, &str)]) -> Vec<u8> {
        let mut out = b"FLV\x01\x05".to_vec();
        out.extend_from_slice(&9u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        let script_len = tag(18, &script(strings, 0.0)).len();
        let video_at = (HEADER_LEN + script_len) as f64;
        out.extend(tag(18, &script(strings, video_at)));
        out.extend(tag(9, &[0x17, 0x00, 0x00, 0x00, 0x00]));
        out
    }
}

/// ASF objects (WMA)
#[cfg(feature = "asf")]
pub mod asf {
    const HEADER: [u8; 16] = [
        0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
        0x6C,
    ];
    const CONTENT_DESCRIPTION: [u8; 16] = [
        0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
        0x6C,
    ];
    const EXTENDED_CONTENT_DESCRIPTION: [u8; 16] = [
        0x40, 0xA4, 0xD0, 0xD2, 0x07, 0xE3, 0xD2, 0x11, 0x97, 0xF0, 0x00, 0xA0, 0xC9, 0x5E, 0xA8,
        0x50,
    ];
    const FILE_PROPERTIES: [u8; 16] = [
        0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53,
        0x65,
    ];
    const DATA: [u8; 16] = [
        0x36, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
        0x6C,
    ];

    fn object(id: &[u8; 16], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&((body.len() + 24) as u64).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn utf16z(s: &str) -> Vec<u8> {
        if s.is_empty() {
            return Vec::new();
        }
        let mut out: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        out.extend_from_slice(&[0, 0]);
        out
    }

    /// 2 seconds of play time, no preroll
    fn file_properties(file_size: u64) -> Vec<u8> {
        let mut body = vec![0x11u8; 16];
        body.extend_from_slice(&file_size.to_le_bytes());
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&20_000_000u64.to_le_bytes());
        body.extend_from_slice(&20_000_000u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.resize(80, 0);
        object(&FILE_PROPERTIES, &body)
    }

    fn content_description(strings: &[&str]) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = strings.iter().map(|s| utf16z(s)).collect();
        let mut body = Vec::new();
        for e in &encoded {
            body.extend_from_slice(&(e.len() as u16).to_le_bytes());
        }
        for e in encoded {
            body.extend(e);
        }
        object(&CONTENT_DESCRIPTION, &body)
    }

    /// One string descriptor: WM/AlbumTitle = Record
    fn extended_content_description() -> Vec<u8> {
        let name = utf16z("WM/AlbumTitle");
        let value = utf16z("Record");
        let mut body = 1u16.to_le_bytes().to_vec();
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend(name);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(value.len() as u16).to_le_bytes());
        body.extend(value);
        object(&EXTENDED_CONTENT_DESCRIPTION, &body)
    }

    fn build(children: impl Fn(u64) -> Vec<Vec<u8>>) -> Vec<u8> {
        let assemble = |file_size: u64| {
            let parts = children(file_size);
            let mut body = (parts.len() as u32).to_le_bytes().to_vec();
            body.extend_from_slice(&[0x01, 0x02]);
            for part in parts {
                body.extend(part);
            }
            let mut out = object(&HEADER, &body);
            let mut data = vec![0x22u8; 16];
            data.extend_from_slice(&1u64.to_le_bytes());
            data.extend_from_slice(&[0x01, 0x01]);
            data.extend_from_slice(&[0u8; 32]);
            out.extend(object(&DATA, &data));
            out
        };
        let size = assemble(0).len() as u64;
        assemble(size)
    }

    /// Header Object with File Properties only, then a Data Object
    pub fn minimal() -> Vec<u8> {
        build(|size| vec![file_properties(size)])
    }

    /// File Properties, Content Description with the five given strings and an Extended
    /// Content Description
    pub fn with_content(strings: &[&str]) -> Vec<u8> {
        build(|size| {
            vec![
                file_properties(size),
                content_description(strings),
                extended_content_description(),
            ]
        })
    }
}

/// EBML elements (Matroska)
#[cfg(feature = "ebml")]
pub mod ebml {
    fn id_bytes(id: u32) -> Vec<u8> {
        let bytes = id.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        bytes[skip..].to_vec()
    }

    /// Element with its size written in `width` bytes
    pub fn element_with_width(id: u32, body: &[u8], width: u8) -> Vec<u8> {
        let mut out = id_bytes(id);
        let marked = body.len() as u64 | 1u64 << (7 * width as u32);
        out.extend_from_slice(&marked.to_be_bytes()[8 - width as usize..]);
        out.extend_from_slice(body);
        out
    }

    pub fn element(id: u32, body: &[u8]) -> Vec<u8> {
        let width = if body.len() < 127 { 1 } else { 2 };
        element_with_width(id, body, width)
    }

    fn header() -> Vec<u8> {
        let mut body = element(0x4286, &[1]);
        body.extend(element(0x4282, b"matroska"));
        body.extend(element(0x4287, &[4]));
        element(0x1A45_DFA3, &body)
    }

    fn info(title: &str) -> Vec<u8> {
        let mut body = element(0x2A_D7B1, &[0x0F, 0x42, 0x40]);
        body.extend(element(0x4D80, b"libebml"));
        body.extend(element(0x5741, b"builder"));
        body.extend(element(0x7BA9, title.as_bytes()));
        body.extend(element(0x4489, &2000.0f64.to_be_bytes()));
        element(0x1549_A966, &body)
    }

    fn tags(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut tag = element(0x63C0, &[]);
        for (name, value) in pairs {
            let mut simple = element(0x45A3, name.as_bytes());
            simple.extend(element(0x4487, value.as_bytes()));
            tag.extend(element(0x67C8, &simple));
        }
        element(0x1254_C367, &element(0x7373, &tag))
    }

    fn cluster() -> Vec<u8> {
        element(0x1F43_B675, &[0xE7, 0x81, 0x00, 0xA3, 0x84, 0x81, 0x00, 0x00, 0x80])
    }

    /// EBML header, then a Segment (8-byte size, as muxers write it) holding Info, Tags
    /// when `tags` is not empty, and a Cluster
    pub fn matroska(title: &str, tags_: &[(&str, &str)]) -> Vec<u8> {
        let mut segment = info(title);
        if !tags_.is_empty() {
            segment.extend(tags(tags_));
        }
        segment.extend(cluster());
        let mut out = header();
        out.extend(element_with_width(0x1853_8067, &segment, 8));
        out
    }

    /// Segment whose size is the 8-byte "unknown" pattern, as live muxers write it
    pub fn unknown_size_segment(title: &str) -> Vec<u8> {
        let mut out = header();
        out.extend(id_bytes(0x1853_8067));
        out.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        out.extend(info(title));
        out.extend(cluster());
        out
    }
}

/// GIF images and extension blocks
#[cfg(feature = "gif")]
pub mod gif {
    /// `data` cut into sub-blocks of at most 255 bytes, terminator included
    pub fn sub_blocks(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + data.len() / 255 + 2);
        for chunk in data.chunks(255) {
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
        out.push(0);
        out
    }

    pub fn comment(text: &str) -> Vec<u8> {
        let mut out = vec![0x21, 0xFE];
        out.extend(sub_blocks(text.as_bytes()));
        out
    }

    /// Application extension with an 11-byte identifier and authentication code
    pub fn application(id: &[u8; 11], data: &[u8]) -> Vec<u8> {
        let mut out = vec![0x21, 0xFF, 11];
        out.extend_from_slice(id);
        out.extend(sub_blocks(data));
        out
    }

    /// XMP stored raw, followed by the 258-byte magic trailer that ends the sub-blocks
    pub fn xmp(packet: &str) -> Vec<u8> {
        let mut out = vec![0x21, 0xFF, 11];
        out.extend_from_slice(b"XMP DataXMP");
        out.extend_from_slice(packet.as_bytes());
        out.push(0x01);
        out.extend((0..=0xFFu8).rev());
        out.push(0x00);
        out
    }

    pub fn icc(profile: &[u8]) -> Vec<u8> {
        application(b"ICCRGBG1012", profile)
    }

    /// A looping animation marker, which is not metadata
    pub fn netscape_loop() -> Vec<u8> {
        application(b"NETSCAPE2.0", &[0x01, 0x00, 0x00])
    }

    /// 2x1 GIF89a with a two-colour global table; `blocks` go before the one frame
    pub fn with_blocks(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"GIF89a".to_vec();
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&[0x80, 0, 0]);
        out.extend_from_slice(&[0, 0, 0, 0xFF, 0xFF, 0xFF]);
        for block in blocks {
            out.extend_from_slice(block);
        }
        // Graphic control extension, then the image descriptor and its LZW data
        out.extend_from_slice(&[0x21, 0xF9, 4, 0, 0, 0, 0, 0]);
        out.push(0x2C);
        out.extend_from_slice(&[0, 0, 0, 0, 2, 0, 1, 0, 0]);
        out.push(2);
        out.extend_from_slice(&[2, 0x44, 0x01, 0]);
        out.push(0x3B);
        out
    }

    pub fn minimal() -> Vec<u8> {
        with_blocks(&[])
    }

    pub fn with_comment(text: &str) -> Vec<u8> {
        with_blocks(&[comment(text)])
    }
}

/// Ogg pages carrying Vorbis or Opus streams
#[cfg(feature = "ogg")]
pub mod ogg {
    /// Stand-in for an audio packet
    pub const AUDIO: &[u8] = &[0x00, 0x11, 0x22, 0x33];

    pub const BOS: u8 = 0x02;
    pub const EOS: u8 = 0x04;
    pub const CONTINUED: u8 = 0x01;

    /// One page with an explicit lacing table
    pub fn raw_page(
        header_type: u8,
        serial: u32,
        sequence: u32,
        lacing: &[u8],
        data: &[u8],
    ) -> Vec<u8> {
        let mut out = b"OggS".to_vec();
        out.push(0);
        out.push(header_type);
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&serial.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.push(lacing.len() as u8);
        out.extend_from_slice(lacing);
        out.extend_from_slice(data);
        let crc = crate::containers::ogg_io::page_crc(&out);
        out[22..26].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// One page holding whole packets
    pub fn page(header_type: u8, serial: u32, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut data = Vec::new();
        for packet in packets {
            lacing.extend(std::iter::repeat(255).take(packet.len() / 255));
            lacing.push((packet.len() % 255) as u8);
            data.extend_from_slice(packet);
        }
        raw_page(header_type, serial, sequence, &lacing, &data)
    }

    fn vorbis_identification() -> Vec<u8> {
        let mut out = b"\x01vorbis".to_vec();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(2);
        out.extend_from_slice(&44100u32.to_le_bytes());
        out.extend_from_slice(&[0; 12]);
        out.push(0xB8);
        out.push(1);
        out
    }

    pub fn vorbis_comment_packet(comments: &[(&str, &str)]) -> Vec<u8> {
        let mut out = b"\x03vorbis".to_vec();
        out.extend(super::vorbis::comment_list("Xiph.Org libVorbis I 20200704", comments));
        // Framing bit
        out.push(1);
        out
    }

    /// Identification, comment and setup headers, then one audio page
    pub fn vorbis(comments: &[(&str, &str)]) -> Vec<u8> {
        let setup = b"\x05vorbis\x00".to_vec();
        let mut out = page(BOS, 1, 0, &[&vorbis_identification()]);
        out.extend(page(0, 1, 1, &[&vorbis_comment_packet(comments), &setup]));
        out.extend(page(EOS, 1, 2, &[AUDIO]));
        out
    }

    /// The comment packet is split across two pages
    pub fn vorbis_with_split_comments(comments: &[(&str, &str)]) -> Vec<u8> {
        let packet = vorbis_comment_packet(comments);
        let (head, tail) = packet.split_at(255);
        let mut out = page(BOS, 1, 0, &[&vorbis_identification()]);
        out.extend(raw_page(0, 1, 1, &[255], head));
        let mut lacing = vec![255; tail.len() / 255];
        lacing.push((tail.len() % 255) as u8);
        out.extend(raw_page(CONTINUED, 1, 2, &lacing, tail));
        out.extend(page(EOS, 1, 3, &[AUDIO]));
        out
    }

    pub fn opus(comments: &[(&str, &str)]) -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2, 0x38, 0x01]);
        head.extend_from_slice(&48000u32.to_le_bytes());
        head.extend_from_slice(&[0, 0, 0]);
        let mut tags = b"OpusTags".to_vec();
        tags.extend(super::vorbis::comment_list("libopus 1.4", comments));
        let mut out = page(BOS, 7, 0, &[&head]);
        out.extend(page(0, 7, 1, &[&tags]));
        out.extend(page(EOS, 7, 2, &[AUDIO]));
        out
    }
}
