//! Minimal TIFF/EXIF reader and patcher
//!
//! This module provides lightweight TIFF handling for:
//! - Reading IFD0, the EXIF sub-IFD and the GPS IFD as canonical fields
//! - Rewriting the ASCII tags of IFD0 without disturbing anything else
//! - Dropping the GPS IFD
//! - Keeping only a chosen set of fields across every directory
//!
//! Edits never move existing data. A longer value is appended at the end of the blob and
//! a new tag relocates IFD0 to the end, so offsets into MakerNotes and other opaque blocks
//! stay valid.
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), magic (0x002A), IFD offset
//! - IFD (Image File Directory): tag count, tags (12 bytes each), next IFD offset
//! - Tags: tag ID (2), type (2), count (4), value/offset (4)

use crate::{
    error::{Error, Result},
    field::{category, is_printable, MetadataField},
    text, ContainerKind,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashSet;

/// TIFF/EXIF tag IDs
pub mod tags {
    // IFD0 (main image) tags
    pub const IMAGE_WIDTH: u16 = 0x0100;
    pub const IMAGE_LENGTH: u16 = 0x0101;
    pub const IMAGE_DESCRIPTION: u16 = 0x010E;
    pub const MAKE: u16 = 0x010F;
    pub const MODEL: u16 = 0x0110;
    pub const ORIENTATION: u16 = 0x0112;
    pub const X_RESOLUTION: u16 = 0x011A;
    pub const Y_RESOLUTION: u16 = 0x011B;
    pub const RESOLUTION_UNIT: u16 = 0x0128;
    pub const SOFTWARE: u16 = 0x0131;
    pub const DATE_TIME: u16 = 0x0132;
    pub const ARTIST: u16 = 0x013B;
    pub const COPYRIGHT: u16 = 0x8298;
    pub const EXIF_IFD_POINTER: u16 = 0x8769;
    pub const GPS_IFD_POINTER: u16 = 0x8825;
    pub const INTEROP_IFD_POINTER: u16 = 0xA005;

    // EXIF sub-IFD tags
    pub const EXPOSURE_TIME: u16 = 0x829A;
    pub const F_NUMBER: u16 = 0x829D;
    pub const ISO_SPEED: u16 = 0x8827;
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const DATE_TIME_DIGITIZED: u16 = 0x9004;
    pub const FOCAL_LENGTH: u16 = 0x920A;
    pub const MAKER_NOTE: u16 = 0x927C;
    pub const USER_COMMENT: u16 = 0x9286;
    pub const PIXEL_X_DIMENSION: u16 = 0xA002;
    pub const PIXEL_Y_DIMENSION: u16 = 0xA003;
    pub const LENS_MODEL: u16 = 0xA434;

    // IFD1 (thumbnail) tags
    pub const JPEG_INTERCHANGE_FORMAT: u16 = 0x0201;
    pub const JPEG_INTERCHANGE_FORMAT_LENGTH: u16 = 0x0202;
}

/// TIFF data types
mod types {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const SBYTE: u16 = 6;
    pub const UNDEFINED: u16 = 7;
    pub const SSHORT: u16 = 8;
    pub const SLONG: u16 = 9;
    pub const SRATIONAL: u16 = 10;
}

/// Maximum number of tags in an IFD (prevents DOS attacks)
const MAX_IFD_TAGS: u16 = 1000;

/// Array values longer than this are summarized
const MAX_RENDERED_VALUES: usize = 16;

/// IFD0 tags edit can write, by canonical key
pub const EDITABLE_TAGS: &[(u16, &str)] = &[
    (tags::IMAGE_DESCRIPTION, "ImageDescription"),
    (tags::MAKE, "Make"),
    (tags::MODEL, "Model"),
    (tags::SOFTWARE, "Software"),
    (tags::ARTIST, "Artist"),
    (tags::COPYRIGHT, "Copyright"),
];

const IFD0_NAMES: &[(u16, &str)] = &[
    (tags::IMAGE_WIDTH, "ImageWidth"),
    (tags::IMAGE_LENGTH, "ImageLength"),
    (tags::IMAGE_DESCRIPTION, "ImageDescription"),
    (tags::MAKE, "Make"),
    (tags::MODEL, "Model"),
    (tags::ORIENTATION, "Orientation"),
    (tags::X_RESOLUTION, "XResolution"),
    (tags::Y_RESOLUTION, "YResolution"),
    (tags::RESOLUTION_UNIT, "ResolutionUnit"),
    (tags::SOFTWARE, "Software"),
    (tags::DATE_TIME, "DateTime"),
    (tags::ARTIST, "Artist"),
    (tags::COPYRIGHT, "Copyright"),
];

const EXIF_NAMES: &[(u16, &str)] = &[
    (tags::EXPOSURE_TIME, "ExposureTime"),
    (tags::F_NUMBER, "FNumber"),
    (tags::ISO_SPEED, "ISOSpeedRatings"),
    (tags::DATE_TIME_ORIGINAL, "DateTimeOriginal"),
    (tags::DATE_TIME_DIGITIZED, "DateTimeDigitized"),
    (tags::FOCAL_LENGTH, "FocalLength"),
    (tags::MAKER_NOTE, "MakerNote"),
    (tags::USER_COMMENT, "UserComment"),
    (tags::PIXEL_X_DIMENSION, "PixelXDimension"),
    (tags::PIXEL_Y_DIMENSION, "PixelYDimension"),
    (tags::LENS_MODEL, "LensModel"),
];

const GPS_NAMES: &[(u16, &str)] = &[
    (0x00, "GPSVersionID"),
    (0x01, "GPSLatitudeRef"),
    (0x02, "GPSLatitude"),
    (0x03, "GPSLongitudeRef"),
    (0x04, "GPSLongitude"),
    (0x05, "GPSAltitudeRef"),
    (0x06, "GPSAltitude"),
    (0x07, "GPSTimeStamp"),
    (0x12, "GPSMapDatum"),
    (0x1D, "GPSDateStamp"),
];

/// Canonical key to IFD0 tag, for the tags edit may write
pub fn editable_tag(key: &str) -> Option<(u16, &'static str)> {
    EDITABLE_TAGS
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(key))
        .copied()
}

/// Byte order for reading multi-byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn from_header(data: &[u8]) -> Option<Self> {
        let order = match data.get(0..2)? {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return None,
        };
        (order.u16(data.get(2..4)?) == 0x002A).then_some(order)
    }

    fn u16(&self, data: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(data),
            Endian::Big => BigEndian::read_u16(data),
        }
    }

    fn u32(&self, data: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(data),
            Endian::Big => BigEndian::read_u32(data),
        }
    }

    fn put_u16(&self, data: &mut [u8], v: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(data, v),
            Endian::Big => BigEndian::write_u16(data, v),
        }
    }

    fn put_u32(&self, data: &mut [u8], v: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(data, v),
            Endian::Big => BigEndian::write_u32(data, v),
        }
    }
}

/// One 12-byte directory entry
#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u16,
    typ: u16,
    count: u32,
    /// Inline value or offset, raw bytes
    value: [u8; 4],
}

impl Entry {
    fn byte_len(&self) -> Option<usize> {
        let unit = match self.typ {
            types::BYTE | types::ASCII | types::SBYTE | types::UNDEFINED => 1,
            types::SHORT | types::SSHORT => 2,
            types::LONG | types::SLONG | 11 => 4,
            types::RATIONAL | types::SRATIONAL | 12 => 8,
            _ => return None,
        };
        (self.count as usize).checked_mul(unit)
    }

    /// Bytes of the value, inline or out of line
    fn data<'a>(&'a self, blob: &'a [u8], order: Endian) -> Option<&'a [u8]> {
        let len = self.byte_len()?;
        if len <= 4 {
            Some(&self.value[..len])
        } else {
            let offset = order.u32(&self.value) as usize;
            blob.get(offset..offset.checked_add(len)?)
        }
    }

    fn offset(&self, order: Endian) -> u32 {
        order.u32(&self.value)
    }
}

/// A parsed directory and where it sits in the blob
#[derive(Debug, Clone)]
struct Ifd {
    offset: usize,
    entries: Vec<Entry>,
    next: u32,
}

fn read_ifd(blob: &[u8], offset: usize, order: Endian) -> Option<Ifd> {
    let count = order.u16(blob.get(offset..offset + 2)?);
    if count > MAX_IFD_TAGS {
        return None;
    }
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let at = offset + 2 + i * 12;
        let raw = blob.get(at..at + 12)?;
        entries.push(Entry {
            tag: order.u16(&raw[0..2]),
            typ: order.u16(&raw[2..4]),
            count: order.u32(&raw[4..8]),
            value: [raw[8], raw[9], raw[10], raw[11]],
        });
    }
    let next_at = offset + 2 + count as usize * 12;
    let next = blob
        .get(next_at..next_at + 4)
        .map(|b| order.u32(b))
        .unwrap_or(0);
    Some(Ifd {
        offset,
        entries,
        next,
    })
}

/// Render an entry's value as text
fn render(entry: &Entry, blob: &[u8], order: Endian) -> String {
    let Some(data) = entry.data(blob, order) else {
        return format!("<{} values out of range>", entry.count);
    };
    match entry.typ {
        types::ASCII => text::clean(text::until_nul(data)),
        types::UNDEFINED | types::BYTE | types::SBYTE => {
            if is_printable(text::until_nul(data)) && !data.is_empty() && data[0] != 0 {
                text::clean(text::until_nul(data))
            } else if data.len() <= 4 {
                data.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(" ")
            } else {
                format!("<{} bytes>", data.len())
            }
        }
        types::SHORT | types::SSHORT => join_values(data.chunks_exact(2).map(|c| {
            let v = order.u16(c);
            if entry.typ == types::SSHORT {
                (v as i16).to_string()
            } else {
                v.to_string()
            }
        })),
        types::LONG | types::SLONG => join_values(data.chunks_exact(4).map(|c| {
            let v = order.u32(c);
            if entry.typ == types::SLONG {
                (v as i32).to_string()
            } else {
                v.to_string()
            }
        })),
        types::RATIONAL | types::SRATIONAL => join_values(data.chunks_exact(8).map(|c| {
            let (n, d) = (order.u32(&c[0..4]), order.u32(&c[4..8]));
            let (n, d) = if entry.typ == types::SRATIONAL {
                (n as i32 as f64, d as i32 as f64)
            } else {
                (n as f64, d as f64)
            };
            if d == 0.0 {
                "0".to_string()
            } else {
                format_number(n / d)
            }
        })),
        _ => format!("<{} bytes>", data.len()),
    }
}

fn join_values(values: impl Iterator<Item = String>) -> String {
    let all: Vec<String> = values.collect();
    if all.len() > MAX_RENDERED_VALUES {
        format!("{} ... ({} values)", all[..MAX_RENDERED_VALUES].join(" "), all.len())
    } else {
        all.join(" ")
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn tag_name(names: &[(u16, &'static str)], tag: u16) -> String {
    names
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, n)| n.to_string())
        .unwrap_or_else(|| format!("Tag0x{:04X}", tag))
}

/// Which directory an entry was read from, which decides its name and category
#[derive(Debug, Clone, Copy)]
enum Directory {
    Ifd0,
    Exif,
    Gps,
}

impl Directory {
    fn field(&self, entry: &Entry, blob: &[u8], order: Endian) -> MetadataField {
        let value = render(entry, blob, order);
        match self {
            Directory::Ifd0 => {
                let editable = EDITABLE_TAGS.iter().any(|(t, _)| *t == entry.tag);
                MetadataField::new(tag_name(IFD0_NAMES, entry.tag), value, category::EXIF)
                    .editable(editable)
            }
            Directory::Exif => {
                MetadataField::new(tag_name(EXIF_NAMES, entry.tag), value, category::EXIF)
            }
            Directory::Gps => {
                let key = match GPS_NAMES.iter().find(|(t, _)| *t == entry.tag) {
                    Some((_, name)) => name.to_string(),
                    None => format!("GPSTag0x{:04X}", entry.tag),
                };
                MetadataField::new(key, value, category::GPS)
            }
        }
    }
}

/// Parse a TIFF blob (starting at the byte-order mark) into fields
///
/// IFD0 and the EXIF sub-IFD are reported under "EXIF", the GPS IFD under "GPS".
/// Unreadable directories end the walk silently; whatever was read is returned.
pub fn parse_fields(blob: &[u8]) -> Vec<MetadataField> {
    let mut fields = Vec::new();
    let Some(order) = Endian::from_header(blob) else {
        return fields;
    };
    let mut visited = HashSet::new();
    let Some(ifd0_offset) = blob.get(4..8).map(|b| order.u32(b) as usize) else {
        return fields;
    };
    let Some(ifd0) = read_ifd(blob, ifd0_offset, order) else {
        return fields;
    };
    visited.insert(ifd0.offset);

    let mut exif_ifd = None;
    let mut gps_ifd = None;
    for entry in &ifd0.entries {
        match entry.tag {
            tags::EXIF_IFD_POINTER => exif_ifd = Some(entry.offset(order) as usize),
            tags::GPS_IFD_POINTER => gps_ifd = Some(entry.offset(order) as usize),
            tags::INTEROP_IFD_POINTER => {}
            _ => fields.push(Directory::Ifd0.field(entry, blob, order)),
        }
    }

    if let Some(offset) = exif_ifd.filter(|o| visited.insert(*o)) {
        if let Some(ifd) = read_ifd(blob, offset, order) {
            for entry in ifd.entries.iter().filter(|e| e.tag != tags::INTEROP_IFD_POINTER) {
                fields.push(Directory::Exif.field(entry, blob, order));
            }
        }
    }

    if let Some(offset) = gps_ifd.filter(|o| visited.insert(*o)) {
        if let Some(ifd) = read_ifd(blob, offset, order) {
            for entry in &ifd.entries {
                fields.push(Directory::Gps.field(entry, blob, order));
            }
        }
    }

    // IFD1 describes the embedded thumbnail
    let ifd1 = (ifd0.next as usize != 0)
        .then_some(ifd0.next as usize)
        .filter(|o| visited.insert(*o))
        .and_then(|o| read_ifd(blob, o, order));
    if let Some(ifd1) = ifd1 {
        let length = ifd1
            .entries
            .iter()
            .find(|e| e.tag == tags::JPEG_INTERCHANGE_FORMAT_LENGTH)
            .map(|e| render(e, blob, order));
        if let Some(length) = length {
            fields.push(MetadataField::new(
                "Thumbnail",
                format!("<image/jpeg, {} bytes>", length),
                category::EXIF,
            ));
        }
    }
    fields
}

/// In-place editor for a TIFF blob
///
/// Keeps every existing byte where it is; new data goes at the end.
#[derive(Debug)]
pub struct TiffEditor {
    kind: ContainerKind,
    blob: Vec<u8>,
    order: Endian,
}

impl TiffEditor {
    /// Wrap an existing blob, which must start with a valid TIFF header
    pub fn new(kind: ContainerKind, blob: Vec<u8>) -> Result<Self> {
        let order = Endian::from_header(&blob)
            .ok_or_else(|| Error::malformed(kind, "EXIF", 0, "missing TIFF header"))?;
        let editor = Self { kind, blob, order };
        editor.ifd0()?;
        Ok(editor)
    }

    /// A big-endian TIFF with an empty IFD0
    pub fn empty(kind: ContainerKind) -> Self {
        let mut blob = Vec::with_capacity(14);
        blob.extend_from_slice(b"MM\x00\x2A");
        blob.extend_from_slice(&8u32.to_be_bytes());
        blob.extend_from_slice(&0u16.to_be_bytes());
        blob.extend_from_slice(&0u32.to_be_bytes());
        Self {
            kind,
            blob,
            order: Endian::Big,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.blob
    }

    fn malformed(&self, reason: &str) -> Error {
        Error::malformed(self.kind, "EXIF", 0, reason)
    }

    fn ifd0(&self) -> Result<Ifd> {
        self.blob
            .get(4..8)
            .map(|b| self.order.u32(b) as usize)
            .and_then(|offset| read_ifd(&self.blob, offset, self.order))
            .ok_or_else(|| self.malformed("unreadable IFD0"))
    }

    /// Append bytes at a word boundary and return their offset
    fn append(&mut self, bytes: &[u8]) -> Result<u32> {
        if self.blob.len() % 2 == 1 {
            self.blob.push(0);
        }
        let offset =
            u32::try_from(self.blob.len()).map_err(|_| self.malformed("TIFF grew past 4 GiB"))?;
        self.blob.extend_from_slice(bytes);
        Ok(offset)
    }

    fn entry_at(ifd: &Ifd, index: usize) -> usize {
        ifd.offset + 2 + index * 12
    }

    fn write_entry(&mut self, at: usize, entry: &Entry) {
        let order = self.order;
        let slot = &mut self.blob[at..at + 12];
        order.put_u16(&mut slot[0..2], entry.tag);
        order.put_u16(&mut slot[2..4], entry.typ);
        order.put_u32(&mut slot[4..8], entry.count);
        slot[8..12].copy_from_slice(&entry.value);
    }

    /// Set an ASCII tag in IFD0
    pub fn set_ascii(&mut self, tag: u16, value: &str) -> Result<()> {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        let count =
            u32::try_from(bytes.len()).map_err(|_| self.malformed("value too long for TIFF"))?;

        let ifd = self.ifd0()?;
        let existing = ifd.entries.iter().position(|e| e.tag == tag);
        let mut entry = Entry {
            tag,
            typ: types::ASCII,
            count,
            value: [0; 4],
        };

        if bytes.len() <= 4 {
            entry.value[..bytes.len()].copy_from_slice(&bytes);
        } else {
            // Reuse the old out-of-line slot when the new value fits in it
            let reusable = existing.and_then(|i| {
                let old = &ifd.entries[i];
                let len = old.byte_len()?;
                let offset = old.offset(self.order) as usize;
                (len > 4 && bytes.len() <= len && offset + len <= self.blob.len())
                    .then_some((offset, len))
            });
            let offset = match reusable {
                Some((offset, len)) => {
                    self.blob[offset..offset + len].fill(0);
                    self.blob[offset..offset + bytes.len()].copy_from_slice(&bytes);
                    offset as u32
                }
                None => self.append(&bytes)?,
            };
            self.order.put_u32(&mut entry.value, offset);
        }

        match existing {
            Some(i) => {
                let at = Self::entry_at(&ifd, i);
                self.write_entry(at, &entry);
            }
            None => self.relocate_ifd0_with(ifd, entry)?,
        }
        Ok(())
    }

    /// Write a copy of IFD0 plus one new entry at the end of the blob
    fn relocate_ifd0_with(&mut self, ifd: Ifd, entry: Entry) -> Result<()> {
        let mut entries = ifd.entries;
        let at = entries.partition_point(|e| e.tag < entry.tag);
        entries.insert(at, entry);
        let count = u16::try_from(entries.len())
            .ok()
            .filter(|c| *c <= MAX_IFD_TAGS)
            .ok_or_else(|| self.malformed("too many IFD0 entries"))?;

        let mut table = vec![0u8; 2 + entries.len() * 12 + 4];
        self.order.put_u16(&mut table[0..2], count);
        let new_offset = self.append(&table)?;
        for (i, e) in entries.iter().enumerate() {
            self.write_entry(new_offset as usize + 2 + i * 12, e);
        }
        let next_at = new_offset as usize + 2 + entries.len() * 12;
        let order = self.order;
        order.put_u32(&mut self.blob[next_at..next_at + 4], ifd.next);
        order.put_u32(&mut self.blob[4..8], new_offset);
        log_debug!(new_offset, "relocated IFD0 to add tag 0x{:04X}", entry.tag);
        Ok(())
    }

    /// Rewrite a directory in place with only the entries flagged in `retain`
    ///
    /// Survivors move up, the count and next pointer follow them and the freed slots are
    /// zeroed, as are the out-of-line values of dropped entries. The directory may lack
    /// its next pointer in the source; the shrunk table always has room for one.
    fn compact(&mut self, ifd: &Ifd, retain: &[bool], next: u32) -> Result<()> {
        let order = self.order;
        let kept: Vec<Entry> = ifd
            .entries
            .iter()
            .zip(retain)
            .filter(|(_, keep)| **keep)
            .map(|(e, _)| *e)
            .collect();
        for entry in ifd.entries.iter().zip(retain).filter(|(_, keep)| !**keep).map(|(e, _)| e) {
            if let Some(len) = entry.byte_len().filter(|l| *l > 4) {
                let at = entry.offset(order) as usize;
                if let Some(slot) = self.blob.get_mut(at..at.saturating_add(len)) {
                    slot.fill(0);
                }
            }
        }

        let table_end = Self::entry_at(ifd, ifd.entries.len());
        let next_at = Self::entry_at(ifd, kept.len());
        if kept.len() == ifd.entries.len() && table_end + 4 > self.blob.len() {
            // Nothing moves and there is no next pointer to rewrite
            return Ok(());
        }
        let count = self
            .blob
            .get_mut(ifd.offset..ifd.offset + 2)
            .ok_or_else(|| {
                Error::malformed(self.kind, "EXIF", ifd.offset as u64, "IFD out of range")
            })?;
        order.put_u16(count, kept.len() as u16);
        for (i, entry) in kept.iter().enumerate() {
            self.write_entry(Self::entry_at(ifd, i), entry);
        }
        let pointer = self
            .blob
            .get_mut(next_at..next_at + 4)
            .ok_or_else(|| {
                Error::malformed(self.kind, "EXIF", next_at as u64, "IFD out of range")
            })?;
        order.put_u32(pointer, next);
        let freed_end = (table_end + 4).min(self.blob.len());
        if let Some(freed) = self.blob.get_mut(next_at + 4..freed_end) {
            freed.fill(0);
        }
        Ok(())
    }

    /// Remove a tag from IFD0; returns false if it was not there
    pub fn remove(&mut self, tag: u16) -> Result<bool> {
        let ifd = self.ifd0()?;
        if !ifd.entries.iter().any(|e| e.tag == tag) {
            return Ok(false);
        }
        let retain: Vec<bool> = ifd.entries.iter().map(|e| e.tag != tag).collect();
        self.compact(&ifd, &retain, ifd.next)?;
        Ok(true)
    }

    /// Whether IFD0 points at a GPS directory
    pub fn has_gps(&self) -> bool {
        self.ifd0()
            .map(|ifd| ifd.entries.iter().any(|e| e.tag == tags::GPS_IFD_POINTER))
            .unwrap_or(false)
    }

    /// Zero a whole sub-directory and its values
    fn erase_ifd(&mut self, offset: usize) -> Result<()> {
        if let Some(ifd) = read_ifd(&self.blob, offset, self.order) {
            let none = vec![false; ifd.entries.len()];
            self.compact(&ifd, &none, 0)?;
            let end = (offset + 6).min(self.blob.len());
            self.blob[offset..end].fill(0);
        }
        Ok(())
    }

    /// Zero the GPS directory and its values, then drop the pointer to it
    pub fn remove_gps(&mut self) -> Result<bool> {
        let ifd = self.ifd0()?;
        let Some(pointer) = ifd.entries.iter().find(|e| e.tag == tags::GPS_IFD_POINTER) else {
            return Ok(false);
        };
        let offset = pointer.offset(self.order) as usize;
        if offset != ifd.offset {
            self.erase_ifd(offset)?;
        }
        self.remove(tags::GPS_IFD_POINTER)
    }

    /// Keep only the fields `keep` accepts, across IFD0, the Exif and GPS directories
    /// and the IFD1 thumbnail
    ///
    /// Field names match [`parse_fields`]. A sub-directory left empty is erased together
    /// with its pointer; a thumbnail that is not kept is erased and unlinked.
    pub fn retain(&mut self, keep: impl Fn(&MetadataField) -> bool) -> Result<()> {
        let order = self.order;
        let ifd0 = self.ifd0()?;
        let mut visited = HashSet::from([ifd0.offset]);
        let mut dropped_pointers = Vec::new();

        for (pointer_tag, directory) in [
            (tags::EXIF_IFD_POINTER, Directory::Exif),
            (tags::GPS_IFD_POINTER, Directory::Gps),
        ] {
            let Some(pointer) = ifd0.entries.iter().find(|e| e.tag == pointer_tag) else {
                continue;
            };
            let offset = pointer.offset(order) as usize;
            if !visited.insert(offset) {
                continue;
            }
            let Some(sub) = read_ifd(&self.blob, offset, order) else {
                continue;
            };
            let mut retain: Vec<bool> = sub
                .entries
                .iter()
                .map(|e| {
                    e.tag != tags::INTEROP_IFD_POINTER
                        && keep(&directory.field(e, &self.blob, order))
                })
                .collect();
            if retain.iter().any(|r| *r) {
                // The interoperability directory only survives alongside other Exif data
                for (flag, entry) in retain.iter_mut().zip(&sub.entries) {
                    *flag |= entry.tag == tags::INTEROP_IFD_POINTER;
                }
                self.compact(&sub, &retain, sub.next)?;
            } else {
                self.erase_ifd(offset)?;
                dropped_pointers.push(pointer_tag);
            }
        }

        let mut next = ifd0.next;
        let ifd1 = (next != 0)
            .then_some(next as usize)
            .filter(|o| visited.insert(*o))
            .and_then(|o| read_ifd(&self.blob, o, order));
        if let Some(ifd1) = ifd1 {
            let length = ifd1
                .entries
                .iter()
                .find(|e| e.tag == tags::JPEG_INTERCHANGE_FORMAT_LENGTH)
                .map(|e| render(e, &self.blob, order))
                .unwrap_or_default();
            let thumbnail = MetadataField::new(
                "Thumbnail",
                format!("<image/jpeg, {} bytes>", length),
                category::EXIF,
            );
            if !keep(&thumbnail) {
                self.erase_thumbnail(&ifd1);
                self.erase_ifd(ifd1.offset)?;
                next = 0;
            }
        }

        let retain: Vec<bool> = ifd0
            .entries
            .iter()
            .map(|e| match e.tag {
                tags::EXIF_IFD_POINTER | tags::GPS_IFD_POINTER => {
                    !dropped_pointers.contains(&e.tag)
                }
                tags::INTEROP_IFD_POINTER => true,
                _ => keep(&Directory::Ifd0.field(e, &self.blob, order)),
            })
            .collect();
        self.compact(&ifd0, &retain, next)
    }

    /// Zero the JPEG bytes an IFD1 points at
    fn erase_thumbnail(&mut self, ifd1: &Ifd) {
        let value = |tag| {
            ifd1.entries
                .iter()
                .find(|e| e.tag == tag)
                .map(|e| e.offset(self.order) as usize)
        };
        let start = value(tags::JPEG_INTERCHANGE_FORMAT);
        let len = value(tags::JPEG_INTERCHANGE_FORMAT_LENGTH);
        if let (Some(start), Some(len)) = (start, len) {
            if let Some(slot) = self.blob.get_mut(start..start.saturating_add(len)) {
                slot.fill(0);
            }
        }
    }
}

/// Keep only the listed fields of a TIFF blob; `None` when nothing would survive
pub fn retain_fields(
    kind: ContainerKind,
    blob: Vec<u8>,
    keep: impl Fn(&MetadataField) -> bool,
) -> Result<Option<Vec<u8>>> {
    if !parse_fields(&blob).iter().any(&keep) {
        return Ok(None);
    }
    let mut editor = TiffEditor::new(kind, blob)?;
    editor.retain(keep)?;
    Ok(Some(editor.into_bytes()))
}

#[cfg(all(test, feature = "jpeg"))]
mod tests {
    use super::*;
    use crate::test_utils::exif::{self, directory, header};

    fn sample() -> Vec<u8> {
        let mut editor = TiffEditor::empty(ContainerKind::Jpeg);
        editor.set_ascii(tags::MAKE, "Canon").unwrap();
        editor.set_ascii(tags::MODEL, "EOS").unwrap();
        editor.into_bytes()
    }

    #[test]
    fn test_endian() {
        assert_eq!(Endian::Big.u16(&[0x12, 0x34]), 0x1234);
        assert_eq!(Endian::Little.u16(&[0x34, 0x12]), 0x1234);
        assert_eq!(Endian::Big.u32(&[0x12, 0x34, 0x56, 0x78]), 0x12345678);
        assert_eq!(Endian::Little.u32(&[0x78, 0x56, 0x34, 0x12]), 0x12345678);
        assert_eq!(Endian::from_header(b"II\x2A\x00"), Some(Endian::Little));
        assert_eq!(Endian::from_header(b"XX\x2A\x00"), None);
    }

    #[test]
    fn test_inline_and_out_of_line_values() {
        let fields = parse_fields(&sample());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "Make");
        assert_eq!(fields[0].value, "Canon");
        assert!(fields[0].editable);
        // "EOS\0" fits inline
        assert_eq!(fields[1].value, "EOS");
    }

    #[test]
    fn test_overwrite_in_place_when_shorter() {
        let blob = sample();
        let len = blob.len();
        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob).unwrap();
        editor.set_ascii(tags::MAKE, "Sony").unwrap();
        let blob = editor.into_bytes();
        assert_eq!(blob.len(), len);
        assert!(parse_fields(&blob).iter().any(|f| f.key == "Make" && f.value == "Sony"));
    }

    #[test]
    fn test_longer_value_is_appended() {
        let blob = sample();
        let len = blob.len();
        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob).unwrap();
        editor.set_ascii(tags::MAKE, "A considerably longer maker").unwrap();
        let blob = editor.into_bytes();
        assert!(blob.len() > len);
        assert!(parse_fields(&blob)
            .iter()
            .any(|f| f.key == "Make" && f.value == "A considerably longer maker"));
    }

    #[test]
    fn test_remove_tag() {
        let mut editor = TiffEditor::new(ContainerKind::Jpeg, sample()).unwrap();
        assert!(editor.remove(tags::MAKE).unwrap());
        assert!(!editor.remove(tags::MAKE).unwrap());
        let fields = parse_fields(&editor.into_bytes());
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].key, "Model");
    }

    #[test]
    fn test_little_endian_header() {
        let mut blob = b"II\x2A\x00\x08\x00\x00\x00".to_vec();
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&tags::ORIENTATION.to_le_bytes());
        blob.extend_from_slice(&types::SHORT.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&[6, 0, 0, 0]);
        blob.extend_from_slice(&0u32.to_le_bytes());
        let fields = parse_fields(&blob);
        assert_eq!(fields[0].key, "Orientation");
        assert_eq!(fields[0].value, "6");
        assert!(!fields[0].editable);
    }

    #[test]
    fn test_hostile_tag_count_is_ignored() {
        let mut blob = b"MM\x00\x2A\x00\x00\x00\x08".to_vec();
        blob.extend_from_slice(&0xFFFFu16.to_be_bytes());
        assert!(parse_fields(&blob).is_empty());
        assert!(TiffEditor::new(ContainerKind::Jpeg, blob).is_err());
    }

    #[test]
    fn test_remove_without_next_pointer() {
        let blob = exif::without_next_pointer();
        assert_eq!(parse_fields(&blob).len(), 2);

        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob).unwrap();
        assert!(editor.remove(tags::MAKE).unwrap());
        assert!(!editor.remove_gps().unwrap());
        let fields = parse_fields(&editor.into_bytes());
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].key, "Model");
    }

    #[test]
    fn test_remove_gps_when_ifd0_has_no_next_pointer() {
        let blob = exif::gps_without_next_pointer();
        assert_eq!(blob.len(), 52);
        assert!(parse_fields(&blob).iter().any(|f| f.key == "GPSLatitudeRef"));

        let mut editor = TiffEditor::new(ContainerKind::Jpeg, blob).unwrap();
        assert!(editor.remove_gps().unwrap());
        let blob = editor.into_bytes();
        assert_eq!(blob.len(), 52);
        let keys: Vec<String> = parse_fields(&blob).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, ["Make"]);
    }

    /// IFD0 {Make, Orientation, DateTime, Exif pointer} -> Exif {DateTimeOriginal},
    /// IFD1 with a 4-byte thumbnail
    fn camera_blob() -> Vec<u8> {
        let mut blob = header(8);
        blob.extend(directory(
            &[
                (tags::MAKE, types::ASCII, 4, *b"Can\0"),
                (tags::ORIENTATION, types::SHORT, 1, [0, 6, 0, 0]),
                (tags::DATE_TIME, types::ASCII, 20, 62u32.to_be_bytes()),
                (tags::EXIF_IFD_POINTER, types::LONG, 1, 82u32.to_be_bytes()),
            ],
            Some(100),
        ));
        blob.extend_from_slice(b"2024:01:02 03:04:05\0");
        blob.extend(directory(
            &[(tags::DATE_TIME_ORIGINAL, types::ASCII, 2, *b"x\0\0\0")],
            Some(0),
        ));
        blob.extend(directory(
            &[
                (tags::JPEG_INTERCHANGE_FORMAT, types::LONG, 1, 130u32.to_be_bytes()),
                (tags::JPEG_INTERCHANGE_FORMAT_LENGTH, types::LONG, 1, 4u32.to_be_bytes()),
            ],
            Some(0),
        ));
        blob.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        blob
    }

    #[test]
    fn test_retain_clears_every_directory() {
        let blob = camera_blob();
        let keys: Vec<String> = parse_fields(&blob).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, ["Make", "Orientation", "DateTime", "DateTimeOriginal", "Thumbnail"]);

        let blob = retain_fields(ContainerKind::Jpeg, blob, |f| f.key == "Make")
            .unwrap()
            .unwrap();
        let keys: Vec<String> = parse_fields(&blob).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, ["Make"]);
        // Dropped values and the thumbnail are zeroed, not just unlinked
        assert!(blob[62..82].iter().all(|b| *b == 0));
        assert!(blob[130..134].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_retain_keeps_exif_sub_ifd_field() {
        let keep = |f: &MetadataField| f.key == "DateTimeOriginal";
        let blob = retain_fields(ContainerKind::Jpeg, camera_blob(), keep).unwrap().unwrap();
        let keys: Vec<String> = parse_fields(&blob).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, ["DateTimeOriginal"]);
    }

    #[test]
    fn test_retain_nothing() {
        assert!(retain_fields(ContainerKind::Jpeg, camera_blob(), |_| false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
    }
}
