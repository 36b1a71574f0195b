//! IPTC-IIM datasets inside Photoshop image resource blocks
//!
//! An APP13 segment holds `Photoshop 3.0\0` followed by `8BIM` resources; resource
//! `0x0404` is the IPTC block, a run of `0x1C record dataset length value` entries.

use crate::{
    cursor::ByteCursor,
    error::Result,
    field::{category, MetadataField},
};
use byteorder::BigEndian;

pub const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";

const RESOURCE_SIGNATURE: &[u8; 4] = b"8BIM";
const IPTC_RESOURCE: u16 = 0x0404;
const TAG_MARKER: u8 = 0x1C;
const APPLICATION_RECORD: u8 = 2;

/// Record 2 dataset names
const DATASETS: &[(u8, &str)] = &[
    (0x05, "ObjectName"),
    (0x0F, "Category"),
    (0x14, "SupplementalCategory"),
    (0x19, "Keywords"),
    (0x1E, "DateCreated"),
    (0x1F, "TimeCreated"),
    (0x28, "SpecialInstructions"),
    (0x37, "DigitalCreationDate"),
    (0x3C, "Byline"),
    (0x3E, "BylineTitle"),
    (0x46, "City"),
    (0x4E, "Province"),
    (0x55, "Country"),
    (0x67, "OriginalTransmissionReference"),
    (0x69, "Headline"),
    (0x6E, "Credit"),
    (0x73, "Source"),
    (0x74, "CopyrightNotice"),
    (0x76, "Contact"),
    (0x78, "Caption"),
    (0x7A, "CaptionWriter"),
];

/// One Photoshop image resource
struct Resource<'a> {
    id: u16,
    data: &'a [u8],
}

fn read_resource<'a>(cursor: &mut ByteCursor<'a>) -> Result<Resource<'a>> {
    cursor.read_bytes(4)?;
    let id = cursor.read_u16::<BigEndian>()?;
    // Pascal string padded so that length byte + name is even
    let name_len = cursor.read_u8()? as usize;
    cursor.skip(name_len + (name_len + 1) % 2)?;
    let size = cursor.read_u32::<BigEndian>()? as usize;
    let data = cursor.read_bytes(size)?;
    if size % 2 == 1 && !cursor.at_end() {
        cursor.skip(1)?;
    }
    Ok(Resource { id, data })
}

/// Fields from the resources that follow the Photoshop signature
pub fn parse_fields(resources: &[u8]) -> Vec<MetadataField> {
    let mut fields = Vec::new();
    let mut cursor = ByteCursor::new(resources);
    while cursor.peek_bytes(4).map(|s| s == RESOURCE_SIGNATURE).unwrap_or(false) {
        match read_resource(&mut cursor) {
            Ok(resource) if resource.id == IPTC_RESOURCE => {
                parse_datasets(resource.data, &mut fields)
            }
            Ok(_) => {}
            Err(e) => {
                log_debug!("stopping at unreadable 8BIM resource: {}", e);
                break;
            }
        }
    }
    fields
}

fn parse_datasets(block: &[u8], fields: &mut Vec<MetadataField>) {
    let mut cursor = ByteCursor::new(block);
    while let Ok(TAG_MARKER) = cursor.read_u8() {
        let Ok(header) = cursor.read_array::<4>() else { break };
        let (record, dataset) = (header[0], header[1]);
        let mut len = u16::from_be_bytes([header[2], header[3]]) as usize;
        if len & 0x8000 != 0 {
            // Extended dataset: the low bits count the length bytes that follow
            let Ok(len_bytes) = cursor.read_bytes(len & 0x7FFF) else { break };
            if len_bytes.len() > 8 {
                break;
            }
            len = len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        }
        let Ok(value) = cursor.read_bytes(len) else { break };
        if record != APPLICATION_RECORD {
            continue;
        }
        if let Some((_, name)) = DATASETS.iter().find(|(id, _)| *id == dataset) {
            fields.push(MetadataField::new(
                *name,
                String::from_utf8_lossy(value).trim_end_matches('\0'),
                category::IPTC,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = RESOURCE_SIGNATURE.to_vec();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // empty name, padded
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn dataset(id: u8, value: &str) -> Vec<u8> {
        let mut out = vec![TAG_MARKER, APPLICATION_RECORD, id];
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    #[test]
    fn test_parse_iptc_block() {
        let mut block = dataset(0x05, "Harbour");
        block.extend(dataset(0x19, "boats"));
        block.extend(dataset(0x19, "sea"));
        block.extend(dataset(0x74, "(c) Someone"));

        let mut resources = resource(0x03ED, &[0; 16]);
        resources.extend(resource(IPTC_RESOURCE, &block));

        let fields = parse_fields(&resources);
        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["ObjectName", "Keywords", "Keywords", "CopyrightNotice"]);
        assert_eq!(fields[3].value, "(c) Someone");
        assert!(fields.iter().all(|f| f.category == category::IPTC && !f.editable));
    }

    #[test]
    fn test_truncated_dataset_stops_cleanly() {
        let mut block = dataset(0x05, "Harbour");
        block.extend_from_slice(&[TAG_MARKER, 2, 0x78, 0x00, 0xFF, b'x']);
        let fields = parse_fields(&resource(IPTC_RESOURCE, &block));
        assert_eq!(fields.len(), 1);
    }
}
