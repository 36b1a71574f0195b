//! Minimal XMP reader
//!
//! This module provides just enough XMP parsing to list the simple properties of a packet
//! as canonical fields. Packets are never rewritten; strip removes them whole.
//!
//! XMP Structure:
//! - XMP packets are XML-based RDF metadata
//! - Properties can be attributes on rdf:Description or child elements
//! - Array properties hold their values in rdf:li items under rdf:Alt/Bag/Seq

use crate::field::{category, MetadataField};
use quick_xml::{escape::unescape, events::Event, Reader};

const RDF_DESCRIPTION: &[u8] = b"rdf:Description";

/// Element names that structure the packet rather than name a property
fn is_structural(name: &[u8]) -> bool {
    name.starts_with(b"rdf:") || name.starts_with(b"x:") || name == b"xmpmeta"
}

fn decode(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match unescape(&s) {
        Ok(v) => v.into_owned(),
        Err(_) => s.into_owned(),
    }
}

/// Push a value, merging consecutive rdf:li items of one property
fn push(fields: &mut Vec<MetadataField>, key: String, value: String, list_item: bool) {
    if list_item {
        if let Some(last) = fields.last_mut().filter(|f| f.key == key) {
            last.value.push_str(", ");
            last.value.push_str(&value);
            return;
        }
    }
    fields.push(MetadataField::new(key, value, category::XMP));
}

/// Extract the simple properties of an XMP packet
///
/// Attributes of `rdf:Description` (other than namespace declarations and `rdf:about`)
/// and text-valued elements become one field each, keyed by their qualified name.
/// Parsing stops quietly at the first XML error.
///
/// # Example
///
/// ```
/// use media_surgery::xmp::extract_fields;
///
/// let xmp = br#"<rdf:Description xmp:CreatorTool="Editor 1.0" />"#;
/// let fields = extract_fields(xmp);
/// assert_eq!(fields[0].key, "xmp:CreatorTool");
/// assert_eq!(fields[0].value, "Editor 1.0");
/// ```
pub fn extract_fields(packet: &[u8]) -> Vec<MetadataField> {
    let mut reader = Reader::from_reader(packet);
    reader.config_mut().trim_text(false);

    let mut fields = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                log_debug!("XMP parsing stopped: {}", e);
                break;
            }
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name().as_ref().to_vec();
                if name == RDF_DESCRIPTION {
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        if key.starts_with(b"xmlns") || key == b"rdf:about" {
                            continue;
                        }
                        fields.push(MetadataField::new(
                            String::from_utf8_lossy(key),
                            decode(&attr.value),
                            category::XMP,
                        ));
                    }
                }
                if !is_empty {
                    stack.push(name);
                    text.clear();
                }
            }
            Event::Text(ref e) => text.push_str(&String::from_utf8_lossy(e)),
            Event::CData(ref e) => text.push_str(&String::from_utf8_lossy(e)),
            Event::GeneralRef(ref e) => {
                text.push('&');
                text.push_str(&String::from_utf8_lossy(e));
                text.push(';');
            }
            Event::End(_) => {
                let closed = stack.pop();
                let value = decode(text.trim().as_bytes());
                text.clear();
                if value.is_empty() {
                    continue;
                }
                let list_item = closed.as_deref() == Some(b"rdf:li".as_slice());
                let property = closed
                    .iter()
                    .chain(stack.iter().rev())
                    .find(|n| !is_structural(n));
                if let Some(property) = property {
                    let name = String::from_utf8_lossy(property).into_owned();
                    push(&mut fields, name, value, list_item);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    fields
}
