//! AMF0 values as found in FLV script data tags
//!
//! Every value is a type marker byte followed by its body. Strings carry a 16-bit
//! length (32-bit for long strings); objects and ECMA arrays are key/value runs ended by
//! an empty key and the object-end marker.

use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    tree::MAX_DEPTH,
    ContainerKind,
};
use byteorder::{BigEndian, ByteOrder};

mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0A;
    pub const DATE: u8 = 0x0B;
    pub const LONG_STRING: u8 = 0x0C;
}

/// Nested values shown in full up to this many entries
const MAX_RENDERED_ENTRIES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    /// The declared count is kept because encoders often write 0 there
    EcmaArray {
        declared_count: u32,
        entries: Vec<(String, Amf0Value)>,
    },
    StrictArray(Vec<Amf0Value>),
    Date {
        millis: f64,
        timezone: i16,
    },
    LongString(String),
}

fn malformed(offset: u64, reason: impl Into<String>) -> Error {
    Error::malformed(ContainerKind::Flv, "AMF0 value", offset, reason)
}

fn read_utf8(cursor: &mut ByteCursor, len: usize) -> Result<String> {
    let offset = cursor.absolute_position();
    let bytes = cursor.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed(offset, "string is not UTF-8"))
}

fn read_key(cursor: &mut ByteCursor) -> Result<String> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    read_utf8(cursor, len)
}

/// Properties up to and including the end marker
fn read_properties(cursor: &mut ByteCursor, depth: usize) -> Result<Vec<(String, Amf0Value)>> {
    let mut entries = Vec::new();
    loop {
        let key = read_key(cursor)?;
        if key.is_empty() && cursor.peek_u8()? == marker::OBJECT_END {
            cursor.skip(1)?;
            return Ok(entries);
        }
        let value = Amf0Value::read(cursor, depth + 1)?;
        entries.push((key, value));
    }
}

fn write_properties(entries: &[(String, Amf0Value)], out: &mut Vec<u8>) {
    for (key, value) in entries {
        write_key(key, out);
        value.write(out);
    }
    out.extend_from_slice(&[0, 0, marker::OBJECT_END]);
}

fn write_key(key: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(key.len() as u16).to_be_bytes());
    out.extend_from_slice(key.as_bytes());
}

impl Amf0Value {
    /// Read one value
    pub fn read(cursor: &mut ByteCursor, depth: usize) -> Result<Self> {
        let offset = cursor.absolute_position();
        if depth > MAX_DEPTH {
            return Err(malformed(offset, "values nested too deeply"));
        }
        let value = match cursor.read_u8()? {
            marker::NUMBER => Amf0Value::Number(cursor.read_f64::<BigEndian>()?),
            marker::BOOLEAN => Amf0Value::Boolean(cursor.read_u8()? != 0),
            marker::STRING => Amf0Value::String(read_key(cursor)?),
            marker::OBJECT => Amf0Value::Object(read_properties(cursor, depth)?),
            marker::NULL => Amf0Value::Null,
            marker::UNDEFINED => Amf0Value::Undefined,
            marker::ECMA_ARRAY => {
                let declared_count = cursor.read_u32::<BigEndian>()?;
                Amf0Value::EcmaArray {
                    declared_count,
                    entries: read_properties(cursor, depth)?,
                }
            }
            marker::STRICT_ARRAY => {
                let count = cursor.read_u32::<BigEndian>()? as usize;
                // Every value takes at least its marker byte
                if count > cursor.remaining() {
                    let reason = format!("strict array of {} values overruns data", count);
                    return Err(malformed(offset, reason));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(Amf0Value::read(cursor, depth + 1)?);
                }
                Amf0Value::StrictArray(values)
            }
            marker::DATE => Amf0Value::Date {
                millis: cursor.read_f64::<BigEndian>()?,
                timezone: cursor.read_i16::<BigEndian>()?,
            },
            marker::LONG_STRING => {
                let len = cursor.read_u32::<BigEndian>()? as usize;
                Amf0Value::LongString(read_utf8(cursor, len)?)
            }
            other => {
                let reason = format!("unsupported type marker 0x{:02X}", other);
                return Err(malformed(offset, reason));
            }
        };
        Ok(value)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Amf0Value::Number(n) => {
                out.push(marker::NUMBER);
                let mut buf = [0u8; 8];
                BigEndian::write_f64(&mut buf, *n);
                out.extend_from_slice(&buf);
            }
            Amf0Value::Boolean(b) => out.extend_from_slice(&[marker::BOOLEAN, *b as u8]),
            Amf0Value::String(s) if s.len() > u16::MAX as usize => {
                Amf0Value::LongString(s.clone()).write(out)
            }
            Amf0Value::String(s) => {
                out.push(marker::STRING);
                write_key(s, out);
            }
            Amf0Value::Object(entries) => {
                out.push(marker::OBJECT);
                write_properties(entries, out);
            }
            Amf0Value::Null => out.push(marker::NULL),
            Amf0Value::Undefined => out.push(marker::UNDEFINED),
            Amf0Value::EcmaArray {
                declared_count,
                entries,
            } => {
                out.push(marker::ECMA_ARRAY);
                out.extend_from_slice(&declared_count.to_be_bytes());
                write_properties(entries, out);
            }
            Amf0Value::StrictArray(values) => {
                out.push(marker::STRICT_ARRAY);
                out.extend_from_slice(&(values.len() as u32).to_be_bytes());
                for value in values {
                    value.write(out);
                }
            }
            Amf0Value::Date { millis, timezone } => {
                out.push(marker::DATE);
                let mut buf = [0u8; 8];
                BigEndian::write_f64(&mut buf, *millis);
                out.extend_from_slice(&buf);
                out.extend_from_slice(&timezone.to_be_bytes());
            }
            Amf0Value::LongString(s) => {
                out.push(marker::LONG_STRING);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Key/value entries of an object or ECMA array
    pub fn entries(&self) -> Option<&[(String, Amf0Value)]> {
        match self {
            Amf0Value::Object(entries) | Amf0Value::EcmaArray { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn entries_mut(&mut self) -> Option<&mut Vec<(String, Amf0Value)>> {
        match self {
            Amf0Value::Object(entries) | Amf0Value::EcmaArray { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) | Amf0Value::LongString(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        self.as_str().is_some()
    }

    /// Text rendering used for field values
    pub fn render(&self) -> String {
        match self {
            Amf0Value::Number(n) => format!("{}", n),
            Amf0Value::Boolean(b) => b.to_string(),
            Amf0Value::String(s) | Amf0Value::LongString(s) => s.clone(),
            Amf0Value::Null => "null".into(),
            Amf0Value::Undefined => "undefined".into(),
            Amf0Value::Date { millis, .. } => format!("{} ms since epoch", millis),
            Amf0Value::StrictArray(values) => {
                if values.len() > MAX_RENDERED_ENTRIES {
                    format!("[{} values]", values.len())
                } else {
                    let parts: Vec<String> = values.iter().map(|v| v.render()).collect();
                    format!("[{}]", parts.join(", "))
                }
            }
            Amf0Value::Object(entries) | Amf0Value::EcmaArray { entries, .. } => {
                let parts: Vec<String> = entries
                    .iter()
                    .take(MAX_RENDERED_ENTRIES)
                    .map(|(k, v)| format!("{}: {}", k, v.render()))
                    .collect();
                let more = if entries.len() > MAX_RENDERED_ENTRIES { ", ..." } else { "" };
                format!("{{{}{}}}", parts.join(", "), more)
            }
        }
    }
}

/// Every value in a script data tag body, in order
pub fn read_all(data: &[u8]) -> Result<Vec<Amf0Value>> {
    let mut cursor = ByteCursor::new(data);
    let mut values = Vec::new();
    while !cursor.at_end() {
        // Some muxers pad script tags with a trailing object-end marker
        if cursor.remaining() == 3 && cursor.peek_bytes(3)? == [0, 0, marker::OBJECT_END] {
            break;
        }
        values.push(Amf0Value::read(&mut cursor, 0)?);
    }
    Ok(values)
}

pub fn write_all(values: &[Amf0Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        value.write(&mut out);
    }
    out
}

#[cfg(all(test, feature = "flv"))]
mod tests {
    use super::*;

    fn on_metadata() -> Vec<Amf0Value> {
        vec![
            Amf0Value::String("onMetaData".into()),
            Amf0Value::EcmaArray {
                declared_count: 3,
                entries: vec![
                    ("duration".into(), Amf0Value::Number(12.5)),
                    ("stereo".into(), Amf0Value::Boolean(true)),
                    ("encoder".into(), Amf0Value::String("Lavf58".into())),
                ],
            },
        ]
    }

    #[test]
    fn test_read_write_is_byte_exact() {
        let bytes = write_all(&on_metadata());
        let values = read_all(&bytes).unwrap();
        assert_eq!(values, on_metadata());
        assert_eq!(write_all(&values), bytes);
    }

    #[test]
    fn test_render() {
        let values = on_metadata();
        let entries = values[1].entries().unwrap();
        assert_eq!(entries[0].1.render(), "12.5");
        assert_eq!(entries[1].1.render(), "true");
        assert_eq!(entries[2].1.render(), "Lavf58");
        let nested = Amf0Value::Object(vec![(
            "filepositions".into(),
            Amf0Value::StrictArray(vec![Amf0Value::Number(13.0), Amf0Value::Number(420.0)]),
        )]);
        assert_eq!(nested.render(), "{filepositions: [13, 420]}");
    }

    #[test]
    fn test_unknown_marker_is_malformed() {
        let err = read_all(&[0x07, 0x00, 0x01]).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_hostile_strict_array_count() {
        let mut data = vec![marker::STRICT_ARRAY];
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(read_all(&data).is_err());
    }
}
