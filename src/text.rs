//! String decoding for the text encodings found inside containers

/// ISO-8859-1: every byte is the code point of the same value
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode as ISO-8859-1, or `None` if a character is outside it
pub fn to_latin1(s: &str) -> Option<Vec<u8>> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

pub fn utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

pub fn utf16be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// UTF-16 with an optional byte-order mark (little-endian when absent)
pub fn utf16_bom(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => utf16le(rest),
        [0xFE, 0xFF, rest @ ..] => utf16be(rest),
        _ => utf16le(bytes),
    }
}

pub fn to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Lossy UTF-8 with trailing NULs and surrounding whitespace removed
pub fn clean(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Drop trailing NULs (and anything after the first NUL)
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(n) => &bytes[..n],
        None => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_round_trip() {
        assert_eq!(latin1(&[0x41, 0xE9]), "Aé");
        assert_eq!(to_latin1("Aé"), Some(vec![0x41, 0xE9]));
        assert_eq!(to_latin1("日本"), None);
    }

    #[test]
    fn test_utf16() {
        let le = to_utf16le("Hi");
        assert_eq!(le, vec![b'H', 0, b'i', 0]);
        assert_eq!(utf16le(&le), "Hi");
        assert_eq!(utf16_bom(&[0xFE, 0xFF, 0, b'A']), "A");
        assert_eq!(utf16_bom(&[0xFF, 0xFE, b'A', 0]), "A");
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(b" Canon \0\0"), "Canon");
        assert_eq!(until_nul(b"abc\0def"), b"abc");
    }
}
