//! Text decoding for string fields

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

/// Resolve an encoding label (`UTF-8`, `ASCII`, `UTF-16LE`, `Shift_JIS`, ...)
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "utf-8" | "utf8" => Some(UTF_8),
        "ascii" | "us-ascii" | "latin1" | "iso-8859-1" | "iso8859-1" | "cp437" => {
            Some(WINDOWS_1252)
        }
        "utf-16le" | "utf16le" => Some(UTF_16LE),
        "utf-16be" | "utf16be" => Some(UTF_16BE),
        other => Encoding::for_label(other.as_bytes()),
    }
}

/// Whether a label names a supported encoding
pub fn is_known(label: &str) -> bool {
    lookup(label).is_some()
}

/// Decode bytes with the labelled encoding
///
/// Unknown labels fall back to lossy UTF-8. Byte-order marks are not
/// interpreted.
pub fn decode(bytes: &[u8], label: &str) -> String {
    let encoding = lookup(label).unwrap_or(UTF_8);
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_and_ascii() {
        assert_eq!(decode(b"IHDR", "ASCII"), "IHDR");
        assert_eq!(decode("héllo".as_bytes(), "UTF-8"), "héllo");
    }

    #[test]
    fn test_utf16() {
        assert_eq!(decode(&[0x41, 0x00, 0x42, 0x00], "UTF-16LE"), "AB");
        assert_eq!(decode(&[0x00, 0x41, 0x00, 0x42], "utf-16be"), "AB");
    }

    #[test]
    fn test_legacy_encodings() {
        assert_eq!(decode(&[0xE9], "ISO-8859-1"), "é");
        assert_eq!(decode(&[0x82, 0xA0], "Shift_JIS"), "あ");
        assert!(is_known("KOI8-R"));
        assert!(is_known("Big5"));
    }

    #[test]
    fn test_unknown_label_falls_back_to_utf8() {
        assert!(!is_known("klingon"));
        assert_eq!(decode(b"ok", "klingon"), "ok");
        assert_eq!(decode(&[0xFF], "klingon"), "\u{FFFD}");
    }
}
