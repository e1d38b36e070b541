//! Topic filename codec: hex-UTF-8 encode/decode for on-disk directory
//! names.
//!
//! No Unicode normalization happens here or anywhere else in this crate:
//! `"café"` (composed) and `"cafe\u{0301}"` (combining accent) encode to
//! different hex strings and are, intentionally, distinct topics.

/// Uppercase-hex-encode the UTF-8 bytes of `topic`. No padding, no
/// delimiters — `encode` and [`decode`] are mutual inverses for every
/// string that doesn't contain unpaired surrogates (which `&str` can't
/// represent anyway).
pub fn encode(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len() * 2);
    for byte in topic.as_bytes() {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Decode a directory name back into a topic string.
///
/// Returns `None` if `name` is not an even-length run of two or more hex
/// digits, or if the decoded bytes are not valid UTF-8. Callers treat
/// `None` as "ignore this directory".
pub fn decode(name: &str) -> Option<String> {
    if name.len() < 2 || name.len() % 2 != 0 {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut bytes = Vec::with_capacity(name.len() / 2);
    let chars: Vec<char> = name.chars().collect();
    for pair in chars.chunks(2) {
        let hi = pair[0].to_digit(16)?;
        let lo = pair[1].to_digit(16)?;
        bytes.push(((hi << 4) | lo) as u8);
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii() {
        let topic = "hello";
        let encoded = encode(topic);
        assert_eq!(encoded, "68656C6C6F");
        assert_eq!(decode(&encoded).as_deref(), Some(topic));
    }

    #[test]
    fn round_trips_multibyte_unicode() {
        for topic in ["café", "日本語", "🦀rust"] {
            let encoded = encode(topic);
            assert_eq!(decode(&encoded).as_deref(), Some(topic));
        }
    }

    #[test]
    fn distinguishes_normalization_forms() {
        let composed = "café";
        let decomposed = "cafe\u{0301}";
        assert_ne!(composed, decomposed);
        assert_ne!(encode(composed), encode(decomposed));
    }

    #[test]
    fn rejects_odd_length() {
        assert_eq!(decode("ABC"), None);
    }

    #[test]
    fn rejects_non_hex() {
        assert_eq!(decode("ZZ"), None);
        assert_eq!(decode("hello"), None);
    }

    #[test]
    fn rejects_too_short() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("A"), None);
    }

    #[test]
    fn rejects_invalid_utf8_bytes() {
        // 0xFF is never valid as a lone UTF-8 byte.
        assert_eq!(decode("FF"), None);
    }

    #[test]
    fn accepts_lowercase_and_uppercase_hex() {
        assert_eq!(decode("68656c6c6f").as_deref(), Some("hello"));
        assert_eq!(decode("68656C6C6F").as_deref(), Some("hello"));
    }
}
