//! Charset selection: the `charset` configuration value is
//! resolved once at startup into a concrete [`encoding::Encoding`], the
//! same crate `timer-core::util::io` uses for its Windows-1252 fallback
//! decoding. UTF-8, the default, is the fast, lossless path; everything
//! else decodes/encodes with a replacement-character fallback rather than
//! failing the connection outright.

use crate::error::ConfigError;
use encoding::{DecoderTrap, EncoderTrap, EncodingRef};

pub struct Charset {
    encoding: EncodingRef,
}

impl Charset {
    /// Resolve a WHATWG encoding label (e.g. `"utf-8"`, `"windows-1252"`)
    /// into a usable charset. Unknown labels are a configuration error,
    /// fatal at startup.
    pub fn resolve(label: &str) -> Result<Charset, ConfigError> {
        let encoding = encoding::label::encoding_from_whatwg_label(label)
            .ok_or_else(|| ConfigError::UnknownCharset(label.to_owned()))?;
        Ok(Charset { encoding })
    }

    pub fn utf8() -> Charset {
        Charset {
            encoding: encoding::all::UTF_8,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.encoding
            .decode(bytes, DecoderTrap::Replace)
            .unwrap_or_default()
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        self.encoding
            .encode(text, EncoderTrap::Replace)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_utf8_by_default_label() {
        let cs = Charset::resolve("utf-8").unwrap();
        assert_eq!(cs.decode("café".as_bytes()), "café");
    }

    #[test]
    fn rejects_unknown_label() {
        assert!(matches!(
            Charset::resolve("not-a-real-charset"),
            Err(ConfigError::UnknownCharset(_))
        ));
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let cs = Charset::utf8();
        let original = "hello, café";
        assert_eq!(cs.decode(&cs.encode(original)), original);
    }
}
