//! Header text codec
//!
//! Archive headers store names as bytes. The codec decides how text handed
//! to an [`Entry`](crate::Entry) setter is encoded, and how raw header bytes
//! are decoded when the engine has no pre-decoded form available.

use crate::error::{ArchiveError, Result};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fmt;

/// Charset used for pathnames, link targets and owner names
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeaderCodec {
    encoding: &'static Encoding,
}

impl HeaderCodec {
    pub fn utf8() -> Self {
        HeaderCodec { encoding: UTF_8 }
    }

    /// Look up a codec by its WHATWG label ("utf-8", "latin1", "shift_jis", ...)
    pub fn for_label(label: &str) -> Result<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|encoding| HeaderCodec { encoding })
            .ok_or_else(|| ArchiveError::InvalidArgument(format!("unknown header codec: {}", label)))
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn is_utf8(&self) -> bool {
        self.encoding == UTF_8
    }

    /// Encode text for the engine
    ///
    /// Characters the charset cannot represent are an error rather than being
    /// replaced with HTML entities the way `encoding_rs` would.
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        let (bytes, _, unmappable) = self.encoding.encode(text);
        if unmappable {
            return Err(ArchiveError::InvalidArgument(format!(
                "{:?} cannot be encoded as {}",
                text,
                self.name()
            )));
        }
        Ok(bytes)
    }

    /// Strict decode, `None` on malformed input
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        self.encoding.decode_without_bom_handling_and_without_replacement(bytes)
    }

    /// Best-effort decode with U+FFFD for malformed sequences
    pub fn decode_lossy<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        self.encoding.decode_without_bom_handling(bytes).0
    }
}

impl Default for HeaderCodec {
    fn default() -> Self {
        HeaderCodec::utf8()
    }
}

impl fmt::Debug for HeaderCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeaderCodec").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_is_utf8() {
        assert!(HeaderCodec::default().is_utf8());
        assert_eq!(HeaderCodec::default().name(), "UTF-8");
    }

    #[test]
    fn test_latin1_roundtrip() {
        let codec = HeaderCodec::for_label("latin1").unwrap();
        assert!(!codec.is_utf8());
        assert_eq!(codec.encode("caf\u{e9}").unwrap().as_ref(), b"caf\xe9");
        assert_eq!(codec.decode(b"caf\xe9").unwrap(), "caf\u{e9}");
    }

    #[test]
    fn test_strict_and_lossy_decode() {
        let codec = HeaderCodec::utf8();
        assert!(codec.decode(b"caf\xe9").is_none());
        assert_eq!(codec.decode_lossy(b"caf\xe9"), "caf\u{fffd}");
    }

    #[test]
    fn test_unmappable_is_rejected() {
        let codec = HeaderCodec::for_label("latin1").unwrap();
        assert!(codec.encode("\u{2603}").is_err());
        assert!(HeaderCodec::for_label("no-such-charset").is_err());
    }

    proptest! {
        #[test]
        fn prop_utf8_roundtrip(text in ".*") {
            let codec = HeaderCodec::utf8();
            let bytes = codec.encode(&text).unwrap();
            prop_assert_eq!(bytes.as_ref(), text.as_bytes());
            prop_assert_eq!(codec.decode(&bytes).unwrap(), text.as_str());
        }

        #[test]
        fn prop_lossy_never_fails(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let codec = HeaderCodec::utf8();
            let lossy = codec.decode_lossy(&bytes);
            if let Some(strict) = codec.decode(&bytes) {
                prop_assert_eq!(strict, lossy);
            }
        }
    }
}
