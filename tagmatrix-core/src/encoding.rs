//! Best-effort decoding of byte-valued attributes.
//!
//! Parsers hand over some values as raw bytes (unknown VRs, `OB`/`UN`
//! payloads, strings in an undeclared character set). Strict UTF-8 is tried
//! first; otherwise `chardetng` guesses an encoding. Bytes that still do
//! not decode cleanly are kept as they are.
//!
//! Detection is heuristic: the same non-ASCII bytes can decode differently
//! as the detector evolves. Pure ASCII input is always stable.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Outcome of decoding a byte value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Text(String),
    Raw(Vec<u8>),
}

/// Decode `bytes` to text if an encoding can be found that accepts them.
pub fn decode_bytes(bytes: &[u8]) -> Decoded {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Decoded::Text(text.to_string());
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_as(bytes, detector.guess(None, true))
}

/// Decode `bytes` with a known encoding, keeping them raw on any malformed
/// sequence.
pub fn decode_as(bytes: &[u8], encoding: &'static Encoding) -> Decoded {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);

    if had_errors {
        tracing::debug!(
            "Undecodable {}-byte value as {}, keeping raw bytes",
            bytes.len(),
            encoding.name()
        );
        Decoded::Raw(bytes.to_vec())
    } else {
        Decoded::Text(text.into_owned())
    }
}
