//! Listing text normalization
//!
//! With `force_utf8`, raw listing bytes are decoded from the server's
//! declared encoding. Without it they must already be valid UTF-8.

use super::listing::ListingError;
use crate::types::TextEncoding;

/// Decode one raw listing line
pub fn decode_line(raw: &[u8], encoding: TextEncoding, force_utf8: bool) -> Result<String, ListingError> {
    let raw = trim_line_end(raw);
    let encoding = if force_utf8 { encoding } else { TextEncoding::Utf8 };
    match encoding {
        TextEncoding::Utf8 => std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| ListingError::Encoding(format!("invalid utf-8 at byte {}", e.valid_up_to()))),
        // Every byte maps to the code point of the same value
        TextEncoding::Latin1 => Ok(raw.iter().map(|&b| b as char).collect()),
    }
}

/// Encode a decoded path back into the bytes the server expects
pub fn encode_path(path: &str, encoding: TextEncoding, force_utf8: bool) -> Result<Vec<u8>, ListingError> {
    if !force_utf8 || encoding == TextEncoding::Utf8 {
        return Ok(path.as_bytes().to_vec());
    }
    path.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| ListingError::Encoding(format!("'{}' has no {} form", c, encoding)))
        })
        .collect()
}

fn trim_line_end(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    &raw[..end]
}
