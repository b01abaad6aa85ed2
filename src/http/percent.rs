//! RFC 3986 percent-encoding/decoding, hand-rolled rather than pulled from
//! the `percent_encoding` crate: that crate's decoder is lenient about
//! malformed `%HH` sequences (it passes them through verbatim), but spec
//! §4.6 requires rejecting them with 400. Encoding has no such requirement
//! and is implemented to match, for round-trip tests (spec §8).

/// Decodes a percent-encoded string. Returns `None` on any `%` not followed
/// by exactly two hex digits.
pub fn decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let h = *bytes.get(i + 1)?;
                let l = *bytes.get(i + 2)?;
                let hv = hex_val(h)?;
                let lv = hex_val(l)?;
                out.push((hv << 4) | lv);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}

/// Decodes into a `String`, requiring the result to be valid UTF-8 (path
/// segments and query values are text in this codec).
pub fn decode_utf8(input: &str) -> Option<String> {
    decode(input).and_then(|bytes| String::from_utf8(bytes).ok())
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Whether a byte may appear unescaped (RFC 3986 `unreserved`).
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Percent-encodes all but RFC 3986 `unreserved` characters.
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.as_bytes() {
        if is_unreserved(*b) {
            out.push(*b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_known_sequences() {
        assert_eq!(decode_utf8("a%20b").unwrap(), "a b");
        assert_eq!(decode_utf8("100%25").unwrap(), "100%");
        assert_eq!(decode_utf8("plain").unwrap(), "plain");
    }

    #[test]
    fn rejects_invalid_percent_sequences() {
        assert!(decode("%2").is_none());
        assert!(decode("%zz").is_none());
        assert!(decode("%").is_none());
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(s in "[ -~]{0,64}") {
            let encoded = encode(&s);
            let decoded = decode_utf8(&encoded).unwrap();
            prop_assert_eq!(decoded, s);
        }
    }
}
