//! `Transfer-Encoding: chunked` decoding (RFC 9112 §7.1, spec §4.6).

use super::parse::WireError;

/// Result of decoding a chunked body: the reassembled bytes plus any
/// trailer headers that followed the terminating `0`-size chunk.
pub struct ChunkedBody {
    pub data: Vec<u8>,
    pub trailers: Vec<(String, String)>,
}

/// Decodes a chunked body starting at `input`. `declared_trailers` is the
/// lowercase set of names listed in the request's `Trailer:` header; any
/// trailer name not in that set is rejected with 400 (spec §4.6, §8).
pub fn decode(input: &[u8], declared_trailers: &[String]) -> Result<ChunkedBody, WireError> {
    let mut data = Vec::new();
    let mut pos = 0usize;

    loop {
        let line_end = find_crlf(input, pos).ok_or(WireError::bad_request("truncated chunk size line"))?;
        let size_line = &input[pos..line_end];
        pos = line_end + 2;

        let size_token = match size_line.iter().position(|&b| b == b';') {
            Some(semi) => &size_line[..semi],
            None => size_line,
        };
        let size_str = std::str::from_utf8(size_token)
            .map_err(|_| WireError::bad_request("invalid chunk size encoding"))?;
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| WireError::bad_request("invalid chunk size hex"))?;

        if size == 0 {
            let trailers = parse_trailers(input, &mut pos, declared_trailers)?;
            return Ok(ChunkedBody { data, trailers });
        }

        if pos + size > input.len() {
            return Err(WireError::bad_request("chunk data runs past end of body"));
        }
        data.extend_from_slice(&input[pos..pos + size]);
        pos += size;

        if &input.get(pos..pos + 2).ok_or(WireError::bad_request("missing chunk CRLF"))? != b"\r\n" {
            return Err(WireError::bad_request("chunk not terminated by CRLF"));
        }
        pos += 2;
    }
}

fn parse_trailers(
    input: &[u8],
    pos: &mut usize,
    declared_trailers: &[String],
) -> Result<Vec<(String, String)>, WireError> {
    let mut trailers = Vec::new();
    loop {
        let line_end = find_crlf(input, *pos).ok_or(WireError::bad_request("truncated trailer section"))?;
        if line_end == *pos {
            // bare CRLF: end of trailer section.
            *pos = line_end + 2;
            return Ok(trailers);
        }
        let line = std::str::from_utf8(&input[*pos..line_end])
            .map_err(|_| WireError::bad_request("invalid trailer encoding"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or(WireError::bad_request("malformed trailer header"))?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if !declared_trailers.iter().any(|t| t == &name) {
            return Err(WireError::bad_request(format!(
                "trailer '{name}' not declared in Trailer header"
            )));
        }
        trailers.push((name, value));
        *pos = line_end + 2;
    }
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    input[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}
