//! Request target parsing.
//!
//! Splits a decoded request target into the routing segment, the handler
//! sub-path, and the query map. Decoding happens once on the full target
//! before the split, so encoded separators take part in the split like any
//! other character.

use tlserve_core::Request;

/// Percent/plus-decode a request target.
///
/// Maps `%XX` hex escapes to their byte value and `+` to a space. Returns
/// `None` when a `%` is not followed by two hex digits; callers treat that
/// as a malformed request.
#[must_use]
pub fn decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 3 > bytes.len() {
                    return None;
                }
                let hi = hex_digit(bytes[i + 1])?;
                let lo = hex_digit(bytes[i + 2])?;
                out.push(hi << 4 | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split `request.uri` into `path`, `sub_path`, and `params`.
///
/// The path must look like `/segment` followed by an optional non-whitespace
/// remainder starting with `/`; the first segment is what services register
/// under, the remainder is left for the handler. A target that does not fit
/// this shape leaves both fields empty, which no service matches.
///
/// Query pairs split on `&` then `=`; pairs that are not `key=value` with a
/// non-empty, whitespace-free key are silently skipped. Repeated keys keep
/// the last value.
pub fn parse(request: &mut Request) {
    if request.uri.is_empty() {
        return;
    }

    let (path_str, params_str) = match request.uri.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (request.uri.clone(), None),
    };

    if let Some((path, sub_path)) = split_path(&path_str) {
        request.path = path.to_string();
        request.sub_path = sub_path.to_string();
    }

    if let Some(params_str) = params_str {
        for pair in params_str.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            if key.is_empty()
                || key.chars().any(char::is_whitespace)
                || value.chars().any(char::is_whitespace)
            {
                continue;
            }
            request.params.insert(key.to_string(), value.to_string());
        }
    }
}

/// Split a path into its first `/segment` and the rest.
///
/// The first segment is one or more word characters; the rest must be empty
/// or a `/`-prefixed run of non-whitespace characters.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let after_slash = path.strip_prefix('/')?;
    let segment_len = after_slash
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    if segment_len == 0 {
        return None;
    }

    let first = &path[..1 + segment_len];
    let rest = &path[1 + segment_len..];
    if rest.is_empty() {
        return Some((first, ""));
    }
    if !rest.starts_with('/') || rest == "/" || rest.chars().any(char::is_whitespace) {
        return None;
    }
    Some((first, rest))
}
