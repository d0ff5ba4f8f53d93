//! Response encoding negotiation.
//!
//! Combines three inputs: the server's configured preference, whether the
//! response Content-Type is worth compressing, and whether the client's
//! `Accept-Encoding` mentions the matching token. The Accept-Encoding check
//! is a plain substring search — `br;q=0` still counts as "br" — preserved
//! deliberately for wire parity with existing deployments.

use tlserve_core::{EncodingType, Request, Response, ServerOptions};

/// Content types the engine is willing to compress.
///
/// A fixed allow-list of structured-text application types, plus any
/// `text/*` type except `text/event-stream`. The comparison is against the
/// full header value, so a type with parameters (`text/html; charset=...`)
/// only matches through the `text/` prefix rule.
fn can_compress_content_type(content_type: &str) -> bool {
    match content_type {
        "image/svg+xml"
        | "application/javascript"
        | "application/json"
        | "application/xml"
        | "application/protobuf"
        | "application/xhtml+xml" => true,
        _ => content_type.starts_with("text/") && content_type != "text/event-stream",
    }
}

/// Pick the encoding for a response.
///
/// Only the server's single preferred encoding is ever offered; a client
/// that does not accept it gets identity.
#[must_use]
pub fn negotiate_encoding(
    request: &Request,
    response: &Response,
    options: &ServerOptions,
) -> EncodingType {
    let preferred = options.encoding_type();
    if preferred == EncodingType::None {
        return EncodingType::None;
    }

    let content_type = response.header_value("content-type").unwrap_or_default();
    if !can_compress_content_type(content_type) {
        return EncodingType::None;
    }

    let accept = request.header_value("accept-encoding").unwrap_or_default();
    if preferred == EncodingType::Brotli && accept.contains("br") {
        return EncodingType::Brotli;
    }
    if preferred == EncodingType::Gzip && accept.contains("gzip") {
        return EncodingType::Gzip;
    }

    EncodingType::None
}
