//! Incremental HTTP/1.1 request parser.
//!
//! The parser consumes the raw byte stream one character at a time and can
//! be resumed with successive fragments; state persists in the instance
//! between calls and [`reset`][RequestParser::reset] prepares it for the
//! next keep-alive message. There is no backtracking: every byte either
//! advances the machine, completes the request, or condemns it.
//!
//! Protocol limits and rejections map to concrete statuses on the response:
//! unknown method 501, oversized target 414, foreign version 505, missing
//! POST length 411, oversized body 413. Anything else malformed leaves the
//! response at its default `400 Bad Request`.
//!
//! Completed `multipart/form-data` bodies are re-parsed through the nested
//! [`MultipartParser`]; its verdict becomes the verdict of the whole
//! request.

use std::sync::Arc;

use tlserve_core::{Header, Method, Range, Request, Response, ServerOptions, StatusCode};

use crate::multipart::MultipartParser;
use crate::uri;

/// Outcome of a parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// A full request has been parsed.
    Complete,
    /// The input violates the protocol; the response status says how.
    Malformed,
    /// The input is fine so far but incomplete.
    NeedMoreData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    MethodStart,
    Method,
    Uri,
    VersionH,
    VersionT1,
    VersionT2,
    VersionP,
    VersionSlash,
    VersionMajorStart,
    VersionMajor,
    VersionMinorStart,
    VersionMinor,
    NewlineAfterRequestLine,
    HeaderLineStart,
    HeaderLws,
    HeaderName,
    SpaceBeforeHeaderValue,
    HeaderValue,
    NewlineAfterHeader,
    FinalNewline,
    Body,
}

/// Character-at-a-time HTTP/1.1 request state machine.
pub struct RequestParser {
    state: ParserState,
    method_buf: String,
    version_buf: String,
    remaining_body: usize,
    options: Arc<ServerOptions>,
    multipart: MultipartParser,
}

impl RequestParser {
    /// Create a parser bound to the server's limits.
    #[must_use]
    pub fn new(options: Arc<ServerOptions>) -> Self {
        Self {
            state: ParserState::MethodStart,
            method_buf: String::new(),
            version_buf: String::new(),
            remaining_body: 0,
            options,
            multipart: MultipartParser::new(),
        }
    }

    /// Reset for the next message on a keep-alive connection.
    pub fn reset(&mut self) {
        self.state = ParserState::MethodStart;
        self.method_buf.clear();
        self.version_buf.clear();
        self.remaining_body = 0;
        self.multipart.reset();
    }

    /// Consume a fragment of the request byte stream.
    ///
    /// Returns the verdict and the number of bytes consumed. On
    /// [`Complete`][ParseResult::Complete] the unconsumed tail belongs to
    /// the next pipelined message and should be fed again after a reset.
    pub fn parse(
        &mut self,
        request: &mut Request,
        response: &mut Response,
        bytes: &[u8],
    ) -> (ParseResult, usize) {
        let mut consumed = 0;
        for &b in bytes {
            consumed += 1;
            match self.consume(request, response, b) {
                ParseResult::Complete => {
                    if request.is_multipart_form_data() && !request.body.is_empty() {
                        let content_type =
                            request.header_value("content-type").unwrap_or_default();
                        let Some(boundary) = parse_multipart_boundary(content_type) else {
                            return (ParseResult::Malformed, consumed);
                        };
                        self.multipart.set_boundary(boundary);
                        let body = std::mem::take(&mut request.body);
                        let result = self.multipart.parse(request, &body);
                        request.body = body;
                        return (result, consumed);
                    }
                    return (ParseResult::Complete, consumed);
                }
                ParseResult::Malformed => return (ParseResult::Malformed, consumed),
                ParseResult::NeedMoreData => {}
            }
        }
        (ParseResult::NeedMoreData, consumed)
    }

    /// Advance the machine by one input character.
    #[allow(clippy::too_many_lines)]
    fn consume(&mut self, req: &mut Request, res: &mut Response, input: u8) -> ParseResult {
        use ParserState as S;

        match self.state {
            S::MethodStart => {
                if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Malformed
                } else {
                    self.state = S::Method;
                    self.method_buf.push(input as char);
                    ParseResult::NeedMoreData
                }
            }
            S::Method => {
                if input == b' ' {
                    match Method::from_bytes(self.method_buf.as_bytes()) {
                        Some(method) => {
                            req.method = method;
                            self.state = S::Uri;
                            ParseResult::NeedMoreData
                        }
                        None => {
                            res.status = StatusCode::NOT_IMPLEMENTED;
                            ParseResult::Malformed
                        }
                    }
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Malformed
                } else {
                    self.method_buf.push(input as char);
                    ParseResult::NeedMoreData
                }
            }
            S::Uri => {
                if input == b' ' {
                    let Some(decoded) = uri::decode(&req.uri) else {
                        return ParseResult::Malformed;
                    };
                    req.uri = decoded;
                    uri::parse(req);
                    self.state = S::VersionH;
                    ParseResult::NeedMoreData
                } else if is_ctl(input) {
                    ParseResult::Malformed
                } else {
                    req.uri.push(input as char);
                    if req.uri.len() > self.options.uri_max_length() {
                        res.status = StatusCode::URI_TOO_LONG;
                        return ParseResult::Malformed;
                    }
                    ParseResult::NeedMoreData
                }
            }
            S::VersionH => self.expect_version_byte(input, b'H', S::VersionT1),
            S::VersionT1 => self.expect_version_byte(input, b'T', S::VersionT2),
            S::VersionT2 => self.expect_version_byte(input, b'T', S::VersionP),
            S::VersionP => self.expect_version_byte(input, b'P', S::VersionSlash),
            S::VersionSlash => self.expect_version_byte(input, b'/', S::VersionMajorStart),
            S::VersionMajorStart => {
                if is_digit(input) {
                    self.version_buf.push(input as char);
                    self.state = S::VersionMajor;
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::VersionMajor => {
                if input == b'.' {
                    self.version_buf.push('.');
                    self.state = S::VersionMinorStart;
                    ParseResult::NeedMoreData
                } else if is_digit(input) {
                    self.version_buf.push(input as char);
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::VersionMinorStart => {
                if is_digit(input) {
                    self.version_buf.push(input as char);
                    self.state = S::VersionMinor;
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::VersionMinor => {
                if input == b'\r' {
                    if self.version_buf != "HTTP/1.1" {
                        res.status = StatusCode::HTTP_VERSION_NOT_SUPPORTED;
                        return ParseResult::Malformed;
                    }
                    req.version = std::mem::take(&mut self.version_buf);
                    self.state = S::NewlineAfterRequestLine;
                    ParseResult::NeedMoreData
                } else if is_digit(input) {
                    self.version_buf.push(input as char);
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::NewlineAfterRequestLine => {
                if input == b'\n' {
                    self.state = S::HeaderLineStart;
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::HeaderLineStart => {
                if input == b'\r' {
                    self.state = S::FinalNewline;
                    ParseResult::NeedMoreData
                } else if !req.headers.is_empty() && (input == b' ' || input == b'\t') {
                    // Folded continuation of the previous header value.
                    self.state = S::HeaderLws;
                    ParseResult::NeedMoreData
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Malformed
                } else {
                    req.headers.push_entry(Header::default());
                    if let Some(header) = req.headers.last_mut() {
                        header.name.push(input.to_ascii_lowercase() as char);
                    }
                    self.state = S::HeaderName;
                    ParseResult::NeedMoreData
                }
            }
            S::HeaderLws => {
                if input == b'\r' {
                    self.state = S::NewlineAfterHeader;
                    ParseResult::NeedMoreData
                } else if input == b' ' || input == b'\t' {
                    ParseResult::NeedMoreData
                } else if is_ctl(input) {
                    ParseResult::Malformed
                } else {
                    self.state = S::HeaderValue;
                    if let Some(header) = req.headers.last_mut() {
                        header.value.push(input as char);
                    }
                    ParseResult::NeedMoreData
                }
            }
            S::HeaderName => {
                if input == b':' {
                    self.state = S::SpaceBeforeHeaderValue;
                    ParseResult::NeedMoreData
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Malformed
                } else {
                    if let Some(header) = req.headers.last_mut() {
                        header.name.push(input.to_ascii_lowercase() as char);
                    }
                    ParseResult::NeedMoreData
                }
            }
            S::SpaceBeforeHeaderValue => {
                if input == b' ' {
                    self.state = S::HeaderValue;
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::HeaderValue => {
                if input == b'\r' {
                    self.state = S::NewlineAfterHeader;
                    ParseResult::NeedMoreData
                } else if is_ctl(input) {
                    ParseResult::Malformed
                } else {
                    if let Some(header) = req.headers.last_mut() {
                        header.value.push(input as char);
                    }
                    ParseResult::NeedMoreData
                }
            }
            S::NewlineAfterHeader => {
                if input == b'\n' {
                    self.state = S::HeaderLineStart;
                    ParseResult::NeedMoreData
                } else {
                    ParseResult::Malformed
                }
            }
            S::FinalNewline => {
                if input != b'\n' {
                    return ParseResult::Malformed;
                }

                if req.method == Method::Post {
                    let Some(value) = req.header_value("content-length") else {
                        res.status = StatusCode::LENGTH_REQUIRED;
                        return ParseResult::Malformed;
                    };
                    let Ok(content_length) = value.trim().parse::<usize>() else {
                        return ParseResult::Malformed;
                    };
                    return if content_length == 0 {
                        ParseResult::Complete
                    } else if content_length > self.options.request_max_length() {
                        res.status = StatusCode::PAYLOAD_TOO_LARGE;
                        ParseResult::Malformed
                    } else {
                        self.remaining_body = content_length;
                        self.state = S::Body;
                        ParseResult::NeedMoreData
                    };
                }

                if let Some(value) = req.header_value("range") {
                    let value = value.to_string();
                    if !parse_range_header(&value, &mut req.ranges) {
                        return ParseResult::Malformed;
                    }
                }
                ParseResult::Complete
            }
            S::Body => {
                self.remaining_body -= 1;
                req.body.push(input);
                if self.remaining_body == 0 {
                    ParseResult::Complete
                } else {
                    ParseResult::NeedMoreData
                }
            }
        }
    }

    fn expect_version_byte(&mut self, input: u8, expected: u8, next: ParserState) -> ParseResult {
        if input == expected {
            self.version_buf.push(input as char);
            self.state = next;
            ParseResult::NeedMoreData
        } else {
            ParseResult::Malformed
        }
    }
}

/// Parse a `Range` header value into sentinel-form ranges.
///
/// Grammar: `bytes=<r>(,<r>)*` with `<r>` = `start?-end?`. At least one
/// bound is required per sub-range and `start <= end` when both are given;
/// a single bad sub-range invalidates the whole header. Unspecified bounds
/// are recorded as [`Range::UNSPECIFIED`] for later resolution against the
/// content length.
fn parse_range_header(value: &str, ranges: &mut Vec<Range>) -> bool {
    let Some(rest) = value.strip_prefix("bytes=") else {
        return false;
    };

    for part in rest.split(',') {
        let part = part.trim_start();
        let Some((start_str, end_str)) = part.split_once('-') else {
            return false;
        };
        if start_str.is_empty() && end_str.is_empty() {
            return false;
        }
        let Some(start) = parse_bound(start_str) else {
            return false;
        };
        let Some(end) = parse_bound(end_str) else {
            return false;
        };
        if start != Range::UNSPECIFIED && end != Range::UNSPECIFIED && start > end {
            return false;
        }
        ranges.push(Range::new(start, end));
    }

    true
}

/// An empty bound is the sentinel; otherwise the bound must be all digits.
fn parse_bound(s: &str) -> Option<i64> {
    if s.is_empty() {
        return Some(Range::UNSPECIFIED);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<i64>().ok()
}

/// Extract the boundary token from a `multipart/form-data` Content-Type.
///
/// Surrounding double quotes are stripped; an absent or empty token fails.
fn parse_multipart_boundary(content_type: &str) -> Option<String> {
    let pos = content_type.find("boundary=")?;
    let mut boundary = &content_type[pos + "boundary=".len()..];
    if boundary.len() >= 2 && boundary.starts_with('"') && boundary.ends_with('"') {
        boundary = &boundary[1..boundary.len() - 1];
    }
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

fn is_char(c: u8) -> bool {
    c <= 127
}

fn is_ctl(c: u8) -> bool {
    c <= 31 || c == 127
}

fn is_tspecial(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

// ============================================================================
// Tests
// ============================================================================
