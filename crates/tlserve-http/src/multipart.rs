//! Incremental `multipart/form-data` parser.
//!
//! Extracts named parts from a form-data body given its boundary string.
//! The parser is fed whole buffers (the request parser hands it the
//! already-accumulated body) but decides everything against its own
//! internal buffer, so truncated input yields
//! [`ParseResult::NeedMoreData`](crate::parser::ParseResult::NeedMoreData)
//! rather than an error. Consumed prefix bytes are compacted away on each
//! append to bound memory growth.
//!
//! Wire shape:
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="field"; filename="a.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! file contents\r\n
//! --boundary--\r\n
//! ```

use tlserve_core::{MultipartFile, Request};

use crate::parser::ParseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InitialBoundary,
    NewEntry,
    Headers,
    Body,
    Boundary,
}

/// State machine extracting [`MultipartFile`] parts from a form-data body.
#[derive(Debug)]
pub struct MultipartParser {
    boundary: String,
    buf: Vec<u8>,
    cur_pos: usize,
    part: MultipartFile,
    state: State,
}

impl MultipartParser {
    /// Create a parser; [`set_boundary`][Self::set_boundary] must be called
    /// before parsing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: String::new(),
            buf: Vec::new(),
            cur_pos: 0,
            part: MultipartFile::default(),
            state: State::InitialBoundary,
        }
    }

    /// Set the boundary token extracted from the Content-Type header.
    pub fn set_boundary(&mut self, boundary: String) {
        self.boundary = boundary;
    }

    /// Reset all parser state for the next message.
    pub fn reset(&mut self) {
        self.state = State::InitialBoundary;
        self.buf.clear();
        self.cur_pos = 0;
        self.boundary.clear();
        self.part.clear();
    }

    /// Feed body bytes and extract any parts that are now complete.
    ///
    /// Committed parts are appended to `request.files`; several parts may
    /// share a field name. Returns `Complete` once the terminating
    /// `--boundary--` is consumed, `Malformed` on a structural error, and
    /// `NeedMoreData` whenever the buffered bytes do not decide the current
    /// state.
    pub fn parse(&mut self, request: &mut Request, data: &[u8]) -> ParseResult {
        self.append(data);

        while self.unparsed() > 0 {
            match self.state {
                State::InitialBoundary => {
                    let pattern_len = 2 + self.boundary.len() + 2;
                    if pattern_len > self.unparsed() {
                        return ParseResult::NeedMoreData;
                    }
                    let mut pattern = Vec::with_capacity(pattern_len);
                    pattern.extend_from_slice(b"--");
                    pattern.extend_from_slice(self.boundary.as_bytes());
                    pattern.extend_from_slice(b"\r\n");
                    if !self.starts_with(&pattern) {
                        return ParseResult::Malformed;
                    }
                    self.advance(pattern_len);
                    self.state = State::NewEntry;
                }
                State::NewEntry => {
                    self.part.clear();
                    self.state = State::Headers;
                }
                State::Headers => {
                    while let Some(pos) = self.find(b"\r\n") {
                        if pos == 0 {
                            // Blank line ends the part headers.
                            self.advance(2);
                            self.state = State::Body;
                            break;
                        }

                        let line =
                            String::from_utf8_lossy(&self.buf[self.cur_pos..self.cur_pos + pos])
                                .into_owned();
                        if let Some(value) = strip_prefix_ignore_case(&line, "content-type:") {
                            self.part.content_type = value.trim().to_string();
                        } else if let Some((name, filename)) = parse_content_disposition(&line) {
                            self.part.name = name;
                            self.part.filename = filename;
                        } else {
                            return ParseResult::Malformed;
                        }

                        self.advance(pos + 2);
                    }

                    if self.state != State::Body {
                        return ParseResult::NeedMoreData;
                    }
                }
                State::Body => {
                    let pattern_len = 2 + 2 + self.boundary.len();
                    if pattern_len > self.unparsed() {
                        return ParseResult::NeedMoreData;
                    }
                    let mut pattern = Vec::with_capacity(pattern_len);
                    pattern.extend_from_slice(b"\r\n--");
                    pattern.extend_from_slice(self.boundary.as_bytes());
                    match self.find(&pattern) {
                        Some(pos) => {
                            self.part.content =
                                self.buf[self.cur_pos..self.cur_pos + pos].to_vec();
                            self.advance(pos + pattern_len);
                            request.files.push(std::mem::take(&mut self.part));
                            self.state = State::Boundary;
                        }
                        None => return ParseResult::NeedMoreData,
                    }
                }
                State::Boundary => {
                    if 2 > self.unparsed() {
                        return ParseResult::NeedMoreData;
                    }
                    if self.starts_with(b"\r\n") {
                        self.advance(2);
                        self.state = State::NewEntry;
                    } else {
                        if 4 > self.unparsed() {
                            return ParseResult::NeedMoreData;
                        }
                        if self.starts_with(b"--\r\n") {
                            self.advance(4);
                            return ParseResult::Complete;
                        }
                        return ParseResult::NeedMoreData;
                    }
                }
            }
        }

        ParseResult::NeedMoreData
    }

    fn unparsed(&self) -> usize {
        self.buf.len() - self.cur_pos
    }

    /// Append new data, compacting the already-consumed prefix first.
    fn append(&mut self, data: &[u8]) {
        if self.cur_pos > 0 {
            self.buf.drain(..self.cur_pos);
            self.cur_pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    fn advance(&mut self, n: usize) {
        self.cur_pos += n;
    }

    fn starts_with(&self, pattern: &[u8]) -> bool {
        self.buf[self.cur_pos..].starts_with(pattern)
    }

    /// Offset of `needle` relative to the current parse position.
    fn find(&self, needle: &[u8]) -> Option<usize> {
        self.buf[self.cur_pos..]
            .windows(needle.len())
            .position(|w| w == needle)
    }
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Parse a `Content-Disposition` part header.
///
/// Accepts exactly `form-data; name="..."` with optional `; filename="..."`
/// and an ignored trailing `; filename*=...` extended form; anything else is
/// rejected. The returned filename is empty for plain fields.
fn parse_content_disposition(line: &str) -> Option<(String, String)> {
    let rest = strip_prefix_ignore_case(line, "content-disposition:")?;
    let rest = rest.trim_start();
    let rest = strip_prefix_ignore_case(rest, "form-data;")?;
    let rest = rest.trim_start();
    let rest = strip_prefix_ignore_case(rest, "name=\"")?;
    let (name, mut rest) = rest.split_once('"')?;

    let mut filename = String::new();
    if let Some(after) = rest.strip_prefix(';') {
        let after = after.trim_start();
        if let Some(after) = strip_prefix_ignore_case(after, "filename=\"") {
            let (f, r) = after.split_once('"')?;
            filename = f.to_string();
            rest = r;
        } else if strip_prefix_ignore_case(after, "filename*=").is_some() {
            rest = "";
        } else {
            return None;
        }
    }
    if let Some(after) = rest.strip_prefix(';') {
        let after = after.trim_start();
        if strip_prefix_ignore_case(after, "filename*=").is_none() {
            return None;
        }
        rest = "";
    }
    if !rest.trim().is_empty() {
        return None;
    }

    Some((name.to_string(), filename))
}

// ============================================================================
// Tests
// ============================================================================
