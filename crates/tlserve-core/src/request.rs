//! HTTP request types.
//!
//! A [`Request`] is populated field by field while the incremental parser
//! consumes network bytes, then handed read-only to the matched service.
//! Header names are normalized to lowercase at insertion so lookups are
//! case-insensitive without allocating.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::multipart::MultipartFile;

/// HTTP method.
///
/// The engine only accepts the methods in this enum; anything else is
/// rejected during parsing with `501 Not Implemented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// GET method.
    #[default]
    Get,
    /// HEAD method.
    Head,
    /// POST method.
    Post,
}

impl Method {
    /// Parse a method from its uppercase wire form.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            _ => None,
        }
    }

    /// Return the canonical uppercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single name/value header pair.
///
/// Names are stored lowercase; values keep their wire spelling with the
/// leading space after `:` stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Lowercased header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Create a header, lowercasing the name.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut name = name.into();
        name.make_ascii_lowercase();
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Ordered header collection.
///
/// Duplicate names are permitted and preserved in insertion order;
/// [`get`][Self::get] returns the first match. This mirrors the wire, where
/// repeating a header is legal.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value for a name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Check whether a header is present (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, preserving any existing entries with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// Append an already-built entry.
    pub fn push_entry(&mut self, header: Header) {
        self.entries.push(header);
    }

    /// Set a header: the first entry with this name is replaced, otherwise
    /// the header is appended.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let header = Header::new(name, value);
        match self
            .entries
            .iter_mut()
            .find(|h| h.name == header.name)
        {
            Some(existing) => existing.value = header.value,
            None => self.entries.push(header),
        }
    }

    /// Append `,value` to an existing header value.
    ///
    /// Used for comma-separated list headers such as `Transfer-Encoding`.
    /// Does nothing when the header is absent.
    pub fn append_value(&mut self, name: &str, value: &str) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            existing.value.push(',');
            existing.value.push_str(value);
        }
    }

    /// Mutable access to the most recently inserted entry.
    ///
    /// The incremental parser builds header names and values character by
    /// character and folds continuation lines into the previous entry.
    #[must_use]
    pub fn last_mut(&mut self) -> Option<&mut Header> {
        self.entries.last_mut()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no headers have been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A client-requested byte window of a resource.
///
/// `-1` in either slot means the bound was not given: `bytes=500-` leaves
/// `end` unspecified, `bytes=-500` (suffix form) leaves `start` unspecified.
/// Both bounds are resolved against the actual content length by the
/// response pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First byte offset, or -1 when unspecified.
    pub start: i64,
    /// Last byte offset (inclusive), or -1 when unspecified.
    pub end: i64,
}

impl Range {
    /// Sentinel for an unspecified bound.
    pub const UNSPECIFIED: i64 = -1;

    /// Create a range. Bounds are not validated here; the parser enforces
    /// `start <= end` when both are present.
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// A parsed HTTP request.
///
/// Mutated only while parsing; treated as immutable from dispatch until the
/// connection resets it for the next keep-alive message.
#[derive(Debug, Default)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Version string from the request line (always `HTTP/1.1` once parsed).
    pub version: String,
    /// Percent-decoded request target.
    pub uri: String,
    /// First path segment, e.g. `/files` for `/files/a/b.txt`.
    pub path: String,
    /// Remainder of the path, e.g. `/a/b.txt`; empty when there is none.
    pub sub_path: String,
    /// Query parameters. Repeated keys keep the last value.
    pub params: HashMap<String, String>,
    /// Parsed headers in wire order.
    pub headers: Headers,
    /// Request body bytes (POST only).
    pub body: Vec<u8>,
    /// Byte ranges from the `Range` header, in request order.
    pub ranges: Vec<Range>,
    /// Multipart form parts in body order. Several parts may share a name.
    pub files: Vec<MultipartFile>,
    /// Peer address, stamped by the connection before dispatch.
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Create an empty request ready for parsing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of a header (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Check whether a header is present.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Check whether a query parameter was supplied.
    #[must_use]
    pub fn has_param(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Value of a query parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Check whether a multipart part with this field name was uploaded.
    #[must_use]
    pub fn has_file(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name == name)
    }

    /// First multipart part with this field name.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&MultipartFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// All multipart parts with this field name, in body order.
    pub fn files_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MultipartFile> {
        self.files.iter().filter(move |f| f.name == name)
    }

    /// True when the `Content-Type` header declares `multipart/form-data`.
    #[must_use]
    pub fn is_multipart_form_data(&self) -> bool {
        self.header_value("content-type")
            .is_some_and(|ct| ct.starts_with("multipart/form-data"))
    }
}
