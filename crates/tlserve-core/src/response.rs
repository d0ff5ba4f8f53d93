//! HTTP response types.

use std::fmt;
use std::sync::Arc;

use crate::request::Headers;
use crate::sink::DataSink;
use crate::status::StatusCode;

/// Length-known content provider.
///
/// Called with a resolved `(offset, length)` window; the provider pushes the
/// bytes of `[offset, offset + length)` into the sink. May be invoked once
/// per requested range.
pub type ContentProvider = Arc<dyn Fn(u64, u64, &mut DataSink) + Send + Sync>;

/// Length-unknown content provider for chunked transfer.
///
/// Called exactly once; pushes chunks until the stream is finished, then
/// signals completion by calling [`DataSink::done`] or returning.
pub type ChunkedContentProvider = Box<dyn FnOnce(DataSink) + Send>;

/// An HTTP response under construction by a service handler.
///
/// At most one of the two provider kinds may be set; a body, a length-known
/// provider, and a chunked provider are mutually exclusive ways to produce
/// content. Setting one provider while the other kind is present is a
/// programming error and panics.
pub struct Response {
    /// Status code. Fresh responses start at `400 Bad Request` so a parser
    /// abort without an explicit status maps to the stock 400 reply; the
    /// response pipeline overwrites this for handled requests.
    pub status: StatusCode,
    /// Response headers in insertion order.
    pub headers: Headers,
    /// Response body bytes; empty when a provider is used.
    pub body: Vec<u8>,
    content_length: u64,
    content_provider: Option<ContentProvider>,
    chunked_provider: Option<ChunkedContentProvider>,
}

impl Response {
    /// Create an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            headers: Headers::new(),
            body: Vec::new(),
            content_length: 0,
            content_provider: None,
            chunked_provider: None,
        }
    }

    /// Set a header, replacing the first existing entry with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Append `,value` to an existing header; no-op when absent.
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers.append_value(name, value);
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

    /// Set the body and its content type.
    pub fn set_content(&mut self, data: impl Into<Vec<u8>>, content_type: &str) {
        self.body = data.into();
        self.set_header("Content-Type", content_type);
    }

    /// Attach a length-known content provider.
    ///
    /// `length` is the total size of the content the provider can serve.
    ///
    /// # Panics
    ///
    /// Panics if a chunked provider is already set, or if `length` is zero.
    pub fn set_content_provider<F>(&mut self, length: u64, content_type: &str, provider: F)
    where
        F: Fn(u64, u64, &mut DataSink) + Send + Sync + 'static,
    {
        assert!(
            self.chunked_provider.is_none(),
            "a chunked content provider is already set"
        );
        assert!(length > 0, "content provider length must be non-zero");

        self.set_header("Content-Type", content_type);
        self.content_length = length;
        self.content_provider = Some(Arc::new(provider));
    }

    /// Attach a length-unknown provider; the reply will use chunked transfer.
    ///
    /// # Panics
    ///
    /// Panics if a length-known provider is already set.
    pub fn set_chunked_content_provider<F>(&mut self, content_type: &str, provider: F)
    where
        F: FnOnce(DataSink) + Send + 'static,
    {
        assert!(
            self.content_provider.is_none(),
            "a length-known content provider is already set"
        );

        self.set_header("Content-Type", content_type);
        self.content_length = 0;
        self.chunked_provider = Some(Box::new(provider));
    }

    /// Total content length declared by the length-known provider.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The length-known provider, if set.
    #[must_use]
    pub fn content_provider(&self) -> Option<&ContentProvider> {
        self.content_provider.as_ref()
    }

    /// Whether a length-known provider is set.
    #[must_use]
    pub fn has_content_provider(&self) -> bool {
        self.content_provider.is_some()
    }

    /// Whether a chunked provider is set.
    #[must_use]
    pub fn has_chunked_provider(&self) -> bool {
        self.chunked_provider.is_some()
    }

    /// Take the chunked provider out for execution.
    #[must_use]
    pub fn take_chunked_provider(&mut self) -> Option<ChunkedContentProvider> {
        self.chunked_provider.take()
    }

    /// Build the stock reply for a status code: the fixed HTML body,
    /// `Content-Type: text/html`, a matching `Content-Length`, and
    /// `Connection: close`.
    #[must_use]
    pub fn stock(status: StatusCode) -> Self {
        let mut res = Self::new();
        res.status = status;
        res.body = status.stock_body().as_bytes().to_vec();
        res.set_header("Content-Type", "text/html");
        res.set_header("Content-Length", res.body.len().to_string());
        res.set_header("Connection", "close");
        res
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("content_length", &self.content_length)
            .field("content_provider", &self.content_provider.is_some())
            .field("chunked_provider", &self.chunked_provider.is_some())
            .finish()
    }
}
