//! Request dispatch and the response pipeline.
//!
//! [`RequestHandler`] owns the path-to-service table and turns a handler's
//! populated [`Response`] into exactly one well-formed HTTP/1.1 message.
//! The pipeline composes five orthogonal concerns: full body vs. streamed
//! content, single range vs. multi-range, chunked vs. length-delimited
//! framing, and compressed vs. raw payloads.
//!
//! Content providers are synchronous callbacks; the pipeline runs each on
//! the blocking pool and drains its [`DataSink`] channel onto the socket,
//! so provider backpressure follows the peer's read rate.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use tlserve_core::{
    ContentProvider, DataSink, EncodingType, Method, Range, Request, Response, ServerOptions,
    Service, StatusCode,
};

use crate::compress::{BrotliCompressor, Compressor, GzipCompressor, IdentityCompressor};
use crate::encoding::negotiate_encoding;

/// Depth of the provider-to-connection chunk channel.
const SINK_CHANNEL_DEPTH: usize = 8;

/// Routes parsed requests to services and writes their responses.
pub struct RequestHandler {
    services: HashMap<String, Arc<dyn Service>>,
    options: Arc<ServerOptions>,
}

impl RequestHandler {
    /// Create a handler with an empty service table.
    #[must_use]
    pub fn new(options: Arc<ServerOptions>) -> Self {
        Self {
            services: HashMap::new(),
            options,
        }
    }

    /// Register a service under an exact first path segment, e.g. `/files`.
    pub fn add_service(&mut self, path: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(path.into(), service);
    }

    /// Dispatch a parsed request and write the reply.
    ///
    /// Unmatched paths get the stock `404 Not Found`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when writing to the connection
    /// fails; the caller tears the connection down.
    pub async fn handle<S>(
        &self,
        conn: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.services.get(&request.path) {
            Some(service) => {
                service.handle_request(request, response);
                self.write_response(conn, request, response).await
            }
            None => {
                self.write_stock_response(conn, StatusCode::NOT_FOUND)
                    .await
            }
        }
    }

    /// Write the fixed response for a status code.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the write fails.
    pub async fn write_stock_response<S>(&self, conn: &mut S, status: StatusCode) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let response = Response::stock(status);
        conn.write_all(status.status_line().as_bytes()).await?;
        write_headers(conn, &response).await?;
        conn.write_all(&response.body).await?;
        conn.flush().await
    }

    /// Resolve ranges, negotiate compression, and emit the full reply.
    async fn write_response<S>(
        &self,
        conn: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        response.status = if request.ranges.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::PARTIAL_CONTENT
        };

        let mut boundary = String::new();
        let mut part_content_type = String::new();
        if request.ranges.len() > 1 {
            boundary = make_multipart_boundary();
            part_content_type = response
                .header_value("content-type")
                .unwrap_or_default()
                .to_string();
            response.set_header(
                "Content-Type",
                format!("multipart/byteranges; boundary={boundary}"),
            );
        }

        let encoding = negotiate_encoding(request, response, &self.options);

        if response.body.is_empty() {
            if response.has_content_provider() {
                let content_len = response.content_length();
                let length = if request.ranges.is_empty() {
                    content_len
                } else if request.ranges.len() == 1 {
                    let (offset, length) = range_window(&request.ranges[0], content_len);
                    response.set_header(
                        "Content-Range",
                        content_range_field(offset, length, content_len),
                    );
                    if offset >= content_len || length > content_len {
                        response.status = StatusCode::RANGE_NOT_SATISFIABLE;
                        0
                    } else {
                        length
                    }
                } else {
                    match multipart_ranges_length(
                        request,
                        &boundary,
                        &part_content_type,
                        content_len,
                    ) {
                        Some(length) => length,
                        None => {
                            response.status = StatusCode::RANGE_NOT_SATISFIABLE;
                            0
                        }
                    }
                };
                response.set_header("Content-Length", length.to_string());
            } else if response.has_chunked_provider() {
                response.set_header("Transfer-Encoding", "chunked");
                match encoding {
                    EncodingType::Brotli => response.set_header("Content-Encoding", "br"),
                    EncodingType::Gzip => response.set_header("Content-Encoding", "gzip"),
                    EncodingType::None => {}
                }
            }
        } else {
            if request.ranges.is_empty() {
                // Whole body passes through.
            } else if request.ranges.len() == 1 {
                let body_len = response.body.len() as u64;
                let (offset, length) = range_window(&request.ranges[0], body_len);
                response.set_header(
                    "Content-Range",
                    content_range_field(offset, length, body_len),
                );
                if offset < body_len && length <= body_len {
                    response.body = slice_window(&response.body, offset, length).to_vec();
                } else {
                    response.body.clear();
                    response.status = StatusCode::RANGE_NOT_SATISFIABLE;
                }
            } else {
                match build_multipart_ranges_body(request, response, &boundary, &part_content_type)
                {
                    Some(data) => response.body = data,
                    None => {
                        response.body.clear();
                        response.status = StatusCode::RANGE_NOT_SATISFIABLE;
                    }
                }
            }

            let picked: Option<(Box<dyn Compressor>, &str)> = match encoding {
                EncodingType::Gzip => Some((Box::new(GzipCompressor::new()), "gzip")),
                EncodingType::Brotli => Some((Box::new(BrotliCompressor::new()), "br")),
                EncodingType::None => None,
            };
            if let Some((mut compressor, token)) = picked {
                match compressor.compress(&response.body, true) {
                    Ok(compressed) => {
                        response.body = compressed;
                        response.set_header("Content-Encoding", token);
                    }
                    Err(error) => {
                        // Send uncompressed rather than fail the response.
                        debug!(%error, "compression failed, sending identity body");
                    }
                }
            }

            response.set_header("Content-Length", response.body.len().to_string());
        }

        if request.header_value("connection") == Some("close") {
            response.set_header("Connection", "close");
        } else if self.options.connection_timeout() != 0 {
            response.set_header(
                "Keep-Alive",
                format!("timeout={}", self.options.connection_timeout()),
            );
        }

        if !response.has_header("content-type")
            && (!response.body.is_empty()
                || response.content_length() > 0
                || response.has_content_provider())
        {
            response.set_header("Content-Type", "text/plain");
        }

        if !response.has_header("content-length")
            && response.body.is_empty()
            && response.content_length() == 0
            && !response.has_chunked_provider()
        {
            response.set_header("Content-Length", "0");
        }

        if !response.has_header("accept-ranges") && request.method == Method::Head {
            response.set_header("Accept-Ranges", "bytes");
        }

        if response.status == StatusCode::RANGE_NOT_SATISFIABLE {
            return self
                .write_stock_response(conn, StatusCode::RANGE_NOT_SATISFIABLE)
                .await;
        }

        conn.write_all(response.status.status_line().as_bytes())
            .await?;
        write_headers(conn, response).await?;

        if request.method != Method::Head {
            if !response.body.is_empty() {
                conn.write_all(&response.body).await?;
            } else if response.has_content_provider() || response.has_chunked_provider() {
                self.write_content_with_provider(
                    conn,
                    request,
                    response,
                    &boundary,
                    &part_content_type,
                    encoding,
                )
                .await?;
            }
        }
        conn.flush().await
    }

    /// Stream provider-backed content: plain, single-range, multi-range, or
    /// chunked with compression.
    async fn write_content_with_provider<S>(
        &self,
        conn: &mut S,
        request: &Request,
        response: &mut Response,
        boundary: &str,
        part_content_type: &str,
        encoding: EncodingType,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if let Some(provider) = response.content_provider().cloned() {
            let content_len = response.content_length();
            if request.ranges.is_empty() {
                write_provider_window(conn, &provider, 0, content_len).await?;
            } else if request.ranges.len() == 1 {
                let (offset, length) = range_window(&request.ranges[0], content_len);
                write_provider_window(conn, &provider, offset, length).await?;
            } else {
                let plan = multipart_ranges_plan(request, boundary, part_content_type, content_len);
                for segment in plan {
                    match segment {
                        Segment::Tokens(bytes) => conn.write_all(&bytes).await?,
                        Segment::Window { offset, length } => {
                            if !write_provider_window(conn, &provider, offset, length).await? {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        } else if let Some(provider) = response.take_chunked_provider() {
            let compressor: Box<dyn Compressor> = match encoding {
                EncodingType::Gzip => Box::new(GzipCompressor::new()),
                EncodingType::Brotli => Box::new(BrotliCompressor::new()),
                EncodingType::None => Box::new(IdentityCompressor::new()),
            };
            write_content_chunked(conn, provider, compressor).await?;
        }
        Ok(())
    }
}

/// Write the header block and the blank line that ends it.
async fn write_headers<S>(conn: &mut S, response: &Response) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut data = String::new();
    for header in response.headers.iter() {
        data.push_str(&header.name);
        data.push_str(": ");
        data.push_str(&header.value);
        data.push_str("\r\n");
    }
    data.push_str("\r\n");
    conn.write_all(data.as_bytes()).await
}

/// Run a length-known provider for one window, draining its sink onto the
/// connection. Returns whether the provider side stayed writable.
async fn write_provider_window<S>(
    conn: &mut S,
    provider: &ContentProvider,
    offset: u64,
    length: u64,
) -> io::Result<bool>
where
    S: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel(SINK_CHANNEL_DEPTH);
    let provider = Arc::clone(provider);
    let worker = tokio::task::spawn_blocking(move || {
        let mut sink = DataSink::new(tx);
        provider(offset, length, &mut sink);
        sink.is_writable()
    });

    while let Some(chunk) = rx.recv().await {
        conn.write_all(&chunk).await?;
    }

    Ok(worker.await.unwrap_or(false))
}

/// Drain a chunked provider through a compressor, framing each non-empty
/// payload as `<hex-size>\r\n<bytes>\r\n` and closing with `0\r\n\r\n`.
///
/// A compressor failure aborts the stream: nothing further is written, so
/// the peer sees a truncated chunked body.
async fn write_content_chunked<S>(
    conn: &mut S,
    provider: tlserve_core::ChunkedContentProvider,
    mut compressor: Box<dyn Compressor>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel(SINK_CHANNEL_DEPTH);
    let worker = tokio::task::spawn_blocking(move || provider(DataSink::new(tx)));

    let mut aborted = false;
    while let Some(data) = rx.recv().await {
        if data.is_empty() {
            continue;
        }
        match compressor.compress(&data, false) {
            Ok(payload) => {
                if !payload.is_empty() {
                    write_chunk(conn, &payload).await?;
                }
            }
            Err(error) => {
                debug!(%error, "chunk compression failed, aborting stream");
                aborted = true;
                break;
            }
        }
    }
    // Unblock a provider still pushing after an abort.
    drop(rx);
    let _ = worker.await;

    if aborted {
        return Ok(());
    }

    match compressor.compress(&[], true) {
        Ok(payload) => {
            if !payload.is_empty() {
                write_chunk(conn, &payload).await?;
            }
        }
        Err(error) => {
            debug!(%error, "final compressor flush failed, aborting stream");
            return Ok(());
        }
    }

    conn.write_all(b"0\r\n\r\n").await
}

async fn write_chunk<S>(conn: &mut S, payload: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    conn.write_all(format!("{:x}\r\n", payload.len()).as_bytes())
        .await?;
    conn.write_all(payload).await?;
    conn.write_all(b"\r\n").await
}

/// Generate the multipart/byteranges boundary token.
///
/// The token carries its own leading dashes; part delimiters on the wire
/// therefore start with four dashes.
fn make_multipart_boundary() -> String {
    let mut rng = rand::thread_rng();
    let mut boundary = String::from("--cpp-httpserver-multipart-data-");
    for _ in 0..16 {
        boundary.push(char::from(rng.sample(Alphanumeric)));
    }
    boundary
}

/// Resolve one sentinel-form range against a content length.
///
/// Returns `(offset, length)`. An unspecified end runs to the last byte; an
/// unspecified start selects the trailing `end` bytes (suffix form).
/// Windows that fall outside the content are returned as-is and rejected by
/// the caller's `offset >= len || length > len` check.
fn range_window(range: &Range, content_len: u64) -> (u64, u64) {
    let mut r = *range;
    if r.start == Range::UNSPECIFIED && r.end == Range::UNSPECIFIED {
        return (0, content_len);
    }

    let slen = content_len as i64;
    if r.start == Range::UNSPECIFIED {
        r.start = (slen - r.end).max(0);
        r.end = slen - 1;
    }
    if r.end == Range::UNSPECIFIED {
        r.end = slen - 1;
    }

    let offset = r.start.max(0) as u64;
    let length = (r.end - r.start + 1).max(0) as u64;
    (offset, length)
}

/// Format a `Content-Range` value: `bytes <first>-<last>/<total>`.
fn content_range_field(offset: u64, length: u64, content_len: u64) -> String {
    format!(
        "bytes {}-{}/{}",
        offset,
        (offset + length).saturating_sub(1),
        content_len
    )
}

/// Clamp-slice a body to a window, like substring semantics.
fn slice_window(body: &[u8], offset: u64, length: u64) -> &[u8] {
    let start = offset as usize;
    let end = (offset + length).min(body.len() as u64) as usize;
    &body[start..end]
}

/// Receiver for the multipart/byteranges framing walk.
///
/// The same walk produces the measured length, the materialized body, and
/// the streaming plan, depending on the sink.
trait RangesSink {
    fn token(&mut self, s: &str);
    /// Handle one range window. Returning `false` aborts the walk.
    fn content(&mut self, offset: u64, length: u64) -> bool;
}

/// Emit the multipart/byteranges framing for every requested range.
///
/// Per part: `--<boundary>`, optional part Content-Type, Content-Range, a
/// blank line, the content window, and a trailing CRLF; the walk closes
/// with `--<boundary>--`.
fn process_multipart_ranges(
    request: &Request,
    boundary: &str,
    content_type: &str,
    content_len: u64,
    sink: &mut dyn RangesSink,
) -> bool {
    for range in &request.ranges {
        sink.token("--");
        sink.token(boundary);
        sink.token("\r\n");
        if !content_type.is_empty() {
            sink.token("Content-Type: ");
            sink.token(content_type);
            sink.token("\r\n");
        }

        let (offset, length) = range_window(range, content_len);
        sink.token("Content-Range: ");
        sink.token(&content_range_field(offset, length, content_len));
        sink.token("\r\n");
        sink.token("\r\n");
        if !sink.content(offset, length) {
            return false;
        }
        sink.token("\r\n");
    }

    sink.token("--");
    sink.token(boundary);
    sink.token("--\r\n");
    true
}

struct LengthSink {
    content_len: u64,
    total: u64,
}

impl RangesSink for LengthSink {
    fn token(&mut self, s: &str) {
        self.total += s.len() as u64;
    }

    fn content(&mut self, offset: u64, length: u64) -> bool {
        if offset < self.content_len && length <= self.content_len {
            self.total += length;
            true
        } else {
            false
        }
    }
}

/// Measure the multipart/byteranges body length without reading content.
///
/// `None` means some window is unsatisfiable and the reply must be 416.
fn multipart_ranges_length(
    request: &Request,
    boundary: &str,
    content_type: &str,
    content_len: u64,
) -> Option<u64> {
    let mut sink = LengthSink {
        content_len,
        total: 0,
    };
    if process_multipart_ranges(request, boundary, content_type, content_len, &mut sink) {
        Some(sink.total)
    } else {
        None
    }
}

struct BodySink<'a> {
    body: &'a [u8],
    out: Vec<u8>,
}

impl RangesSink for BodySink<'_> {
    fn token(&mut self, s: &str) {
        self.out.extend_from_slice(s.as_bytes());
    }

    fn content(&mut self, offset: u64, length: u64) -> bool {
        let body_len = self.body.len() as u64;
        if offset < body_len && length <= body_len {
            self.out
                .extend_from_slice(slice_window(self.body, offset, length));
            true
        } else {
            false
        }
    }
}

/// Materialize the multipart/byteranges body from raw response bytes.
fn build_multipart_ranges_body(
    request: &Request,
    response: &Response,
    boundary: &str,
    content_type: &str,
) -> Option<Vec<u8>> {
    let mut sink = BodySink {
        body: &response.body,
        out: Vec::new(),
    };
    if process_multipart_ranges(
        request,
        boundary,
        content_type,
        response.body.len() as u64,
        &mut sink,
    ) {
        Some(sink.out)
    } else {
        None
    }
}

/// One step of the streaming multipart plan: literal framing bytes or a
/// provider window to drain.
enum Segment {
    Tokens(Vec<u8>),
    Window { offset: u64, length: u64 },
}

struct PlanSink {
    segments: Vec<Segment>,
}

impl RangesSink for PlanSink {
    fn token(&mut self, s: &str) {
        if let Some(Segment::Tokens(bytes)) = self.segments.last_mut() {
            bytes.extend_from_slice(s.as_bytes());
        } else {
            self.segments.push(Segment::Tokens(s.as_bytes().to_vec()));
        }
    }

    fn content(&mut self, offset: u64, length: u64) -> bool {
        self.segments.push(Segment::Window { offset, length });
        true
    }
}

/// Build the interleaved framing/window plan for streaming multipart
/// ranges from a provider. Windows were validated by the length pass.
fn multipart_ranges_plan(
    request: &Request,
    boundary: &str,
    content_type: &str,
    content_len: u64,
) -> Vec<Segment> {
    let mut sink = PlanSink {
        segments: Vec::new(),
    };
    process_multipart_ranges(request, boundary, content_type, content_len, &mut sink);
    sink.segments
}

// ============================================================================
// Tests
// ============================================================================
