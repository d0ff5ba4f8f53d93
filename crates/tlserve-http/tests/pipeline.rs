//! Wire-level tests of the connection driver and response pipeline over an
//! in-memory duplex stream: no sockets, no TLS, the same engine code.

use std::io::Read;
use std::sync::Arc;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

use tlserve_core::{
    EncodingType, Request, Response, ServerOptions, Service,
};
use tlserve_http::{Connection, RequestHandler};

// ============================================================================
// Test services
// ============================================================================

/// Serves a fixed body as text/plain.
struct TextService(&'static str);

impl Service for TextService {
    fn handle_request(&self, _req: &Request, res: &mut Response) {
        res.set_content(self.0, "text/plain");
    }
}

/// Serves fixed bytes through a length-known content provider.
struct ProviderService(&'static [u8]);

impl Service for ProviderService {
    fn handle_request(&self, _req: &Request, res: &mut Response) {
        let data = self.0;
        res.set_content_provider(
            data.len() as u64,
            "application/octet-stream",
            move |offset, length, sink| {
                let start = offset as usize;
                let end = ((offset + length) as usize).min(data.len());
                sink.write(&data[start..end]);
            },
        );
    }
}

/// Streams three chunks through the chunked provider.
struct ChunkedService;

impl Service for ChunkedService {
    fn handle_request(&self, _req: &Request, res: &mut Response) {
        res.set_chunked_content_provider("text/plain", |mut sink| {
            sink.write(b"hello ");
            sink.write(b"chunked ");
            sink.write(b"world");
            sink.done();
        });
    }
}

/// Reports the uploaded multipart parts back in the body.
struct UploadService;

impl Service for UploadService {
    fn handle_request(&self, req: &Request, res: &mut Response) {
        let summary: Vec<String> = req
            .files
            .iter()
            .map(|f| {
                format!(
                    "{}:{}:{}:{}",
                    f.name,
                    f.filename,
                    f.content_type,
                    String::from_utf8_lossy(&f.content)
                )
            })
            .collect();
        res.set_content(summary.join("|"), "text/plain");
    }
}

// ============================================================================
// Harness
// ============================================================================

fn engine(
    options: ServerOptions,
    services: &[(&str, Arc<dyn Service>)],
) -> (DuplexStream, tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let options = Arc::new(options);
    let mut handler = RequestHandler::new(Arc::clone(&options));
    for (path, service) in services {
        handler.add_service(*path, Arc::clone(service));
    }
    let handler = Arc::new(handler);

    let (client, server) = duplex(256 * 1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let conn = Connection::new(server, None, handler, options, shutdown_rx);
    let task = tokio::task::spawn_local(conn.run());
    (client, task, shutdown_tx)
}

/// Drive a test body on a `LocalSet` so the connection task — spawned with
/// `spawn_local` to match the server's per-worker current-thread model —
/// makes progress alongside the client-side I/O on the same runtime.
async fn with_local<F: std::future::Future>(body: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(body).await
}

/// Send one request and read the whole connection output until the server
/// closes. The request should carry `Connection: close` or be malformed.
async fn roundtrip(
    options: ServerOptions,
    services: &[(&str, Arc<dyn Service>)],
    request: &[u8],
) -> Vec<u8> {
    with_local(async move {
        let (mut client, task, _shutdown) = engine(options, services);
        client.write_all(request).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();
        out
    })
    .await
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a raw response into (header text, body bytes after the blank line).
fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = find_subslice(raw, b"\r\n\r\n").expect("header terminator");
    (
        String::from_utf8_lossy(&raw[..pos + 4]).into_owned(),
        raw[pos + 4..].to_vec(),
    )
}

fn header_value(headers: &str, name: &str) -> Option<String> {
    headers
        .lines()
        .filter_map(|line| line.split_once(": "))
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim_end().to_string())
}

/// Read exactly one length-delimited response from an open connection.
/// `carry` holds bytes of any following pipelined response between calls.
async fn read_response(client: &mut DuplexStream, carry: &mut Vec<u8>) -> (String, Vec<u8>) {
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = find_subslice(carry, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = client.read(&mut tmp).await.unwrap();
        assert!(n > 0, "connection closed before headers completed");
        carry.extend_from_slice(&tmp[..n]);
    };

    let headers = String::from_utf8_lossy(&carry[..header_end]).into_owned();
    let content_length: usize = header_value(&headers, "content-length")
        .expect("content-length header")
        .parse()
        .unwrap();

    while carry.len() < header_end + content_length {
        let n = client.read(&mut tmp).await.unwrap();
        assert!(n > 0, "connection closed before body completed");
        carry.extend_from_slice(&tmp[..n]);
    }
    let body = carry[header_end..header_end + content_length].to_vec();
    carry.drain(..header_end + content_length);
    (headers, body)
}

fn decode_chunked(mut data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let pos = find_subslice(data, b"\r\n").expect("chunk size line");
        let size =
            usize::from_str_radix(std::str::from_utf8(&data[..pos]).unwrap(), 16).unwrap();
        data = &data[pos + 2..];
        if size == 0 {
            break;
        }
        out.extend_from_slice(&data[..size]);
        assert_eq!(&data[size..size + 2], b"\r\n");
        data = &data[size + 2..];
    }
    out
}

// ============================================================================
// Basic dispatch
// ============================================================================

#[tokio::test]
async fn unmatched_path_gets_stock_404() {
    let raw = roundtrip(
        ServerOptions::new(),
        &[],
        b"GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(header_value(&headers, "content-type").as_deref(), Some("text/html"));
    assert_eq!(header_value(&headers, "connection").as_deref(), Some("close"));
    assert!(String::from_utf8_lossy(&body).contains("<h1>404 Not Found</h1>"));
}

#[tokio::test]
async fn matched_service_gets_200_with_body() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/hello", Arc::new(TextService("hi there")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header_value(&headers, "content-type").as_deref(), Some("text/plain"));
    assert_eq!(header_value(&headers, "content-length").as_deref(), Some("8"));
    assert_eq!(body, b"hi there");
}

#[tokio::test]
async fn sub_path_reaches_first_segment_service() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/files", Arc::new(TextService("served")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /files/images/cat.png HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn malformed_method_gets_stock_501_and_close() {
    let raw = roundtrip(ServerOptions::new(), &[], b"PUT /x HTTP/1.1\r\n\r\n").await;
    let (headers, body) = split_response(&raw);
    assert!(headers.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("501 Not Implemented"));
}

#[tokio::test]
async fn garbage_request_gets_stock_400() {
    let raw = roundtrip(ServerOptions::new(), &[], b"\x01\x02\x03\r\n\r\n").await;
    assert!(raw.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
}

// ============================================================================
// Keep-alive and connection management
// ============================================================================

#[tokio::test]
async fn keep_alive_advertised_when_timeout_configured() {
    with_local(async move {
        let services: &[(&str, Arc<dyn Service>)] = &[("/hello", Arc::new(TextService("x")))];
        let (mut client, _task, _shutdown) =
            engine(ServerOptions::new().with_connection_timeout(7), services);

        client
            .write_all(b"GET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (headers, _) = read_response(&mut client, &mut Vec::new()).await;
        assert_eq!(header_value(&headers, "keep-alive").as_deref(), Some("timeout=7"));
        assert!(header_value(&headers, "connection").is_none());
    })
    .await;
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    with_local(async move {
        let services: &[(&str, Arc<dyn Service>)] = &[
            ("/a", Arc::new(TextService("first"))),
            ("/b", Arc::new(TextService("second"))),
        ];
        let (mut client, _task, _shutdown) = engine(ServerOptions::new(), services);

        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut carry = Vec::new();
        let (first_headers, first_body) = read_response(&mut client, &mut carry).await;
        assert!(first_headers.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(first_body, b"first");

        let (second_headers, second_body) = read_response(&mut client, &mut carry).await;
        assert!(second_headers.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(second_body, b"second");
    })
    .await;
}

#[tokio::test]
async fn explicit_close_is_honored() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/hello", Arc::new(TextService("bye")))];
    let raw = roundtrip(
        ServerOptions::new().with_connection_timeout(10),
        services,
        b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, _) = split_response(&raw);
    // Echoed close, no keep-alive advertisement, and the read ran to EOF.
    assert_eq!(header_value(&headers, "connection").as_deref(), Some("close"));
    assert!(header_value(&headers, "keep-alive").is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_connection_closed_at_deadline() {
    with_local(async move {
        let start = tokio::time::Instant::now();
        let (mut client, task, _shutdown) =
            engine(ServerOptions::new().with_connection_timeout(3), &[]);

        // No bytes sent: the engine must close on its own at the deadline.
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();

        assert!(out.is_empty());
        assert!(start.elapsed() >= std::time::Duration::from_secs(3));
    })
    .await;
}

#[tokio::test]
async fn server_shutdown_closes_idle_connection_silently() {
    with_local(async move {
        let (mut client, task, shutdown) = engine(ServerOptions::new(), &[]);
        shutdown.send(true).unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();
        assert!(out.is_empty());
    })
    .await;
}

// ============================================================================
// HEAD
// ============================================================================

#[tokio::test]
async fn head_keeps_headers_suppresses_body() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/hello", Arc::new(TextService("hello")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"HEAD /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header_value(&headers, "content-length").as_deref(), Some("5"));
    assert_eq!(header_value(&headers, "accept-ranges").as_deref(), Some("bytes"));
    assert!(body.is_empty());
}

// ============================================================================
// Ranges
// ============================================================================

#[tokio::test]
async fn single_range_yields_206_with_slice() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/data", Arc::new(TextService("0123456789")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /data HTTP/1.1\r\nRange: bytes=0-4\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert_eq!(
        header_value(&headers, "content-range").as_deref(),
        Some("bytes 0-4/10")
    );
    assert_eq!(header_value(&headers, "content-length").as_deref(), Some("5"));
    assert_eq!(body, b"01234");
}

#[tokio::test]
async fn suffix_range_selects_tail() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/data", Arc::new(TextService("0123456789")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /data HTTP/1.1\r\nRange: bytes=-3\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert_eq!(
        header_value(&headers, "content-range").as_deref(),
        Some("bytes 7-9/10")
    );
    assert_eq!(body, b"789");
}

#[tokio::test]
async fn out_of_window_range_gets_stock_416() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/data", Arc::new(TextService("0123456789")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /data HTTP/1.1\r\nRange: bytes=20-\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 416 Range Not Satisfiable\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("416 Range Not Satisfiable"));
}

#[tokio::test]
async fn two_ranges_build_multipart_byteranges() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/data", Arc::new(TextService("0123456789")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /data HTTP/1.1\r\nRange: bytes=0-1,5-6\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    let content_type = header_value(&headers, "content-type").unwrap();
    let boundary = content_type
        .strip_prefix("multipart/byteranges; boundary=")
        .expect("byteranges content type");
    assert!(boundary.starts_with("--cpp-httpserver-multipart-data-"));

    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with(&format!("--{boundary}\r\n")));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Content-Range: bytes 0-1/10\r\n\r\n01\r\n"));
    assert!(text.contains("Content-Range: bytes 5-6/10\r\n\r\n56\r\n"));
    assert!(text.ends_with(&format!("--{boundary}--\r\n")));

    let declared: usize = header_value(&headers, "content-length")
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(declared, body.len());
}

// ============================================================================
// Content providers
// ============================================================================

#[tokio::test]
async fn provider_serves_whole_content() {
    let services: &[(&str, Arc<dyn Service>)] =
        &[("/blob", Arc::new(ProviderService(b"abcdefghij")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /blob HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header_value(&headers, "content-length").as_deref(), Some("10"));
    assert_eq!(body, b"abcdefghij");
}

#[tokio::test]
async fn provider_serves_single_range_window() {
    let services: &[(&str, Arc<dyn Service>)] =
        &[("/blob", Arc::new(ProviderService(b"abcdefghij")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /blob HTTP/1.1\r\nRange: bytes=2-5\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert_eq!(
        header_value(&headers, "content-range").as_deref(),
        Some("bytes 2-5/10")
    );
    assert_eq!(header_value(&headers, "content-length").as_deref(), Some("4"));
    assert_eq!(body, b"cdef");
}

#[tokio::test]
async fn provider_streams_multipart_ranges() {
    let services: &[(&str, Arc<dyn Service>)] =
        &[("/blob", Arc::new(ProviderService(b"abcdefghij")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /blob HTTP/1.1\r\nRange: bytes=0-1,8-9\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("Content-Range: bytes 0-1/10\r\n\r\nab\r\n"));
    assert!(text.contains("Content-Range: bytes 8-9/10\r\n\r\nij\r\n"));

    let declared: usize = header_value(&headers, "content-length")
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(declared, body.len());
}

#[tokio::test]
async fn provider_out_of_window_range_gets_stock_416() {
    let services: &[(&str, Arc<dyn Service>)] =
        &[("/blob", Arc::new(ProviderService(b"abcdefghij")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /blob HTTP/1.1\r\nRange: bytes=90-99\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with(b"HTTP/1.1 416 Range Not Satisfiable\r\n"));
}

// ============================================================================
// Chunked transfer and compression
// ============================================================================

#[tokio::test]
async fn chunked_provider_without_encoding() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/stream", Arc::new(ChunkedService))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /stream HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(
        header_value(&headers, "transfer-encoding").as_deref(),
        Some("chunked")
    );
    assert!(header_value(&headers, "content-encoding").is_none());
    assert_eq!(decode_chunked(&body), b"hello chunked world");
}

#[tokio::test]
async fn chunked_provider_with_gzip() {
    let services: &[(&str, Arc<dyn Service>)] = &[("/stream", Arc::new(ChunkedService))];
    let raw = roundtrip(
        ServerOptions::new().with_encoding_type(EncodingType::Gzip),
        services,
        b"GET /stream HTTP/1.1\r\nAccept-Encoding: gzip\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert_eq!(
        header_value(&headers, "transfer-encoding").as_deref(),
        Some("chunked")
    );
    assert_eq!(
        header_value(&headers, "content-encoding").as_deref(),
        Some("gzip")
    );

    let compressed = decode_chunked(&body);
    let mut decompressed = Vec::new();
    flate2::read::GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut decompressed)
        .unwrap();
    assert_eq!(decompressed, b"hello chunked world");
}

#[tokio::test]
async fn raw_body_compressed_with_brotli() {
    let long_body: &'static str =
        "this text is repetitive enough to shrink under brotli compression. \
         this text is repetitive enough to shrink under brotli compression.";
    let services: &[(&str, Arc<dyn Service>)] = &[("/page", Arc::new(TextService(long_body)))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /page HTTP/1.1\r\nAccept-Encoding: br, gzip\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);

    assert_eq!(header_value(&headers, "content-encoding").as_deref(), Some("br"));
    let declared: usize = header_value(&headers, "content-length")
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(declared, body.len());

    let mut decompressed = Vec::new();
    brotli::Decompressor::new(body.as_slice(), 4096)
        .read_to_end(&mut decompressed)
        .unwrap();
    assert_eq!(decompressed, long_body.as_bytes());
}

#[tokio::test]
async fn uncompressible_type_is_sent_raw() {
    let services: &[(&str, Arc<dyn Service>)] =
        &[("/blob", Arc::new(ProviderService(b"binarydata")))];
    let raw = roundtrip(
        ServerOptions::new(),
        services,
        b"GET /blob HTTP/1.1\r\nAccept-Encoding: br, gzip\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (headers, body) = split_response(&raw);
    assert!(header_value(&headers, "content-encoding").is_none());
    assert_eq!(body, b"binarydata");
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn multipart_upload_reaches_service() {
    let multipart_body = concat!(
        "--fff\r\n",
        "Content-Disposition: form-data; name=\"docs\"; filename=\"a.txt\"\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "alpha\r\n",
        "--fff\r\n",
        "Content-Disposition: form-data; name=\"docs\"; filename=\"b.txt\"\r\n",
        "\r\n",
        "beta\r\n",
        "--fff--\r\n"
    );
    let request = format!(
        "POST /upload HTTP/1.1\r\n\
         Content-Type: multipart/form-data; boundary=fff\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        multipart_body.len(),
        multipart_body
    );

    let services: &[(&str, Arc<dyn Service>)] = &[("/upload", Arc::new(UploadService))];
    let raw = roundtrip(ServerOptions::new(), services, request.as_bytes()).await;
    let (headers, body) = split_response(&raw);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(
        body,
        b"docs:a.txt:text/plain:alpha|docs:b.txt::beta"
    );
}

#[tokio::test]
async fn oversized_post_rejected_before_body() {
    let raw = roundtrip(
        ServerOptions::new().with_request_max_length(8),
        &[],
        b"POST /upload HTTP/1.1\r\nContent-Length: 9\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with(b"HTTP/1.1 413 Payload Too Large\r\n"));
}
