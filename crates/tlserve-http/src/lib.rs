//! HTTPS protocol engine for tlserve.
//!
//! This crate contains the moving parts of the server:
//!
//! - an incremental, character-at-a-time HTTP/1.1 request parser that
//!   tolerates arbitrary fragmentation of the input stream
//! - a nested `multipart/form-data` parser invoked on completed bodies
//! - the per-connection lifecycle driver (TLS handshake, read loop, idle
//!   deadline, keep-alive reset, shutdown)
//! - the response pipeline: byte ranges, `multipart/byteranges`, chunked
//!   transfer, and streaming gzip/brotli compression
//! - the acceptor and its pool of worker event loops
//!
//! Data model types (`Request`, `Response`, `ServerOptions`, ...) live in
//! [`tlserve_core`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tlserve_core::{Request, Response, ServerOptions, Service};
//! use tlserve_http::Server;
//!
//! struct Hello;
//!
//! impl Service for Hello {
//!     fn handle_request(&self, _req: &Request, res: &mut Response) {
//!         res.set_content("hello", "text/plain");
//!     }
//! }
//!
//! let options = ServerOptions::new()
//!     .with_cert_file("cert.pem")
//!     .with_private_key_file("key.pem");
//! let mut server = Server::new("127.0.0.1", "8443", 8, options);
//! server.add_service("/hello", Arc::new(Hello));
//! server.run().unwrap();
//! ```

pub mod compress;
pub mod connection;
pub mod encoding;
pub mod handler;
pub mod multipart;
pub mod parser;
pub mod server;
pub mod tls;
pub mod uri;

pub use compress::{BrotliCompressor, Compressor, GzipCompressor, IdentityCompressor};
pub use connection::{Connection, RECV_BUFFER_SIZE};
pub use encoding::negotiate_encoding;
pub use handler::RequestHandler;
pub use multipart::MultipartParser;
pub use parser::{ParseResult, RequestParser};
pub use server::{Server, ServerError};
pub use tls::TlsError;
