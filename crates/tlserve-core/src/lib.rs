//! Core HTTP data model for the tlserve HTTPS server engine.
//!
//! This crate holds the types shared between the protocol engine and user
//! handlers: requests, responses, headers, status codes with their stock
//! response tables, multipart form parts, byte ranges, content-provider
//! plumbing, and the per-server configuration record.
//!
//! The protocol engine itself (parsing, connections, the response pipeline)
//! lives in `tlserve-http`.

pub mod multipart;
pub mod options;
pub mod request;
pub mod response;
pub mod service;
pub mod sink;
pub mod status;

pub use multipart::MultipartFile;
pub use options::{EncodingType, ServerOptions, DEFAULT_REQUEST_MAX_LENGTH, DEFAULT_URI_MAX_LENGTH};
pub use request::{Header, Headers, Method, Range, Request};
pub use response::{ChunkedContentProvider, ContentProvider, Response};
pub use service::Service;
pub use sink::DataSink;
pub use status::StatusCode;
