//! Per-server configuration.

use std::path::{Path, PathBuf};

/// Default limit on the request target length, in bytes.
pub const DEFAULT_URI_MAX_LENGTH: usize = 1024;

/// Default limit on the declared request body length, in bytes (8 MiB).
pub const DEFAULT_REQUEST_MAX_LENGTH: usize = 8 * 1024 * 1024;

/// Response content encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingType {
    /// No compression.
    None,
    /// Gzip-container deflate (`Content-Encoding: gzip`).
    Gzip,
    /// Brotli (`Content-Encoding: br`).
    #[default]
    Brotli,
}

/// Immutable per-server configuration.
///
/// Built once before the server starts and shared read-only by every
/// connection afterwards.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    cert_file_path: PathBuf,
    private_key_file_path: PathBuf,
    private_key_passphrase: String,
    connection_timeout: u64,
    uri_max_length: usize,
    request_max_length: usize,
    encoding_type: EncodingType,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cert_file_path: PathBuf::new(),
            private_key_file_path: PathBuf::new(),
            private_key_passphrase: String::new(),
            connection_timeout: 0,
            uri_max_length: DEFAULT_URI_MAX_LENGTH,
            request_max_length: DEFAULT_REQUEST_MAX_LENGTH,
            encoding_type: EncodingType::Brotli,
        }
    }
}

impl ServerOptions {
    /// Create options with the defaults: no idle timeout, 1 KiB URI limit,
    /// 8 MiB body limit, Brotli preferred.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the certificate chain file path (PEM).
    #[must_use]
    pub fn with_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file_path = path.into();
        self
    }

    /// Set the private key file path (PEM).
    #[must_use]
    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file_path = path.into();
        self
    }

    /// Set the private key passphrase.
    ///
    /// Accepted for configuration parity; the rustls backend only loads
    /// cleartext PEM keys, so an encrypted key fails at startup with an
    /// error advising decryption.
    #[must_use]
    pub fn with_private_key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.private_key_passphrase = passphrase.into();
        self
    }

    /// Set the idle connection timeout in seconds. `0` disables the timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, seconds: u64) -> Self {
        self.connection_timeout = seconds;
        self
    }

    /// Set the maximum accepted request target length.
    #[must_use]
    pub fn with_uri_max_length(mut self, length: usize) -> Self {
        self.uri_max_length = length;
        self
    }

    /// Set the maximum accepted request body length.
    #[must_use]
    pub fn with_request_max_length(mut self, length: usize) -> Self {
        self.request_max_length = length;
        self
    }

    /// Set the preferred response encoding.
    #[must_use]
    pub fn with_encoding_type(mut self, encoding: EncodingType) -> Self {
        self.encoding_type = encoding;
        self
    }

    /// Certificate chain file path.
    #[must_use]
    pub fn cert_file_path(&self) -> &Path {
        &self.cert_file_path
    }

    /// Private key file path.
    #[must_use]
    pub fn private_key_file_path(&self) -> &Path {
        &self.private_key_file_path
    }

    /// Private key passphrase, empty when unset.
    #[must_use]
    pub fn private_key_passphrase(&self) -> &str {
        &self.private_key_passphrase
    }

    /// Idle timeout in seconds; `0` means unbounded.
    #[must_use]
    pub fn connection_timeout(&self) -> u64 {
        self.connection_timeout
    }

    /// Maximum accepted request target length.
    #[must_use]
    pub fn uri_max_length(&self) -> usize {
        self.uri_max_length
    }

    /// Maximum accepted request body length.
    #[must_use]
    pub fn request_max_length(&self) -> usize {
        self.request_max_length
    }

    /// Preferred response encoding.
    #[must_use]
    pub fn encoding_type(&self) -> EncodingType {
        self.encoding_type
    }
}
