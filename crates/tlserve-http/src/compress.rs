//! Streaming response compressors.
//!
//! A [`Compressor`] is stateful across calls within one response stream:
//! the chunked-transfer writer feeds it chunk by chunk, while the raw-body
//! path makes a single call with `last = true`. A call may legitimately
//! produce no output (the encoder is buffering); `last` forces the stream
//! closed and drains everything that remains.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Brotli encoder buffer size.
const BROTLI_BUFFER_SIZE: usize = 4096;
/// Brotli quality level; the usual dynamic-content tradeoff.
const BROTLI_QUALITY: u32 = 5;
/// Brotli window size (log2).
const BROTLI_LGWIN: u32 = 22;

/// A stateful streaming compressor for one response stream.
pub trait Compressor: Send {
    /// Feed `input` and return whatever encoded bytes are ready, possibly
    /// none. `last` finalizes the stream; no further calls are valid after
    /// it.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying encoder fails or when called
    /// again after `last`.
    fn compress(&mut self, input: &[u8], last: bool) -> io::Result<Vec<u8>>;
}

/// Pass-through compressor for identity encoding.
#[derive(Debug, Default)]
pub struct IdentityCompressor;

impl IdentityCompressor {
    /// Create a pass-through compressor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Compressor for IdentityCompressor {
    fn compress(&mut self, input: &[u8], _last: bool) -> io::Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// Gzip compressor (deflate in a gzip container).
pub struct GzipCompressor {
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl GzipCompressor {
    /// Create a compressor with the default compression level.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn compress(&mut self, input: &[u8], last: bool) -> io::Result<Vec<u8>> {
        let Some(mut encoder) = self.encoder.take() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "gzip stream already finished",
            ));
        };

        encoder.write_all(input)?;
        if last {
            encoder.finish()
        } else {
            // Sync-flush so everything fed so far becomes output now; the
            // stream stays open for the next chunk.
            encoder.flush()?;
            let out = std::mem::take(encoder.get_mut());
            self.encoder = Some(encoder);
            Ok(out)
        }
    }
}

/// Brotli compressor.
pub struct BrotliCompressor {
    encoder: Option<brotli::CompressorWriter<Vec<u8>>>,
}

impl BrotliCompressor {
    /// Create a compressor with the module's quality/window settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: Some(brotli::CompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_LGWIN,
            )),
        }
    }
}

impl Default for BrotliCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for BrotliCompressor {
    fn compress(&mut self, input: &[u8], last: bool) -> io::Result<Vec<u8>> {
        let Some(mut encoder) = self.encoder.take() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "brotli stream already finished",
            ));
        };

        encoder.write_all(input)?;
        if last {
            // into_inner closes the brotli stream and hands back the buffer.
            Ok(encoder.into_inner())
        } else {
            encoder.flush()?;
            let out = std::mem::take(encoder.get_mut());
            self.encoder = Some(encoder);
            Ok(out)
        }
    }
}
