//! Data sink through which content providers push response bytes.

use tokio::sync::mpsc;

/// The write/done pair handed to a content provider.
///
/// Providers are synchronous callbacks executed on the blocking thread pool;
/// each [`write`][Self::write] hands a chunk to the connection task through a
/// bounded channel, so a slow peer stalls only the provider that feeds it.
///
/// Once the connection side goes away, `write` returns `false` and keeps
/// returning `false`; providers are expected to stop producing at that point.
/// Completion is signalled by calling [`done`][Self::done] or simply by
/// dropping the sink when the provider returns.
#[derive(Debug)]
pub struct DataSink {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    writable: bool,
}

impl DataSink {
    /// Wrap a channel sender. The receiving half belongs to the connection.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx: Some(tx),
            writable: true,
        }
    }

    /// Push a chunk toward the socket, blocking while the peer catches up.
    ///
    /// Returns `false` once the connection has hung up; the failure is
    /// sticky. Empty chunks are accepted and ignored.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if !self.writable {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        let Some(tx) = &self.tx else {
            self.writable = false;
            return false;
        };
        match tx.blocking_send(data.to_vec()) {
            Ok(()) => true,
            Err(_) => {
                self.writable = false;
                false
            }
        }
    }

    /// Whether the last write succeeded and further writes can proceed.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Signal that no more data will be produced.
    pub fn done(mut self) {
        self.tx = None;
    }
}
