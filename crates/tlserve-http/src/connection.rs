//! Per-connection lifecycle driver.
//!
//! One [`Connection`] owns one stream and drives the
//! read → parse → dispatch → reset cycle until the peer goes away, the
//! protocol is violated, the idle deadline fires, or the server shuts down.
//! Within a connection, requests are handled strictly in arrival order;
//! pipelined bytes left over after a completed message are re-fed to the
//! freshly reset parser before the next read.
//!
//! The driver is generic over the stream so the whole cycle can be
//! exercised against an in-memory duplex in tests; production wraps a
//! [`tokio_rustls::server::TlsStream`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use tlserve_core::{Request, Response, ServerOptions};

use crate::handler::RequestHandler;
use crate::parser::{ParseResult, RequestParser};

/// Size of the per-connection receive buffer.
pub const RECV_BUFFER_SIZE: usize = 8192;

enum ReadOutcome {
    Data(usize),
    Eof,
    IdleTimeout,
    Shutdown,
}

/// State for one accepted connection.
pub struct Connection<S> {
    stream: S,
    parser: RequestParser,
    request: Request,
    response: Response,
    handler: Arc<RequestHandler>,
    options: Arc<ServerOptions>,
    peer_addr: Option<SocketAddr>,
    shutdown: watch::Receiver<bool>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established (already handshaken) stream.
    pub fn new(
        stream: S,
        peer_addr: Option<SocketAddr>,
        handler: Arc<RequestHandler>,
        options: Arc<ServerOptions>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            parser: RequestParser::new(Arc::clone(&options)),
            request: Request::new(),
            response: Response::new(),
            handler,
            options,
            peer_addr,
            shutdown,
        }
    }

    /// Drive the connection to completion, then close the socket.
    ///
    /// Transport failures tear the connection down silently; an operator
    /// shutdown is not a fault and closes the same way.
    pub async fn run(mut self) {
        if let Err(error) = self.drive().await {
            debug!(%error, "connection closed on transport error");
        }
        let _ = self.stream.shutdown().await;
    }

    async fn drive(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let n = match self.read_once(&mut buf).await? {
                ReadOutcome::Data(n) => n,
                ReadOutcome::Eof | ReadOutcome::Shutdown => return Ok(()),
                ReadOutcome::IdleTimeout => {
                    debug!("idle timeout, closing connection");
                    return Ok(());
                }
            };

            if !self.consume_bytes(&buf[..n]).await? {
                return Ok(());
            }
        }
    }

    /// Feed freshly read bytes through the parser, dispatching every
    /// completed message. Returns `false` when the connection must close.
    async fn consume_bytes(&mut self, mut chunk: &[u8]) -> io::Result<bool> {
        while !chunk.is_empty() {
            let (result, consumed) =
                self.parser
                    .parse(&mut self.request, &mut self.response, chunk);
            chunk = &chunk[consumed..];

            match result {
                ParseResult::Complete => {
                    self.request.remote_addr = self.peer_addr;
                    let close_requested =
                        self.request.header_value("connection") == Some("close");

                    self.handler
                        .handle(&mut self.stream, &self.request, &mut self.response)
                        .await?;

                    if close_requested {
                        return Ok(false);
                    }
                    self.reset();
                }
                ParseResult::Malformed => {
                    let status = self.response.status;
                    self.handler
                        .write_stock_response(&mut self.stream, status)
                        .await?;
                    return Ok(false);
                }
                ParseResult::NeedMoreData => break,
            }
        }
        Ok(true)
    }

    /// One read, raced against the idle deadline and the shutdown signal.
    async fn read_once(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let timeout_secs = self.options.connection_timeout();
        tokio::select! {
            read = self.stream.read(buf) => match read? {
                0 => Ok(ReadOutcome::Eof),
                n => Ok(ReadOutcome::Data(n)),
            },
            () = idle_sleep(timeout_secs) => Ok(ReadOutcome::IdleTimeout),
            _ = self.shutdown.changed() => Ok(ReadOutcome::Shutdown),
        }
    }

    /// Fresh request/response/parser state for the next pipelined message.
    fn reset(&mut self) {
        self.request = Request::new();
        self.response = Response::new();
        self.parser.reset();
    }
}

/// Sleep for the idle deadline, or forever when the timeout is zero.
async fn idle_sleep(timeout_secs: u64) {
    if timeout_secs == 0 {
        std::future::pending::<()>().await;
    } else {
        sleep(Duration::from_secs(timeout_secs)).await;
    }
}
