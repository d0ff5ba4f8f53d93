//! Acceptor and worker pool.
//!
//! The [`Server`] binds a listener on the caller's runtime and distributes
//! accepted sockets round-robin across a fixed pool of worker threads, each
//! running its own current-thread runtime and `LocalSet`. Every task of a
//! given connection (TLS handshake, read loop, idle deadline) therefore
//! stays on its assigned worker loop, so per-connection state needs no
//! locking. The only cross-connection state is the read-only configuration
//! and the pool's round-robin counter.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use tlserve_core::{ServerOptions, Service};

use crate::connection::Connection;
use crate::handler::RequestHandler;
use crate::tls::{self, TlsError};

/// Default number of worker event loops.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Server startup/runtime error.
#[derive(Debug)]
pub enum ServerError {
    /// Socket or runtime I/O failure.
    Io(io::Error),
    /// TLS context construction failed.
    Tls(TlsError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "I/O error: {error}"),
            Self::Tls(error) => write!(f, "TLS error: {error}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            Self::Tls(error) => Some(error),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<TlsError> for ServerError {
    fn from(error: TlsError) -> Self {
        Self::Tls(error)
    }
}

/// An accepted socket on its way to a worker loop.
struct ConnectionJob {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

/// Fixed pool of worker event loops with round-robin dispatch.
struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<ConnectionJob>>,
    next: AtomicUsize,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads, each owning a current-thread runtime.
    fn start(
        size: usize,
        acceptor: TlsAcceptor,
        handler: Arc<RequestHandler>,
        options: Arc<ServerOptions>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let size = size.max(1);
        let mut senders = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = mpsc::unbounded_channel::<ConnectionJob>();
            senders.push(tx);

            let acceptor = acceptor.clone();
            let handler = Arc::clone(&handler);
            let options = Arc::clone(&options);
            let shutdown = shutdown.clone();

            let thread = std::thread::Builder::new()
                .name(format!("tlserve-worker-{index}"))
                .spawn(move || worker_loop(rx, acceptor, handler, options, shutdown));
            match thread {
                Ok(handle) => threads.push(handle),
                Err(e) => error!(worker = index, error = %e, "failed to spawn worker thread"),
            }
        }

        Self {
            senders,
            next: AtomicUsize::new(0),
            threads,
        }
    }

    /// Hand a socket to the next worker in round-robin order.
    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if self.senders.is_empty() {
            return;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        if self.senders[index]
            .send(ConnectionJob { stream, peer_addr })
            .is_err()
        {
            warn!(worker = index, "worker loop is gone, dropping connection");
        }
    }

    /// Close the job channels and join the worker threads.
    fn join(mut self) {
        self.senders.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Body of one worker thread: accept jobs until the channel closes,
/// spawning each connection as a local task.
fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<ConnectionJob>,
    acceptor: TlsAcceptor,
    handler: Arc<RequestHandler>,
    options: Arc<ServerOptions>,
    shutdown: watch::Receiver<bool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build worker runtime");
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        while let Some(job) = rx.recv().await {
            let acceptor = acceptor.clone();
            let handler = Arc::clone(&handler);
            let options = Arc::clone(&options);
            let shutdown = shutdown.clone();

            tokio::task::spawn_local(async move {
                match acceptor.accept(job.stream).await {
                    Ok(stream) => {
                        Connection::new(
                            stream,
                            Some(job.peer_addr),
                            handler,
                            options,
                            shutdown,
                        )
                        .run()
                        .await;
                    }
                    Err(error) => {
                        // Handshake failure is the peer's problem, not ours.
                        debug!(peer = %job.peer_addr, %error, "TLS handshake failed");
                    }
                }
            });
        }
    });
}

/// The HTTPS server: configuration, service table, acceptor, worker pool.
pub struct Server {
    address: String,
    port: String,
    pool_size: usize,
    options: ServerOptions,
    services: HashMap<String, Arc<dyn Service>>,
}

impl Server {
    /// Create a server bound to `address:port` with `pool_size` worker
    /// loops.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        port: impl Into<String>,
        pool_size: usize,
        options: ServerOptions,
    ) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
            pool_size,
            options,
            services: HashMap::new(),
        }
    }

    /// Register a service under an exact first path segment.
    pub fn add_service(&mut self, path: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(path.into(), service);
    }

    /// Run the server on a fresh runtime until SIGINT/ctrl-c.
    ///
    /// # Errors
    ///
    /// Fails when the runtime, listener, or TLS context cannot be built.
    pub fn run(self) -> Result<(), ServerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.serve())
    }

    /// Serve until ctrl-c on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails when the listener or TLS context cannot be built.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until the given future resolves.
    ///
    /// # Errors
    ///
    /// Fails when the listener or TLS context cannot be built.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve connections from an already-bound listener until `signal`
    /// resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Fails when the TLS context cannot be built or the listener address
    /// is unreadable.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()>,
    {
        let options = Arc::new(self.options);
        let acceptor = tls::build_acceptor(&options)?;

        let mut handler = RequestHandler::new(Arc::clone(&options));
        for (path, service) in self.services {
            handler.add_service(path, service);
        }
        let handler = Arc::new(handler);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::start(
            self.pool_size,
            acceptor,
            handler,
            Arc::clone(&options),
            shutdown_rx,
        );

        info!("listening on https://{}", listener.local_addr()?);

        tokio::pin!(signal);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => pool.dispatch(stream, peer_addr),
                    Err(error) => warn!(%error, "accept failed"),
                },
                () = &mut signal => break,
            }
        }

        info!("shutting down");
        let _ = shutdown_tx.send(true);
        pool.join();
        Ok(())
    }
}
