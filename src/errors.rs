use std::{io, net::SocketAddr};
use thiserror::Error;

/// Reasons a single connection is torn down.
///
/// These never leave the worker that owns the connection: they are logged
/// and the connection is dropped.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ErrorKind {
    #[error("malformed request line")]
    RequestLineMalformed,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("path must be absolute")]
    InvalidPath,
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
    #[error("line exceeds the receive buffer")]
    LineTooLong,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("too many header lines")]
    TooManyHeaders,
    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("peer closed the connection")]
    Closed,
    #[error("handler produced no bytes while {0} were still declared")]
    BodyUnderrun(usize),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("TLS shutdown failed: {0}")]
    Shutdown(String),
    #[error("I/O error: {0}")]
    Io(IoError),
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug, Error)]
#[error(transparent)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Errors reported synchronously by [`Server`](crate::Server) operations.
///
/// A failed [`Server::start`](crate::Server::start) leaves nothing running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called with zero workers.
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    /// `start` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// A route path did not start with `/`.
    #[error("route `{0}` must start with '/'")]
    InvalidRoute(String),

    /// The listening address could not be resolved or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The address string did not resolve to any socket address.
    #[error("cannot resolve `{0}`")]
    Resolve(String),

    /// The bound socket refused to listen.
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    /// A worker could not create its readiness poller.
    #[error("failed to create poller: {0}")]
    Poll(#[source] io::Error),

    /// A worker or acceptor thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    /// Certificate or key files could not be read or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The TLS configuration was rejected.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}
