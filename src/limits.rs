//! Server configuration limits and timeouts
//!
//! # Memory Consumption
//!
//! Each open connection holds one receive buffer
//! ([`ConnLimits::recv_buffer_size`]) and one send buffer
//! ([`ConnLimits::send_buffer_size`]) for its whole lifetime, plus the
//! formatted response header block while it is being written.
//!
//! # Examples
//!
//! ```no_run
//! use wisp_http::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let mut server = Server::builder()
//!     .server_limits(ServerLimits {
//!         poll_timeout: Duration::from_millis(5),
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         inactivity_timeout: Duration::from_secs(30),
//!         recv_buffer_size: 16 * 1024, // longer request lines
//!         ..ConnLimits::default()
//!     })
//!     .build();
//!
//! server.start("127.0.0.1:8080", 4).unwrap();
//! ```

use std::time::Duration;

/// Controls the listening socket, dispatch and the worker loop.
///
/// # Connection management
/// ```text
///                     [------------------]
///                     [ Acceptor thread  ]
///                     [------------------]
///                              ||
///                              || round-robin
///                              \/
/// [-----------]   Yes   /--------------------\   No   [---------------------]
/// [ Close TCP ] <====== | Worker queue full? | =====> [ Push + wake worker ]
/// [-----------]         \--------------------/        [---------------------]
/// ```
///
/// Each worker owns its connections exclusively. New streams reach it
/// only through its hand-off queue.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Upper bound of one readiness wait (default: `10ms`).
    ///
    /// Stop requests and inactivity eviction are checked at least this often
    /// even when no socket is active.
    pub poll_timeout: Duration,

    /// Backlog passed to `listen` (default: `1024`).
    pub backlog: i32,

    /// Maximum number of accepted streams waiting in one worker's hand-off
    /// queue (default: `256`).
    ///
    /// When the chosen worker's queue is full the stream is closed
    /// immediately.
    pub max_pending_connections: usize,

    /// Sets `TCP_NODELAY` on accepted streams (default: `true`).
    pub nodelay: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            backlog: 1024,
            max_pending_connections: 256,
            nodelay: true,
        }
    }
}

/// Per-connection buffers and timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Idle time after which a connection is evicted (default: `5s`).
    ///
    /// Any successful read or write counts as activity. An evicted connection
    /// with an open exchange calls
    /// [`finish_request(false)`](crate::RequestHandler::finish_request).
    pub inactivity_timeout: Duration,

    /// Receive buffer capacity in bytes (default: `8192`).
    ///
    /// This is also the longest accepted request line or header line,
    /// terminator included.
    pub recv_buffer_size: usize,

    /// Capacity of the buffer handed to
    /// [`send_data`](crate::RequestHandler::send_data) (default: `8192`).
    pub send_buffer_size: usize,

    /// Maximum number of query parameters kept per request (default: `64`).
    ///
    /// New keys beyond the limit are ignored; repeated keys still update.
    pub max_query_params: usize,

    /// Maximum number of header lines per request (default: `32`).
    ///
    /// One more header line fails the request and closes the connection.
    pub max_headers: usize,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(5),
            recv_buffer_size: 8 * 1024,
            send_buffer_size: 8 * 1024,
            max_query_params: 64,
            max_headers: 32,
        }
    }
}
