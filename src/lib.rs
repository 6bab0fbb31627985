//! wisp_http - Embedded multi-worker HTTP/1.x server
//!
//! A small HTTP/1.0 and HTTP/1.1 server meant to be embedded in a larger
//! program. Requests are routed by path to handlers which receive the body
//! as it arrives and produce the response body on demand, so neither side
//! has to be held in memory.
//!
//! # Model
//!
//! - **One exchange per connection** - the connection closes after the
//!   response (TLS connections send `close_notify` first)
//! - **Readiness-driven workers** - a fixed pool of threads, each running a
//!   [`mio`] event loop over the connections it owns; no async runtime
//! - **Dedicated acceptor** - accepted sockets are dealt out round-robin
//! - **Pull-model handlers** - see [`RequestHandler`]
//! - **Route tree** - literal segments plus a `*` wildcard per level, with
//!   a replaceable not-found handler
//! - **Optional TLS** via [`rustls`] and an optional access log
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use wisp_http::{Server, StaticHandler};
//!
//! let mut server = Server::new();
//! server.bind_handler("/", StaticHandler::new("Hello World!")).unwrap();
//! server.start("127.0.0.1:8080", 4).unwrap();
//!
//! std::thread::park();
//! ```
//! A handler that streams its own body:
//! ```no_run
//! use wisp_http::{Exchange, RequestHandler, Server, StatusCode};
//!
//! struct Countdown;
//!
//! impl RequestHandler for Countdown {
//!     fn process_request(&self, ex: &mut Exchange) {
//!         let from: u8 = ex.wildcard(0).and_then(|n| n.parse().ok()).unwrap_or(3);
//!
//!         ex.set_status(StatusCode::Ok);
//!         ex.set_response_header("Content-Type", "text/plain");
//!         ex.set_response_length(u64::from(from) * 2);
//!         ex.set_userdata(from);
//!     }
//!
//!     fn send_data(&self, ex: &mut Exchange, dst: &mut [u8]) -> usize {
//!         let Some(left) = ex.userdata_mut::<u8>() else { return 0 };
//!         let mut n = 0;
//!         while *left > 0 && n + 2 <= dst.len() {
//!             dst[n] = b'0' + (*left % 10);
//!             dst[n + 1] = b'\n';
//!             *left -= 1;
//!             n += 2;
//!         }
//!         n
//!     }
//! }
//!
//! let mut server = Server::new();
//! server.bind_handler("/countdown/*", Countdown).unwrap();
//! server.start("127.0.0.1:8080", 2).unwrap();
//!
//! std::thread::park();
//! ```
//! Advanced configuration:
//! ```no_run
//! use wisp_http::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let mut server = Server::builder()
//!     .server_limits(ServerLimits {
//!         max_pending_connections: 4096, // Deeper hand-off queues
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         inactivity_timeout: Duration::from_secs(30),
//!         max_query_params: 16,
//!         ..ConnLimits::default()
//!     })
//!     .access_log(std::io::stdout())
//!     .build();
//!
//! server.enable_tls("cert.pem", "key.pem").unwrap();
//! server.start("0.0.0.0:8443", 8).unwrap();
//! ```

pub(crate) mod http {
    pub mod encoding;
    pub(crate) mod exchange;
    pub(crate) mod parser;
    pub mod query;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod access_log;
    pub(crate) mod connection;
    pub(crate) mod context;
    pub(crate) mod server_impl;
    pub(crate) mod transport;
    pub(crate) mod worker;
}
pub(crate) mod errors;
pub(crate) mod handler;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    errors::ServerError,
    handler::{BufferedHandler, RequestHandler, StaticHandler},
    http::{
        encoding,
        exchange::Exchange,
        query,
        types::{HeaderMap, Method, StatusCode, Version},
    },
    server::server_impl::{Server, ServerBuilder},
};
