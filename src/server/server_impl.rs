use crate::{
    errors::ServerError,
    handler::RequestHandler,
    limits::{ConnLimits, ServerLimits},
    server::{
        access_log::AccessLog,
        context::{default_not_found, Routes, ServerContext},
        transport::would_block,
        worker::{Worker, WorkerHandle},
    },
};
use arc_swap::ArcSwap;
use mio::{net::TcpListener, Events, Interest, Poll, Token};
use rustls::ServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    fs::File,
    io::{self, BufReader, Write},
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(0);

/// An embedded HTTP/1.x server: one acceptor thread feeding a fixed pool of
/// event-loop workers.
///
/// Routes and the not-found handler may be changed at any time, including
/// while the server runs. Limits, TLS and the access log are read by
/// [`start`](Self::start), so changes to them apply from the next start.
///
/// # Examples
///
/// ```no_run
/// use wisp_http::{Server, StaticHandler};
///
/// let mut server = Server::new();
/// server.bind_handler("/hello", StaticHandler::new("Hello, world!")).unwrap();
/// server.start("127.0.0.1:8080", 4).unwrap();
///
/// std::thread::park();
/// ```
pub struct Server {
    routes: Arc<ArcSwap<Routes>>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    access_log: Option<Arc<AccessLog>>,
    tls: Option<Arc<ServerConfig>>,

    running: Arc<AtomicBool>,
    workers: Vec<Arc<WorkerHandle>>,
    threads: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A stopped server with default limits, no routes, no TLS and no
    /// access log.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wisp_http::{Server, limits::ServerLimits};
    ///
    /// let server = Server::builder()
    ///     .server_limits(ServerLimits {
    ///         max_pending_connections: 1024,
    ///         ..ServerLimits::default()
    ///     })
    ///     .access_log(std::io::stdout())
    ///     .build();
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            server_limits: None,
            connection_limits: None,
            access_log: None,
            tls_config: None,
        }
    }

    /// Binds `handler` to `path`.
    ///
    /// A `*` segment matches any single segment when no literal segment
    /// does; the matched text is available through
    /// [`Exchange::wildcards`](crate::Exchange::wildcards). Binding the same
    /// path again replaces the previous handler.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidRoute`] if `path` does not start with `/`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wisp_http::{Server, StaticHandler};
    ///
    /// let server = Server::new();
    /// server.bind_handler("/users/*/avatar", StaticHandler::new("...")).unwrap();
    /// assert!(server.bind_handler("users", StaticHandler::new("...")).is_err());
    /// ```
    pub fn bind_handler<H: RequestHandler>(&self, path: &str, handler: H) -> Result<(), ServerError> {
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        let mut result = Ok(());

        self.routes.rcu(|current| {
            let mut next = Routes::clone(current);
            result = next.tree.bind(path, handler.clone());
            next
        });
        result
    }

    /// Replaces the handler used when no route matches. `None` restores the
    /// built-in 404 page.
    ///
    /// # Examples
    ///
    /// ```
    /// use wisp_http::{Server, StaticHandler, StatusCode};
    ///
    /// let server = Server::new();
    /// server.set_404_handler(Some(
    ///     StaticHandler::new("{\"error\":\"not found\"}")
    ///         .with_status(StatusCode::NotFound)
    ///         .with_content_type("application/json"),
    /// ));
    /// server.set_404_handler(None::<StaticHandler>);
    /// ```
    pub fn set_404_handler<H: RequestHandler>(&self, handler: Option<H>) {
        let handler: Arc<dyn RequestHandler> = match handler {
            Some(handler) => Arc::new(handler),
            None => default_not_found(),
        };

        self.routes.rcu(|current| Routes {
            tree: current.tree.clone(),
            not_found: handler.clone(),
        });
    }

    /// Serves TLS using a PEM certificate chain and a PEM private key.
    ///
    /// # Errors
    ///
    /// [`ServerError::Certificate`] if either file cannot be read or holds
    /// no usable entry, [`ServerError::Tls`] if rustls rejects the pair.
    pub fn enable_tls(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let certs = rustls_pemfile::certs(&mut open_pem(cert_path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| pem_error(cert_path, err))?;
        if certs.is_empty() {
            return Err(ServerError::Certificate(format!(
                "{}: no certificates found",
                cert_path.display()
            )));
        }

        let key = rustls_pemfile::private_key(&mut open_pem(key_path)?)
            .map_err(|err| pem_error(key_path, err))?
            .ok_or_else(|| {
                ServerError::Certificate(format!("{}: no private key found", key_path.display()))
            })?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        self.tls = Some(Arc::new(config));
        Ok(())
    }

    /// Serves TLS with a prepared rustls configuration.
    pub fn enable_tls_config(&mut self, config: Arc<ServerConfig>) {
        self.tls = Some(config);
    }

    /// Idle connections are closed after `timeout` without progress.
    pub fn set_inactivity_timeout(&mut self, timeout: Duration) {
        self.conn_limits.inactivity_timeout = timeout;
    }

    /// Writes one line per completed exchange to `sink`.
    pub fn set_access_log<W: Write + Send + 'static>(&mut self, sink: W) {
        self.access_log = Some(Arc::new(AccessLog::new(Box::new(sink))));
    }

    pub fn disable_access_log(&mut self) {
        self.access_log = None;
    }

    /// Address the server is listening on, while running.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `false` once stopped, or once a worker or the acceptor gave up on a
    /// poll failure and took the server down with it.
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.threads.is_empty() && self.running.load(Ordering::Acquire)
    }

    /// Binds `address` and starts `workers` event-loop threads plus one
    /// acceptor thread. Returns once every thread is running.
    ///
    /// # Errors
    ///
    /// Zero workers, a second start, and any socket, poller or thread
    /// failure. Whatever was started before the failure is stopped again.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wisp_http::Server;
    ///
    /// let mut server = Server::new();
    /// server.start("0.0.0.0:8080", 8).unwrap();
    /// // ...
    /// server.stop(true);
    /// ```
    pub fn start(&mut self, address: impl ToSocketAddrs, workers: usize) -> Result<(), ServerError> {
        if workers == 0 {
            return Err(ServerError::InvalidWorkerCount);
        }
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        // Reap threads of a server that went down on its own
        self.stop(false);

        let addr = address
            .to_socket_addrs()
            .map_err(|err| ServerError::Resolve(err.to_string()))?
            .next()
            .ok_or_else(|| ServerError::Resolve("no addresses".to_string()))?;

        let mut listener = listen(addr, self.server_limits.backlog)?;
        let local_addr = listener.local_addr().map_err(ServerError::Listen)?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        let ctx = Arc::new(ServerContext {
            routes: self.routes.clone(),
            access_log: self.access_log.clone(),
            limits: self.conn_limits.clone(),
        });

        self.running.store(true, Ordering::Release);
        if let Err(err) = self.spawn(listener, poll, ctx, workers) {
            self.stop(false);
            return Err(err);
        }

        self.local_addr = Some(local_addr);
        info!(
            addr = %local_addr,
            workers,
            tls = self.tls.is_some(),
            "server started"
        );
        Ok(())
    }

    fn spawn(
        &mut self,
        listener: TcpListener,
        poll: Poll,
        ctx: Arc<ServerContext>,
        workers: usize,
    ) -> Result<(), ServerError> {
        for id in 0..workers {
            let (worker, handle) = Worker::new(
                id,
                ctx.clone(),
                self.tls.clone(),
                self.running.clone(),
                self.server_limits.clone(),
            )
            .map_err(ServerError::Poll)?;

            let thread = thread::Builder::new()
                .name(format!("http-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(ServerError::Spawn)?;

            self.workers.push(handle);
            self.threads.push(thread);
        }

        let acceptor = Acceptor {
            listener,
            poll,
            workers: self.workers.clone(),
            running: self.running.clone(),
            limits: self.server_limits.clone(),
        };
        let thread = thread::Builder::new()
            .name("http-acceptor".to_string())
            .spawn(move || acceptor.run())
            .map_err(ServerError::Spawn)?;

        self.threads.push(thread);
        Ok(())
    }

    /// Stops accepting, stops every worker and waits for all threads.
    ///
    /// With `graceful`, workers drop their open connections before the
    /// loop exits; either way every open exchange ends with
    /// `finish_request(false)`. Does nothing if the server is not running.
    pub fn stop(&mut self, graceful: bool) {
        if self.threads.is_empty() {
            self.running.store(false, Ordering::Release);
            return;
        }

        if graceful {
            for worker in &self.workers {
                worker.close_all();
            }
        }

        self.running.store(false, Ordering::Release);
        for worker in &self.workers {
            worker.wake();
        }

        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("server thread panicked");
            }
        }

        self.workers.clear();
        if let Some(addr) = self.local_addr.take() {
            info!(addr = %addr, "server stopped");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| pem_error(path, err))
}

fn pem_error(path: &Path, err: io::Error) -> ServerError {
    ServerError::Certificate(format!("{}: {err}", path.display()))
}

/// Non-blocking listening socket with address reuse.
fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let bind_error = |source| ServerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(backlog).map_err(ServerError::Listen)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Accepts connections and deals them out to workers in turn.
struct Acceptor {
    listener: TcpListener,
    poll: Poll,
    workers: Vec<Arc<WorkerHandle>>,
    running: Arc<AtomicBool>,
    limits: ServerLimits,
}

impl Acceptor {
    fn run(mut self) {
        let mut events = Events::with_capacity(64);
        // Only this thread advances the counter
        let mut next = 0usize;

        while self.running.load(Ordering::Acquire) {
            if let Err(err) = self.poll.poll(&mut events, Some(self.limits.poll_timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "acceptor poll failed, shutting down");
                self.running.store(false, Ordering::Release);
                break;
            }

            // Tried every tick so a failed accept is retried without a new event
            loop {
                match self.listener.accept() {
                    Ok((stream, peer)) => {
                        let worker = &self.workers[next % self.workers.len()];
                        next = next.wrapping_add(1);

                        if !worker.hand_off(stream, peer, self.limits.max_pending_connections) {
                            warn!(%peer, "worker queue full, dropping connection");
                        }
                    }
                    Err(err) if would_block(&err) => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        break;
                    }
                }
            }
        }

        debug!("acceptor stopped");
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    access_log: Option<Box<dyn Write + Send>>,
    tls_config: Option<Arc<ServerConfig>>,
}

impl ServerBuilder {
    /// Configures the listening socket, dispatch and the worker loop.
    ///
    /// # Examples
    ///
    /// ```
    /// use wisp_http::{Server, limits::ServerLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .server_limits(ServerLimits {
    ///         poll_timeout: Duration::from_millis(50),
    ///         nodelay: false,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection buffers and timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Writes one line per completed exchange to `sink`.
    #[inline(always)]
    pub fn access_log<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.access_log = Some(Box::new(sink));
        self
    }

    /// Serves TLS with a prepared rustls configuration.
    #[inline(always)]
    pub fn tls_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Creates the server. Nothing is bound until [`Server::start`].
    pub fn build(self) -> Server {
        Server {
            routes: Arc::new(ArcSwap::from_pointee(Routes::new())),
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
            access_log: self.access_log.map(|sink| Arc::new(AccessLog::new(sink))),
            tls: self.tls_config,

            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            threads: Vec::new(),
            local_addr: None,
        }
    }
}
