use crate::{
    limits::ServerLimits,
    server::{
        connection::Connection,
        context::ServerContext,
        transport::{Stream, TlsStream},
    },
};
use crossbeam::queue::SegQueue;
use mio::{net::TcpStream, Events, Poll, Token, Waker};
use rustls::{ServerConfig, ServerConnection};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, error, trace, warn};

const WAKE: Token = Token(usize::MAX);

/// The side of a worker other threads may touch.
pub(crate) struct WorkerHandle {
    incoming: SegQueue<(TcpStream, SocketAddr)>,
    waker: Waker,
    close_all: AtomicBool,
}

impl WorkerHandle {
    /// Queues an accepted stream. `false` if the queue already holds `max`.
    pub(crate) fn hand_off(&self, stream: TcpStream, peer: SocketAddr, max: usize) -> bool {
        if self.incoming.len() >= max {
            return false;
        }

        self.incoming.push((stream, peer));
        self.wake();
        true
    }

    /// Asks the worker to drop every connection it owns.
    pub(crate) fn close_all(&self) {
        self.close_all.store(true, Ordering::Release);
        self.wake();
    }

    pub(crate) fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake worker");
        }
    }
}

/// One event loop thread and the connections it owns.
pub(crate) struct Worker {
    id: usize,
    poll: Poll,
    handle: Arc<WorkerHandle>,
    connections: HashMap<Token, Connection<Stream>>,
    next_token: usize,

    ctx: Arc<ServerContext>,
    tls: Option<Arc<ServerConfig>>,
    running: Arc<AtomicBool>,
    limits: ServerLimits,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<ServerContext>,
        tls: Option<Arc<ServerConfig>>,
        running: Arc<AtomicBool>,
        limits: ServerLimits,
    ) -> io::Result<(Self, Arc<WorkerHandle>)> {
        let poll = Poll::new()?;
        let handle = Arc::new(WorkerHandle {
            incoming: SegQueue::new(),
            waker: Waker::new(poll.registry(), WAKE)?,
            close_all: AtomicBool::new(false),
        });

        let worker = Self {
            id,
            poll,
            handle: handle.clone(),
            connections: HashMap::new(),
            next_token: 0,

            ctx,
            tls,
            running,
            limits,
        };
        Ok((worker, handle))
    }

    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(1024);
        debug!(worker = self.id, "worker started");

        while self.running.load(Ordering::Acquire) {
            if self.handle.close_all.swap(false, Ordering::AcqRel) {
                debug!(worker = self.id, open = self.connections.len(), "closing all connections");
                self.drop_all();
            }

            self.adopt();
            self.sweep();

            if let Err(err) = self.poll.poll(&mut events, Some(self.limits.poll_timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(worker = self.id, error = %err, "poll failed, shutting down");
                self.running.store(false, Ordering::Release);
                break;
            }

            for event in events.iter() {
                if event.token() != WAKE {
                    self.drive(event.token());
                }
            }
        }

        self.drop_all();
        debug!(worker = self.id, "worker stopped");
    }

    fn next_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = (self.next_token + 1) % WAKE.0;

            if !self.connections.contains_key(&token) {
                return token;
            }
        }
    }

    /// Takes over streams handed off by the acceptor.
    fn adopt(&mut self) {
        while let Some((sock, peer)) = self.handle.incoming.pop() {
            if self.limits.nodelay {
                if let Err(err) = sock.set_nodelay(true) {
                    trace!(worker = self.id, %peer, error = %err, "set_nodelay failed");
                }
            }

            let stream = match &self.tls {
                Some(config) => match ServerConnection::new(config.clone()) {
                    Ok(conn) => Stream::Tls(Box::new(TlsStream::new(conn, sock))),
                    Err(err) => {
                        warn!(worker = self.id, %peer, error = %err, "TLS session setup failed");
                        continue;
                    }
                },
                None => Stream::Plain(sock),
            };

            let token = self.next_token();
            let mut conn = Connection::new(stream, self.ctx.clone(), Some(peer));
            let interest = conn.interest();

            if let Err(err) = self
                .poll
                .registry()
                .register(conn.transport_mut(), token, interest)
            {
                warn!(worker = self.id, %peer, error = %err, "register failed");
                continue;
            }

            trace!(worker = self.id, %peer, ?token, "connection adopted");
            self.connections.insert(token, conn);
            self.drive(token);
        }
    }

    /// Drops connections flagged for removal or idle too long.
    fn sweep(&mut self) {
        let now = Instant::now();
        let timeout = self.ctx.limits.inactivity_timeout;
        let registry = self.poll.registry();
        let id = self.id;

        self.connections.retain(|_, conn| {
            if conn.should_remove() {
                // Dropped below
            } else if conn.is_idle(now, timeout) {
                debug!(worker = id, peer = ?conn.peer(), "inactivity timeout");
            } else {
                return true;
            }

            let _ = registry.deregister(conn.transport_mut());
            false
        });
    }

    fn drive(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let before = conn.interest();
        conn.on_ready();

        if conn.should_remove() {
            self.remove(token);
            return;
        }

        let after = conn.interest();
        if after != before {
            if let Err(err) = self
                .poll
                .registry()
                .reregister(conn.transport_mut(), token, after)
            {
                debug!(worker = self.id, peer = ?conn.peer(), error = %err, "reregister failed");
                self.remove(token);
            }
        }
    }

    fn remove(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(conn.transport_mut());
        }
    }

    fn drop_all(&mut self) {
        let registry = self.poll.registry();
        for (_, mut conn) in self.connections.drain() {
            let _ = registry.deregister(conn.transport_mut());
        }
    }
}
