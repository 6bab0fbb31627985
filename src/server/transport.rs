//! Byte streams under a connection: plain TCP or TLS over TCP.

use mio::{event::Source, net::TcpStream, Interest, Registry, Token};
use rustls::ServerConnection;
use std::io::{self, Read, Write};

/// Direction a transport needs before it can make progress on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wanted {
    Read,
    Write,
    /// No transport-level preference; the connection phase decides.
    Nothing,
}

/// Outcome of a resumable handshake or shutdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    Pending,
}

/// Non-blocking byte stream driven by a connection.
///
/// `read` and `write` return `WouldBlock` instead of waiting. `Ok(0)` from
/// `read` means the peer closed the stream.
pub(crate) trait Transport: Read + Write {
    /// Whether the stream runs a handshake before and a close sequence after
    /// the exchange.
    fn is_secure(&self) -> bool;

    fn wanted(&self) -> Wanted;

    /// Advances the opening handshake.
    fn handshake(&mut self) -> io::Result<Step>;

    /// Advances the closing sequence.
    fn shutdown(&mut self) -> io::Result<Step>;
}

#[inline]
pub(crate) fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// An accepted socket as owned by a worker.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    fn tcp(&mut self) -> &mut TcpStream {
        match self {
            Stream::Plain(sock) => sock,
            Stream::Tls(tls) => &mut tls.sock,
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(sock) => sock.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(sock) => sock.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(sock) => sock.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

impl Transport for Stream {
    fn is_secure(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    fn wanted(&self) -> Wanted {
        match self {
            Stream::Plain(_) => Wanted::Nothing,
            Stream::Tls(tls) => tls.wanted(),
        }
    }

    fn handshake(&mut self) -> io::Result<Step> {
        match self {
            Stream::Plain(_) => Ok(Step::Done),
            Stream::Tls(tls) => tls.handshake(),
        }
    }

    fn shutdown(&mut self) -> io::Result<Step> {
        match self {
            Stream::Plain(_) => Ok(Step::Done),
            Stream::Tls(tls) => tls.shutdown(),
        }
    }
}

impl Source for Stream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.tcp().register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.tcp().reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.tcp().deregister(registry)
    }
}

// TLS

/// rustls server session over a non-blocking TCP stream.
pub(crate) struct TlsStream {
    conn: ServerConnection,
    sock: TcpStream,
    closing: bool,
}

fn tls_error(err: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl TlsStream {
    pub(crate) fn new(conn: ServerConnection, sock: TcpStream) -> Self {
        Self {
            conn,
            sock,
            closing: false,
        }
    }

    fn wanted(&self) -> Wanted {
        if self.conn.wants_write() {
            Wanted::Write
        } else if self.conn.is_handshaking() {
            Wanted::Read
        } else {
            Wanted::Nothing
        }
    }

    /// Writes queued TLS records until none are left or the socket blocks.
    fn flush_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut self.sock)? == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        Ok(())
    }

    /// Pulls TLS records from the socket. `Ok(false)` on end of stream.
    fn fill_tls(&mut self) -> io::Result<bool> {
        if self.conn.read_tls(&mut self.sock)? == 0 {
            return Ok(false);
        }

        if let Err(err) = self.conn.process_new_packets() {
            // Best effort to deliver the alert rustls queued for the peer
            let _ = self.flush_tls();
            return Err(tls_error(err));
        }
        Ok(true)
    }

    fn handshake(&mut self) -> io::Result<Step> {
        loop {
            match self.flush_tls() {
                Ok(()) => {}
                Err(err) if would_block(&err) => return Ok(Step::Pending),
                Err(err) => return Err(err),
            }

            if !self.conn.is_handshaking() {
                return Ok(Step::Done);
            }

            match self.fill_tls() {
                Ok(true) => {}
                Ok(false) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Err(err) if would_block(&err) => return Ok(Step::Pending),
                Err(err) => return Err(err),
            }
        }
    }

    fn shutdown(&mut self) -> io::Result<Step> {
        if !self.closing {
            self.conn.send_close_notify();
            self.closing = true;
        }

        match self.flush_tls() {
            Ok(()) => Ok(Step::Done),
            Err(err) if would_block(&err) => Ok(Step::Pending),
            Err(err) => Err(err),
        }
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if would_block(&err) => {}
                Err(err) => return Err(err),
            }

            // Pending handshake or key-update records go out before reading
            self.flush_tls()?;
            if !self.fill_tls()? {
                return Ok(0);
            }
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Refuse more plaintext until earlier records reached the socket
        self.flush_tls()?;

        let n = self.conn.writer().write(buf)?;
        match self.flush_tls() {
            Err(err) if !would_block(&err) => Err(err),
            _ => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_tls()
    }
}
