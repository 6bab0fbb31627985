use crate::{
    errors::ErrorKind,
    handler::RequestHandler,
    http::{
        exchange::Exchange,
        parser::{as_utf8, find_crlf, parse_header_line, parse_request_line},
        query::{self, Query},
        types::slice_to_usize,
    },
    server::{
        context::ServerContext,
        transport::{would_block, Step, Transport, Wanted},
    },
};
use mio::Interest;
use std::{
    io,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Handshake,
    Read(ReadPhase),
    Write,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPhase {
    QueryLine,
    Headers,
    Content,
}

/// What `on_ready` should do after one step.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Wait,
    Close,
}

/// One accepted stream and its in-progress exchange.
///
/// The connection is driven by readiness notifications and never blocks:
/// each call to [`on_ready`](Self::on_ready) advances the state machine until
/// the transport would block or the connection is finished.
pub(crate) struct Connection<T: Transport> {
    transport: T,
    ctx: Arc<ServerContext>,
    peer: Option<SocketAddr>,
    phase: Phase,

    recv: Box<[u8]>,
    filled: usize,
    request_line: String,
    header_lines: usize,

    exchange: Option<Exchange>,
    handler: Option<Arc<dyn RequestHandler>>,
    // Request body bytes still expected, then response body bytes still owed
    remaining: u64,

    head: Vec<u8>,
    head_pos: usize,
    send: Box<[u8]>,
    send_pos: usize,
    send_len: usize,

    last_activity: Instant,
    should_remove: bool,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, ctx: Arc<ServerContext>, peer: Option<SocketAddr>) -> Self {
        let (phase, exchange) = match transport.is_secure() {
            true => (Phase::Handshake, None),
            false => (Phase::Read(ReadPhase::QueryLine), Some(Exchange::new(peer))),
        };

        Self {
            transport,
            peer,
            phase,

            recv: vec![0; ctx.limits.recv_buffer_size.max(1)].into_boxed_slice(),
            filled: 0,
            request_line: String::new(),
            header_lines: 0,

            exchange,
            handler: None,
            remaining: 0,

            head: Vec::new(),
            head_pos: 0,
            send: vec![0; ctx.limits.send_buffer_size.max(1)].into_boxed_slice(),
            send_pos: 0,
            send_len: 0,

            last_activity: Instant::now(),
            should_remove: false,
            ctx,
        }
    }

    #[inline]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[inline]
    pub(crate) fn should_remove(&self) -> bool {
        self.should_remove
    }

    #[inline]
    pub(crate) fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    #[inline]
    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Readiness the connection is waiting for. The transport's own need
    /// takes precedence over the phase.
    pub(crate) fn interest(&self) -> Interest {
        match self.transport.wanted() {
            Wanted::Read => Interest::READABLE,
            Wanted::Write => Interest::WRITABLE,
            Wanted::Nothing => match self.phase {
                Phase::Handshake | Phase::Read(_) => Interest::READABLE,
                Phase::Write | Phase::Shutdown => Interest::WRITABLE,
            },
        }
    }

    /// Advances the state machine as far as the transport allows.
    pub(crate) fn on_ready(&mut self) {
        while !self.should_remove {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Wait) => break,
                Ok(Flow::Close) => {
                    trace!(peer = ?self.peer, "connection finished");
                    self.should_remove = true;
                }
                Err(err) => {
                    debug!(peer = ?self.peer, phase = ?self.phase, error = %err, "dropping connection");
                    self.should_remove = true;
                }
            }
        }
    }

    fn step(&mut self) -> Result<Flow, ErrorKind> {
        match self.phase {
            Phase::Handshake => self.handshake(),
            Phase::Read(ReadPhase::QueryLine | ReadPhase::Headers) => self.read_line(),
            Phase::Read(ReadPhase::Content) => self.read_content(),
            Phase::Write => self.write_response(),
            Phase::Shutdown => match self.transport.shutdown() {
                Ok(Step::Done) => Ok(Flow::Close),
                Ok(Step::Pending) => Ok(Flow::Wait),
                Err(err) => Err(ErrorKind::Shutdown(err.to_string())),
            },
        }
    }

    #[inline]
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn handshake(&mut self) -> Result<Flow, ErrorKind> {
        match self.transport.handshake() {
            Ok(Step::Done) => {
                trace!(peer = ?self.peer, "handshake complete");
                self.touch();
                self.exchange = Some(Exchange::new(self.peer));
                self.phase = Phase::Read(ReadPhase::QueryLine);
                Ok(Flow::Continue)
            }
            Ok(Step::Pending) => Ok(Flow::Wait),
            Err(err) => Err(ErrorKind::Handshake(err.to_string())),
        }
    }
}

// READ
impl<T: Transport> Connection<T> {
    /// Reads once into the free tail of the receive buffer.
    fn fill(&mut self) -> Result<Flow, ErrorKind> {
        match self.transport.read(&mut self.recv[self.filled..]) {
            Ok(0) => Err(ErrorKind::Closed),
            Ok(n) => {
                self.filled += n;
                self.touch();
                Ok(Flow::Continue)
            }
            Err(err) if would_block(&err) => Ok(Flow::Wait),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Flow::Continue),
            Err(err) => Err(err.into()),
        }
    }

    fn consume(&mut self, n: usize) {
        self.recv.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    fn read_line(&mut self) -> Result<Flow, ErrorKind> {
        let Some(end) = find_crlf(&self.recv[..self.filled]) else {
            if self.filled == self.recv.len() {
                return Err(ErrorKind::LineTooLong);
            }
            return self.fill();
        };

        let headers_done = match self.phase {
            Phase::Read(ReadPhase::QueryLine) => {
                self.on_request_line(end)?;
                false
            }
            _ if end == 0 => true,
            _ => {
                self.on_header_line(end)?;
                false
            }
        };

        self.consume(end + 2);
        if headers_done {
            self.on_headers_received()?;
        }
        Ok(Flow::Continue)
    }

    fn on_request_line(&mut self, end: usize) -> Result<(), ErrorKind> {
        let line = &self.recv[..end];
        let parsed = parse_request_line(line)?;

        self.request_line.clear();
        self.request_line.push_str(as_utf8(line)?);
        trace!(peer = ?self.peer, line = %self.request_line, "request line");

        let peer = self.peer;
        let ex = self.exchange.get_or_insert_with(|| Exchange::new(peer));
        ex.method = parsed.method;
        ex.version = parsed.version;
        ex.path = parsed.path;

        self.phase = Phase::Read(ReadPhase::Headers);
        Ok(())
    }

    fn on_header_line(&mut self, end: usize) -> Result<(), ErrorKind> {
        self.header_lines += 1;
        if self.header_lines > self.ctx.limits.max_headers {
            return Err(ErrorKind::TooManyHeaders);
        }

        let (name, value) = parse_header_line(&self.recv[..end])?;

        if let Some(ex) = self.exchange.as_mut() {
            ex.request_headers.insert(name, value);
        }
        Ok(())
    }

    fn on_headers_received(&mut self) -> Result<(), ErrorKind> {
        let Some(ex) = self.exchange.as_mut() else {
            return Err(ErrorKind::RequestLineMalformed);
        };

        if let Some(at) = ex.path.find('?') {
            let query = ex.path.split_off(at);
            match Query::parse_into(&mut ex.query, &query, self.ctx.limits.max_query_params) {
                Ok(()) | Err(query::Error::Empty) => {}
                Err(err) => trace!(peer = ?self.peer, error = %err, "query truncated"),
            }
        }

        let (handler, wildcards) = self.ctx.routes.load().resolve(&ex.path);
        ex.wildcards = wildcards;

        let length = match ex.request_headers.get("Content-Length") {
            Some(value) => slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?,
            None => 0,
        } as u64;
        ex.request_length = length;

        handler.begin_request(ex);
        self.remaining = length;
        self.phase = Phase::Read(ReadPhase::Content);

        // Body bytes that arrived with the headers
        let early = (self.filled as u64).min(length) as usize;
        if early > 0 {
            handler.receive_data(ex, &self.recv[..early]);
            self.remaining -= early as u64;
        }
        // Anything past the declared body belongs to no exchange
        self.filled = 0;

        self.handler = Some(handler);
        Ok(())
    }

    fn read_content(&mut self) -> Result<Flow, ErrorKind> {
        if self.remaining == 0 {
            self.start_response();
            return Ok(Flow::Continue);
        }

        let (Some(ex), Some(handler)) = (self.exchange.as_mut(), self.handler.as_ref()) else {
            return Err(ErrorKind::RequestLineMalformed);
        };

        let cap = (self.recv.len() as u64).min(self.remaining) as usize;
        match self.transport.read(&mut self.recv[..cap]) {
            Ok(0) => Err(ErrorKind::Closed),
            Ok(n) => {
                handler.receive_data(ex, &self.recv[..n]);
                self.remaining -= n as u64;
                self.touch();
                Ok(Flow::Continue)
            }
            Err(err) if would_block(&err) => Ok(Flow::Wait),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Flow::Continue),
            Err(err) => Err(err.into()),
        }
    }
}

// WRITE
impl<T: Transport> Connection<T> {
    fn start_response(&mut self) {
        let (Some(ex), Some(handler)) = (self.exchange.as_mut(), self.handler.as_ref()) else {
            return;
        };

        let started = Instant::now();
        handler.process_request(ex);
        let took = started.elapsed();

        if let Some(log) = &self.ctx.access_log {
            log.record(
                self.peer,
                &self.request_line,
                ex.response_code(),
                ex.response_length(),
                took,
            );
        }

        self.head.clear();
        ex.write_head(&mut self.head);
        self.head_pos = 0;
        self.send_pos = 0;
        self.send_len = 0;
        self.remaining = ex.response_length();
        self.phase = Phase::Write;
    }

    /// Writes `buf[*pos..]` once.
    fn write_from(transport: &mut T, buf: &[u8], pos: &mut usize) -> Result<Flow, ErrorKind> {
        match transport.write(&buf[*pos..]) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                *pos += n;
                Ok(Flow::Continue)
            }
            Err(err) if would_block(&err) => Ok(Flow::Wait),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Flow::Continue),
            Err(err) => Err(err.into()),
        }
    }

    fn write_response(&mut self) -> Result<Flow, ErrorKind> {
        if self.head_pos < self.head.len() {
            let flow = Self::write_from(&mut self.transport, &self.head, &mut self.head_pos)?;
            if flow == Flow::Continue {
                self.touch();
            }
            return Ok(flow);
        }

        if self.send_pos < self.send_len {
            let flow = Self::write_from(
                &mut self.transport,
                &self.send[..self.send_len],
                &mut self.send_pos,
            )?;
            if flow == Flow::Continue {
                self.touch();
            }
            return Ok(flow);
        }

        if self.remaining == 0 {
            return Ok(self.finish());
        }

        let (Some(ex), Some(handler)) = (self.exchange.as_mut(), self.handler.as_ref()) else {
            return Err(ErrorKind::BodyUnderrun(self.remaining as usize));
        };

        let cap = (self.send.len() as u64).min(self.remaining) as usize;
        let n = handler.send_data(ex, &mut self.send[..cap]).min(cap);
        if n == 0 {
            return Err(ErrorKind::BodyUnderrun(self.remaining as usize));
        }

        self.send_pos = 0;
        self.send_len = n;
        self.remaining -= n as u64;
        Ok(Flow::Continue)
    }

    fn finish(&mut self) -> Flow {
        if let (Some(mut ex), Some(handler)) = (self.exchange.take(), self.handler.take()) {
            handler.finish_request(&mut ex, true);
        }

        match self.transport.is_secure() {
            true => {
                self.phase = Phase::Shutdown;
                Flow::Continue
            }
            false => Flow::Close,
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if let (Some(ex), Some(handler)) = (self.exchange.as_mut(), self.handler.take()) {
            handler.finish_request(ex, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{BufferedHandler, StaticHandler},
        limits::ConnLimits,
        server::context::Routes,
        tools::str_op,
    };
    use arc_swap::ArcSwap;
    use std::{
        collections::VecDeque,
        io::{Read, Write},
        sync::Mutex,
    };

    pub(crate) enum Chunk {
        Data(&'static [u8]),
        Block,
    }

    /// In-memory transport replaying scripted reads.
    #[derive(Default)]
    pub(crate) struct Script {
        input: VecDeque<Chunk>,
        output: Vec<u8>,
        write_limit: Option<usize>,
        eof: bool,
    }

    impl Script {
        pub(crate) fn new(chunks: impl IntoIterator<Item = Chunk>) -> Self {
            Self {
                input: chunks.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(Chunk::Data(data)) => {
                    let n = buf.len().min(data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.input.push_front(Chunk::Data(&data[n..]));
                    }
                    Ok(n)
                }
                Some(Chunk::Block) => Err(io::ErrorKind::WouldBlock.into()),
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Script {
        fn is_secure(&self) -> bool {
            false
        }

        fn wanted(&self) -> Wanted {
            Wanted::Nothing
        }

        fn handshake(&mut self) -> io::Result<Step> {
            Ok(Step::Done)
        }

        fn shutdown(&mut self) -> io::Result<Step> {
            Ok(Step::Done)
        }
    }

    /// Records every callback it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RequestHandler for Recorder {
        fn begin_request(&self, ex: &mut Exchange) {
            self.log(format!("begin {} {:?}", ex.path(), ex.wildcards()));
        }

        fn receive_data(&self, _: &mut Exchange, data: &[u8]) {
            self.log(format!("data {}", str_op(data)));
        }

        fn process_request(&self, ex: &mut Exchange) {
            self.log("process".to_string());
            ex.set_response(204, "");
        }

        fn send_data(&self, _: &mut Exchange, _: &mut [u8]) -> usize {
            0
        }

        fn finish_request(&self, _: &mut Exchange, success: bool) {
            self.log(format!("finish {success}"));
        }
    }

    pub(crate) fn context(routes: Routes, limits: ConnLimits) -> Arc<ServerContext> {
        Arc::new(ServerContext {
            routes: Arc::new(ArcSwap::from_pointee(routes)),
            access_log: None,
            limits,
        })
    }

    fn routes(path: &str, handler: Arc<dyn RequestHandler>) -> Routes {
        let mut routes = Routes::new();
        routes.tree.bind(path, handler).unwrap();
        routes
    }

    fn connect(script: Script, routes: Routes) -> Connection<Script> {
        Connection::new(script, context(routes, ConnLimits::default()), None)
    }

    fn output(conn: &Connection<Script>) -> &str {
        str_op(&conn.transport.output)
    }

    #[test]
    fn static_response() {
        let script = Script::new([Chunk::Data(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")]);
        let hello: Arc<dyn RequestHandler> = Arc::new(StaticHandler::new("hi"));
        let mut conn = connect(script, routes("/hello", hello));

        conn.on_ready();

        assert!(conn.should_remove());
        assert_eq!(
            output(&conn),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\n\r\nhi"
        );
    }

    #[test]
    fn missing_route_uses_not_found() {
        let script = Script::new([Chunk::Data(b"GET /missing HTTP/1.1\r\n\r\n")]);
        let mut conn = connect(script, Routes::new());

        conn.on_ready();

        let out = output(&conn);
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.ends_with("<h1>404 Not Found</h1></body></html>"));
    }

    #[test]
    fn body_split_across_reads() {
        let recorder = Arc::new(Recorder::default());
        let script = Script::new([
            Chunk::Data(b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel"),
            Chunk::Block,
            Chunk::Data(b"lo"),
        ]);
        let mut conn = connect(script, routes("/echo", recorder.clone()));

        conn.on_ready();
        assert_eq!(conn.interest(), Interest::READABLE);
        assert_eq!(recorder.calls(), ["begin /echo []", "data hel"]);

        conn.on_ready();
        assert_eq!(
            recorder.calls(),
            ["begin /echo []", "data hel", "data lo", "process", "finish true"]
        );
        assert!(output(&conn).starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(conn.should_remove());
    }

    #[test]
    fn body_delivered_in_small_reads() {
        let recorder = Arc::new(Recorder::default());
        let script = Script::new([
            Chunk::Data(b"PUT /x HTTP/1.1\r\ncontent-length: 4\r\n\r\n"),
            Chunk::Data(b"ab"),
            Chunk::Data(b"cdEXTRA"),
        ]);
        let mut conn = connect(script, routes("/x", recorder.clone()));

        conn.on_ready();

        // Reads are capped at the declared length
        assert_eq!(
            recorder.calls(),
            ["begin /x []", "data ab", "data cd", "process", "finish true"]
        );
    }

    #[test]
    fn bytes_past_declared_length_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let script = Script::new([Chunk::Data(
            b"POST /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n\r\n",
        )]);
        let mut conn = connect(script, routes("/x", recorder.clone()));

        conn.on_ready();

        assert_eq!(
            recorder.calls(),
            ["begin /x []", "data ok", "process", "finish true"]
        );
    }

    #[test]
    fn request_split_mid_line() {
        let hello: Arc<dyn RequestHandler> = Arc::new(StaticHandler::new("hi"));
        let script = Script::new([
            Chunk::Data(b"GET /he"),
            Chunk::Block,
            Chunk::Data(b"llo HTTP/1.1\r\nHo"),
            Chunk::Block,
            Chunk::Data(b"st: x\r\n\r\n"),
        ]);
        let mut conn = connect(script, routes("/hello", hello));

        conn.on_ready();
        assert_eq!(conn.phase, Phase::Read(ReadPhase::QueryLine));
        conn.on_ready();
        assert_eq!(conn.phase, Phase::Read(ReadPhase::Headers));
        conn.on_ready();

        assert!(output(&conn).ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn query_wildcards_and_headers() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let handler: Arc<dyn RequestHandler> = Arc::new(BufferedHandler::new(move |ex: &mut Exchange, _: &[u8]| {
            *sink.lock().unwrap() = Some((
                ex.path().to_string(),
                ex.wildcards().to_vec(),
                ex.query_param("name").map(String::from),
                ex.query_param("flag").map(String::from),
                ex.request_header("x-token").map(String::from),
            ));
            Vec::new()
        }));
        let script = Script::new([Chunk::Data(
            b"GET /form/login/echo?name=a%20b&flag HTTP/1.1\r\nX-Token: 1\r\nx-token: 2\r\n\r\n",
        )]);
        let mut conn = connect(script, routes("/form/*/echo", handler));

        conn.on_ready();

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some((
                "/form/login/echo".to_string(),
                vec!["login".to_string()],
                Some("a b".to_string()),
                Some("flag".to_string()),
                Some("2".to_string()),
            ))
        );
        assert!(output(&conn).starts_with("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n"));
    }

    #[test]
    fn partial_writes_resume_on_writable() {
        let big: Arc<dyn RequestHandler> = Arc::new(StaticHandler::new(vec![b'z'; 20_000]));
        let mut script = Script::new([Chunk::Data(b"GET /big HTTP/1.1\r\n\r\n")]);
        script.write_limit = Some(1000);
        let mut conn = connect(script, routes("/big", big));

        conn.on_ready();

        let out = output(&conn);
        let body = out.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(body.len(), 20_000);
        assert!(out.contains("Content-Length: 20000\r\n"));
    }

    #[test]
    fn write_blocks_then_resumes() {
        struct Flaky {
            script: Script,
            blocked: bool,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.script.read(buf)
            }
        }
        impl Write for Flaky {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.blocked {
                    return Err(io::ErrorKind::WouldBlock.into());
                }
                self.script.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        impl Transport for Flaky {
            fn is_secure(&self) -> bool {
                false
            }
            fn wanted(&self) -> Wanted {
                Wanted::Nothing
            }
            fn handshake(&mut self) -> io::Result<Step> {
                Ok(Step::Done)
            }
            fn shutdown(&mut self) -> io::Result<Step> {
                Ok(Step::Done)
            }
        }

        let hello: Arc<dyn RequestHandler> = Arc::new(StaticHandler::new("hi"));
        let flaky = Flaky {
            script: Script::new([Chunk::Data(b"GET /hello HTTP/1.1\r\n\r\n")]),
            blocked: true,
        };
        let mut conn = Connection::new(
            flaky,
            context(routes("/hello", hello), ConnLimits::default()),
            None,
        );

        conn.on_ready();
        assert_eq!(conn.phase, Phase::Write);
        assert_eq!(conn.interest(), Interest::WRITABLE);
        assert!(!conn.should_remove());

        conn.transport.blocked = false;
        conn.on_ready();
        assert!(conn.should_remove());
        assert!(str_op(&conn.transport.script.output).ends_with("hi"));
    }

    #[test]
    fn protocol_errors_remove_connection() {
        #[rustfmt::skip]
        let cases: [&'static [u8]; 5] = [
            b"GET /x HTTP/2.0\r\n\r\n",
            b"PATCH /x HTTP/1.1\r\n\r\n",
            b"GET x HTTP/1.1\r\n\r\n",
            b"GET /x HTTP/1.1\r\nBad Header\r\n\r\n",
            b"GET /x HTTP/1.1\r\nContent-Length: ten\r\n\r\n",
        ];

        for request in cases {
            let mut conn = connect(Script::new([Chunk::Data(request)]), Routes::new());
            conn.on_ready();

            assert!(conn.should_remove(), "{}", str_op(request));
            assert!(conn.transport.output.is_empty());
        }
    }

    #[test]
    fn line_at_buffer_capacity_fails() {
        let limits = ConnLimits {
            recv_buffer_size: 16,
            ..ConnLimits::default()
        };
        let script = Script::new([Chunk::Data(b"GET /0123456789a"), Chunk::Data(b"\r\n")]);
        let mut conn = Connection::new(script, context(Routes::new(), limits), None);

        conn.on_ready();

        assert!(conn.should_remove());
        assert!(conn.transport.output.is_empty());
        // The terminator was never read
        assert_eq!(conn.transport.input.len(), 1);
    }

    #[test]
    fn line_filling_buffer_with_terminator_fits() {
        let limits = ConnLimits {
            recv_buffer_size: 16,
            ..ConnLimits::default()
        };
        let script = Script::new([Chunk::Data(b"GET / HTTP/1.1\r\n"), Chunk::Data(b"\r\n")]);
        let mut conn = Connection::new(script, context(Routes::new(), limits), None);

        conn.on_ready();

        assert!(output(&conn).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn dropped_mid_request_reports_failure() {
        let recorder = Arc::new(Recorder::default());
        let script = Script::new([Chunk::Data(b"POST /r HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")]);
        let mut conn = connect(script, routes("/r", recorder.clone()));

        conn.on_ready();
        assert!(!conn.should_remove());
        drop(conn);

        assert_eq!(
            recorder.calls(),
            ["begin /r []", "data abc", "finish false"]
        );
    }

    #[test]
    fn peer_close_mid_body_reports_failure() {
        let recorder = Arc::new(Recorder::default());
        let mut script = Script::new([Chunk::Data(b"POST /r HTTP/1.1\r\nContent-Length: 10\r\n\r\n")]);
        script.eof = true;
        let mut conn = connect(script, routes("/r", recorder.clone()));

        conn.on_ready();
        assert!(conn.should_remove());
        drop(conn);

        assert_eq!(recorder.calls(), ["begin /r []", "finish false"]);
    }

    #[test]
    fn handler_underrun_is_an_error() {
        struct Liar;
        impl RequestHandler for Liar {
            fn process_request(&self, ex: &mut Exchange) {
                ex.set_response(200, "OK");
                ex.set_response_length(10);
            }
            fn send_data(&self, ex: &mut Exchange, dst: &mut [u8]) -> usize {
                if ex.take_userdata::<()>().is_some() {
                    return 0;
                }
                ex.set_userdata(());
                dst[..3].copy_from_slice(b"abc");
                3
            }
        }

        let liar: Arc<dyn RequestHandler> = Arc::new(Liar);
        let script = Script::new([Chunk::Data(b"GET /l HTTP/1.1\r\n\r\n")]);
        let mut conn = connect(script, routes("/l", liar));

        conn.on_ready();

        assert!(conn.should_remove());
        assert!(output(&conn).ends_with("\r\n\r\nabc"));
    }

    fn leak(text: String) -> &'static [u8] {
        Box::leak(text.into_bytes().into_boxed_slice())
    }

    #[test]
    fn header_flood_is_cut_off() {
        let mut raw = String::from("GET /flood HTTP/1.1\r\n");
        for i in 0..60_000 {
            raw.push_str(&format!("X-H{i}: v\r\n"));
        }
        raw.push_str("\r\n");

        let recorder = Arc::new(Recorder::default());
        let script = Script::new(leak(raw).chunks(4096).map(Chunk::Data));
        let mut conn = connect(script, routes("/flood", recorder.clone()));

        conn.on_ready();

        assert!(conn.should_remove());
        assert!(conn.transport.output.is_empty());
        assert!(recorder.calls().is_empty());
        // Stopped after the first chunk
        assert!(conn.transport.input.len() > 100);
        let stored = conn.exchange.as_ref().map_or(0, |ex| ex.request_headers.len());
        assert_eq!(stored, ConnLimits::default().max_headers);
    }

    #[test]
    fn header_count_boundary() {
        let limits = ConnLimits {
            max_headers: 2,
            ..ConnLimits::default()
        };

        #[rustfmt::skip]
        let cases: [(&'static [u8], bool); 3] = [
            (b"GET / HTTP/1.1\r\nA: 1\r\n\r\n", true),
            (b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n", true),
            (b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nA: 3\r\n\r\n", false),
        ];

        for (request, answered) in cases {
            let script = Script::new([Chunk::Data(request)]);
            let mut conn = Connection::new(script, context(Routes::new(), limits.clone()), None);
            conn.on_ready();

            assert!(conn.should_remove());
            assert_eq!(!conn.transport.output.is_empty(), answered, "{}", str_op(request));
        }
    }

    #[test]
    fn repeated_query_key_past_limit_wins() {
        let mut raw = String::from("GET /q?");
        for i in 0..64 {
            raw.push_str(&format!("a{i}=x&"));
        }
        raw.push_str("a0=final&late=1 HTTP/1.1\r\n\r\n");

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let handler: Arc<dyn RequestHandler> =
            Arc::new(BufferedHandler::new(move |ex: &mut Exchange, _: &[u8]| {
                *sink.lock().unwrap() = Some((
                    ex.query_params().len(),
                    ex.query_param("a0").map(String::from),
                    ex.query_param("late").map(String::from),
                ));
                Vec::new()
            }));
        let script = Script::new([Chunk::Data(leak(raw))]);
        let mut conn = connect(script, routes("/q", handler));

        conn.on_ready();

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some((64, Some("final".to_string()), None))
        );
    }

    #[test]
    fn idle_tracking() {
        let conn = connect(Script::new([]), Routes::new());
        let now = Instant::now();

        assert!(!conn.is_idle(now, Duration::from_secs(5)));
        assert!(conn.is_idle(now + Duration::from_secs(5), Duration::from_secs(5)));
    }
}
