//! Request handler interface and ready-made handlers.

use crate::http::{
    exchange::Exchange,
    types::{Method, StatusCode},
};
use std::sync::Arc;

/// Application callbacks driven by a connection, one implementation per route.
///
/// Calls for one exchange happen in this order on the worker thread that owns
/// the connection:
///
/// 1. [`begin_request`](Self::begin_request) once the header block is parsed
/// 2. [`receive_data`](Self::receive_data) zero or more times, exactly
///    [`request_length`](Exchange::request_length) bytes in total
/// 3. [`process_request`](Self::process_request) once the body is complete
/// 4. [`send_data`](Self::send_data) until
///    [`response_length`](Exchange::response_length) bytes were produced
/// 5. [`finish_request`](Self::finish_request) exactly once, with `false`
///    if the exchange was cut short
///
/// The same instance serves many connections at once from different worker
/// threads. Per-exchange state belongs in the exchange's
/// [userdata](Exchange::set_userdata), which is dropped with the exchange.
///
/// # Examples
/// ```
/// use wisp_http::{Exchange, RequestHandler, StatusCode};
///
/// /// Answers with the number of body bytes received.
/// struct CountBytes;
///
/// impl RequestHandler for CountBytes {
///     fn begin_request(&self, ex: &mut Exchange) {
///         ex.set_userdata(0u64);
///     }
///
///     fn receive_data(&self, ex: &mut Exchange, data: &[u8]) {
///         if let Some(total) = ex.userdata_mut::<u64>() {
///             *total += data.len() as u64;
///         }
///     }
///
///     fn process_request(&self, ex: &mut Exchange) {
///         let total = ex.take_userdata::<u64>().map(|b| *b).unwrap_or(0);
///         let body = total.to_string().into_bytes();
///
///         ex.set_status(StatusCode::Ok);
///         ex.set_response_length(body.len() as u64);
///         ex.set_userdata(std::io::Cursor::new(body));
///     }
///
///     fn send_data(&self, ex: &mut Exchange, dst: &mut [u8]) -> usize {
///         use std::io::Read;
///         ex.userdata_mut::<std::io::Cursor<Vec<u8>>>()
///             .and_then(|c| c.read(dst).ok())
///             .unwrap_or(0)
///     }
/// }
/// ```
pub trait RequestHandler: Send + Sync + 'static {
    /// Called once the header block has been parsed and routed.
    fn begin_request(&self, exchange: &mut Exchange) {
        let _ = exchange;
    }

    /// Called with each chunk of the request body as it arrives.
    fn receive_data(&self, exchange: &mut Exchange, data: &[u8]) {
        let _ = (exchange, data);
    }

    /// Called once the whole body was received. Sets the response code,
    /// headers and declared length.
    fn process_request(&self, exchange: &mut Exchange);

    /// Fills `dst` with response body bytes and returns how many were
    /// written. `dst` never exceeds the bytes still owed, and returning `0`
    /// before the declared length is reached aborts the connection.
    fn send_data(&self, exchange: &mut Exchange, dst: &mut [u8]) -> usize;

    /// Called exactly once when the exchange ends.
    fn finish_request(&self, exchange: &mut Exchange, success: bool) {
        let _ = (exchange, success);
    }
}

impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    fn begin_request(&self, exchange: &mut Exchange) {
        (**self).begin_request(exchange)
    }

    fn receive_data(&self, exchange: &mut Exchange, data: &[u8]) {
        (**self).receive_data(exchange, data)
    }

    fn process_request(&self, exchange: &mut Exchange) {
        (**self).process_request(exchange)
    }

    fn send_data(&self, exchange: &mut Exchange, dst: &mut [u8]) -> usize {
        (**self).send_data(exchange, dst)
    }

    fn finish_request(&self, exchange: &mut Exchange, success: bool) {
        (**self).finish_request(exchange, success)
    }
}

/// Copies `src[*pos..]` into `dst` and advances the cursor.
#[inline]
fn copy_from(src: &[u8], pos: &mut usize, dst: &mut [u8]) -> usize {
    let rest = src.get(*pos..).unwrap_or_default();
    let n = dst.len().min(rest.len());
    dst[..n].copy_from_slice(&rest[..n]);
    *pos += n;
    n
}

// STATIC

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html><html lang=\"en\"><head><title>Error 404</title>\
    </head><body><h1>404 Not Found</h1></body></html>";

/// Serves a fixed body for every request.
///
/// Defaults to `200 OK` with `Content-Type: text/html`. `HEAD` requests get
/// the status line only, without `Content-Type` or a body.
///
/// # Examples
/// ```
/// use wisp_http::{StaticHandler, StatusCode};
///
/// let teapot = StaticHandler::new("short and stout")
///     .with_status(StatusCode::ImaTeapot)
///     .with_content_type("text/plain");
///
/// assert_eq!(teapot.status(), 418);
/// ```
#[derive(Debug, Clone)]
pub struct StaticHandler {
    status: u16,
    message: String,
    content_type: String,
    data: Arc<[u8]>,
}

impl StaticHandler {
    /// `200 OK`, `text/html`, with the given body.
    pub fn new(data: impl AsRef<[u8]>) -> Self {
        Self {
            status: StatusCode::Ok.as_u16(),
            message: StatusCode::Ok.reason().to_string(),
            content_type: "text/html".to_string(),
            data: Arc::from(data.as_ref()),
        }
    }

    /// The built-in `404 Not Found` page.
    pub fn not_found() -> Self {
        Self::new(NOT_FOUND_PAGE).with_status(StatusCode::NotFound)
    }

    pub fn with_status(self, status: StatusCode) -> Self {
        self.with_response(status.as_u16(), status.reason())
    }

    /// Any status code and reason phrase.
    pub fn with_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.status = code;
        self.message = message.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl RequestHandler for StaticHandler {
    fn begin_request(&self, exchange: &mut Exchange) {
        exchange.set_userdata(0usize);
    }

    fn process_request(&self, exchange: &mut Exchange) {
        exchange.set_response(self.status, self.message.clone());

        if exchange.method() != Method::Head {
            exchange.set_response_header("Content-Type", self.content_type.clone());
            exchange.set_response_length(self.data.len() as u64);
        }
    }

    fn send_data(&self, exchange: &mut Exchange, dst: &mut [u8]) -> usize {
        match exchange.userdata_mut::<usize>() {
            Some(pos) => copy_from(&self.data, pos, dst),
            None => 0,
        }
    }
}

// BUFFERED

/// Buffers the request body and answers with a body computed from it.
///
/// The closure runs from [`process_request`](RequestHandler::process_request)
/// with the exchange (status already set to `200 OK`) and the buffered body,
/// and returns the response body. Bodies whose declared length reaches
/// `max_body_len` (default 64 KiB) are consumed but not buffered, so the
/// closure sees an empty slice. `HEAD` requests get no body.
///
/// # Examples
/// ```
/// use wisp_http::{BufferedHandler, Exchange};
///
/// let echo = BufferedHandler::new(|ex: &mut Exchange, body: &[u8]| {
///     ex.set_response_header("Content-Type", "application/octet-stream");
///     body.to_vec()
/// });
/// ```
pub struct BufferedHandler<F> {
    respond: F,
    max_body_len: u64,
}

struct Buffered {
    received: Vec<u8>,
    response: Vec<u8>,
    sent: usize,
}

impl<F> BufferedHandler<F>
where
    F: Fn(&mut Exchange, &[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            max_body_len: 64 * 1024,
        }
    }

    /// Declared lengths at or above `max` are not buffered.
    pub fn with_max_body_len(mut self, max: u64) -> Self {
        self.max_body_len = max;
        self
    }
}

impl<F> RequestHandler for BufferedHandler<F>
where
    F: Fn(&mut Exchange, &[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn begin_request(&self, exchange: &mut Exchange) {
        let capacity = match exchange.request_length() < self.max_body_len {
            true => exchange.request_length() as usize,
            false => 0,
        };

        exchange.set_userdata(Buffered {
            received: Vec::with_capacity(capacity),
            response: Vec::new(),
            sent: 0,
        });
    }

    fn receive_data(&self, exchange: &mut Exchange, data: &[u8]) {
        if exchange.request_length() >= self.max_body_len {
            return;
        }
        if let Some(state) = exchange.userdata_mut::<Buffered>() {
            state.received.extend_from_slice(data);
        }
    }

    fn process_request(&self, exchange: &mut Exchange) {
        let Some(mut state) = exchange.take_userdata::<Buffered>() else {
            return;
        };

        exchange.set_status(StatusCode::Ok);
        state.response = (self.respond)(exchange, &state.received);

        if exchange.method() != Method::Head {
            exchange.set_response_length(state.response.len() as u64);
        }
        exchange.set_userdata(*state);
    }

    fn send_data(&self, exchange: &mut Exchange, dst: &mut [u8]) -> usize {
        match exchange.userdata_mut::<Buffered>() {
            Some(state) => copy_from(&state.response, &mut state.sent, dst),
            None => 0,
        }
    }
}
