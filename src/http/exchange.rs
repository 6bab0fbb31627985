//! The per-request record shared between the connection and its handler.

use crate::http::types::{HeaderMap, Method, StatusCode, Version};
use std::{any::Any, collections::HashMap, fmt, io::Write, net::SocketAddr};

/// One in-flight HTTP exchange: parsed request inputs and handler-set
/// response outputs.
///
/// Created by the connection when it starts reading a request and passed to
/// every [`RequestHandler`](crate::RequestHandler) callback. The response
/// defaults to `500` with no headers and an empty body, so a handler must at
/// least call [`set_response`](Self::set_response) or
/// [`set_status`](Self::set_status).
///
/// # Examples
/// ```
/// use wisp_http::{Exchange, RequestHandler, StatusCode};
///
/// struct Hello;
///
/// impl RequestHandler for Hello {
///     fn process_request(&self, ex: &mut Exchange) {
///         let name = ex.query_param("name").unwrap_or("world").to_string();
///         let body = format!("Hello, {name}!").into_bytes();
///
///         ex.set_status(StatusCode::Ok);
///         ex.set_response_header("Content-Type", "text/plain");
///         ex.set_response_length(body.len() as u64);
///         ex.set_userdata((body, 0usize));
///     }
///
///     fn send_data(&self, ex: &mut Exchange, dst: &mut [u8]) -> usize {
///         let Some((body, pos)) = ex.userdata_mut::<(Vec<u8>, usize)>() else {
///             return 0;
///         };
///         let n = dst.len().min(body.len() - *pos);
///         dst[..n].copy_from_slice(&body[*pos..*pos + n]);
///         *pos += n;
///         n
///     }
/// }
/// ```
pub struct Exchange {
    pub(crate) method: Method,
    pub(crate) version: Version,
    pub(crate) path: String,
    pub(crate) wildcards: Vec<String>,
    pub(crate) query: HashMap<String, String>,
    pub(crate) request_headers: HeaderMap,
    pub(crate) request_length: u64,

    response_code: u16,
    response_message: String,
    response_headers: HeaderMap,
    response_length: u64,

    client_addr: Option<SocketAddr>,
    userdata: Option<Box<dyn Any + Send>>,
}

impl Exchange {
    pub(crate) fn new(client_addr: Option<SocketAddr>) -> Self {
        Self {
            method: Method::Get,
            version: Version::Http11,
            path: String::new(),
            wildcards: Vec::new(),
            query: HashMap::new(),
            request_headers: HeaderMap::new(),
            request_length: 0,

            response_code: StatusCode::InternalServerError.as_u16(),
            response_message: String::new(),
            response_headers: HeaderMap::new(),
            response_length: 0,

            client_addr,
            userdata: None,
        }
    }

    /// Serializes the status line and header block, blank line included.
    pub(crate) fn write_head(&self, out: &mut Vec<u8>) {
        let message = match self.response_message.is_empty() {
            false => self.response_message.as_str(),
            true => StatusCode::from_u16(self.response_code)
                .map(|s| s.reason())
                .unwrap_or(""),
        };

        // Writing into a Vec cannot fail
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", self.response_code, message);
        for (name, value) in self.response_headers.iter() {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }
}

// Request side
impl Exchange {
    /// Request method.
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Protocol version of the request line.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Normalized request path without the query string.
    ///
    /// # Examples
    ///
    /// For request line `GET /files/a b?x=1 HTTP/1.1`:
    /// ```text
    /// /files/a%20b
    /// ```
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Segments matched by `*` in the bound route, in path order.
    ///
    /// # Examples
    ///
    /// Route `/form/*/echo`, request `/form/login/echo`:
    /// ```text
    /// ["login"]
    /// ```
    #[inline]
    pub fn wildcards(&self) -> &[String] {
        &self.wildcards
    }

    /// Wildcard capture at `index`, if any.
    #[inline]
    pub fn wildcard(&self, index: usize) -> Option<&str> {
        self.wildcards.get(index).map(String::as_str)
    }

    /// Decoded query parameter. A flag without `=` maps to its own name.
    #[inline]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// All decoded query parameters.
    #[inline]
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Request header, looked up ignoring ASCII case.
    #[inline]
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.get(name)
    }

    /// All request headers.
    #[inline]
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Declared request body length (`Content-Length`, or `0`).
    #[inline]
    pub fn request_length(&self) -> u64 {
        self.request_length
    }

    /// Address of the peer, when the transport reported one.
    #[inline]
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }
}

// Response side
impl Exchange {
    /// Sets the status code and reason phrase.
    ///
    /// An empty message is replaced by the canonical reason phrase when the
    /// code is a known [`StatusCode`].
    pub fn set_response(&mut self, code: u16, message: impl Into<String>) {
        self.response_code = code;
        self.response_message = message.into();
    }

    /// Sets a known status code with its canonical reason phrase.
    pub fn set_status(&mut self, status: StatusCode) {
        self.set_response(status.as_u16(), status.reason());
    }

    #[inline]
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    #[inline]
    pub fn response_message(&self) -> &str {
        &self.response_message
    }

    /// Sets a response header; names are compared ignoring ASCII case.
    pub fn set_response_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.response_headers.insert(name, value);
    }

    #[inline]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name)
    }

    #[inline]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Declares the response body length and sets `Content-Length`.
    ///
    /// The connection pulls exactly this many bytes from
    /// [`send_data`](crate::RequestHandler::send_data).
    pub fn set_response_length(&mut self, len: u64) {
        self.response_length = len;
        self.response_headers.insert("Content-Length", len.to_string());
    }

    #[inline]
    pub fn response_length(&self) -> u64 {
        self.response_length
    }
}

// Handler-owned state
impl Exchange {
    /// Attaches handler-owned state, dropping any previous value.
    ///
    /// The value is dropped with the exchange, after
    /// [`finish_request`](crate::RequestHandler::finish_request).
    pub fn set_userdata<T: Any + Send>(&mut self, value: T) {
        self.userdata = Some(Box::new(value));
    }

    /// Borrows the attached state if it has type `T`.
    pub fn userdata<T: Any + Send>(&self) -> Option<&T> {
        self.userdata.as_deref()?.downcast_ref()
    }

    /// Mutably borrows the attached state if it has type `T`.
    pub fn userdata_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.userdata.as_deref_mut()?.downcast_mut()
    }

    /// Detaches the state if it has type `T`; otherwise it stays attached.
    pub fn take_userdata<T: Any + Send>(&mut self) -> Option<Box<T>> {
        match self.userdata.take()?.downcast::<T>() {
            Ok(value) => Some(value),
            Err(other) => {
                self.userdata = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("wildcards", &self.wildcards)
            .field("query", &self.query)
            .field("request_length", &self.request_length)
            .field("response_code", &self.response_code)
            .field("response_length", &self.response_length)
            .field("has_userdata", &self.userdata.is_some())
            .finish()
    }
}
