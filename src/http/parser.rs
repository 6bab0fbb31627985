//! Request line and header line grammar.
//!
//! The connection feeds complete lines (terminator removed) into these
//! functions; buffering and CRLF scanning live in the connection.

use crate::{
    errors::ErrorKind,
    http::{
        encoding::normalize_path,
        types::{Method, Version},
    },
};
use memchr::{memchr, memmem};

/// Shortest line that can hold `GET / HTTP/1.1`.
const MIN_REQUEST_LINE: usize = 14;

#[derive(Debug, PartialEq)]
pub(crate) struct RequestLine {
    pub(crate) method: Method,
    pub(crate) version: Version,
    pub(crate) path: String,
}

/// Position of the first CRLF in `buf`.
#[inline(always)]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n")
}

#[inline(always)]
pub(crate) fn as_utf8(line: &[u8]) -> Result<&str, ErrorKind> {
    simdutf8::basic::from_utf8(line).map_err(|_| ErrorKind::InvalidEncoding)
}

pub(crate) fn parse_request_line(line: &[u8]) -> Result<RequestLine, ErrorKind> {
    if line.len() < MIN_REQUEST_LINE {
        return Err(ErrorKind::RequestLineMalformed);
    }

    let line = as_utf8(line)?;
    let suffix_at = line.len() - Version::SUFFIX_LEN;
    if !line.is_char_boundary(suffix_at) {
        return Err(ErrorKind::UnsupportedVersion);
    }

    let version = Version::from_suffix(&line.as_bytes()[suffix_at..])?;
    let (method, path_at) = Method::from_bytes(line.as_bytes())?;

    if path_at > suffix_at {
        return Err(ErrorKind::RequestLineMalformed);
    }

    let path = line[path_at..suffix_at].trim();
    if !path.starts_with('/') {
        return Err(ErrorKind::InvalidPath);
    }

    Ok(RequestLine {
        method,
        version,
        path: normalize_path(path).into_owned(),
    })
}

/// Splits `Name: value` into a trimmed name and value.
pub(crate) fn parse_header_line(line: &[u8]) -> Result<(&str, &str), ErrorKind> {
    let line = as_utf8(line)?;

    let colon = match memchr(b':', line.as_bytes()) {
        Some(0) | None => return Err(ErrorKind::InvalidHeader),
        Some(pos) => pos,
    };

    let name = line[..colon].trim();
    if name.is_empty() {
        return Err(ErrorKind::InvalidHeader);
    }

    Ok((name, line[colon + 1..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(method: Method, version: Version, path: &str) -> Result<RequestLine, ErrorKind> {
        Ok(RequestLine {
            method,
            version,
            path: path.to_string(),
        })
    }

    #[test]
    fn request_lines() {
        use Method::*;
        use Version::*;

        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1", ok(Get, Http11, "/")),
            ("GET /hello HTTP/1.1", ok(Get, Http11, "/hello")),
            ("POST /echo HTTP/1.0", ok(Post, Http10, "/echo")),
            ("head /x http/1.1", ok(Head, Http11, "/x")),
            ("PUT  /spaced  HTTP/1.1", ok(Put, Http11, "/spaced")),
            ("DELETE /a b HTTP/1.1", ok(Delete, Http11, "/a%20b")),
            ("GET /q?a=1&b=%20 HTTP/1.1", ok(Get, Http11, "/q?a=1&b=%20")),

            ("GET / HTTP/1.", Err(ErrorKind::RequestLineMalformed)),
            ("GET /hello HTTP/2.0", Err(ErrorKind::UnsupportedVersion)),
            ("GET /hello HTTPS1.1", Err(ErrorKind::UnsupportedVersion)),
            ("PATCH /x HTTP/1.1", Err(ErrorKind::UnsupportedMethod)),
            ("TRACE / HTTP/1.1", Err(ErrorKind::UnsupportedMethod)),
            ("GET hello HTTP/1.1", Err(ErrorKind::InvalidPath)),
            ("GET      HTTP/1.1", Err(ErrorKind::InvalidPath)),
            ("DELETE HTTP/1.1", Err(ErrorKind::RequestLineMalformed)),
            ("GET/hello/HTTP/1.1", Err(ErrorKind::UnsupportedVersion)),
        ];

        for (line, expected) in cases {
            assert_eq!(parse_request_line(line.as_bytes()), expected, "{line:?}");
        }
    }

    #[test]
    fn request_line_not_utf8() {
        assert_eq!(
            parse_request_line(b"GET /\xff\xfe HTTP/1.1"),
            Err(ErrorKind::InvalidEncoding)
        );
    }

    #[test]
    fn header_lines() {
        #[rustfmt::skip]
        let cases: [(&[u8], Result<(&str, &str), ErrorKind>); 7] = [
            (b"Host: x", Ok(("Host", "x"))),
            (b"Content-Length:5", Ok(("Content-Length", "5"))),
            (b"  X-Pad  :  v a l  ", Ok(("X-Pad", "v a l"))),
            (b"Empty:", Ok(("Empty", ""))),
            (b"Time: 12:30:00", Ok(("Time", "12:30:00"))),
            (b": value", Err(ErrorKind::InvalidHeader)),
            (b"NoColon", Err(ErrorKind::InvalidHeader)),
        ];

        for (line, expected) in cases {
            assert_eq!(parse_header_line(line), expected);
        }
    }

    #[test]
    fn crlf_search() {
        assert_eq!(find_crlf(b"GET / HTTP/1.1\r\nHost"), Some(14));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"partial\r"), None);
    }
}
