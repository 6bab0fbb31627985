//! Percent-encoding helpers for paths and URI components.

use std::borrow::Cow;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

// Bytes that `normalize_path` leaves untouched.
const PATH_KEEP: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        table[i] = b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'_' | b'.' | b'~' | b'/' | b'%' | b'?' | b'=' | b'&' | b'#' | b'*'
            );
        i += 1;
    }
    table
};

/// Normalizes a request or route path for comparison.
///
/// Unreserved characters, `/`, existing `%` escapes and the query and
/// wildcard delimiters (`? = & # *`) are kept; every other byte is written as
/// an upper-case `%XX` escape. Applying it twice yields the same result.
///
/// ```
/// use wisp_http::encoding::normalize_path;
///
/// assert_eq!(normalize_path("/a b/ü"), "/a%20b/%C3%BC");
/// assert_eq!(normalize_path("/form/*/x?y=1"), "/form/*/x?y=1");
/// ```
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if path.bytes().all(|b| PATH_KEEP[b as usize]) {
        return Cow::Borrowed(path);
    }

    let mut out = String::with_capacity(path.len() + 8);
    for b in path.bytes() {
        if PATH_KEEP[b as usize] {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }

    Cow::Owned(out)
}

/// Decodes `%XX` escapes. Malformed escapes are kept literally and `+` is
/// not treated as a space. Invalid UTF-8 is replaced lossily.
///
/// ```
/// use wisp_http::encoding::decode_component;
///
/// assert_eq!(decode_component("a%20b"), "a b");
/// assert_eq!(decode_component("100%"), "100%");
/// assert_eq!(decode_component("%zz+1"), "%zz+1");
/// ```
pub fn decode_component(src: &str) -> Cow<'_, str> {
    match urlencoding::decode_binary(src.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(src),
        Cow::Owned(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Cow::Owned(s),
            Err(err) => Cow::Owned(String::from_utf8_lossy(err.as_bytes()).into_owned()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        #[rustfmt::skip]
        let cases = [
            ("/", "/"),
            ("/hello", "/hello"),
            ("/a b", "/a%20b"),
            ("/a%20b", "/a%20b"),
            ("/x\"y", "/x%22y"),
            ("/form/*/echo", "/form/*/echo"),
            ("/q?a=1&b=2#f", "/q?a=1&b=2#f"),
            ("/\u{e9}", "/%C3%A9"),
        ];

        for (src, expected) in cases {
            assert_eq!(normalize_path(src), expected, "{src}");
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_path("/ä ö/<x>").into_owned();
        assert_eq!(normalize_path(&once), once);
    }

    #[test]
    fn decode_lenient() {
        #[rustfmt::skip]
        let cases = [
            ("plain", "plain"),
            ("a%20b", "a b"),
            ("%41%42", "AB"),
            ("%", "%"),
            ("%4", "%4"),
            ("%G1", "%G1"),
            ("a+b", "a+b"),
            ("%C3%A9", "\u{e9}"),
        ];

        for (src, expected) in cases {
            assert_eq!(decode_component(src), expected, "{src}");
        }
    }

    #[test]
    fn decode_invalid_utf8_is_lossy() {
        assert_eq!(decode_component("%FF"), "\u{FFFD}");
    }
}
