//! URL query string parser with percent-decoding and flexible collection support.

use crate::http::encoding::decode_component;
use memchr::memchr;
use std::{borrow::Cow, collections::HashMap};
use thiserror::Error;

/// URL query string parser.
///
/// Splits on `&`, then on the first `=` of each parameter, and percent-decodes
/// both sides (see [`decode_component`](crate::encoding::decode_component)).
/// Empty parameters (`&&`) are skipped. A parameter without `=` is a flag
/// whose value is its own key, so `?debug` yields `("debug", "debug")`.
///
/// Values borrow from the input unless decoding had to rewrite them.
///
/// # Examples
/// ```rust
/// use wisp_http::query::Query;
/// use std::{borrow::Cow, collections::HashMap};
///
/// // Parse into Vec (preserves order)
/// let params: Vec<(Cow<str>, Cow<str>)> = Query::parse("name=j%C3%B6rg&age=25&debug", 10).unwrap();
/// assert_eq!(params.len(), 3);
/// assert_eq!(params[0], ("name".into(), "jörg".into()));
/// assert_eq!(params[2], ("debug".into(), "debug".into()));
///
/// // Parse into HashMap (last value wins)
/// let params: HashMap<Cow<str>, Cow<str>> = Query::parse("k=1&k=2", 10).unwrap();
/// assert_eq!(params["k"], "2");
///
/// // Handle limits
/// let result = Query::parse::<Vec<(Cow<str>, Cow<str>)>>("a=1&b=2", 1);
/// assert!(result.is_err()); // Exceeds limit of 1 parameter
/// ```
pub struct Query;

impl Query {
    /// Parses a URL query string into a new collection.
    ///
    /// # Arguments
    /// - `query`: the query string
    ///   (handles optional leading `?` automatically, so `?a=1` and `a=1` are equivalent)
    /// - `limit`: Maximum number of parameters to parse
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a str, limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a URL query string into an existing collection.
    ///
    /// Parameters are appended. Once the collection holds `limit` entries,
    /// new keys are skipped while keys it already holds are still updated;
    /// [`Error::OverLimit`] then reports that something was skipped.
    ///
    /// # Examples
    /// ```
    /// use wisp_http::query::{Error, Query};
    ///
    /// let mut collector = Vec::new();
    /// let result = Query::parse_into(&mut collector, "a=1&b=2&c=3", 2);
    ///
    /// assert_eq!(result, Err(Error::OverLimit(2)));
    /// assert_eq!(collector.len(), 2);
    /// ```
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a str,
        limit: usize,
    ) -> Result<(), Error> {
        let data = query.strip_prefix('?').unwrap_or(query);
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let bytes = data.as_bytes();
        let mut over_limit = false;
        let mut start = 0;
        while start < bytes.len() {
            // Find next '&' or end of string
            let end = memchr(b'&', &bytes[start..])
                .map(|pos| start + pos)
                .unwrap_or(bytes.len());

            if start == end {
                start = end + 1;
                continue;
            }

            // '&' and '=' are ASCII, so every index here is a char boundary
            let param = &data[start..end];
            let (key, value) = match memchr(b'=', param.as_bytes()) {
                Some(index) => (
                    decode_component(&param[..index]),
                    decode_component(&param[index + 1..]),
                ),
                None => {
                    let key = decode_component(param);
                    (key.clone(), key)
                }
            };

            // Replacing an existing key never grows the collection
            if result.length() < limit || result.contains_key(&key) {
                result.add_param(key, value);
            } else {
                over_limit = true;
            }
            start = end + 1;
        }

        if over_limit {
            return Err(Error::OverLimit(limit));
        }
        Ok(())
    }
}

/// A trait for types that can collect parsed query parameters.
///
/// # Examples
/// ```rust
/// use wisp_http::query::QueryCollector;
/// use std::borrow::Cow;
///
/// struct KeysOnly(Vec<String>);
///
/// impl<'a> QueryCollector<'a> for KeysOnly {
///     fn add_param(&mut self, key: Cow<'a, str>, _: Cow<'a, str>) {
///         self.0.push(key.into_owned());
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         KeysOnly(Vec::with_capacity(capacity))
///     }
/// }
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    /// Adds a decoded parameter to the collection.
    fn add_param(&mut self, key: Cow<'a, str>, value: Cow<'a, str>);

    /// Returns the current number of parameters in the collection.
    fn length(&self) -> usize;

    /// Whether adding `key` would overwrite an entry instead of adding one.
    #[inline(always)]
    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    /// Creates a new collection with the specified capacity.
    fn with_capacity(capacity: usize) -> Self;
}

// Preserves parameter order
impl<'a> QueryCollector<'a> for Vec<(Cow<'a, str>, Cow<'a, str>)> {
    #[inline(always)]
    fn add_param(&mut self, key: Cow<'a, str>, value: Cow<'a, str>) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Deduplicates parameters (last wins)
impl<'a> QueryCollector<'a> for HashMap<Cow<'a, str>, Cow<'a, str>> {
    #[inline(always)]
    fn add_param(&mut self, key: Cow<'a, str>, value: Cow<'a, str>) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn contains_key(&self, key: &str) -> bool {
        HashMap::contains_key(self, key)
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

// Owned map stored on an exchange (last wins)
impl<'a> QueryCollector<'a> for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: Cow<'a, str>, value: Cow<'a, str>) {
        self.insert(key.into_owned(), value.into_owned());
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn contains_key(&self, key: &str) -> bool {
        HashMap::contains_key(self, key)
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Error types that can occur during query parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The number of parameters exceeded the specified limit.
    ///
    /// # Fields
    /// - `0`: The maximum allowed number of parameters
    #[error("Query parameter limit exceeded: limit={0}")]
    OverLimit(usize),

    /// The query string is empty or contains only a '?' character.
    #[error("Query string is empty or contains no parameters")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    type Params<'a> = Vec<(Cow<'a, str>, Cow<'a, str>)>;

    fn pairs<'a>(params: &'a Params) -> Vec<(&'a str, &'a str)> {
        params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect()
    }

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params: Params = Query::parse(line, 8).unwrap();
            assert_eq!(pairs(&params), [("a", "1"), ("b", "2")]);
        }
    }

    #[test]
    fn full() {
        let params: Params = Query::parse("flag&empty=&=val&&key=value", 10).unwrap();

        assert_eq!(
            pairs(&params),
            [
                ("flag", "flag"),
                ("empty", ""),
                ("", "val"),
                ("key", "value"),
            ]
        );
    }

    #[test]
    fn decoded() {
        let params: Params = Query::parse("na%20me=a%2Bb&x=1%3D2&pct=100%", 10).unwrap();

        assert_eq!(
            pairs(&params),
            [("na me", "a+b"), ("x", "1=2"), ("pct", "100%")]
        );
        assert!(matches!(params[1].0, Cow::Borrowed(_)));
    }

    #[test]
    fn value_keeps_later_equals() {
        let params: Params = Query::parse("expr=a=b", 10).unwrap();
        assert_eq!(pairs(&params), [("expr", "a=b")]);
    }

    #[test]
    fn owned_map_last_wins() {
        let map: HashMap<String, String> = Query::parse("k=1&k=2&flag", 10).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["k"], "2");
        assert_eq!(map["flag"], "flag");
    }

    #[test]
    fn limit_error() {
        assert_eq!(Query::parse::<Params>("a&a", 1), Err(Error::OverLimit(1)));
    }

    #[test]
    fn repeated_key_updates_past_limit() {
        let mut map = HashMap::<String, String>::new();
        let result = Query::parse_into(&mut map, "a=1&b=2&a=3&c=4&b=5", 2);

        assert_eq!(result, Err(Error::OverLimit(2)));
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "3");
        assert_eq!(map["b"], "5");
        assert!(!map.contains_key("c"));
    }

    #[test]
    fn repeated_key_at_limit_is_not_an_error() {
        let map: HashMap<Cow<str>, Cow<str>> = Query::parse("a=1&b=2&a=3", 2).unwrap();
        assert_eq!(map["a"], "3");
    }

    #[test]
    fn empty_error() {
        assert_eq!(Query::parse::<Params>("", 10), Err(Error::Empty));
        assert_eq!(Query::parse::<Params>("?", 10), Err(Error::Empty));
    }
}
