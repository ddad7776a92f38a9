use crate::protocol::error::HttpError;

/// Ordered query parameters decoded from the request target.
///
/// Pairs are kept in wire order; duplicate keys are preserved and lookup
/// returns the first occurrence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Decodes a raw query string.
    ///
    /// `+` decodes to space and `%HH` is percent-decoded; an invalid escape
    /// fails the whole request with `BadRequest`.
    // name=world&debug=1
    // a=1&a=2
    // flag
    pub(crate) fn parse(raw: &str) -> Result<Self, HttpError> {
        let mut pairs = Vec::new();

        if raw.is_empty() {
            return Ok(Query { pairs });
        }

        for kv in raw.split('&') {
            let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
            pairs.push((decode_component(key)?, decode_component(value)?));
        }

        Ok(Query { pairs })
    }

    /// First value registered under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// All pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn decode_component(raw: &str) -> Result<String, HttpError> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => return Err(HttpError::bad_request("invalid percent escape in query")),
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| HttpError::bad_request("query is not valid utf-8"))
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
