//! HTTP/1.1 response builder.
//!
//! Responses are built fluently and serialized to a byte buffer for
//! transmission over TCP.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use tunecache::http::Response;
///
/// let response = Response::lines(["Imagine", "Jealous Guy"]).header("X-Cache", "MISS");
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("\r\n\r\nImagine\nJealous Guy\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// A `200 OK` line-oriented text body, one item per line.
    pub fn lines<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut body = String::new();
        for item in items {
            body.push_str(item.as_ref());
            body.push('\n');
        }
        Self::new(StatusCode::Ok)
            .header("Content-Type", TEXT_PLAIN)
            .body(body)
    }

    /// A failure response whose body is a single line describing the error.
    pub fn error(status: StatusCode, message: impl AsRef<str>) -> Self {
        Self::new(status)
            .header("Content-Type", TEXT_PLAIN)
            .body(format!("{}\n", message.as_ref()))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", TEXT_PLAIN);
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn lines_body_one_item_per_line() {
        let r = Response::lines(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(r.status(), StatusCode::Ok);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 4\r\n"));
        assert!(s.ends_with("\r\n\r\na\nb\n"));
    }

    #[test]
    fn empty_title_list_has_zero_length() {
        let r = Response::lines(Vec::<String>::new());
        assert!(r.body_bytes().is_empty());
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn error_is_single_line() {
        let r = Response::error(StatusCode::BadGateway, "upstream failure: status 500");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(s.ends_with("\r\n\r\nupstream failure: status 500\n"));
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok).header("X-Cache", "HIT").body("ok");
        let s = to_string(r.into_bytes());
        assert!(s.contains("X-Cache: HIT\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::Ok).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }
}
