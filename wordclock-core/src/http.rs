//! Minimal HTTP client seam used by registration, heartbeat and OTA.

use thiserror::Error;

pub const DEFAULT_TIMEOUT_MS: u32 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: Vec<(&'a str, &'a str)>,
    pub body: Option<&'a [u8]>,
    pub timeout_ms: u32,
}

impl<'a> Request<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: vec![("Accept-Encoding", "identity")],
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn post_json(url: &'a str, body: &'a [u8]) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: vec![("Content-Type", "application/json")],
            body: Some(body),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn header(mut self, name: &'a str, value: &'a str) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Ask CDNs and proxies for a fresh copy
    pub fn no_cache(self) -> Self {
        self.header("Cache-Control", "no-cache, no-store, must-revalidate")
            .header("Pragma", "no-cache")
            .header("Expires", "0")
    }

    pub fn header_value(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// Fully buffered response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Response whose body is pulled chunk by chunk
pub trait ResponseStream {
    fn status(&self) -> u16;

    /// Declared `Content-Length`, if the server sent one
    fn content_length(&self) -> Option<u64>;

    /// Returns 0 at end of body
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;
}

pub trait HttpClient {
    fn send(&mut self, request: &Request<'_>) -> Result<Response, HttpError>;

    fn open<'s>(&'s mut self, request: &Request<'_>) -> Result<Box<dyn ResponseStream + 's>, HttpError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Io(String),

    #[error("request timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cache_adds_headers() {
        let req = Request::get("http://x/y.json").no_cache();
        assert_eq!(req.header_value("pragma"), Some("no-cache"));
        assert_eq!(req.header_value("Expires"), Some("0"));
        assert_eq!(req.header_value("Accept-Encoding"), Some("identity"));
    }

    #[test]
    fn post_json_sets_content_type() {
        let req = Request::post_json("http://x/register", b"{}").header("X-Key", "s");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.header_value("content-type"), Some("application/json"));
        assert_eq!(req.header_value("X-Key"), Some("s"));
        assert_eq!(req.body, Some(&b"{}"[..]));
    }

    #[test]
    fn success_range() {
        assert!(Response { status: 204, body: vec![] }.is_success());
        assert!(!Response { status: 401, body: vec![] }.is_success());
    }
}
