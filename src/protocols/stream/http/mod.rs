//! HTTP/1.x message types.
//!
//! One [`HttpRequest`] or [`HttpResponse`] is emitted per fully parsed
//! message. Requests and responses on the same connection are paired through
//! `pair_seq`: a request carries the TCP acknowledgment number of its first
//! byte, which equals the TCP sequence number of the first byte of the
//! response that answers it, because HTTP requires the request to finish
//! before the response starts.

pub mod parser;

use crate::conntrack::conn_id::ConnectionId;
use crate::memory::{Buffer, View};

/// Length of the shortest supported HTTP method (`GET`).
pub(crate) const MIN_METHOD_LEN: usize = 3;

/// Length of the longest supported HTTP method (`CONNECT`).
pub(crate) const MAX_METHOD_LEN: usize = 7;

/// Maximum request target length accepted. There is no standard, but 2000
/// bytes is the de facto limit, so we double it.
pub(crate) const MAX_REQUEST_TARGET_LEN: usize = 4000;

/// Maximum length of the status-line reason phrase accepted.
pub(crate) const MAX_REASON_PHRASE_LEN: usize = 512;

/// Minimum amount of a response status line needed before acceptance can be
/// decided (`HTTP/1.1 200` is 12 bytes).
pub(crate) const MIN_STATUS_LINE_LEN: usize = 12;

/// Maximum size of the header block a parser will accumulate.
pub(crate) const MAX_HEADER_BLOCK_LEN: usize = 8 * 1024;

/// Supported methods, more common ones near the front.
pub(crate) const SUPPORTED_METHODS: [&str; 9] = [
    "GET", "POST", "DELETE", "HEAD", "PUT", "PATCH", "CONNECT", "OPTIONS", "TRACE",
];

/// A parsed HTTP/1.x request.
#[derive(Debug)]
pub struct HttpRequest {
    /// Connection this request was observed on.
    pub connection_id: ConnectionId,
    /// TCP acknowledgment number of the request's first byte; equals the
    /// `pair_seq` of the matching response.
    pub pair_seq: u32,
    pub method: String,
    pub target: String,
    /// `HTTP/1.0` or `HTTP/1.1`.
    pub version: String,
    pub host: Option<String>,
    /// Header fields in wire order.
    pub headers: Vec<(String, String)>,
    /// `Cookie` header values split into individual cookie pairs.
    pub cookies: Vec<String>,
    pub content_length: Option<usize>,
    /// Body bytes, possibly truncated at the configured cap.
    pub body: View,
    /// Set when the body hit the length cap or the pool ran dry.
    pub body_truncated: bool,
    /// Storage backing `body`; returned to the pool on release.
    pub(crate) buffer: Option<Buffer>,
}

impl HttpRequest {
    /// Returns the first value of the named header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops the body and returns its storage to the pool.
    pub fn release_buffers(&mut self) {
        self.body.clear();
        if let Some(mut buffer) = self.buffer.take() {
            buffer.release();
        }
    }
}

/// A parsed HTTP/1.x response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Connection this response was observed on.
    pub connection_id: ConnectionId,
    /// TCP sequence number of the response's first byte; equals the
    /// `pair_seq` of the matching request.
    pub pair_seq: u32,
    pub status_code: u16,
    pub reason: String,
    /// `HTTP/1.0` or `HTTP/1.1`.
    pub version: String,
    /// Header fields in wire order.
    pub headers: Vec<(String, String)>,
    /// `Set-Cookie` header values.
    pub cookies: Vec<String>,
    pub content_length: Option<usize>,
    /// Body bytes, possibly truncated at the configured cap.
    pub body: View,
    /// Set when the body hit the length cap, the pool ran dry, or the stream
    /// closed before a `Content-Length` body completed.
    pub body_truncated: bool,
    /// Storage backing `body`; returned to the pool on release.
    pub(crate) buffer: Option<Buffer>,
}

impl HttpResponse {
    /// Returns the first value of the named header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops the body and returns its storage to the pool.
    pub fn release_buffers(&mut self) {
        self.body.clear();
        if let Some(mut buffer) = self.buffer.take() {
            buffer.release();
        }
    }
}
