//! HTTP/1.x recognition and incremental message parsing.
//!
//! Acceptance scans the input for a method keyword (requests) or an
//! `HTTP/1.x` version literal (responses) and validates the rest of the
//! start line. The message parser is an explicit state machine that can
//! pause on any byte boundary: it accumulates the header block, parses it
//! with [httparse](https://docs.rs/httparse), then frames the body by
//! `Content-Length`, chunked transfer coding, or connection close. Body
//! bytes land in a pool-backed [`Buffer`]; hitting the configured cap or
//! exhausting the pool truncates the body and completes the message at the
//! truncation boundary.

use super::{
    HttpRequest, HttpResponse, MAX_HEADER_BLOCK_LEN, MAX_METHOD_LEN, MAX_REASON_PHRASE_LEN,
    MAX_REQUEST_TARGET_LEN, MIN_METHOD_LEN, MIN_STATUS_LINE_LEN, SUPPORTED_METHODS,
};
use crate::conntrack::conn_id::ConnectionId;
use crate::event::EventContent;
use crate::memory::{Buffer, BufferError, BufferPool, View};
use crate::protocols::stream::{AcceptDecision, ParseStatus};

use anyhow::{anyhow, bail, Result};
use httparse::EMPTY_HEADER;

/// Number of header fields parsed per message.
const NUM_HEADERS: usize = 64;

/// Longest chunk-size line entertained, including any chunk extensions.
const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// Recognizes HTTP/1.x requests and builds parsers for them.
#[derive(Debug)]
pub struct HttpRequestFactory {
    pool: BufferPool,
    max_body_len: usize,
}

impl HttpRequestFactory {
    pub(crate) fn new(pool: BufferPool, max_body_len: usize) -> HttpRequestFactory {
        HttpRequestFactory { pool, max_body_len }
    }

    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_METHOD_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }

        for method in SUPPORTED_METHODS {
            if let Some(start) = input.index(0, method.as_bytes()) {
                match valid_request_line(&input.sub_view(start + method.len(), input.len())) {
                    AcceptDecision::Accept => return (AcceptDecision::Accept, start),
                    AcceptDecision::NeedMoreData => return (AcceptDecision::NeedMoreData, start),
                    AcceptDecision::Reject => {}
                }
            }
        }
        // The input's suffix may be a prefix of a method keyword, e.g.
        // `<garbage>GE` completed by `T / HTTP/1.1` in the next delivery.
        if input.len() < MAX_METHOD_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }
        (AcceptDecision::Reject, input.len())
    }

    pub(crate) fn create_parser(
        &self,
        connection_id: ConnectionId,
        _seq: u32,
        ack: u32,
    ) -> HttpSessionParser {
        // The ACK of the request's first byte equals the SEQ of the matching
        // response's first byte, so it serves as the pairing number.
        HttpSessionParser::new(true, connection_id, ack, self.pool.clone(), self.max_body_len)
    }
}

/// Recognizes HTTP/1.x responses and builds parsers for them.
#[derive(Debug)]
pub struct HttpResponseFactory {
    pool: BufferPool,
    max_body_len: usize,
}

impl HttpResponseFactory {
    pub(crate) fn new(pool: BufferPool, max_body_len: usize) -> HttpResponseFactory {
        HttpResponseFactory { pool, max_body_len }
    }

    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_STATUS_LINE_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }

        for version in ["HTTP/1.1", "HTTP/1.0"] {
            if let Some(start) = input.index(0, version.as_bytes()) {
                match valid_status_line(&input.sub_view(start + version.len(), input.len())) {
                    AcceptDecision::Accept => return (AcceptDecision::Accept, start),
                    AcceptDecision::NeedMoreData => return (AcceptDecision::NeedMoreData, start),
                    AcceptDecision::Reject => {}
                }
            }
        }
        (AcceptDecision::Reject, input.len())
    }

    pub(crate) fn create_parser(
        &self,
        connection_id: ConnectionId,
        seq: u32,
        _ack: u32,
    ) -> HttpSessionParser {
        HttpSessionParser::new(false, connection_id, seq, self.pool.clone(), self.max_body_len)
    }
}

/// Validates a request line per RFC 2616 section 5; `input` starts right
/// after the method keyword.
fn valid_request_line(input: &View) -> AcceptDecision {
    if input.is_empty() {
        return AcceptDecision::NeedMoreData;
    }

    // A single space separates the method from the request target.
    if input.get_byte(0) != b' ' {
        log::trace!("rejecting HTTP request: no space after method");
        return AcceptDecision::Reject;
    }

    let next_sp = match input.index(1, b" ") {
        None => {
            // Could be a very long request target.
            if input.len() - 1 > MAX_REQUEST_TARGET_LEN {
                log::trace!(
                    "rejecting potential HTTP request with target longer than {}",
                    MAX_REQUEST_TARGET_LEN
                );
                return AcceptDecision::Reject;
            }
            return AcceptDecision::NeedMoreData;
        }
        Some(1) => {
            log::trace!("rejecting HTTP request: two spaces after method");
            return AcceptDecision::Reject;
        }
        Some(sp) => sp,
    };

    // Need enough of the tail for the version and line terminator,
    // `HTTP/1.x\r\n`.
    let tail = input.sub_view(next_sp + 1, input.len());
    if tail.len() < 10 {
        return AcceptDecision::NeedMoreData;
    }
    if tail.index(0, b"HTTP/1.1\r\n") == Some(0) || tail.index(0, b"HTTP/1.0\r\n") == Some(0) {
        return AcceptDecision::Accept;
    }
    log::trace!("rejecting HTTP request: line does not end with HTTP version");
    AcceptDecision::Reject
}

/// Validates a status line per RFC 2616 section 6.1; `input` starts right
/// after the HTTP version.
fn valid_status_line(input: &View) -> AcceptDecision {
    // Two spaces plus three status digits.
    if input.len() < 5 {
        return AcceptDecision::NeedMoreData;
    }

    // The format is SP Status-Code SP Reason-Phrase CR LF.
    if input.get_byte(0) != b' ' || input.get_byte(4) != b' ' {
        return AcceptDecision::Reject;
    }

    // We do not require the first digit to be 1-5, to allow custom codes.
    if !input.get_byte(1).is_ascii_digit()
        || !input.get_byte(2).is_ascii_digit()
        || !input.get_byte(3).is_ascii_digit()
    {
        return AcceptDecision::Reject;
    }

    if input.index(0, b"\r\n").is_none() {
        // Could be a very long reason phrase.
        if input.len() - 4 > MAX_REASON_PHRASE_LEN {
            log::trace!(
                "rejecting potential HTTP response with reason phrase longer than {}",
                MAX_REASON_PHRASE_LEN
            );
            return AcceptDecision::Reject;
        }
        return AcceptDecision::NeedMoreData;
    }

    AcceptDecision::Accept
}

/// Parsed start line and header fields, pending body completion.
#[derive(Debug)]
struct MessageHead {
    method: String,
    target: String,
    status_code: u16,
    reason: String,
    version: String,
    host: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
    content_length: Option<usize>,
}

/// How the message body is delimited.
#[derive(Debug)]
enum BodyFraming {
    /// `Content-Length` bytes remain.
    Length { remaining: usize },
    /// Chunked transfer coding.
    Chunked(ChunkPhase),
    /// Body runs until the peer closes the connection (responses only).
    UntilClose,
    /// No body at all.
    None,
}

#[derive(Debug)]
enum ChunkPhase {
    /// Expecting a hex chunk-size line.
    Size,
    /// Expecting `remaining` bytes of chunk data.
    Data { remaining: usize },
    /// Expecting the CRLF that closes a chunk.
    DataEnd,
    /// Expecting trailer lines, ended by an empty line.
    Trailer,
}

#[derive(Debug)]
enum ParseState {
    /// Accumulating the header block.
    Headers,
    /// Consuming the body.
    Body {
        head: MessageHead,
        framing: BodyFraming,
        buffer: Buffer,
        truncated: bool,
    },
}

/// Parses a single HTTP request or response incrementally.
///
/// A response parser does not know the method of the request it answers, so
/// a response to `HEAD` that advertises a `Content-Length` will wrongly
/// consume the following message's bytes as its body.
#[derive(Debug)]
pub struct HttpSessionParser {
    is_request: bool,
    connection_id: ConnectionId,
    pair_seq: u32,
    pool: BufferPool,
    max_body_len: usize,
    state: ParseState,
    /// Bytes received but not yet consumed by the state machine.
    pending: View,
    /// Offset up to which `pending` was already scanned for the header
    /// terminator.
    scanned: usize,
    /// Total bytes ever handed to this parser.
    received: usize,
}

impl HttpSessionParser {
    fn new(
        is_request: bool,
        connection_id: ConnectionId,
        pair_seq: u32,
        pool: BufferPool,
        max_body_len: usize,
    ) -> HttpSessionParser {
        HttpSessionParser {
            is_request,
            connection_id,
            pair_seq,
            pool,
            max_body_len,
            state: ParseState::Headers,
            pending: View::new(),
            scanned: 0,
            received: 0,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        if self.is_request {
            "HTTP/1.x request parser"
        } else {
            "HTTP/1.x response parser"
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.received += input.len();
        self.pending.append(input);

        loop {
            let step = match self.state {
                ParseState::Headers => self.step_headers(is_end)?,
                ParseState::Body { .. } => self.step_body(is_end)?,
            };
            match step {
                Step::Continue => {}
                Step::NeedMore => return Ok(ParseStatus::needs_more(self.received)),
                Step::Complete => return Ok(self.complete()),
            }
        }
    }

    /// Accumulates the header block and parses it once terminated.
    fn step_headers(&mut self, is_end: bool) -> Result<Step> {
        let search_from = self.scanned.saturating_sub(3);
        let terminator = match self.pending.index(search_from, b"\r\n\r\n") {
            Some(pos) => pos,
            None => {
                if self.pending.len() > MAX_HEADER_BLOCK_LEN {
                    bail!("HTTP header block exceeds {} bytes", MAX_HEADER_BLOCK_LEN);
                }
                if is_end {
                    bail!("stream ended inside HTTP headers");
                }
                self.scanned = self.pending.len();
                return Ok(Step::NeedMore);
            }
        };

        let header_block = self
            .pending
            .get_bytes(0, terminator + 4)
            .ok_or_else(|| anyhow!("header block out of range"))?;
        let head = if self.is_request {
            parse_request_head(&header_block)?
        } else {
            parse_response_head(&header_block)?
        };
        let framing = message_framing(self.is_request, &head)?;
        self.pending = self.pending.sub_view(terminator + 4, self.pending.len());
        self.state = ParseState::Body {
            head,
            framing,
            buffer: self.pool.new_buffer(),
            truncated: false,
        };
        Ok(Step::Continue)
    }

    /// Consumes pending bytes as body per the message's framing.
    fn step_body(&mut self, is_end: bool) -> Result<Step> {
        if matches!(
            self.state,
            ParseState::Body {
                framing: BodyFraming::Chunked(_),
                ..
            }
        ) {
            return self.step_chunked(is_end);
        }

        let ParseState::Body {
            framing,
            buffer,
            truncated,
            ..
        } = &mut self.state
        else {
            unreachable!("body step before headers parsed");
        };

        match framing {
            BodyFraming::None => Ok(Step::Complete),
            BodyFraming::Length { remaining } => {
                let take = (*remaining).min(self.pending.len());
                let overflow =
                    !store_body(buffer, &self.pending.sub_view(0, take), self.max_body_len);
                *truncated |= overflow;
                *remaining -= take;
                self.pending = self.pending.sub_view(take, self.pending.len());
                if *remaining == 0 || overflow {
                    return Ok(Step::Complete);
                }
                if is_end {
                    // Stream closed before the advertised length arrived;
                    // deliver what we have.
                    *truncated = true;
                    return Ok(Step::Complete);
                }
                Ok(Step::NeedMore)
            }
            BodyFraming::UntilClose => {
                let overflow = !store_body(buffer, &self.pending, self.max_body_len);
                *truncated |= overflow;
                self.pending.clear();
                if is_end || overflow {
                    return Ok(Step::Complete);
                }
                Ok(Step::NeedMore)
            }
            BodyFraming::Chunked(_) => unreachable!("chunked handled above"),
        }
    }

    /// Advances the chunked-body machine by one state.
    fn step_chunked(&mut self, is_end: bool) -> Result<Step> {
        let ParseState::Body {
            framing: BodyFraming::Chunked(phase),
            buffer,
            truncated,
            ..
        } = &mut self.state
        else {
            unreachable!("chunk step outside chunked body");
        };

        match phase {
            ChunkPhase::Size => {
                let eol = match self.pending.index(0, b"\r\n") {
                    Some(eol) => eol,
                    None if self.pending.len() > MAX_CHUNK_SIZE_LINE => {
                        bail!("chunk size line exceeds {} bytes", MAX_CHUNK_SIZE_LINE)
                    }
                    None if is_end => {
                        *truncated = true;
                        return Ok(Step::Complete);
                    }
                    None => return Ok(Step::NeedMore),
                };
                let line = self.pending.get_bytes(0, eol).unwrap_or_default();
                let size = parse_chunk_size(&line)?;
                self.pending = self.pending.sub_view(eol + 2, self.pending.len());
                *phase = if size == 0 {
                    ChunkPhase::Trailer
                } else {
                    ChunkPhase::Data { remaining: size }
                };
                Ok(Step::Continue)
            }
            ChunkPhase::Data { remaining } => {
                let take = (*remaining).min(self.pending.len());
                let overflow =
                    !store_body(buffer, &self.pending.sub_view(0, take), self.max_body_len);
                *truncated |= overflow;
                *remaining -= take;
                self.pending = self.pending.sub_view(take, self.pending.len());
                if overflow {
                    return Ok(Step::Complete);
                }
                if *remaining > 0 {
                    if is_end {
                        *truncated = true;
                        return Ok(Step::Complete);
                    }
                    return Ok(Step::NeedMore);
                }
                *phase = ChunkPhase::DataEnd;
                Ok(Step::Continue)
            }
            ChunkPhase::DataEnd => {
                if self.pending.len() < 2 {
                    if is_end {
                        *truncated = true;
                        return Ok(Step::Complete);
                    }
                    return Ok(Step::NeedMore);
                }
                if self.pending.get_byte(0) != b'\r' || self.pending.get_byte(1) != b'\n' {
                    bail!("chunk data not terminated by CRLF");
                }
                self.pending = self.pending.sub_view(2, self.pending.len());
                *phase = ChunkPhase::Size;
                Ok(Step::Continue)
            }
            ChunkPhase::Trailer => loop {
                let eol = match self.pending.index(0, b"\r\n") {
                    Some(eol) => eol,
                    None if is_end => {
                        *truncated = true;
                        return Ok(Step::Complete);
                    }
                    None => return Ok(Step::NeedMore),
                };
                let empty = eol == 0;
                self.pending = self.pending.sub_view(eol + 2, self.pending.len());
                if empty {
                    return Ok(Step::Complete);
                }
                // Trailer fields are consumed but not retained.
            },
        }
    }

    /// Builds the completed message; bytes still pending belong to the next
    /// protocol unit.
    fn complete(&mut self) -> ParseStatus {
        let state = std::mem::replace(&mut self.state, ParseState::Headers);
        let ParseState::Body {
            head,
            buffer,
            truncated,
            ..
        } = state
        else {
            unreachable!("completing a message before its headers parsed");
        };

        let body = buffer.bytes();
        let unused = std::mem::take(&mut self.pending);
        let consumed = self.received - unused.len();
        let content = if self.is_request {
            EventContent::HttpRequest(Box::new(HttpRequest {
                connection_id: self.connection_id,
                pair_seq: self.pair_seq,
                method: head.method,
                target: head.target,
                version: head.version,
                host: head.host,
                headers: head.headers,
                cookies: head.cookies,
                content_length: head.content_length,
                body,
                body_truncated: truncated,
                buffer: Some(buffer),
            }))
        } else {
            EventContent::HttpResponse(Box::new(HttpResponse {
                connection_id: self.connection_id,
                pair_seq: self.pair_seq,
                status_code: head.status_code,
                reason: head.reason,
                version: head.version,
                headers: head.headers,
                cookies: head.cookies,
                content_length: head.content_length,
                body,
                body_truncated: truncated,
                buffer: Some(buffer),
            }))
        };
        ParseStatus::done(content, unused, consumed)
    }
}

enum Step {
    Continue,
    NeedMore,
    Complete,
}

/// Writes body bytes up to the configured cap. Returns `false` when the cap
/// was hit or the pool ran dry, either of which truncates the body.
fn store_body(buffer: &mut Buffer, bytes: &View, max_body_len: usize) -> bool {
    let room = max_body_len.saturating_sub(buffer.len());
    let take = room.min(bytes.len());
    let mut reader = bytes.sub_view(0, take).reader();
    match buffer.read_from(&mut reader) {
        Ok(_) => take == bytes.len(),
        Err(BufferError::PoolExhausted(copied)) => {
            log::debug!("body buffer pool exhausted after {} bytes", copied);
            false
        }
        Err(BufferError::Source { .. }) => {
            // Reading from a view cannot fail.
            unreachable!("view reader returned an error")
        }
    }
}

fn parse_request_head(block: &[u8]) -> Result<MessageHead> {
    let mut headers = [EMPTY_HEADER; NUM_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(block) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => bail!("incomplete HTTP request head"),
        Err(e) => bail!("malformed HTTP request head: {}", e),
    }

    let method = req.method.unwrap_or_default().to_owned();
    let target = req.path.unwrap_or_default().to_owned();
    let version = version_string(req.version);

    let fields = collect_headers(&headers);
    let host = first_header(&fields, "host").map(str::to_owned);
    let cookies = fields
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("cookie"))
        .flat_map(|(_, v)| v.split("; "))
        .map(str::to_owned)
        .collect();
    Ok(MessageHead {
        method,
        target,
        status_code: 0,
        reason: String::new(),
        version,
        host,
        content_length: content_length(&fields),
        cookies,
        headers: fields,
    })
}

fn parse_response_head(block: &[u8]) -> Result<MessageHead> {
    let mut headers = [EMPTY_HEADER; NUM_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(block) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => bail!("incomplete HTTP response head"),
        Err(e) => bail!("malformed HTTP response head: {}", e),
    }

    let status_code = resp.code.unwrap_or_default();
    let reason = resp.reason.unwrap_or_default().to_owned();
    let version = version_string(resp.version);

    let fields = collect_headers(&headers);
    let cookies = fields
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
        .map(|(_, v)| v.clone())
        .collect();
    Ok(MessageHead {
        method: String::new(),
        target: String::new(),
        status_code,
        reason,
        version,
        host: None,
        content_length: content_length(&fields),
        cookies,
        headers: fields,
    })
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_owned(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect()
}

fn first_header<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn content_length(fields: &[(String, String)]) -> Option<usize> {
    first_header(fields, "content-length").and_then(|v| v.trim().parse().ok())
}

fn version_string(version: Option<u8>) -> String {
    format!("HTTP/1.{}", version.unwrap_or(1))
}

/// Determines the body framing from the parsed head.
fn message_framing(is_request: bool, head: &MessageHead) -> Result<BodyFraming> {
    let chunked = first_header(&head.headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if !is_request {
        // These statuses never carry a body.
        let code = head.status_code;
        if (100..200).contains(&code) || code == 204 || code == 304 {
            return Ok(BodyFraming::None);
        }
    }
    if chunked {
        return Ok(BodyFraming::Chunked(ChunkPhase::Size));
    }
    if let Some(length) = head.content_length {
        return Ok(if length == 0 {
            BodyFraming::None
        } else {
            BodyFraming::Length { remaining: length }
        });
    }
    if is_request {
        // A request without a length declaration has no body.
        Ok(BodyFraming::None)
    } else {
        // A response without one runs until the connection closes.
        Ok(BodyFraming::UntilClose)
    }
}

/// Parses a chunk-size line: hex digits, optionally followed by `;` and
/// chunk extensions, which are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(sc) => &line[..sc],
        None => line,
    };
    let text = std::str::from_utf8(digits)
        .map_err(|_| anyhow!("chunk size is not ASCII"))?
        .trim();
    if text.is_empty() {
        bail!("empty chunk size line");
    }
    usize::from_str_radix(text, 16).map_err(|e| anyhow!("bad chunk size {:?}: {}", text, e))
}
