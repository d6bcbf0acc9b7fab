//! HTTP/2 connection preface recognition.
//!
//! Only the client connection preface is recognized: the literal 24-byte
//! sequence sent to a known HTTP/2 server, or after an `Upgrade: h2c`
//! negotiation completes. Once seen, the rest of the connection is HTTP/2
//! frames we do not decode, so the parser emits a single preface event and
//! swallows everything after it.

use crate::event::EventContent;
use crate::memory::View;
use crate::protocols::stream::{AcceptDecision, ParseStatus};

use anyhow::Result;

/// The 24-octet client connection preface: `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n`.
pub(crate) const CONNECTION_PREFACE: &[u8] = &[
    0x50, 0x52, 0x49, 0x20, 0x2a, 0x20, 0x48, 0x54, 0x54, 0x50, 0x2f, 0x32, 0x2e, 0x30, 0x0d,
    0x0a, 0x0d, 0x0a, 0x53, 0x4d, 0x0d, 0x0a, 0x0d, 0x0a,
];

/// Recognizes the HTTP/2 client connection preface.
#[derive(Debug)]
pub struct Http2PrefaceFactory;

impl Http2PrefaceFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < CONNECTION_PREFACE.len() {
            return (AcceptDecision::NeedMoreData, 0);
        }

        if let Some(start) = input.index(0, CONNECTION_PREFACE) {
            return (AcceptDecision::Accept, start);
        }

        // No full match. A suffix of the input may still be the beginning of
        // a preface; keep any tail starting with the preface's first byte so
        // the next delivery can complete the match.
        let tail = input.len() - CONNECTION_PREFACE.len() + 1;
        match input.index(tail, &CONNECTION_PREFACE[..1]) {
            Some(possible) => (AcceptDecision::NeedMoreData, possible),
            None => (AcceptDecision::Reject, input.len()),
        }
    }
}

/// Emits one preface event, then sinks all further input with no emissions.
#[derive(Debug)]
pub struct Http2Sink {
    first_input: bool,
    consumed: usize,
}

impl Http2Sink {
    pub(crate) fn new() -> Http2Sink {
        Http2Sink {
            first_input: true,
            consumed: 0,
        }
    }

    pub(crate) fn parse(&mut self, input: &View, _is_end: bool) -> Result<ParseStatus> {
        if self.first_input {
            self.first_input = false;
            self.consumed = input.len();
            return Ok(ParseStatus::done(
                EventContent::Http2ConnectionPreface,
                View::new(),
                self.consumed,
            ));
        }

        // Finalizing without a result is treated by the flow as truncation,
        // which is the right description of an opaque HTTP/2 connection.
        self.consumed += input.len();
        Ok(ParseStatus::needs_more(self.consumed))
    }
}
